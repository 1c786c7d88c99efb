use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Scriptwatch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory.
/// Platform data dir (e.g. ~/.local/share/scriptwatch), or the working
/// directory when none can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME.to_lowercase())
}

/// Database used when `--db` is not given.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("scriptwatch.db")
}

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "scriptwatch_lib=info,scriptwatch=info,warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_under_app_data() {
        let db = default_db_path();
        assert!(db.starts_with(app_data_dir()));
        assert!(db.ends_with("scriptwatch.db"));
    }

    #[test]
    fn app_data_dir_named_after_app() {
        assert!(app_data_dir().ends_with("scriptwatch"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.3.0");
    }
}
