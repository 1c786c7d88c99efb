use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "scriptwatch",
    version,
    about = "Script compliance analysis worker"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drain one job's chunks, aggregate, and exit.
    Run(RunArgs),
    /// Poll for work until killed.
    Serve,
    /// Apply schema migrations and exit.
    Migrate,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long = "job")]
    pub job_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database shared by all workers.
    #[arg(long, global = true, env = "SCRIPTWATCH_DB")]
    pub db: Option<PathBuf>,

    /// Taxonomy JSON; the bundled catalog is used when omitted.
    #[arg(long, global = true, env = "SCRIPTWATCH_TAXONOMY")]
    pub taxonomy: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "SCRIPTWATCH_LLM_BASE_URL",
        default_value = "http://localhost:11434/v1"
    )]
    pub llm_base_url: String,

    #[arg(long, global = true, env = "SCRIPTWATCH_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, global = true, env = "SCRIPTWATCH_JUDGE_TIMEOUT_SECS", default_value_t = 120)]
    pub judge_timeout_secs: u64,

    #[arg(long, global = true, env = "SCRIPTWATCH_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    #[arg(long, global = true, env = "SCRIPTWATCH_LEXICON_REFRESH_SECS", default_value_t = 300)]
    pub lexicon_refresh_secs: u64,

    #[arg(long, global = true, env = "SCRIPTWATCH_STALE_CLAIM_SECS", default_value_t = 900)]
    pub stale_claim_secs: u64,

    /// Bypass the router and judge every scannable article.
    #[arg(long, global = true, env = "SCRIPTWATCH_HIGH_RECALL", default_value_t = false)]
    pub high_recall: bool,

    /// Force temperature 0 and a fixed seed where the job leaves them unset.
    #[arg(long, global = true, env = "SCRIPTWATCH_DETERMINISTIC", default_value_t = false)]
    pub deterministic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_requires_job() {
        assert!(Cli::try_parse_from(["scriptwatch", "run"]).is_err());
        let cli = Cli::try_parse_from(["scriptwatch", "run", "--job", "j-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(RunArgs { ref job_id }) if job_id == "j-1"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["scriptwatch", "serve", "--high-recall", "--poll-interval-secs", "2"])
            .unwrap();
        assert!(cli.global.high_recall);
        assert_eq!(cli.global.poll_interval_secs, 2);
        assert!(!cli.global.deterministic);
    }
}
