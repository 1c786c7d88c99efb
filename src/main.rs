use clap::Parser;
use tracing::error;

use scriptwatch_lib::cli::Cli;

fn main() {
    scriptwatch_lib::init_tracing();

    if let Err(err) = scriptwatch_lib::run(Cli::parse()) {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}
