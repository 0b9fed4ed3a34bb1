use clap::Parser;
use mnemon::cli::{run, Cli};
use mnemon_logging::{init_logging, LogConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "mnemon",
        verbose: cli.verbose,
    }) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Misconfiguration exits 2, every other startup failure 1.
            let code = if e.downcast_ref::<mnemon::config::ConfigError>().is_some() {
                2
            } else {
                1
            };
            eprintln!("Error: {e:#}");
            ExitCode::from(code)
        }
    }
}
