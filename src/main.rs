use clap::Parser;
use reelpick::app::App;
use reelpick::cli::Args;
use reelpick::config::Config;
use reelpick::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging depends on config, so config errors can only go to stderr.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting reelpick"
    );

    let mut app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    info!(enabled_services = ?args.services, "services configuration loaded");
    if let Err(e) = app.setup_services(&args.services) {
        error!(error = ?e, "Failed to setup services");
        return ExitCode::FAILURE;
    }

    app.start_services();
    app.run().await
}
