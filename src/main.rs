use edgefeed::config::Config;
use edgefeed::orchestrator;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match Config::load(Config::resolve_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    config.init_logging();

    info!("edgefeed starting");

    if let Err(e) = orchestrator::run(config).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }

    info!("edgefeed stopped");
}
