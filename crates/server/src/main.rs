use anyhow::Result;
use embargo_common::AppConfig;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/embargo.yaml".to_string());

    info!(config_path = %config_path, "starting embargo server");

    let config = AppConfig::load(&config_path)?;
    let listen = config.server.listen.clone();
    if !config.features.embargo {
        info!("embargo feature is off; requests will not be filtered");
    }

    let state = embargo_server::new_shared_state(config)?;

    tokio::select! {
        result = embargo_server::run_server(state, &listen) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
