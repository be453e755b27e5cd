use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use parley_server::config::ServerConfig;
use parley_server::service::SignalingService;

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if std::env::var("PARLEY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!("Parley voice chat server starting");

    let config = ServerConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let service = SignalingService::new(config);
    service.start();

    if service.ready().await.is_some() {
        for arg in std::env::args().skip(1) {
            if let Some(raw) = arg.strip_prefix("--issue=") {
                match raw.parse::<Uuid>() {
                    Ok(user_id) => {
                        tracing::info!(user_id = %user_id, url = %service.create_session_url(user_id), "Session link");
                    },
                    Err(e) => tracing::warn!(value = raw, error = %e, "Ignoring --issue with invalid UUID"),
                }
            } else if arg == "--debug-link" {
                tracing::info!(url = %service.create_debug_session_url(), "Debug session link");
            } else {
                tracing::warn!(%arg, "Unknown argument");
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        service.stop();
    }

    match service.wait().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Voice chat server failed");
            ExitCode::FAILURE
        },
    }
}
