use courier::api;
use courier::logger::*;
use courier::server::*;
use courier::settings::*;
use std::fs;
use std::sync::Arc;
use tokio::signal;

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Could not register SIGINT: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_from_config(&project_settings.log)?;

    let address: std::net::SocketAddr = project_settings.http.address.parse()?;
    let secrets = Secrets::from_env();
    let gateway = Arc::new(Gateway::try_new(&project_settings, &secrets).await?);

    let api_v1 = api::v1::mounted(gateway.clone());

    match (
        &project_settings.http.cert_path,
        &project_settings.http.key_path,
    ) {
        (Some(cert_path), Some(key_path)) => {
            if !fs::metadata(cert_path)?.is_file() {
                return Err(anyhow::anyhow!(
                    "TLS cert is not a regular file: {:?}",
                    cert_path
                ));
            }
            if !fs::metadata(key_path)?.is_file() {
                return Err(anyhow::anyhow!(
                    "TLS key is not a regular file: {:?}",
                    key_path
                ));
            }
            info!(%address, "listening (tls)");
            warp::serve(api_v1)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(address, ctrl_c())
                .1
                .await;
        }
        _ => {
            info!(%address, "listening");
            warp::serve(api_v1)
                .bind_with_graceful_shutdown(address, ctrl_c())
                .1
                .await;
        }
    }

    let shutdown_timeout = std::time::Duration::from_secs(100);
    match tokio::time::timeout(shutdown_timeout, gateway.shutdown()).await {
        Ok(_) => tracing::info!("gateway shutdown successfully"),
        Err(_) => tracing::error!("gateway shutdown timed out"),
    }

    Ok(())
}
