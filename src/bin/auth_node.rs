//! Standalone auth service: serves `auth.*` requests from the Kafka bus.

use courier::logger::*;
use courier::server::*;
use courier::settings::*;
use nanoid::nanoid;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    logger.reload_from_config(&project_settings.log)?;

    let bus = &project_settings.bus;
    if bus.backend != "kafka" {
        return Err(anyhow::anyhow!(
            "auth_node needs bus.backend = \"kafka\"; the gateway hosts the auth node on the memory bus"
        ));
    }

    let run_id = nanoid!(10);
    let cancel = CancellationToken::new();
    let publisher: Arc<dyn EventPublisher> = Arc::new(KafkaPublisher::new(
        &bus.brokers,
        &format!("courier-auth-pub-{}", run_id),
    )?);
    let consumer: Arc<dyn EventConsumer> = Arc::new(KafkaConsumer::new(
        &bus.brokers,
        &format!("courier-auth-sub-{}", run_id),
        cancel.clone(),
    ));

    let secrets = Secrets::from_env();
    let node = AuthNode::start(&project_settings, &secrets, publisher, consumer, cancel).await?;

    signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
