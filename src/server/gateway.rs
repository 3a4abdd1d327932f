use crate::application_impl::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::{ACCESS_SECRET, Secrets, Settings};
use nanoid::nanoid;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    pub guard: Arc<AuthGuard>,
    pub dispatcher: Arc<RpcDispatcher>,
    rpc_client: Arc<RpcClient>,
    // hosted in-process when the bus is the memory bus
    auth_node: Option<AuthNode>,
}

impl Gateway {
    /// Fails when the access secret is missing, a backend is unknown or the broker cannot
    /// be reached.
    pub async fn try_new(settings: &Settings, secrets: &Secrets) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);

        let access_codec = AccessTokenCodec::new(JwtConfig {
            signing_key: secrets.require(ACCESS_SECRET)?,
            ttl: settings.jwt.access_ttl()?,
        });

        let cache: Arc<dyn CacheStore> = match settings.cache.backend.as_str() {
            "redis" => {
                let redis_client = redis::Client::open(settings.cache.url.as_str())?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisCacheStore::new(
                    redis_manager,
                    settings.cache.prefix.clone(),
                ))
            }
            "memory" => Arc::new(MemoryCacheStore::new()),
            other => return Err(anyhow::anyhow!("Unknown cache backend: {}", other)),
        };
        let guard = Arc::new(AuthGuard::new(cache, access_codec));

        // region bus
        let cancel = CancellationToken::new();
        let bus = &settings.bus;

        let (publisher, consumer, auth_node): (
            Arc<dyn EventPublisher>,
            Arc<dyn EventConsumer>,
            Option<AuthNode>,
        ) = match bus.backend.as_str() {
            "kafka" => {
                let publisher: Arc<dyn EventPublisher> = Arc::new(KafkaPublisher::new(
                    &bus.brokers,
                    &format!("{}-pub-{}", bus.client_id, run_id),
                )?);
                let consumer: Arc<dyn EventConsumer> = Arc::new(
                    KafkaConsumer::new(
                        &bus.brokers,
                        &format!("{}-sub-{}", bus.client_id, run_id),
                        cancel.clone(),
                    )
                    .from_latest(),
                );
                (publisher, consumer, None)
            }
            "memory" => {
                let memory_bus = MemoryBus::new();
                let node_cancel = cancel.child_token();
                let auth_node = AuthNode::start(
                    settings,
                    secrets,
                    memory_bus.clone(),
                    Arc::new(memory_bus.consumer(node_cancel.clone())),
                    node_cancel,
                )
                .await?;
                let publisher: Arc<dyn EventPublisher> = memory_bus.clone();
                let consumer: Arc<dyn EventConsumer> =
                    Arc::new(memory_bus.consumer(cancel.clone()));
                (publisher, consumer, Some(auth_node))
            }
            other => return Err(anyhow::anyhow!("Unknown bus backend: {}", other)),
        };

        let rpc_client = Arc::new(RpcClient::new(
            publisher,
            consumer,
            format!("{}-{}", bus.group_id, run_id),
            cancel,
        ));
        let operations: Vec<&str> = AUTH_OPERATIONS
            .into_iter()
            .chain(bus.operations.iter().map(String::as_str))
            .collect();
        for operation in &operations {
            rpc_client.subscribe_to_response_of(operation)?;
        }
        rpc_client.connect().await?;
        // endregion

        let timeouts = DispatchTimeouts {
            default: Duration::from_millis(bus.timeout_ms),
            per_domain: bus
                .timeouts
                .iter()
                .map(|(domain, ms)| (domain.clone(), Duration::from_millis(*ms)))
                .collect(),
        };
        let caller: Arc<dyn crate::application_port::RpcCaller> = rpc_client.clone();
        let dispatcher = Arc::new(RpcDispatcher::new(caller, timeouts));

        info!(
            bus = %bus.backend,
            cache = %settings.cache.backend,
            operations = operations.len(),
            "gateway started"
        );

        Ok(Self {
            guard,
            dispatcher,
            rpc_client,
            auth_node,
        })
    }

    pub fn pending_requests(&self) -> usize {
        self.rpc_client.pending_count()
    }

    pub async fn shutdown(&self) {
        info!("gateway shutting down...");
        self.rpc_client.shutdown().await;
        if let Some(auth_node) = &self.auth_node {
            auth_node.shutdown().await;
        }
    }
}
