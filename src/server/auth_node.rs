use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::{ACCESS_SECRET, REFRESH_SECRET, Secrets, Settings};
use sqlx::MySqlPool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Consumer group shared by every auth node so each request is handled once.
pub const AUTH_SERVICE_GROUP: &str = "courier-auth-service";

/// The auth service hosted as a bus handler.
pub struct AuthNode {
    handle: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
    cancel: CancellationToken,
    pool: Option<MySqlPool>,
}

impl AuthNode {
    /// `consumer` must have been built with `cancel`.
    pub async fn start(
        settings: &Settings,
        secrets: &Secrets,
        publisher: Arc<dyn EventPublisher>,
        consumer: Arc<dyn EventConsumer>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let access_codec = AccessTokenCodec::new(JwtConfig {
            signing_key: secrets.require(ACCESS_SECRET)?,
            ttl: settings.jwt.access_ttl()?,
        });
        let refresh_codec = RefreshTokenCodec::new(JwtConfig {
            signing_key: secrets.require(REFRESH_SECRET)?,
            ttl: settings.jwt.refresh_ttl()?,
        });

        let (auth_repo, session_repo, pool): (
            Arc<dyn AuthRepo>,
            Arc<dyn SessionTokenRepo>,
            Option<MySqlPool>,
        ) = match settings.store.backend.as_str() {
            "mysql" => {
                let pool = connect_pool(&settings.store.url).await?;
                let auth_repo: Arc<dyn AuthRepo> = Arc::new(MySqlAuthRepo::new(pool.clone()));
                let session_repo: Arc<dyn SessionTokenRepo> =
                    Arc::new(MySqlSessionTokenRepo::new(pool.clone()));
                (auth_repo, session_repo, Some(pool))
            }
            "memory" => {
                let auth_repo: Arc<dyn AuthRepo> = Arc::new(MemoryAuthRepo::new());
                let session_repo: Arc<dyn SessionTokenRepo> =
                    Arc::new(MemorySessionTokenRepo::new());
                (auth_repo, session_repo, None)
            }
            other => return Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        };

        let auth_service: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
            auth_repo,
            session_repo,
            Arc::new(Argon2PasswordHasher),
            access_codec,
            refresh_codec,
        ));
        let handler: Arc<dyn RpcHandler> = Arc::new(AuthRpcHandler::new(auth_service));

        let server = RpcServer::new(
            handler,
            publisher,
            consumer,
            AUTH_SERVICE_GROUP,
            RpcServerConfig::default(),
        );
        let handle = server.spawn().await?;

        info!(store = %settings.store.backend, "auth node started");
        Ok(Self {
            handle: Mutex::new(Some(handle)),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("auth node shutting down...");
        self.cancel.cancel();

        let handle = match self.handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let r = handle.await;
            info!("auth request consumer dropped: {:?}", r);
        }
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
