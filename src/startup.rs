//! Application Startup
//!
//! Wires the durable store, the coordination store, the queues and the
//! gateway together, then serves HTTP until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::application::queues::{MessageQueue, MessageQueueWorker, RoomQueue, RoomQueueWorker};
use crate::application::services::{MessageService, TokenVerifier};
use crate::config::Settings;
use crate::domain::{MembershipRepository, MessageRepository, RoomRepository};
use crate::infrastructure::coordination::Coordination;
use crate::infrastructure::database;
use crate::infrastructure::health::{BusProbe, DatabaseProbe, HealthProbe, PresenceProbe};
use crate::infrastructure::repositories::{
    PgMembershipRepository, PgMessageRepository, PgRoomRepository,
};
use crate::presentation::http::{create_router, handlers::health};
use crate::presentation::middleware::{create_cors_layer, create_trace_layer};
use crate::presentation::websocket::{Gateway, GatewayDeps};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub message_queue: MessageQueue,
    pub room_queue: RoomQueue,
    pub probes: Arc<Vec<Arc<dyn HealthProbe>>>,
    pub settings: Arc<Settings>,
}

/// Durable store handles.
#[derive(Clone)]
pub struct Repositories {
    pub rooms: Arc<dyn RoomRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            rooms: Arc::new(PgRoomRepository::new(pool.clone())),
            memberships: Arc::new(PgMembershipRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool)),
        }
    }
}

/// The delivery core with its background workers not yet started.
pub struct Core {
    pub state: AppState,
    pub message_worker: Arc<MessageQueueWorker>,
    pub room_worker: Arc<RoomQueueWorker>,
}

impl Core {
    pub fn assemble(
        settings: Settings,
        repositories: Repositories,
        coordination: Coordination,
        probes: Vec<Arc<dyn HealthProbe>>,
    ) -> Self {
        let id_generator = Arc::new(SnowflakeGenerator::new(
            settings.snowflake.epoch,
            settings.snowflake.machine_id,
        ));
        let message_service = Arc::new(MessageService::new(
            Arc::clone(&repositories.messages),
            Arc::clone(&repositories.memberships),
            id_generator,
        ));

        let message_queue = MessageQueue::new(Arc::clone(&coordination.queues));
        let room_queue = RoomQueue::new(Arc::clone(&coordination.queues));

        let message_worker = Arc::new(MessageQueueWorker::new(
            message_queue.clone(),
            Arc::clone(&message_service),
            Arc::clone(&coordination.bus),
            settings.queue.clone(),
        ));
        let room_worker = Arc::new(RoomQueueWorker::new(
            room_queue.clone(),
            Arc::clone(&repositories.rooms),
            Arc::clone(&repositories.memberships),
            Arc::clone(&coordination.presence),
            Arc::clone(&coordination.bus),
            settings.queue.clone(),
        ));

        let gateway = Arc::new(Gateway::new(GatewayDeps {
            verifier: Arc::new(TokenVerifier::new(&settings.jwt)),
            memberships: Arc::clone(&repositories.memberships),
            messages: message_service,
            presence: Arc::clone(&coordination.presence),
            bus: Arc::clone(&coordination.bus),
            message_queue: message_queue.clone(),
            room_queue: room_queue.clone(),
            settings: settings.websocket.clone(),
        }));

        Self {
            state: AppState {
                gateway,
                message_queue,
                room_queue,
                probes: Arc::new(probes),
                settings: Arc::new(settings),
            },
            message_worker,
            room_worker,
        }
    }

    /// Start the bus listener, the pending watchdog and both queue workers.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let gateway = &self.state.gateway;
        vec![
            gateway.spawn_bus_listener(shutdown.clone()),
            gateway.spawn_pending_watchdog(shutdown.clone()),
            tokio::spawn(Arc::clone(&self.message_worker).run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.room_worker).run(shutdown)),
        ]
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    core: Core,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let pool = database::create_lazy_pool(&settings.database)?;
        if settings.database.run_migrations {
            database::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");
        }

        let coordination =
            Coordination::connect(&settings.redis, settings.presence.ttl()).await;

        let probes: Vec<Arc<dyn HealthProbe>> = vec![
            Arc::new(DatabaseProbe::new(pool.clone())),
            Arc::new(PresenceProbe::new(
                Arc::clone(&coordination.presence),
                coordination.local_only,
            )),
            Arc::new(BusProbe::new(Arc::clone(&coordination.bus))),
        ];

        let cors = create_cors_layer(&settings.cors);
        let addr = settings.server.socket_addr()?;
        let core = Core::assemble(settings, Repositories::postgres(pool), coordination, probes);

        let router = create_router(core.state.clone())
            .layer(create_trace_layer())
            .layer(cors);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            core,
        })
    }

    /// Serve until SIGINT/SIGTERM, then stop the workers.
    pub async fn run_until_stopped(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.core.spawn_background(shutdown_rx);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Shutting down background tasks");
        let _ = shutdown_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
