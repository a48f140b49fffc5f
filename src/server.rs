//! Gateway runtime
//!
//! Wires the whole stack together — schema registry, engine, session
//! machinery, command pipeline, WebSocket server — over caller-provided
//! KV-store and message-bus implementations, and owns the background tasks
//! for the lifetime of the process.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::commands::{CommandAudit, CommandConsumer, CommandDispatcher, RequestTracker};
use crate::application::{
    Adapters, ChargePointStateStore, EventPublisher, MessageEngine, RateLimitConfig, RateLimiter,
    ResponseCache,
};
use crate::auth::{AuthConfig, Authenticator, FloodControl};
use crate::config::GatewayConfig;
use crate::infrastructure::{GuardedKvStore, GuardedMessageBus, KvStore, MessageBus};
use crate::interfaces::ws::{ConnectionDeps, ConnectionLimits, GatewayServer};
use crate::protocol::schema::SchemaError;
use crate::protocol::SchemaRegistry;
use crate::session::{NodeDirectory, SessionControl, SessionDirectory, SessionRegistry, SharedSessionRegistry};
use crate::support::{CircuitBreaker, Shutdown};

/// How long background tasks get to drain after the shutdown trigger.
const DRAIN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartError {
    #[error("schema registry failed to build: {0}")]
    Schema(#[from] SchemaError),
}

/// External service implementations the runtime runs against.
pub struct GatewayOptions {
    pub config: GatewayConfig,
    pub kv: Arc<dyn KvStore>,
    pub bus: Arc<dyn MessageBus>,
}

/// Handle to a running gateway node.
pub struct GatewayHandle {
    pub config: GatewayConfig,
    pub registry: SharedSessionRegistry,
    pub events: EventPublisher,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayHandle {
    pub async fn start(options: GatewayOptions) -> Result<Self, StartError> {
        let config = options.config;
        let shutdown = Shutdown::new();

        // ── Guarded infrastructure ─────────────────────────
        let kv_breaker = Arc::new(CircuitBreaker::new("kv", config.breaker_config()));
        let bus_breaker = Arc::new(CircuitBreaker::new("bus", config.breaker_config()));
        let kv: Arc<dyn KvStore> = Arc::new(GuardedKvStore::new(
            options.kv,
            kv_breaker,
            config.infra_op_timeout(),
        ));
        let bus: Arc<dyn MessageBus> = Arc::new(GuardedMessageBus::new(
            options.bus,
            bus_breaker,
            config.infra_op_timeout(),
        ));

        let events = EventPublisher::new(bus.clone(), config.node_id.clone());

        // ── Protocol & application core ────────────────────
        let schema_registry = Arc::new(SchemaRegistry::new(&config.schema_exempt_actions)?);
        let state = Arc::new(ChargePointStateStore::new(config.strict_transactions));
        let adapters = Adapters::new(state.clone(), events.clone());
        let cache = Arc::new(ResponseCache::new(
            config.response_cache_ttl_seconds,
            Some(kv.clone()),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                window: std::time::Duration::from_secs(config.rate_limit_window_seconds),
                per_charger_limit: config.rate_limit_per_charger,
                global_limit: config.rate_limit_global,
                ..RateLimitConfig::default()
            },
        ));
        let tracker = Arc::new(RequestTracker::new(schema_registry.clone()));
        let engine = Arc::new(MessageEngine::new(
            schema_registry.clone(),
            adapters,
            cache,
            rate_limiter,
            tracker.clone(),
        ));

        // ── Session machinery ──────────────────────────────
        let registry = SessionRegistry::shared();
        let directory = Arc::new(SessionDirectory::new(
            kv.clone(),
            config.node_id.clone(),
            config.session_ttl(),
            config.session_stale(),
        ));
        let control = Arc::new(SessionControl::new(
            bus.clone(),
            registry.clone(),
            config.node_id.clone(),
        ));
        let nodes = Arc::new(NodeDirectory::new(
            kv.clone(),
            config.node_id.clone(),
            std::time::Duration::from_secs(config.node_ttl_seconds),
            std::time::Duration::from_secs(config.node_heartbeat_seconds),
        ));

        // ── Admission ──────────────────────────────────────
        let flood = Arc::new(FloodControl::new(
            kv.clone(),
            std::time::Duration::from_secs(config.flood_log_cooldown_seconds),
        ));
        let auth_config: AuthConfig = config.auth.clone();
        let authenticator = Arc::new(Authenticator::new(kv.clone(), flood.clone(), auth_config));

        // ── Command pipeline ───────────────────────────────
        let audit = Arc::new(CommandAudit::new(
            kv.clone(),
            events.clone(),
            std::time::Duration::from_secs(config.command_audit_ttl_seconds),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            schema_registry.clone(),
            tracker.clone(),
            registry.clone(),
            audit,
            config.call_timeout(),
        ));
        let consumer = Arc::new(CommandConsumer::new(
            bus.clone(),
            kv.clone(),
            dispatcher,
            directory.clone(),
            nodes.clone(),
            registry.clone(),
            events.clone(),
            config.node_id.clone(),
            config.command_group_base.clone(),
            std::time::Duration::from_secs(config.command_idempotency_ttl_seconds),
        ));

        // ── Background tasks ───────────────────────────────
        let mut tasks = Vec::new();
        tasks.push(nodes.clone().spawn_heartbeat(shutdown.clone()));
        tasks.push(control.clone().spawn_consumer(shutdown.clone()));
        tasks.extend(consumer.spawn(shutdown.clone()));

        // ── WebSocket endpoint ─────────────────────────────
        let deps = Arc::new(ConnectionDeps {
            engine,
            registry: registry.clone(),
            directory,
            control,
            authenticator,
            flood,
            tracker,
            events: events.clone(),
            limits: ConnectionLimits {
                max_payload_bytes: config.max_payload_bytes,
                pending_message_limit: config.pending_message_limit,
            },
            shutdown: shutdown.clone(),
        });
        let server = GatewayServer::new(config.address(), deps);
        let server_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = server.run(server_shutdown).await {
                error!(%err, "WebSocket server terminated");
            }
        }));

        info!(
            node_id = config.node_id.as_str(),
            address = config.address().as_str(),
            "Gateway node started"
        );

        Ok(Self {
            config,
            registry,
            events,
            shutdown,
            tasks,
        })
    }

    /// Shutdown trigger for embedding callers.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Start the OS signal listener so SIGTERM/SIGINT trigger shutdown.
    pub fn listen_for_signals(&self) {
        self.shutdown.install_signal_handler();
    }

    /// Block until shutdown is triggered, then drain background tasks:
    /// the accept loop and connections stop first, the consumers follow,
    /// the node heartbeat withdraws the advertisement last.
    pub async fn wait(self) {
        self.shutdown.triggered().await;
        info!("Draining gateway tasks");
        Shutdown::drain(self.tasks, DRAIN_DEADLINE).await;
    }

    /// Trigger shutdown and drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.wait().await;
    }
}
