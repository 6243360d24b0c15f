//! Supervisor (C14): wires every component together, owns the socket
//! listeners and periodic timers, and drives shutdown.
//!
//! Everything is constructed once in [`Supervisor::new`] and shared by
//! reference/`Arc` — no module-global state, matching spec.md §9's
//! anti-cyclic-wiring note.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

use crate::bmp::route::RouteStore;
use crate::bmp::{run_session, PeerRegistry};
use crate::config::ServerConfig;
use crate::flow::{enrich, parse_netflow, FlowBroadcaster, FlowStore, TrafficWindow};
use crate::trigger::{Dispatcher, Synchronizer, TriggerStore};

pub struct Supervisor {
    pub(crate) config: ServerConfig,
    pub(crate) flow_store: FlowStore,
    pub(crate) traffic_window: TrafficWindow,
    pub(crate) broadcaster: FlowBroadcaster,
    pub(crate) trigger_store: TriggerStore,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) synchronizer: Synchronizer,
    pub(crate) peer_registry: PeerRegistry,
    pub(crate) route_store: RouteStore,
    started_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub uptime_seconds: u64,
    pub buffered_flows: usize,
    pub active_triggers: usize,
    pub peers_up: usize,
    pub routes_total: usize,
    pub flow_listeners: usize,
}

impl Supervisor {
    pub fn new(config: ServerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client with default TLS backend must build");

        Self {
            flow_store: FlowStore::new(config.max_flows),
            traffic_window: TrafficWindow::new(config.traffic_window_seconds),
            broadcaster: FlowBroadcaster::new(),
            trigger_store: TriggerStore::new(config.notification_cooldown_seconds),
            dispatcher: Dispatcher::new(http.clone(), config.routing_daemon_url.clone()),
            synchronizer: Synchronizer::new(
                http,
                config.container_manager_url.clone(),
                config.notification_cooldown_seconds,
            ),
            peer_registry: PeerRegistry::new(),
            route_store: RouteStore::new(),
            started_at: Instant::now(),
            config,
        }
    }

    pub async fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            buffered_flows: self.flow_store.len(),
            active_triggers: self.trigger_store.list().await.len(),
            peers_up: self
                .peer_registry
                .list()
                .await
                .iter()
                .filter(|p| p.state == crate::bmp::PeerState::Up)
                .count(),
            routes_total: self.route_store.route_count().await,
            flow_listeners: self.broadcaster.listener_count(),
        }
    }

    /// Run every long-lived task until `shutdown` fires. Binds sockets
    /// first so a bind failure at startup is the one fatal error (spec.md
    /// §7: "nothing fatal except failed socket bind at startup").
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let netflow_addr = SocketAddr::new(self.config.netflow_bind, self.config.netflow_port);
        let netflow_socket = UdpSocket::bind(netflow_addr).await?;
        info!("netflow collector listening on {}", netflow_addr);

        let bmp_addr = SocketAddr::new(self.config.bmp_bind, self.config.bmp_port);
        let bmp_listener = TcpListener::bind(bmp_addr).await?;
        info!("bmp collector listening on {}", bmp_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        register_signal_handlers(shutdown_tx);

        let netflow_task = tokio::spawn(run_netflow_loop(
            self.clone(),
            netflow_socket,
            shutdown_rx.clone(),
        ));
        let bmp_task = tokio::spawn(run_bmp_loop(self.clone(), bmp_listener, shutdown_rx.clone()));
        let aggregate_task = tokio::spawn(run_aggregate_eval_loop(self.clone(), shutdown_rx.clone()));
        let cleanup_task = tokio::spawn(run_window_cleanup_loop(self.clone(), shutdown_rx.clone()));
        let sync_task = tokio::spawn(run_sync_loop(self.clone(), shutdown_rx));

        let _ = tokio::join!(
            netflow_task,
            bmp_task,
            aggregate_task,
            cleanup_task,
            sync_task
        );
        Ok(())
    }
}

fn register_signal_handlers(shutdown_tx: watch::Sender<()>) {
    let mut signals = match signal_hook::iterator::Signals::new(&[
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ]) {
        Ok(signals) => signals,
        Err(e) => {
            warn!("failed to register signal handlers: {}", e);
            return;
        }
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });
}

async fn run_netflow_loop(
    supervisor: Arc<Supervisor>,
    socket: UdpSocket,
    mut shutdown: watch::Receiver<()>,
) {
    let mut buf = vec![0u8; 65535];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("netflow collector shutting down");
                return;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("netflow recv error: {}", e);
                        continue;
                    }
                };
                let exporter = match from.ip() {
                    std::net::IpAddr::V4(v4) => v4,
                    std::net::IpAddr::V6(_) => {
                        warn!("netflow exporter {} is IPv6, dropping datagram", from);
                        continue;
                    }
                };
                let received_at = supervisor.started_at.elapsed().as_millis() as u64;
                let records = parse_netflow(&buf[..len], exporter, received_at);
                for record in records {
                    handle_flow(&supervisor, enrich(record)).await;
                }
            }
        }
    }
}

async fn handle_flow(supervisor: &Arc<Supervisor>, flow: crate::flow::EnrichedFlow) {
    supervisor.traffic_window.record(&flow, Instant::now());
    supervisor.broadcaster.publish(flow.clone());

    let triggers = supervisor.trigger_store.snapshot().await;
    let matches = crate::trigger::evaluator::evaluate(&flow, triggers.values());
    for trigger in matches {
        supervisor.dispatcher.dispatch(trigger, flow.clone()).await;
    }

    supervisor.flow_store.insert(flow);
}

async fn run_bmp_loop(
    supervisor: Arc<Supervisor>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("bmp collector shutting down");
                return;
            }
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("bmp accept error: {}", e);
                        continue;
                    }
                };
                info!("bmp session opened from {}", peer_addr);
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    run_session(stream, &supervisor.peer_registry, &supervisor.route_store).await;
                    info!("bmp session from {} closed", peer_addr);
                });
            }
        }
    }
}

async fn run_aggregate_eval_loop(supervisor: Arc<Supervisor>, mut shutdown: watch::Receiver<()>) {
    let mut ticker = tokio::time::interval(supervisor.config.aggregate_eval_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let aggregates = supervisor.traffic_window.aggregated_stats(Instant::now());
                let triggers = supervisor.trigger_store.snapshot().await;
                let matches = crate::trigger::aggregate::evaluate(&aggregates, triggers.values());
                for m in matches {
                    supervisor.dispatcher.dispatch(m.trigger, m.flow).await;
                }
            }
        }
    }
}

async fn run_window_cleanup_loop(supervisor: Arc<Supervisor>, mut shutdown: watch::Receiver<()>) {
    let mut ticker = tokio::time::interval(supervisor.config.window_cleanup_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                supervisor.traffic_window.cleanup(Instant::now());
            }
        }
    }
}

async fn run_sync_loop(supervisor: Arc<Supervisor>, mut shutdown: watch::Receiver<()>) {
    let mut ticker = tokio::time::interval(supervisor.config.sync_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if let Err(e) = supervisor.synchronizer.sync(&supervisor.trigger_store).await {
                    error!("trigger sync pass failed: {}", e);
                }
            }
        }
    }
}
