//! Liveness monitor
//!
//! Two independent timers, started with the server and stopped with it:
//!
//! - **Heartbeat**: every `heartbeat_interval`, a `heartbeat` control message
//!   goes to every viewer. A failed heartbeat is logged and counted but does
//!   not evict; delivery success refreshes the viewer's activity.
//! - **Sweep**: every `sweep_interval`, viewers idle for longer than
//!   `idle_timeout` are closed (normal closure) and removed. The sweep is the
//!   only liveness-based eviction on the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::protocol::{encode_json, unix_millis, Heartbeat, ServerMessage};
use crate::registry::{CloseReason, Outbound, SessionRegistry};
use crate::stats::ServerStats;

use super::config::ServerConfig;

/// Result of one heartbeat round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Viewers that accepted the heartbeat
    pub sent: usize,
    /// Viewers the heartbeat could not reach
    pub failed: usize,
}

/// Heartbeat emission and stale-session eviction
pub struct LivenessMonitor {
    registry: Arc<SessionRegistry>,
    stats: Arc<ServerStats>,
    heartbeat_interval: Duration,
    sweep_interval: Duration,
    idle_timeout: Duration,
    send_timeout: Duration,
}

impl LivenessMonitor {
    /// Create a monitor using the intervals from `config`
    pub fn new(
        registry: Arc<SessionRegistry>,
        stats: Arc<ServerStats>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            stats,
            heartbeat_interval: config.heartbeat_interval,
            sweep_interval: config.sweep_interval,
            idle_timeout: config.idle_timeout,
            send_timeout: config.send_timeout,
        }
    }

    /// Send one heartbeat to every viewer
    pub async fn emit_heartbeats(&self) -> HeartbeatOutcome {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            return HeartbeatOutcome::default();
        }

        let message = ServerMessage::Heartbeat(Heartbeat {
            timestamp: unix_millis(),
            client_count: sessions.len(),
        });
        let text = match encode_json(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode heartbeat");
                return HeartbeatOutcome::default();
            }
        };

        let mut sends = JoinSet::new();
        for session in sessions {
            let message = Outbound::Text(text.clone());
            let timeout = self.send_timeout;
            sends.spawn(async move {
                let result = tokio::time::timeout(timeout, session.send(message)).await;
                (session, result)
            });
        }

        let mut outcome = HeartbeatOutcome::default();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((session, Ok(Ok(())))) => {
                    session.touch();
                    outcome.sent += 1;
                }
                Ok((session, Ok(Err(e)))) => {
                    outcome.failed += 1;
                    tracing::warn!(session_id = %session.id(), error = %e, "Heartbeat send failed");
                }
                Ok((session, Err(_))) => {
                    outcome.failed += 1;
                    tracing::warn!(session_id = %session.id(), "Heartbeat send timed out");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Heartbeat task failed");
                }
            }
        }

        ServerStats::add(&self.stats.heartbeat_failures, outcome.failed as u64);
        tracing::trace!(sent = outcome.sent, failed = outcome.failed, "Heartbeat round complete");

        outcome
    }

    /// Evict every viewer idle for longer than the idle timeout as of `now`
    ///
    /// Returns the number of viewers evicted.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;

        for session in self.registry.snapshot().await {
            let idle = session.idle_for(now);
            if idle <= self.idle_timeout {
                continue;
            }

            if self.registry.remove(session.id()).await.is_none() {
                continue;
            }

            evicted += 1;
            tracing::info!(
                session_id = %session.id(),
                idle_secs = idle.as_secs(),
                "Idle viewer evicted"
            );

            let timeout = self.send_timeout;
            tokio::spawn(async move {
                let _ = tokio::time::timeout(timeout, session.close(CloseReason::Normal)).await;
            });
        }

        if evicted > 0 {
            ServerStats::add(&self.stats.idle_evictions, evicted as u64);
        }
        let clients = self.registry.len().await;
        tracing::debug!(evicted, clients, "Sweep complete");

        evicted
    }

    /// Start both timers
    ///
    /// The first heartbeat and sweep happen one interval after the start.
    pub fn spawn(self: &Arc<Self>) -> LivenessHandle {
        let monitor = Arc::clone(self);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = ticker(monitor.heartbeat_interval);
            loop {
                ticker.tick().await;
                monitor.emit_heartbeats().await;
            }
        });

        let monitor = Arc::clone(self);
        let sweep = tokio::spawn(async move {
            let mut ticker = ticker(monitor.sweep_interval);
            loop {
                let now = ticker.tick().await;
                monitor.sweep(now).await;
            }
        });

        LivenessHandle { heartbeat, sweep }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Running liveness timers; dropping the handle stops them
#[derive(Debug)]
pub struct LivenessHandle {
    heartbeat: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl LivenessHandle {
    /// Stop both timers
    pub fn stop(&self) {
        self.heartbeat.abort();
        self.sweep.abort();
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
