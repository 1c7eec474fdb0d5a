//! Per-kind time budgets for remote calls.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::types::HandlerKind;

/// Millisecond budgets for every blocking remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeTimeouts {
    /// Packet dispatch. High frequency, so kept short.
    pub packet_ms: u64,
    /// Other fire-and-forget dispatches (lifecycle, join/leave, frame exit).
    pub notify_ms: u64,
    pub chat_ms: u64,
    pub broadcast_ms: u64,
    /// Console commands are interactive and may do real work.
    pub console_ms: u64,
    /// Ordinary extension-to-host calls (log, query, register).
    pub rpc_ms: u64,
    /// The extension's own `init`, including every registration it makes.
    pub init_ms: u64,
    /// Added on the caller side to a wait's own timeout so the host's expiry wins.
    pub wait_grace_ms: u64,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            packet_ms: 2_000,
            notify_ms: 5_000,
            chat_ms: 5_000,
            broadcast_ms: 10_000,
            console_ms: 30_000,
            rpc_ms: 10_000,
            init_ms: 30_000,
            wait_grace_ms: 2_000,
        }
    }
}

impl BridgeTimeouts {
    pub fn for_kind(&self, kind: &HandlerKind) -> Duration {
        let ms = match kind {
            HandlerKind::Packet | HandlerKind::PacketAny => self.packet_ms,
            HandlerKind::Chat => self.chat_ms,
            HandlerKind::Broadcast { .. } => self.broadcast_ms,
            HandlerKind::ConsoleCommand => self.console_ms,
            _ => self.notify_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn rpc(&self) -> Duration {
        Duration::from_millis(self.rpc_ms)
    }

    pub fn init(&self) -> Duration {
        Duration::from_millis(self.init_ms)
    }

    /// Caller-side budget for a wait the host bounds at `wait`. Saturates
    /// rather than overflowing for unbounded waits.
    pub fn wait_budget(&self, wait: Duration) -> Duration {
        wait.saturating_add(Duration::from_millis(self.wait_grace_ms))
    }

    /// Caller-side budget for a broadcast. The host runs each remote listener
    /// under its own `broadcast_ms`, so the whole fan-out gets the grace on top.
    pub fn broadcast_budget(&self) -> Duration {
        Duration::from_millis(self.broadcast_ms.saturating_add(self.wait_grace_ms))
    }

    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("packet_ms", self.packet_ms),
            ("notify_ms", self.notify_ms),
            ("chat_ms", self.chat_ms),
            ("broadcast_ms", self.broadcast_ms),
            ("console_ms", self.console_ms),
            ("rpc_ms", self.rpc_ms),
            ("init_ms", self.init_ms),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(format!("timeouts.{} must be greater than 0", name));
            }
        }
        Ok(())
    }
}

/// Run `fut` under `budget`, turning expiry into [`BridgeError::Timeout`].
///
/// Dropping the future on expiry releases whatever it held.
pub async fn with_timeout<T, F>(budget: Duration, operation: &str, fut: F) -> BridgeResult<T>
where
    F: Future<Output = BridgeResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout(format!(
            "{} after {}ms",
            operation,
            budget.as_millis()
        ))),
    }
}
