use log::{error, info, warn};

use crate::ports::NetworkLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCheck {
    Connected,
    Disconnected,
    /// Reconnect attempts are exhausted; reported once per outage.
    RestartRequired,
}

/// Tracks consecutive failed reconnect attempts and escalates to a device
/// restart after `restart_threshold` of them.
#[derive(Debug, Clone)]
pub struct ConnectivitySupervisor {
    restart_threshold: u32,
    reconnect_interval_ms: u64,
    consecutive_failures: u32,
    last_attempt_ms: Option<u64>,
    restart_issued: bool,
    connected: bool,
}

impl ConnectivitySupervisor {
    pub fn new(restart_threshold: u32, reconnect_interval_ms: u64) -> Self {
        Self {
            restart_threshold,
            reconnect_interval_ms,
            consecutive_failures: 0,
            last_attempt_ms: None,
            restart_issued: false,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn check<L: NetworkLink + ?Sized>(&mut self, link: &mut L, now_ms: u64) -> LinkCheck {
        if link.is_connected() {
            if !self.connected {
                info!(
                    "network up (after {} failed attempts)",
                    self.consecutive_failures
                );
            }
            self.connected = true;
            self.consecutive_failures = 0;
            self.last_attempt_ms = None;
            self.restart_issued = false;
            return LinkCheck::Connected;
        }

        if self.connected {
            warn!("network connection lost");
            self.connected = false;
        }

        let due = self
            .last_attempt_ms
            .map(|last| now_ms.saturating_sub(last) >= self.reconnect_interval_ms)
            .unwrap_or(true);
        if !due || self.restart_issued {
            return LinkCheck::Disconnected;
        }

        self.last_attempt_ms = Some(now_ms);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures > self.restart_threshold {
            error!(
                "network still down after {} attempts; restarting device",
                self.restart_threshold
            );
            self.restart_issued = true;
            return LinkCheck::RestartRequired;
        }

        warn!(
            "network down; reconnect attempt {}/{}",
            self.consecutive_failures, self.restart_threshold
        );
        link.reconnect();
        LinkCheck::Disconnected
    }
}
