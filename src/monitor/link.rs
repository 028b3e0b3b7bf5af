//! Serial link liveness.
//!
//! A two-state machine fed by periodic presence checks and by transport errors from the
//! reader. Alerts are cooldown-gated and capped so a link that stays down produces one
//! "disconnected" alert plus a bounded number of reminders.

use crate::config::LinkHealthConfig;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Device present
    Connected,
    /// Device missing or failing
    Disconnected,
}

/// Notification the monitor wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAlert {
    /// The link just went down
    Disconnected,
    /// The link is still down; `attempt` counts reminders from 1
    StillDisconnected {
        /// Reminder number
        attempt: u32,
    },
}

impl LinkAlert {
    /// Subject line of the alert.
    pub fn subject(&self) -> String {
        match self {
            LinkAlert::Disconnected => "Gateway serial link disconnected".to_string(),
            LinkAlert::StillDisconnected { attempt } => {
                format!("Gateway serial link still disconnected (reminder {attempt})")
            }
        }
    }
}

impl fmt::Display for LinkAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject())
    }
}

/// Connected/Disconnected state machine with cooldown and escalation cap.
#[derive(Debug, Clone)]
pub struct LinkHealthMonitor {
    cooldown: Duration,
    escalation_cap: u32,
    state: LinkState,
    last_alert: Option<Instant>,
    escalations: u32,
}

impl LinkHealthMonitor {
    /// Monitor starting in [`LinkState::Connected`].
    pub fn new(config: &LinkHealthConfig) -> Self {
        Self {
            cooldown: config.cooldown,
            escalation_cap: config.escalation_cap,
            state: LinkState::Connected,
            last_alert: None,
            escalations: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Reminders sent since the link went down.
    pub fn escalations(&self) -> u32 {
        self.escalations
    }

    fn cooled_down(&self, now: Instant) -> bool {
        self.last_alert
            .map_or(true, |at| now.saturating_duration_since(at) >= self.cooldown)
    }

    /// Feed one presence check.
    pub fn observe(&mut self, present: bool, now: Instant) -> Option<LinkAlert> {
        match (self.state, present) {
            (LinkState::Connected, true) => None,
            (LinkState::Connected, false) => {
                self.state = LinkState::Disconnected;
                self.escalations = 0;
                tracing::warn!("Serial link lost");
                if !self.cooled_down(now) {
                    return None;
                }
                self.last_alert = Some(now);
                Some(LinkAlert::Disconnected)
            }
            (LinkState::Disconnected, false) => {
                if self.escalations >= self.escalation_cap || !self.cooled_down(now) {
                    return None;
                }
                self.escalations += 1;
                self.last_alert = Some(now);
                Some(LinkAlert::StillDisconnected {
                    attempt: self.escalations,
                })
            }
            (LinkState::Disconnected, true) => {
                tracing::info!("Serial link restored");
                self.state = LinkState::Connected;
                self.escalations = 0;
                self.last_alert = None;
                None
            }
        }
    }

    /// A transport error counts as a failed presence check.
    pub fn transport_error(&mut self, now: Instant) -> Option<LinkAlert> {
        self.observe(false, now)
    }
}

/// Whether the serial device node exists.
pub fn link_present(device: &Path) -> bool {
    device.exists()
}
