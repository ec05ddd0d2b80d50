use crate::error::{Error, Result};
use std::{net::SocketAddr, time::Duration};
use tracing::warn;

/// Runtime options for a cohort node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local UDP bind address; forms the node's identity.
    pub bind_addr: SocketAddr,
    /// Cadence of the failure-detection period.
    pub period_timeout: Duration,
    /// Wait before a direct probe escalates to indirect probing.
    /// Must be shorter than `period_timeout`.
    pub ping_timeout: Duration,
    /// Number of helpers asked to probe on the local node's behalf.
    pub ping_request_group_size: usize,
    /// Delay from a suspect transition to the automatic dead claim.
    pub suspect_timeout: Duration,
    /// Bound on the gossip event queue; older events are evicted
    /// under pressure.
    pub event_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let period_timeout = Duration::from_secs(1);

        Self {
            bind_addr: "0.0.0.0:7946".parse().expect("valid default bind address"),
            period_timeout,
            ping_timeout: Duration::from_millis(200),
            ping_request_group_size: 3,
            suspect_timeout: period_timeout * 8,
            event_queue_capacity: 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.period_timeout.is_zero()
            || self.ping_timeout.is_zero()
            || self.suspect_timeout.is_zero()
        {
            return Err(Error::new_config(None));
        }

        if self.event_queue_capacity == 0 {
            return Err(Error::new_config(None));
        }

        if self.ping_timeout >= self.period_timeout {
            // Indirect probing never runs in this configuration; detection
            // degrades to direct-only.
            warn!(
                message = "ping timeout does not fit within the protocol period",
                ping_timeout = ?self.ping_timeout,
                period_timeout = ?self.period_timeout,
            );
        }

        Ok(())
    }
}
