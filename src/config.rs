//! Process-wide configuration
//!
//! One [`CoreConfig`] value is constructed at process startup and passed by
//! reference to every component that needs it: registry client and server,
//! transport channels, control servers. Nothing in this crate reads ambient
//! global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channel::Endpoint;
use crate::registry::DEFAULT_REGISTRY_PORT;

/// Configuration for the benchlink control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Fixed bootstrap endpoint of the registry server. The registry cannot
    /// be discovered through itself, so this is configuration.
    pub registry: Endpoint,

    /// Lease ttl applied to registrations that do not specify their own
    pub default_ttl: Duration,

    /// Interval between lease renewals; `None` means a third of the ttl
    pub renewal_interval: Option<Duration>,

    /// Interval between eviction sweeps on the registry server. Must be
    /// shorter than the smallest ttl in use.
    pub sweep_interval: Duration,

    /// Deadline for establishing a transport connection
    pub connect_timeout: Duration,

    /// Default deadline for a request/reply round-trip
    pub request_timeout: Duration,

    /// Host name or address under which this process registers itself
    pub advertised_host: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            registry: Endpoint::new("127.0.0.1", DEFAULT_REGISTRY_PORT),
            default_ttl: Duration::from_secs(30),
            renewal_interval: None,
            sweep_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            advertised_host: "127.0.0.1".to_string(),
        }
    }
}

impl CoreConfig {
    /// The channel timeouts derived from this configuration.
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            connect: self.connect_timeout,
            request: self.request_timeout,
        }
    }

    /// The effective renewal interval for a lease with the given ttl.
    ///
    /// Defaults to a third of the ttl so two renewals can be lost before the
    /// lease expires, with a floor of one second.
    pub fn renewal_interval_for(&self, ttl: Duration) -> Duration {
        self.renewal_interval
            .unwrap_or_else(|| (ttl / 3).max(Duration::from_secs(1)))
    }
}

/// Connect and request deadlines handed to transport channels
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Deadline for establishing a connection
    pub connect: Duration,
    /// Default deadline for a request/reply round-trip
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        CoreConfig::default().timeouts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_interval_defaults_to_third_of_ttl() {
        let config = CoreConfig::default();
        assert_eq!(
            config.renewal_interval_for(Duration::from_secs(30)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn renewal_interval_has_a_floor() {
        let config = CoreConfig::default();
        assert_eq!(
            config.renewal_interval_for(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn explicit_renewal_interval_wins() {
        let config = CoreConfig {
            renewal_interval: Some(Duration::from_millis(250)),
            ..CoreConfig::default()
        };
        assert_eq!(
            config.renewal_interval_for(Duration::from_secs(30)),
            Duration::from_millis(250)
        );
    }
}
