//! Configuration
//!
//! Typed settings with defaults matching the reference game, overridable
//! through `ZONE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::game::zone::ZoneConfig;
use crate::{ACTIVE_ROUND_WINDOW_SECS, ROUND_DURATION_SECS};

/// Round timing and zone settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Play time before the zone is revealed.
    pub round_duration: Duration,
    /// How long after its start a round blocks a new one.
    pub active_window: Duration,
    /// Hold between reveal and finish (zero finishes in the same tick).
    pub finish_delay: Duration,
    /// Zone generation.
    pub zone: ZoneConfig,
    /// Base seed for zone draws; random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(ROUND_DURATION_SECS),
            active_window: Duration::from_secs(ACTIVE_ROUND_WINDOW_SECS),
            finish_delay: Duration::ZERO,
            zone: ZoneConfig::default(),
            rng_seed: None,
        }
    }
}

impl CoordinatorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let radius_km = parse_var(&lookup, "ZONE_RADIUS_KM")
            .filter(|r: &f64| {
                let ok = r.is_finite() && *r > 0.0;
                if !ok {
                    warn!("ZONE_RADIUS_KM must be positive, using default");
                }
                ok
            })
            .unwrap_or(defaults.zone.radius_km);

        Self {
            round_duration: parse_secs(&lookup, "ZONE_ROUND_DURATION_SECS")
                .unwrap_or(defaults.round_duration),
            active_window: parse_secs(&lookup, "ZONE_ACTIVE_WINDOW_SECS")
                .unwrap_or(defaults.active_window),
            finish_delay: parse_secs(&lookup, "ZONE_FINISH_DELAY_SECS")
                .unwrap_or(defaults.finish_delay),
            zone: ZoneConfig { radius_km },
            rng_seed: parse_var(&lookup, "ZONE_RNG_SEED"),
        }
    }
}

/// Network server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long.
    pub idle_timeout: Duration,
    /// How often the round timer fires.
    pub tick_interval: Duration,
    /// Snapshot file. Rewritten after every committed change and on shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            tick_interval: Duration::from_millis(500),
            snapshot_path: None,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            bind_addr: parse_var(&lookup, "ZONE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: parse_var(&lookup, "ZONE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            idle_timeout: parse_secs(&lookup, "ZONE_IDLE_TIMEOUT_SECS")
                .unwrap_or(defaults.idle_timeout),
            tick_interval: parse_var(&lookup, "ZONE_TICK_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            snapshot_path: lookup("ZONE_SNAPSHOT_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var::<u64, F>(lookup, key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_coordinator_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[]));
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.round_duration, Duration::from_secs(60));
        assert_eq!(config.active_window, Duration::from_secs(70));
        assert_eq!(config.zone.radius_km, 6000.0);
        assert_eq!(config.rng_seed, None);
    }

    #[test]
    fn test_coordinator_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("ZONE_ROUND_DURATION_SECS", "30"),
            ("ZONE_ACTIVE_WINDOW_SECS", "45"),
            ("ZONE_FINISH_DELAY_SECS", "5"),
            ("ZONE_RADIUS_KM", "1500.5"),
            ("ZONE_RNG_SEED", "99"),
        ]));
        assert_eq!(config.round_duration, Duration::from_secs(30));
        assert_eq!(config.active_window, Duration::from_secs(45));
        assert_eq!(config.finish_delay, Duration::from_secs(5));
        assert_eq!(config.zone.radius_km, 1500.5);
        assert_eq!(config.rng_seed, Some(99));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("ZONE_ROUND_DURATION_SECS", "soon"),
            ("ZONE_RADIUS_KM", "-10"),
        ]));
        assert_eq!(config.round_duration, Duration::from_secs(60));
        assert_eq!(config.zone.radius_km, 6000.0);
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("ZONE_BIND_ADDR", "127.0.0.1:9000"),
            ("ZONE_TICK_INTERVAL_MS", "250"),
            ("ZONE_SNAPSHOT_PATH", "/tmp/rounds.bin"),
        ]));
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/rounds.bin")));
        assert_eq!(config.max_connections, 1000);
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = ServerConfig::from_lookup(lookup(&[("ZONE_TICK_INTERVAL_MS", "0")]));
        assert_eq!(config.tick_interval, Duration::from_millis(500));
    }
}
