use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lease::Exclusion;

/// Server settings, stored as JSON.
///
/// Every field has a default, so a config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub listen_port: u16,
    pub subnet_mask: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub lease_duration_seconds: u32,
    /// How long an unanswered OFFER holds its address. Defaults to the
    /// lease duration.
    pub offer_hold_seconds: Option<u32>,
    pub decline_cooldown_seconds: u32,
    pub sweep_interval_seconds: u32,
    pub renewal_time_seconds: Option<u32>,
    pub rebinding_time_seconds: Option<u32>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub broadcast_address: Option<Ipv4Addr>,
    /// Skip the network and broadcast addresses of the server's subnet.
    pub exclude_subnet_edges: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            listen_port: 67,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 200),
            lease_duration_seconds: 86400,
            offer_hold_seconds: None,
            decline_cooldown_seconds: 3600,
            sweep_interval_seconds: 60,
            renewal_time_seconds: None,
            rebinding_time_seconds: None,
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            domain_name: None,
            broadcast_address: None,
            exclude_subnet_edges: false,
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if self.ip_in_pool(self.server_ip) {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the pool range".to_string(),
            ));
        }

        if let Some(gateway) = self.gateway
            && self.ip_in_pool(gateway)
        {
            return Err(Error::InvalidConfig(
                "gateway must not be within the pool range".to_string(),
            ));
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.offer_hold_seconds == Some(0) {
            return Err(Error::InvalidConfig(
                "offer_hold_seconds must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }

        let t1 = self.renewal_time();
        let t2 = self.rebinding_time();
        if t1.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "renewal time must be greater than 0 (lease duration {}s is too short)",
                self.lease_duration_seconds
            )));
        }
        if t1 >= t2 {
            return Err(Error::InvalidConfig(format!(
                "renewal time ({}s) must be less than rebinding time ({}s)",
                t1.as_secs(),
                t2.as_secs()
            )));
        }
        if t2 >= self.lease_duration() {
            return Err(Error::InvalidConfig(format!(
                "rebinding time ({}s) must be less than lease duration ({}s)",
                t2.as_secs(),
                self.lease_duration_seconds
            )));
        }

        Ok(())
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        ip >= self.pool_start && ip <= self.pool_end
    }

    pub fn pool_size(&self) -> u64 {
        u64::from(u32::from(self.pool_end)).saturating_sub(u64::from(u32::from(self.pool_start))) + 1
    }

    pub fn calculate_broadcast(&self) -> Ipv4Addr {
        if let Some(broadcast) = self.broadcast_address {
            return broadcast;
        }

        let ip = u32::from(self.server_ip);
        let mask = u32::from(self.subnet_mask);
        Ipv4Addr::from(ip | !mask)
    }

    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.server_ip) & u32::from(self.subnet_mask))
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_seconds as u64)
    }

    pub fn offer_hold(&self) -> Duration {
        self.offer_hold_seconds
            .map(|seconds| Duration::from_secs(seconds as u64))
            .unwrap_or_else(|| self.lease_duration())
    }

    pub fn decline_cooldown(&self) -> Duration {
        Duration::from_secs(self.decline_cooldown_seconds as u64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds as u64)
    }

    /// T1, defaulting to half the lease duration (RFC 2131 §4.4.5).
    pub fn renewal_time(&self) -> Duration {
        let seconds = self
            .renewal_time_seconds
            .unwrap_or(self.lease_duration_seconds / 2);
        Duration::from_secs(seconds as u64)
    }

    /// T2, defaulting to 7/8 of the lease duration (RFC 2131 §4.4.5).
    pub fn rebinding_time(&self) -> Duration {
        let seconds = self
            .rebinding_time_seconds
            .unwrap_or((self.lease_duration_seconds as u64 * 7 / 8) as u32);
        Duration::from_secs(seconds as u64)
    }

    /// Returns the allocator exclusion for `exclude_subnet_edges`, if enabled.
    pub fn exclusion_predicate(&self) -> Option<Exclusion> {
        if !self.exclude_subnet_edges {
            return None;
        }

        let network = self.network_address();
        let broadcast = self.calculate_broadcast();
        Some(Arc::new(move |ip: Ipv4Addr| ip == network || ip == broadcast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_start_greater_than_end() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 1, 200),
            pool_end: Ipv4Addr::new(192, 168, 1, 100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_ip_in_pool() {
        let config = Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 150),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let zero_lease = Config {
            lease_duration_seconds: 0,
            ..Default::default()
        };
        assert!(zero_lease.validate().is_err());

        let zero_hold = Config {
            offer_hold_seconds: Some(0),
            ..Default::default()
        };
        assert!(zero_hold.validate().is_err());

        let zero_sweep = Config {
            sweep_interval_seconds: 0,
            ..Default::default()
        };
        assert!(zero_sweep.validate().is_err());
    }

    #[test]
    fn test_timer_ordering() {
        let t1_after_t2 = Config {
            renewal_time_seconds: Some(80000),
            rebinding_time_seconds: Some(40000),
            ..Default::default()
        };
        assert!(t1_after_t2.validate().is_err());

        let t2_past_lease = Config {
            rebinding_time_seconds: Some(86400),
            ..Default::default()
        };
        assert!(t2_past_lease.validate().is_err());

        let explicit = Config {
            renewal_time_seconds: Some(1000),
            rebinding_time_seconds: Some(2000),
            ..Default::default()
        };
        assert!(explicit.validate().is_ok());
    }

    #[test]
    fn test_derived_timers_validated() {
        for seconds in [1, 2] {
            let too_short = Config {
                lease_duration_seconds: seconds,
                ..Default::default()
            };
            assert!(matches!(too_short.validate(), Err(Error::InvalidConfig(_))));
        }

        let shortest = Config {
            lease_duration_seconds: 3,
            ..Default::default()
        };
        assert!(shortest.validate().is_ok());
        assert_eq!(shortest.renewal_time(), Duration::from_secs(1));
        assert_eq!(shortest.rebinding_time(), Duration::from_secs(2));

        let zero_renewal = Config {
            renewal_time_seconds: Some(0),
            ..Default::default()
        };
        assert!(zero_renewal.validate().is_err());
    }

    #[test]
    fn test_derived_timers() {
        let config = Config::default();
        assert_eq!(config.renewal_time(), Duration::from_secs(43200));
        assert_eq!(config.rebinding_time(), Duration::from_secs(75600));
        assert_eq!(config.offer_hold(), config.lease_duration());

        let short_hold = Config {
            offer_hold_seconds: Some(120),
            ..Default::default()
        };
        assert_eq!(short_hold.offer_hold(), Duration::from_secs(120));
    }

    #[test]
    fn test_ip_in_pool() {
        let config = Config::default();
        assert!(config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 150)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 50)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 1, 250)));
    }

    #[test]
    fn test_pool_size() {
        let config = Config::default();
        assert_eq!(config.pool_size(), 101);
    }

    #[test]
    fn test_calculate_broadcast() {
        let config = Config::default();
        assert_eq!(
            config.calculate_broadcast(),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(config.network_address(), Ipv4Addr::new(192, 168, 1, 0));
    }

    #[test]
    fn test_exclusion_predicate() {
        assert!(Config::default().exclusion_predicate().is_none());

        let config = Config {
            exclude_subnet_edges: true,
            ..Default::default()
        };
        let exclusion = config.exclusion_predicate().unwrap();
        assert!(exclusion(Ipv4Addr::new(192, 168, 1, 0)));
        assert!(exclusion(Ipv4Addr::new(192, 168, 1, 255)));
        assert!(!exclusion(Ipv4Addr::new(192, 168, 1, 100)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "pool_start": "10.0.0.10", "pool_end": "10.0.0.20", "server_ip": "10.0.0.1" }"#)
                .unwrap();
        assert_eq!(config.pool_start, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(config.listen_port, 67);
        assert_eq!(config.lease_duration_seconds, 86400);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("ddhcp_config_{}.json", std::process::id()));
        let config = Config {
            domain_name: Some("lan".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load_or_create(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
