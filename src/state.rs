use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Whole-degree bounds of the crawl area, inclusive on every side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub south: i32,
    pub north: i32,
    pub west: i32,
    pub east: i32,
}

impl Region {
    pub fn new(south: i32, north: i32, west: i32, east: i32) -> Result<Self> {
        if south > north {
            bail!("region south ({}) is north of region north ({})", south, north);
        }
        if west > east {
            bail!("region west ({}) is east of region east ({})", west, east);
        }
        if !(-90..=89).contains(&south) || !(-90..=89).contains(&north) {
            bail!("region latitudes must lie within -90..=89");
        }
        if !(-180..=179).contains(&west) || !(-180..=179).contains(&east) {
            bail!("region longitudes must lie within -180..=179");
        }
        Ok(Self {
            south,
            north,
            west,
            east,
        })
    }

    /// Number of coarse cells the region expands to.
    pub fn cell_count(&self) -> usize {
        ((self.north - self.south + 1) * (self.east - self.west + 1)) as usize
    }
}

impl Default for Region {
    /// Mainland UK plus Northern Ireland and the islands.
    fn default() -> Self {
        Self {
            south: 49,
            north: 60,
            west: -8,
            east: 2,
        }
    }
}

/// Shared request policy for every HTTP collaborator.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    pub retry_times: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            retry_times: 3,
            retry_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for the charge-point location crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub api_base: String,
    pub auth_url: String,
    pub region: Region,
    /// ISO country code a location must carry to be kept.
    pub target_country: String,
    /// Output of this run and resumption state of the next.
    pub output_path: PathBuf,
    pub max_in_flight: usize,
    pub http: HttpPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.zap-map.io".to_string(),
            auth_url: "https://auth.zap-map.com/guest/token".to_string(),
            region: Region::default(),
            target_country: "GB".to_string(),
            output_path: PathBuf::from("locations.jl"),
            max_in_flight: 16,
            http: HttpPolicy::default(),
        }
    }
}

impl CrawlConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let region = Region::new(
            env_or("REGION_SOUTH", defaults.region.south)?,
            env_or("REGION_NORTH", defaults.region.north)?,
            env_or("REGION_WEST", defaults.region.west)?,
            env_or("REGION_EAST", defaults.region.east)?,
        )?;
        let max_in_flight: usize = env_or("CRAWL_CONCURRENCY", defaults.max_in_flight)?;
        if max_in_flight == 0 {
            bail!("CRAWL_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            api_base: env_or("DIRECTORY_API_BASE", defaults.api_base)?,
            auth_url: env_or("DIRECTORY_AUTH_URL", defaults.auth_url)?,
            region,
            target_country: env_or("TARGET_COUNTRY", defaults.target_country)?,
            output_path: env_or("LOCATIONS_OUTPUT", defaults.output_path)?,
            max_in_flight,
            http: HttpPolicy::from_env()?,
        })
    }
}

impl HttpPolicy {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            retry_times: env_or("RETRY_TIMES", defaults.retry_times)?,
            retry_backoff: Duration::from_millis(env_or(
                "RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

/// Settings for the secondary host-registry crawl.
#[derive(Debug, Clone)]
pub struct HostsConfig {
    pub api_base: String,
    pub output_path: PathBuf,
    pub limit: u32,
    /// `.env` file a freshly issued login token is written back to.
    pub env_file: PathBuf,
    pub http: HttpPolicy,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.co-charger.com".to_string(),
            output_path: PathBuf::from("hosts.jl"),
            limit: 1000,
            env_file: PathBuf::from(".env"),
            http: HttpPolicy::default(),
        }
    }
}

impl HostsConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_base: env_or("HOSTS_API_BASE", defaults.api_base)?,
            output_path: env_or("HOSTS_OUTPUT", defaults.output_path)?,
            limit: env_or("HOSTS_LIMIT", defaults.limit)?,
            env_file: env_or("ENV_FILE", defaults.env_file)?,
            http: HttpPolicy::from_env()?,
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
/// A value that is set but does not parse is a configuration error.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match dotenv::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {}={:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region_is_uk() {
        let region = Region::default();
        assert_eq!((region.south, region.north), (49, 60));
        assert_eq!((region.west, region.east), (-8, 2));
        assert_eq!(region.cell_count(), 12 * 11);
    }

    #[test]
    fn test_region_rejects_inverted_bounds() {
        assert!(Region::new(50, 49, 0, 1).is_err());
        assert!(Region::new(49, 50, 1, 0).is_err());
        assert!(Region::new(49, 49, -1, -1).is_ok());
    }

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let value: u32 = env_or("CHARGEPOINT_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("CHARGEPOINT_TEST_BAD_NUMBER", "twelve");
        let result: Result<u32> = env_or("CHARGEPOINT_TEST_BAD_NUMBER", 7);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_or_parses_signed() {
        std::env::set_var("CHARGEPOINT_TEST_SIGNED", " -3 ");
        let value: i32 = env_or("CHARGEPOINT_TEST_SIGNED", 0).unwrap();
        assert_eq!(value, -3);
    }
}
