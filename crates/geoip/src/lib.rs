use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use embargo_common::{GeoIpConfig, StaticRangeConfig};
use ipnet::IpNet;
use tracing::{debug, info, warn};

/// Minimal struct for deserializing the country ISO code from MaxMind DB.
#[derive(serde::Deserialize)]
struct CountryRecord {
    country: Option<CountryInfo>,
}

#[derive(serde::Deserialize)]
struct CountryInfo {
    iso_code: Option<String>,
}

/// A network pinned to a country, checked before the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRange {
    pub network: IpNet,
    pub country: String,
}

impl StaticRange {
    pub fn new(network: IpNet, country: &str) -> Self {
        Self {
            network: network.trunc(),
            country: country.to_ascii_uppercase(),
        }
    }

    fn from_config(config: &StaticRangeConfig) -> anyhow::Result<Self> {
        let network = match config.network.parse::<IpNet>() {
            Ok(net) => net,
            Err(_) => {
                let addr: IpAddr = config.network.parse().map_err(|_| {
                    anyhow::anyhow!("invalid static range network '{}'", config.network)
                })?;
                let host_prefix = if addr.is_ipv4() { 32 } else { 128 };
                IpNet::new(addr, host_prefix)?
            }
        };
        Ok(Self::new(network, &config.country))
    }
}

/// Resolves client addresses to ISO 3166-1 alpha-2 country codes.
///
/// Static ranges win over the MaxMind database; among static ranges the
/// longest prefix wins. Both sources can be swapped at runtime without
/// blocking lookups.
pub struct GeoIpResolver {
    reader: ArcSwap<Option<maxminddb::Reader<Vec<u8>>>>,
    static_ranges: ArcSwap<Vec<StaticRange>>,
}

impl GeoIpResolver {
    /// Create a resolver from config, opening `database_path` if set.
    pub fn new(config: &GeoIpConfig) -> anyhow::Result<Self> {
        let reader = if let Some(ref path) = config.database_path {
            match maxminddb::Reader::open_readfile(path) {
                Ok(r) => {
                    info!(path = %path.display(), "loaded GeoIP database");
                    Some(r)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to open GeoIP database");
                    return Err(anyhow::anyhow!(
                        "failed to open GeoIP database {}: {}",
                        path.display(),
                        e
                    ));
                }
            }
        } else {
            None
        };

        let ranges = config
            .static_ranges
            .iter()
            .map(StaticRange::from_config)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let resolver = Self {
            reader: ArcSwap::from_pointee(reader),
            static_ranges: ArcSwap::from_pointee(Vec::new()),
        };
        resolver.set_static_ranges(ranges);
        Ok(resolver)
    }

    /// Create a resolver with no sources; every lookup is unknown.
    pub fn new_empty() -> Self {
        Self {
            reader: ArcSwap::from_pointee(None),
            static_ranges: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Look up the upper-case country code for an address.
    ///
    /// IPv4-mapped IPv6 addresses are looked up as IPv4.
    pub fn lookup_country(&self, addr: IpAddr) -> Option<String> {
        let addr = addr.to_canonical();
        if let Some(country) = self.lookup_static(addr) {
            return Some(country);
        }

        let guard = self.reader.load();
        let reader = guard.as_ref().as_ref()?;

        match reader.lookup::<CountryRecord>(addr) {
            Ok(record) => record
                .country
                .and_then(|c| c.iso_code)
                .map(|code| code.to_ascii_uppercase()),
            Err(e) => {
                debug!(addr = %addr, error = %e, "GeoIP lookup failed");
                None
            }
        }
    }

    /// Whether a MaxMind database is loaded.
    pub fn has_database(&self) -> bool {
        self.reader.load().is_some()
    }

    fn lookup_static(&self, addr: IpAddr) -> Option<String> {
        // Ranges are kept sorted by descending prefix length.
        self.static_ranges
            .load()
            .iter()
            .find(|range| range.network.contains(&addr))
            .map(|range| range.country.clone())
    }

    /// Replace the static ranges.
    pub fn set_static_ranges(&self, mut ranges: Vec<StaticRange>) {
        ranges.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        debug!(count = ranges.len(), "installed static GeoIP ranges");
        self.static_ranges.store(Arc::new(ranges));
    }

    pub fn static_ranges(&self) -> Vec<StaticRange> {
        self.static_ranges.load().as_ref().clone()
    }

    /// Hot-reload the MaxMind database from a new path.
    pub fn reload(&self, path: &Path) -> anyhow::Result<()> {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|e| {
            anyhow::anyhow!("failed to reload GeoIP database {}: {}", path.display(), e)
        })?;
        self.reader.store(Arc::new(Some(reader)));
        info!(path = %path.display(), "reloaded GeoIP database");
        Ok(())
    }
}

impl Default for GeoIpResolver {
    fn default() -> Self {
        Self::new_empty()
    }
}
