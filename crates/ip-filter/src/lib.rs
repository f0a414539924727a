mod trie;

use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use embargo_common::{EmbargoError, EmbargoResult, IpFilterConfig};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use crate::trie::NetworkTrie;

/// Outcome of checking an address against the current IP filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVerdict {
    /// The address matches the blacklist of an enabled filter.
    Blacklisted,
    /// The address matches the whitelist of an enabled filter.
    Whitelisted,
    /// The filter is disabled or the address is on neither list.
    Unlisted,
}

/// One saved IP filter configuration.
///
/// Records are never edited in place; saving a change appends a new record
/// and the newest one is the active filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilter {
    pub id: u64,
    pub whitelist: String,
    pub blacklist: String,
    pub enabled: bool,
    pub changed_by: Option<String>,
    pub change_date: DateTime<Utc>,
}

/// Fields supplied when saving a new IP filter record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpFilterUpdate {
    #[serde(default)]
    pub whitelist: String,
    #[serde(default)]
    pub blacklist: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub changed_by: Option<String>,
}

impl From<&IpFilterConfig> for IpFilterUpdate {
    fn from(config: &IpFilterConfig) -> Self {
        Self {
            whitelist: config.whitelist.clone(),
            blacklist: config.blacklist.clone(),
            enabled: config.enabled,
            changed_by: Some("config".to_string()),
        }
    }
}

/// Parse one list entry: a CIDR network or a bare address.
pub fn parse_entry(entry: &str) -> EmbargoResult<IpNet> {
    if let Ok(network) = entry.parse::<IpNet>() {
        return Ok(network);
    }
    let invalid = || EmbargoError::InvalidIpEntry(entry.to_string());
    let addr = entry.parse::<IpAddr>().map_err(|_| invalid())?;
    let host_prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNet::new(addr, host_prefix).map_err(|_| invalid())
}

/// Split a comma separated list into trimmed, non-empty entries.
fn split_entries(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|e| !e.is_empty())
}

/// Strictly parse a comma separated list; the first bad entry is an error.
pub fn parse_list(list: &str) -> EmbargoResult<Vec<IpNet>> {
    split_entries(list).map(parse_entry).collect()
}

/// A parsed address list ready for membership checks.
pub struct IpNetworkList {
    networks: Vec<IpNet>,
    trie: NetworkTrie,
}

impl IpNetworkList {
    /// Build a list from parsed networks. Duplicates are dropped.
    pub fn from_networks(parsed: Vec<IpNet>) -> Self {
        let mut networks = Vec::with_capacity(parsed.len());
        let mut trie = NetworkTrie::new();
        for network in parsed {
            if trie.insert(network) {
                networks.push(network);
            }
        }
        Self { networks, trie }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.trie.contains(addr)
    }

    pub fn networks(&self) -> &[IpNet] {
        &self.networks
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

/// The active filter record with its lists compiled into tries.
pub struct ActiveIpFilter {
    record: Option<IpFilter>,
    whitelist: IpNetworkList,
    blacklist: IpNetworkList,
}

impl ActiveIpFilter {
    fn empty() -> Self {
        Self {
            record: None,
            whitelist: IpNetworkList::from_networks(Vec::new()),
            blacklist: IpNetworkList::from_networks(Vec::new()),
        }
    }

    fn compile(record: IpFilter, whitelist: Vec<IpNet>, blacklist: Vec<IpNet>) -> Self {
        Self {
            whitelist: IpNetworkList::from_networks(whitelist),
            blacklist: IpNetworkList::from_networks(blacklist),
            record: Some(record),
        }
    }

    /// The saved record, or `None` if nothing has been saved yet.
    pub fn record(&self) -> Option<&IpFilter> {
        self.record.as_ref()
    }

    pub fn enabled(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.enabled)
    }

    pub fn whitelist_ips(&self) -> &IpNetworkList {
        &self.whitelist
    }

    pub fn blacklist_ips(&self) -> &IpNetworkList {
        &self.blacklist
    }

    /// Check an address. The blacklist is consulted before the whitelist,
    /// so an address on both lists is blacklisted. IPv4-mapped IPv6
    /// addresses match IPv4 entries.
    pub fn check(&self, addr: IpAddr) -> IpVerdict {
        let addr = addr.to_canonical();
        if !self.enabled() {
            IpVerdict::Unlisted
        } else if self.blacklist.contains(addr) {
            IpVerdict::Blacklisted
        } else if self.whitelist.contains(addr) {
            IpVerdict::Whitelisted
        } else {
            IpVerdict::Unlisted
        }
    }
}

/// Append-only store of IP filter records.
///
/// The newest record is compiled once and published through `ArcSwap`, so
/// request-path lookups never take a lock.
pub struct IpFilterStore {
    current: ArcSwap<ActiveIpFilter>,
    history: RwLock<Vec<IpFilter>>,
}

impl IpFilterStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ActiveIpFilter::empty()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Validate and save a new record, making it the active filter.
    pub fn create(&self, update: IpFilterUpdate) -> EmbargoResult<IpFilter> {
        let whitelist = parse_list(&update.whitelist)?;
        let blacklist = parse_list(&update.blacklist)?;

        let mut history = self.history.write().expect("ip filter history lock poisoned");
        let record = IpFilter {
            id: history.last().map_or(1, |r| r.id + 1),
            whitelist: update.whitelist,
            blacklist: update.blacklist,
            enabled: update.enabled,
            changed_by: update.changed_by,
            change_date: Utc::now(),
        };
        history.push(record.clone());

        let active = ActiveIpFilter::compile(record.clone(), whitelist, blacklist);
        info!(
            id = record.id,
            enabled = record.enabled,
            whitelist = active.whitelist.len(),
            blacklist = active.blacklist.len(),
            "saved IP filter"
        );
        self.current.store(Arc::new(active));

        Ok(record)
    }

    /// The active filter.
    pub fn current(&self) -> Arc<ActiveIpFilter> {
        self.current.load_full()
    }

    pub fn check(&self, addr: IpAddr) -> IpVerdict {
        self.current.load().check(addr)
    }

    /// All saved records, oldest first.
    pub fn history(&self) -> Vec<IpFilter> {
        self.history
            .read()
            .expect("ip filter history lock poisoned")
            .clone()
    }
}

impl Default for IpFilterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(blacklist: &str, whitelist: &str, enabled: bool) -> IpFilterUpdate {
        IpFilterUpdate {
            whitelist: whitelist.to_string(),
            blacklist: blacklist.to_string(),
            enabled,
            changed_by: None,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_filter_is_disabled() {
        let store = IpFilterStore::new();
        assert!(store.current().record().is_none());
        assert!(!store.current().enabled());
        assert_eq!(store.check(ip("10.0.0.1")), IpVerdict::Unlisted);
    }

    #[test]
    fn test_literal_and_cidr_blacklist() {
        let store = IpFilterStore::new();
        store
            .create(update("127.0.0.0/32, 173.194.0.0/16", "", true))
            .unwrap();

        assert_eq!(store.check(ip("173.194.123.35")), IpVerdict::Blacklisted);
        assert_eq!(store.check(ip("127.0.0.0")), IpVerdict::Blacklisted);
        assert_eq!(store.check(ip("173.195.10.20")), IpVerdict::Unlisted);
    }

    #[test]
    fn test_blacklist_wins_over_whitelist() {
        let store = IpFilterStore::new();
        store
            .create(update("173.194.0.0/16", "173.194.0.0/16", true))
            .unwrap();
        assert_eq!(store.check(ip("173.194.123.35")), IpVerdict::Blacklisted);
    }

    #[test]
    fn test_whitelist_only() {
        let store = IpFilterStore::new();
        store.create(update("", "173.194.0.0/16", true)).unwrap();
        assert_eq!(store.check(ip("173.194.123.35")), IpVerdict::Whitelisted);
        assert_eq!(store.check(ip("192.178.2.3")), IpVerdict::Unlisted);
    }

    #[test]
    fn test_disabled_filter_ignores_lists() {
        let store = IpFilterStore::new();
        store.create(update("173.194.123.35", "", false)).unwrap();
        assert_eq!(store.check(ip("173.194.123.35")), IpVerdict::Unlisted);
        assert!(store.current().blacklist_ips().contains(ip("173.194.123.35")));
    }

    #[test]
    fn test_newest_record_is_current() {
        let store = IpFilterStore::new();
        let first = store.create(update("10.0.0.0/8", "", true)).unwrap();
        let second = store.create(update("", "", true)).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.current().record(), Some(&second));
        assert_eq!(store.check(ip("10.1.1.1")), IpVerdict::Unlisted);
        assert_eq!(store.history().len(), 2);
    }

    #[test]
    fn test_invalid_entry_rejected() {
        let store = IpFilterStore::new();
        let err = store.create(update("10.0.0.0/8, bogus", "", true)).unwrap_err();
        assert!(matches!(err, EmbargoError::InvalidIpEntry(ref e) if e == "bogus"));
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_duplicate_entries_compiled_once() {
        let store = IpFilterStore::new();
        store
            .create(update("10.0.0.1, ,192.168.0.0/24,10.0.0.1", "", true))
            .unwrap();
        let active = store.current();
        assert_eq!(active.blacklist_ips().len(), 2);
        assert_eq!(active.blacklist_ips().networks().len(), 2);
        assert!(active.blacklist_ips().contains(ip("192.168.0.77")));
    }

    #[test]
    fn test_mapped_ipv4_matches_ipv4_entries() {
        let store = IpFilterStore::new();
        store.create(update("173.194.0.0/16", "192.168.10.0/24", true)).unwrap();
        assert_eq!(store.check(ip("::ffff:173.194.123.35")), IpVerdict::Blacklisted);
        assert_eq!(store.check(ip("::ffff:192.168.10.20")), IpVerdict::Whitelisted);
        assert_eq!(store.check(ip("::ffff:10.0.0.1")), IpVerdict::Unlisted);
    }

    #[test]
    fn test_ipv6_entries() {
        let store = IpFilterStore::new();
        store.create(update("2001:db8::/32", "::1", true)).unwrap();
        assert_eq!(store.check(ip("2001:db8::5")), IpVerdict::Blacklisted);
        assert_eq!(store.check(ip("::1")), IpVerdict::Whitelisted);
    }
}
