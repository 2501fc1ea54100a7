// ============================================
// File: crates/overlan-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Main Functionality
//! - `SwitchId`: random identity of one switch instance
//! - `IpRange`: inclusive IPv4 range used to build address pools
//!
//! ## Last Modified
//! v0.1.0 - Initial types

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

/// Size of a `SwitchId` in bytes.
pub const SWITCH_ID_SIZE: usize = 16;

// ============================================
// SwitchId
// ============================================

/// Identity of a running switch, generated once per instance and reported
/// alongside its alias and uptime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchId([u8; SWITCH_ID_SIZE]);

impl SwitchId {
    /// Generates a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; SWITCH_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SWITCH_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwitchId({self})")
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl FromStr for SwitchId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = BASE64.decode(s)?;
        let id: [u8; SWITCH_ID_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CommonError::invalid_input("switch_id", format!("expected {SWITCH_ID_SIZE} bytes"))
        })?;
        Ok(Self(id))
    }
}

// ============================================
// IpRange
// ============================================

/// Inclusive range of IPv4 addresses.
///
/// # Example
/// ```
/// use overlan_common::types::IpRange;
/// use std::net::Ipv4Addr;
///
/// let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 9)).unwrap();
/// assert_eq!(range.len(), 8);
/// assert!(range.contains(Ipv4Addr::new(10, 0, 0, 5)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl IpRange {
    /// Creates a range; fails if `start` is after `end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        if u32::from(start) > u32::from(end) {
            return Err(CommonError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// First address.
    #[must_use]
    pub const fn start(&self) -> Ipv4Addr {
        self.start
    }

    /// Last address.
    #[must_use]
    pub const fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses in the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    /// A range always holds at least one address.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if `ip` is inside the range.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= u32::from(self.start) && ip <= u32::from(self.end)
    }

    /// Iterates the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Converts a dotted netmask to a prefix length.
#[must_use]
pub fn netmask_to_prefix(netmask: Ipv4Addr) -> u8 {
    // count_ones of a u32 is at most 32
    u32::from(netmask).count_ones() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_id_string_roundtrip() {
        let id = SwitchId::generate();
        let parsed: SwitchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(id, SwitchId::generate());
    }

    #[test]
    fn test_switch_id_rejects_short_input() {
        assert!("AAAA".parse::<SwitchId>().is_err());
    }

    #[test]
    fn test_range_rejects_reversed_bounds() {
        let err = IpRange::new(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(err, Err(CommonError::InvalidRange { .. })));
    }

    #[test]
    fn test_range_iteration() {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 254), Ipv4Addr::new(10, 0, 1, 1)).unwrap();
        let all: Vec<_> = range.iter().collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1], Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(range.len(), 4);
    }

    #[test]
    fn test_range_serde() {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":"10.0.0.2","end":"10.0.0.3"}"#);
    }

    #[test]
    fn test_netmask_to_prefix() {
        assert_eq!(netmask_to_prefix(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(netmask_to_prefix(Ipv4Addr::new(255, 255, 0, 0)), 16);
    }
}
