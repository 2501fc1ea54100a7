// ============================================
// File: crates/overlan-core/src/protocol/frame.rs
// ============================================
//! # Ethernet Frames
//!
//! ## Creation Reason
//! The pipeline looks at every frame: Auth needs to tell control from
//! data, Neighbor needs the sender's MAC and IPv4 address. `Frame` gives
//! those views without copying the underlying buffer.
//!
//! ## Main Functionality
//! - `MacAddr`: 6-byte hardware address
//! - `EthernetHeader`: destination, source, ethertype
//! - `Frame`: cheap-to-clone frame with control/data classification
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parsing is total. Frames shorter than a header simply have no header
//! - `Frame::bytes()` is written to devices verbatim, never re-encode it
//!
//! ## Last Modified
//! v0.1.0 - Initial frame model

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Length of an Ethernet header without VLAN tag.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Control frames carry at least the zero destination and a type byte.
pub const CONTROL_HEADER_LEN: usize = 7;

/// IPv4 ethertype.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// ARP ethertype.
pub const ETHERTYPE_ARP: u16 = 0x0806;

// ============================================
// MacAddr
// ============================================

/// A 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// All-zero address; marks control frames.
    pub const ZERO: Self = Self([0; 6]);

    /// Broadcast address.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Reads a MAC from the first six bytes of `buf`.
    #[must_use]
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = buf.get(..6)?.try_into().ok()?;
        Some(Self(octets))
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns `true` for the all-zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns `true` for broadcast and multicast addresses.
    #[must_use]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| CoreError::invalid_payload("mac", s))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|e| CoreError::invalid_payload("mac", e))?;
        }
        if parts.next().is_some() {
            return Err(CoreError::invalid_payload("mac", s));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// EthernetHeader
// ============================================

/// Parsed Ethernet II header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Destination address
    pub dst: MacAddr,
    /// Source address
    pub src: MacAddr,
    /// Ethertype field
    pub ethertype: u16,
}

// ============================================
// Frame
// ============================================

/// One Ethernet frame as received from a point or a device.
///
/// Cloning is cheap; the payload is reference counted.
///
/// # Example
/// ```
/// use overlan_core::protocol::{Frame, MacAddr};
///
/// let mut raw = vec![0xffu8; 6];
/// raw.extend_from_slice(&[2, 0, 0, 0, 0, 1]);
/// raw.extend_from_slice(&[0x08, 0x06]);
/// let frame = Frame::parse(raw.into());
/// assert!(!frame.is_control());
/// assert_eq!(frame.ethernet().unwrap().dst, MacAddr::BROADCAST);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    header: Option<EthernetHeader>,
}

impl Frame {
    /// Wraps raw bytes. Never fails.
    #[must_use]
    pub fn parse(data: Bytes) -> Self {
        let header = if data.len() >= ETHERNET_HEADER_LEN {
            match (MacAddr::from_slice(&data[0..6]), MacAddr::from_slice(&data[6..12])) {
                (Some(dst), Some(src)) => Some(EthernetHeader {
                    dst,
                    src,
                    ethertype: u16::from_be_bytes([data[12], data[13]]),
                }),
                _ => None,
            }
        } else {
            None
        };
        Self { data, header }
    }

    /// The full frame as received.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the frame, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Frame length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ethernet header, if the frame is long enough to hold one.
    #[must_use]
    pub const fn ethernet(&self) -> Option<&EthernetHeader> {
        self.header.as_ref()
    }

    /// Destination MAC, also available for short control frames.
    #[must_use]
    pub fn destination(&self) -> Option<MacAddr> {
        MacAddr::from_slice(&self.data)
    }

    /// Returns `true` when the destination MAC is all zero.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.data.len() >= CONTROL_HEADER_LEN && self.destination().is_some_and(|d| d.is_zero())
    }

    /// Control type byte of a control frame.
    #[must_use]
    pub fn control_type(&self) -> Option<u8> {
        if self.is_control() {
            self.data.get(6).copied()
        } else {
            None
        }
    }

    /// Bytes after the control header, or after the Ethernet header for
    /// data frames.
    #[must_use]
    pub fn payload(&self) -> Bytes {
        if self.is_control() {
            self.data.slice(CONTROL_HEADER_LEN..)
        } else if self.header.is_some() {
            self.data.slice(ETHERNET_HEADER_LEN..)
        } else {
            Bytes::new()
        }
    }

    /// Sender hardware and protocol address of an ARP or IPv4 frame.
    ///
    /// ARP uses the sender fields of the ARP body; IPv4 pairs the Ethernet
    /// source with the IP source. Anything else yields `None`.
    #[must_use]
    pub fn sender(&self) -> Option<(MacAddr, Ipv4Addr)> {
        let header = self.header?;
        let body = &self.data[ETHERNET_HEADER_LEN..];
        match header.ethertype {
            ETHERTYPE_ARP => {
                // htype(2) ptype(2) hlen(1) plen(1) oper(2) sha(6) spa(4)
                if body.len() < 18 || body[4] != 6 || body[5] != 4 {
                    return None;
                }
                let mac = MacAddr::from_slice(&body[8..14])?;
                let ip = Ipv4Addr::new(body[14], body[15], body[16], body[17]);
                Some((mac, ip))
            }
            ETHERTYPE_IPV4 => {
                if body.len() < 20 || body[0] >> 4 != 4 {
                    return None;
                }
                Some((header.src, Ipv4Addr::new(body[12], body[13], body[14], body[15])))
            }
            _ => None,
        }
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::parse(data)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Frame");
        d.field("len", &self.data.len());
        if let Some(kind) = self.control_type() {
            d.field("control", &kind);
        } else if let Some(h) = &self.header {
            d.field("dst", &h.dst)
                .field("src", &h.src)
                .field("ethertype", &format_args!("0x{:04x}", h.ethertype));
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ethernet(dst: [u8; 6], src: [u8; 6], ethertype: u16, body: &[u8]) -> Bytes {
        let mut raw = Vec::new();
        raw.extend_from_slice(&dst);
        raw.extend_from_slice(&src);
        raw.extend_from_slice(&ethertype.to_be_bytes());
        raw.extend_from_slice(body);
        raw.into()
    }

    #[test]
    fn test_short_frame_has_no_header() {
        let frame = Frame::parse(Bytes::from_static(&[1, 2, 3]));
        assert!(frame.ethernet().is_none());
        assert!(!frame.is_control());
        assert!(frame.payload().is_empty());
        assert!(frame.sender().is_none());
    }

    #[test]
    fn test_control_classification() {
        let frame = Frame::parse(Bytes::from_static(&[0, 0, 0, 0, 0, 0, 3, b'{', b'}']));
        assert!(frame.is_control());
        assert_eq!(frame.control_type(), Some(3));
        assert_eq!(&frame.payload()[..], b"{}");

        // six zero bytes alone carry no type
        assert!(!Frame::parse(Bytes::from_static(&[0; 6])).is_control());
    }

    #[test]
    fn test_arp_sender() {
        let src = [2, 0, 0, 0, 0, 7];
        let mut arp = vec![0, 1, 8, 0, 6, 4, 0, 1];
        arp.extend_from_slice(&src);
        arp.extend_from_slice(&[10, 0, 0, 7]);
        arp.extend_from_slice(&[0; 6]);
        arp.extend_from_slice(&[10, 0, 0, 1]);
        let frame = Frame::parse(ethernet([0xff; 6], src, ETHERTYPE_ARP, &arp));

        let (mac, ip) = frame.sender().unwrap();
        assert_eq!(mac, MacAddr(src));
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[test]
    fn test_ipv4_sender() {
        let mut ip = vec![0x45, 0, 0, 20, 0, 0, 0, 0, 64, 1, 0, 0];
        ip.extend_from_slice(&[10, 0, 0, 9]);
        ip.extend_from_slice(&[10, 0, 0, 1]);
        let frame = Frame::parse(ethernet([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 9], ETHERTYPE_IPV4, &ip));
        assert_eq!(
            frame.sender(),
            Some((MacAddr([2, 0, 0, 0, 0, 9]), Ipv4Addr::new(10, 0, 0, 9)))
        );
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "02:00:5e:10:00:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "02:00:5e:10:00:ff");
        assert!("02:00".parse::<MacAddr>().is_err());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!mac.is_multicast());
    }
}
