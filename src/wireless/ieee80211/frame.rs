//! 802.11 Frame Header
//!
//! Just enough of the MAC header to attribute a probe request to its sender:
//! frame control, the transmitter address and the fixed header length.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a management frame header (FC, duration, 3 addresses, sequence control)
pub const MGMT_HEADER_LEN: usize = 24;

/// Offset of address 2 (transmitter/source) in the MAC header
pub const SOURCE_ADDR_OFFSET: usize = 10;

/// MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = data.get(..6)?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2],
            self.0[3], self.0[4], self.0[5])
    }
}

impl std::str::FromStr for MacAddr {
    type Err = String;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `AA-BB-CC-DD-EE-FF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("Invalid MAC address: {}", s))?;
            if part.len() != 2 {
                return Err(format!("Invalid MAC address: {}", s));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid MAC address: {}", s))?;
        }

        if parts.next().is_some() {
            return Err(format!("Invalid MAC address: {}", s));
        }

        Ok(Self(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frame type (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management = 0,
    Control = 1,
    Data = 2,
    Extension = 3,
}

impl From<u8> for FrameType {
    fn from(val: u8) -> Self {
        match val & 0x03 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }
}

/// Management frame subtypes this crate distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSubtype {
    AssocRequest,
    ProbeRequest,
    ProbeResponse,
    Beacon,
    Other(u8),
}

impl FrameSubtype {
    pub fn from_raw(frame_type: FrameType, subtype: u8) -> Self {
        let sub = subtype & 0x0f;
        match (frame_type, sub) {
            (FrameType::Management, 0) => FrameSubtype::AssocRequest,
            (FrameType::Management, 4) => FrameSubtype::ProbeRequest,
            (FrameType::Management, 5) => FrameSubtype::ProbeResponse,
            (FrameType::Management, 8) => FrameSubtype::Beacon,
            _ => FrameSubtype::Other(sub),
        }
    }
}

/// First byte of the frame control field
#[derive(Debug, Clone, Copy)]
pub struct FrameControl {
    /// Protocol version (should be 0)
    pub protocol_version: u8,
    pub frame_type: FrameType,
    pub subtype: FrameSubtype,
}

impl FrameControl {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let fc0 = *data.first()?;
        let frame_type = FrameType::from((fc0 >> 2) & 0x03);

        Some(Self {
            protocol_version: fc0 & 0x03,
            frame_type,
            subtype: FrameSubtype::from_raw(frame_type, (fc0 >> 4) & 0x0f),
        })
    }

    /// Version 0 management probe request, i.e. a first byte of exactly `0x40`
    pub fn is_probe_request(&self) -> bool {
        self.protocol_version == 0
            && self.frame_type == FrameType::Management
            && self.subtype == FrameSubtype::ProbeRequest
    }
}

/// Source address of a management frame, if the frame is long enough to carry one
pub fn source_address(frame: &[u8]) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(SOURCE_ADDR_OFFSET..)?)
}
