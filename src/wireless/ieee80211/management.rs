//! 802.11 Management Frame Bodies
//!
//! Probe request SSID extraction. Only the first tagged parameter is looked at:
//! clients put the SSID element first, and anything else is not worth a full IE walk.

use super::frame::{source_address, FrameControl, MacAddr, MGMT_HEADER_LEN};

/// Fixed parameters assumed between the MAC header and the tagged parameters
pub const PROBE_FIXED_PARAMS_LEN: usize = 4;

/// Offset of the first tagged parameter within the frame
pub const TAGGED_PARAMS_OFFSET: usize = MGMT_HEADER_LEN + PROBE_FIXED_PARAMS_LEN;

/// Information Element (IE) types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementId {
    Ssid,
    SupportedRates,
    DsParameter,
    ExtendedSupportedRates,
    VendorSpecific,
    Unknown(u8),
}

impl From<u8> for ElementId {
    fn from(val: u8) -> Self {
        match val {
            0 => ElementId::Ssid,
            1 => ElementId::SupportedRates,
            3 => ElementId::DsParameter,
            50 => ElementId::ExtendedSupportedRates,
            221 => ElementId::VendorSpecific,
            other => ElementId::Unknown(other),
        }
    }
}

/// A tagged parameter borrowed from the frame
#[derive(Debug, Clone, Copy)]
pub struct InformationElement<'a> {
    pub id: ElementId,
    /// Length declared in the tag header
    pub declared_len: usize,
    /// Payload bytes actually present (may be shorter than declared)
    pub data: &'a [u8],
}

/// Read the tag at `offset`. The payload is clamped to the end of the frame.
pub fn element_at(frame: &[u8], offset: usize) -> Option<InformationElement<'_>> {
    let header = frame.get(offset..offset + 2)?;
    let declared_len = header[1] as usize;
    let start = offset + 2;
    let end = (start + declared_len).min(frame.len());

    Some(InformationElement {
        id: ElementId::from(header[0]),
        declared_len,
        data: &frame[start..end],
    })
}

/// Decode an SSID payload. Invalid UTF-8 is replaced, never rejected.
pub fn decode_ssid(data: &[u8]) -> Option<String> {
    let ssid = String::from_utf8_lossy(data);
    let ssid = ssid.trim();
    if ssid.is_empty() {
        None
    } else {
        Some(ssid.to_string())
    }
}

/// Probe request as seen by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Transmitter address
    pub source: MacAddr,
    /// Requested SSID (`None` for wildcard probes or when the tag is missing)
    pub ssid: Option<String>,
}

impl ProbeRequest {
    /// Parse a link-layer frame. Returns `None` for anything that is not a probe
    /// request or is too short to carry a source address.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if !FrameControl::parse(frame)?.is_probe_request() {
            return None;
        }

        let source = source_address(frame)?;

        let ssid = if frame.len() > TAGGED_PARAMS_OFFSET {
            element_at(frame, TAGGED_PARAMS_OFFSET)
                .filter(|ie| ie.id == ElementId::Ssid && ie.declared_len > 0)
                .and_then(|ie| decode_ssid(ie.data))
        } else {
            None
        };

        Some(Self { source, ssid })
    }
}
