//! 802.11 Frame Parsing
//!
//! Minimal parsing for IEEE 802.11 probe requests.

mod frame;
mod management;

pub use frame::*;
pub use management::*;

/// Parse a link-layer frame into a probe request, if it is one
pub fn parse_probe_request(data: &[u8]) -> Option<ProbeRequest> {
    ProbeRequest::parse(data)
}
