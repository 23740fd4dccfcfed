//! 802.11 Capture Decoding
//!
//! Offline decoding of monitor-mode captures into per-device probe observations:
//! - pcap container (both byte orders)
//! - radiotap prefix (length, antenna signal)
//! - probe request source address and first SSID tag
//!
//! No live capture and no protocol state: frames are looked at one by one.

pub mod radiotap;
pub mod capture;
pub mod ieee80211;

pub use capture::{CaptureOutcome, DecodeStats, PcapReader, ProbeDecoder};
pub use ieee80211::{MacAddr, ProbeRequest};
