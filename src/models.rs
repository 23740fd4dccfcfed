use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::wireless::MacAddr;

/// What one capture file or one database window saw of a single device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceObservation {
    /// Frames (or database rows) attributed to the device
    pub count: u64,
    /// Epoch seconds
    pub first_seen: Option<i64>,
    pub last_seen: Option<i64>,
    pub ssids: BTreeSet<String>,
    /// Strongest antenna signal reported by the radio header, in dBm
    pub strongest_signal: Option<i8>,
}

impl DeviceObservation {
    /// Widen the first/last-seen span to include `ts`
    pub fn touch(&mut self, ts: i64) {
        self.first_seen = Some(self.first_seen.map_or(ts, |f| f.min(ts)));
        self.last_seen = Some(self.last_seen.map_or(ts, |l| l.max(ts)));
    }

    pub fn add_signal(&mut self, dbm: i8) {
        self.strongest_signal = Some(self.strongest_signal.map_or(dbm, |s| s.max(dbm)));
    }
}

/// Result of one decode pass or one window query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    devices: BTreeMap<MacAddr, DeviceObservation>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the observation for `mac`, inserting an empty one first if needed
    pub fn entry(&mut self, mac: MacAddr) -> &mut DeviceObservation {
        self.devices.entry(mac).or_default()
    }

    /// Record one frame seen at `ts` carrying an optional SSID
    pub fn record(&mut self, mac: MacAddr, ts: i64, ssid: Option<String>) {
        let obs = self.entry(mac);
        obs.count += 1;
        obs.touch(ts);
        if let Some(ssid) = ssid {
            obs.ssids.insert(ssid);
        }
    }

    pub fn get(&self, mac: &MacAddr) -> Option<&DeviceObservation> {
        self.devices.get(mac)
    }

    pub fn contains(&self, mac: &MacAddr) -> bool {
        self.devices.contains_key(mac)
    }

    pub fn macs(&self) -> impl Iterator<Item = &MacAddr> {
        self.devices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MacAddr, &DeviceObservation)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Reference from a device to a location cluster it overlapped in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRef {
    /// Index into the cluster list the device was correlated against
    pub cluster: usize,
    pub lat: f64,
    pub lon: f64,
    pub point_count: usize,
}

/// A device after persistence scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDevice {
    pub mac: MacAddr,
    /// Fraction of observation sets the device appeared in, in [0, 1]
    pub persistence_score: f64,
    pub appearances: u64,
    pub present_in_windows: usize,
    pub total_windows: usize,
    pub suspicious: bool,
    pub ssids: BTreeSet<String>,
    pub first_seen: Option<i64>,
    pub last_seen: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationRef>,
}

impl ScoredDevice {
    /// Coarse threat level used by the reports
    pub fn level(&self) -> ThreatLevel {
        ThreatLevel::from_score(self.persistence_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ThreatLevel::High
        } else if score >= 0.6 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::Low => write!(f, "LOW"),
            ThreatLevel::Medium => write!(f, "MEDIUM"),
            ThreatLevel::High => write!(f, "HIGH"),
        }
    }
}

/// One GPS position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Epoch seconds
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
    #[serde(default)]
    pub speed: f64,
}

impl GpsFix {
    pub fn new(timestamp: i64, lat: f64, lon: f64) -> Self {
        Self {
            timestamp,
            lat,
            lon,
            alt: 0.0,
            speed: 0.0,
        }
    }

    /// Fixes at 0/0 are "no fix" placeholders
    pub fn has_position(&self) -> bool {
        self.lat != 0.0 && self.lon != 0.0
    }
}

/// A group of fixes close to a common anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCluster {
    pub lat: f64,
    pub lon: f64,
    pub point_count: usize,
    pub start_time: i64,
    pub end_time: i64,
    pub points: Vec<GpsFix>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_record_aggregates() {
        let mut set = ObservationSet::new();
        set.record(mac(1), 200, Some("home".into()));
        set.record(mac(1), 100, None);
        set.record(mac(1), 300, Some("home".into()));

        let obs = set.get(&mac(1)).unwrap();
        assert_eq!(obs.count, 3);
        assert_eq!(obs.first_seen, Some(100));
        assert_eq!(obs.last_seen, Some(300));
        assert_eq!(obs.ssids.len(), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_strongest_signal() {
        let mut obs = DeviceObservation::default();
        obs.add_signal(-80);
        obs.add_signal(-40);
        obs.add_signal(-60);
        assert_eq!(obs.strongest_signal, Some(-40));
    }

    #[test]
    fn test_threat_level() {
        assert_eq!(ThreatLevel::from_score(1.0), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(0.8), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(0.75), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.5), ThreatLevel::Low);
    }

    #[test]
    fn test_gps_fix_position() {
        assert!(GpsFix::new(0, 52.5, 13.4).has_position());
        assert!(!GpsFix::new(0, 0.0, 13.4).has_position());
    }
}
