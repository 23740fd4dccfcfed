//! Persistence scoring
//!
//! A device's persistence score is the fraction of observation sets (capture files
//! or time windows) it showed up in. Recurrence across separated windows is what
//! distinguishes a device following you from one that was merely loud once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::models::{ObservationSet, ScoredDevice};
use crate::wireless::MacAddr;

/// Thresholds applied while scoring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    /// Score at or above which a device is suspicious
    pub threshold: f64,
    /// Devices with fewer total appearances are left out entirely
    pub min_appearances: u64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_appearances: 2,
        }
    }
}

/// A named look-back window measured from "now"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub name: String,
    pub minutes: u32,
}

impl TimeWindow {
    pub fn new(name: impl Into<String>, minutes: u32) -> Self {
        Self {
            name: name.into(),
            minutes,
        }
    }

    /// Lower time bound of the window in epoch seconds
    pub fn cutoff(&self, now: i64) -> i64 {
        now - i64::from(self.minutes) * 60
    }
}

/// Scored devices plus the suspicious subset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub scored: BTreeMap<MacAddr, ScoredDevice>,
    pub suspicious: BTreeMap<MacAddr, ScoredDevice>,
}

impl ScoreReport {
    fn from_scored(scored: BTreeMap<MacAddr, ScoredDevice>) -> Self {
        let suspicious = scored
            .iter()
            .filter(|(_, d)| d.suspicious)
            .map(|(mac, d)| (*mac, d.clone()))
            .collect();
        Self { scored, suspicious }
    }

    pub fn is_empty(&self) -> bool {
        self.scored.is_empty()
    }
}

fn union_of_macs<'a, I>(sets: I) -> BTreeSet<MacAddr>
where
    I: IntoIterator<Item = &'a ObservationSet>,
{
    sets.into_iter().flat_map(|s| s.macs().copied()).collect()
}

/// Score independent observation sets (one per capture file).
///
/// Totals and SSIDs are summed over every set containing the device.
pub fn score_sets(sets: &[ObservationSet], params: &ScoringParams) -> ScoreReport {
    if sets.is_empty() {
        return ScoreReport::default();
    }

    let total = sets.len();
    let mut scored = BTreeMap::new();

    for mac in union_of_macs(sets) {
        let present: Vec<_> = sets.iter().filter_map(|s| s.get(&mac)).collect();
        let appearances: u64 = present.iter().map(|o| o.count).sum();

        if appearances < params.min_appearances {
            debug!("{} below minimum appearances ({})", mac, appearances);
            continue;
        }

        let score = present.len() as f64 / total as f64;
        scored.insert(
            mac,
            ScoredDevice {
                mac,
                persistence_score: score,
                appearances,
                present_in_windows: present.len(),
                total_windows: total,
                suspicious: score >= params.threshold,
                ssids: present.iter().flat_map(|o| o.ssids.iter().cloned()).collect(),
                first_seen: present.iter().filter_map(|o| o.first_seen).min(),
                last_seen: present.iter().filter_map(|o| o.last_seen).max(),
                locations: Vec::new(),
            },
        );
    }

    let report = ScoreReport::from_scored(scored);
    info!(
        "Scored {} devices over {} sets, {} suspicious (threshold {})",
        report.scored.len(),
        total,
        report.suspicious.len(),
        params.threshold
    );
    report
}

/// Score nested look-back windows of one source.
///
/// Presence is counted per window, but appearances, SSIDs and timestamps come
/// from the widest window alone since it already contains the narrower ones.
pub fn score_windows(windows: &[(TimeWindow, ObservationSet)], params: &ScoringParams) -> ScoreReport {
    let Some((widest, _)) = windows.iter().enumerate().max_by_key(|(_, (w, _))| w.minutes) else {
        return ScoreReport::default();
    };

    let total = windows.len();
    let widest_set = &windows[widest].1;
    let mut scored = BTreeMap::new();

    for mac in union_of_macs(windows.iter().map(|(_, s)| s)) {
        let present_in = windows.iter().filter(|(_, s)| s.contains(&mac)).count();
        let widest_obs = widest_set.get(&mac);

        let appearances = widest_obs.map_or(present_in as u64, |o| o.count);
        if appearances < params.min_appearances {
            continue;
        }

        let score = present_in as f64 / total as f64;
        scored.insert(
            mac,
            ScoredDevice {
                mac,
                persistence_score: score,
                appearances,
                present_in_windows: present_in,
                total_windows: total,
                suspicious: score >= params.threshold,
                ssids: widest_obs.map(|o| o.ssids.clone()).unwrap_or_default(),
                first_seen: widest_obs.and_then(|o| o.first_seen),
                last_seen: widest_obs.and_then(|o| o.last_seen),
                locations: Vec::new(),
            },
        );
    }

    let report = ScoreReport::from_scored(scored);
    info!(
        "Scored {} devices over {} windows, {} suspicious (threshold {})",
        report.scored.len(),
        total,
        report.suspicious.len(),
        params.threshold
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn set(entries: &[(u8, u64)]) -> ObservationSet {
        let mut s = ObservationSet::new();
        for &(last, count) in entries {
            for i in 0..count {
                s.record(mac(last), 1000 + i as i64, None);
            }
        }
        s
    }

    fn with_ssids(mut s: ObservationSet, last: u8, ssids: &[&str]) -> ObservationSet {
        for ssid in ssids {
            s.entry(mac(last)).ssids.insert(ssid.to_string());
        }
        s
    }

    #[test]
    fn test_no_sets() {
        let report = score_sets(&[], &ScoringParams::default());
        assert!(report.scored.is_empty());
        assert!(report.suspicious.is_empty());
        assert!(score_windows(&[], &ScoringParams::default()).is_empty());
    }

    #[test]
    fn test_three_of_four_sets() {
        let sets = vec![
            set(&[(1, 1)]),
            set(&[(1, 1)]),
            set(&[(1, 1), (2, 5)]),
            set(&[(2, 1)]),
        ];

        let params = ScoringParams { threshold: 0.6, min_appearances: 2 };
        let report = score_sets(&sets, &params);
        let dev = &report.scored[&mac(1)];
        assert_eq!(dev.persistence_score, 0.75);
        assert_eq!(dev.present_in_windows, 3);
        assert_eq!(dev.total_windows, 4);
        assert_eq!(dev.appearances, 3);
        assert!(dev.suspicious);
        assert!(report.suspicious.contains_key(&mac(1)));
        assert_eq!(report.scored[&mac(2)].persistence_score, 0.5);
        assert!(!report.suspicious.contains_key(&mac(2)));

        let strict = ScoringParams { threshold: 0.8, min_appearances: 2 };
        let report = score_sets(&sets, &strict);
        assert!(!report.scored[&mac(1)].suspicious);
        assert!(report.suspicious.is_empty());
    }

    #[test]
    fn test_scores_are_bounded_and_full_presence_is_one() {
        let sets = vec![
            set(&[(1, 2), (2, 1)]),
            set(&[(1, 1), (3, 4)]),
            set(&[(1, 1), (2, 2)]),
        ];
        let params = ScoringParams { threshold: 0.6, min_appearances: 1 };
        let report = score_sets(&sets, &params);

        for dev in report.scored.values() {
            assert!((0.0..=1.0).contains(&dev.persistence_score));
        }
        assert_eq!(report.scored[&mac(1)].persistence_score, 1.0);
        assert!(!report.scored.contains_key(&mac(9)));
    }

    #[test]
    fn test_min_appearances_filter() {
        // Present in every set but only once overall
        let sets = vec![set(&[(1, 1)])];
        let params = ScoringParams { threshold: 0.6, min_appearances: 2 };
        let report = score_sets(&sets, &params);
        assert!(report.scored.is_empty());
        assert!(report.suspicious.is_empty());
    }

    #[test]
    fn test_ssids_and_span_are_merged() {
        let mut a = ObservationSet::new();
        a.record(mac(1), 500, Some("Free_WiFi".into()));
        let mut b = ObservationSet::new();
        b.record(mac(1), 900, Some("xfinitywifi".into()));
        b.record(mac(1), 100, Some("Free_WiFi".into()));

        let report = score_sets(&[a, b], &ScoringParams::default());
        let dev = &report.scored[&mac(1)];
        assert_eq!(dev.ssids.len(), 2);
        assert_eq!(dev.first_seen, Some(100));
        assert_eq!(dev.last_seen, Some(900));
    }

    #[test]
    fn test_windows_use_widest_for_totals() {
        let windows = vec![
            (TimeWindow::new("recent", 5), with_ssids(set(&[(1, 1)]), 1, &["a"])),
            (TimeWindow::new("medium", 10), with_ssids(set(&[(1, 1)]), 1, &["a"])),
            (TimeWindow::new("old", 15), ObservationSet::new()),
            (TimeWindow::new("oldest", 20), with_ssids(set(&[(1, 4), (2, 3)]), 1, &["a", "b"])),
        ];
        let params = ScoringParams { threshold: 0.6, min_appearances: 3 };
        let report = score_windows(&windows, &params);

        let dev = &report.scored[&mac(1)];
        assert_eq!(dev.present_in_windows, 3);
        assert_eq!(dev.total_windows, 4);
        assert_eq!(dev.persistence_score, 0.75);
        assert_eq!(dev.appearances, 4);
        assert_eq!(dev.ssids.len(), 2);
        assert!(dev.suspicious);

        let other = &report.scored[&mac(2)];
        assert_eq!(other.persistence_score, 0.25);
        assert!(!other.suspicious);
    }

    #[test]
    fn test_windows_fallback_when_missing_from_widest() {
        let windows = vec![
            (TimeWindow::new("recent", 5), with_ssids(set(&[(1, 7)]), 1, &["x"])),
            (TimeWindow::new("oldest", 20), ObservationSet::new()),
        ];
        let params = ScoringParams { threshold: 0.5, min_appearances: 1 };
        let dev = &score_windows(&windows, &params).scored[&mac(1)];
        assert_eq!(dev.appearances, 1);
        assert!(dev.ssids.is_empty());
        assert_eq!(dev.first_seen, None);
    }

    #[test]
    fn test_time_window_cutoff() {
        assert_eq!(TimeWindow::new("recent", 5).cutoff(10_000), 9_700);
    }
}
