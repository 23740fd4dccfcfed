use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::models::{LocationCluster, LocationRef, ScoredDevice};
use crate::wireless::MacAddr;

/// Inclusive interval overlap between a device's seen span and a cluster's span
fn overlaps(device: &ScoredDevice, cluster: &LocationCluster) -> bool {
    match (device.first_seen, device.last_seen) {
        (Some(first), Some(last)) if first <= last => {
            first <= cluster.end_time && last >= cluster.start_time
        }
        _ => false,
    }
}

/// Attach every time-overlapping cluster to each device.
///
/// Devices without a usable seen span are left untouched rather than matched
/// against everything; clusters with an inverted span never match.
pub fn correlate_devices(devices: &mut BTreeMap<MacAddr, ScoredDevice>, clusters: &[LocationCluster]) {
    if clusters.is_empty() {
        return;
    }

    for (mac, device) in devices.iter_mut() {
        device.locations = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.start_time <= c.end_time && overlaps(device, c))
            .map(|(i, c)| LocationRef {
                cluster: i,
                lat: c.lat,
                lon: c.lon,
                point_count: c.point_count,
            })
            .collect();

        if device.locations.is_empty() {
            debug!("{} not correlated with any location", mac);
        } else {
            info!("{} seen at {} location(s)", mac, device.locations.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GpsFix;

    fn device(first: Option<i64>, last: Option<i64>) -> ScoredDevice {
        ScoredDevice {
            mac: MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            persistence_score: 1.0,
            appearances: 4,
            present_in_windows: 4,
            total_windows: 4,
            suspicious: true,
            ssids: Default::default(),
            first_seen: first,
            last_seen: last,
            locations: Vec::new(),
        }
    }

    fn cluster(start: i64, end: i64) -> LocationCluster {
        LocationCluster {
            lat: 52.52,
            lon: 13.405,
            point_count: 2,
            start_time: start,
            end_time: end,
            points: vec![GpsFix::new(start, 52.52, 13.405), GpsFix::new(end, 52.52, 13.405)],
        }
    }

    fn correlate_one(dev: ScoredDevice, clusters: &[LocationCluster]) -> Vec<LocationRef> {
        let mut devices = BTreeMap::new();
        devices.insert(dev.mac, dev);
        correlate_devices(&mut devices, clusters);
        devices.into_values().next().unwrap().locations
    }

    #[test]
    fn test_overlapping_span_matches() {
        let locs = correlate_one(device(Some(1000), Some(1600)), &[cluster(1500, 2000)]);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].cluster, 0);
        assert_eq!(locs[0].point_count, 2);
    }

    #[test]
    fn test_disjoint_span_does_not_match() {
        let locs = correlate_one(device(Some(1000), Some(1400)), &[cluster(1500, 2000)]);
        assert!(locs.is_empty());
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        assert_eq!(correlate_one(device(Some(1000), Some(1500)), &[cluster(1500, 2000)]).len(), 1);
        assert_eq!(correlate_one(device(Some(2000), Some(2500)), &[cluster(1500, 2000)]).len(), 1);
    }

    #[test]
    fn test_multiple_matches_keep_cluster_order() {
        let clusters = [cluster(0, 100), cluster(150, 300), cluster(900, 950), cluster(280, 400)];
        let locs = correlate_one(device(Some(120), Some(500)), &clusters);
        assert_eq!(locs.iter().map(|l| l.cluster).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_missing_or_inverted_spans_never_match() {
        assert!(correlate_one(device(None, None), &[cluster(0, 2000)]).is_empty());
        assert!(correlate_one(device(Some(10), None), &[cluster(0, 2000)]).is_empty());
        assert!(correlate_one(device(Some(500), Some(100)), &[cluster(0, 2000)]).is_empty());
        assert!(correlate_one(device(Some(100), Some(500)), &[cluster(400, 200)]).is_empty());
    }
}
