use tracing::info;

use crate::models::{GpsFix, LocationCluster};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points given in degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Greedy radius clustering.
///
/// Each fix not yet assigned anchors a new cluster that takes every remaining
/// unassigned fix within `threshold_m` of the anchor. Distances are only measured
/// against the anchor, so the result depends on input order and two members may
/// be further apart than the threshold. Every fix ends up in exactly one cluster.
pub fn cluster_fixes(fixes: &[GpsFix], threshold_m: f64) -> Vec<LocationCluster> {
    let mut used = vec![false; fixes.len()];
    let mut clusters = Vec::new();

    for (i, anchor) in fixes.iter().enumerate() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut members = vec![*anchor];

        for (j, fix) in fixes.iter().enumerate().skip(i + 1) {
            if used[j] {
                continue;
            }
            if haversine_distance(anchor.lat, anchor.lon, fix.lat, fix.lon) <= threshold_m {
                used[j] = true;
                members.push(*fix);
            }
        }

        clusters.push(finalize(members));
    }

    if !fixes.is_empty() {
        info!("Clustered {} GPS fixes into {} locations", fixes.len(), clusters.len());
    }
    clusters
}

fn finalize(points: Vec<GpsFix>) -> LocationCluster {
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
    let lon = points.iter().map(|p| p.lon).sum::<f64>() / n;
    let start_time = points.iter().map(|p| p.timestamp).min().unwrap_or_default();
    let end_time = points.iter().map(|p| p.timestamp).max().unwrap_or_default();

    LocationCluster {
        lat,
        lon,
        point_count: points.len(),
        start_time,
        end_time,
        points,
    }
}
