//! Location analysis
//!
//! Groups GPS fixes into places visited and ties suspicious devices to the
//! places where they were seen.

pub mod cluster;
pub mod correlate;

pub use cluster::{cluster_fixes, haversine_distance, EARTH_RADIUS_M};
pub use correlate::correlate_devices;
