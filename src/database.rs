//! Kismet log database access
//!
//! A `.kismet` file is a SQLite database. Devices live in `devices` with a JSON
//! blob per device; GPS positions are in `snapshots` (newer Kismet) or on each
//! row of `packets`.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SourceError};
use crate::ignore::IgnoreLists;
use crate::models::{GpsFix, ObservationSet};
use crate::scoring::TimeWindow;
use crate::wireless::MacAddr;

const DEVICES_SINCE: &str = "SELECT devmac, phyname, first_time, last_time, device
     FROM devices
     WHERE last_time >= ?1
       AND (phyname = '802.11' OR phyname LIKE '%WiFi%')";

/// Read-only handle on a Kismet log
pub struct KismetDb {
    conn: Connection,
}

impl KismetDb {
    /// Open an existing Kismet database read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
        conn.busy_timeout(Duration::from_secs(10))?;

        Ok(Self { conn })
    }

    /// Wrap an existing connection (for testing)
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Names of all tables in the database
    pub fn tables(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    // ==================== Device Observations ====================

    /// One observation set from every 802.11 device last seen at or after `cutoff`
    pub fn observe_since(&self, cutoff: i64, ignore: &IgnoreLists) -> Result<ObservationSet> {
        let mut set = ObservationSet::new();
        let mut stmt = self.conn.prepare(DEVICES_SINCE)?;
        let mut rows = stmt.query(params![cutoff])?;

        while let Some(row) = rows.next()? {
            let devmac: String = row.get(0)?;
            let mac = match devmac.parse::<MacAddr>() {
                Ok(mac) => mac,
                Err(e) => {
                    debug!("Skipping device row: {}", e);
                    continue;
                }
            };
            if ignore.ignores_mac(&mac) {
                continue;
            }

            let first: Option<i64> = row.get(2)?;
            let last: Option<i64> = row.get(3)?;
            let ssids = match row.get_ref(4)? {
                ValueRef::Text(b) | ValueRef::Blob(b) => probed_ssids(b),
                _ => Vec::new(),
            };

            let obs = set.entry(mac);
            obs.count += 1;
            if let Some(ts) = first {
                obs.touch(ts);
            }
            if let Some(ts) = last {
                obs.touch(ts);
            }
            obs.ssids.extend(ssids.into_iter().filter(|s| !ignore.ignores_ssid(s)));
        }

        Ok(set)
    }

    /// One observation set per look-back window. A failing window is logged and
    /// contributes an empty set.
    pub fn observe_windows(
        &self,
        now: i64,
        windows: &[TimeWindow],
        ignore: &IgnoreLists,
    ) -> Vec<(TimeWindow, ObservationSet)> {
        windows
            .iter()
            .map(|window| {
                let set = match self.observe_since(window.cutoff(now), ignore) {
                    Ok(set) => set,
                    Err(e) => {
                        error!("Window '{}' query failed: {}", window.name, e);
                        ObservationSet::new()
                    }
                };
                info!("Window '{}' ({} min): {} devices", window.name, window.minutes, set.len());
                (window.clone(), set)
            })
            .collect()
    }

    /// Probed SSIDs per device seen at or after `cutoff`
    pub fn probe_history(&self, cutoff: i64) -> Result<BTreeMap<MacAddr, BTreeSet<String>>> {
        let set = self.observe_since(cutoff, &IgnoreLists::default())?;
        let history: BTreeMap<_, _> = set
            .iter()
            .map(|(mac, obs)| (*mac, obs.ssids.clone()))
            .collect();

        info!(
            "Probe history: {} devices, {} SSID probes",
            history.len(),
            history.values().map(|s| s.len()).sum::<usize>()
        );
        Ok(history)
    }

    // ==================== GPS ====================

    /// Position fixes ordered by time. Rows without a position are dropped.
    pub fn gps_fixes(&self) -> Result<Vec<GpsFix>> {
        let tables = self.tables()?;

        let sql = if tables.contains("snapshots") {
            "SELECT ts_sec, lat, lon, alt, speed FROM snapshots
             WHERE lat IS NOT NULL AND lat != 0 AND lon IS NOT NULL AND lon != 0
             ORDER BY ts_sec"
        } else if tables.contains("packets") {
            "SELECT ts_sec, lat, lon, alt, 0 FROM packets
             WHERE lat IS NOT NULL AND lat != 0 AND lon IS NOT NULL AND lon != 0
             ORDER BY ts_sec"
        } else {
            warn!("No GPS table in Kismet database");
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(sql)?;
        let fixes = stmt
            .query_map([], |row| {
                Ok(GpsFix {
                    timestamp: row.get(0)?,
                    lat: row.get(1)?,
                    lon: row.get(2)?,
                    alt: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                    speed: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!("Extracted {} GPS fixes", fixes.len());
        Ok(fixes)
    }
}

/// SSIDs from `dot11.device` / `dot11.device.probed_ssid_map` / `dot11.probedssid.ssid`.
/// Anything malformed just yields no names.
pub fn probed_ssids(blob: &[u8]) -> Vec<String> {
    let Ok(json) = serde_json::from_slice::<Value>(blob) else {
        return Vec::new();
    };

    let entries: Vec<&Value> = match json.get("dot11.device").and_then(|d| d.get("dot11.device.probed_ssid_map")) {
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| entry.get("dot11.probedssid.ssid")?.as_str())
        .map(str::trim)
        .filter(|ssid| !ssid.is_empty())
        .map(str::to_string)
        .collect()
}
