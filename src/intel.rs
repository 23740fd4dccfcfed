//! Probe analysis and WiGLE geolocation
//!
//! The networks a phone probes for leak where its owner lives and works. This
//! module ranks probed SSIDs by how many devices ask for them and can look the
//! most popular ones up in WiGLE.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::WigleConfig;
use crate::report::write_output;
use crate::wireless::MacAddr;

const WIGLE_SEARCH_URL: &str = "https://api.wigle.net/api/v2/network/search";

/// SSIDs kept in the ranking
const TOP_SSIDS: usize = 20;

/// One probed network and the devices asking for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsidPopularity {
    pub ssid: String,
    pub devices: BTreeSet<MacAddr>,
}

/// A network location reported by WiGLE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WigleLocation {
    pub ssid: String,
    pub bssid: String,
    pub lat: f64,
    pub lon: f64,
    pub last_update: Option<String>,
    pub encryption: String,
}

/// WiGLE hits for one probed SSID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WigleFinding {
    pub locations: Vec<WigleLocation>,
    pub searching_devices: Vec<MacAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeAnalysis {
    pub generated_at: DateTime<Utc>,
    pub total_devices: usize,
    pub total_unique_ssids: usize,
    /// Most probed first, at most 20
    pub top_ssids: Vec<SsidPopularity>,
    #[serde(default)]
    pub wigle: BTreeMap<String, WigleFinding>,
}

/// Rank probed SSIDs by the number of distinct devices probing for them
pub fn analyze_probes(history: &BTreeMap<MacAddr, BTreeSet<String>>) -> ProbeAnalysis {
    let mut by_ssid: BTreeMap<&str, BTreeSet<MacAddr>> = BTreeMap::new();
    for (mac, ssids) in history {
        for ssid in ssids {
            by_ssid.entry(ssid.as_str()).or_default().insert(*mac);
        }
    }

    let total_unique_ssids = by_ssid.len();
    let mut ranked: Vec<SsidPopularity> = by_ssid
        .into_iter()
        .map(|(ssid, devices)| SsidPopularity {
            ssid: ssid.to_string(),
            devices,
        })
        .collect();
    // BTreeMap order already sorts by name; stable sort keeps it for ties
    ranked.sort_by(|a, b| b.devices.len().cmp(&a.devices.len()));
    ranked.truncate(TOP_SSIDS);

    for entry in ranked.iter().take(5) {
        info!("'{}': probed by {} devices", entry.ssid, entry.devices.len());
    }

    ProbeAnalysis {
        generated_at: Utc::now(),
        total_devices: history.len(),
        total_unique_ssids,
        top_ssids: ranked,
        wigle: BTreeMap::new(),
    }
}

// ==================== Saved analysis logs ====================

/// The parts of a saved `AnalysisReport` JSON dump the probe history needs
#[derive(Debug, Default, Deserialize)]
struct LoggedReport {
    #[serde(default)]
    scored: BTreeMap<MacAddr, LoggedDevice>,
    #[serde(default)]
    suspicious: BTreeMap<MacAddr, LoggedDevice>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggedDevice {
    #[serde(default)]
    ssids: BTreeSet<String>,
}

fn read_logged_report(path: &Path) -> Result<LoggedReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Not an analysis log: {}", path.display()))
}

/// Probe history rebuilt from the JSON analysis dumps in `dir`, for runs
/// without a Kismet database. Files last modified more than `max_age_days`
/// ago are skipped, as are files that do not parse.
pub fn probe_history_from_logs(
    dir: &Path,
    max_age_days: u32,
) -> Result<BTreeMap<MacAddr, BTreeSet<String>>> {
    let pattern = dir.join("*.json");
    let entries = glob::glob(&pattern.to_string_lossy())
        .with_context(|| format!("Invalid log directory: {}", dir.display()))?;
    let max_age = Duration::from_secs(u64::from(max_age_days) * 86_400);
    let now = SystemTime::now();

    let mut history: BTreeMap<MacAddr, BTreeSet<String>> = BTreeMap::new();
    let mut loaded = 0;
    for path in entries.filter_map(|e| e.ok()) {
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if now.duration_since(modified).unwrap_or_default() > max_age {
            debug!("Skipping {}: older than {} days", path.display(), max_age_days);
            continue;
        }

        let report = match read_logged_report(&path) {
            Ok(report) => report,
            Err(e) => {
                warn!("Skipping log file: {:#}", e);
                continue;
            }
        };
        for (mac, device) in report.scored.into_iter().chain(report.suspicious) {
            history.entry(mac).or_default().extend(device.ssids);
        }
        loaded += 1;
    }

    info!("Probe history from {} log file(s): {} devices", loaded, history.len());
    Ok(history)
}

// ==================== WiGLE ====================

#[derive(Debug, Default, Deserialize)]
struct WigleSearchResponse {
    #[serde(default)]
    results: Vec<WigleResult>,
}

#[derive(Debug, Deserialize)]
struct WigleResult {
    ssid: Option<String>,
    netid: Option<String>,
    trilat: Option<f64>,
    trilong: Option<f64>,
    lastupdt: Option<String>,
    encryption: Option<String>,
}

/// Keep results that carry a position; 0 counts as missing
fn locations_from_response(ssid: &str, response: WigleSearchResponse) -> Vec<WigleLocation> {
    response
        .results
        .into_iter()
        .filter_map(|r| {
            let lat = r.trilat.filter(|v| *v != 0.0)?;
            let lon = r.trilong.filter(|v| *v != 0.0)?;
            Some(WigleLocation {
                ssid: r.ssid.unwrap_or_else(|| ssid.to_string()),
                bssid: r.netid.unwrap_or_default(),
                lat,
                lon,
                last_update: r.lastupdt,
                encryption: r.encryption.unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .collect()
}

/// Minimal WiGLE network search client
pub struct WigleClient {
    config: WigleConfig,
    client: Client,
    base_url: String,
}

impl WigleClient {
    /// `None` when no API credentials are configured
    pub fn new(config: WigleConfig) -> Result<Option<Self>> {
        if config.credentials().is_none() {
            return Ok(None);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("tailwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            config,
            client,
            base_url: WIGLE_SEARCH_URL.to_string(),
        }))
    }

    /// Locations for `ssid` inside the configured bounding box. Failures are
    /// logged and give an empty list.
    pub async fn search_ssid(&self, ssid: &str) -> Vec<WigleLocation> {
        match self.query(ssid).await {
            Ok(locations) => {
                info!("WiGLE: '{}' -> {} locations", ssid, locations.len());
                locations
            }
            Err(e) => {
                warn!("WiGLE lookup failed for '{}': {:#}", ssid, e);
                Vec::new()
            }
        }
    }

    async fn query(&self, ssid: &str) -> Result<Vec<WigleLocation>> {
        let Some((name, token)) = self.config.credentials() else {
            return Ok(Vec::new());
        };

        let params = [
            ("ssid", ssid.to_string()),
            ("latrange1", self.config.lat_min.to_string()),
            ("latrange2", self.config.lat_max.to_string()),
            ("longrange1", self.config.lon_min.to_string()),
            ("longrange2", self.config.lon_max.to_string()),
            ("resultsPerPage", self.config.max_results.to_string()),
        ];

        let response: WigleSearchResponse = self
            .client
            .get(&self.base_url)
            .basic_auth(name, Some(token))
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("WiGLE returned {} raw results for '{}'", response.results.len(), ssid);
        Ok(locations_from_response(ssid, response))
    }

    /// Look up the most probed SSIDs and attach the hits to `analysis`
    pub async fn geolocate(&self, analysis: &mut ProbeAnalysis) {
        info!("Starting WiGLE lookups (uses API credits)");

        for entry in analysis.top_ssids.iter().take(self.config.max_queries) {
            let locations = self.search_ssid(&entry.ssid).await;
            if locations.is_empty() {
                continue;
            }
            analysis.wigle.insert(
                entry.ssid.clone(),
                WigleFinding {
                    locations,
                    searching_devices: entry.devices.iter().take(10).copied().collect(),
                },
            );
        }
    }
}

// ==================== Report ====================

pub fn render_probe_markdown(analysis: &ProbeAnalysis) -> String {
    let mut out = String::new();
    out.push_str("# 📡 Probe Analysis Report\n\n");
    out.push_str(&format!(
        "**Generated:** {}  \n",
        analysis.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("**Devices:** {}  \n", analysis.total_devices));
    out.push_str(&format!("**Unique SSIDs:** {}  \n\n", analysis.total_unique_ssids));

    out.push_str("## Most probed networks\n\n");
    out.push_str("| Rank | SSID | Devices |\n|------|------|---------|\n");
    for (i, entry) in analysis.top_ssids.iter().take(15).enumerate() {
        out.push_str(&format!("| {} | `{}` | {} |\n", i + 1, entry.ssid, entry.devices.len()));
    }

    if !analysis.wigle.is_empty() {
        out.push_str("\n## 🌍 WiGLE geolocation\n\n");
        for (ssid, finding) in &analysis.wigle {
            out.push_str(&format!("### `{}`\n", ssid));
            out.push_str(&format!(
                "Probed by {} device(s).  \n",
                finding.searching_devices.len()
            ));
            for loc in finding.locations.iter().take(3) {
                out.push_str(&format!(
                    "- 📍 {:.4}, {:.4} (encryption: {})\n",
                    loc.lat, loc.lon, loc.encryption
                ));
            }
            out.push('\n');
        }
    }

    out
}

pub fn write_probe_report(analysis: &ProbeAnalysis, dir: &Path) -> Result<PathBuf> {
    write_output(dir, "probe_report", "md", analysis.generated_at, &render_probe_markdown(analysis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, last])
    }

    fn history(entries: &[(u8, &[&str])]) -> BTreeMap<MacAddr, BTreeSet<String>> {
        entries
            .iter()
            .map(|(last, ssids)| (mac(*last), ssids.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_ranking_by_device_count() {
        let h = history(&[
            (1, &["Free_WiFi", "HomeNet"]),
            (2, &["Free_WiFi", "cafe"]),
            (3, &["Free_WiFi", "cafe"]),
            (4, &["airport"]),
        ]);
        let analysis = analyze_probes(&h);

        assert_eq!(analysis.total_devices, 4);
        assert_eq!(analysis.total_unique_ssids, 4);
        let order: Vec<_> = analysis.top_ssids.iter().map(|e| e.ssid.as_str()).collect();
        assert_eq!(order, vec!["Free_WiFi", "cafe", "HomeNet", "airport"]);
        assert_eq!(analysis.top_ssids[0].devices.len(), 3);
    }

    #[test]
    fn test_top_list_is_capped() {
        let names: Vec<String> = (0..30).map(|i| format!("net{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let h = history(&[(1, &refs)]);

        let analysis = analyze_probes(&h);
        assert_eq!(analysis.total_unique_ssids, 30);
        assert_eq!(analysis.top_ssids.len(), 20);
    }

    #[test]
    fn test_empty_history() {
        let analysis = analyze_probes(&BTreeMap::new());
        assert_eq!(analysis.total_devices, 0);
        assert!(analysis.top_ssids.is_empty());
    }

    fn write_log(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_history_from_saved_logs() {
        let temp = TempDir::new().unwrap();
        write_log(
            temp.path(),
            "analysis_1.json",
            r#"{"scored": {"02:00:00:00:00:01": {"ssids": ["HomeNet"], "persistence_score": 1.0},
                           "02:00:00:00:00:02": {"ssids": []}},
                "suspicious": {"02:00:00:00:00:01": {"ssids": ["HomeNet"]}}}"#,
        );
        write_log(
            temp.path(),
            "analysis_2.json",
            r#"{"suspicious": {"02:00:00:00:00:01": {"ssids": ["Office"]}}}"#,
        );
        write_log(temp.path(), "broken.json", "{ not json");
        write_log(temp.path(), "notes.txt", r#"{"scored": {"02:00:00:00:00:09": {"ssids": ["x"]}}}"#);

        let history = probe_history_from_logs(temp.path(), 1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[&mac(1)].iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["HomeNet", "Office"]
        );
        assert!(history[&mac(2)].is_empty());

        let analysis = analyze_probes(&history);
        assert_eq!(analysis.total_unique_ssids, 2);
    }

    #[test]
    fn test_old_logs_are_skipped() {
        let temp = TempDir::new().unwrap();
        let old = write_log(
            temp.path(),
            "old.json",
            r#"{"scored": {"02:00:00:00:00:03": {"ssids": ["airport"]}}}"#,
        );
        write_log(
            temp.path(),
            "new.json",
            r#"{"scored": {"02:00:00:00:00:04": {"ssids": ["cafe"]}}}"#,
        );
        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * 86_400);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();

        let recent = probe_history_from_logs(temp.path(), 7).unwrap();
        assert_eq!(recent.keys().copied().collect::<Vec<_>>(), vec![mac(4)]);

        // --all-logs look-back
        let all = probe_history_from_logs(temp.path(), 36_500).unwrap();
        assert_eq!(all.len(), 2);

        let missing = probe_history_from_logs(&temp.path().join("nope"), 1).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_wigle_response_parsing() {
        let json = r#"{
            "success": true,
            "totalResults": 3,
            "results": [
                {"ssid": "cafe", "netid": "00:11:22:33:44:55", "trilat": 52.5, "trilong": 13.4,
                 "lastupdt": "2024-01-01T00:00:00.000Z", "encryption": "wpa2"},
                {"ssid": "cafe", "netid": "00:11:22:33:44:56", "trilat": 0.0, "trilong": 13.4},
                {"netid": "00:11:22:33:44:57", "trilat": 48.1, "trilong": 11.5}
            ]
        }"#;
        let response: WigleSearchResponse = serde_json::from_str(json).unwrap();
        let locations = locations_from_response("cafe", response);

        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].bssid, "00:11:22:33:44:55");
        assert_eq!(locations[0].encryption, "wpa2");
        assert_eq!(locations[1].ssid, "cafe");
        assert_eq!(locations[1].encryption, "unknown");
        assert_eq!(locations[1].last_update, None);
    }

    #[test]
    fn test_client_requires_credentials() {
        assert!(WigleClient::new(WigleConfig::default()).unwrap().is_none());

        let config = WigleConfig {
            api_name: Some("AID".into()),
            api_token: Some("token".into()),
            ..Default::default()
        };
        assert!(WigleClient::new(config).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_wigle_yields_nothing() {
        let config = WigleConfig {
            api_name: Some("AID".into()),
            api_token: Some("token".into()),
            timeout_secs: 1,
            ..Default::default()
        };
        let mut client = WigleClient::new(config).unwrap().unwrap();
        client.base_url = "http://127.0.0.1:9/api/v2/network/search".to_string();

        assert!(client.search_ssid("cafe").await.is_empty());
    }

    #[test]
    fn test_probe_report() {
        let h = history(&[(1, &["Free_WiFi"]), (2, &["Free_WiFi", "<lab>"])]);
        let mut analysis = analyze_probes(&h);
        analysis.wigle.insert(
            "Free_WiFi".into(),
            WigleFinding {
                locations: vec![WigleLocation {
                    ssid: "Free_WiFi".into(),
                    bssid: String::new(),
                    lat: 52.52001,
                    lon: 13.40499,
                    last_update: None,
                    encryption: "none".into(),
                }],
                searching_devices: vec![mac(1), mac(2)],
            },
        );

        let md = render_probe_markdown(&analysis);
        assert!(md.contains("| 1 | `Free_WiFi` | 2 |"));
        assert!(md.contains("| 2 | `<lab>` | 1 |"));
        assert!(md.contains("Probed by 2 device(s)."));
        assert!(md.contains("- 📍 52.5200, 13.4050 (encryption: none)"));

        let temp = TempDir::new().unwrap();
        let path = write_probe_report(&analysis, temp.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("probe_report_"));
    }
}
