//! Ignore lists
//!
//! Known-good devices (your own phone, the car's head unit) and networks are
//! excluded before anything is recorded. Lists are JSON files:
//!
//! ```json
//! { "ignore_macs": ["AA:BB:CC:DD:EE:FF"] }
//! { "ignore_ssids": ["HomeNet"] }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::wireless::MacAddr;

#[derive(Debug, Default, Deserialize)]
struct MacListFile {
    #[serde(default)]
    ignore_macs: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SsidListFile {
    #[serde(default)]
    ignore_ssids: Vec<String>,
}

/// Devices and networks excluded from analysis
#[derive(Debug, Clone, Default)]
pub struct IgnoreLists {
    macs: HashSet<MacAddr>,
    /// Upper-cased SSIDs
    ssids: HashSet<String>,
}

impl IgnoreLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load both lists. A missing or broken file is logged and treated as empty.
    pub fn load(mac_path: Option<&Path>, ssid_path: Option<&Path>) -> Self {
        let mut lists = Self::new();

        if let Some(path) = mac_path.filter(|p| p.exists()) {
            match read_json::<MacListFile>(path) {
                Ok(file) => {
                    for entry in &file.ignore_macs {
                        match entry.parse::<MacAddr>() {
                            Ok(mac) => {
                                lists.macs.insert(mac);
                            }
                            Err(e) => warn!("Skipping ignore-list entry: {}", e),
                        }
                    }
                    info!("Loaded {} ignored MACs from {}", lists.macs.len(), path.display());
                }
                Err(e) => warn!("Could not load MAC ignore list: {:#}", e),
            }
        }

        if let Some(path) = ssid_path.filter(|p| p.exists()) {
            match read_json::<SsidListFile>(path) {
                Ok(file) => {
                    lists.ssids.extend(file.ignore_ssids.iter().map(|s| s.to_uppercase()));
                    info!("Loaded {} ignored SSIDs from {}", lists.ssids.len(), path.display());
                }
                Err(e) => warn!("Could not load SSID ignore list: {:#}", e),
            }
        }

        lists
    }

    pub fn with_macs<I: IntoIterator<Item = MacAddr>>(mut self, macs: I) -> Self {
        self.macs.extend(macs);
        self
    }

    pub fn with_ssids<I, S>(mut self, ssids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ssids.extend(ssids.into_iter().map(|s| s.as_ref().to_uppercase()));
        self
    }

    pub fn ignores_mac(&self, mac: &MacAddr) -> bool {
        self.macs.contains(mac)
    }

    pub fn ignores_ssid(&self, ssid: &str) -> bool {
        !self.ssids.is_empty() && self.ssids.contains(&ssid.to_uppercase())
    }

    /// Drop the SSID if it is ignored
    pub fn filter_ssid(&self, ssid: Option<String>) -> Option<String> {
        ssid.filter(|s| !self.ignores_ssid(s))
    }

    pub fn is_empty(&self) -> bool {
        self.macs.is_empty() && self.ssids.is_empty()
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_lists() {
        let temp = TempDir::new().unwrap();
        let mac_path = temp.path().join("mac_list.json");
        let ssid_path = temp.path().join("ssid_list.json");
        std::fs::write(&mac_path, r#"{"ignore_macs": ["aa:bb:cc:dd:ee:ff", "bogus"]}"#).unwrap();
        std::fs::write(&ssid_path, r#"{"ignore_ssids": ["HomeNet"]}"#).unwrap();

        let lists = IgnoreLists::load(Some(&mac_path), Some(&ssid_path));
        assert!(lists.ignores_mac(&"AA:BB:CC:DD:EE:FF".parse().unwrap()));
        assert!(lists.ignores_ssid("homenet"));
        assert!(!lists.ignores_ssid("Free_WiFi"));
    }

    #[test]
    fn test_missing_and_broken_files_are_empty() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("broken.json");
        std::fs::write(&broken, "not json").unwrap();

        let lists = IgnoreLists::load(Some(&temp.path().join("missing.json")), Some(&broken));
        assert!(lists.is_empty());
    }

    #[test]
    fn test_filter_ssid() {
        let lists = IgnoreLists::new().with_ssids(["xfinitywifi"]);
        assert_eq!(lists.filter_ssid(Some("XFINITYWIFI".into())), None);
        assert_eq!(lists.filter_ssid(Some("cafe".into())).as_deref(), Some("cafe"));
        assert_eq!(lists.filter_ssid(None), None);
    }
}
