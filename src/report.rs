//! Report rendering
//!
//! Markdown summaries, a KML overlay for Google Earth and a JSON dump of the
//! full analysis. Rendering is pure; `write_*` functions put the result in an
//! output directory under a timestamped name.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{ScoredDevice, ThreatLevel};
use crate::{output_path, AnalysisReport};

fn join_ssids(device: &ScoredDevice, limit: usize, empty: &str) -> String {
    let joined = device.ssids.iter().take(limit).cloned().collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        empty.to_string()
    } else {
        joined
    }
}

fn clock(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn level_badge(level: ThreatLevel) -> &'static str {
    match level {
        ThreatLevel::High => "HIGH 🔴",
        ThreatLevel::Medium => "MEDIUM 🟡",
        ThreatLevel::Low => "LOW 🟢",
    }
}

// ==================== Markdown ====================

/// Persistence analysis summary
pub fn render_analysis_markdown(report: &AnalysisReport) -> String {
    let mut out = String::new();
    out.push_str("# Tailwatch Persistence Report\n\n");
    out.push_str(&format!(
        "**Generated:** {}  \n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "**Sources:** {}/{} usable, {} observation sets  \n",
        report.sources_usable, report.sources_total, report.total_sets
    ));
    out.push_str(&format!("**Devices:** {}  \n", report.scored.len()));
    out.push_str(&format!("**Suspicious:** {}  \n\n", report.suspicious.len()));

    if report.suspicious.is_empty() {
        out.push_str("## ✅ No suspicious devices\n\n");
    } else {
        out.push_str("## ⚠️ Suspicious devices\n\n");
        out.push_str("| MAC | Score | Appearances | SSIDs |\n");
        out.push_str("|-----|-------|-------------|-------|\n");
        for device in report.suspicious_ranked() {
            out.push_str(&format!(
                "| `{}` | {:.2} | {} | {} |\n",
                device.mac,
                device.persistence_score,
                device.appearances,
                join_ssids(device, 3, "(none)")
            ));
        }
        out.push('\n');
    }

    out.push_str("## All devices by persistence\n\n");
    out.push_str("| MAC | Score | Appearances | Windows | SSIDs |\n");
    out.push_str("|-----|-------|-------------|---------|-------|\n");
    for device in report.scored_ranked() {
        let flag = if device.suspicious { "🔴" } else { "🟢" };
        out.push_str(&format!(
            "| {} `{}` | {:.2} | {} | {}/{} | {} |\n",
            flag,
            device.mac,
            device.persistence_score,
            device.appearances,
            device.present_in_windows,
            device.total_windows,
            join_ssids(device, 2, "-")
        ));
    }

    out
}

/// Per-device surveillance detail plus the visited locations
pub fn render_surveillance_markdown(report: &AnalysisReport) -> String {
    let mut out = String::new();
    out.push_str("# 🔍 Tailwatch Surveillance Report\n\n");
    out.push_str(&format!(
        "**Generated:** {}  \n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("**Location clusters:** {}  \n", report.clusters.len()));
    out.push_str(&format!("**Suspicious devices:** {}  \n\n", report.suspicious.len()));

    if report.suspicious.is_empty() {
        out.push_str("## ✅ Nothing unusual\n\n");
        out.push_str("No device showed a suspicious persistence pattern.\n\n");
    } else {
        out.push_str("---\n\n");
        out.push_str("## ⚠️ Surveillance detection alert\n\n");
        out.push_str("These devices kept reappearing across observation windows:\n\n");

        for device in report.suspicious_ranked() {
            out.push_str(&format!("### `{}`\n\n", device.mac));
            out.push_str("| Property | Value |\n|----------|-------|\n");
            out.push_str(&format!("| Persistence score | {:.3} |\n", device.persistence_score));
            out.push_str(&format!("| Threat level | {} |\n", level_badge(device.level())));
            out.push_str(&format!("| Appearances | {} |\n", device.appearances));
            out.push_str(&format!(
                "| Windows | {}/{} |\n",
                device.present_in_windows, device.total_windows
            ));
            out.push_str(&format!("| Probed SSIDs | {} |\n", join_ssids(device, 5, "none")));
            if !device.locations.is_empty() {
                out.push_str(&format!("| Locations | {} |\n", device.locations.len()));
            }
            out.push('\n');
        }
    }

    if !report.clusters.is_empty() {
        out.push_str("---\n\n");
        out.push_str("## 📍 Locations\n\n");
        for (i, cluster) in report.clusters.iter().enumerate() {
            out.push_str(&format!(
                "**Location {}:** {:.6}, {:.6} ({} fixes, {} to {})\n\n",
                i + 1,
                cluster.lat,
                cluster.lon,
                cluster.point_count,
                clock(cluster.start_time),
                clock(cluster.end_time)
            ));
        }
    }

    out
}

// ==================== KML ====================

/// KML colors are aabbggrr
const KML_STYLES: [(&str, &str, &str); 3] = [
    ("red_marker", "ff0000ff", "1.2"),
    ("amber_marker", "ff00aaff", "1.0"),
    ("green_marker", "ff00ff00", "0.8"),
];

const KML_ICON: &str = "http://maps.google.com/mapfiles/kml/shapes/placemark_circle.png";

fn style_for(level: ThreatLevel) -> &'static str {
    match level {
        ThreatLevel::High => "#red_marker",
        ThreatLevel::Medium => "#amber_marker",
        ThreatLevel::Low => "#green_marker",
    }
}

type KmlWriter = Writer<Vec<u8>>;

fn open(writer: &mut KmlWriter, tag: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Start(tag))?;
    Ok(())
}

fn close(writer: &mut KmlWriter, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// `<name>text</name>`, with the text escaped
fn text_element(writer: &mut KmlWriter, name: &str, text: &str) -> Result<()> {
    writer.create_element(name).write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_styles(writer: &mut KmlWriter) -> Result<()> {
    for (id, color, scale) in KML_STYLES {
        open(writer, BytesStart::new("Style").with_attributes([("id", id)]))?;
        open(writer, BytesStart::new("IconStyle"))?;
        text_element(writer, "color", color)?;
        text_element(writer, "scale", scale)?;
        open(writer, BytesStart::new("Icon"))?;
        text_element(writer, "href", KML_ICON)?;
        close(writer, "Icon")?;
        close(writer, "IconStyle")?;
        close(writer, "Style")?;
    }

    open(writer, BytesStart::new("Style").with_attributes([("id", "gps_line")]))?;
    open(writer, BytesStart::new("LineStyle"))?;
    text_element(writer, "color", "ff00ffff")?;
    text_element(writer, "width", "3")?;
    close(writer, "LineStyle")?;
    close(writer, "Style")
}

fn write_path(writer: &mut KmlWriter, report: &AnalysisReport) -> Result<()> {
    let coords = report
        .clusters
        .iter()
        .map(|c| format!("{},{},0", c.lon, c.lat))
        .collect::<Vec<_>>()
        .join(" ");

    open(writer, BytesStart::new("Folder"))?;
    text_element(writer, "name", "GPS path")?;
    open(writer, BytesStart::new("Placemark"))?;
    text_element(writer, "name", "Movement path")?;
    text_element(writer, "styleUrl", "#gps_line")?;
    open(writer, BytesStart::new("LineString"))?;
    text_element(writer, "altitudeMode", "clampToGround")?;
    text_element(writer, "coordinates", &coords)?;
    close(writer, "LineString")?;
    close(writer, "Placemark")?;
    close(writer, "Folder")
}

fn write_device_placemarks(writer: &mut KmlWriter, report: &AnalysisReport) -> Result<()> {
    open(writer, BytesStart::new("Folder"))?;
    text_element(writer, "name", "Suspicious devices")?;

    for device in report.suspicious_ranked() {
        let mut points: Vec<(f64, f64)> = device.locations.iter().map(|l| (l.lat, l.lon)).collect();
        if points.is_empty() {
            if let Some(first) = report.clusters.first() {
                points.push((first.lat, first.lon));
            }
        }

        let level = device.level();
        for (i, (lat, lon)) in points.iter().enumerate() {
            let description = [
                format!("MAC: {}", device.mac),
                format!("Persistence score: {:.2}", device.persistence_score),
                format!("Threat level: {}", level),
                format!("Appearances: {}", device.appearances),
                format!("SSIDs: {}", join_ssids(device, 5, "none")),
                format!("Location {} of {}", i + 1, points.len()),
            ]
            .join("\n");

            open(writer, BytesStart::new("Placemark"))?;
            text_element(writer, "name", &format!("{} [{}]", device.mac, level))?;
            text_element(writer, "styleUrl", style_for(level))?;
            text_element(writer, "description", &description)?;
            open(writer, BytesStart::new("Point"))?;
            text_element(writer, "coordinates", &format!("{},{},0", lon, lat))?;
            close(writer, "Point")?;
            close(writer, "Placemark")?;
        }
    }

    close(writer, "Folder")
}

/// Google Earth overlay: movement path and one placemark per device location
pub fn render_kml(report: &AnalysisReport) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    open(
        &mut writer,
        BytesStart::new("kml").with_attributes([("xmlns", "http://www.opengis.net/kml/2.2")]),
    )?;
    open(&mut writer, BytesStart::new("Document"))?;
    text_element(
        &mut writer,
        "name",
        &format!("tailwatch-{}", report.generated_at.format("%Y%m%d_%H%M%S")),
    )?;
    text_element(&mut writer, "description", "Tailwatch surveillance analysis")?;
    write_styles(&mut writer)?;

    if report.clusters.len() > 1 {
        write_path(&mut writer, report)?;
    }
    if !report.suspicious.is_empty() {
        write_device_placemarks(&mut writer, report)?;
    }

    close(&mut writer, "Document")?;
    close(&mut writer, "kml")?;

    let mut kml = String::from_utf8(writer.into_inner())?;
    kml.push('\n');
    Ok(kml)
}

// ==================== Output ====================

/// Write `content` to `<dir>/<stem>_<timestamp>.<ext>`, creating `dir`
pub fn write_output(dir: &Path, stem: &str, ext: &str, at: DateTime<Utc>, content: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let path = output_path(dir, stem, ext, at);
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Pretty JSON dump of the whole report
pub fn write_json(report: &AnalysisReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub fn write_analysis_report(report: &AnalysisReport, dir: &Path) -> Result<PathBuf> {
    write_output(dir, "tailwatch_report", "md", report.generated_at, &render_analysis_markdown(report))
}

pub fn write_surveillance_report(report: &AnalysisReport, dir: &Path) -> Result<PathBuf> {
    write_output(
        dir,
        "surveillance_report",
        "md",
        report.generated_at,
        &render_surveillance_markdown(report),
    )
}

pub fn write_kml(report: &AnalysisReport, dir: &Path) -> Result<PathBuf> {
    write_output(dir, "surveillance", "kml", report.generated_at, &render_kml(report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GpsFix, LocationCluster, LocationRef};
    use crate::wireless::MacAddr;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn device(last: u8, score: f64, ssids: &[&str]) -> ScoredDevice {
        ScoredDevice {
            mac: MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last]),
            persistence_score: score,
            appearances: 7,
            present_in_windows: 3,
            total_windows: 4,
            suspicious: score >= 0.6,
            ssids: ssids.iter().map(|s| s.to_string()).collect(),
            first_seen: Some(100),
            last_seen: Some(200),
            locations: Vec::new(),
        }
    }

    fn cluster(lat: f64, lon: f64) -> LocationCluster {
        LocationCluster {
            lat,
            lon,
            point_count: 1,
            start_time: 100,
            end_time: 160,
            points: vec![GpsFix::new(100, lat, lon)],
        }
    }

    fn report(devices: Vec<ScoredDevice>, clusters: Vec<LocationCluster>) -> AnalysisReport {
        let scored: BTreeMap<_, _> = devices.into_iter().map(|d| (d.mac, d)).collect();
        let suspicious = scored
            .iter()
            .filter(|(_, d)| d.suspicious)
            .map(|(k, d)| (*k, d.clone()))
            .collect();
        AnalysisReport {
            generated_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            scored,
            suspicious,
            clusters,
            total_sets: 4,
            sources_total: 1,
            sources_usable: 1,
        }
    }

    #[test]
    fn test_analysis_markdown_orders_by_score() {
        let r = report(
            vec![
                device(1, 0.75, &["Free_WiFi"]),
                device(2, 1.0, &[]),
                device(3, 0.25, &["cafe"]),
            ],
            Vec::new(),
        );
        let md = render_analysis_markdown(&r);

        assert!(md.contains("**Suspicious:** 2"));
        let high = md.find("| `AA:BB:CC:DD:EE:02` | 1.00 | 7 | (none) |").unwrap();
        let medium = md.find("| `AA:BB:CC:DD:EE:01` | 0.75 | 7 | Free_WiFi |").unwrap();
        assert!(high < medium);
        assert!(md.contains("| 🟢 `AA:BB:CC:DD:EE:03` | 0.25 | 7 | 3/4 | cafe |"));
    }

    #[test]
    fn test_clean_markdown() {
        let md = render_analysis_markdown(&report(vec![device(1, 0.25, &[])], Vec::new()));
        assert!(md.contains("No suspicious devices"));

        let md = render_surveillance_markdown(&report(Vec::new(), vec![cluster(52.52, 13.405)]));
        assert!(md.contains("Nothing unusual"));
        assert!(md.contains("**Location 1:** 52.520000, 13.405000 (1 fixes, 00:01:40 to 00:02:40)"));
    }

    #[test]
    fn test_surveillance_markdown_details() {
        let mut dev = device(1, 0.9, &["a", "b", "c", "d", "e", "f"]);
        dev.locations.push(LocationRef { cluster: 0, lat: 52.52, lon: 13.405, point_count: 1 });
        let md = render_surveillance_markdown(&report(vec![dev], vec![cluster(52.52, 13.405)]));

        assert!(md.contains("### `AA:BB:CC:DD:EE:01`"));
        assert!(md.contains("| Persistence score | 0.900 |"));
        assert!(md.contains("| Threat level | HIGH 🔴 |"));
        assert!(md.contains("| Probed SSIDs | a, b, c, d, e |"));
        assert!(md.contains("| Locations | 1 |"));
    }

    #[test]
    fn test_kml_path_styles_and_fallback() {
        let mut located = device(1, 0.9, &["<Home & Co>"]);
        located.locations = vec![
            LocationRef { cluster: 0, lat: 52.52, lon: 13.405, point_count: 1 },
            LocationRef { cluster: 1, lat: 52.53, lon: 13.415, point_count: 1 },
        ];
        let unlocated = device(2, 0.65, &[]);
        let r = report(
            vec![located, unlocated],
            vec![cluster(52.52, 13.405), cluster(52.53, 13.415)],
        );
        let kml = render_kml(&r).unwrap();

        assert!(kml.contains("<coordinates>13.405,52.52,0 13.415,52.53,0</coordinates>"));
        assert_eq!(kml.matches("<Placemark>").count(), 4);
        assert!(kml.contains("<name>AA:BB:CC:DD:EE:01 [HIGH]</name>"));
        assert!(kml.contains("<styleUrl>#amber_marker</styleUrl>"));
        assert!(kml.contains("&lt;Home &amp; Co&gt;"));
        assert!(!kml.contains("<Home & Co>"));
        assert!(kml.contains("Location 2 of 2"));
    }

    #[test]
    fn test_kml_single_cluster_has_no_path() {
        let kml = render_kml(&report(vec![device(1, 0.9, &[])], vec![cluster(52.52, 13.405)])).unwrap();
        assert!(!kml.contains("Movement path"));
        assert_eq!(kml.matches("<Placemark>").count(), 1);
    }

    #[test]
    fn test_kml_is_well_formed() {
        let mut d = device(1, 0.9, &[r#"Bob's "5G" <lab> & more"#]);
        d.locations = vec![LocationRef { cluster: 0, lat: 52.52, lon: 13.405, point_count: 1 }];
        let kml = render_kml(&report(vec![d], vec![cluster(52.52, 13.405), cluster(52.6, 13.5)])).unwrap();
        assert!(kml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(kml.contains(r#"<Style id="red_marker">"#));

        let mut reader = quick_xml::Reader::from_str(&kml);
        let mut depth = 0i32;
        let mut elements = 0;
        loop {
            match reader.read_event().unwrap() {
                Event::Start(_) => {
                    depth += 1;
                    elements += 1;
                }
                Event::End(_) => depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            assert!(depth >= 0);
        }
        assert_eq!(depth, 0);
        assert!(elements > 20);
    }

    #[test]
    fn test_write_outputs() {
        let temp = TempDir::new().unwrap();
        let r = report(vec![device(1, 0.9, &[])], Vec::new());

        let md = write_analysis_report(&r, &temp.path().join("reports")).unwrap();
        assert!(md.ends_with("tailwatch_report_20231114_221320.md"));
        assert!(std::fs::read_to_string(&md).unwrap().contains("AA:BB:CC:DD:EE:01"));

        let kml = write_kml(&r, temp.path()).unwrap();
        assert!(kml.ends_with("surveillance_20231114_221320.kml"));

        let json_path = temp.path().join("nested/out.json");
        write_json(&r, &json_path).unwrap();
        let back: AnalysisReport = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back.suspicious.len(), 1);
        assert_eq!(back.scored, r.scored);
    }
}
