//! tailwatch: offline detection of devices that follow an observer.
//!
//! Probe requests are collected from pcap captures ([`wireless`]) or a Kismet
//! log ([`database`]), scored by how many separate observation windows each
//! device appears in ([`scoring`]) and, when GPS fixes exist, tied to the
//! places they were seen ([`location`]). [`Analyzer`] runs these pipelines and
//! returns an [`AnalysisReport`]; [`report`] and [`intel`] turn results into
//! Markdown, KML and JSON.

pub mod config;
pub mod database;
pub mod error;
pub mod ignore;
pub mod intel;
pub mod location;
pub mod models;
pub mod report;
pub mod scoring;
pub mod wireless;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use config::Config;
use database::KismetDb;
use ignore::IgnoreLists;
use models::{GpsFix, LocationCluster, ScoredDevice};
use scoring::{ScoreReport, ScoringParams};
use wireless::{MacAddr, ProbeDecoder};

/// Overall outcome of a run, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// No source produced usable input
    Failed,
    /// Analysis ran, nothing suspicious
    Clean,
    /// At least one suspicious device
    Alert,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Failed => 1,
            RunStatus::Clean => 0,
            RunStatus::Alert => 2,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Clean => write!(f, "clean"),
            RunStatus::Alert => write!(f, "alert"),
        }
    }
}

/// Everything one analysis run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub scored: BTreeMap<MacAddr, ScoredDevice>,
    pub suspicious: BTreeMap<MacAddr, ScoredDevice>,
    #[serde(default)]
    pub clusters: Vec<LocationCluster>,
    /// Observation sets (files or windows) that went into scoring
    pub total_sets: usize,
    /// Sources asked for
    pub sources_total: usize,
    /// Sources that could actually be read
    pub sources_usable: usize,
}

impl AnalysisReport {
    fn new(scores: ScoreReport, total_sets: usize, sources_total: usize, sources_usable: usize) -> Self {
        Self {
            generated_at: Utc::now(),
            scored: scores.scored,
            suspicious: scores.suspicious,
            clusters: Vec::new(),
            total_sets,
            sources_total,
            sources_usable,
        }
    }

    fn unusable(sources_total: usize) -> Self {
        Self::new(ScoreReport::default(), 0, sources_total, 0)
    }

    pub fn status(&self) -> RunStatus {
        if self.sources_usable == 0 {
            RunStatus::Failed
        } else if self.suspicious.is_empty() {
            RunStatus::Clean
        } else {
            RunStatus::Alert
        }
    }

    /// Keep only suspicious devices scoring at least `min_score`
    pub fn retain_suspicious_above(&mut self, min_score: f64) {
        self.suspicious.retain(|_, d| d.persistence_score >= min_score);
    }

    /// Suspicious devices, highest score first
    pub fn suspicious_ranked(&self) -> Vec<&ScoredDevice> {
        rank(self.suspicious.values())
    }

    /// All scored devices, highest score first
    pub fn scored_ranked(&self) -> Vec<&ScoredDevice> {
        rank(self.scored.values())
    }
}

fn rank<'a, I: Iterator<Item = &'a ScoredDevice>>(devices: I) -> Vec<&'a ScoredDevice> {
    let mut ranked: Vec<_> = devices.collect();
    ranked.sort_by(|a, b| {
        b.persistence_score
            .total_cmp(&a.persistence_score)
            .then_with(|| b.appearances.cmp(&a.appearances))
            .then_with(|| a.mac.cmp(&b.mac))
    });
    ranked
}

/// Synthetic track for trying the surveillance pipeline without a GPS:
/// ten fixes a minute apart walking north-east from central Berlin.
pub fn demo_fixes() -> Vec<GpsFix> {
    (0..10)
        .map(|i| GpsFix {
            timestamp: 1_700_000_000 + i * 60,
            lat: 52.520 + i as f64 * 0.001,
            lon: 13.405 + i as f64 * 0.001,
            alt: 35.0,
            speed: 5.0,
        })
        .collect()
}

/// Runs the capture-file, database-window and surveillance pipelines
pub struct Analyzer {
    config: Config,
    ignore: IgnoreLists,
}

impl Analyzer {
    /// Create an analyzer, loading the ignore lists named in the config
    pub fn new(config: Config) -> Self {
        let ignore = IgnoreLists::load(
            config.paths.ignore_macs.as_deref(),
            config.paths.ignore_ssids.as_deref(),
        );
        Self { config, ignore }
    }

    /// Create an analyzer with explicit ignore lists
    pub fn with_ignore(config: Config, ignore: IgnoreLists) -> Self {
        Self { config, ignore }
    }

    /// Score a batch of capture files against each other.
    ///
    /// Files are decoded in parallel. Captures that yielded nothing are left
    /// out of the denominator.
    pub fn analyze_captures<P>(&self, paths: &[P], params: &ScoringParams) -> AnalysisReport
    where
        P: AsRef<Path> + Sync,
    {
        let decoder = ProbeDecoder::new(self.ignore.clone());
        let outcomes: Vec<_> = paths.par_iter().map(|p| decoder.decode_file(p)).collect();

        let usable = outcomes.iter().filter(|o| o.is_usable()).count();
        let sets: Vec<_> = outcomes
            .into_iter()
            .map(|o| o.into_set())
            .filter(|s| !s.is_empty())
            .collect();

        if sets.len() < paths.len() {
            warn!(
                "{} of {} captures produced no probe requests",
                paths.len() - sets.len(),
                paths.len()
            );
        }

        let scores = scoring::score_sets(&sets, params);
        let report = AnalysisReport::new(scores, sets.len(), paths.len(), usable);
        info!(
            "Capture analysis: {} devices scored, {} suspicious, status {}",
            report.scored.len(),
            report.suspicious.len(),
            report.status()
        );
        report
    }

    /// Score the configured look-back windows of a Kismet database
    pub fn analyze_windows(&self, db_path: &Path, now: i64) -> AnalysisReport {
        // Opening is lazy; reading the schema catches files that are not SQLite
        let db = match KismetDb::open(db_path).and_then(|db| db.tables().map(|_| db)) {
            Ok(db) => db,
            Err(e) => {
                error!("Cannot use Kismet database: {}", e);
                return AnalysisReport::unusable(1);
            }
        };

        let windows = db.observe_windows(now, &self.config.timing.windows, &self.ignore);
        let scores = scoring::score_windows(&windows, &self.config.scoring_params());
        let report = AnalysisReport::new(scores, windows.len(), 1, 1);
        info!(
            "Window analysis of {}: {} devices scored, {} suspicious",
            db_path.display(),
            report.scored.len(),
            report.suspicious.len()
        );
        report
    }

    /// Cluster the fixes and attach matching locations to suspicious devices
    pub fn surveil(&self, report: &mut AnalysisReport, fixes: &[GpsFix]) {
        let fixes: Vec<GpsFix> = fixes.iter().copied().filter(GpsFix::has_position).collect();
        report.clusters = location::cluster_fixes(&fixes, self.config.clustering.distance_meters);
        location::correlate_devices(&mut report.suspicious, &report.clusters);

        for (mac, device) in &report.suspicious {
            if let Some(scored) = report.scored.get_mut(mac) {
                scored.locations = device.locations.clone();
            }
        }
    }
}

/// Timestamped output file name, e.g. `tailwatch_report_20240101_120000.md`
pub fn output_path(dir: &Path, stem: &str, ext: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}_{}.{}", stem, at.format("%Y%m%d_%H%M%S"), ext))
}
