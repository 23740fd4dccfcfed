use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{error, warn};

use tailwatch::config::Config;
use tailwatch::database::KismetDb;
use tailwatch::intel::{self, ProbeAnalysis, WigleClient};
use tailwatch::models::ScoredDevice;
use tailwatch::scoring::ScoringParams;
use tailwatch::{demo_fixes, report, AnalysisReport, Analyzer, RunStatus};

#[derive(Parser)]
#[command(name = "tailwatch")]
#[command(author, version, about = "Detect devices that keep reappearing near you from 802.11 probe requests")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score devices across several capture files
    Pcap {
        /// Comma-separated capture files
        #[arg(long, required = true, value_delimiter = ',')]
        pcaps: Vec<PathBuf>,

        /// Directory for the Markdown report
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Minimum total appearances for a device to be scored
        /// (defaults to surveillance.min_appearances)
        #[arg(long)]
        min_appearances: Option<u64>,

        /// Also dump the full analysis as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Score devices across the configured time windows of a Kismet log
    Windows {
        /// Kismet database (newest match of the configured glob when omitted)
        #[arg(short, long)]
        kismet_db: Option<PathBuf>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Windowed analysis plus GPS correlation, KML and surveillance report
    Surveil {
        #[arg(short, long)]
        kismet_db: PathBuf,

        /// Use a synthetic GPS track instead of the database's
        #[arg(long)]
        demo: bool,

        /// Only report high-risk devices
        #[arg(long)]
        stalking_only: bool,

        /// Override the persistence threshold
        #[arg(long)]
        min_persistence: Option<f64>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Directory for the KML file
        #[arg(long)]
        kml_dir: Option<PathBuf>,

        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Rank probed networks, optionally geolocating them via WiGLE
    Probes {
        #[arg(short, long)]
        kismet_db: Option<PathBuf>,

        /// Look-back period in days
        #[arg(long, default_value = "1")]
        days: u32,

        /// Read every saved analysis log regardless of age
        #[arg(long)]
        all_logs: bool,

        /// Query WiGLE for the most probed SSIDs (uses API credits)
        #[arg(long)]
        wigle: bool,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Generate default configuration
    GenConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for scored devices
#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Appearances")]
    appearances: u64,
    #[tabled(rename = "Windows")]
    windows: String,
    #[tabled(rename = "Locations")]
    locations: usize,
    #[tabled(rename = "SSIDs")]
    ssids: String,
}

impl From<&ScoredDevice> for DeviceRow {
    fn from(d: &ScoredDevice) -> Self {
        Self {
            mac: d.mac.to_string(),
            score: format!("{:.2}", d.persistence_score),
            level: d.level().to_string(),
            appearances: d.appearances,
            windows: format!("{}/{}", d.present_in_windows, d.total_windows),
            locations: d.locations.len(),
            ssids: d.ssids.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

/// Table row for location clusters
#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Lat")]
    lat: String,
    #[tabled(rename = "Lon")]
    lon: String,
    #[tabled(rename = "Fixes")]
    fixes: usize,
    #[tabled(rename = "Duration (s)")]
    duration: i64,
}

/// Table row for probed networks
#[derive(Tabled)]
struct SsidRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "Devices")]
    devices: usize,
}

pub async fn run_command(cli: Cli) -> Result<RunStatus> {
    let config = || match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Pcap {
            pcaps,
            output_dir,
            min_appearances,
            json,
        } => cmd_pcap(config()?, pcaps, output_dir, min_appearances, json),
        Commands::Windows {
            kismet_db,
            output_dir,
            json,
        } => cmd_windows(config()?, kismet_db, output_dir, json),
        Commands::Surveil {
            kismet_db,
            demo,
            stalking_only,
            min_persistence,
            output_dir,
            kml_dir,
            json,
        } => cmd_surveil(
            config()?,
            kismet_db,
            SurveilOptions {
                demo,
                stalking_only,
                min_persistence,
                output_dir,
                kml_dir,
                json,
            },
        ),
        Commands::Probes {
            kismet_db,
            days,
            all_logs,
            wigle,
            output_dir,
        } => {
            let days = if all_logs { ALL_LOGS_DAYS } else { days };
            cmd_probes(config()?, kismet_db, days, wigle, output_dir).await
        }
        Commands::GenConfig { output } => {
            cmd_gen_config(output)?;
            Ok(RunStatus::Clean)
        }
    }
}

/// Look-back used by `--all-logs` (about a century)
const ALL_LOGS_DAYS: u32 = 36_500;

fn report_dir(config: &Config, arg: Option<PathBuf>, default: &str) -> PathBuf {
    arg.unwrap_or_else(|| config.paths.base_dir.join(default))
}

fn resolve_db(config: &Config, arg: Option<PathBuf>) -> Option<PathBuf> {
    arg.or_else(|| config.latest_kismet_db())
}

fn print_devices(title: &str, devices: &[&ScoredDevice]) {
    if devices.is_empty() {
        return;
    }
    println!("{}", title.bold());
    let rows: Vec<DeviceRow> = devices.iter().map(|d| DeviceRow::from(*d)).collect();
    println!("{}", Table::new(rows));
}

fn print_status(report: &AnalysisReport) {
    match report.status() {
        RunStatus::Alert => println!(
            "{}",
            format!("WARNING: {} suspicious device(s) detected", report.suspicious.len())
                .red()
                .bold()
        ),
        RunStatus::Clean => println!(
            "{} ({} devices scored)",
            "No suspicious devices".green().bold(),
            report.scored.len()
        ),
        RunStatus::Failed => println!("{}", "No usable input".red().bold()),
    }
}

fn write_outputs(report: &AnalysisReport, output_dir: &Path, json: Option<&Path>) -> Result<()> {
    let md = report::write_analysis_report(report, output_dir)?;
    println!("Report written to {}", md.display());
    if let Some(path) = json {
        report::write_json(report, path)?;
        println!("JSON written to {}", path.display());
    }
    Ok(())
}

fn cmd_pcap(
    config: Config,
    pcaps: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    min_appearances: Option<u64>,
    json: Option<PathBuf>,
) -> Result<RunStatus> {
    let params = pcap_params(&config, min_appearances);
    let output_dir = report_dir(&config, output_dir, "surveillance_reports");
    let analyzer = Analyzer::new(config);

    println!("Analyzing {} capture file(s)...", pcaps.len());
    let report = analyzer.analyze_captures(&pcaps, &params);

    if report.status() != RunStatus::Failed {
        print_devices("Suspicious devices", &report.suspicious_ranked());
        write_outputs(&report, &output_dir, json.as_deref())?;
    }
    print_status(&report);
    Ok(report.status())
}

/// Configured scoring parameters, with `--min-appearances` taking precedence
fn pcap_params(config: &Config, min_appearances: Option<u64>) -> ScoringParams {
    let mut params = config.scoring_params();
    if let Some(n) = min_appearances {
        params.min_appearances = n;
    }
    params
}

fn cmd_windows(
    config: Config,
    kismet_db: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    json: Option<PathBuf>,
) -> Result<RunStatus> {
    let Some(db_path) = resolve_db(&config, kismet_db) else {
        error!("No Kismet database found (pattern {})", config.paths.kismet_logs.display());
        return Ok(RunStatus::Failed);
    };
    println!("Using Kismet database {}", db_path.display());

    let output_dir = report_dir(&config, output_dir, "surveillance_reports");
    let analyzer = Analyzer::new(config);
    let report = analyzer.analyze_windows(&db_path, Utc::now().timestamp());

    if report.status() != RunStatus::Failed {
        print_devices("Suspicious devices", &report.suspicious_ranked());
        write_outputs(&report, &output_dir, json.as_deref())?;
    }
    print_status(&report);
    Ok(report.status())
}

struct SurveilOptions {
    demo: bool,
    stalking_only: bool,
    min_persistence: Option<f64>,
    output_dir: Option<PathBuf>,
    kml_dir: Option<PathBuf>,
    json: Option<PathBuf>,
}

fn cmd_surveil(mut config: Config, db_path: PathBuf, opts: SurveilOptions) -> Result<RunStatus> {
    if let Some(threshold) = opts.min_persistence {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("--min-persistence must be within [0, 1], got {}", threshold);
        }
        config.surveillance.persistence_threshold = threshold;
    }
    let stalking_threshold = config.surveillance.stalking_threshold;
    let output_dir = report_dir(&config, opts.output_dir, "surveillance_reports");
    let kml_dir = report_dir(&config, opts.kml_dir, "kml_files");

    let analyzer = Analyzer::new(config);
    let mut report = analyzer.analyze_windows(&db_path, Utc::now().timestamp());
    if report.status() == RunStatus::Failed {
        print_status(&report);
        return Ok(RunStatus::Failed);
    }

    let fixes = if opts.demo {
        println!("{}", "Demo mode: using a synthetic GPS track".yellow());
        demo_fixes()
    } else {
        match KismetDb::open(&db_path).and_then(|db| db.gps_fixes()) {
            Ok(fixes) => fixes,
            Err(e) => {
                warn!("No GPS data: {}", e);
                Vec::new()
            }
        }
    };
    if fixes.is_empty() {
        warn!("No GPS fixes; devices will not be correlated with locations");
    }

    analyzer.surveil(&mut report, &fixes);
    if opts.stalking_only {
        report.retain_suspicious_above(stalking_threshold);
    }

    print_devices("Suspicious devices", &report.suspicious_ranked());
    if !report.clusters.is_empty() {
        println!("{}", "Locations".bold());
        let rows: Vec<ClusterRow> = report
            .clusters
            .iter()
            .enumerate()
            .map(|(i, c)| ClusterRow {
                index: i + 1,
                lat: format!("{:.6}", c.lat),
                lon: format!("{:.6}", c.lon),
                fixes: c.point_count,
                duration: c.end_time - c.start_time,
            })
            .collect();
        println!("{}", Table::new(rows));
    }

    let md = report::write_surveillance_report(&report, &output_dir)?;
    println!("Report written to {}", md.display());
    let kml = report::write_kml(&report, &kml_dir)?;
    println!("KML written to {}", kml.display());
    if let Some(path) = &opts.json {
        report::write_json(&report, path)?;
        println!("JSON written to {}", path.display());
    }

    print_status(&report);
    Ok(report.status())
}

async fn cmd_probes(
    config: Config,
    kismet_db: Option<PathBuf>,
    days: u32,
    wigle: bool,
    output_dir: Option<PathBuf>,
) -> Result<RunStatus> {
    let history = match resolve_db(&config, kismet_db) {
        Some(db_path) => {
            println!("Using Kismet database {}", db_path.display());
            let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
            match KismetDb::open(&db_path).and_then(|db| db.probe_history(cutoff)) {
                Ok(history) => history,
                Err(e) => {
                    error!("Cannot read probe history: {}", e);
                    return Ok(RunStatus::Failed);
                }
            }
        }
        None => {
            let log_dir = config.paths.base_dir.join(&config.paths.log_dir);
            warn!(
                "No Kismet database found (pattern {}), reading analysis logs in {}",
                config.paths.kismet_logs.display(),
                log_dir.display()
            );
            match intel::probe_history_from_logs(&log_dir, days) {
                Ok(history) => history,
                Err(e) => {
                    error!("Cannot read analysis logs: {:#}", e);
                    return Ok(RunStatus::Failed);
                }
            }
        }
    };

    let mut analysis: ProbeAnalysis = intel::analyze_probes(&history);

    if wigle {
        match WigleClient::new(config.wigle.clone())? {
            Some(client) => client.geolocate(&mut analysis).await,
            None => println!(
                "{}",
                "WiGLE credentials missing ([wigle] api_name / api_token), skipping lookups".yellow()
            ),
        }
    }

    let rows: Vec<SsidRow> = analysis
        .top_ssids
        .iter()
        .take(15)
        .enumerate()
        .map(|(i, e)| SsidRow {
            rank: i + 1,
            ssid: e.ssid.clone(),
            devices: e.devices.len(),
        })
        .collect();
    println!(
        "{} devices, {} unique SSIDs",
        analysis.total_devices, analysis.total_unique_ssids
    );
    if !rows.is_empty() {
        println!("{}", Table::new(rows));
    }

    let output_dir = report_dir(&config, output_dir, "surveillance_reports");
    let path = intel::write_probe_report(&analysis, &output_dir)?;
    println!("Report written to {}", path.display());

    Ok(RunStatus::Clean)
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();

    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcap_min_appearances_falls_back_to_config() {
        let mut config = Config::default();
        config.surveillance.min_appearances = 4;

        let cli = Cli::try_parse_from(["tailwatch", "pcap", "--pcaps", "a.pcap,b.pcap"]).unwrap();
        let Commands::Pcap { pcaps, min_appearances, .. } = cli.command else {
            panic!("expected the pcap subcommand");
        };
        assert_eq!(pcaps.len(), 2);
        assert_eq!(min_appearances, None);
        let params = pcap_params(&config, min_appearances);
        assert_eq!(params.min_appearances, 4);
        assert_eq!(params.threshold, config.surveillance.persistence_threshold);

        let cli = Cli::try_parse_from(["tailwatch", "pcap", "--pcaps", "a.pcap", "--min-appearances", "2"])
            .unwrap();
        let Commands::Pcap { min_appearances, .. } = cli.command else {
            panic!("expected the pcap subcommand");
        };
        assert_eq!(pcap_params(&config, min_appearances).min_appearances, 2);
    }

    #[test]
    fn test_all_logs_flag() {
        let cli = Cli::try_parse_from(["tailwatch", "probes", "--all-logs"]).unwrap();
        let Commands::Probes { days, all_logs, kismet_db, .. } = cli.command else {
            panic!("expected the probes subcommand");
        };
        assert!(all_logs);
        assert_eq!(days, 1);
        assert!(kismet_db.is_none());
    }
}
