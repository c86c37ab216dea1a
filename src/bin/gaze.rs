//! Gaze CLI - Command-line interface for Synheart Gaze
//!
//! Commands:
//! - features: Build participants and export scene or segment features
//! - sweep: Explore validity thresholds over segments or participants
//! - discarded: Report the share of segment time kept by validity filtering
//! - config: Print the effective analysis configuration
//! - doctor: Diagnose a recording and the configuration

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use synheart_gaze::recording::{
    read_aois_file, read_rest_pupil_sizes_file, read_segments_file, JsonRecording, Recording,
    RecordingData, RestPupilTable,
};
use synheart_gaze::validity_sweep::{
    percent_discarded, sweep_proportion_participants, sweep_proportion_segments,
    sweep_time_gap_segments, Sweep,
};
use synheart_gaze::{
    export_features_all, write_features_tsv, Aoi, AnalysisConfig, BuildOptions, ComputeError,
    FeatureSelection, FeatureTable, Job, ParallelDispatcher, Participant, GAZE_VERSION,
    PRODUCER_NAME,
};

/// Gaze - Segmentation, validity and feature aggregation for eye-tracking recordings
#[derive(Parser)]
#[command(name = "gaze")]
#[command(author = "Synheart AI Inc")]
#[command(version = GAZE_VERSION)]
#[command(about = "Turn eye-tracking recordings into validated feature tables", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build participants and export their features
    Features {
        #[command(flatten)]
        build: BuildArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "tsv")]
        output_format: OutputFormat,

        /// One row per segment instead of one row per scene
        #[arg(long)]
        segments: bool,

        /// Keep invalid scenes in the table
        #[arg(long)]
        keep_invalid_scenes: bool,

        /// Keep participants whose whole recording is invalid
        #[arg(long)]
        include_invalid: bool,

        /// Scalar features to export (comma separated)
        #[arg(long, value_delimiter = ',')]
        features: Option<Vec<String>>,

        /// AOI features to export for every AOI (comma separated)
        #[arg(long, value_delimiter = ',')]
        aoi_features: Option<Vec<String>>,

        /// Exact AOI feature labels such as `menu_numfixations` (comma separated)
        #[arg(long, value_delimiter = ',')]
        aoi_labels: Option<Vec<String>>,
    },

    /// Explore validity thresholds
    Sweep {
        #[command(flatten)]
        build: BuildArgs,

        /// Sweep to run
        #[arg(value_enum)]
        kind: SweepKind,

        /// Largest-gap thresholds in ms for the gap sweep
        #[arg(long, value_delimiter = ',', default_value = "100,200,300,400,500,1000,2000")]
        gaps: Vec<i64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report valid against total segment time per participant
    Discarded {
        #[command(flatten)]
        build: BuildArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file to load
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Diagnose a recording and the configuration
    Doctor {
        /// Normalized recording JSON to check
        #[arg(long)]
        recording: Option<PathBuf>,

        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Inputs shared by every command that builds participants
#[derive(Args)]
struct BuildArgs {
    /// Directory holding `<pid>.json` recordings and `<pid>.seg` tables
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Participant ids (comma separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    participants: Vec<String>,

    /// AOI definition file
    #[arg(long)]
    aois: Option<PathBuf>,

    /// Rest pupil size table
    #[arg(long)]
    rest_pupil: Option<PathBuf>,

    /// Analysis configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Merge features of invalid segments as well
    #[arg(long)]
    keep_invalid_segments: bool,

    /// Split low-quality segments around their gaps
    #[arg(long)]
    auto_partition: bool,

    /// Keep only the first N ms of each segment
    #[arg(long)]
    prune_length: Option<i64>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Tab-separated values with a header row
    Tsv,
    /// Compact JSON document
    Json,
    /// Pretty-printed JSON document
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum SweepKind {
    /// Invalid segments by proportion of valid samples
    Proportion,
    /// Invalid segments by proportion of valid or restored samples
    Restored,
    /// Invalid segments by largest gap
    Gap,
    /// Invalid whole recordings by proportion of valid or restored samples
    Participants,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<(), GazeCliError> {
    match cli.command {
        Commands::Features {
            build,
            output,
            output_format,
            segments,
            keep_invalid_scenes,
            include_invalid,
            features,
            aoi_features,
            aoi_labels,
        } => {
            let selection = FeatureSelection {
                features,
                aoi_features,
                aoi_labels,
            };
            cmd_features(
                &build,
                &output,
                output_format,
                &selection,
                segments,
                !keep_invalid_scenes,
                include_invalid,
            )
        }

        Commands::Sweep {
            build,
            kind,
            gaps,
            json,
        } => cmd_sweep(&build, kind, &gaps, json),

        Commands::Discarded { build, json } => cmd_discarded(&build, json),

        Commands::Config { config } => cmd_config(config.as_deref()),

        Commands::Doctor {
            recording,
            config,
            json,
        } => cmd_doctor(recording.as_deref(), config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, GazeCliError> {
    Ok(match path {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    })
}

/// Build every requested participant over the worker pool
fn build_participants(
    args: &BuildArgs,
    require_valid_segments: bool,
) -> Result<Vec<Participant>, GazeCliError> {
    let config = Arc::new(load_config(args.config.as_deref())?);
    let aois: Arc<Vec<Aoi>> = Arc::new(match &args.aois {
        Some(path) => read_aois_file(path)?,
        None => Vec::new(),
    });
    let rest: Arc<RestPupilTable> = Arc::new(match &args.rest_pupil {
        Some(path) => read_rest_pupil_sizes_file(path)?,
        None => RestPupilTable::new(),
    });
    let options = BuildOptions {
        require_valid_segments,
        auto_partition: args.auto_partition,
        prune_length: args.prune_length,
    };

    let jobs = args
        .participants
        .iter()
        .map(|pid| Job::new(pid.as_str(), args.data_dir.clone()))
        .collect();
    let report = ParallelDispatcher::new(args.workers).run(jobs, |job| {
        let recording = JsonRecording::from_file(job.input.join(format!("{}.json", job.pid)))?;
        let table = read_segments_file(job.input.join(format!("{}.seg", job.pid)))?;
        let rest_sizes = args.rest_pupil.as_ref().map(|_| {
            rest.get(&job.pid).cloned().unwrap_or_default()
        });
        Participant::load(
            job.pid.as_str(),
            &recording,
            &table,
            &aois,
            rest_sizes.as_ref(),
            options,
            Arc::clone(&config),
        )
    })?;

    for failure in &report.failures {
        tracing::error!(participant = %failure.pid, error = %failure.error, "participant skipped");
    }
    tracing::info!(
        run_id = %report.run_id,
        built = report.participants.len(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "participants ready"
    );
    Ok(report.participants)
}

fn cmd_features(
    build: &BuildArgs,
    output: &Path,
    output_format: OutputFormat,
    selection: &FeatureSelection,
    segments: bool,
    require_valid_scenes: bool,
    include_invalid: bool,
) -> Result<(), GazeCliError> {
    let participants = build_participants(build, !build.keep_invalid_segments)?;

    let table = if segments {
        let mut tables = participants
            .iter()
            .map(|p| p.export_segment_features(selection));
        let mut merged = match tables.next() {
            Some(table) => table?,
            None => return Err(GazeCliError::NoParticipants),
        };
        for table in tables {
            merged.rows.extend(table?.rows);
        }
        merged
    } else {
        export_features_all(&participants, selection, require_valid_scenes, include_invalid)?
    };

    let output_data = format_output(&table, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

fn cmd_sweep(
    build: &BuildArgs,
    kind: SweepKind,
    gaps: &[i64],
    json: bool,
) -> Result<(), GazeCliError> {
    let participants = build_participants(build, false)?;
    let mut stdout = io::stdout().lock();
    match kind {
        SweepKind::Participants => {
            let sweep = sweep_proportion_participants(&participants, true)?;
            if json {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&sweep)?)?;
            } else {
                write_sweep(&mut stdout, &sweep, |invalid| u8::from(*invalid).to_string())?;
            }
        }
        _ => {
            let sweep = match kind {
                SweepKind::Proportion => sweep_proportion_segments(&participants, false)?,
                SweepKind::Restored => sweep_proportion_segments(&participants, true)?,
                _ => sweep_time_gap_segments(&participants, gaps)?,
            };
            if json {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&sweep)?)?;
            } else {
                write_sweep(&mut stdout, &sweep, ToString::to_string)?;
                writeln!(stdout)?;
                writeln!(stdout, "threshold\tinvalid_segments\ttotal_segments\tinvalid_participants")?;
                for s in sweep.summary() {
                    writeln!(
                        stdout,
                        "{}\t{}\t{}\t{}",
                        s.threshold, s.invalid_segments, s.total_segments, s.invalid_participants
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn cmd_discarded(build: &BuildArgs, json: bool) -> Result<(), GazeCliError> {
    let participants = build_participants(build, false)?;
    let rows = percent_discarded(&participants)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("pid,is_valid,valid_duration,total_duration,valid_portion");
        for row in &rows {
            println!(
                "{},{},{},{},{}",
                row.pid, row.is_valid, row.valid_duration, row.total_duration, row.valid_portion
            );
        }
    }
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<(), GazeCliError> {
    print!("{}", load_config(config)?.to_toml()?);
    Ok(())
}

fn cmd_doctor(
    recording: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), GazeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "gaze_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Gaze version {}", GAZE_VERSION),
    });

    match load_config(config) {
        Ok(loaded) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Validity method {} at proportion {} / gap {} ms",
                loaded.validity_method, loaded.valid_prop_thresh, loaded.valid_time_thresh
            ),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Invalid configuration: {}", CliError::from(e).message),
        }),
    }

    if let Some(path) = recording {
        checks.extend(check_recording(path));
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: GAZE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Gaze Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(GazeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_recording(path: &Path) -> Vec<DoctorCheck> {
    let data = match JsonRecording::from_file(path)
        .and_then(|recording| RecordingData::load(&recording as &dyn Recording))
    {
        Ok(data) => data,
        Err(e) => {
            return vec![DoctorCheck {
                name: "recording".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot load recording: {}", e),
            }]
        }
    };

    let mut checks = vec![DoctorCheck {
        name: "recording".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "{} samples, {} fixations, {} saccades, {} events",
            data.samples.len(),
            data.fixations.len(),
            data.saccades.as_ref().map_or(0, Vec::len),
            data.events.as_ref().map_or(0, Vec::len)
        ),
    }];

    checks.push(match data.validate() {
        Ok(()) => DoctorCheck {
            name: "ordering".to_string(),
            status: CheckStatus::Ok,
            message: "All streams sorted by timestamp".to_string(),
        },
        Err(e) => DoctorCheck {
            name: "ordering".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let (Some(first), Some(last)) = (data.samples.first(), data.samples.last()) {
        let valid = data.samples.iter().filter(|s| s.is_valid).count();
        let share = valid as f64 / data.samples.len() as f64;
        checks.push(DoctorCheck {
            name: "samples".to_string(),
            status: if share > 0.5 {
                CheckStatus::Ok
            } else {
                CheckStatus::Warning
            },
            message: format!(
                "Span {} to {} ms, {:.1}% valid samples",
                first.timestamp,
                last.timestamp,
                share * 100.0
            ),
        });
    }
    checks
}

// Helper functions

fn format_output(table: &FeatureTable, format: &OutputFormat) -> Result<String, GazeCliError> {
    match format {
        OutputFormat::Tsv => {
            let mut buffer = Vec::new();
            write_features_tsv(&mut buffer, table)?;
            Ok(String::from_utf8_lossy(&buffer).into_owned())
        }
        OutputFormat::Json => Ok(serde_json::to_string(&table.to_document())? + "\n"),
        OutputFormat::JsonPretty => Ok(table.to_json()? + "\n"),
    }
}

fn write_sweep<T>(
    out: &mut impl Write,
    sweep: &Sweep<T>,
    cell: impl Fn(&T) -> String,
) -> io::Result<()> {
    let thresholds: Vec<String> = sweep.thresholds.iter().map(ToString::to_string).collect();
    writeln!(out, "pid\tnum_segments\t{}", thresholds.join("\t"))?;
    for row in &sweep.rows {
        let cells: Vec<String> = row.results.iter().map(&cell).collect();
        writeln!(out, "{}\t{}\t{}", row.pid, row.num_segments, cells.join("\t"))?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum GazeCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoParticipants,
    DoctorFailed,
}

impl From<io::Error> for GazeCliError {
    fn from(e: io::Error) -> Self {
        GazeCliError::Io(e)
    }
}

impl From<ComputeError> for GazeCliError {
    fn from(e: ComputeError) -> Self {
        GazeCliError::Compute(e)
    }
}

impl From<serde_json::Error> for GazeCliError {
    fn from(e: serde_json::Error) -> Self {
        GazeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ComputeError> for CliError {
    fn from(e: ComputeError) -> Self {
        let (code, hint) = match &e {
            ComputeError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
            ComputeError::ParseError(_) | ComputeError::JsonError(_) => {
                ("PARSE_ERROR", "Ensure recordings and tables use the documented formats")
            }
            ComputeError::ConfigError(_) | ComputeError::ConfigSerializeError(_) => {
                ("CONFIG_ERROR", "Run 'gaze config' to see the expected keys")
            }
            ComputeError::EmptyStream(_) | ComputeError::UnsortedStream { .. } => {
                ("RECORDING_ERROR", "Run 'gaze doctor --recording <file>' for details")
            }
            ComputeError::UnknownFeature(_) => {
                ("UNKNOWN_FEATURE", "Feature names are listed in the unfiltered export header")
            }
            ComputeError::FilteredParticipants => {
                ("FILTERED_PARTICIPANTS", "Validity exploration builds participants without filtering")
            }
            ComputeError::NoValidResult(_) | ComputeError::EmptyParticipantList => {
                ("NO_RESULT", "Check the participant ids and the data directory")
            }
            _ => ("COMPUTE_ERROR", "Raise the log level for per-segment details"),
        };
        CliError {
            code: code.to_string(),
            message: e.to_string(),
            hint: Some(hint.to_string()),
        }
    }
}

impl From<GazeCliError> for CliError {
    fn from(e: GazeCliError) -> Self {
        match e {
            GazeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GazeCliError::Compute(e) => CliError::from(e),
            GazeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            GazeCliError::NoParticipants => CliError {
                code: "NO_PARTICIPANTS".to_string(),
                message: "No participant could be exported".to_string(),
                hint: Some("Check the participant ids and the data directory".to_string()),
            },
            GazeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
