use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use share_placer_core::{collect_doctor_info, CapacityBackendKind, DriverConfig, Verdict};
use share_placer_service::{load_volume, CreateOutcome, ShareDriver, Volume};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "share-placer",
    version,
    about = "Place block-device volume files on mounted network shares."
)]
struct Cli {
    /// Driver configuration (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured capacity backend.
    #[arg(long, global = true)]
    backend: Option<CliBackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pick the share a new volume of the given size would be placed on.
    Select(SizeArgs),
    /// Show per-share capacity and eligibility for a requested size.
    Assess(AssessArgs),
    /// Create a volume file on the best share.
    Create(CreateArgs),
    /// Delete a volume file from its share.
    Delete(DeleteArgs),
    /// Report backend capacity across mounted shares.
    Stats(OutputArgs),
    /// Show environment, paths and detected network mounts.
    Doctor,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliBackendKind {
    Command,
    Native,
}

impl From<CliBackendKind> for CapacityBackendKind {
    fn from(value: CliBackendKind) -> Self {
        match value {
            CliBackendKind::Command => CapacityBackendKind::Command,
            CliBackendKind::Native => CapacityBackendKind::Native,
        }
    }
}

#[derive(Debug, Args)]
struct SizeArgs {
    /// Requested volume size in GiB.
    #[arg(long, value_name = "GIB")]
    size: u64,
}

#[derive(Debug, Args)]
struct AssessArgs {
    /// Requested volume size in GiB.
    #[arg(long, value_name = "GIB", default_value_t = 1)]
    size: u64,

    /// Optional JSON output file for the placement report.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Volume request JSON file; overrides the size/name flags.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["size", "name", "volume_type"])]
    volume: Option<PathBuf>,

    /// Volume size in GiB.
    #[arg(long, value_name = "GIB", required_unless_present = "volume")]
    size: Option<u64>,

    /// Volume file name (default `volume-<uuid>`).
    #[arg(long)]
    name: Option<String>,

    /// Volume type name (`vpc`, `vhd` or `vhdx`).
    #[arg(long)]
    volume_type: Option<String>,

    /// Optional JSON output file for the create outcome.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    /// Volume request JSON file carrying name and provider_location.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["name", "share"])]
    volume: Option<PathBuf>,

    /// Volume file name.
    #[arg(long, required_unless_present = "volume")]
    name: Option<String>,

    /// Share the volume lives on.
    #[arg(long, value_name = "ADDRESS")]
    share: Option<String>,
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Optional JSON output file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Select(args) => run_select_command(config, args),
        Commands::Assess(args) => run_assess_command(config, args),
        Commands::Create(args) => run_create_command(config, args),
        Commands::Delete(args) => run_delete_command(config, args),
        Commands::Stats(args) => run_stats_command(config, args),
        Commands::Doctor => {
            run_doctor_command(&config);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DriverConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.capacity_backend = backend.into();
    }
    debug!(
        "shares config {}, capacity backend {:?}",
        config.shares_config.display(),
        config.capacity_backend
    );
    Ok(config)
}

fn setup_driver(config: DriverConfig) -> Result<ShareDriver> {
    let mut driver = ShareDriver::from_config(config);
    driver.do_setup().context("driver setup failed")?;
    println!(
        "Mounted {}/{} configured share(s).",
        driver.mounted_shares().len(),
        driver.shares().len()
    );
    Ok(driver)
}

fn run_select_command(config: DriverConfig, args: SizeArgs) -> Result<()> {
    let driver = setup_driver(config)?;
    let share = driver.find_share(args.size)?;
    println!("Selected {} for a {} GiB volume.", share.address, args.size);
    Ok(())
}

fn run_assess_command(config: DriverConfig, args: AssessArgs) -> Result<()> {
    let driver = setup_driver(config)?;
    let report = driver.placement_report(args.size);

    println!(
        "Policy: used_ratio={:.3} oversub_ratio={:.3}, requested {} GiB",
        report.policy.used_ratio, report.policy.oversub_ratio, report.requested_size_gib
    );
    for assessment in &report.assessments {
        match (&assessment.capacity, &assessment.verdict) {
            (Some(capacity), Some(verdict)) => println!(
                "- {} [{}] size={} available={} allocated={} -> {}",
                assessment.share,
                assessment.mount_point,
                human_bytes(capacity.total_size),
                human_bytes(capacity.total_available),
                human_bytes(capacity.total_allocated),
                describe_verdict(verdict)
            ),
            _ => println!(
                "- {} [{}] inspection failed: {}",
                assessment.share,
                assessment.mount_point,
                assessment.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    match &report.selected {
        Some(share) => println!("Selected: {share}"),
        None => println!("No suitable share."),
    }

    write_json(args.output, &report, "placement report")
}

fn run_create_command(config: DriverConfig, args: CreateArgs) -> Result<()> {
    let volume = match &args.volume {
        Some(path) => load_volume(path)?,
        None => Volume {
            id: Uuid::new_v4(),
            name: args.name.clone(),
            size_gib: args.size.unwrap_or_default(),
            volume_type: args.volume_type.clone(),
            provider_location: None,
        },
    };

    let driver = setup_driver(config)?;
    let outcome = driver
        .create_volume(&volume)
        .map(CreateOutcome::Created)
        .unwrap_or_else(CreateOutcome::from);

    match &outcome {
        CreateOutcome::Created(created) => println!(
            "Created {} ({:?}) on {}",
            created.path.display(),
            created.format,
            created.provider_location
        ),
        CreateOutcome::Failed { code, message } => println!("Create failed [{code}]: {message}"),
    }
    write_json(args.output, &outcome, "create outcome")?;

    if let CreateOutcome::Failed { message, .. } = outcome {
        anyhow::bail!(message);
    }
    Ok(())
}

fn run_delete_command(config: DriverConfig, args: DeleteArgs) -> Result<()> {
    let volume = match &args.volume {
        Some(path) => load_volume(path)?,
        None => Volume {
            name: args.name.clone(),
            provider_location: args.share.clone(),
            ..Volume::new(0)
        },
    };

    let driver = setup_driver(config)?;
    driver.delete_volume(&volume)?;
    match driver.local_path(&volume)? {
        Some(path) => println!("Deleted {}", path.display()),
        None => println!("Volume has no provider location; nothing deleted."),
    }
    Ok(())
}

fn run_stats_command(config: DriverConfig, args: OutputArgs) -> Result<()> {
    let driver = setup_driver(config)?;
    let stats = driver.volume_stats()?;
    println!(
        "{} ({} {}): total={:.2} GiB free={:.2} GiB reserved={}% shares={}",
        stats.volume_backend_name,
        stats.storage_protocol,
        stats.driver_version,
        stats.total_capacity_gb,
        stats.free_capacity_gb,
        stats.reserved_percentage,
        stats.mounted_shares
    );
    write_json(args.output, &stats, "volume stats")
}

fn run_doctor_command(config: &DriverConfig) {
    let info = collect_doctor_info(config);
    println!("OS: {} ({})", info.os, info.arch);
    if let Some(current_dir) = info.current_dir {
        println!("Current directory: {}", current_dir);
    }
    println!(
        "Shares config: {} (exists: {})",
        info.shares_config, info.shares_config_exists
    );
    println!(
        "Mount point base: {} (exists: {})",
        info.mount_point_base, info.mount_point_base_exists
    );
    println!("Detected network mounts: {}", info.network_mounts.len());
    for mount in info.network_mounts {
        println!(
            "- {} [{}] fs={} total={} available={} managed={}",
            mount.name,
            mount.mount_point,
            mount.file_system,
            human_bytes(mount.total_space_bytes as f64),
            human_bytes(mount.available_space_bytes as f64),
            mount.managed
        );
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
}

fn describe_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Eligible { apparent_available } => {
            format!("eligible ({} apparent headroom)", human_bytes(*apparent_available))
        }
        Verdict::ZeroCapacity => "rejected: share reports zero size".to_string(),
        Verdict::UsedRatioExceeded {
            used_fraction,
            used_ratio,
        } => format!("rejected: used {used_fraction:.3} > used_ratio {used_ratio:.3}"),
        Verdict::InsufficientApparentSpace {
            apparent_available,
            requested,
        } => format!(
            "rejected: apparent headroom {} <= requested {}",
            human_bytes(*apparent_available),
            human_bytes(*requested)
        ),
        Verdict::ReservedAboveOversub {
            reserved_ratio,
            oversub_ratio,
        } => format!("rejected: reserved {reserved_ratio:.3} >= oversub_ratio {oversub_ratio:.3}"),
    }
}

fn write_json<T: Serialize>(output: Option<PathBuf>, value: &T, what: &str) -> Result<()> {
    let Some(output) = output else {
        return Ok(());
    };
    let payload =
        serde_json::to_string_pretty(value).with_context(|| format!("failed to serialize {what}"))?;
    fs::write(&output, payload)
        .with_context(|| format!("failed to write {what} to {}", output.display()))?;
    println!("JSON written to {}", output.display());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn human_bytes(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value <= 0.0 {
        return "0 B".to_string();
    }
    let mut size = value;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
