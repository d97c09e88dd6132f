use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lectern_core::{BatchResults, DatasetId, FetchError, LecternConfig, ReaderSession};
use lectern_scheduler::{
    CancellationToken, DeviceClass, Direction, RowIndex, ScrollState, WindowPolicy, WindowSet,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Parser)]
#[command(name = "lectern-cli")]
#[command(about = "Lectern prefetch inspection CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the windows for one scroll state.
    Windows {
        #[arg(long)]
        center: RowIndex,
        /// Rows per second.
        #[arg(long, default_value_t = 0.0)]
        velocity: f64,
        #[arg(long, value_enum, default_value_t = DirectionArg::Down)]
        direction: DirectionArg,
        #[arg(long, value_enum, default_value_t = DeviceArg::Desktop)]
        device: DeviceArg,
        #[arg(long, default_value_t = 31_102)]
        total: RowIndex,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Scroll through a synthetic dataset and print diagnostics.
    Simulate {
        #[arg(long, default_value_t = 31_102)]
        total: RowIndex,
        #[arg(long, default_value_t = 50)]
        steps: u32,
        #[arg(long, default_value_t = 40)]
        rows_per_step: u32,
        /// Simulated time between steps.
        #[arg(long, default_value_t = 100)]
        step_ms: u64,
        /// First center row.
        #[arg(long, default_value_t = 0)]
        start: RowIndex,
        #[arg(long, value_enum, default_value_t = DeviceArg::Desktop)]
        device: DeviceArg,
        #[arg(long, default_value = "KJV")]
        dataset: String,
        /// Fail every row whose index is a multiple of K.
        #[arg(long, value_name = "K")]
        fail_every: Option<u32>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = DeviceArg::Desktop)]
        device: DeviceArg,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => Direction::Up,
            DirectionArg::Down => Direction::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceArg {
    Desktop,
    Mobile,
}

impl From<DeviceArg> for DeviceClass {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Desktop => DeviceClass::Desktop,
            DeviceArg::Mobile => DeviceClass::Mobile,
        }
    }
}

#[derive(Debug, Serialize)]
struct WindowsOutput {
    total_rows: RowIndex,
    scroll: ScrollState,
    #[serde(flatten)]
    windows: WindowSet,
}

struct SimulateArgs {
    total: RowIndex,
    steps: u32,
    rows_per_step: u32,
    step_ms: u64,
    start: RowIndex,
    device: DeviceClass,
    dataset: String,
    fail_every: Option<u32>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Windows { center, velocity, direction, device, total, config } => {
            let policy = load_config(config.as_deref(), device.into())?.windows;
            run_windows(&policy, ScrollState::new(center, velocity, direction.into(), device.into()), total)
        }
        Commands::Simulate {
            total,
            steps,
            rows_per_step,
            step_ms,
            start,
            device,
            dataset,
            fail_every,
            config,
        } => {
            let config = load_config(config.as_deref(), device.into())?.with_total_rows(total);
            let args = SimulateArgs {
                total,
                steps,
                rows_per_step,
                step_ms,
                start,
                device: device.into(),
                dataset,
                fail_every,
            };
            run_simulate(config, &args)
        }
        Commands::Config { config, device } => {
            let config = load_config(config.as_deref(), device.into())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// File settings if a path is given, otherwise per-device defaults; the
/// environment overrides both
fn load_config(path: Option<&Path>, device: DeviceClass) -> Result<LecternConfig> {
    let config = match path {
        Some(path) => LecternConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => LecternConfig::for_device(device),
    };
    config.apply_env().context("invalid configuration in environment")
}

fn run_windows(policy: &WindowPolicy, scroll: ScrollState, total: RowIndex) -> Result<()> {
    let windows = policy.compute(&scroll, total);
    let payload = WindowsOutput { total_rows: total, scroll, windows };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");
    Ok(())
}

fn run_simulate(config: LecternConfig, args: &SimulateArgs) -> Result<()> {
    if args.total == 0 {
        anyhow::bail!("--total must be at least 1");
    }
    if args.step_ms == 0 {
        anyhow::bail!("--step-ms must be at least 1");
    }

    let row_height = config.velocity.row_height_px;
    let settle = config.prefetch.debounce() + Duration::from_millis(1);
    let mut session = ReaderSession::new(config, args.dataset.as_str())
        .context("failed to create reader session")?;

    let fail_every = args.fail_every.filter(|&k| k > 0);
    let loader = move |dataset: &DatasetId,
                       indices: &[RowIndex],
                       _: &CancellationToken|
          -> std::result::Result<BatchResults, FetchError> {
        Ok(indices
            .iter()
            .map(|&index| {
                let text = match fail_every {
                    Some(k) if index % k == 0 => Err(FetchError::failed("synthetic failure")),
                    _ => Ok(format!("{} {}", dataset, index)),
                };
                (index, text)
            })
            .collect())
    };

    let t0 = Instant::now();
    let mut now = t0;
    for step in 0..args.steps {
        now = t0 + Duration::from_millis(args.step_ms * u64::from(step));
        let travelled = u64::from(step) * u64::from(args.rows_per_step);
        let center = (u64::from(args.start) + travelled).min(u64::from(args.total - 1)) as RowIndex;

        session.report_scroll(now, f64::from(center) * row_height);
        session.report_center_index_at(center, args.device, now);
        session.pump_at(&loader, now);
    }

    // Let the last debounce expire so background work runs
    let end = now + settle;
    session.pump_at(&loader, end);

    let json = session.diagnostics_at(end).to_json()?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::CacheConfig;

    #[test]
    fn test_value_enums_map_to_core_types() {
        assert_eq!(Direction::from(DirectionArg::Up), Direction::Up);
        assert_eq!(DeviceClass::from(DeviceArg::Mobile), DeviceClass::Mobile);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "lectern-cli",
            "simulate",
            "--steps",
            "3",
            "--fail-every",
            "5",
            "--device",
            "mobile",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate { steps, fail_every, device, total, .. } => {
                assert_eq!(steps, 3);
                assert_eq!(fail_every, Some(5));
                assert!(matches!(device, DeviceArg::Mobile));
                assert_eq!(total, 31_102);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_mobile_defaults_without_file() {
        let config = LecternConfig::for_device(DeviceClass::Mobile);
        assert_eq!(config.cache, CacheConfig::for_device(DeviceClass::Mobile));
    }
}
