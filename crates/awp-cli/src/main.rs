// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Command Line
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! `awp` - run an elastodynamic simulation from a JSON configuration.
//!
//! ```bash
//! # all ranks of the run as threads, CPU reference kernels
//! awp --config run.json
//!
//! # wgpu kernels, one device per rank
//! awp --config run.json --backend wgpu
//!
//! # validate and print the decomposition without running
//! awp --config run.json --check
//! ```

use awp_core::cpu::CpuDevice;
use awp_core::decomp::{decompose, ProcessGrid};
use awp_core::driver::{prepare, run_local};
use awp_core::engine::RunSummary;
use awp_core::recording::RecordingRegion;
use awp_gpu::WgpuDevice;
use awp_types::config::RunConfig;
use awp_types::error::AwpResult;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Host reference kernels (rayon)
    Cpu,
    /// wgpu compute shaders
    Wgpu,
}

/// Distributed fourth-order elastodynamic solver
#[derive(Parser)]
#[command(name = "awp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Kernel backend
    #[arg(short, long, value_enum, default_value = "cpu")]
    backend: Backend,

    /// Validate the configuration and print the decomposition, then exit
    #[arg(long)]
    check: bool,

    /// Write the per-rank run summaries as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

fn check(cfg: &RunConfig) -> AwpResult<()> {
    let series = prepare(cfg)?;
    let grid = ProcessGrid::new(cfg.decomposition.px, cfg.decomposition.py)?;
    let dims = (cfg.grid.nx, cfg.grid.ny, cfg.grid.nz);
    info!(
        run = %cfg.run_name,
        nt = cfg.nt(),
        nst = series.nst,
        sources = series.points.len(),
        "configuration valid"
    );
    for sub in decompose(dims, grid)? {
        let rec = RecordingRegion::from_config(&cfg.recording, dims, &sub)?;
        info!(
            rank = sub.rank,
            coords = ?(sub.cx, sub.cy),
            origin = ?(sub.origin_x(), sub.origin_y()),
            nodes = ?(sub.nxt, sub.nyt, sub.nzt),
            neighbours = sub.neighbors.count(),
            recorded = ?rec.counts(),
            "subdomain"
        );
    }
    Ok(())
}

fn run(cli: &Cli, cfg: &RunConfig) -> AwpResult<Vec<RunSummary>> {
    match cli.backend {
        Backend::Cpu => run_local(cfg, |_| Ok(CpuDevice::new())),
        Backend::Wgpu => {
            if let Some(adapter) = awp_gpu::gpu_info() {
                info!(%adapter, "wgpu adapter");
            }
            run_local(cfg, |_| WgpuDevice::new())
        }
    }
}

fn execute(cli: &Cli) -> AwpResult<()> {
    let cfg = RunConfig::from_file(&cli.config)?;
    if cli.check {
        return check(&cfg);
    }
    let summaries = run(cli, &cfg)?;

    let device_errors: usize = summaries.iter().map(|s| s.device_errors).sum();
    if device_errors > 0 {
        error!(device_errors, "run finished with device errors");
    }
    if let Some(path) = &cli.summary {
        std::fs::write(path, serde_json::to_string_pretty(&summaries)?)?;
        info!(path = %path.display(), "summary written");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backend_and_flags() {
        let cli = Cli::try_parse_from(["awp", "--config", "run.json", "--backend", "wgpu", "-q"])
            .expect("parse");
        assert_eq!(cli.backend, Backend::Wgpu);
        assert!(cli.quiet);
        assert!(!cli.check);
        assert_eq!(cli.config, PathBuf::from("run.json"));
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["awp"]).is_err());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        let cli = Cli::try_parse_from([OsStr::new("awp"), OsStr::new("--config"), path.as_os_str()])
            .expect("parse");
        assert!(execute(&cli).is_err());
    }
}
