// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Run Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Entry points that wire configuration, sources, devices and ranks.

use crate::comm::{Communicator, LocalCluster};
use crate::device::Accelerator;
use crate::engine::{RunSummary, TimestepEngine};
use crate::output::SharedFileWriter;
use crate::source::{PointSources, SourceModel, SourceSeries};
use awp_types::config::RunConfig;
use awp_types::error::AwpResult;
use tracing::info;

/// Validate the configuration and load the source series. Everything
/// that can fail before heavy allocation fails here.
pub fn prepare(cfg: &RunConfig) -> AwpResult<SourceSeries> {
    cfg.validate()?;
    let series = PointSources::from_config(&cfg.source).load(cfg.nst(), cfg.time.dt)?;
    series.validate((cfg.grid.nx, cfg.grid.ny, cfg.grid.nz))?;
    Ok(series)
}

/// Run one rank to completion.
pub fn run_rank<A, C>(cfg: &RunConfig, comm: C, dev: A, series: &SourceSeries) -> AwpResult<RunSummary>
where
    A: Accelerator,
    C: Communicator,
{
    let writer = SharedFileWriter::new(&cfg.recording.output_dir, comm.rank());
    let engine = TimestepEngine::setup(cfg, comm, dev, series, Box::new(writer))?;
    engine.run()
}

/// Run every rank of `cfg` as a thread of this process. `make_device` is
/// called once per rank on that rank's thread.
pub fn run_local<A, F>(cfg: &RunConfig, make_device: F) -> AwpResult<Vec<RunSummary>>
where
    A: Accelerator,
    F: Fn(usize) -> AwpResult<A> + Sync,
{
    let series = prepare(cfg)?;
    let cluster = LocalCluster::new(cfg.nranks())?;
    info!(
        run = %cfg.run_name,
        ranks = cluster.size(),
        dims = ?(cfg.grid.nx, cfg.grid.ny, cfg.grid.nz),
        "starting in-process cluster"
    );
    cluster.run(|comm| {
        let dev = make_device(comm.rank())?;
        run_rank(cfg, comm, dev, &series)
    })
}
