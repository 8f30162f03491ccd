// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Domain-decomposed elastodynamic timestep engine.
//!
//! Layout and indexing: grid, decomp, recording
//! Transport: comm, halo
//! Device: device, cpu, kernels
//! Collaborators: media, source, output, checkpoint
//! Loop: engine, driver

pub mod checkpoint;
pub mod comm;
pub mod cpu;
pub mod decomp;
pub mod device;
pub mod driver;
pub mod engine;
pub mod grid;
pub mod halo;
pub mod kernels;
pub mod media;
pub mod output;
pub mod profiling;
pub mod recording;
pub mod source;
