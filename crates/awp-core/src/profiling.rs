// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Profiling Context
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-run registry of array sizes and kernel data dependencies.
//!
//! Allocation sites record every array they create; launch sites record
//! which arrays each kernel touches. The report compares the total
//! footprint with the largest single-kernel working set.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum KernelKind {
    Velocity,
    Stress,
    AddSource,
}

#[derive(Debug, Default)]
pub struct ProfilingContext {
    arrays: BTreeMap<String, u64>,
    dependencies: BTreeMap<KernelKind, BTreeSet<String>>,
    launches: BTreeMap<KernelKind, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilingReport {
    pub total_mib: f64,
    pub bottleneck_kernel: Option<KernelKind>,
    pub bottleneck_mib: f64,
    /// total / bottleneck; 0 when nothing was launched.
    pub ratio: f64,
    pub launches: BTreeMap<KernelKind, u64>,
}

impl ProfilingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an allocation. Re-registering a label replaces its size.
    pub fn record_array(&mut self, label: impl Into<String>, bytes: u64) {
        self.arrays.insert(label.into(), bytes);
    }

    pub fn record_dependencies<I, S>(&mut self, kernel: KernelKind, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps = self.dependencies.entry(kernel).or_default();
        deps.extend(labels.into_iter().map(Into::into));
    }

    pub fn record_launch(&mut self, kernel: KernelKind) {
        *self.launches.entry(kernel).or_insert(0) += 1;
    }

    pub fn array_bytes(&self, label: &str) -> Option<u64> {
        self.arrays.get(label).copied()
    }

    pub fn launches(&self, kernel: KernelKind) -> u64 {
        self.launches.get(&kernel).copied().unwrap_or(0)
    }

    pub fn total_bytes(&self) -> u64 {
        self.arrays.values().sum()
    }

    fn kernel_bytes(&self, deps: &BTreeSet<String>) -> u64 {
        deps.iter().filter_map(|l| self.arrays.get(l)).sum()
    }

    pub fn report(&self) -> ProfilingReport {
        let total = self.total_bytes() as f64 / MIB;
        let bottleneck = self
            .dependencies
            .iter()
            .map(|(k, deps)| (*k, self.kernel_bytes(deps)))
            .max_by_key(|&(_, bytes)| bytes);
        let (kernel, bytes) = match bottleneck {
            Some((k, b)) => (Some(k), b as f64 / MIB),
            None => (None, 0.0),
        };
        ProfilingReport {
            total_mib: total,
            bottleneck_kernel: kernel,
            bottleneck_mib: bytes,
            ratio: if bytes > 0.0 { total / bytes } else { 0.0 },
            launches: self.launches.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_picks_largest_working_set() {
        let mut p = ProfilingContext::new();
        p.record_array("u", 4 * 1024 * 1024);
        p.record_array("xx", 2 * 1024 * 1024);
        p.record_array("lam", 2 * 1024 * 1024);
        p.record_dependencies(KernelKind::Velocity, ["u", "xx"]);
        p.record_dependencies(KernelKind::Stress, ["u", "xx", "lam"]);
        p.record_launch(KernelKind::Stress);
        p.record_launch(KernelKind::Stress);

        let r = p.report();
        assert!((r.total_mib - 8.0).abs() < 1e-12);
        assert_eq!(r.bottleneck_kernel, Some(KernelKind::Stress));
        assert!((r.bottleneck_mib - 8.0).abs() < 1e-12);
        assert!((r.ratio - 1.0).abs() < 1e-12);
        assert_eq!(p.launches(KernelKind::Stress), 2);
        assert_eq!(p.launches(KernelKind::Velocity), 0);
    }

    #[test]
    fn test_empty_report_has_zero_ratio() {
        let r = ProfilingContext::new().report();
        assert_eq!(r.bottleneck_kernel, None);
        assert_eq!(r.ratio, 0.0);
    }

    #[test]
    fn test_unknown_dependency_labels_ignored() {
        let mut p = ProfilingContext::new();
        p.record_array("u", 1024);
        p.record_dependencies(KernelKind::Velocity, ["u", "missing"]);
        assert!((p.report().bottleneck_mib - 1024.0 / MIB).abs() < 1e-15);
    }
}
