//! Admission controller (C9): periodic load sampler that retunes
//! `maxConnections` and may trigger graceful shutdown under sustained
//! pressure.
//!
//! Grounded on `lib_common/src/core/memory_guard.rs`'s atomic-counter
//! style for cheap concurrent reads, with OS load/memory signals sourced
//! from `sysinfo` the way `vendor/pmdaemon` already depended on it for
//! process monitoring.

use sysinfo::{System, SystemExt};

use crate::stats::Backpressure;

/// Tunable knobs for the admission controller, read once at startup from
/// `Config` (A1).
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Floor for the per-listener connection cap.
    pub min_conns: u32,
    /// Ceiling for the per-listener connection cap.
    pub max_conns: u32,
    /// Whether the process is running in a cloud environment — gates the
    /// `veryLowRam` immediate-shutdown escalation.
    pub is_cloud: bool,
}

/// Outcome of one admission tick: the cap to apply to every listener, and
/// whether sustained pressure means the process should begin draining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionDecision {
    /// New backpressure snapshot to publish via `Stats::publish_backpressure`.
    pub bp: Backpressure,
    /// Whether `adj` crossed the hard shutdown threshold this tick.
    pub should_shutdown: bool,
    /// Whether `adj` is in the stress band (enables GC-tracing-equivalent
    /// elevated logging).
    pub elevated: bool,
}

/// Periodic load sampler. Wraps a `sysinfo::System` refreshed once per
/// tick; `adj` persists across ticks as the pressure accumulator.
pub struct AdmissionController {
    config: AdmissionConfig,
    sys: System,
    adj: i64,
}

impl AdmissionController {
    /// Builds a controller with a freshly initialised `sysinfo::System`.
    pub fn new(config: AdmissionConfig) -> Self {
        AdmissionController {
            config,
            sys: System::new(),
            adj: 0,
        }
    }

    /// Current pressure accumulator (exposed for tests and diagnostics).
    pub fn adj(&self) -> i64 {
        self.adj
    }

    /// Runs one admission tick using live OS signals, computing the
    /// normalised load averages (`percent-of-CPU-count`) from `sysinfo`.
    pub fn tick(&mut self) -> AdmissionDecision {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        let cpus = self.sys.cpus().len().max(1) as f64;
        let load = self.sys.load_average();
        let avg1 = load.one / cpus * 100.0;
        let avg5 = load.five / cpus * 100.0;
        let avg15 = load.fifteen / cpus * 100.0;
        let free_mem = self.sys.free_memory();
        let total_mem = self.sys.total_memory().max(1);
        self.evaluate(avg1, avg5, avg15, free_mem, total_mem, None)
    }

    /// Runs one admission evaluation against explicit inputs — the pure
    /// core of the formula, exercised directly by unit tests and usable
    /// with an explicit cap override (e.g. during drain with `n=1`).
    pub fn evaluate(
        &mut self,
        avg1: f64,
        avg5: f64,
        avg15: f64,
        free_mem: u64,
        total_mem: u64,
        explicit_cap: Option<u32>,
    ) -> AdmissionDecision {
        let cfg = self.config;
        let low_ram = (free_mem as f64) < 0.10 * (total_mem as f64);
        let very_low_ram = (free_mem as f64) < 0.025 * (total_mem as f64);

        if let Some(n) = explicit_cap {
            let n = n.clamp(cfg.min_conns, cfg.max_conns);
            self.adj = 0;
            return AdmissionDecision {
                bp: Backpressure {
                    avg1,
                    avg5,
                    avg15,
                    adj: 0,
                    max_conns: n,
                },
                should_shutdown: false,
                elevated: false,
            };
        }

        // Pressure update (additive).
        if avg5 > 90.0 {
            self.adj += 3;
        }
        if avg1 > 100.0 {
            self.adj += 2;
        }
        if avg1 > avg5 {
            self.adj += 1;
        }

        // Snapshot `adj` after the additive update but before the healthy-load
        // decay below — the shutdown/stress thresholds fire off this tick's
        // actual accumulated pressure, not a value the same tick's decay has
        // already eaten into.
        let pre_decay_adj = self.adj;

        // Cap computation.
        let n = if avg1 > 100.0 {
            cfg.min_conns
        } else if avg1 > 90.0 || avg5 > 80.0 || low_ram {
            ((cfg.max_conns as f64 * 0.2) as u32).max(cfg.min_conns)
        } else if avg1 > 80.0 || avg5 > 75.0 {
            ((cfg.max_conns as f64 * 0.4) as u32).max(cfg.min_conns)
        } else if avg1 > 70.0 {
            ((cfg.max_conns as f64 * 0.6) as u32).max(cfg.min_conns)
        } else {
            self.adj = (self.adj as f64 * 0.75).floor() as i64;
            cfg.max_conns
        };

        let should_shutdown = pre_decay_adj > 72 || (very_low_ram && cfg.is_cloud);
        let n = if pre_decay_adj > 48 { cfg.min_conns / 2 } else { n };

        AdmissionDecision {
            bp: Backpressure {
                avg1,
                avg5,
                avg15,
                adj: self.adj,
                max_conns: n,
            },
            should_shutdown,
            elevated: self.adj > 0,
        }
    }
}
