//! Per-core load sampling
//!
//! Load is computed from cumulative CPU time counters: the fraction of time
//! that was not idle between two consecutive samples. Sources of counters are
//! abstracted behind [`CounterSource`] so the control logic never depends on
//! procfs directly.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::paths;
use dv_error::{DeckvoltError, Result};

/// Cumulative CPU time counters for one core (USER_HZ ticks)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    pub fn idle_total(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    /// True if any counter went backwards since `previous`
    pub fn regressed_from(&self, previous: &CpuTimes) -> bool {
        self.user < previous.user
            || self.nice < previous.nice
            || self.system < previous.system
            || self.idle < previous.idle
            || self.iowait < previous.iowait
            || self.irq < previous.irq
            || self.softirq < previous.softirq
            || self.steal < previous.steal
    }

    /// Busy percentage between `previous` and `self`, None if the window is unusable
    pub fn load_since(&self, previous: &CpuTimes) -> Option<f32> {
        if self.regressed_from(previous) {
            return None;
        }
        let total = self.total() - previous.total();
        if total == 0 {
            return None;
        }
        let idle = self.idle_total() - previous.idle_total();
        let busy = total.saturating_sub(idle);
        Some(((busy as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32)
    }
}

/// Parse the per-core `cpuN` lines of `/proc/stat`
///
/// Returns times indexed by core number for cores `0..core_count`. The
/// aggregate `cpu` line is skipped. Missing trailing fields (older kernels)
/// read as zero.
pub fn parse_proc_stat(content: &str, core_count: usize) -> Result<Vec<CpuTimes>> {
    let mut cores: Vec<Option<CpuTimes>> = vec![None; core_count];

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(l) => l,
            None => continue,
        };
        let index = match label.strip_prefix("cpu") {
            Some(rest) if !rest.is_empty() => match rest.parse::<usize>() {
                Ok(i) => i,
                Err(_) => continue,
            },
            _ => continue,
        };
        if index >= core_count {
            continue;
        }

        let values = fields
            .take(8)
            .map(|f| f.parse::<u64>())
            .collect::<std::result::Result<Vec<u64>, _>>()
            .map_err(|e| DeckvoltError::sensor(label, format!("bad counter: {}", e)))?;
        if values.len() < 4 {
            return Err(DeckvoltError::sensor(
                label,
                format!("expected at least 4 counters, got {}", values.len()),
            ));
        }
        let get = |i: usize| values.get(i).copied().unwrap_or(0);
        cores[index] = Some(CpuTimes {
            user: get(0),
            nice: get(1),
            system: get(2),
            idle: get(3),
            iowait: get(4),
            irq: get(5),
            softirq: get(6),
            steal: get(7),
        });
    }

    cores
        .into_iter()
        .enumerate()
        .map(|(i, times)| {
            times.ok_or_else(|| DeckvoltError::sensor(format!("cpu{}", i), "missing from counters"))
        })
        .collect()
}

/// Supplier of per-core counters
pub trait CounterSource: Send {
    /// Counters for cores `0..core_count`
    fn read(&mut self, core_count: usize) -> Result<Vec<CpuTimes>>;
}

/// Reads counters from a `/proc/stat`-formatted file
#[derive(Debug, Clone)]
pub struct ProcStatSource {
    path: PathBuf,
}

impl ProcStatSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ProcStatSource {
    fn default() -> Self {
        Self::new(paths::PROC_STAT)
    }
}

impl CounterSource for ProcStatSource {
    fn read(&mut self, core_count: usize) -> Result<Vec<CpuTimes>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            DeckvoltError::sensor(self.path.display().to_string(), e.to_string())
        })?;
        parse_proc_stat(&content, core_count)
    }
}

/// Turns successive counter snapshots into per-core load percentages
///
/// Bad samples never fail: the previous load is kept and the sample counted
/// as discarded.
pub struct LoadMonitor<S: CounterSource> {
    source: S,
    core_count: usize,
    previous: Option<Vec<CpuTimes>>,
    loads: Vec<f32>,
    discarded: u64,
}

impl<S: CounterSource> LoadMonitor<S> {
    pub fn new(source: S, core_count: usize) -> Self {
        Self {
            source,
            core_count,
            previous: None,
            loads: vec![0.0; core_count],
            discarded: 0,
        }
    }

    /// Take one sample and return the current per-core loads
    pub fn sample(&mut self) -> &[f32] {
        let current = match self.source.read(self.core_count) {
            Ok(times) if times.len() == self.core_count => times,
            Ok(times) => {
                self.discarded += 1;
                debug!(expected = self.core_count, got = times.len(), "Load sample discarded: core count mismatch");
                return &self.loads;
            }
            Err(e) => {
                self.discarded += 1;
                debug!(error = %e, "Load sample discarded: counters unavailable");
                return &self.loads;
            }
        };

        if let Some(previous) = &self.previous {
            for (core, (now, before)) in current.iter().zip(previous.iter()).enumerate() {
                match now.load_since(before) {
                    Some(load) => self.loads[core] = load,
                    None => {
                        self.discarded += 1;
                        debug!(core, "Load sample discarded: counter reset or empty window");
                    }
                }
            }
        }
        self.previous = Some(current);
        &self.loads
    }

    pub fn loads(&self) -> &[f32] {
        &self.loads
    }

    pub fn discarded_samples(&self) -> u64 {
        self.discarded
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }
}
