// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: load estimation from idle accounting
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use log::warn;

use crate::error::Result;
use crate::platform::IdleStats;
use crate::platform::Platform;
use crate::tunables::Tunables;

/// Tracks the previous idle snapshot of every unit in a domain and turns the
/// deltas into a busy percentage.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    units: Vec<usize>,
    prev: Vec<Option<IdleStats>>,
}

/// Busy percentage between two snapshots, `None` when the window is empty or
/// inconsistent.
pub fn load_between(prev: &IdleStats, cur: &IdleStats, t: &Tunables) -> Option<u32> {
    let wall = cur.wall_us.saturating_sub(prev.wall_us);
    let mut idle = cur.idle_us.saturating_sub(prev.idle_us);
    if !t.io_is_busy {
        idle += cur.iowait_us.saturating_sub(prev.iowait_us);
    }
    if t.ignore_nice_load {
        idle += cur.nice_us.saturating_sub(prev.nice_us);
    }
    if wall == 0 || wall < idle {
        return None;
    }
    Some((100 * (wall - idle) / wall) as u32)
}

impl LoadTracker {
    pub fn new(units: Vec<usize>) -> Self {
        let prev = vec![None; units.len()];
        Self { units, prev }
    }

    pub fn units(&self) -> &[usize] {
        &self.units
    }

    /// Forget every baseline; the next `sample()` only primes.
    pub fn reset(&mut self) {
        self.prev.iter_mut().for_each(|p| *p = None);
    }

    /// Take one snapshot of every unit and return the busiest unit's load.
    /// Units that fail to report or have no usable window are skipped.
    pub fn sample(&mut self, platform: &dyn Platform, t: &Tunables) -> Result<Option<u32>> {
        let mut max_load: Option<u32> = None;
        for (unit, prev) in self.units.iter().zip(self.prev.iter_mut()) {
            let cur = match platform.idle_stats(*unit) {
                Ok(s) => s,
                Err(e) => {
                    warn!("idle stats for unit {} unavailable: {}", unit, e);
                    continue;
                }
            };
            if let Some(p) = prev.replace(cur) {
                if let Some(load) = load_between(&p, &cur, t) {
                    max_load = Some(max_load.map_or(load, |m| m.max(load)));
                }
            }
        }
        Ok(max_load)
    }
}
