// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: in-memory platform
//
// A deterministic stand-in for the SoC: clock domains snap requests onto
// their table, load units accumulate idle time from a scripted load, and a
// first-order thermal model heats the die in proportion to how hard the
// domains are being driven.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::config::DvfsConfig;
use crate::error::DvfsError;
use crate::error::Result;
use crate::freq_table::ClusterTable;
use crate::freq_table::Relation;
use crate::platform::DomainId;
use crate::platform::IdleStats;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalModel {
    pub ambient_c: f64,
    /// Heating rate in C/s with every domain at full load and top frequency.
    pub heat_c_per_s: f64,
    /// Fraction of the excess over ambient shed per second.
    pub cooling_per_s: f64,
}

impl Default for ThermalModel {
    fn default() -> Self {
        Self {
            ambient_c: 30.0,
            heat_c_per_s: 12.0,
            cooling_per_s: 0.25,
        }
    }
}

/// One step of a scripted run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    pub duration_ms: u64,
    /// Pin every sensor to this reading instead of the thermal model.
    pub temp_c: Option<i32>,
    pub battery_mv: Option<i32>,
    /// Busy percentage per domain name. Domains not listed keep theirs.
    pub load: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub battery_mv: i32,
    pub thermal: ThermalModel,
    pub phases: Vec<Phase>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let load = |little: u32, big: u32, gpu: u32| {
            BTreeMap::from([
                ("little".to_string(), little),
                ("big".to_string(), big),
                ("gpu".to_string(), gpu),
            ])
        };
        Self {
            battery_mv: 4000,
            thermal: ThermalModel::default(),
            phases: vec![
                Phase {
                    duration_ms: 2000,
                    load: load(10, 5, 0),
                    ..Default::default()
                },
                Phase {
                    duration_ms: 8000,
                    load: load(90, 100, 80),
                    ..Default::default()
                },
                Phase {
                    duration_ms: 4000,
                    load: load(20, 10, 5),
                    ..Default::default()
                },
            ],
        }
    }
}

/// Phases laid end to end.
#[derive(Debug, Clone)]
pub struct Scenario {
    phases: Vec<Phase>,
}

impl Scenario {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.phases.iter().map(|p| p.duration_ms).sum())
    }

    /// Index and phase active at `elapsed`; `None` once the script ran out.
    pub fn phase_at(&self, elapsed: Duration) -> Option<(usize, &Phase)> {
        let mut end = Duration::ZERO;
        for (i, p) in self.phases.iter().enumerate() {
            end += Duration::from_millis(p.duration_ms);
            if elapsed < end {
                return Some((i, p));
            }
        }
        None
    }
}

struct SimDomain {
    table: Arc<ClusterTable>,
    cur: u32,
    ceiling: Option<u32>,
    units: Vec<usize>,
    load_pct: u32,
}

impl SimDomain {
    fn cap(&self) -> u32 {
        match self.ceiling {
            Some(c) => self.table.floor(c).unwrap_or_else(|| self.table.lowest()),
            None => self.table.highest(),
        }
    }
}

struct SimState {
    domains: HashMap<DomainId, SimDomain>,
    units: BTreeMap<usize, IdleStats>,
    temp_c: f64,
    pinned_temp_c: Option<i32>,
    battery_mv: i32,
    fail_requests: bool,
    sensor_offline: bool,
    elapsed: Duration,
    emergency_calls: u64,
    orderly_calls: u64,
}

pub struct SimPlatform {
    thermal: ThermalModel,
    state: Mutex<SimState>,
}

impl SimPlatform {
    pub fn new(thermal: ThermalModel, battery_mv: i32) -> Self {
        let temp_c = thermal.ambient_c;
        Self {
            thermal,
            state: Mutex::new(SimState {
                domains: HashMap::new(),
                units: BTreeMap::new(),
                temp_c,
                pinned_temp_c: None,
                battery_mv,
                fail_requests: false,
                sensor_offline: false,
                elapsed: Duration::ZERO,
                emergency_calls: 0,
                orderly_calls: 0,
            }),
        }
    }

    /// Every governed or throttled domain of `config`, booted at max.
    pub fn from_config(config: &DvfsConfig) -> Result<Self> {
        let p = Self::new(config.sim.thermal.clone(), config.sim.battery_mv);
        for d in &config.domains {
            p.add_domain(&d.name, config.domain_table(d)?, &config.units(d)?);
        }
        for c in config.throttlers.iter().flat_map(|t| &t.clusters) {
            if config.domain(&c.domain).is_none() && p.frequency(&c.domain).is_none() {
                p.add_domain(&c.domain, config.throttle_table(c)?, &[]);
            }
        }
        Ok(p)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a clock domain. It boots at the top of its table.
    pub fn add_domain(&self, name: &str, table: Arc<ClusterTable>, units: &[usize]) {
        let mut s = self.lock();
        for u in units {
            s.units.entry(*u).or_default();
        }
        s.domains.insert(
            DomainId::new(name),
            SimDomain {
                cur: table.highest(),
                table,
                ceiling: None,
                units: units.to_vec(),
                load_pct: 0,
            },
        );
    }

    pub fn set_load(&self, domain: &str, pct: u32) -> Result<()> {
        let mut s = self.lock();
        let d = s
            .domains
            .get_mut(&DomainId::new(domain))
            .ok_or_else(|| DvfsError::UnknownDomain(domain.to_string()))?;
        d.load_pct = pct.min(100);
        Ok(())
    }

    pub fn pin_temperature(&self, temp_c: Option<i32>) {
        self.lock().pinned_temp_c = temp_c;
    }

    pub fn set_battery_mv(&self, mv: i32) {
        self.lock().battery_mv = mv;
    }

    pub fn set_fail_requests(&self, fail: bool) {
        self.lock().fail_requests = fail;
    }

    pub fn set_sensor_offline(&self, offline: bool) {
        self.lock().sensor_offline = offline;
    }

    pub fn apply_phase(&self, phase: &Phase) {
        for (domain, pct) in &phase.load {
            if let Err(e) = self.set_load(domain, *pct) {
                warn!("scenario: {}", e);
            }
        }
        let mut s = self.lock();
        s.pinned_temp_c = phase.temp_c;
        if let Some(mv) = phase.battery_mv {
            s.battery_mv = mv;
        }
    }

    /// Move simulated time forward: accumulate idle time and integrate
    /// the thermal model.
    pub fn advance(&self, dt: Duration) {
        let mut s = self.lock();
        let dt_us = dt.as_micros() as u64;
        let mut power = 0.0;
        let n = s.domains.len().max(1) as f64;
        let loads: Vec<(Vec<usize>, u32)> = s
            .domains
            .values()
            .map(|d| (d.units.clone(), d.load_pct))
            .collect();
        for d in s.domains.values() {
            power += (d.cur as f64 / d.table.highest() as f64) * (d.load_pct as f64 / 100.0);
        }
        for (units, load) in loads {
            for u in units {
                if let Some(st) = s.units.get_mut(&u) {
                    st.wall_us += dt_us;
                    st.idle_us += dt_us * (100 - load as u64) / 100;
                }
            }
        }

        let secs = dt.as_secs_f64();
        let m = &self.thermal;
        let excess = s.temp_c - m.ambient_c;
        s.temp_c += (m.heat_c_per_s * power / n - m.cooling_per_s * excess) * secs;
        s.elapsed += dt;
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    pub fn temperature(&self) -> f64 {
        self.lock().temp_c
    }

    pub fn frequency(&self, domain: &str) -> Option<u32> {
        self.lock().domains.get(&DomainId::new(domain)).map(|d| d.cur)
    }

    pub fn ceiling(&self, domain: &str) -> Option<u32> {
        self.lock().domains.get(&DomainId::new(domain)).and_then(|d| d.ceiling)
    }

    pub fn emergency_calls(&self) -> u64 {
        self.lock().emergency_calls
    }

    pub fn orderly_calls(&self) -> u64 {
        self.lock().orderly_calls
    }

    fn with_domain<T>(&self, domain: &DomainId, f: impl FnOnce(&mut SimDomain) -> T) -> Result<T> {
        let mut s = self.lock();
        let d = s
            .domains
            .get_mut(domain)
            .ok_or_else(|| DvfsError::UnknownDomain(domain.to_string()))?;
        Ok(f(d))
    }
}

impl Platform for SimPlatform {
    fn current_frequency(&self, domain: &DomainId) -> Result<u32> {
        self.with_domain(domain, |d| d.cur)
    }

    fn min_frequency(&self, domain: &DomainId) -> Result<u32> {
        self.with_domain(domain, |d| d.table.lowest())
    }

    fn max_frequency(&self, domain: &DomainId) -> Result<u32> {
        self.with_domain(domain, |d| d.table.highest())
    }

    fn request_frequency(&self, domain: &DomainId, target_khz: u32, relation: Relation) -> Result<u32> {
        if self.lock().fail_requests {
            return Err(DvfsError::PlatformRequestFailed {
                domain: domain.clone(),
                target_khz,
                reason: "simulated failure".to_string(),
            });
        }
        self.with_domain(domain, |d| {
            d.cur = d.table.resolve(target_khz, relation).min(d.cap());
            d.cur
        })
    }

    fn set_frequency_ceiling(&self, domain: &DomainId, ceiling_khz: u32) -> Result<()> {
        self.with_domain(domain, |d| {
            d.ceiling = Some(ceiling_khz);
            d.cur = d.cur.min(d.cap());
        })
    }

    fn idle_stats(&self, unit: usize) -> Result<IdleStats> {
        self.lock()
            .units
            .get(&unit)
            .copied()
            .ok_or_else(|| DvfsError::UnknownDomain(format!("unit {}", unit)))
    }

    fn read_temperature_c(&self, zone: &str) -> Result<i32> {
        let s = self.lock();
        if s.sensor_offline {
            return Err(DvfsError::PlatformNotReady(format!("{} sensor offline", zone)));
        }
        Ok(s.pinned_temp_c.unwrap_or(s.temp_c.round() as i32))
    }

    fn read_battery_mv(&self) -> Result<i32> {
        Ok(self.lock().battery_mv)
    }

    fn emergency_poweroff(&self) -> Result<()> {
        self.lock().emergency_calls += 1;
        info!("sim: emergency poweroff queued");
        Ok(())
    }

    fn orderly_poweroff(&self, force: bool) -> Result<()> {
        self.lock().orderly_calls += 1;
        info!("sim: orderly poweroff (force={})", force);
        Ok(())
    }
}
