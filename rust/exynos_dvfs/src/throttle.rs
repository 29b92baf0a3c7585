// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: thermal and battery throttling
//
// Derives per-cluster frequency ceilings from die temperature and battery
// voltage, escalating to an emergency poweroff when the die gets too hot.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use log::debug;
use log::error;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::error::DvfsError;
use crate::error::Result;
use crate::freq_table::ClusterTable;
use crate::platform::DomainId;
use crate::platform::Platform;
use crate::tunables::TunableValue;

/// Fixed thresholds of one throttler plus the defaults of its tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleParams {
    pub user_max_temp_c: i32,
    pub range_temp_min_c: i32,
    pub tjmax_c: i32,
    pub avoid_shutdown_temp_c: i32,
    pub shutdown_temp_c: i32,
    /// Gap between the calibrated max and min temperatures.
    pub margin_temp_c: i32,
    /// Ratchet applied to the calibrated max on every critical reading.
    pub step_down_temp_c: i32,
    pub bat_down_threshold_mv: i32,
    pub bat_threshold_min_mv: i32,
    pub bat_threshold_max_mv: i32,
    /// Hysteresis between the battery down and up thresholds.
    pub bat_threshold_margin_mv: i32,
    /// Starting value of the lowest-voltage tracker.
    pub bat_peak_initial_mv: i32,
    pub sleep_ms: u64,
}

impl Default for ThrottleParams {
    fn default() -> Self {
        Self {
            user_max_temp_c: 60,
            range_temp_min_c: 45,
            tjmax_c: 100,
            avoid_shutdown_temp_c: 110,
            shutdown_temp_c: 115,
            margin_temp_c: 10,
            step_down_temp_c: 5,
            bat_down_threshold_mv: 3300,
            bat_threshold_min_mv: 3300,
            bat_threshold_max_mv: 3600,
            bat_threshold_margin_mv: 100,
            bat_peak_initial_mv: 4400,
            sleep_ms: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleLevel {
    #[default]
    Normal,
    Warn,
    Critical,
    Shutdown,
}

impl fmt::Display for ThrottleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThrottleLevel::Normal => "normal",
            ThrottleLevel::Warn => "warn",
            ThrottleLevel::Critical => "critical",
            ThrottleLevel::Shutdown => "shutdown",
        })
    }
}

/// One clock domain under a throttler, in throttle order.
#[derive(Debug, Clone)]
pub struct ThrottleCluster {
    pub domain: DomainId,
    pub table: Arc<ClusterTable>,
    pub hw_max_khz: u32,
    /// Step forced on a critical reading, even when the cluster is already
    /// throttled below it. `None` leaves the cluster alone.
    pub critical_index: Option<usize>,
    /// The first warn step from above this index lands on it directly.
    pub fast_drop_index: Option<usize>,
}

impl ThrottleCluster {
    fn top_index(&self) -> usize {
        self.table
            .floor(self.hw_max_khz)
            .and_then(|f| self.table.index_of(f))
            .unwrap_or(self.table.len() - 1)
    }

    fn ceiling(&self, index: usize) -> u32 {
        self.table
            .frequency(index)
            .unwrap_or_else(|| self.table.highest())
            .min(self.hw_max_khz)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterLimit {
    pub domain: DomainId,
    pub index: usize,
    pub khz: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleState {
    pub level: ThrottleLevel,
    pub current_temp_c: i32,
    pub peak_temp_c: i32,
    pub current_battery_mv: i32,
    /// Lowest battery voltage seen, i.e. the deepest sag.
    pub peak_battery_mv: i32,
    pub user_max_temp_c: i32,
    pub calibrated_max_temp_c: i32,
    pub calibrated_min_temp_c: i32,
    pub bat_down_threshold_mv: i32,
    pub bat_up_threshold_mv: i32,
    pub limits: Vec<ClusterLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleTunables {
    pub user_max_temp_c: i32,
    pub bat_down_threshold_mv: i32,
    pub sleep_ms: u64,
}

/// Tunables and published status of one throttler, shared with the control
/// surface. Every accepted write bumps the generation; the polling task
/// recalibrates when it sees a new one.
pub struct ThrottleControl {
    params: ThrottleParams,
    tunables: RwLock<ThrottleTunables>,
    status: RwLock<ThrottleState>,
    generation: AtomicU64,
}

const CONTROL_ATTRIBUTES: &[&str] = &[
    "dvfs_max_temp",
    "dvfs_bat_down_threshold",
    "dvfs_sleep_time",
    "dvfs_level",
    "dvfs_temp",
    "dvfs_peak_temp",
    "dvfs_bat_vol",
    "dvfs_bat_peak_vol",
    "dvfs_bat_up_threshold",
    "dvfs_cal_max_temp",
    "dvfs_cal_min_temp",
    "dvfs_tjmax",
    "dvfs_avoid_shutdown_temp",
    "dvfs_shutdown_temp",
    "dvfs_limit",
];

impl ThrottleControl {
    pub fn new(params: ThrottleParams) -> Self {
        let tunables = ThrottleTunables {
            user_max_temp_c: params.user_max_temp_c,
            bat_down_threshold_mv: params.bat_down_threshold_mv,
            sleep_ms: params.sleep_ms,
        };
        Self {
            params,
            tunables: RwLock::new(tunables),
            status: RwLock::new(ThrottleState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &ThrottleParams {
        &self.params
    }

    pub fn tunables(&self) -> ThrottleTunables {
        *self.tunables.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ThrottleState {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn publish(&self, state: &ThrottleState) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
    }

    pub fn attributes(&self) -> &'static [&'static str] {
        CONTROL_ATTRIBUTES
    }

    pub fn get(&self, name: &str) -> Result<String> {
        let t = self.tunables();
        let s = self.status();
        let p = &self.params;
        Ok(match name {
            "dvfs_max_temp" => t.user_max_temp_c.to_string(),
            "dvfs_bat_down_threshold" => t.bat_down_threshold_mv.to_string(),
            "dvfs_sleep_time" => t.sleep_ms.to_string(),
            "dvfs_level" => s.level.to_string(),
            "dvfs_temp" => s.current_temp_c.to_string(),
            "dvfs_peak_temp" => s.peak_temp_c.to_string(),
            "dvfs_bat_vol" => s.current_battery_mv.to_string(),
            "dvfs_bat_peak_vol" => s.peak_battery_mv.to_string(),
            "dvfs_bat_up_threshold" => s.bat_up_threshold_mv.to_string(),
            "dvfs_cal_max_temp" => s.calibrated_max_temp_c.to_string(),
            "dvfs_cal_min_temp" => s.calibrated_min_temp_c.to_string(),
            "dvfs_tjmax" => p.tjmax_c.to_string(),
            "dvfs_avoid_shutdown_temp" => p.avoid_shutdown_temp_c.to_string(),
            "dvfs_shutdown_temp" => p.shutdown_temp_c.to_string(),
            "dvfs_limit" => s
                .limits
                .iter()
                .map(|l| format!("{}:{}", l.domain, l.khz))
                .collect::<Vec<_>>()
                .join(" "),
            _ => return Err(DvfsError::UnknownTunable(name.to_string())),
        })
    }

    pub fn set(&self, name: &str, raw: &str) -> Result<TunableValue> {
        let p = &self.params;
        let parse = |lo: i64, hi: i64| -> Result<i64> {
            let v: i64 = raw
                .trim()
                .parse()
                .map_err(|_| DvfsError::invalid(name, raw.trim(), "expected an integer"))?;
            if v < lo || v > hi {
                return Err(DvfsError::invalid(
                    name,
                    v,
                    format!("must be within [{}, {}]", lo, hi),
                ));
            }
            Ok(v)
        };

        let mut t = self.tunables.write().unwrap_or_else(PoisonError::into_inner);
        let accepted = match name {
            "dvfs_max_temp" => {
                let v = parse(p.range_temp_min_c as i64, p.tjmax_c as i64)? as i32;
                t.user_max_temp_c = v;
                v as u32
            }
            "dvfs_bat_down_threshold" => {
                let v = parse(p.bat_threshold_min_mv as i64, p.bat_threshold_max_mv as i64)? as i32;
                t.bat_down_threshold_mv = v;
                v as u32
            }
            "dvfs_sleep_time" => {
                let v = parse(1, 1000)? as u64;
                t.sleep_ms = v;
                v as u32
            }
            n if CONTROL_ATTRIBUTES.contains(&n) => {
                return Err(DvfsError::ReadOnlyTunable(name.to_string()))
            }
            _ => return Err(DvfsError::UnknownTunable(name.to_string())),
        };
        drop(t);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(TunableValue::Number(accepted))
    }
}

/// Serializes the poweroff sequence across every throttler in the process.
#[derive(Default)]
pub struct PoweroffLatch {
    fired: Mutex<bool>,
}

impl PoweroffLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the emergency poweroff, then attempt the orderly one. Runs at
    /// most once; returns false if another throttler already did it.
    pub fn fire(&self, platform: &dyn Platform, who: &str) -> bool {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        if *fired {
            return false;
        }
        *fired = true;
        error!("{}: shutting down ...", who);
        if let Err(e) = platform.emergency_poweroff() {
            error!("{}: failed to queue emergency poweroff: {}", who, e);
        }
        if let Err(e) = platform.orderly_poweroff(true) {
            error!("{}: orderly poweroff failed: {}", who, e);
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Reading identical to the previous one; nothing was recomputed.
    Skipped,
    Evaluated {
        level: ThrottleLevel,
        /// Ceilings that moved, to be pushed to the platform.
        changed: Vec<(DomainId, u32)>,
    },
    /// Terminal. Ceilings are at the bottom and poweroff must be issued.
    Shutdown { changed: Vec<(DomainId, u32)> },
}

/// Temperature/battery state machine for one thermal zone.
pub struct ThermalBatteryThrottler {
    name: String,
    zone: String,
    params: ThrottleParams,
    control: Arc<ThrottleControl>,
    clusters: Vec<ThrottleCluster>,
    limit_idx: Vec<usize>,
    state: ThrottleState,
    prev_reading: Option<(i32, i32)>,
    generation: u64,
}

impl ThermalBatteryThrottler {
    pub fn new(
        name: impl Into<String>,
        zone: impl Into<String>,
        control: Arc<ThrottleControl>,
        clusters: Vec<ThrottleCluster>,
    ) -> Result<Self> {
        let name = name.into();
        if clusters.is_empty() {
            return Err(DvfsError::Config(format!("{}: no clusters to throttle", name)));
        }
        for c in &clusters {
            for idx in [c.critical_index, c.fast_drop_index].into_iter().flatten() {
                if idx >= c.table.len() {
                    return Err(DvfsError::Config(format!(
                        "{}: step {} out of range for {}",
                        name, idx, c.domain
                    )));
                }
            }
        }
        let params = control.params().clone();
        let limit_idx = clusters.iter().map(|c| c.top_index()).collect();
        let mut t = Self {
            name,
            zone: zone.into(),
            state: ThrottleState {
                peak_battery_mv: params.bat_peak_initial_mv,
                ..Default::default()
            },
            params,
            generation: control.generation(),
            control,
            clusters,
            limit_idx,
            prev_reading: None,
        };
        t.sanitize(false);
        Ok(t)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    pub fn clusters(&self) -> &[ThrottleCluster] {
        &self.clusters
    }

    pub fn control(&self) -> &Arc<ThrottleControl> {
        &self.control
    }

    pub fn ceilings(&self) -> Vec<(DomainId, u32)> {
        self.clusters
            .iter()
            .zip(&self.limit_idx)
            .map(|(c, &i)| (c.domain.clone(), c.ceiling(i)))
            .collect()
    }

    /// Adopt the platform's maximum for `domain`. Takes effect at the next
    /// `sanitize(false)`.
    pub fn set_hw_max(&mut self, domain: &DomainId, khz: u32) {
        if let Some(c) = self.clusters.iter_mut().find(|c| &c.domain == domain) {
            c.hw_max_khz = khz;
        }
    }

    fn refresh_limits(&mut self) {
        self.state.limits = self
            .clusters
            .iter()
            .zip(&self.limit_idx)
            .map(|(c, &index)| ClusterLimit {
                domain: c.domain.clone(),
                index,
                khz: c.ceiling(index),
            })
            .collect();
    }

    /// `false` recalibrates from the user tunables and lifts every ceiling.
    /// `true` tightens the calibrated max temperature by one step.
    /// Returns the ceilings that moved.
    pub fn sanitize(&mut self, tighten: bool) -> Vec<(DomainId, u32)> {
        let before = self.ceilings();
        if !tighten {
            let t = self.control.tunables();
            self.state.user_max_temp_c = t.user_max_temp_c;
            self.state.calibrated_max_temp_c = t.user_max_temp_c;
            self.state.peak_temp_c = 0;
            self.limit_idx = self.clusters.iter().map(|c| c.top_index()).collect();
            self.state.bat_down_threshold_mv = t.bat_down_threshold_mv;
            self.state.bat_up_threshold_mv = t.bat_down_threshold_mv + self.params.bat_threshold_margin_mv;
        } else {
            self.state.calibrated_max_temp_c = self
                .state
                .calibrated_max_temp_c
                .saturating_sub(self.params.step_down_temp_c);
        }
        self.state.calibrated_min_temp_c = self
            .state
            .calibrated_max_temp_c
            .saturating_sub(self.params.margin_temp_c);
        self.refresh_limits();
        self.diff(&before)
    }

    /// Recalibrate if the control surface accepted a write since last time.
    pub fn sync_tunables(&mut self) -> Option<Vec<(DomainId, u32)>> {
        let g = self.control.generation();
        if g == self.generation {
            return None;
        }
        self.generation = g;
        info!("{}: tunables changed, recalibrating", self.name);
        Some(self.sanitize(false))
    }

    fn diff(&self, before: &[(DomainId, u32)]) -> Vec<(DomainId, u32)> {
        self.ceilings()
            .into_iter()
            .zip(before)
            .filter(|(now, was)| now.1 != was.1)
            .map(|(now, _)| now)
            .collect()
    }

    /// Lower one cluster by one step, walking clusters in throttle order.
    fn step_down_one(&mut self) {
        for (c, idx) in self.clusters.iter().zip(self.limit_idx.iter_mut()) {
            if *idx == 0 {
                continue;
            }
            *idx = match c.fast_drop_index {
                Some(fd) if *idx > fd => fd,
                _ => *idx - 1,
            };
            return;
        }
    }

    fn step_up_all(&mut self) {
        for (c, idx) in self.clusters.iter().zip(self.limit_idx.iter_mut()) {
            *idx = (*idx + 1).min(c.top_index());
        }
    }

    /// Evaluate one (temperature, battery) reading.
    pub fn poll(&mut self, temp_c: i32, battery_mv: i32) -> PollOutcome {
        if self.state.level == ThrottleLevel::Shutdown {
            return PollOutcome::Skipped;
        }
        if self.prev_reading == Some((temp_c, battery_mv)) {
            return PollOutcome::Skipped;
        }
        self.prev_reading = Some((temp_c, battery_mv));

        let before = self.ceilings();
        let s = &mut self.state;
        s.current_temp_c = temp_c;
        s.current_battery_mv = battery_mv;
        s.peak_temp_c = s.peak_temp_c.max(temp_c);
        s.peak_battery_mv = s.peak_battery_mv.min(battery_mv);

        let p = &self.params;
        if temp_c >= p.shutdown_temp_c {
            error!(
                "{}: shutdown temperature {} C reached, current {} C, calibrated max {} C",
                self.name, p.shutdown_temp_c, temp_c, self.state.calibrated_max_temp_c
            );
            self.sanitize(true);
            self.limit_idx.iter_mut().for_each(|i| *i = 0);
            self.state.level = ThrottleLevel::Shutdown;
            self.refresh_limits();
            return PollOutcome::Shutdown {
                changed: self.diff(&before),
            };
        }

        let level = if temp_c >= p.avoid_shutdown_temp_c {
            warn!(
                "{}: avoid-shutdown temperature {} C reached, current {} C, calibrating max {} C -> {} C",
                self.name,
                p.avoid_shutdown_temp_c,
                temp_c,
                self.state.calibrated_max_temp_c,
                self.state.calibrated_max_temp_c - p.step_down_temp_c
            );
            self.sanitize(true);
            for (c, idx) in self.clusters.iter().zip(self.limit_idx.iter_mut()) {
                if let Some(ci) = c.critical_index {
                    *idx = ci;
                }
            }
            ThrottleLevel::Critical
        } else if temp_c >= self.state.calibrated_max_temp_c
            || battery_mv < self.state.bat_down_threshold_mv
        {
            self.step_down_one();
            ThrottleLevel::Warn
        } else if temp_c <= self.state.calibrated_min_temp_c
            && battery_mv > self.state.bat_up_threshold_mv
        {
            self.step_up_all();
            ThrottleLevel::Normal
        } else {
            ThrottleLevel::Normal
        };

        self.state.level = level;
        self.refresh_limits();
        let changed = self.diff(&before);
        if !changed.is_empty() {
            debug!("{}: {} at {} C / {} mV -> {:?}", self.name, level, temp_c, battery_mv, changed);
        }
        PollOutcome::Evaluated { level, changed }
    }
}
