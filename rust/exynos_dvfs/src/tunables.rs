// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: governor tunables
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Duration;

use crossbeam::channel::Sender;
use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;

use crate::error::DvfsError;
use crate::error::Result;
use crate::freq_table::ClusterTable;
use crate::scheduler::TaskSignal;

/// Scheduler tick assumed for the jiffy-derived minimum sampling rates (HZ=250).
pub const JIFFY_US: u32 = 4000;
/// Default sampling rate is the transition latency times this.
pub const LATENCY_MULTIPLIER: u32 = 1000;
/// Step used by the percentage variant when `freq_step * max / 100` rounds to zero.
pub const DEF_FREQUENCY_STEP: u32 = 5;

const UP_THRESHOLD_SUSPEND: u32 = 95;
const BOOST_SUSPEND: bool = false;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GovernorKind {
    /// Table stepping, one entry per tick.
    Conservative,
    /// Fixed percentage of max per tick, decoupled from the table.
    ConservativeStep,
    Ondemand,
}

/// Per-variant bounds and defaults.
#[derive(Debug, Clone, Copy)]
pub struct TunableLimits {
    pub up_threshold_min: u32,
    pub up_threshold_max: u32,
    pub default_up_threshold: u32,
    pub down_margin: u32,
    pub default_sampling_down_factor: u32,
    pub max_sampling_down_factor: u32,
    pub min_sampling_rate_us: u32,
    pub default_boost: bool,
}

impl GovernorKind {
    pub fn name(self) -> &'static str {
        match self {
            GovernorKind::Conservative => "conservative",
            GovernorKind::ConservativeStep => "conservative-step",
            GovernorKind::Ondemand => "ondemand",
        }
    }

    pub fn limits(self) -> TunableLimits {
        match self {
            GovernorKind::Conservative => TunableLimits {
                up_threshold_min: 40,
                up_threshold_max: 100,
                default_up_threshold: 75,
                down_margin: 25,
                default_sampling_down_factor: 2,
                max_sampling_down_factor: 10,
                min_sampling_rate_us: 2 * 10 * JIFFY_US,
                default_boost: true,
            },
            GovernorKind::ConservativeStep => TunableLimits {
                up_threshold_min: 30,
                up_threshold_max: 100,
                default_up_threshold: 80,
                down_margin: 15,
                default_sampling_down_factor: 1,
                max_sampling_down_factor: 10,
                min_sampling_rate_us: 2 * 10 * JIFFY_US,
                default_boost: false,
            },
            GovernorKind::Ondemand => TunableLimits {
                up_threshold_min: 45,
                up_threshold_max: 100,
                default_up_threshold: 95,
                down_margin: 25,
                default_sampling_down_factor: 50,
                max_sampling_down_factor: 100_000,
                min_sampling_rate_us: 10_000,
                default_boost: false,
            },
        }
    }

    /// Attribute names exposed on the control surface, read-only ones included.
    pub fn attributes(self) -> &'static [&'static str] {
        match self {
            GovernorKind::Conservative => &[
                "up_threshold",
                "down_threshold",
                "sampling_down_factor",
                "sampling_rate",
                "sampling_rate_min",
                "ignore_nice_load",
                "boost",
            ],
            GovernorKind::ConservativeStep => &[
                "up_threshold",
                "down_threshold",
                "sampling_down_factor",
                "sampling_rate",
                "sampling_rate_min",
                "ignore_nice_load",
                "freq_step",
            ],
            GovernorKind::Ondemand => &[
                "up_threshold",
                "down_threshold",
                "sampling_down_factor",
                "sampling_rate",
                "sampling_rate_min",
                "ignore_nice_load",
                "io_is_busy",
                "boost",
                "powersave_bias",
            ],
        }
    }
}

impl fmt::Display for GovernorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value accepted by a control surface write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TunableValue {
    Number(u32),
    Flag(bool),
    Text(String),
}

impl fmt::Display for TunableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunableValue::Number(n) => write!(f, "{}", n),
            TunableValue::Flag(b) => write!(f, "{}", *b as u8),
            TunableValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunables {
    pub up_threshold: u32,
    /// Derived from `up_threshold` and the first two steps of the reference
    /// table.
    pub down_threshold: u32,
    pub sampling_down_factor: u32,
    pub sampling_rate_us: u32,
    pub ignore_nice_load: bool,
    pub io_is_busy: bool,
    pub boost: bool,
    /// Percent of max moved per tick (percentage variant only).
    pub freq_step: u32,
    /// Per-mille reduction applied to ondemand targets. 0 disables sub-sampling.
    pub powersave_bias: u32,
}

impl Tunables {
    /// `reference` supplies the two steps `down_threshold` is derived from.
    pub fn defaults(kind: GovernorKind, reference: &ClusterTable, transition_latency_us: u32) -> Self {
        let lim = kind.limits();
        let latency = transition_latency_us.max(1);
        let up = lim.default_up_threshold;
        Self {
            up_threshold: up,
            down_threshold: reference.derived_down_threshold(up, lim.down_margin),
            sampling_down_factor: lim.default_sampling_down_factor,
            sampling_rate_us: lim
                .min_sampling_rate_us
                .max(latency.saturating_mul(LATENCY_MULTIPLIER)),
            ignore_nice_load: false,
            io_is_busy: false,
            boost: lim.default_boost,
            freq_step: DEF_FREQUENCY_STEP,
            powersave_bias: 0,
        }
    }

    pub fn sampling_rate(&self) -> Duration {
        Duration::from_micros(self.sampling_rate_us as u64)
    }
}

/// Optional per-domain overrides read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunableOverrides {
    pub up_threshold: Option<u32>,
    pub sampling_down_factor: Option<u32>,
    pub sampling_rate_us: Option<u32>,
    pub ignore_nice_load: Option<bool>,
    pub io_is_busy: Option<bool>,
    pub boost: Option<bool>,
    pub freq_step: Option<u32>,
    pub powersave_bias: Option<u32>,
}

impl TunableOverrides {
    fn writes(&self) -> Vec<(&'static str, String)> {
        let mut w = Vec::new();
        let flag = |b: bool| (b as u8).to_string();
        if let Some(v) = self.up_threshold {
            w.push(("up_threshold", v.to_string()));
        }
        if let Some(v) = self.sampling_down_factor {
            w.push(("sampling_down_factor", v.to_string()));
        }
        if let Some(v) = self.sampling_rate_us {
            w.push(("sampling_rate", v.to_string()));
        }
        if let Some(v) = self.ignore_nice_load {
            w.push(("ignore_nice_load", flag(v)));
        }
        if let Some(v) = self.io_is_busy {
            w.push(("io_is_busy", flag(v)));
        }
        if let Some(v) = self.boost {
            w.push(("boost", flag(v)));
        }
        if let Some(v) = self.freq_step {
            w.push(("freq_step", v.to_string()));
        }
        if let Some(v) = self.powersave_bias {
            w.push(("powersave_bias", v.to_string()));
        }
        w
    }
}

/// Counters bumped by writes that sampling tasks must react to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunableEpochs {
    /// `sampling_down_factor` changed: every `rate_mult` goes back to 1.
    pub rate_mult: u64,
    /// `ignore_nice_load` or `io_is_busy` changed: idle baselines are stale.
    pub load: u64,
}

struct TunableCell {
    current: Tunables,
    /// Values to restore on resume while the suspend profile is applied.
    resume: Option<Tunables>,
    epochs: TunableEpochs,
    listeners: Vec<Sender<TaskSignal>>,
}

/// Tunables of one governor instance, shared between its sampling task and
/// the control surface. Writes are validated and derived fields recomputed
/// under the write lock, so a reader never sees `up_threshold` and
/// `down_threshold` out of step.
#[derive(Clone)]
pub struct SharedTunables {
    kind: GovernorKind,
    table: Arc<ClusterTable>,
    /// Source of `down_threshold`. Several clusters can share one so they
    /// decrease at the same load.
    reference: Arc<ClusterTable>,
    inner: Arc<RwLock<TunableCell>>,
}

fn parse_u32(name: &str, raw: &str) -> Result<u32> {
    let raw = raw.trim();
    match raw {
        "true" | "Y" | "y" => return Ok(1),
        "false" | "N" | "n" => return Ok(0),
        _ => {}
    }
    raw.parse::<u32>()
        .map_err(|_| DvfsError::invalid(name, raw, "expected an unsigned integer"))
}

impl SharedTunables {
    pub fn new(
        kind: GovernorKind,
        table: Arc<ClusterTable>,
        transition_latency_us: u32,
        overrides: &TunableOverrides,
    ) -> Result<Self> {
        Self::with_reference(kind, table.clone(), table, transition_latency_us, overrides)
    }

    /// Like [`SharedTunables::new`], deriving `down_threshold` from
    /// `reference` instead of the domain's own table.
    pub fn with_reference(
        kind: GovernorKind,
        table: Arc<ClusterTable>,
        reference: Arc<ClusterTable>,
        transition_latency_us: u32,
        overrides: &TunableOverrides,
    ) -> Result<Self> {
        let current = Tunables::defaults(kind, &reference, transition_latency_us);
        let t = Self {
            kind,
            table,
            reference,
            inner: Arc::new(RwLock::new(TunableCell {
                current,
                resume: None,
                epochs: TunableEpochs::default(),
                listeners: Vec::new(),
            })),
        };
        for (name, value) in overrides.writes() {
            if !kind.attributes().contains(&name) {
                return Err(DvfsError::Config(format!(
                    "{} does not support {}",
                    kind, name
                )));
            }
            t.set(name, &value)?;
        }
        Ok(t)
    }

    fn read(&self) -> RwLockReadGuard<'_, TunableCell> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TunableCell> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> GovernorKind {
        self.kind
    }

    pub fn table(&self) -> &Arc<ClusterTable> {
        &self.table
    }

    pub fn snapshot(&self) -> Tunables {
        self.read().current
    }

    pub fn snapshot_with_epochs(&self) -> (Tunables, TunableEpochs) {
        let cell = self.read();
        (cell.current, cell.epochs)
    }

    pub fn is_suspended(&self) -> bool {
        self.read().resume.is_some()
    }

    /// Register a sampling task to be woken when `sampling_rate` shrinks.
    pub fn subscribe(&self, tx: Sender<TaskSignal>) {
        self.write().listeners.push(tx);
    }

    fn derive_down(&self, t: &mut Tunables) {
        t.down_threshold = self
            .reference
            .derived_down_threshold(t.up_threshold, self.kind.limits().down_margin);
    }

    pub fn get(&self, name: &str) -> Result<String> {
        if !self.kind.attributes().contains(&name) {
            return Err(DvfsError::UnknownTunable(name.to_string()));
        }
        let t = self.snapshot();
        let flag = |b: bool| (b as u8).to_string();
        Ok(match name {
            "up_threshold" => t.up_threshold.to_string(),
            "down_threshold" => t.down_threshold.to_string(),
            "sampling_down_factor" => t.sampling_down_factor.to_string(),
            "sampling_rate" => t.sampling_rate_us.to_string(),
            "sampling_rate_min" => self.kind.limits().min_sampling_rate_us.to_string(),
            "ignore_nice_load" => flag(t.ignore_nice_load),
            "io_is_busy" => flag(t.io_is_busy),
            "boost" => flag(t.boost),
            "freq_step" => t.freq_step.to_string(),
            "powersave_bias" => t.powersave_bias.to_string(),
            _ => return Err(DvfsError::UnknownTunable(name.to_string())),
        })
    }

    /// Validate and apply one write. On error nothing changes.
    pub fn set(&self, name: &str, raw: &str) -> Result<TunableValue> {
        if !self.kind.attributes().contains(&name) {
            return Err(DvfsError::UnknownTunable(name.to_string()));
        }
        let lim = self.kind.limits();
        let input = match name {
            "down_threshold" | "sampling_rate_min" => {
                return Err(DvfsError::ReadOnlyTunable(name.to_string()))
            }
            _ => parse_u32(name, raw)?,
        };

        let mut cell = self.write();
        let accepted = match name {
            "up_threshold" => {
                if input < lim.up_threshold_min || input > lim.up_threshold_max {
                    return Err(DvfsError::invalid(
                        name,
                        input,
                        format!("must be within [{}, {}]", lim.up_threshold_min, lim.up_threshold_max),
                    ));
                }
                cell.current.up_threshold = input;
                let mut current = cell.current;
                self.derive_down(&mut current);
                cell.current = current;
                if let Some(mut r) = cell.resume {
                    r.up_threshold = input;
                    self.derive_down(&mut r);
                    cell.resume = Some(r);
                }
                debug!(
                    "{}: up_threshold {} -> down_threshold {}",
                    self.table.name(),
                    input,
                    current.down_threshold
                );
                TunableValue::Number(input)
            }
            "sampling_down_factor" => {
                if input < 1 || input > lim.max_sampling_down_factor {
                    return Err(DvfsError::invalid(
                        name,
                        input,
                        format!("must be within [1, {}]", lim.max_sampling_down_factor),
                    ));
                }
                cell.current.sampling_down_factor = input;
                cell.epochs.rate_mult += 1;
                TunableValue::Number(input)
            }
            "sampling_rate" => {
                let rate = input.max(lim.min_sampling_rate_us);
                let old = cell.current.sampling_rate_us;
                cell.current.sampling_rate_us = rate;
                if rate < old {
                    let d = Duration::from_micros(rate as u64);
                    cell.listeners
                        .retain(|tx| tx.send(TaskSignal::Reschedule(d)).is_ok());
                }
                TunableValue::Number(rate)
            }
            "ignore_nice_load" => {
                let v = input.min(1) == 1;
                if v != cell.current.ignore_nice_load {
                    cell.current.ignore_nice_load = v;
                    cell.epochs.load += 1;
                }
                TunableValue::Flag(v)
            }
            "io_is_busy" => {
                let v = input.min(1) == 1;
                cell.current.io_is_busy = v;
                cell.epochs.load += 1;
                TunableValue::Flag(v)
            }
            "boost" => {
                let v = input.min(1) == 1;
                cell.current.boost = v;
                if let Some(r) = cell.resume.as_mut() {
                    r.boost = v;
                }
                TunableValue::Flag(v)
            }
            "freq_step" => {
                let v = input.min(100);
                cell.current.freq_step = v;
                TunableValue::Number(v)
            }
            "powersave_bias" => {
                let v = input.min(1000);
                cell.current.powersave_bias = v;
                TunableValue::Number(v)
            }
            _ => return Err(DvfsError::UnknownTunable(name.to_string())),
        };
        Ok(accepted)
    }

    /// Swap in the suspend profile (`up_threshold` 95, no boost) or restore
    /// the user's values. Only ondemand carries a suspend profile.
    pub fn apply_suspend(&self, suspend: bool) {
        if self.kind != GovernorKind::Ondemand {
            return;
        }
        let mut cell = self.write();
        if suspend {
            if cell.resume.is_some() {
                return;
            }
            let saved = cell.current;
            let mut t = cell.current;
            t.up_threshold = UP_THRESHOLD_SUSPEND;
            t.boost = BOOST_SUSPEND;
            self.derive_down(&mut t);
            cell.current = t;
            cell.resume = Some(saved);
            info!("{}: suspend profile applied", self.table.name());
        } else if let Some(r) = cell.resume.take() {
            let mut t = cell.current;
            t.up_threshold = r.up_threshold;
            t.boost = r.boost;
            self.derive_down(&mut t);
            cell.current = t;
            info!("{}: resume profile restored", self.table.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;

    fn od() -> SharedTunables {
        let table = Arc::new(ClusterTable::new("little", presets::EXYNOS8895_CL0.to_vec()).unwrap());
        SharedTunables::new(GovernorKind::Ondemand, table, 20, &TunableOverrides::default()).unwrap()
    }

    fn cs() -> SharedTunables {
        let table = Arc::new(
            ClusterTable::new("little", presets::EXYNOS8895_CL0_CONSERVATIVE.to_vec()).unwrap(),
        );
        SharedTunables::new(GovernorKind::Conservative, table, 20, &TunableOverrides::default())
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let t = od().snapshot();
        assert_eq!(t.up_threshold, 95);
        assert_eq!(t.down_threshold, 50);
        assert_eq!(t.sampling_down_factor, 50);
        assert_eq!(t.sampling_rate_us, 20_000);
        assert!(!t.boost);

        let t = cs().snapshot();
        assert_eq!(t.up_threshold, 75);
        // 75 * 455000 / 598000 = 57
        assert_eq!(t.down_threshold, 32);
        assert_eq!(t.sampling_rate_us, 80_000);
        assert!(t.boost);
    }

    #[test]
    fn test_down_threshold_tracks_up_threshold() {
        let t = od();
        for up in 45u32..=100 {
            t.set("up_threshold", &up.to_string()).unwrap();
            let s = t.snapshot();
            assert_eq!(s.down_threshold, (up * 832000 / 1053000).saturating_sub(25));
        }
    }

    #[test]
    fn test_big_shares_little_down_threshold() {
        let table = |name: &str, steps: &[u32]| Arc::new(ClusterTable::new(name, steps.to_vec()).unwrap());
        let big = table("big", presets::EXYNOS8895_CL1);
        let little = table("little", presets::EXYNOS8895_CL0);
        let none = TunableOverrides::default();

        // 95 * 741000 / 962000 = 73 on its own table
        let own = SharedTunables::new(GovernorKind::Ondemand, big.clone(), 20, &none).unwrap();
        assert_eq!(own.snapshot().down_threshold, 48);

        let t = SharedTunables::with_reference(GovernorKind::Ondemand, big, little, 20, &none).unwrap();
        assert_eq!(t.snapshot().down_threshold, 50);
        assert_eq!(t.table().name(), "big");
        t.set("up_threshold", "80").unwrap();
        assert_eq!(t.get("down_threshold").unwrap(), "38");

        let big = table("big", presets::EXYNOS8895_CL1_CONSERVATIVE);
        let little = table("little", presets::EXYNOS8895_CL0_CONSERVATIVE);
        let t = SharedTunables::with_reference(GovernorKind::Conservative, big, little, 20, &none).unwrap();
        assert_eq!(t.snapshot().down_threshold, 32);
    }

    #[test]
    fn test_rejects_out_of_range_and_keeps_value() {
        let t = od();
        assert!(matches!(
            t.set("up_threshold", "44"),
            Err(DvfsError::InvalidTunable { .. })
        ));
        assert!(t.set("up_threshold", "101").is_err());
        assert!(t.set("up_threshold", "abc").is_err());
        assert!(t.set("sampling_down_factor", "0").is_err());
        assert!(t.set("sampling_down_factor", "100001").is_err());
        let s = t.snapshot();
        assert_eq!(s.up_threshold, 95);
        assert_eq!(s.down_threshold, 50);
        assert_eq!(s.sampling_down_factor, 50);
    }

    #[test]
    fn test_clamped_writes_report_accepted_value() {
        let t = od();
        assert_eq!(t.set("sampling_rate", "10").unwrap(), TunableValue::Number(10_000));
        assert_eq!(t.set("boost", "7").unwrap(), TunableValue::Flag(true));
        assert_eq!(t.set("ignore_nice_load", "2").unwrap(), TunableValue::Flag(true));
        assert_eq!(t.set("powersave_bias", "5000").unwrap(), TunableValue::Number(1000));
        assert_eq!(t.get("boost").unwrap(), "1");
    }

    #[test]
    fn test_read_only_and_unknown() {
        let t = cs();
        assert!(matches!(t.set("down_threshold", "10"), Err(DvfsError::ReadOnlyTunable(_))));
        assert!(matches!(t.set("io_is_busy", "1"), Err(DvfsError::UnknownTunable(_))));
        assert!(matches!(t.get("powersave_bias"), Err(DvfsError::UnknownTunable(_))));
        assert_eq!(t.get("sampling_rate_min").unwrap(), "80000");
    }

    #[test]
    fn test_epochs_bump() {
        let t = od();
        let (_, e0) = t.snapshot_with_epochs();
        t.set("sampling_down_factor", "10").unwrap();
        t.set("ignore_nice_load", "1").unwrap();
        t.set("ignore_nice_load", "1").unwrap();
        let (_, e1) = t.snapshot_with_epochs();
        assert_eq!(e1.rate_mult, e0.rate_mult + 1);
        assert_eq!(e1.load, e0.load + 1);
    }

    #[test]
    fn test_shorter_sampling_rate_wakes_listeners() {
        let t = od();
        let (tx, rx) = crossbeam::channel::unbounded();
        t.subscribe(tx);
        t.set("sampling_rate", "50000").unwrap();
        assert!(rx.try_recv().is_err());
        t.set("sampling_rate", "30000").unwrap();
        match rx.try_recv() {
            Ok(TaskSignal::Reschedule(d)) => assert_eq!(d, Duration::from_micros(30_000)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_suspend_profile() {
        let t = od();
        t.set("up_threshold", "70").unwrap();
        t.set("boost", "1").unwrap();
        t.apply_suspend(true);
        let s = t.snapshot();
        assert_eq!(s.up_threshold, 95);
        assert!(!s.boost);
        assert!(t.is_suspended());

        // a write while suspended lands in both the live and the resume values
        t.set("up_threshold", "80").unwrap();
        t.apply_suspend(false);
        let s = t.snapshot();
        assert_eq!(s.up_threshold, 80);
        assert!(s.boost);
        assert_eq!(s.down_threshold, (80 * 832000 / 1053000) - 25);
    }

    #[test]
    fn test_overrides_apply_through_validation() {
        let table = Arc::new(ClusterTable::new("g3d", presets::EXYNOS8895_G3D.to_vec()).unwrap());
        let ov = TunableOverrides {
            up_threshold: Some(90),
            boost: Some(true),
            ..Default::default()
        };
        let t = SharedTunables::new(GovernorKind::Ondemand, table.clone(), 20, &ov).unwrap();
        assert_eq!(t.snapshot().up_threshold, 90);
        // 90 * 260000 / 338000 = 69
        assert_eq!(t.snapshot().down_threshold, 44);

        let bad = TunableOverrides {
            freq_step: Some(5),
            ..Default::default()
        };
        assert!(SharedTunables::new(GovernorKind::Ondemand, table, 20, &bad).is_err());
    }
}
