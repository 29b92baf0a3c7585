// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: runtime counters
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::Local;
use serde::Deserialize;
use serde::Serialize;

use crate::freq_table::Relation;
use crate::throttle::PollOutcome;
use crate::throttle::ThrottleLevel;
use crate::throttle::ThrottleState;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainMetrics {
    /// Load evaluations, counting sub-samples.
    pub samples: u64,
    pub requests_up: u64,
    pub requests_down: u64,
    pub request_failures: u64,
    /// Evaluations that left the frequency alone.
    pub no_change: u64,
    /// Samples that produced no usable load.
    pub idle_misses: u64,
    pub last_load: u32,
    pub cur_khz: u32,
    pub ceiling_khz: u32,
    pub voltage_uv: u32,
    pub rate_mult: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleMetrics {
    pub polls: u64,
    pub skipped: u64,
    pub warn_events: u64,
    pub raise_events: u64,
    pub critical_events: u64,
    pub read_failures: u64,
    pub level: String,
    pub temp_c: i32,
    pub peak_temp_c: i32,
    pub battery_mv: i32,
    pub peak_battery_mv: i32,
    pub cal_max_temp_c: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub domains: BTreeMap<String, DomainMetrics>,
    pub throttlers: BTreeMap<String, ThrottleMetrics>,
    pub poweroff_issued: bool,
}

impl Metrics {
    pub fn format<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let now = Local::now();
        writeln!(w, "┌─ {} {} ─", crate::NAME, now.format("%H:%M:%S"))?;
        for (name, d) in &self.domains {
            writeln!(
                w,
                "│ {:<8} cur {:>8} @{:>7}uV  cap {:>8}  load {:>3}%  x{:<3} up {:>5}  dn {:>5}  nop {:>5}  fail {:>3}  miss {:>3}",
                name,
                d.cur_khz,
                d.voltage_uv,
                d.ceiling_khz,
                d.last_load,
                d.rate_mult,
                d.requests_up,
                d.requests_down,
                d.no_change,
                d.request_failures,
                d.idle_misses
            )?;
        }
        for (name, t) in &self.throttlers {
            writeln!(
                w,
                "│ {:<8} {:<8} {:>3}C (peak {:>3}C, cal {:>3}C)  bat {:>4}mV (low {:>4}mV)  warn {:>4}  up {:>4}  crit {:>3}  skip {:>5}",
                name,
                t.level,
                t.temp_c,
                t.peak_temp_c,
                t.cal_max_temp_c,
                t.battery_mv,
                t.peak_battery_mv,
                t.warn_events,
                t.raise_events,
                t.critical_events,
                t.skipped
            )?;
        }
        if self.poweroff_issued {
            writeln!(w, "│ POWEROFF issued")?;
        }
        writeln!(w, "└─")?;
        Ok(())
    }

    /// Counters become per-interval; gauges keep their current value.
    pub fn delta(&self, prev: &Self) -> Self {
        let domains = self
            .domains
            .iter()
            .map(|(name, cur)| {
                let p = prev.domains.get(name).cloned().unwrap_or_default();
                let d = DomainMetrics {
                    samples: cur.samples.saturating_sub(p.samples),
                    requests_up: cur.requests_up.saturating_sub(p.requests_up),
                    requests_down: cur.requests_down.saturating_sub(p.requests_down),
                    request_failures: cur.request_failures.saturating_sub(p.request_failures),
                    no_change: cur.no_change.saturating_sub(p.no_change),
                    idle_misses: cur.idle_misses.saturating_sub(p.idle_misses),
                    ..cur.clone()
                };
                (name.clone(), d)
            })
            .collect();
        let throttlers = self
            .throttlers
            .iter()
            .map(|(name, cur)| {
                let p = prev.throttlers.get(name).cloned().unwrap_or_default();
                let t = ThrottleMetrics {
                    polls: cur.polls.saturating_sub(p.polls),
                    skipped: cur.skipped.saturating_sub(p.skipped),
                    warn_events: cur.warn_events.saturating_sub(p.warn_events),
                    raise_events: cur.raise_events.saturating_sub(p.raise_events),
                    critical_events: cur.critical_events.saturating_sub(p.critical_events),
                    read_failures: cur.read_failures.saturating_sub(p.read_failures),
                    ..cur.clone()
                };
                (name.clone(), t)
            })
            .collect();
        Self {
            domains,
            throttlers,
            poweroff_issued: self.poweroff_issued,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Shared sink the sampling tasks report into.
#[derive(Clone, Default)]
pub struct StatsCollector {
    inner: Arc<Mutex<Metrics>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Metrics {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn with_domain<F: FnOnce(&mut DomainMetrics)>(&self, name: &str, f: F) {
        let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(m.domains.entry(name.to_string()).or_default());
    }

    fn with_throttler<F: FnOnce(&mut ThrottleMetrics)>(&self, name: &str, f: F) {
        let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(m.throttlers.entry(name.to_string()).or_default());
    }

    pub fn record_sample(&self, domain: &str, load: Option<u32>, rate_mult: u32) {
        self.with_domain(domain, |d| {
            d.samples += 1;
            d.rate_mult = rate_mult;
            match load {
                Some(l) => d.last_load = l,
                None => d.idle_misses += 1,
            }
        });
    }

    pub fn record_request(&self, domain: &str, relation: Relation, result: Option<u32>) {
        self.with_domain(domain, |d| match result {
            Some(khz) => {
                d.cur_khz = khz;
                match relation {
                    Relation::AtLeast => d.requests_up += 1,
                    Relation::AtMost => d.requests_down += 1,
                }
            }
            None => d.request_failures += 1,
        });
    }

    pub fn record_no_change(&self, domain: &str) {
        self.with_domain(domain, |d| d.no_change += 1);
    }

    pub fn record_frequency(&self, domain: &str, cur_khz: u32, ceiling_khz: u32, voltage_uv: Option<u32>) {
        self.with_domain(domain, |d| {
            d.cur_khz = cur_khz;
            d.ceiling_khz = ceiling_khz;
            d.voltage_uv = voltage_uv.unwrap_or(0);
        });
    }

    pub fn record_poll(&self, throttler: &str, outcome: &PollOutcome, s: &ThrottleState) {
        self.with_throttler(throttler, |t| {
            t.polls += 1;
            match outcome {
                PollOutcome::Skipped => {
                    t.skipped += 1;
                    return;
                }
                PollOutcome::Shutdown { .. } => t.critical_events += 1,
                PollOutcome::Evaluated { level, changed } => match level {
                    ThrottleLevel::Warn => t.warn_events += 1,
                    ThrottleLevel::Critical | ThrottleLevel::Shutdown => t.critical_events += 1,
                    ThrottleLevel::Normal if !changed.is_empty() => t.raise_events += 1,
                    ThrottleLevel::Normal => {}
                },
            }
            t.level = s.level.to_string();
            t.temp_c = s.current_temp_c;
            t.peak_temp_c = s.peak_temp_c;
            t.battery_mv = s.current_battery_mv;
            t.peak_battery_mv = s.peak_battery_mv;
            t.cal_max_temp_c = s.calibrated_max_temp_c;
        });
    }

    pub fn record_read_failure(&self, throttler: &str) {
        self.with_throttler(throttler, |t| t.read_failures += 1);
    }

    pub fn record_poweroff(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).poweroff_issued = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_includes_numbers() {
        let stats = StatsCollector::new();
        stats.record_sample("big", Some(87), 1);
        stats.record_request("big", Relation::AtLeast, Some(2314000));
        stats.record_frequency("big", 2314000, 2808000, Some(1100000));
        let state = ThrottleState {
            level: ThrottleLevel::Warn,
            current_temp_c: 71,
            ..Default::default()
        };
        let outcome = PollOutcome::Evaluated {
            level: ThrottleLevel::Warn,
            changed: vec![],
        };
        stats.record_poll("cpu", &outcome, &state);

        let mut out = Vec::new();
        stats.snapshot().format(&mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("2314000"));
        assert!(s.contains("87%"));
        assert!(s.contains("warn"));
        assert!(s.contains("1100000uV"));
        assert!(!s.contains("POWEROFF"));
    }

    #[test]
    fn delta_subtracts_counters_only() {
        let stats = StatsCollector::new();
        stats.record_sample("little", Some(10), 1);
        stats.record_request("little", Relation::AtMost, Some(1053000));
        let idle = ThrottleState::default();
        stats.record_poll("cpu", &PollOutcome::Skipped, &idle);
        let prev = stats.snapshot();

        stats.record_sample("little", None, 1);
        stats.record_request("little", Relation::AtMost, None);
        stats.record_poll("cpu", &PollOutcome::Skipped, &idle);
        stats.record_no_change("little");
        let d = stats.snapshot().delta(&prev);

        let little = &d.domains["little"];
        assert_eq!(little.samples, 1);
        assert_eq!(little.requests_down, 0);
        assert_eq!(little.request_failures, 1);
        assert_eq!(little.idle_misses, 1);
        assert_eq!(little.no_change, 1);
        assert_eq!(little.cur_khz, 1053000);
        assert_eq!(little.last_load, 10);
        assert_eq!(d.throttlers["cpu"].skipped, 1);
    }

    #[test]
    fn json_has_domains() {
        let stats = StatsCollector::new();
        stats.record_poweroff();
        stats.record_sample("gpu", Some(50), 1);
        let json = stats.snapshot().to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["poweroff_issued"], true);
        assert_eq!(v["domains"]["gpu"]["last_load"], 50);
    }
}
