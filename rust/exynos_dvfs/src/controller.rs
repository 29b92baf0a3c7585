// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: controller assembly
//
// Builds every governor and throttler task from a `DvfsConfig`, wires them
// to one shared ceiling table, poweroff latch, stats collector and control
// surface, then either hands them to the sampling threads or steps them on
// a caller-supplied clock.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::Arc;
use std::time::Duration;

use log::error;
use log::info;
use log::warn;

use crate::config::DvfsConfig;
use crate::error::DvfsError;
use crate::error::Result;
use crate::governor;
use crate::platform::DomainId;
use crate::platform::Platform;
use crate::scheduler::FrequencyCeilings;
use crate::scheduler::GovernorTask;
use crate::scheduler::SamplingScheduler;
use crate::scheduler::SamplingTask;
use crate::scheduler::ThrottleTask;
use crate::stats::StatsCollector;
use crate::surface::ControlSurface;
use crate::throttle::PoweroffLatch;
use crate::throttle::ThermalBatteryThrottler;
use crate::throttle::ThrottleCluster;
use crate::throttle::ThrottleControl;
use crate::tunables::SharedTunables;

struct PendingTask {
    task: Box<dyn SamplingTask>,
    due: Duration,
}

pub struct Controller {
    platform: Arc<dyn Platform>,
    surface: ControlSurface,
    stats: StatsCollector,
    ceilings: FrequencyCeilings,
    latch: Arc<PoweroffLatch>,
    pending: Vec<PendingTask>,
    scheduler: Option<SamplingScheduler>,
}

impl Controller {
    pub fn new(config: &DvfsConfig, platform: Arc<dyn Platform>) -> Result<Self> {
        config.validate()?;
        let stats = StatsCollector::new();
        let ceilings = FrequencyCeilings::new();
        let latch = Arc::new(PoweroffLatch::new());
        let mut surface = ControlSurface::new();
        let mut tasks: Vec<Box<dyn SamplingTask>> = Vec::new();

        let fvmap = Arc::new(config.voltage_map()?);
        if !config.fvmap.is_empty() {
            surface.set_voltage_map(fvmap.clone());
        }

        for d in &config.domains {
            let table = config.domain_table(d)?;
            let tunables = SharedTunables::with_reference(
                d.governor,
                table,
                config.threshold_table(d)?,
                d.transition_latency_us,
                &d.tunables,
            )?;
            let task = GovernorTask::new(
                DomainId::new(&d.name),
                governor::build(d.governor, &d.policy),
                tunables.clone(),
                config.units(d)?,
                ceilings.clone(),
                stats.clone(),
            )
            .with_voltage_map(fvmap.clone());
            info!(
                "{}: {} on units {} ({} steps)",
                d.name,
                d.governor,
                d.units,
                tunables.table().len()
            );
            surface.add_governor(&d.name, tunables);
            tasks.push(Box::new(task));
        }

        for t in &config.throttlers {
            let control = Arc::new(ThrottleControl::new(t.params.clone()));
            let mut clusters = Vec::with_capacity(t.clusters.len());
            for c in &t.clusters {
                let table = config.throttle_table(c)?;
                clusters.push(ThrottleCluster {
                    domain: DomainId::new(&c.domain),
                    hw_max_khz: table.highest(),
                    table,
                    critical_index: c.critical_index,
                    fast_drop_index: c.fast_drop_index,
                });
            }
            let throttler = ThermalBatteryThrottler::new(&t.name, &t.zone, control.clone(), clusters)?;
            surface.add_throttler(&t.name, control);
            tasks.push(Box::new(ThrottleTask::new(
                throttler,
                ceilings.clone(),
                latch.clone(),
                stats.clone(),
            )));
        }

        Ok(Self {
            platform,
            surface,
            stats,
            ceilings,
            latch,
            pending: tasks
                .into_iter()
                .map(|task| PendingTask {
                    task,
                    due: Duration::ZERO,
                })
                .collect(),
            scheduler: None,
        })
    }

    pub fn surface(&self) -> &ControlSurface {
        &self.surface
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn ceilings(&self) -> &FrequencyCeilings {
        &self.ceilings
    }

    pub fn poweroff_issued(&self) -> bool {
        self.latch.has_fired()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Names of tasks not yet handed to the sampling threads.
    pub fn pending_tasks(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.task.name()).collect()
    }

    /// Run every pending task due at `now`, measured on the caller's clock,
    /// and return how long until the next one is due. `None` once no task
    /// remains. A task that hits a thermal emergency is dropped and the
    /// error returned after the remaining due tasks ran.
    ///
    /// Sampling-rate shrink wakeups only reach threaded tasks; here a
    /// shorter rate takes effect from the next tick.
    pub fn tick_due(&mut self, now: Duration) -> Result<Option<Duration>> {
        let mut emergency = None;
        let platform = self.platform.clone();
        self.pending.retain_mut(|p| {
            if p.due > now {
                return true;
            }
            match p.task.tick(platform.as_ref()) {
                Ok(delay) => {
                    p.due = now + delay;
                    true
                }
                Err(e @ DvfsError::ThermalEmergency { .. }) => {
                    error!("{}: {}", p.task.name(), e);
                    emergency.get_or_insert(e);
                    false
                }
                Err(e) => {
                    warn!("{}: {}", p.task.name(), e);
                    p.due = now + p.task.retry_delay();
                    true
                }
            }
        });
        if let Some(e) = emergency {
            return Err(e);
        }
        Ok(self
            .pending
            .iter()
            .map(|p| p.due.saturating_sub(now))
            .min())
    }

    /// Move every pending task onto its own sampling thread.
    pub fn start(&mut self) -> Result<()> {
        let mut scheduler = match self.scheduler.take() {
            Some(s) => s,
            None => SamplingScheduler::new(self.platform.clone()),
        };
        for p in self.pending.drain(..) {
            scheduler.spawn(p.task)?;
        }
        info!("started {} sampling tasks", scheduler.task_names().len());
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Threaded tasks that already returned, e.g. after a thermal emergency.
    pub fn exited(&self) -> Vec<String> {
        self.scheduler
            .as_ref()
            .map(|s| s.exited().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Stop and join the sampling threads. Safe to call more than once.
    pub fn stop(&mut self) -> Result<()> {
        match self.scheduler.take() {
            Some(mut s) => s.stop(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    fn controller() -> (Controller, Arc<SimPlatform>) {
        let config = DvfsConfig::default();
        let sim = Arc::new(SimPlatform::from_config(&config).unwrap());
        let ctl = Controller::new(&config, sim.clone()).unwrap();
        (ctl, sim)
    }

    #[test]
    fn test_builds_default_preset() {
        let (ctl, _) = controller();
        assert_eq!(ctl.pending_tasks(), vec!["little", "big", "gpu", "cpu", "g3d"]);
        let keys = ctl.surface().list();
        assert!(keys.contains(&"big/up_threshold".to_string()));
        assert!(keys.contains(&"cpu/dvfs_max_temp".to_string()));
        assert!(keys.contains(&"fvmap/print_dvfs_table".to_string()));
        assert!(!ctl.is_running());
    }

    #[test]
    fn test_big_decreases_with_little() {
        let (ctl, _) = controller();
        let s = ctl.surface();
        assert_eq!(s.get("little/down_threshold").unwrap(), "50");
        assert_eq!(s.get("big/down_threshold").unwrap(), "50");
        s.set("big/up_threshold", "80").unwrap();
        assert_eq!(s.get("big/down_threshold").unwrap(), "38");
        assert_eq!(s.get("little/down_threshold").unwrap(), "50");
    }

    #[test]
    fn test_tick_due_runs_only_due_tasks() {
        let (mut ctl, sim) = controller();
        let next = ctl.tick_due(Duration::ZERO).unwrap().unwrap();
        // the throttlers poll every 6 ms, well before any governor
        assert_eq!(next, Duration::from_millis(6));
        sim.advance(next);
        assert_eq!(ctl.tick_due(Duration::from_millis(3)).unwrap(), Some(Duration::from_millis(3)));
        let m = ctl.stats().snapshot();
        assert_eq!(m.throttlers["cpu"].polls, 1);
        assert_eq!(m.domains["big"].samples, 1);
    }

    #[test]
    fn test_emergency_drops_throttler() {
        let (mut ctl, sim) = controller();
        ctl.tick_due(Duration::ZERO).unwrap();
        sim.pin_temperature(Some(116));
        let err = ctl.tick_due(Duration::from_millis(6)).unwrap_err();
        assert!(matches!(err, DvfsError::ThermalEmergency { .. }));
        assert!(ctl.poweroff_issued());
        assert_eq!(sim.emergency_calls(), 1);
        assert_eq!(sim.orderly_calls(), 1);
        assert_eq!(ctl.pending_tasks(), vec!["little", "big", "gpu"]);
        assert_eq!(sim.frequency("big"), Some(741000));
    }

    #[test]
    fn test_start_and_stop() {
        let (mut ctl, _) = controller();
        ctl.start().unwrap();
        assert!(ctl.is_running());
        assert!(ctl.pending_tasks().is_empty());
        assert_eq!(ctl.tick_due(Duration::ZERO).unwrap(), None);
        ctl.stop().unwrap();
        ctl.stop().unwrap();
        assert!(ctl.exited().is_empty());
    }
}
