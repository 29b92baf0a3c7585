// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: periodic sampling tasks
//
// One thread per governed domain and per throttler. Every task is a plain
// state machine with a synchronous `tick()`; the thread around it only
// sleeps on its signal channel between ticks.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam::channel::unbounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::RecvTimeoutError;
use crossbeam::channel::Sender;
use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::error::DvfsError;
use crate::error::Result;
use crate::freq_table::clamp_to_range;
use crate::freq_table::Relation;
use crate::fvmap::VoltageMap;
use crate::governor::Decision;
use crate::governor::FrequencyPolicy;
use crate::governor::GovernorState;
use crate::governor::LoadGovernor;
use crate::governor::SampleType;
use crate::load::LoadTracker;
use crate::platform::DomainId;
use crate::platform::Platform;
use crate::stats::StatsCollector;
use crate::throttle::PollOutcome;
use crate::throttle::PoweroffLatch;
use crate::throttle::ThermalBatteryThrottler;
use crate::tunables::SharedTunables;
use crate::tunables::TunableEpochs;

/// Delay between readiness checks of a throttler.
pub const READY_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    Stop,
    /// Wake no later than this from now.
    Reschedule(Duration),
}

/// Throttling ceilings per domain, written by throttler tasks and read by
/// governor tasks. Several throttlers may cap one domain; the lowest wins.
#[derive(Clone, Default)]
pub struct FrequencyCeilings {
    inner: Arc<RwLock<HashMap<DomainId, BTreeMap<String, u32>>>>,
}

impl FrequencyCeilings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source`'s ceiling and return the effective one.
    pub fn set(&self, source: &str, domain: &DomainId, khz: u32) -> u32 {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let per_source = map.entry(domain.clone()).or_default();
        per_source.insert(source.to_string(), khz);
        per_source.values().copied().min().unwrap_or(khz)
    }

    pub fn get(&self, domain: &DomainId) -> Option<u32> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(domain)?.values().copied().min()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .filter_map(|(d, s)| Some((d.to_string(), s.values().copied().min()?)))
            .collect()
    }
}

pub trait SamplingTask: Send {
    fn name(&self) -> &str;

    /// Run one iteration and return the delay until the next one.
    fn tick(&mut self, platform: &dyn Platform) -> Result<Duration>;

    /// Delay used after a tick that failed with a recoverable error.
    fn retry_delay(&self) -> Duration;

    /// Hook the task's signal channel up to whatever may need to wake it.
    fn subscribe(&self, _tx: &Sender<TaskSignal>) {}
}

/// Drives one `LoadGovernor` over one clock domain.
pub struct GovernorTask {
    domain: DomainId,
    governor: Box<dyn LoadGovernor>,
    tunables: SharedTunables,
    state: Option<GovernorState>,
    load: LoadTracker,
    epochs: TunableEpochs,
    ceilings: FrequencyCeilings,
    stats: StatsCollector,
    fvmap: Option<Arc<VoltageMap>>,
}

impl GovernorTask {
    pub fn new(
        domain: DomainId,
        governor: Box<dyn LoadGovernor>,
        tunables: SharedTunables,
        units: Vec<usize>,
        ceilings: FrequencyCeilings,
        stats: StatsCollector,
    ) -> Self {
        let epochs = tunables.snapshot_with_epochs().1;
        Self {
            domain,
            governor,
            tunables,
            state: None,
            load: LoadTracker::new(units),
            epochs,
            ceilings,
            stats,
            fvmap: None,
        }
    }

    pub fn with_voltage_map(mut self, fvmap: Arc<VoltageMap>) -> Self {
        self.fvmap = Some(fvmap);
        self
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn state(&self) -> Option<&GovernorState> {
        self.state.as_ref()
    }

    fn request(&self, platform: &dyn Platform, target_khz: u32, relation: Relation) {
        match platform.request_frequency(&self.domain, target_khz, relation) {
            Ok(achieved) => {
                debug!("{}: {} kHz ({:?}) -> {} kHz", self.domain, target_khz, relation, achieved);
                self.stats.record_request(self.domain.as_str(), relation, Some(achieved));
            }
            Err(e) => {
                warn!("{}: {}", self.domain, e);
                self.stats.record_request(self.domain.as_str(), relation, None);
            }
        }
    }

    fn report(&self, platform: &dyn Platform, fallback_khz: u32, ceiling_khz: u32) {
        let cur = platform.current_frequency(&self.domain).unwrap_or(fallback_khz);
        let volt = self
            .fvmap
            .as_ref()
            .and_then(|m| m.voltage_by_name(self.domain.as_str(), cur));
        self.stats.record_frequency(self.domain.as_str(), cur, ceiling_khz, volt);
    }
}

impl SamplingTask for GovernorTask {
    fn name(&self) -> &str {
        self.domain.as_str()
    }

    fn retry_delay(&self) -> Duration {
        self.tunables.snapshot().sampling_rate()
    }

    fn subscribe(&self, tx: &Sender<TaskSignal>) {
        self.tunables.subscribe(tx.clone());
    }

    fn tick(&mut self, platform: &dyn Platform) -> Result<Duration> {
        let (t, epochs) = self.tunables.snapshot_with_epochs();
        let cur = platform.current_frequency(&self.domain)?;
        let min = platform.min_frequency(&self.domain)?;
        let hw_max = platform.max_frequency(&self.domain)?;
        let max = self
            .ceilings
            .get(&self.domain)
            .map_or(hw_max, |c| c.min(hw_max))
            .max(min);
        let policy = FrequencyPolicy { cur, min, max };

        let state = self.state.get_or_insert_with(|| GovernorState::new(cur));
        if epochs.rate_mult != self.epochs.rate_mult {
            state.rate_mult = 1;
        }
        if epochs.load != self.epochs.load {
            self.load.reset();
        }
        self.epochs = epochs;

        if state.sample_type == SampleType::Sub {
            state.sample_type = SampleType::Normal;
            let lo = clamp_to_range(state.freq_lo, min, max);
            let delay = Duration::from_micros(state.freq_lo_delay_us);
            self.request(platform, lo, Relation::AtMost);
            self.report(platform, lo, max);
            return Ok(delay);
        }

        let load = self.load.sample(platform, &t)?;
        self.stats
            .record_sample(self.domain.as_str(), load, state.rate_mult);
        let Some(load) = load else {
            return Ok(t.sampling_rate());
        };

        let decision = self
            .governor
            .decide(load, state, &t, self.tunables.table(), &policy);
        let mut delay = t.sampling_rate() * state.rate_mult.max(1);
        match decision {
            Decision::NoChange => self.stats.record_no_change(self.domain.as_str()),
            Decision::Request {
                target_khz,
                relation,
            } => {
                let split = state.freq_lo != 0;
                if split {
                    state.sample_type = SampleType::Sub;
                    delay = Duration::from_micros(state.freq_hi_delay_us);
                }
                self.request(platform, clamp_to_range(target_khz, min, max), relation);
            }
        }
        self.report(platform, cur, max);
        Ok(delay)
    }
}

/// Drives one `ThermalBatteryThrottler` and applies its ceilings.
pub struct ThrottleTask {
    throttler: ThermalBatteryThrottler,
    ceilings: FrequencyCeilings,
    latch: Arc<PoweroffLatch>,
    stats: StatsCollector,
    ready: bool,
}

impl ThrottleTask {
    pub fn new(
        throttler: ThermalBatteryThrottler,
        ceilings: FrequencyCeilings,
        latch: Arc<PoweroffLatch>,
        stats: StatsCollector,
    ) -> Self {
        Self {
            throttler,
            ceilings,
            latch,
            stats,
            ready: false,
        }
    }

    pub fn throttler(&self) -> &ThermalBatteryThrottler {
        &self.throttler
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn apply(&self, platform: &dyn Platform, changed: &[(DomainId, u32)]) {
        for (domain, khz) in changed {
            let effective = self.ceilings.set(self.throttler.name(), domain, *khz);
            if let Err(e) = platform.set_frequency_ceiling(domain, effective) {
                warn!("{}: failed to cap {} at {} kHz: {}", self.throttler.name(), domain, effective, e);
            }
        }
    }

    fn check_ready(&mut self, platform: &dyn Platform) -> Result<()> {
        let domains: Vec<DomainId> = self
            .throttler
            .clusters()
            .iter()
            .map(|c| c.domain.clone())
            .collect();
        let mut maxima = Vec::with_capacity(domains.len());
        for d in &domains {
            maxima.push((d, platform.max_frequency(d)?));
        }
        platform.read_temperature_c(self.throttler.zone())?;
        for (d, khz) in maxima {
            self.throttler.set_hw_max(d, khz);
        }
        Ok(())
    }
}

impl SamplingTask for ThrottleTask {
    fn name(&self) -> &str {
        self.throttler.name()
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.throttler.control().tunables().sleep_ms)
    }

    fn tick(&mut self, platform: &dyn Platform) -> Result<Duration> {
        let name = self.throttler.name().to_string();
        if !self.ready {
            if let Err(e) = self.check_ready(platform) {
                warn!("{}: platform not ready ({}), retrying", name, e);
                return Ok(READY_RETRY);
            }
            self.throttler.sanitize(false);
            let all = self.throttler.ceilings();
            self.apply(platform, &all);
            self.throttler.control().publish(self.throttler.state());
            self.ready = true;
            info!("{}: throttling {} from zone {}", name, all.len(), self.throttler.zone());
        }

        if let Some(changed) = self.throttler.sync_tunables() {
            self.apply(platform, &changed);
        }

        let reading = platform
            .read_temperature_c(self.throttler.zone())
            .and_then(|t| platform.read_battery_mv().map(|b| (t, b)));
        let (temp_c, battery_mv) = match reading {
            Ok(r) => r,
            Err(e) => {
                self.stats.record_read_failure(&name);
                return Err(e);
            }
        };

        let outcome = self.throttler.poll(temp_c, battery_mv);
        self.stats.record_poll(&name, &outcome, self.throttler.state());
        match &outcome {
            PollOutcome::Skipped => {}
            PollOutcome::Evaluated { changed, .. } => self.apply(platform, changed),
            PollOutcome::Shutdown { changed } => {
                self.apply(platform, changed);
                self.throttler.control().publish(self.throttler.state());
                if self.latch.fire(platform, &name) {
                    self.stats.record_poweroff();
                }
                return Err(DvfsError::ThermalEmergency {
                    zone: self.throttler.zone().to_string(),
                    temp_c,
                    shutdown_c: self.throttler.control().params().shutdown_temp_c,
                });
            }
        }
        self.throttler.control().publish(self.throttler.state());
        Ok(self.retry_delay())
    }
}

fn run_task(
    mut task: Box<dyn SamplingTask>,
    platform: Arc<dyn Platform>,
    rx: Receiver<TaskSignal>,
) -> Result<()> {
    info!("{}: sampling task started", task.name());
    let mut deadline = Instant::now();
    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(TaskSignal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(TaskSignal::Reschedule(d)) => {
                deadline = deadline.min(Instant::now() + d);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let next = match task.tick(platform.as_ref()) {
            Ok(d) => d,
            Err(e @ DvfsError::ThermalEmergency { .. }) => {
                error!("{}: {}", task.name(), e);
                return Err(e);
            }
            Err(e) => {
                warn!("{}: {}", task.name(), e);
                task.retry_delay()
            }
        };
        deadline = Instant::now() + next;
    }
    info!("{}: sampling task stopped", task.name());
    Ok(())
}

struct TaskHandle {
    name: String,
    tx: Sender<TaskSignal>,
    join: JoinHandle<Result<()>>,
}

/// Owns the sampling threads. Dropping it stops them.
pub struct SamplingScheduler {
    platform: Arc<dyn Platform>,
    tasks: Vec<TaskHandle>,
}

impl SamplingScheduler {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            tasks: Vec::new(),
        }
    }

    pub fn spawn(&mut self, task: Box<dyn SamplingTask>) -> Result<()> {
        let name = task.name().to_string();
        let (tx, rx) = unbounded();
        task.subscribe(&tx);
        let platform = self.platform.clone();
        let join = thread::Builder::new()
            .name(format!("dvfs-{}", name))
            .spawn(move || run_task(task, platform, rx))
            .map_err(|source| DvfsError::TaskSpawn {
                name: name.clone(),
                source,
            })?;
        self.tasks.push(TaskHandle { name, tx, join });
        Ok(())
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Names of tasks whose thread has already returned.
    pub fn exited(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.join.is_finished())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Stop and join every task. Returns the first error a task exited
    /// with. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        for t in &self.tasks {
            let _ = t.tx.send(TaskSignal::Stop);
        }
        let mut first = None;
        for t in self.tasks.drain(..) {
            let res = match t.join.join() {
                Ok(r) => r,
                Err(_) => Err(DvfsError::TaskPanicked { name: t.name }),
            };
            if let Err(e) = res {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SamplingScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("sampling tasks stopped with error: {}", e);
        }
    }
}
