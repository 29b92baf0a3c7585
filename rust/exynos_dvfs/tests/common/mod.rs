#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use exynos_dvfs::config::DomainConfig;
use exynos_dvfs::config::TableSource;
use exynos_dvfs::config::ThrottleClusterConfig;
use exynos_dvfs::config::ThrottlerConfig;
use exynos_dvfs::governor::GovernorPolicy;
use exynos_dvfs::throttle::ThrottleParams;
use exynos_dvfs::tunables::TunableOverrides;
use exynos_dvfs::Controller;
use exynos_dvfs::DvfsConfig;
use exynos_dvfs::GovernorKind;
use exynos_dvfs::SimPlatform;

/// Route library logs to the test harness. Later calls are ignored.
pub fn setup_test() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Debug, simplelog::Config::default());
}

/// One little cluster on the 8895 table, optionally throttled by "cpu".
pub fn little_config(governor: GovernorKind, tunables: TunableOverrides, throttled: bool) -> DvfsConfig {
    DvfsConfig {
        domains: vec![DomainConfig {
            name: "little".to_string(),
            units: "0".to_string(),
            table: TableSource::Preset("exynos8895-cl0".to_string()),
            threshold_table: None,
            governor,
            transition_latency_us: 20,
            policy: GovernorPolicy::default(),
            tunables,
        }],
        throttlers: if throttled {
            vec![ThrottlerConfig {
                name: "cpu".to_string(),
                zone: "cpu".to_string(),
                clusters: vec![ThrottleClusterConfig {
                    domain: "little".to_string(),
                    table: None,
                    critical_index: Some(2),
                    fast_drop_index: None,
                }],
                params: ThrottleParams::default(),
            }]
        } else {
            Vec::new()
        },
        fvmap: Vec::new(),
        ..Default::default()
    }
}

pub fn build(config: &DvfsConfig) -> (Controller, Arc<SimPlatform>) {
    let sim = Arc::new(SimPlatform::from_config(config).unwrap());
    let ctl = Controller::new(config, sim.clone()).unwrap();
    (ctl, sim)
}

/// Step the controller on the simulation clock for `span`.
pub fn run_for(ctl: &mut Controller, sim: &SimPlatform, span: Duration) -> exynos_dvfs::Result<()> {
    let end = sim.elapsed() + span;
    loop {
        let now = sim.elapsed();
        let Some(wait) = ctl.tick_due(now)? else {
            return Ok(());
        };
        let next = now + wait.max(Duration::from_micros(1));
        if next > end {
            sim.advance(end.saturating_sub(now));
            return Ok(());
        }
        sim.advance(next - now);
    }
}
