// SPDX-License-Identifier: GPL-2.0
//
// dvfsd: run exynos_dvfs governors and throttlers against a simulated SoC
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use exynos_dvfs::sim::Scenario;
use exynos_dvfs::Controller;
use exynos_dvfs::DvfsConfig;
use exynos_dvfs::DvfsError;
use exynos_dvfs::Metrics;
use exynos_dvfs::SimPlatform;
use exynos_dvfs::StatsCollector;
use log::info;
use log::warn;

/// How often the simulated clock catches up with wall time.
const SIM_STEP: Duration = Duration::from_millis(10);

fn parse_secs(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("Invalid number of seconds: {}", e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("Seconds must be a positive finite number, got {}", s));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid number of seconds: {}", e))
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "dvfsd",
    version,
    about = "Closed-loop DVFS governors and thermal/battery throttling on a simulated Exynos SoC."
)]
struct Opts {
    /// TOML configuration. The built-in Exynos 8895 preset is used when
    /// omitted.
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    dump_config: bool,

    /// Stop after this many seconds. Defaults to the length of the scenario;
    /// runs until Ctrl-C when the scenario is empty.
    #[clap(short = 'd', long, value_parser = parse_secs)]
    duration: Option<Duration>,

    /// Print stats every this many seconds.
    #[clap(long, value_parser = parse_secs)]
    stats: Option<Duration>,

    /// Print stats as JSON instead of the framed table.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    stats_json: bool,

    /// Write a control surface attribute before starting, e.g.
    /// `--set big/up_threshold=80`. May be repeated.
    #[clap(short = 's', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Print control surface attributes and exit. May be repeated.
    #[clap(short = 'g', long = "get", value_name = "KEY")]
    get: Vec<String>,

    /// List every control surface attribute and exit.
    #[clap(short = 'l', long, action = clap::ArgAction::SetTrue)]
    list: bool,

    /// Enable verbose output. Repeat for more.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_log(verbose: u8) -> Result<()> {
    let loglevel = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_offset_to_local()
        .map_err(|_| anyhow!("Failed to set local time offset"))?
        .set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn print_stats(m: &Metrics, prev: &Metrics, json: bool) -> Result<()> {
    if json {
        println!("{}", m.to_json()?);
    } else {
        m.delta(prev).format(&mut std::io::stdout())?;
    }
    Ok(())
}

fn monitor(stats: StatsCollector, intv: Duration, json: bool, shutdown: Arc<AtomicBool>) -> Result<()> {
    let mut prev = Metrics::default();
    let mut next = Instant::now() + intv;
    while !shutdown.load(Ordering::Relaxed) {
        if Instant::now() < next {
            thread::sleep(SIM_STEP);
            continue;
        }
        let m = stats.snapshot();
        print_stats(&m, &prev, json)?;
        prev = m;
        next += intv;
    }
    Ok(())
}

/// Drive the simulated SoC in wall time until Ctrl-C, the end of the run, or
/// a sampling task dies.
fn run(
    ctl: &Controller,
    sim: &SimPlatform,
    scenario: &Scenario,
    duration: Option<Duration>,
    shutdown: &AtomicBool,
) {
    let started = Instant::now();
    let mut last = started;
    let mut phase = None;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        sim.advance(now - last);
        last = now;
        let elapsed = now - started;

        if let Some((i, p)) = scenario.phase_at(elapsed) {
            if phase != Some(i) {
                info!("scenario phase {} ({} ms): load {:?}", i, p.duration_ms, p.load);
                sim.apply_phase(p);
                phase = Some(i);
            }
        }

        let exited = ctl.exited();
        if !exited.is_empty() {
            warn!("sampling tasks exited: {}", exited.join(", "));
            break;
        }
        if duration.is_some_and(|d| elapsed >= d) {
            info!("run finished after {:.1}s, {:.1} C", elapsed.as_secs_f64(), sim.temperature());
            break;
        }
        thread::sleep(SIM_STEP);
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_log(opts.verbose)?;

    let config = match &opts.config {
        Some(path) => DvfsConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DvfsConfig::default(),
    };
    if opts.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let sim = Arc::new(SimPlatform::from_config(&config).context("Failed to build the simulated SoC")?);
    let mut ctl = Controller::new(&config, sim.clone()).context("Failed to build the controller")?;

    for kv in &opts.set {
        let Some((key, value)) = kv.split_once('=') else {
            bail!("--set expects KEY=VALUE, got {:?}", kv);
        };
        let accepted = ctl
            .surface()
            .set(key.trim(), value.trim())
            .with_context(|| format!("Failed to set {}", key))?;
        info!("{} = {}", key, accepted);
    }

    if opts.list {
        for key in ctl.surface().list() {
            println!("{}", key);
        }
        return Ok(());
    }
    if !opts.get.is_empty() {
        for key in &opts.get {
            let value = ctl
                .surface()
                .get(key)
                .with_context(|| format!("Failed to read {}", key))?;
            println!("{}: {}", key, value.trim_end());
        }
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let scenario = Scenario::new(config.sim.phases.clone());
    let duration = opts
        .duration
        .or_else(|| Some(scenario.total()).filter(|d| !d.is_zero()));

    let stats_thread = opts.stats.map(|intv| {
        let shutdown_copy = shutdown.clone();
        let stats = ctl.stats().clone();
        let json = opts.stats_json;
        thread::spawn(move || {
            if let Err(e) = monitor(stats, intv, json, shutdown_copy) {
                warn!("stats monitor thread finished because of an error {}", e);
            }
        })
    });

    ctl.start()?;
    run(&ctl, &sim, &scenario, duration, &shutdown);
    shutdown.store(true, Ordering::Relaxed);
    let stopped = ctl.stop();

    if let Some(jh) = stats_thread {
        let _ = jh.join();
    }
    if opts.stats.is_some() {
        print_stats(&ctl.stats().snapshot(), &Metrics::default(), opts.stats_json)?;
    }

    match stopped {
        Ok(()) => Ok(()),
        Err(e @ DvfsError::ThermalEmergency { .. }) => {
            let msg = if ctl.poweroff_issued() {
                "Thermal shutdown, poweroff issued"
            } else {
                "Thermal shutdown"
            };
            Err(e).context(msg)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("1.5"), Ok(Duration::from_millis(1500)));
        for bad in ["-1", "0", "NaN", "inf", "1e30", "soon"] {
            assert!(parse_secs(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_bad_durations_rejected_by_parser() {
        assert!(Opts::try_parse_from(["dvfsd", "--duration", "-2"]).is_err());
        assert!(Opts::try_parse_from(["dvfsd", "--stats", "NaN"]).is_err());
        let opts = Opts::try_parse_from(["dvfsd", "-d", "3", "--stats", "0.5"]).unwrap();
        assert_eq!(opts.duration, Some(Duration::from_secs(3)));
        assert_eq!(opts.stats, Some(Duration::from_millis(500)));
    }
}
