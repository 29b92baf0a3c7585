// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: TOML configuration
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::cpu_list::parse_cpu_list;
use crate::error::DvfsError;
use crate::error::Result;
use crate::freq_table::ClusterTable;
use crate::fvmap::FvmapDomain;
use crate::fvmap::VoltageMap;
use crate::governor::ConservativeBoost;
use crate::governor::GovernorPolicy;
use crate::presets;
use crate::sim::SimConfig;
use crate::throttle::ThrottleParams;
use crate::tunables::GovernorKind;
use crate::tunables::TunableOverrides;

const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// A preset name or an explicit list of kHz steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSource {
    Preset(String),
    Steps(Vec<u32>),
}

impl TableSource {
    pub fn build(&self, name: &str) -> Result<ClusterTable> {
        match self {
            TableSource::Preset(p) => {
                let steps = presets::table(p).ok_or_else(|| {
                    DvfsError::Config(format!(
                        "{}: unknown table preset {:?} (known: {})",
                        name,
                        p,
                        presets::names().collect::<Vec<_>>().join(", ")
                    ))
                })?;
                ClusterTable::new(name, steps.to_vec())
            }
            TableSource::Steps(s) => ClusterTable::new(name, s.clone()),
        }
    }
}

fn default_governor() -> GovernorKind {
    GovernorKind::Ondemand
}

fn default_latency() -> u32 {
    20
}

/// One governed clock domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    /// Load units, e.g. `"0-3"`.
    pub units: String,
    pub table: TableSource,
    /// Table whose two lowest steps derive `down_threshold`, so clusters can
    /// share the little cluster's decrease point. Defaults to `table`.
    #[serde(default)]
    pub threshold_table: Option<TableSource>,
    #[serde(default = "default_governor")]
    pub governor: GovernorKind,
    #[serde(default = "default_latency")]
    pub transition_latency_us: u32,
    #[serde(default)]
    pub policy: GovernorPolicy,
    #[serde(default)]
    pub tunables: TunableOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleClusterConfig {
    pub domain: String,
    /// Defaults to the governed domain's table.
    #[serde(default)]
    pub table: Option<TableSource>,
    #[serde(default)]
    pub critical_index: Option<usize>,
    #[serde(default)]
    pub fast_drop_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    pub name: String,
    pub zone: String,
    /// Throttle order: the first cluster gives way first.
    pub clusters: Vec<ThrottleClusterConfig>,
    #[serde(default)]
    pub params: ThrottleParams,
}

/// A file only carries what it sets: missing sections are empty, not the
/// built-in preset returned by [`DvfsConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvfsConfig {
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub throttlers: Vec<ThrottlerConfig>,
    #[serde(default)]
    pub fvmap: Vec<FvmapDomain>,
    #[serde(default)]
    pub sim: SimConfig,
}

impl Default for DvfsConfig {
    /// Exynos 8895: both CPU clusters and the GPU on ondemand, a CPU
    /// throttler that gives way big-first and a G3D throttler on the GPU
    /// zone.
    fn default() -> Self {
        let domain = |name: &str, units: &str, table: &str| DomainConfig {
            name: name.to_string(),
            units: units.to_string(),
            table: TableSource::Preset(table.to_string()),
            threshold_table: None,
            governor: GovernorKind::Ondemand,
            transition_latency_us: default_latency(),
            policy: GovernorPolicy::default(),
            tunables: TunableOverrides::default(),
        };
        let cluster = |domain: &str, critical: Option<usize>, fast: Option<usize>| ThrottleClusterConfig {
            domain: domain.to_string(),
            table: None,
            critical_index: critical,
            fast_drop_index: fast,
        };
        // big derives its decrease point from the little table and, when
        // switched to conservative, boosts straight to max
        let mut big = domain("big", "4-7", "exynos8895-cl1");
        big.threshold_table = Some(TableSource::Preset("exynos8895-cl0".to_string()));
        big.policy.boost = ConservativeBoost::Always;
        Self {
            domains: vec![
                domain("little", "0-3", "exynos8895-cl0"),
                big,
                domain("gpu", "8", "exynos8895-g3d"),
            ],
            throttlers: vec![
                ThrottlerConfig {
                    name: "cpu".to_string(),
                    zone: "cpu".to_string(),
                    clusters: vec![cluster("big", Some(5), Some(7)), cluster("little", None, None)],
                    params: ThrottleParams::default(),
                },
                ThrottlerConfig {
                    name: "g3d".to_string(),
                    zone: "gpu".to_string(),
                    clusters: vec![cluster("gpu", Some(3), Some(4))],
                    params: ThrottleParams::default(),
                },
            ],
            fvmap: vec![
                FvmapDomain::from_pairs(2, "big", true, presets::EXYNOS8895_FVMAP_BIG),
                FvmapDomain::from_pairs(3, "little", true, presets::EXYNOS8895_FVMAP_LITTLE),
                FvmapDomain::from_pairs(4, "gpu", true, presets::EXYNOS8895_FVMAP_G3D),
            ],
            sim: SimConfig::default(),
        }
    }
}

impl DvfsConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let io_err = |e: std::io::Error| DvfsError::Config(format!("{}: {}", path.display(), e));
        let meta = fs::metadata(path).map_err(io_err)?;
        if meta.len() > MAX_CONFIG_SIZE {
            return Err(DvfsError::Config(format!(
                "{}: {} bytes exceeds the {} byte limit",
                path.display(),
                meta.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let content = fs::read_to_string(path).map_err(io_err)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| DvfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DvfsError::Config(e.to_string()))
    }

    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn units(&self, domain: &DomainConfig) -> Result<Vec<usize>> {
        parse_cpu_list(&domain.units)
    }

    pub fn domain_table(&self, domain: &DomainConfig) -> Result<Arc<ClusterTable>> {
        domain.table.build(&domain.name).map(Arc::new)
    }

    /// Table `domain` derives `down_threshold` from.
    pub fn threshold_table(&self, domain: &DomainConfig) -> Result<Arc<ClusterTable>> {
        match &domain.threshold_table {
            Some(t) => t.build(&domain.name).map(Arc::new),
            None => self.domain_table(domain),
        }
    }

    /// Table a throttler walks for `cluster`.
    pub fn throttle_table(&self, cluster: &ThrottleClusterConfig) -> Result<Arc<ClusterTable>> {
        match (&cluster.table, self.domain(&cluster.domain)) {
            (Some(t), _) => t.build(&cluster.domain).map(Arc::new),
            (None, Some(d)) => self.domain_table(d),
            (None, None) => Err(DvfsError::Config(format!(
                "throttled domain {} is not governed and has no table",
                cluster.domain
            ))),
        }
    }

    pub fn voltage_map(&self) -> Result<VoltageMap> {
        VoltageMap::new(self.fvmap.clone())
    }

    /// Check everything that can be checked without a platform.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        let mut units = BTreeSet::new();
        for d in &self.domains {
            if d.name.is_empty() || d.name.contains('/') {
                return Err(DvfsError::Config(format!("invalid domain name {:?}", d.name)));
            }
            if !names.insert(d.name.as_str()) {
                return Err(DvfsError::Config(format!("duplicate domain {}", d.name)));
            }
            self.domain_table(d)?;
            self.threshold_table(d)?;
            for u in self.units(d)? {
                if !units.insert(u) {
                    return Err(DvfsError::Config(format!(
                        "unit {} belongs to more than one domain",
                        u
                    )));
                }
            }
        }

        let mut throttlers = BTreeSet::new();
        for t in &self.throttlers {
            if t.name.is_empty() || t.name.contains('/') || names.contains(t.name.as_str()) {
                return Err(DvfsError::Config(format!(
                    "throttler name {:?} is invalid or clashes with a domain",
                    t.name
                )));
            }
            if !throttlers.insert(t.name.as_str()) {
                return Err(DvfsError::Config(format!("duplicate throttler {}", t.name)));
            }
            if t.clusters.is_empty() {
                return Err(DvfsError::Config(format!("{}: no clusters", t.name)));
            }
            let p = &t.params;
            if p.range_temp_min_c > p.tjmax_c
                || p.avoid_shutdown_temp_c > p.shutdown_temp_c
                || p.bat_threshold_min_mv > p.bat_threshold_max_mv
            {
                return Err(DvfsError::Config(format!("{}: inconsistent thresholds", t.name)));
            }
            for c in &t.clusters {
                let table = self.throttle_table(c)?;
                for idx in [c.critical_index, c.fast_drop_index].into_iter().flatten() {
                    if idx >= table.len() {
                        return Err(DvfsError::Config(format!(
                            "{}: step {} out of range for {} ({} steps)",
                            t.name,
                            idx,
                            c.domain,
                            table.len()
                        )));
                    }
                }
            }
        }

        self.voltage_map()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::DecreaseRule;

    #[test]
    fn test_default_is_valid() {
        let c = DvfsConfig::default();
        c.validate().unwrap();
        assert_eq!(c.domains.len(), 3);
        assert_eq!(c.throttle_table(&c.throttlers[0].clusters[0]).unwrap().len(), 12);
    }

    #[test]
    fn test_default_big_follows_little() {
        let c = DvfsConfig::default();
        let big = c.domain("big").unwrap();
        assert_eq!(c.threshold_table(big).unwrap().frequencies()[..2].to_vec(), vec![832000, 1053000]);
        assert_eq!(c.domain_table(big).unwrap().lowest(), 741000);
        assert_eq!(big.policy.boost, ConservativeBoost::Always);
        let little = c.domain("little").unwrap();
        assert_eq!(little.policy.boost, ConservativeBoost::AfterLowestStep);
        assert_eq!(c.threshold_table(little).unwrap().name(), "little");
    }

    #[test]
    fn test_toml_round_trip() {
        let c = DvfsConfig::default();
        let s = c.to_toml().unwrap();
        assert!(s.contains("exynos8895-cl1"));
        let back = DvfsConfig::from_toml(&s).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let c = DvfsConfig::from_toml(
            r#"
            [[domains]]
            name = "little"
            units = "0-3"
            table = [455000, 598000, 715000]
            governor = "conservative"

            [domains.policy]
            boost = "always"
            decrease = "strict"

            [domains.tunables]
            up_threshold = 80
            "#,
        )
        .unwrap();
        assert!(c.throttlers.is_empty());
        let d = &c.domains[0];
        assert_eq!(d.transition_latency_us, 20);
        assert_eq!(d.policy.boost, ConservativeBoost::Always);
        assert_eq!(d.policy.decrease, Some(DecreaseRule::Strict));
        assert_eq!(d.tunables.up_threshold, Some(80));
        assert_eq!(c.units(d).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(c.sim, SimConfig::default());
    }

    #[test]
    fn test_rejects_bad_configs() {
        let mut c = DvfsConfig::default();
        c.domains[1].units = "3-5".to_string();
        assert!(c.validate().is_err());

        let mut c = DvfsConfig::default();
        c.throttlers[1].clusters[0].critical_index = Some(7);
        assert!(c.validate().is_err());

        let mut c = DvfsConfig::default();
        c.domains[0].table = TableSource::Preset("exynos9810-cl0".to_string());
        assert!(c.validate().is_err());

        let mut c = DvfsConfig::default();
        c.throttlers[0].name = "big".to_string();
        assert!(c.validate().is_err());

        let mut c = DvfsConfig::default();
        c.domains[1].threshold_table = Some(TableSource::Steps(vec![]));
        assert!(c.validate().is_err());

        assert!(DvfsConfig::from_toml("domains = 3").is_err());
    }
}
