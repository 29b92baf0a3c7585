// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: frequency/voltage map
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::PoisonError;
use std::sync::RwLock;

use log::info;
use serde::Deserialize;
use serde::Serialize;

use crate::error::DvfsError;
use crate::error::Result;

pub const MIN_VOLTAGE_UV: u32 = 450_000;
pub const MAX_VOLTAGE_UV: u32 = 1_350_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateVolt {
    pub rate_khz: u32,
    pub volt_uv: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FvmapDomain {
    pub id: u32,
    pub name: String,
    /// Rejects updates outside [`MIN_VOLTAGE_UV`, `MAX_VOLTAGE_UV`].
    #[serde(default)]
    pub voltage_window: bool,
    pub levels: Vec<RateVolt>,
}

impl FvmapDomain {
    pub fn from_pairs(id: u32, name: &str, voltage_window: bool, pairs: &[(u32, u32)]) -> Self {
        Self {
            id,
            name: name.to_string(),
            voltage_window,
            levels: pairs
                .iter()
                .map(|&(rate_khz, volt_uv)| RateVolt { rate_khz, volt_uv })
                .collect(),
        }
    }
}

/// Voltage lookup per (domain id, rate), with runtime updates.
pub struct VoltageMap {
    domains: RwLock<Vec<FvmapDomain>>,
}

impl VoltageMap {
    pub fn new(domains: Vec<FvmapDomain>) -> Result<Self> {
        let mut ids = BTreeSet::new();
        for d in &domains {
            if !ids.insert(d.id) {
                return Err(DvfsError::Config(format!("duplicate fvmap id {}", d.id)));
            }
            let mut rates = BTreeSet::new();
            if !d.levels.iter().all(|l| rates.insert(l.rate_khz)) {
                return Err(DvfsError::Config(format!(
                    "fvmap {} ({}) lists a rate twice",
                    d.name, d.id
                )));
            }
        }
        Ok(Self {
            domains: RwLock::new(domains),
        })
    }

    pub fn domains(&self) -> Vec<FvmapDomain> {
        self.domains.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn voltage_for_frequency(&self, id: u32, rate_khz: u32) -> Option<u32> {
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
        domains
            .iter()
            .find(|d| d.id == id)?
            .levels
            .iter()
            .find(|l| l.rate_khz == rate_khz)
            .map(|l| l.volt_uv)
    }

    /// Same lookup keyed by domain name.
    pub fn voltage_by_name(&self, name: &str, rate_khz: u32) -> Option<u32> {
        let id = {
            let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
            domains.iter().find(|d| d.name == name)?.id
        };
        self.voltage_for_frequency(id, rate_khz)
    }

    pub fn update(&self, id: u32, rate_khz: u32, volt_uv: u32) -> Result<()> {
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
        let d = domains
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DvfsError::UnknownDomain(format!("fvmap id {}", id)))?;
        if d.voltage_window && !(MIN_VOLTAGE_UV..=MAX_VOLTAGE_UV).contains(&volt_uv) {
            return Err(DvfsError::VoltageOutOfRange {
                volt_uv,
                min_uv: MIN_VOLTAGE_UV,
                max_uv: MAX_VOLTAGE_UV,
            });
        }
        let name = d.name.clone();
        let level = d
            .levels
            .iter_mut()
            .find(|l| l.rate_khz == rate_khz)
            .ok_or_else(|| {
                DvfsError::invalid(
                    "update_dvfs_table",
                    rate_khz,
                    format!("no level at this rate in {}", name),
                )
            })?;
        info!("fvmap: {} ({}) {} kHz: {} -> {} uV", name, id, rate_khz, level.volt_uv, volt_uv);
        level.volt_uv = volt_uv;
        Ok(())
    }

    /// Apply an `"<id> <rate> <volt>"` write.
    pub fn apply_update(&self, raw: &str) -> Result<(u32, u32, u32)> {
        let fields: Vec<u32> = raw
            .split_whitespace()
            .map(|f| f.parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| DvfsError::invalid("update_dvfs_table", raw, "expected <id> <rate> <volt>"))?;
        let [id, rate, volt] = fields[..] else {
            return Err(DvfsError::invalid(
                "update_dvfs_table",
                raw,
                "expected <id> <rate> <volt>",
            ));
        };
        self.update(id, rate, volt)?;
        Ok((id, rate, volt))
    }

    pub fn format(&self) -> String {
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for d in domains.iter() {
            let _ = writeln!(out, "dvfs_type : {} - id : {:x}", d.name, d.id);
            let _ = writeln!(out, "  num_of_lv      : {}", d.levels.len());
            for l in &d.levels {
                let _ = writeln!(out, "  lv : [{:>7}], volt = {} uV", l.rate_khz, l.volt_uv);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets;

    fn map() -> VoltageMap {
        VoltageMap::new(vec![
            FvmapDomain::from_pairs(2, "big", true, presets::EXYNOS8895_FVMAP_BIG),
            FvmapDomain::from_pairs(9, "cp", false, &[(100000, 300000)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let m = map();
        assert_eq!(m.voltage_for_frequency(2, 2808000), Some(1250000));
        assert_eq!(m.voltage_for_frequency(2, 2800000), None);
        assert_eq!(m.voltage_for_frequency(7, 2808000), None);
        assert_eq!(m.voltage_by_name("big", 741000), Some(625000));
    }

    #[test]
    fn test_update() {
        let m = map();
        assert_eq!(m.apply_update("2 2808000 1200000").unwrap(), (2, 2808000, 1200000));
        assert_eq!(m.voltage_for_frequency(2, 2808000), Some(1200000));

        assert!(matches!(
            m.update(2, 2808000, 1400000),
            Err(DvfsError::VoltageOutOfRange { .. })
        ));
        assert!(matches!(m.update(5, 2808000, 900000), Err(DvfsError::UnknownDomain(_))));
        assert!(m.update(2, 2808001, 900000).is_err());
        assert!(m.apply_update("2 2808000").is_err());
        assert!(m.apply_update("2 x 1").is_err());
        // no window on this one
        m.update(9, 100000, 200000).unwrap();
        assert_eq!(m.voltage_for_frequency(2, 2808000), Some(1200000));
    }

    #[test]
    fn test_rejects_duplicates() {
        let d = FvmapDomain::from_pairs(1, "a", false, &[(1, 1)]);
        assert!(VoltageMap::new(vec![d.clone(), d]).is_err());
        let d = FvmapDomain::from_pairs(1, "a", false, &[(1, 1), (1, 2)]);
        assert!(VoltageMap::new(vec![d]).is_err());
    }

    #[test]
    fn test_format() {
        let s = map().format();
        assert!(s.contains("dvfs_type : big - id : 2"));
        assert!(s.contains("lv : [2808000], volt = 1250000 uV"));
    }
}
