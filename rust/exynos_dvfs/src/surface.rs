// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: string-keyed control surface
//
// Every runtime knob is reachable as "<node>/<attribute>": one node per
// governed domain, one per throttler, plus "fvmap" and "power".
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::error::DvfsError;
use crate::error::Result;
use crate::fvmap::VoltageMap;
use crate::throttle::ThrottleControl;
use crate::tunables::SharedTunables;
use crate::tunables::TunableValue;

pub const FVMAP_NODE: &str = "fvmap";
pub const POWER_NODE: &str = "power";

const FVMAP_ATTRIBUTES: &[&str] = &["print_dvfs_table", "update_dvfs_table"];
const POWER_ATTRIBUTES: &[&str] = &["suspend"];

#[derive(Clone, Default)]
pub struct ControlSurface {
    governors: BTreeMap<String, SharedTunables>,
    throttlers: BTreeMap<String, Arc<ThrottleControl>>,
    fvmap: Option<Arc<VoltageMap>>,
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once('/')
        .filter(|(n, a)| !n.is_empty() && !a.is_empty())
        .ok_or_else(|| DvfsError::UnknownTunable(key.to_string()))
}

impl ControlSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_governor(&mut self, domain: &str, tunables: SharedTunables) {
        self.governors.insert(domain.to_string(), tunables);
    }

    pub fn add_throttler(&mut self, name: &str, control: Arc<ThrottleControl>) {
        self.throttlers.insert(name.to_string(), control);
    }

    pub fn set_voltage_map(&mut self, fvmap: Arc<VoltageMap>) {
        self.fvmap = Some(fvmap);
    }

    pub fn governor(&self, domain: &str) -> Option<&SharedTunables> {
        self.governors.get(domain)
    }

    pub fn throttler(&self, name: &str) -> Option<&Arc<ThrottleControl>> {
        self.throttlers.get(name)
    }

    fn fvmap(&self) -> Result<&VoltageMap> {
        self.fvmap
            .as_deref()
            .ok_or_else(|| DvfsError::UnknownDomain(FVMAP_NODE.to_string()))
    }

    fn suspended(&self) -> bool {
        self.governors.values().any(|t| t.is_suspended())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let (node, attr) = split_key(key)?;
        if let Some(t) = self.governors.get(node) {
            return t.get(attr);
        }
        if let Some(c) = self.throttlers.get(node) {
            return c.get(attr);
        }
        match (node, attr) {
            (FVMAP_NODE, "print_dvfs_table") => Ok(self.fvmap()?.format()),
            (FVMAP_NODE, "update_dvfs_table") => Err(DvfsError::UnknownTunable(key.to_string())),
            (POWER_NODE, "suspend") => Ok((self.suspended() as u8).to_string()),
            (FVMAP_NODE, _) | (POWER_NODE, _) => Err(DvfsError::UnknownTunable(key.to_string())),
            _ => Err(DvfsError::UnknownDomain(node.to_string())),
        }
    }

    /// Apply one write and return the value actually accepted.
    pub fn set(&self, key: &str, value: &str) -> Result<TunableValue> {
        let (node, attr) = split_key(key)?;
        let accepted = if let Some(t) = self.governors.get(node) {
            t.set(attr, value)?
        } else if let Some(c) = self.throttlers.get(node) {
            c.set(attr, value)?
        } else {
            match (node, attr) {
                (FVMAP_NODE, "update_dvfs_table") => {
                    let (id, rate, volt) = self.fvmap()?.apply_update(value)?;
                    TunableValue::Text(format!("{} {} {}", id, rate, volt))
                }
                (FVMAP_NODE, "print_dvfs_table") => {
                    return Err(DvfsError::ReadOnlyTunable(key.to_string()))
                }
                (POWER_NODE, "suspend") => {
                    let on = match value.trim() {
                        "1" | "Y" | "y" | "true" => true,
                        "0" | "N" | "n" | "false" => false,
                        v => return Err(DvfsError::invalid(key, v, "expected 0 or 1")),
                    };
                    for t in self.governors.values() {
                        t.apply_suspend(on);
                    }
                    TunableValue::Flag(on)
                }
                (FVMAP_NODE, _) | (POWER_NODE, _) => {
                    return Err(DvfsError::UnknownTunable(key.to_string()))
                }
                _ => return Err(DvfsError::UnknownDomain(node.to_string())),
            }
        };
        info!("{} <- {}", key, accepted);
        Ok(accepted)
    }

    /// Every key, sorted by node.
    pub fn list(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (node, t) in &self.governors {
            keys.extend(t.kind().attributes().iter().map(|a| format!("{}/{}", node, a)));
        }
        for (node, c) in &self.throttlers {
            keys.extend(c.attributes().iter().map(|a| format!("{}/{}", node, a)));
        }
        if self.fvmap.is_some() {
            keys.extend(FVMAP_ATTRIBUTES.iter().map(|a| format!("{}/{}", FVMAP_NODE, a)));
        }
        keys.extend(POWER_ATTRIBUTES.iter().map(|a| format!("{}/{}", POWER_NODE, a)));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq_table::ClusterTable;
    use crate::fvmap::FvmapDomain;
    use crate::presets;
    use crate::throttle::ThrottleParams;
    use crate::tunables::GovernorKind;
    use crate::tunables::TunableOverrides;

    fn surface() -> ControlSurface {
        let table = Arc::new(ClusterTable::new("little", presets::EXYNOS8895_CL0.to_vec()).unwrap());
        let mut s = ControlSurface::new();
        s.add_governor(
            "little",
            SharedTunables::new(GovernorKind::Ondemand, table, 20, &TunableOverrides::default()).unwrap(),
        );
        s.add_throttler("cpu", Arc::new(ThrottleControl::new(ThrottleParams::default())));
        s.set_voltage_map(Arc::new(
            VoltageMap::new(vec![FvmapDomain::from_pairs(
                2,
                "big",
                true,
                presets::EXYNOS8895_FVMAP_BIG,
            )])
            .unwrap(),
        ));
        s
    }

    #[test]
    fn test_routes_by_node() {
        let s = surface();
        assert_eq!(s.set("little/up_threshold", "80").unwrap(), TunableValue::Number(80));
        assert_eq!(s.get("little/up_threshold").unwrap(), "80");
        assert_eq!(s.set("cpu/dvfs_max_temp", "70").unwrap(), TunableValue::Number(70));
        assert_eq!(s.get("cpu/dvfs_max_temp").unwrap(), "70");
        assert_eq!(s.get("cpu/dvfs_level").unwrap(), "normal");
    }

    #[test]
    fn test_errors() {
        let s = surface();
        assert!(matches!(s.get("gpu/up_threshold"), Err(DvfsError::UnknownDomain(_))));
        assert!(matches!(s.get("little/freq_step"), Err(DvfsError::UnknownTunable(_))));
        assert!(matches!(s.get("little"), Err(DvfsError::UnknownTunable(_))));
        assert!(matches!(
            s.set("little/down_threshold", "10"),
            Err(DvfsError::ReadOnlyTunable(_))
        ));
        assert!(matches!(
            s.set("fvmap/print_dvfs_table", "1"),
            Err(DvfsError::ReadOnlyTunable(_))
        ));
        assert!(s.set("little/up_threshold", "5").is_err());
        assert_eq!(s.get("little/up_threshold").unwrap(), "95");
    }

    #[test]
    fn test_fvmap_node() {
        let s = surface();
        let v = s.set("fvmap/update_dvfs_table", "2 2808000 1200000").unwrap();
        assert_eq!(v.to_string(), "2 2808000 1200000");
        assert!(s.get("fvmap/print_dvfs_table").unwrap().contains("volt = 1200000 uV"));
        assert!(s.set("fvmap/update_dvfs_table", "2 2808000 2000000").is_err());
    }

    #[test]
    fn test_suspend_switches_profile() {
        let s = surface();
        s.set("little/up_threshold", "80").unwrap();
        assert_eq!(s.get("power/suspend").unwrap(), "0");
        s.set("power/suspend", "1").unwrap();
        assert_eq!(s.get("power/suspend").unwrap(), "1");
        assert_eq!(s.get("little/up_threshold").unwrap(), "95");
        s.set("power/suspend", "0").unwrap();
        assert_eq!(s.get("little/up_threshold").unwrap(), "80");
    }

    #[test]
    fn test_list() {
        let keys = surface().list();
        assert!(keys.contains(&"little/powersave_bias".to_string()));
        assert!(keys.contains(&"cpu/dvfs_limit".to_string()));
        assert!(keys.contains(&"fvmap/update_dvfs_table".to_string()));
        assert_eq!(keys.last().map(String::as_str), Some("power/suspend"));
        for k in keys.iter().filter(|k| !k.starts_with("fvmap/update")) {
            assert!(surface().get(k).is_ok(), "{}", k);
        }
    }
}
