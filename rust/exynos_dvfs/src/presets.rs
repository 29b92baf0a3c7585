// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: Exynos 8895 operating point presets
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

/// Little cluster (cpu0-3) as seen by ondemand and the CPU throttler.
pub const EXYNOS8895_CL0: &[u32] = &[
    832000, 1053000, 1248000, 1456000, 1690000, 1794000, 1898000, 2002000,
];

/// Big cluster (cpu4-7) as seen by ondemand and the CPU throttler.
pub const EXYNOS8895_CL1: &[u32] = &[
    741000, 962000, 1170000, 1469000, 1703000, 1937000, 2158000, 2314000, 2496000, 2652000,
    2704000, 2808000,
];

/// Little cluster table walked by the conservative governor.
pub const EXYNOS8895_CL0_CONSERVATIVE: &[u32] = &[
    455000, 598000, 715000, 832000, 949000, 1053000, 1248000, 1456000, 1690000, 1794000,
    1898000, 2002000,
];

/// Big cluster table walked by the conservative governor.
pub const EXYNOS8895_CL1_CONSERVATIVE: &[u32] = &[
    741000, 858000, 962000, 1066000, 1170000, 1261000, 1469000, 1703000, 1807000, 1937000,
    2002000, 2158000, 2314000, 2496000, 2574000, 2652000, 2704000, 2808000,
];

/// Mali G71 steps.
pub const EXYNOS8895_G3D: &[u32] = &[260000, 338000, 455000, 572000, 683000, 764000, 839000];

/// Rate/voltage pairs (kHz, uV) of the big cluster voltage map, id 2.
pub const EXYNOS8895_FVMAP_BIG: &[(u32, u32)] = &[
    (741000, 625000),
    (962000, 675000),
    (1170000, 718750),
    (1469000, 787500),
    (1703000, 843750),
    (1937000, 900000),
    (2158000, 950000),
    (2314000, 993750),
    (2496000, 1050000),
    (2652000, 1125000),
    (2704000, 1150000),
    (2808000, 1250000),
];

/// Little cluster voltage map, id 3.
pub const EXYNOS8895_FVMAP_LITTLE: &[(u32, u32)] = &[
    (832000, 600000),
    (1053000, 650000),
    (1248000, 700000),
    (1456000, 762500),
    (1690000, 850000),
    (1794000, 1100000),
    (1898000, 1150000),
    (2002000, 1250000),
];

/// GPU voltage map, id 4.
pub const EXYNOS8895_FVMAP_G3D: &[(u32, u32)] = &[
    (260000, 575000),
    (338000, 600000),
    (455000, 637500),
    (572000, 693750),
    (683000, 750000),
    (764000, 800000),
    (839000, 850000),
];

static PRESETS: Lazy<BTreeMap<&'static str, &'static [u32]>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    m.insert("exynos8895-cl0", EXYNOS8895_CL0);
    m.insert("exynos8895-cl1", EXYNOS8895_CL1);
    m.insert("exynos8895-cl0-conservative", EXYNOS8895_CL0_CONSERVATIVE);
    m.insert("exynos8895-cl1-conservative", EXYNOS8895_CL1_CONSERVATIVE);
    m.insert("exynos8895-g3d", EXYNOS8895_G3D);
    m
});

/// Look up a named frequency table.
pub fn table(name: &str) -> Option<&'static [u32]> {
    PRESETS.get(name).copied()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    PRESETS.keys().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq_table::ClusterTable;

    #[test]
    fn test_presets_are_valid_tables() {
        for name in names() {
            let steps = table(name).unwrap();
            assert!(ClusterTable::new(name, steps.to_vec()).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(table("exynos8895-g3d").map(|t| t.len()), Some(7));
        assert_eq!(table("exynos8895-cl1-conservative").map(|t| t.len()), Some(18));
        assert!(table("nope").is_none());
    }

    #[test]
    fn test_voltage_maps_cover_tables() {
        for (map, steps) in [
            (EXYNOS8895_FVMAP_BIG, EXYNOS8895_CL1),
            (EXYNOS8895_FVMAP_LITTLE, EXYNOS8895_CL0),
            (EXYNOS8895_FVMAP_G3D, EXYNOS8895_G3D),
        ] {
            let rates: Vec<u32> = map.iter().map(|&(r, _)| r).collect();
            assert_eq!(rates, steps);
            assert!(map.windows(2).all(|w| w[0].1 <= w[1].1));
        }
    }
}
