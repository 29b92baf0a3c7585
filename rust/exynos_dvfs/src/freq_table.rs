// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: per-cluster frequency tables
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::DvfsError;
use crate::error::Result;

/// Rounding rule handed to the platform with every frequency request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    /// Lowest achievable frequency at or above the target. Used when raising.
    AtLeast,
    /// Highest achievable frequency at or below the target. Used when lowering.
    AtMost,
}

/// One entry of a cluster table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyStep {
    pub index: usize,
    pub frequency_khz: u32,
}

/// Ordered, strictly increasing set of operating points for one clock domain.
///
/// Immutable after construction. Every walk is by exact match on the current
/// frequency; a frequency that is not in the table has no neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTable {
    name: String,
    steps: Vec<u32>,
}

impl ClusterTable {
    pub fn new(name: impl Into<String>, steps: Vec<u32>) -> Result<Self> {
        let name = name.into();
        if steps.is_empty() {
            return Err(DvfsError::InvalidTable(format!("{}: no steps", name)));
        }
        if steps[0] == 0 {
            return Err(DvfsError::InvalidTable(format!("{}: zero frequency", name)));
        }
        if let Some(w) = steps.windows(2).find(|w| w[0] >= w[1]) {
            return Err(DvfsError::InvalidTable(format!(
                "{}: {} kHz is not below {} kHz",
                name, w[0], w[1]
            )));
        }
        Ok(Self { name, steps })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = FrequencyStep> + '_ {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, &frequency_khz)| FrequencyStep { index, frequency_khz })
    }

    pub fn lowest(&self) -> u32 {
        self.steps[0]
    }

    pub fn highest(&self) -> u32 {
        self.steps[self.steps.len() - 1]
    }

    pub fn frequency(&self, index: usize) -> Option<u32> {
        self.steps.get(index).copied()
    }

    pub fn index_of(&self, freq_khz: u32) -> Option<usize> {
        self.steps.binary_search(&freq_khz).ok()
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        (index + 1 < self.steps.len()).then_some(index + 1)
    }

    pub fn prev(&self, index: usize) -> Option<usize> {
        index.checked_sub(1).filter(|i| *i < self.steps.len())
    }

    /// Frequency one entry above `current`, `None` at the top or on a miss.
    pub fn step_up(&self, current_khz: u32) -> Option<u32> {
        let idx = self.index_of(current_khz)?;
        self.next(idx).map(|i| self.steps[i])
    }

    /// Frequency one entry below `current`, `None` at the bottom or on a miss.
    pub fn step_down(&self, current_khz: u32) -> Option<u32> {
        let idx = self.index_of(current_khz)?;
        self.prev(idx).map(|i| self.steps[i])
    }

    /// Highest step at or below `freq_khz`.
    pub fn floor(&self, freq_khz: u32) -> Option<u32> {
        self.steps.iter().rev().find(|&&f| f <= freq_khz).copied()
    }

    /// Lowest step at or above `freq_khz`.
    pub fn ceil(&self, freq_khz: u32) -> Option<u32> {
        self.steps.iter().find(|&&f| f >= freq_khz).copied()
    }

    /// Round `target_khz` onto the table according to `relation`, falling
    /// back to the nearest table edge when nothing satisfies it.
    pub fn resolve(&self, target_khz: u32, relation: Relation) -> u32 {
        match relation {
            Relation::AtLeast => self.ceil(target_khz).unwrap_or_else(|| self.highest()),
            Relation::AtMost => self.floor(target_khz).unwrap_or_else(|| self.lowest()),
        }
    }

    /// Down threshold derived from the first two steps of the table:
    /// `up * step0 / step1 - margin`, in integer math, floored at zero.
    pub fn derived_down_threshold(&self, up_threshold: u32, margin: u32) -> u32 {
        let step0 = self.steps[0] as u64;
        let step1 = self.steps.get(1).copied().unwrap_or(self.steps[0]) as u64;
        let scaled = (up_threshold as u64 * step0 / step1) as u32;
        scaled.saturating_sub(margin)
    }
}

impl fmt::Display for ClusterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.name)?;
        for (i, s) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", s)?;
        }
        write!(f, "]")
    }
}

/// Clamp `freq` into `[min, max]`. `min` wins if the bounds cross.
pub fn clamp_to_range(freq_khz: u32, min_khz: u32, max_khz: u32) -> u32 {
    if freq_khz > max_khz {
        max_khz.max(min_khz)
    } else if freq_khz < min_khz {
        min_khz
    } else {
        freq_khz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn little() -> ClusterTable {
        ClusterTable::new(
            "little",
            vec![832000, 1053000, 1248000, 1456000, 1690000, 1794000, 1898000, 2002000],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unsorted_tables() {
        assert!(ClusterTable::new("x", vec![]).is_err());
        assert!(ClusterTable::new("x", vec![0, 100]).is_err());
        assert!(ClusterTable::new("x", vec![200, 100]).is_err());
        assert!(ClusterTable::new("x", vec![100, 100]).is_err());
        assert!(ClusterTable::new("x", vec![100]).is_ok());
    }

    #[test]
    fn test_step_walks() {
        let t = little();
        assert_eq!(t.step_up(1248000), Some(1456000));
        assert_eq!(t.step_down(1248000), Some(1053000));
        assert_eq!(t.step_up(2002000), None);
        assert_eq!(t.step_down(832000), None);
        assert_eq!(t.step_up(1250000), None);
        assert_eq!(t.step_down(1250000), None);
    }

    #[test]
    fn test_step_down_then_up_returns_to_start() {
        let t = little();
        for f in t.frequencies() {
            match t.step_down(*f) {
                Some(lower) => assert_eq!(t.step_up(lower), Some(*f)),
                None => assert_eq!(*f, t.lowest()),
            }
        }
    }

    #[test]
    fn test_floor_ceil_resolve() {
        let t = little();
        assert_eq!(t.floor(1300000), Some(1248000));
        assert_eq!(t.ceil(1300000), Some(1456000));
        assert_eq!(t.floor(100), None);
        assert_eq!(t.ceil(3000000), None);
        assert_eq!(t.resolve(1300000, Relation::AtLeast), 1456000);
        assert_eq!(t.resolve(1300000, Relation::AtMost), 1248000);
        assert_eq!(t.resolve(3000000, Relation::AtLeast), 2002000);
        assert_eq!(t.resolve(100, Relation::AtMost), 832000);
    }

    #[test]
    fn test_clamp_to_range() {
        assert_eq!(clamp_to_range(5, 10, 20), 10);
        assert_eq!(clamp_to_range(25, 10, 20), 20);
        assert_eq!(clamp_to_range(15, 10, 20), 15);
        assert_eq!(clamp_to_range(15, 20, 10), 20);
    }

    #[test]
    fn test_derived_down_threshold() {
        let t = little();
        // 95 * 832000 / 1053000 = 75
        assert_eq!(t.derived_down_threshold(95, 25), 50);
        assert_eq!(t.derived_down_threshold(30, 25), 0);
        let single = ClusterTable::new("one", vec![500]).unwrap();
        assert_eq!(single.derived_down_threshold(80, 25), 55);
    }

    #[test]
    fn test_iter_indices() {
        let t = little();
        let steps: Vec<_> = t.iter().collect();
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[3], FrequencyStep { index: 3, frequency_khz: 1456000 });
        assert_eq!(t.index_of(2002000), Some(7));
        assert_eq!(t.prev(0), None);
        assert_eq!(t.next(7), None);
    }
}
