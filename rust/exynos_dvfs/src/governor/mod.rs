// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: load-driven frequency governors
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod conservative;
mod ondemand;

pub use conservative::Conservative;
pub use conservative::ConservativeStep;
pub use ondemand::Ondemand;

use serde::Deserialize;
use serde::Serialize;

use crate::freq_table::ClusterTable;
use crate::freq_table::Relation;
use crate::tunables::GovernorKind;
use crate::tunables::Tunables;

/// Frequency window a decision is made in. `max` is the hardware maximum
/// already intersected with any throttling ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyPolicy {
    pub cur: u32,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoChange,
    Request { target_khz: u32, relation: Relation },
}

impl Decision {
    pub fn target(&self) -> Option<u32> {
        match self {
            Decision::NoChange => None,
            Decision::Request { target_khz, .. } => Some(*target_khz),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleType {
    #[default]
    Normal,
    /// Second half of a powersave-bias period: apply `freq_lo` without
    /// evaluating load.
    Sub,
}

/// Per-domain bookkeeping owned by the sampling task. Only `decide()` and
/// the task advancing it touch this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorState {
    /// Last frequency handed to the platform (tracked target of the
    /// percentage variant).
    pub requested_freq: u32,
    /// Evaluations skipped since the last downward check.
    pub down_skip: u32,
    /// Sampling period multiplier, >1 while ondemand holds max.
    pub rate_mult: u32,
    pub sample_type: SampleType,
    /// Lower half of a powersave-bias split, 0 when inactive.
    pub freq_lo: u32,
    pub freq_lo_delay_us: u64,
    pub freq_hi_delay_us: u64,
}

impl GovernorState {
    pub fn new(cur_khz: u32) -> Self {
        Self {
            requested_freq: cur_khz,
            down_skip: 0,
            rate_mult: 1,
            sample_type: SampleType::Normal,
            freq_lo: 0,
            freq_lo_delay_us: 0,
            freq_hi_delay_us: 0,
        }
    }
}

/// How conservative reacts to load above `up_threshold` when the `boost`
/// tunable is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConservativeBoost {
    /// Single-step regardless of the tunable.
    Disabled,
    /// Single step off the lowest table entry, straight to max from anywhere
    /// else.
    #[default]
    AfterLowestStep,
    /// Straight to max from anywhere.
    Always,
}

/// Comparison used for the downward check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecreaseRule {
    /// `load < down_threshold`
    Strict,
    /// `load <= down_threshold`
    Inclusive,
}

impl DecreaseRule {
    pub fn holds(self, load: u32, down_threshold: u32) -> bool {
        match self {
            DecreaseRule::Strict => load < down_threshold,
            DecreaseRule::Inclusive => load <= down_threshold,
        }
    }
}

/// A frequency selection policy. Implementations are stateless; everything
/// that evolves between samples lives in [`GovernorState`].
pub trait LoadGovernor: Send + Sync {
    fn kind(&self) -> GovernorKind;

    /// Pick the next request for a domain whose busiest unit ran at `load`
    /// percent over the last sample.
    fn decide(
        &self,
        load: u32,
        state: &mut GovernorState,
        tunables: &Tunables,
        table: &ClusterTable,
        policy: &FrequencyPolicy,
    ) -> Decision;

    /// Threshold at or below which the frequency may drop, derived from
    /// `up_threshold` and the bottom of the table.
    fn down_threshold(&self, up_threshold: u32, table: &ClusterTable) -> u32 {
        table.derived_down_threshold(up_threshold, self.kind().limits().down_margin)
    }
}

/// Policy knobs that differ between deployments of the same governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorPolicy {
    /// Only read by conservative; other governors ignore it.
    pub boost: ConservativeBoost,
    /// `None` picks the governor's native comparison.
    pub decrease: Option<DecreaseRule>,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        Self {
            boost: ConservativeBoost::default(),
            decrease: None,
        }
    }
}

pub fn build(kind: GovernorKind, policy: &GovernorPolicy) -> Box<dyn LoadGovernor> {
    match kind {
        GovernorKind::Conservative => Box::new(Conservative {
            boost: policy.boost,
            decrease: policy.decrease.unwrap_or(DecreaseRule::Inclusive),
        }),
        GovernorKind::ConservativeStep => Box::new(ConservativeStep {
            decrease: policy.decrease.unwrap_or(DecreaseRule::Inclusive),
        }),
        GovernorKind::Ondemand => Box::new(Ondemand {
            decrease: policy.decrease.unwrap_or(DecreaseRule::Strict),
        }),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::presets;

    pub fn little() -> ClusterTable {
        ClusterTable::new("little", presets::EXYNOS8895_CL0.to_vec()).unwrap()
    }

    pub fn tunables(kind: GovernorKind, table: &ClusterTable) -> Tunables {
        Tunables::defaults(kind, table, 20)
    }

    pub fn policy(table: &ClusterTable, cur: u32) -> FrequencyPolicy {
        FrequencyPolicy {
            cur,
            min: table.lowest(),
            max: table.highest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    /// Loads strictly between the thresholds never move any governor.
    #[test]
    fn test_dead_band_is_inert() {
        let table = little();
        for kind in [
            GovernorKind::Conservative,
            GovernorKind::ConservativeStep,
            GovernorKind::Ondemand,
        ] {
            let gov = build(kind, &GovernorPolicy::default());
            let t = tunables(kind, &table);
            for &cur in table.frequencies() {
                let mut state = GovernorState::new(cur);
                for load in (t.down_threshold + 1)..t.up_threshold {
                    for _ in 0..t.sampling_down_factor + 1 {
                        let d = gov.decide(load, &mut state, &t, &table, &policy(&table, cur));
                        assert_eq!(d, Decision::NoChange, "{} load {} cur {}", kind, load, cur);
                    }
                }
            }
        }
    }

    /// Load at or above `up_threshold` strictly raises the request below max
    /// and never exceeds it.
    #[test]
    fn test_busy_never_lowers_or_overshoots() {
        let table = little();
        for kind in [
            GovernorKind::Conservative,
            GovernorKind::ConservativeStep,
            GovernorKind::Ondemand,
        ] {
            let gov = build(kind, &GovernorPolicy::default());
            let t = tunables(kind, &table);
            for &cur in &table.frequencies()[..table.len() - 1] {
                let mut state = GovernorState::new(cur);
                let d = gov.decide(t.up_threshold, &mut state, &t, &table, &policy(&table, cur));
                let target = d.target().unwrap();
                assert!(target > cur && target <= table.highest(), "{} {}", kind, cur);
            }
        }
    }

    #[test]
    fn test_down_threshold_tracks_tunables() {
        let table = little();
        for kind in [
            GovernorKind::Conservative,
            GovernorKind::ConservativeStep,
            GovernorKind::Ondemand,
        ] {
            let gov = build(kind, &GovernorPolicy::default());
            let t = tunables(kind, &table);
            assert_eq!(gov.kind(), kind);
            assert_eq!(gov.down_threshold(t.up_threshold, &table), t.down_threshold);
        }
        let gov = build(GovernorKind::Ondemand, &GovernorPolicy::default());
        // 95 * 832000 / 1053000 = 75, minus 25
        assert_eq!(gov.down_threshold(95, &table), 50);
        assert_eq!(gov.down_threshold(30, &table), 0);
    }

    #[test]
    fn test_decrease_rule() {
        assert!(DecreaseRule::Strict.holds(49, 50));
        assert!(!DecreaseRule::Strict.holds(50, 50));
        assert!(DecreaseRule::Inclusive.holds(50, 50));
        assert!(!DecreaseRule::Inclusive.holds(51, 50));
    }
}
