// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: conservative governor
//
// Raises and lowers the frequency gradually: one table entry per sample
// upward, and downward only once every `sampling_down_factor` samples.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use log::trace;

use super::ConservativeBoost;
use super::Decision;
use super::DecreaseRule;
use super::FrequencyPolicy;
use super::GovernorState;
use super::LoadGovernor;
use crate::freq_table::clamp_to_range;
use crate::freq_table::ClusterTable;
use crate::freq_table::Relation;
use crate::tunables::GovernorKind;
use crate::tunables::Tunables;
use crate::tunables::DEF_FREQUENCY_STEP;

/// Returns true when the downward check should run this sample.
fn down_skip_elapsed(state: &mut GovernorState, factor: u32) -> bool {
    state.down_skip += 1;
    if state.down_skip < factor {
        return false;
    }
    state.down_skip = 0;
    true
}

/// Table-stepping conservative.
#[derive(Debug, Clone, Copy)]
pub struct Conservative {
    pub boost: ConservativeBoost,
    pub decrease: DecreaseRule,
}

impl LoadGovernor for Conservative {
    fn kind(&self) -> GovernorKind {
        GovernorKind::Conservative
    }

    fn decide(
        &self,
        load: u32,
        state: &mut GovernorState,
        t: &Tunables,
        table: &ClusterTable,
        p: &FrequencyPolicy,
    ) -> Decision {
        if load >= t.up_threshold {
            state.down_skip = 0;
            if p.cur == p.max {
                return Decision::NoChange;
            }

            let boost = if t.boost { self.boost } else { ConservativeBoost::Disabled };
            let target = match boost {
                ConservativeBoost::Disabled => match table.step_up(p.cur) {
                    Some(f) => f,
                    None => return Decision::NoChange,
                },
                ConservativeBoost::AfterLowestStep if p.cur == table.lowest() => {
                    table.step_up(p.cur).unwrap_or(p.max)
                }
                ConservativeBoost::AfterLowestStep | ConservativeBoost::Always => p.max,
            };
            let target = clamp_to_range(target, p.min, p.max);
            trace!("{}: load {} up {} -> {}", table.name(), load, p.cur, target);
            state.requested_freq = target;
            return Decision::Request {
                target_khz: target,
                relation: Relation::AtLeast,
            };
        }

        if p.cur <= p.min {
            return Decision::NoChange;
        }
        if !down_skip_elapsed(state, t.sampling_down_factor) {
            return Decision::NoChange;
        }

        if self.decrease.holds(load, t.down_threshold) {
            let target = match table.step_down(p.cur) {
                Some(f) => clamp_to_range(f, p.min, p.max),
                None => return Decision::NoChange,
            };
            trace!("{}: load {} down {} -> {}", table.name(), load, p.cur, target);
            state.requested_freq = target;
            return Decision::Request {
                target_khz: target,
                relation: Relation::AtMost,
            };
        }
        Decision::NoChange
    }
}

/// Conservative that moves a fixed percentage of max per sample and lets the
/// platform round onto the table.
#[derive(Debug, Clone, Copy)]
pub struct ConservativeStep {
    pub decrease: DecreaseRule,
}

impl ConservativeStep {
    fn freq_target(t: &Tunables, max: u32) -> u32 {
        let step = (t.freq_step as u64 * max as u64 / 100) as u32;
        if step == 0 {
            DEF_FREQUENCY_STEP
        } else {
            step
        }
    }
}

impl LoadGovernor for ConservativeStep {
    fn kind(&self) -> GovernorKind {
        GovernorKind::ConservativeStep
    }

    fn decide(
        &self,
        load: u32,
        state: &mut GovernorState,
        t: &Tunables,
        _table: &ClusterTable,
        p: &FrequencyPolicy,
    ) -> Decision {
        // The tracked target drifts from reality when limits move under it.
        if state.requested_freq > p.max || state.requested_freq < p.min {
            state.requested_freq = p.cur;
        }

        if load >= t.up_threshold {
            state.down_skip = 0;
            if state.requested_freq >= p.max {
                return Decision::NoChange;
            }
            let requested = state
                .requested_freq
                .saturating_add(Self::freq_target(t, p.max))
                .min(p.max);
            state.requested_freq = requested;
            return Decision::Request {
                target_khz: requested,
                relation: Relation::AtLeast,
            };
        }

        if !down_skip_elapsed(state, t.sampling_down_factor) {
            return Decision::NoChange;
        }

        if self.decrease.holds(load, t.down_threshold) {
            if state.requested_freq <= p.min {
                return Decision::NoChange;
            }
            let step = Self::freq_target(t, p.max);
            let requested = if state.requested_freq > step {
                (state.requested_freq - step).max(p.min)
            } else {
                p.min
            };
            state.requested_freq = requested;
            return Decision::Request {
                target_khz: requested,
                relation: Relation::AtMost,
            };
        }
        Decision::NoChange
    }
}
