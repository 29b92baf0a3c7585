// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: ondemand governor
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use log::trace;

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

/// Steps up one entry per busy sample (or straight to max with boost) and
/// holds max for `sampling_down_factor` periods once it gets there.
#[derive(Debug, Clone, Copy)]
pub struct Ondemand {
    pub decrease: DecreaseRule,
}

impl Ondemand {
    /// Split `target` into a hi/lo pair averaging `target * (1 - bias/1000)`
    /// over one sampling period. Returns the frequency to apply first.
    fn powersave_bias_target(
        target: u32,
        state: &mut GovernorState,
        t: &Tunables,
        table: &ClusterTable,
        p: &FrequencyPolicy,
    ) -> u32 {
        state.freq_lo = 0;
        state.freq_lo_delay_us = 0;
        state.freq_hi_delay_us = 0;
        if t.powersave_bias == 0 {
            return target;
        }

        let reduc = (target as u64 * t.powersave_bias as u64 / 1000) as u32;
        let avg = target - reduc;
        let lo = clamp_to_range(table.floor(avg).unwrap_or(table.lowest()), p.min, p.max);
        let hi = clamp_to_range(table.ceil(avg).unwrap_or(table.highest()), p.min, p.max);
        if hi <= lo {
            return lo;
        }

        let rate = t.sampling_rate_us as u64;
        let span = (hi - lo) as u64;
        let hi_delay = ((avg.saturating_sub(lo)) as u64 * rate + span / 2) / span;
        state.freq_hi_delay_us = hi_delay;
        state.freq_lo = lo;
        state.freq_lo_delay_us = rate.saturating_sub(hi_delay);
        hi
    }
}

impl LoadGovernor for Ondemand {
    fn kind(&self) -> GovernorKind {
        GovernorKind::Ondemand
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
            if p.cur >= p.max {
                return Decision::NoChange;
            }
            let target = if t.boost {
                p.max
            } else {
                table.step_up(p.cur).unwrap_or(p.max)
            };
            let target = clamp_to_range(target, p.min, p.max);
            if target == p.max {
                state.rate_mult = t.sampling_down_factor;
            }
            trace!("{}: load {} up {} -> {}", table.name(), load, p.cur, target);
            let target = Self::powersave_bias_target(target, state, t, table, p);
            state.requested_freq = target;
            return Decision::Request {
                target_khz: target,
                relation: Relation::AtLeast,
            };
        }

        state.rate_mult = 1;
        if p.cur <= p.min {
            return Decision::NoChange;
        }

        if self.decrease.holds(load, t.down_threshold) {
            let target = table.step_down(p.cur).unwrap_or(p.min);
            let target = clamp_to_range(target, p.min, p.max);
            trace!("{}: load {} down {} -> {}", table.name(), load, p.cur, target);
            let target = Self::powersave_bias_target(target, state, t, table, p);
            state.requested_freq = target;
            return Decision::Request {
                target_khz: target,
                relation: Relation::AtMost,
            };
        }
        Decision::NoChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::test_util::*;

    fn od() -> Ondemand {
        Ondemand {
            decrease: DecreaseRule::Strict,
        }
    }

    #[test]
    fn test_step_up_and_rate_mult_at_max() {
        let table = little();
        let t = tunables(GovernorKind::Ondemand, &table);
        let mut s = GovernorState::new(1248000);
        let d = od().decide(96, &mut s, &t, &table, &policy(&table, 1248000));
        assert_eq!(
            d,
            Decision::Request {
                target_khz: 1456000,
                relation: Relation::AtLeast
            }
        );
        assert_eq!(s.rate_mult, 1);

        let mut s = GovernorState::new(1898000);
        let d = od().decide(96, &mut s, &t, &table, &policy(&table, 1898000));
        assert_eq!(d.target(), Some(2002000));
        assert_eq!(s.rate_mult, t.sampling_down_factor);

        // any sample below up_threshold drops the multiplier
        let d = od().decide(60, &mut s, &t, &table, &policy(&table, 2002000));
        assert_eq!(d, Decision::NoChange);
        assert_eq!(s.rate_mult, 1);
    }

    #[test]
    fn test_reaching_ceiling_counts_as_max() {
        let table = little();
        let t = tunables(GovernorKind::Ondemand, &table);
        let p = FrequencyPolicy {
            cur: 1248000,
            min: table.lowest(),
            max: 1456000,
        };
        let mut s = GovernorState::new(1248000);
        assert_eq!(od().decide(100, &mut s, &t, &table, &p).target(), Some(1456000));
        assert_eq!(s.rate_mult, t.sampling_down_factor);

        let p = FrequencyPolicy { cur: 1456000, ..p };
        assert_eq!(od().decide(100, &mut s, &t, &table, &p), Decision::NoChange);
    }

    #[test]
    fn test_boost_jumps_to_max() {
        let table = little();
        let mut t = tunables(GovernorKind::Ondemand, &table);
        t.boost = true;
        let mut s = GovernorState::new(832000);
        let d = od().decide(100, &mut s, &t, &table, &policy(&table, 832000));
        assert_eq!(d.target(), Some(2002000));
    }

    #[test]
    fn test_miss_falls_back_to_limits() {
        let table = little();
        let t = tunables(GovernorKind::Ondemand, &table);
        let mut s = GovernorState::new(1300000);
        let p = policy(&table, 1300000);
        assert_eq!(od().decide(100, &mut s, &t, &table, &p).target(), Some(2002000));
        assert_eq!(od().decide(0, &mut s, &t, &table, &p).target(), Some(832000));
    }

    #[test]
    fn test_decrease_comparison() {
        let table = little();
        let t = tunables(GovernorKind::Ondemand, &table);
        assert_eq!(t.down_threshold, 50);
        let p = policy(&table, 1456000);

        let mut s = GovernorState::new(1456000);
        assert_eq!(od().decide(50, &mut s, &t, &table, &p), Decision::NoChange);
        assert_eq!(
            od().decide(49, &mut s, &t, &table, &p),
            Decision::Request {
                target_khz: 1248000,
                relation: Relation::AtMost
            }
        );

        let inclusive = Ondemand {
            decrease: DecreaseRule::Inclusive,
        };
        assert_eq!(inclusive.decide(50, &mut s, &t, &table, &p).target(), Some(1248000));
    }

    #[test]
    fn test_no_debounce_on_the_way_down() {
        let table = little();
        let t = tunables(GovernorKind::Ondemand, &table);
        let mut s = GovernorState::new(2002000);
        let d = od().decide(10, &mut s, &t, &table, &policy(&table, 2002000));
        assert_eq!(d.target(), Some(1898000));
    }

    #[test]
    fn test_powersave_bias_split() {
        let table = little();
        let mut t = tunables(GovernorKind::Ondemand, &table);
        t.powersave_bias = 100;
        t.sampling_rate_us = 20_000;
        let mut s = GovernorState::new(1248000);
        // 1456000 - 10% = 1310400, between 1248000 and 1456000
        let d = od().decide(100, &mut s, &t, &table, &policy(&table, 1248000));
        assert_eq!(d.target(), Some(1456000));
        assert_eq!(s.freq_lo, 1248000);
        // (62400 * 20000 + 104000) / 208000 = 6000
        assert_eq!(s.freq_hi_delay_us, 6000);
        assert_eq!(s.freq_lo_delay_us, 14000);
    }

    #[test]
    fn test_powersave_bias_exact_step() {
        let table = ClusterTable::new("t", vec![500, 900, 1000]).unwrap();
        let mut t = tunables(GovernorKind::Ondemand, &table);
        t.powersave_bias = 100;
        let mut s = GovernorState::new(500);
        // 1000 - 10% = 900 lands on a step: no split
        let d = od().decide(100, &mut s, &t, &table, &policy(&table, 900));
        assert_eq!(d.target(), Some(900));
        assert_eq!(s.freq_lo, 0);
    }
}
