//! GDP response to lockdowns, travel restrictions and illness.

use crate::config::EconomyConfig;
use crate::interventions::Multipliers;
use crate::model::EpidemicState;

#[derive(Debug, Clone)]
pub struct EconomicModel {
    cfg: EconomyConfig,
}

impl EconomicModel {
    pub fn new(cfg: EconomyConfig) -> Self {
        Self { cfg }
    }

    /// Fraction of output lost at the current settings.
    ///
    /// Lockdown loss is weighted by sector, then reduced by economic support;
    /// travel and workforce illness add on top.
    pub fn output_loss(&self, state: &EpidemicState, mult: &Multipliers) -> f64 {
        let sector_loss: f64 = state
            .economy
            .sectors
            .iter()
            .map(|sec| sec.weight * sec.lockdown_sensitivity * mult.lockdown_level)
            .sum();
        let lockdown_loss = sector_loss * mult.gdp_loss;

        let illness_loss: f64 = state
            .regions
            .iter()
            .map(|reg| {
                let size = reg.size();
                if size == 0 {
                    return 0.0;
                }
                let away = (reg.counts.infected + reg.counts.dead) as f64 / size as f64;
                reg.economic_weight * away
            })
            .sum::<f64>()
            * self.cfg.illness_productivity_loss;

        (lockdown_loss + mult.travel_gdp_drag + illness_loss).clamp(0.0, 1.0)
    }

    /// GDP change of this step.
    ///
    /// GDP closes `adjustment_rate` of the gap to the output the current
    /// settings allow, and never drops below zero.
    pub fn step(&self, state: &EpidemicState, mult: &Multipliers) -> f64 {
        let eco = &state.economy;
        let target = eco.initial_gdp * (1.0 - self.output_loss(state, mult));
        let delta = self.cfg.adjustment_rate * (target - eco.current_gdp);
        delta.max(-eco.current_gdp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn setup() -> (EconomicModel, EpidemicState) {
        let cfg = Config::standard();
        (
            EconomicModel::new(cfg.economy.clone()),
            EpidemicState::from_config(&cfg),
        )
    }

    #[test]
    fn lockdown_loss_is_sector_weighted() {
        let (model, state) = setup();
        let mult = Multipliers {
            lockdown_level: 1.0,
            ..Multipliers::default()
        };
        let illness = model.output_loss(&state, &Multipliers::default());
        let loss = model.output_loss(&state, &mult) - illness;
        assert!((loss - (0.3 * 0.2 + 0.4 * 0.8 + 0.3 * 0.3)).abs() < 1e-12);
    }

    #[test]
    fn support_and_travel_adjust_loss() {
        let (model, state) = setup();
        let base = Multipliers {
            lockdown_level: 0.5,
            ..Multipliers::default()
        };
        let supported = Multipliers {
            gdp_loss: 0.5,
            ..base.clone()
        };
        let restricted = Multipliers {
            travel_gdp_drag: 0.02,
            ..base.clone()
        };
        let loss = model.output_loss(&state, &base);
        assert!(model.output_loss(&state, &supported) < loss);
        assert!((model.output_loss(&state, &restricted) - loss - 0.02).abs() < 1e-12);
    }

    #[test]
    fn gdp_moves_toward_target_and_stays_non_negative() {
        let (model, mut state) = setup();
        let mult = Multipliers {
            lockdown_level: 1.0,
            travel_gdp_drag: 1.0,
            ..Multipliers::default()
        };
        let delta = model.step(&state, &mult);
        assert!(delta < 0.0);
        for _ in 0..1000 {
            state.economy.current_gdp += model.step(&state, &mult);
            assert!(state.economy.current_gdp >= 0.0);
        }
        assert!(state.economy.current_gdp < 1.0);
    }

    #[test]
    fn gdp_recovers_once_lifted() {
        let (model, mut state) = setup();
        state.economy.current_gdp = 500.0;
        let delta = model.step(&state, &Multipliers::default());
        assert!(delta > 0.0);
    }
}
