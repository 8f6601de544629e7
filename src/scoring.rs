//! Scoring of completed runs.

use crate::model::History;
use serde::{Deserialize, Serialize};

const POPULATION_WEIGHT: f64 = 0.30;
const GDP_WEIGHT: f64 = 0.20;
const INFECTION_WEIGHT: f64 = 0.20;
const RESOURCE_WEIGHT: f64 = 0.15;
const TIME_WEIGHT: f64 = 0.15;
const VARIANT_WEIGHT: f64 = 0.15;

const RESOURCE_EFFICIENCY_SCALE: f64 = 5.0;

/// Component scores and the final score of a run, all in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub population_survived: f64,
    pub gdp_preserved: f64,
    pub infection_control: f64,
    pub resource_efficiency: f64,
    pub time_to_containment: f64,
    /// Only scored when variants are enabled.
    pub variant_control: Option<f64>,
    pub final_score: f64,
}

impl ScoreBreakdown {
    /// Named components, in a fixed order.
    pub fn components(&self) -> Vec<(&'static str, f64)> {
        let mut comps = vec![
            ("population_survived", self.population_survived),
            ("gdp_preserved", self.gdp_preserved),
            ("infection_control", self.infection_control),
            ("resource_efficiency", self.resource_efficiency),
            ("time_to_containment", self.time_to_containment),
        ];
        if let Some(val) = self.variant_control {
            comps.push(("variant_control", val));
        }
        comps.push(("final_score", self.final_score));
        comps
    }
}

/// Clamp to [0, 1]; NaN scores as 0.
fn clamp01(val: f64) -> f64 {
    if val.is_nan() { 0.0 } else { val.clamp(0.0, 1.0) }
}

/// Maps a run history onto a [`ScoreBreakdown`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn score(&self, history: &History) -> ScoreBreakdown {
        let (Some(first), Some(last)) = (history.snapshots.first(), history.last()) else {
            return ScoreBreakdown {
                population_survived: 0.0,
                gdp_preserved: 0.0,
                infection_control: 0.0,
                resource_efficiency: 0.0,
                time_to_containment: 0.0,
                variant_control: None,
                final_score: 0.0,
            };
        };

        let pop = &last.state.population;
        let population_survived = clamp01((pop.total - pop.dead) as f64 / pop.total as f64);

        let initial_gdp = first.state.economy.initial_gdp;
        let gdp_change = (last.state.economy.current_gdp - initial_gdp) / initial_gdp;
        let gdp_preserved = clamp01((gdp_change + 1.0) / 2.0);

        let max_infection_rate = history
            .snapshots
            .iter()
            .map(|snap| snap.infection_rate())
            .fold(0.0, f64::max);
        let infection_control = clamp01(1.0 - max_infection_rate);

        let outcome = (population_survived + infection_control) / 2.0;
        let spent = last.state.resources.spent.total();
        let resource_efficiency = if spent > 0.0 {
            clamp01(outcome / spent.ln_1p() * RESOURCE_EFFICIENCY_SCALE)
        } else {
            clamp01(outcome)
        };

        let total_steps = history.horizon.max(1);
        let containment_step = history.containment_step.unwrap_or(total_steps);
        let time_to_containment =
            clamp01(1.0 - containment_step as f64 / total_steps as f64);

        let variant_control = history.variants_enabled.then(|| {
            let steps = &history.snapshots[1..];
            if steps.is_empty() {
                return 1.0;
            }
            let mean_prevalence = steps
                .iter()
                .map(|snap| snap.state.variant_prevalence())
                .sum::<f64>()
                / steps.len() as f64;
            clamp01(1.0 - mean_prevalence)
        });

        let mut weighted = POPULATION_WEIGHT * population_survived
            + GDP_WEIGHT * gdp_preserved
            + INFECTION_WEIGHT * infection_control
            + RESOURCE_WEIGHT * resource_efficiency
            + TIME_WEIGHT * time_to_containment;
        let mut weight_sum =
            POPULATION_WEIGHT + GDP_WEIGHT + INFECTION_WEIGHT + RESOURCE_WEIGHT + TIME_WEIGHT;
        if let Some(val) = variant_control {
            weighted += VARIANT_WEIGHT * val;
            weight_sum += VARIANT_WEIGHT;
        }

        ScoreBreakdown {
            population_survived,
            gdp_preserved,
            infection_control,
            resource_efficiency,
            time_to_containment,
            variant_control,
            final_score: clamp01(weighted / weight_sum),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{EpidemicState, Snapshot, Status, StepMetrics};

    fn history(cfg: &Config, horizon: usize) -> History {
        let state = EpidemicState::from_config(cfg);
        History {
            horizon,
            containment_step: None,
            variants_enabled: cfg.supports_variants(),
            snapshots: vec![Snapshot {
                step: 0,
                status: Status::Initialized,
                state,
                metrics: StepMetrics::default(),
            }],
        }
    }

    fn push(history: &mut History, edit: impl FnOnce(&mut EpidemicState)) {
        let last = history.last().expect("empty history").clone();
        let mut state = last.state;
        edit(&mut state);
        history.snapshots.push(Snapshot {
            step: last.step + 1,
            status: Status::Running,
            state,
            metrics: StepMetrics::default(),
        });
    }

    #[test]
    fn untouched_run_scores() {
        let mut cfg = Config::standard();
        cfg.variants.enabled = false;
        let hist = history(&cfg, 10);
        let score = ScoringEngine.score(&hist);
        assert_eq!(score.population_survived, 1.0);
        assert_eq!(score.gdp_preserved, 0.5);
        assert!((score.infection_control - 0.999).abs() < 1e-12);
        assert!((score.resource_efficiency - (1.0 + 0.999) / 2.0).abs() < 1e-12);
        assert_eq!(score.time_to_containment, 0.0);
        assert_eq!(score.variant_control, None);
        let expected = 0.30 + 0.20 * 0.5 + 0.20 * 0.999 + 0.15 * 0.9995;
        assert!((score.final_score - expected).abs() < 1e-12);
    }

    #[test]
    fn components_follow_history() {
        let mut cfg = Config::standard();
        cfg.variants.enabled = false;
        let mut hist = history(&cfg, 4);
        push(&mut hist, |state| {
            state.regions[0].counts.susceptible -= 2000;
            state.regions[0].counts.infected += 2000;
            state.sync_totals();
            state.economy.current_gdp = 800.0;
        });
        push(&mut hist, |state| {
            state.regions[0].counts.infected -= 500;
            state.regions[0].counts.dead += 500;
            state.sync_totals();
            state.resources.spent.healthcare = 100.0;
        });
        hist.containment_step = Some(1);
        let score = ScoringEngine.score(&hist);
        assert!((score.population_survived - 0.95).abs() < 1e-12);
        assert!((score.gdp_preserved - 0.4).abs() < 1e-12);
        assert!((score.infection_control - (1.0 - 0.201)).abs() < 1e-12);
        let outcome = (0.95 + 0.799) / 2.0;
        let expected = (outcome / 101.0_f64.ln() * 5.0).min(1.0);
        assert!((score.resource_efficiency - expected).abs() < 1e-12);
        assert!((score.time_to_containment - 0.75).abs() < 1e-12);
    }

    #[test]
    fn variant_control_reweights() {
        let cfg = Config::standard();
        let mut hist = history(&cfg, 2);
        push(&mut hist, |state| {
            state.variants[0].active = true;
            state.variants[0].prevalence = 0.2;
        });
        push(&mut hist, |state| {
            state.variants[0].prevalence = 0.4;
        });
        let score = ScoringEngine.score(&hist);
        let vc = score.variant_control.expect("variants are enabled");
        assert!((vc - 0.7).abs() < 1e-12);
        let base = 0.30 * score.population_survived
            + 0.20 * score.gdp_preserved
            + 0.20 * score.infection_control
            + 0.15 * score.resource_efficiency
            + 0.15 * score.time_to_containment;
        assert!((score.final_score - (base + 0.15 * vc) / 1.15).abs() < 1e-12);
    }

    #[test]
    fn gdp_is_clamped() {
        let mut cfg = Config::standard();
        cfg.variants.enabled = false;
        let mut hist = history(&cfg, 1);
        push(&mut hist, |state| state.economy.current_gdp = 5000.0);
        assert_eq!(ScoringEngine.score(&hist).gdp_preserved, 1.0);
        assert_eq!(clamp01(f64::NAN), 0.0);
    }
}
