//! Variant emergence and prevalence dynamics.

use crate::config::{VariantConfig, VariantSpec};
use crate::error::EngineError;
use crate::model::{EpidemicState, VariantState};
use crate::rng::RandomStream;
use serde::{Deserialize, Serialize};

/// Surcharge paid for targeting research at one variant.
pub const TARGETED_COST_FACTOR: f64 = 1.1;
/// Efficiency gain of targeted over undirected research.
pub const TARGETED_EFFICIENCY_FACTOR: f64 = 1.2;

/// Catalogue entry joined with its runtime status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStatus {
    pub name: String,
    pub transmissibility: f64,
    pub mortality: f64,
    pub immune_escape: f64,
    pub emergence_threshold: f64,
    pub active: bool,
    pub prevalence: f64,
    pub emerged_at: Option<usize>,
}

/// Prevalence-weighted effect of the circulating strains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainMix {
    /// Transmission relative to the base strain.
    pub transmissibility: f64,
    /// Mortality relative to the base strain.
    pub mortality: f64,
    /// Fraction of recovered individuals open to reinfection.
    pub immune_escape: f64,
}

impl Default for StrainMix {
    fn default() -> Self {
        Self {
            transmissibility: 1.0,
            mortality: 1.0,
            immune_escape: 0.0,
        }
    }
}

/// Owns the variant catalogue and evolves `EpidemicState::variants`.
#[derive(Debug, Clone)]
pub struct VariantManager {
    cfg: VariantConfig,
}

impl VariantManager {
    pub fn new(cfg: VariantConfig) -> Self {
        Self { cfg }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled && !self.cfg.catalogue.is_empty()
    }

    pub fn catalogue(&self) -> &[VariantSpec] {
        &self.cfg.catalogue
    }

    /// Emerge eligible variants and advance the prevalences of active ones.
    pub fn evaluate(&self, state: &mut EpidemicState, step: usize, rng: &mut RandomStream) {
        if !self.enabled() {
            return;
        }

        // Emergence, in declaration order.
        let cum_prop = state.population.cumulative_infected_proportion();
        for (spec, var) in self.cfg.catalogue.iter().zip(state.variants.iter_mut()) {
            if var.active || cum_prop < spec.emergence_threshold {
                continue;
            }
            if rng.uniform() < self.cfg.emergence_rate {
                var.active = true;
                var.emerged_at = Some(step);
                log::warn!("variant {} emerged at step {step}", var.name);
            }
        }
        // Seed new variants from the base strain's share.
        let newly: Vec<usize> = (0..state.variants.len())
            .filter(|&i_var| state.variants[i_var].emerged_at == Some(step))
            .collect();
        for i_var in newly {
            let base_share = (1.0 - state.variant_prevalence()).max(0.0);
            state.variants[i_var].prevalence = self.cfg.seed_prevalence.min(base_share);
        }

        self.select(state);
    }

    /// Discrete replicator update with the base strain at fitness 1.
    fn select(&self, state: &mut EpidemicState) {
        let total = state.variant_prevalence();
        let base_share = (1.0 - total).max(0.0);
        let mut mean_fitness = base_share;
        for (spec, var) in self.cfg.catalogue.iter().zip(&state.variants) {
            if var.active {
                mean_fitness += var.prevalence * spec.transmissibility;
            }
        }
        if !(mean_fitness > 0.0) {
            return;
        }

        let rate = self.cfg.selection_rate;
        for (spec, var) in self.cfg.catalogue.iter().zip(state.variants.iter_mut()) {
            if !var.active {
                continue;
            }
            let growth = 1.0 + rate * (spec.transmissibility / mean_fitness - 1.0);
            var.prevalence = (var.prevalence * growth).clamp(0.0, 1.0);
        }

        // Rounding can push the sum past 1.
        let total = state.variant_prevalence();
        if total > 1.0 {
            for var in state.variants.iter_mut().filter(|var| var.active) {
                var.prevalence /= total;
            }
        }
    }

    /// Prevalence-weighted strain effects; the base strain fills the remainder.
    pub fn strain_mix(&self, state: &EpidemicState) -> StrainMix {
        if !self.enabled() {
            return StrainMix::default();
        }
        let mut mix = StrainMix::default();
        for (spec, var) in self.cfg.catalogue.iter().zip(&state.variants) {
            if !var.active {
                continue;
            }
            mix.transmissibility += (spec.transmissibility - 1.0) * var.prevalence;
            mix.mortality += (spec.mortality - 1.0) * var.prevalence;
            mix.immune_escape += spec.immune_escape * var.prevalence;
        }
        mix.transmissibility = mix.transmissibility.max(0.0);
        mix.mortality = mix.mortality.max(0.0);
        mix.immune_escape = mix.immune_escape.clamp(0.0, 1.0);
        mix
    }

    /// Index of the catalogue entry called `name`.
    pub fn find(&self, name: &str) -> Result<usize, EngineError> {
        self.cfg
            .catalogue
            .iter()
            .position(|spec| spec.name == name)
            .ok_or_else(|| EngineError::UnknownVariant(name.to_string()))
    }

    /// Cut the prevalence of variant `i_var` for `effective_amount` of targeted research.
    pub fn apply_targeted_research(
        &self,
        state: &mut EpidemicState,
        i_var: usize,
        effective_amount: f64,
    ) {
        let Some(var) = state.variants.get_mut(i_var) else {
            return;
        };
        if !var.active {
            return;
        }
        let fraction = (self.cfg.targeted_research_rate * effective_amount).clamp(0.0, 1.0);
        var.prevalence = (var.prevalence * (1.0 - fraction)).max(0.0);
    }

    /// Status of every catalogue variant, in declaration order.
    pub fn status(&self, state: &EpidemicState) -> Vec<VariantStatus> {
        self.cfg
            .catalogue
            .iter()
            .zip(&state.variants)
            .map(|(spec, var)| VariantStatus {
                name: spec.name.clone(),
                transmissibility: spec.transmissibility,
                mortality: spec.mortality,
                immune_escape: spec.immune_escape,
                emergence_threshold: spec.emergence_threshold,
                active: var.active,
                prevalence: var.prevalence,
                emerged_at: var.emerged_at,
            })
            .collect()
    }
}

/// Most prevalent active variant.
///
/// Ties go to the earliest emergence, then to declaration order.
pub fn dominant_variant(variants: &[VariantState]) -> Option<&VariantState> {
    let mut best: Option<&VariantState> = None;
    for var in variants.iter().filter(|var| var.active) {
        best = match best {
            None => Some(var),
            Some(cur) => {
                let better = var.prevalence > cur.prevalence
                    || (var.prevalence == cur.prevalence && var.emerged_at < cur.emerged_at);
                Some(if better { var } else { cur })
            }
        };
    }
    best
}
