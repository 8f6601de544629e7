//! Player interventions and their effect on transmission, mortality and output.

use crate::config::InterventionConfig;
use crate::error::EngineError;
use crate::model::{EpidemicState, ResourceCategory};
use crate::variants::{TARGETED_COST_FACTOR, TARGETED_EFFICIENCY_FACTOR, VariantManager};

/// Effect of the current controls on one step.
///
/// Each field is a product of factors combined in a fixed order.
#[derive(Debug, Clone, PartialEq)]
pub struct Multipliers {
    /// lockdown -> travel -> testing.
    pub transmission: f64,
    /// healthcare -> research breakthrough (variant severity is applied later).
    pub mortality: f64,
    /// Economic support factor applied to the lockdown output loss.
    pub gdp_loss: f64,
    /// Nominal lockdown level.
    pub lockdown_level: f64,
    /// Lockdown level after compliance.
    pub effective_lockdown: f64,
    /// Fraction of output lost to travel restrictions.
    pub travel_gdp_drag: f64,
    /// Compliance to commit at the end of the step.
    pub compliance: f64,
    /// Research progress gained this step.
    pub research_gain: f64,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            transmission: 1.0,
            mortality: 1.0,
            gdp_loss: 1.0,
            lockdown_level: 0.0,
            effective_lockdown: 0.0,
            travel_gdp_drag: 0.0,
            compliance: 1.0,
            research_gain: 0.0,
        }
    }
}

/// Benefit of a cumulative spend, with logarithmic diminishing returns.
pub fn benefit(effectiveness: f64, cumulative_spend: f64) -> f64 {
    effectiveness * cumulative_spend.max(0.0).ln_1p()
}

/// Translates control settings into multipliers.
#[derive(Debug, Clone)]
pub struct InterventionController {
    cfg: InterventionConfig,
}

impl InterventionController {
    pub fn new(cfg: InterventionConfig) -> Self {
        Self { cfg }
    }

    /// Set the lockdown level, clamped to [0, 1].
    pub fn set_lockdown_level(
        &self,
        state: &mut EpidemicState,
        level: f64,
    ) -> Result<f64, EngineError> {
        if level.is_nan() {
            return Err(EngineError::InvalidControl(format!(
                "lockdown level must be a number, but is {level}"
            )));
        }
        let level = level.clamp(0.0, 1.0);
        state.controls.lockdown_level = level;
        Ok(level)
    }

    /// Move resources from the available pool to `cat`.
    ///
    /// Requests above the pool are capped. Returns the amount actually allocated.
    pub fn allocate_resources(
        &self,
        state: &mut EpidemicState,
        cat: ResourceCategory,
        amount: f64,
    ) -> Result<f64, EngineError> {
        if amount.is_nan() || amount < 0.0 {
            return Err(EngineError::InvalidAllocation(format!(
                "amount must be non-negative, but is {amount}"
            )));
        }
        let res = &mut state.resources;
        let actual = amount.min(res.available);
        res.available = (res.available - actual).max(0.0);
        *res.spent.get_mut(cat) += actual;
        *state.controls.allocations.get_mut(cat) += actual;
        Ok(actual)
    }

    pub fn restrict_travel(&self, state: &mut EpidemicState, flag: bool) {
        state.controls.travel_restricted = flag;
    }

    /// Compliance after one more step at the current lockdown level.
    fn next_compliance(&self, state: &EpidemicState) -> f64 {
        let cfg = &self.cfg;
        let compliance = state.controls.compliance;
        if state.controls.lockdown_level > cfg.compliance_threshold {
            (compliance * (1.0 - cfg.compliance_decay)).max(cfg.compliance_floor)
        } else {
            (compliance + cfg.compliance_recovery * (1.0 - compliance)).min(1.0)
        }
    }

    /// Multipliers for the coming step.
    pub fn compute(&self, state: &EpidemicState) -> Multipliers {
        let cfg = &self.cfg;
        let spent = &state.resources.spent;
        let controls = &state.controls;

        let compliance = self.next_compliance(state);
        let effective_lockdown = controls.lockdown_level * compliance;

        // Transmission: lockdown -> travel -> testing.
        let mut transmission =
            1.0 - cfg.lockdown_r0_reduction * cfg.lockdown_curve.eval(effective_lockdown);
        if controls.travel_restricted {
            transmission *= cfg.travel_transmission_multiplier;
        }
        transmission *= 1.0
            - benefit(cfg.testing_effectiveness, spent.testing).min(cfg.testing_max_reduction);

        // Mortality: healthcare -> breakthrough.
        let mut mortality = 1.0
            - benefit(cfg.healthcare_effectiveness, spent.healthcare)
                .min(cfg.healthcare_max_reduction);
        if state.research.breakthrough {
            mortality *= 1.0 - cfg.breakthrough_mortality_reduction;
        }

        let gdp_loss = 1.0
            - benefit(cfg.economic_effectiveness, spent.economic).min(cfg.economic_max_reduction);

        let travel_gdp_drag = if controls.travel_restricted {
            cfg.travel_gdp_drag
        } else {
            0.0
        };

        Multipliers {
            transmission: transmission.max(0.0),
            mortality: mortality.max(0.0),
            gdp_loss: gdp_loss.max(0.0),
            lockdown_level: controls.lockdown_level,
            effective_lockdown,
            travel_gdp_drag,
            compliance,
            research_gain: self.research_gain(state),
        }
    }

    /// Progress bought by this step's research allocation.
    fn research_gain(&self, state: &EpidemicState) -> f64 {
        let cfg = &self.cfg;
        let total = state.resources.spent.research;
        let before = (total - state.controls.allocations.research).max(0.0);
        let eff = cfg.research_effectiveness;
        let mut gain = benefit(eff, total) - benefit(eff, before);
        if state.research.progress >= cfg.breakthrough_threshold {
            gain *= cfg.breakthrough_bonus;
        }
        gain.clamp(0.0, 1.0 - state.research.progress)
    }

    pub fn breakthrough_threshold(&self) -> f64 {
        self.cfg.breakthrough_threshold
    }
}

/// Control handle given to step callbacks and used by the engine API.
pub struct Controls<'a> {
    pub(crate) state: &'a mut EpidemicState,
    pub(crate) controller: &'a InterventionController,
    pub(crate) variants: &'a VariantManager,
}

impl Controls<'_> {
    /// Set the lockdown level; out-of-range values are clamped.
    pub fn set_lockdown_level(&mut self, level: f64) -> Result<f64, EngineError> {
        self.controller.set_lockdown_level(self.state, level)
    }

    /// Allocate to a category given by name (`healthcare`, `economic`, `research`, `testing`).
    pub fn allocate_resources(&mut self, category: &str, amount: f64) -> Result<f64, EngineError> {
        let cat = category.parse::<ResourceCategory>()?;
        self.allocate(cat, amount)
    }

    pub fn allocate(&mut self, cat: ResourceCategory, amount: f64) -> Result<f64, EngineError> {
        self.controller.allocate_resources(self.state, cat, amount)
    }

    pub fn restrict_travel(&mut self, flag: bool) {
        self.controller.restrict_travel(self.state, flag);
    }

    /// Spend research on one variant.
    ///
    /// Costs 10% more than undirected research and works 20% better.
    /// Research at a variant that has not emerged yet is undirected.
    /// Returns the amount actually spent.
    pub fn target_research(&mut self, variant_name: &str, amount: f64) -> Result<f64, EngineError> {
        let i_var = self.variants.find(variant_name)?;
        if amount.is_nan() || amount < 0.0 {
            return Err(EngineError::InvalidAllocation(format!(
                "amount must be non-negative, but is {amount}"
            )));
        }
        if !self.state.variants[i_var].active {
            return self.allocate(ResourceCategory::Research, amount);
        }
        let cost = self.allocate(ResourceCategory::Research, amount * TARGETED_COST_FACTOR)?;
        let effective = cost / TARGETED_COST_FACTOR * TARGETED_EFFICIENCY_FACTOR;
        self.variants
            .apply_targeted_research(self.state, i_var, effective);
        Ok(cost)
    }

    pub fn lockdown_level(&self) -> f64 {
        self.state.controls.lockdown_level
    }

    pub fn travel_restricted(&self) -> bool {
        self.state.controls.travel_restricted
    }

    pub fn available_resources(&self) -> f64 {
        self.state.resources.available
    }

    /// Amount allocated to `cat` during the current step.
    pub fn allocation(&self, cat: ResourceCategory) -> f64 {
        self.state.controls.allocations.get(cat)
    }

    pub fn spent(&self, cat: ResourceCategory) -> f64 {
        self.state.resources.spent.get(cat)
    }
}
