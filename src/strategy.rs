//! Adaptive strategies driving the controls of a run.

use crate::error::EngineError;
use crate::interventions::Controls;
use crate::model::{Ledger, ResourceCategory, Snapshot};
use clap::ValueEnum;

/// Control changes requested for the coming step.
///
/// `None` leaves the corresponding control as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub lockdown_level: Option<f64>,
    pub restrict_travel: Option<bool>,
    /// Amounts to allocate this step.
    pub allocations: Ledger,
    /// Research aimed at one variant, instead of undirected research.
    pub targeted_research: Option<(String, f64)>,
}

impl Action {
    /// Issue the action through the control handle.
    pub fn apply(&self, controls: &mut Controls<'_>) -> Result<(), EngineError> {
        if let Some(level) = self.lockdown_level {
            controls.set_lockdown_level(level)?;
        }
        if let Some(flag) = self.restrict_travel {
            controls.restrict_travel(flag);
        }
        for cat in ResourceCategory::ALL {
            let amount = self.allocations.get(cat);
            if amount > 0.0 {
                controls.allocate(cat, amount)?;
            }
        }
        if let Some((name, amount)) = &self.targeted_research {
            controls.target_research(name, *amount)?;
        }
        Ok(())
    }
}

/// Chooses an action from the last snapshot of a run.
pub trait Strategy {
    fn decide(&mut self, snap: &Snapshot) -> Action;
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn decide(&mut self, snap: &Snapshot) -> Action {
        (**self).decide(snap)
    }
}

/// Built-in strategies selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    Idle,
    PhaseBased,
    ResponseCurve,
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Idle => Box::new(Idle),
            StrategyKind::PhaseBased => Box::new(PhaseBased::default()),
            StrategyKind::ResponseCurve => Box::new(ResponseCurve::default()),
        }
    }
}

/// Never touches the controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Strategy for Idle {
    fn decide(&mut self, _snap: &Snapshot) -> Action {
        Action::default()
    }
}

/// Split `budget` into healthcare, economic and research amounts.
fn split(budget: f64, [healthcare, economic, research]: [f64; 3]) -> Ledger {
    Ledger {
        healthcare: budget * healthcare,
        economic: budget * economic,
        research: budget * research,
        testing: 0.0,
    }
}

/// Epidemic phase tracked by [`PhaseBased`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Containment,
    Surge,
    Maintenance,
    Recovery,
    EndGame,
}

/// Fixed settings per epidemic phase.
///
/// Phases only move forward: containment until infections pass 10%, surge
/// until they start falling, maintenance until they drop under 5%, recovery
/// until research passes 50%, then end game.
#[derive(Debug, Clone)]
pub struct PhaseBased {
    /// Fraction of the available resources spent every step.
    pub spend_rate: f64,
    phase: Phase,
    prev_infection_rate: Option<f64>,
}

impl Default for PhaseBased {
    fn default() -> Self {
        Self {
            spend_rate: 0.01,
            phase: Phase::Containment,
            prev_infection_rate: None,
        }
    }
}

impl PhaseBased {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, snap: &Snapshot) {
        let rate = snap.infection_rate();
        let next = match self.phase {
            Phase::Containment if rate > 0.1 => Phase::Surge,
            Phase::Surge if self.prev_infection_rate.is_some_and(|prev| rate < prev) => {
                Phase::Maintenance
            }
            Phase::Maintenance if rate < 0.05 => Phase::Recovery,
            Phase::Recovery if snap.state.research.progress > 0.5 => Phase::EndGame,
            phase => phase,
        };
        if next != self.phase {
            log::debug!("phase {:?} -> {next:?} at step {}", self.phase, snap.step);
            self.phase = next;
        }
        self.prev_infection_rate = Some(rate);
    }
}

impl Strategy for PhaseBased {
    fn decide(&mut self, snap: &Snapshot) -> Action {
        self.advance(snap);

        let rate = snap.infection_rate();
        let (lockdown, shares, travel) = match self.phase {
            Phase::Containment => (0.4, [0.4, 0.3, 0.3], true),
            Phase::Surge => (0.8, [0.6, 0.2, 0.2], true),
            Phase::Maintenance => (0.5, [0.4, 0.4, 0.2], rate > 0.1),
            Phase::Recovery => (0.3, [0.3, 0.6, 0.1], false),
            Phase::EndGame => (0.2, [0.2, 0.4, 0.4], false),
        };
        let budget = snap.state.resources.available * self.spend_rate;
        let mut allocations = split(budget, shares);

        // Aim research at the dominant variant once one circulates.
        let targeted_research = snap.metrics.dominant_variant.as_ref().map(|name| {
            let amount = std::mem::take(&mut allocations.research);
            (name.clone(), amount)
        });

        Action {
            lockdown_level: Some(lockdown),
            restrict_travel: Some(travel),
            allocations,
            targeted_research,
        }
    }
}

fn sigmoid(x: f64, midpoint: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - midpoint)).exp())
}

/// Smooth sigmoid responses to infection and mortality rates.
#[derive(Debug, Clone)]
pub struct ResponseCurve {
    /// Fraction of the available resources spent every step at full need.
    pub spend_rate: f64,
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self { spend_rate: 0.01 }
    }
}

impl Strategy for ResponseCurve {
    fn decide(&mut self, snap: &Snapshot) -> Action {
        let infection_rate = snap.infection_rate();
        let gdp_ratio = snap.gdp_ratio();

        let infection_response = sigmoid(infection_rate, 0.1, 30.0);
        let mortality_response = sigmoid(snap.mortality_rate(), 0.05, 50.0);
        let economic_pressure = 1.0 - gdp_ratio;

        let base = infection_response * 0.8;
        let lockdown = if economic_pressure > 0.5 && infection_rate < 0.1 {
            (base - 0.2).max(0.1)
        } else if mortality_response > 0.7 {
            (base + 0.2).min(0.9)
        } else {
            base
        };

        let mut needs = [
            infection_response * 0.6,
            economic_pressure * 0.6,
            if snap.step > 100 { 0.5 } else { 0.3 },
        ];
        let total: f64 = needs.iter().sum();
        if total > 1.0 {
            needs.iter_mut().for_each(|need| *need /= total);
        }
        let budget = snap.state.resources.available * self.spend_rate;

        Action {
            lockdown_level: Some(lockdown),
            restrict_travel: Some(infection_rate > 0.15),
            allocations: split(budget, needs),
            targeted_research: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{EpidemicState, Status, StepMetrics};

    fn snapshot(step: usize, infected: u64) -> Snapshot {
        let mut state = EpidemicState::from_config(&Config::standard());
        let reg = &mut state.regions[0].counts;
        let moved = infected.saturating_sub(reg.infected);
        reg.susceptible -= moved;
        reg.infected += moved;
        state.sync_totals();
        Snapshot {
            step,
            status: Status::Running,
            state,
            metrics: StepMetrics::default(),
        }
    }

    #[test]
    fn idle_does_nothing() {
        assert_eq!(Idle.decide(&snapshot(0, 10)), Action::default());
    }

    #[test]
    fn phases_move_forward() {
        let mut strat = PhaseBased::default();
        strat.decide(&snapshot(1, 100));
        assert_eq!(strat.phase(), Phase::Containment);
        strat.decide(&snapshot(2, 1500));
        assert_eq!(strat.phase(), Phase::Surge);
        strat.decide(&snapshot(3, 2500));
        assert_eq!(strat.phase(), Phase::Surge);
        let action = strat.decide(&snapshot(4, 2000));
        assert_eq!(strat.phase(), Phase::Maintenance);
        assert_eq!(action.lockdown_level, Some(0.5));
        assert_eq!(action.restrict_travel, Some(true));
        strat.decide(&snapshot(5, 400));
        assert_eq!(strat.phase(), Phase::Recovery);
        // Phases never go back.
        strat.decide(&snapshot(6, 3000));
        assert_eq!(strat.phase(), Phase::Recovery);
    }

    #[test]
    fn phase_budget_targets_dominant_variant() {
        let mut strat = PhaseBased::default();
        let mut snap = snapshot(1, 10);
        snap.metrics.dominant_variant = Some("Beta".to_string());
        let action = strat.decide(&snap);
        assert!((action.allocations.total() - 1000.0 * 0.01 * 0.7).abs() < 1e-9);
        assert_eq!(action.allocations.research, 0.0);
        let (name, amount) = action.targeted_research.expect("no targeted research");
        assert_eq!(name, "Beta");
        assert!((amount - 3.0).abs() < 1e-9);
    }

    #[test]
    fn response_grows_with_infections() {
        let mut strat = ResponseCurve::default();
        let low = strat.decide(&snapshot(1, 10));
        let high = strat.decide(&snapshot(2, 3000));
        assert!(low.lockdown_level < high.lockdown_level);
        assert_eq!(low.restrict_travel, Some(false));
        assert_eq!(high.restrict_travel, Some(true));
        assert!(high.allocations.healthcare > low.allocations.healthcare);
        let budget = 1000.0 * 0.01;
        assert!(high.allocations.total() <= budget + 1e-9);
    }

    #[test]
    fn builds_every_kind() {
        let snap = snapshot(0, 10);
        for kind in StrategyKind::value_variants() {
            let mut strat = kind.build();
            let action = strat.decide(&snap);
            assert_eq!(action.lockdown_level.is_none(), *kind == StrategyKind::Idle);
        }
    }
}
