use crate::config::Config;
use crate::disease::DiseaseTransitionModel;
use crate::economy::EconomicModel;
use crate::error::EngineError;
use crate::interventions::{Controls, InterventionController};
use crate::model::{EpidemicState, History, Snapshot, Status, StepMetrics, VariantState};
use crate::rng::RandomStream;
use crate::scoring::{ScoreBreakdown, ScoringEngine};
use crate::strategy::Strategy;
use crate::variants::{VariantManager, VariantStatus, dominant_variant};
use anyhow::{Context, Result};

/// Adaptive hook run before every step.
///
/// Receives the number of steps taken so far, the last snapshot of the run
/// and a handle to the controls.
pub type StepCallback =
    Box<dyn FnMut(usize, &Snapshot, &mut Controls<'_>) -> Result<(), EngineError>>;

const PROGRESS_INTERVAL: usize = 50;

/// Simulation engine.
///
/// Holds the scenario, the current state, and the random stream of one run,
/// and schedules the models that advance it one step at a time.
pub struct Engine {
    cfg: Config,
    state: EpidemicState,
    rng: RandomStream,
    status: Status,
    history: History,
    variants: VariantManager,
    controller: InterventionController,
    disease: DiseaseTransitionModel,
    economy: EconomicModel,
    scoring: ScoringEngine,
    callbacks: Vec<StepCallback>,
    /// Consecutive steps counted toward containment.
    low_streak: usize,
}

impl Engine {
    /// Create a new `Engine` for the given scenario, seeded with `seed`.
    pub fn new(cfg: Config, seed: u64) -> Result<Self> {
        cfg.validate()
            .with_context(|| format!("invalid scenario {:?}", cfg.name))?;

        let state = EpidemicState::from_config(&cfg);
        state
            .check_invariants()
            .context("inconsistent initial state")?;
        let history = History {
            horizon: cfg.step_budget,
            containment_step: None,
            variants_enabled: cfg.supports_variants(),
            snapshots: vec![Snapshot {
                step: 0,
                status: Status::Initialized,
                state: state.clone(),
                metrics: StepMetrics::default(),
            }],
        };
        log::debug!("initialized scenario {:?} with seed {seed}", cfg.name);

        Ok(Self {
            state,
            rng: RandomStream::new(seed),
            status: Status::Initialized,
            history,
            variants: VariantManager::new(cfg.variants.clone()),
            controller: InterventionController::new(cfg.interventions.clone()),
            disease: DiseaseTransitionModel::new(cfg.disease.clone(), cfg.healthcare.clone()),
            economy: EconomicModel::new(cfg.economy.clone()),
            scoring: ScoringEngine,
            callbacks: Vec::new(),
            low_streak: 0,
            cfg,
        })
    }

    /// Reinitialize the run; registered callbacks are kept.
    ///
    /// On error the engine is left untouched.
    pub fn reset(&mut self, cfg: Config, seed: u64) -> Result<()> {
        let mut fresh = Self::new(cfg, seed)?;
        fresh.callbacks = std::mem::take(&mut self.callbacks);
        *self = fresh;
        Ok(())
    }

    /// Register a callback; callbacks run in registration order.
    pub fn register_step_callback<F>(&mut self, callback: F)
    where
        F: FnMut(usize, &Snapshot, &mut Controls<'_>) -> Result<(), EngineError> + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Register a strategy whose action is applied before every step.
    pub fn register_strategy<S: Strategy + 'static>(&mut self, mut strategy: S) {
        self.register_step_callback(move |_, snap, controls| strategy.decide(snap).apply(controls));
    }

    /// Advance the run by one step.
    pub fn step(&mut self) -> Result<&Snapshot, EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::SimulationTerminated(self.status));
        }
        self.status = Status::Running;
        let step = self.history.steps_taken() + 1;

        self.apply_capacity_events(step);

        // Callbacks see the last snapshot and may adjust the controls.
        let Self {
            state,
            history,
            callbacks,
            controller,
            variants,
            ..
        } = self;
        if let Some(prev) = history.snapshots.last() {
            for callback in callbacks.iter_mut() {
                let mut controls = Controls {
                    state: &mut *state,
                    controller: &*controller,
                    variants: &*variants,
                };
                callback(prev.step, prev, &mut controls)?;
            }
        }

        let mult = self.controller.compute(&self.state);

        self.variants.evaluate(&mut self.state, step, &mut self.rng);
        let mix = self.variants.strain_mix(&self.state);

        let delta = self.disease.step(&self.state, &mult, &mix, &mut self.rng);
        let gdp_delta = self.economy.step(&self.state, &mult);

        // Commit every change of the step at once.
        delta.apply(&mut self.state);
        let eco = &mut self.state.economy;
        eco.current_gdp = (eco.current_gdp + gdp_delta).max(0.0);
        self.state.controls.compliance = mult.compliance;
        self.commit_research(mult.research_gain, step);
        let infected = self.state.population.infected;
        self.state.healthcare.utilization = self.disease.utilization(infected);

        self.update_status(step, delta.effective_r0);

        let metrics = StepMetrics {
            new_infections: delta.new_infections(),
            reinfections: delta.reinfections(),
            recoveries: delta.recoveries(),
            deaths: delta.deaths(),
            effective_r0: delta.effective_r0,
            mortality_rate: delta.mortality_rate,
            gdp_delta,
            dominant_variant: dominant_variant(&self.state.variants).map(|var| var.name.clone()),
        };
        let i_snap = self.history.snapshots.len();
        self.history.snapshots.push(Snapshot {
            step,
            status: self.status,
            state: self.state.clone(),
            metrics,
        });
        self.state.controls.allocations = Default::default();

        if step % PROGRESS_INTERVAL == 0 {
            let progress = 100.0 * step as f64 / self.history.horizon.max(1) as f64;
            log::debug!(
                "step {step} ({progress:06.2}%): infection rate {:.4}",
                self.state.population.infection_rate()
            );
        }

        Ok(&self.history.snapshots[i_snap])
    }

    /// Step until `steps` more steps are taken or the run ends, then score it.
    ///
    /// The step count (capped at the step budget) becomes the scoring horizon.
    pub fn run(&mut self, steps: usize) -> Result<ScoreBreakdown, EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::SimulationTerminated(self.status));
        }
        let target = (self.history.steps_taken() + steps).min(self.cfg.step_budget);
        self.history.horizon = target;
        log::info!("running scenario {:?} up to step {target}", self.cfg.name);

        while self.history.steps_taken() < target && !self.status.is_terminal() {
            self.step()?;
        }

        let score = self.score();
        log::info!(
            "run ended at step {} ({:?}) with final score {:.4}",
            self.history.steps_taken(),
            self.status,
            score.final_score
        );
        Ok(score)
    }

    /// Score the history recorded so far.
    pub fn score(&self) -> ScoreBreakdown {
        self.scoring.score(&self.history)
    }

    fn apply_capacity_events(&mut self, step: usize) {
        for event in self.cfg.healthcare.events.iter().filter(|evt| evt.step == step) {
            let care = &mut self.state.healthcare;
            care.capacity = care.baseline_capacity * event.capacity_factor;
            log::info!("healthcare capacity set to {:.1} at step {step}", care.capacity);
        }
    }

    fn commit_research(&mut self, gain: f64, step: usize) {
        let research = &mut self.state.research;
        research.progress = (research.progress + gain).clamp(0.0, 1.0);
        if !research.breakthrough && research.progress >= self.controller.breakthrough_threshold() {
            research.breakthrough = true;
            log::info!("research breakthrough at step {step}");
        }
    }

    /// Count a step toward containment when the outbreak is gone, or when it is
    /// both rare and shrinking (effective reproduction number below 1).
    fn update_status(&mut self, step: usize, effective_r0: f64) {
        let containment = &self.cfg.containment;
        let pop = &self.state.population;
        let r_eff = effective_r0 * pop.susceptible as f64 / pop.total as f64;
        let declining = pop.infection_rate() < containment.threshold && r_eff < 1.0;
        if pop.infected == 0 || declining {
            self.low_streak += 1;
        } else {
            self.low_streak = 0;
        }

        if self.low_streak >= containment.window {
            self.status = Status::Contained;
            let first = step + 1 - containment.window;
            self.history.containment_step = Some(first);
            log::info!("outbreak contained from step {first}");
        } else if step >= self.cfg.step_budget {
            self.status = Status::Exhausted;
        }
    }

    fn controls(&mut self) -> Result<Controls<'_>, EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::SimulationTerminated(self.status));
        }
        Ok(Controls {
            state: &mut self.state,
            controller: &self.controller,
            variants: &self.variants,
        })
    }

    /// Set the lockdown level; values outside [0, 1] are clamped.
    pub fn set_lockdown_level(&mut self, level: f64) -> Result<f64, EngineError> {
        self.controls()?.set_lockdown_level(level)
    }

    /// Allocate resources to a category, capped at the available pool.
    ///
    /// Returns the amount actually allocated.
    pub fn allocate_resources(&mut self, category: &str, amount: f64) -> Result<f64, EngineError> {
        self.controls()?.allocate_resources(category, amount)
    }

    pub fn restrict_travel(&mut self, flag: bool) -> Result<(), EngineError> {
        self.controls()?.restrict_travel(flag);
        Ok(())
    }

    /// Spend research on one variant; see [`Controls::target_research`].
    pub fn target_research(&mut self, variant_name: &str, amount: f64) -> Result<f64, EngineError> {
        self.controls()?.target_research(variant_name, amount)
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

    /// Status of every catalogue variant, in declaration order.
    pub fn get_variant_status(&self) -> Vec<VariantStatus> {
        self.variants.status(&self.state)
    }

    pub fn dominant_variant(&self) -> Option<&VariantState> {
        dominant_variant(&self.state.variants)
    }

    pub fn supports_variants(&self) -> bool {
        self.variants.enabled()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn state(&self) -> &EpidemicState {
        &self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }
}
