//! Simulation state types.

use crate::config::Config;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::EngineError;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Initialized,
    Running,
    Contained,
    Exhausted,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Contained | Status::Exhausted)
    }
}

/// Resource categories a player can spend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceCategory {
    Healthcare,
    Economic,
    Research,
    Testing,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 4] = [
        ResourceCategory::Healthcare,
        ResourceCategory::Economic,
        ResourceCategory::Research,
        ResourceCategory::Testing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceCategory::Healthcare => "healthcare",
            ResourceCategory::Economic => "economic",
            ResourceCategory::Research => "research",
            ResourceCategory::Testing => "testing",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceCategory::ALL
            .into_iter()
            .find(|cat| cat.as_str() == s)
            .ok_or_else(|| EngineError::InvalidAllocation(format!("unknown category {s:?}")))
    }
}

/// Amounts per resource category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub healthcare: f64,
    pub economic: f64,
    pub research: f64,
    pub testing: f64,
}

impl Ledger {
    pub fn get(&self, cat: ResourceCategory) -> f64 {
        match cat {
            ResourceCategory::Healthcare => self.healthcare,
            ResourceCategory::Economic => self.economic,
            ResourceCategory::Research => self.research,
            ResourceCategory::Testing => self.testing,
        }
    }

    pub fn get_mut(&mut self, cat: ResourceCategory) -> &mut f64 {
        match cat {
            ResourceCategory::Healthcare => &mut self.healthcare,
            ResourceCategory::Economic => &mut self.economic,
            ResourceCategory::Research => &mut self.research,
            ResourceCategory::Testing => &mut self.testing,
        }
    }

    pub fn total(&self) -> f64 {
        self.healthcare + self.economic + self.research + self.testing
    }
}

/// Compartment counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compartments {
    pub susceptible: u64,
    pub infected: u64,
    pub recovered: u64,
    pub dead: u64,
}

impl Compartments {
    pub fn sum(&self) -> u64 {
        self.susceptible + self.infected + self.recovered + self.dead
    }
}

/// Population totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Population {
    /// Fixed at initialization.
    pub total: u64,
    pub susceptible: u64,
    pub infected: u64,
    pub recovered: u64,
    pub dead: u64,
    /// First infections so far, initial cases included.
    pub cumulative_infected: u64,
}

impl Population {
    pub fn infection_rate(&self) -> f64 {
        self.infected as f64 / self.total as f64
    }

    pub fn cumulative_infected_proportion(&self) -> f64 {
        self.cumulative_infected as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub share: f64,
    pub density: f64,
    pub economic_weight: f64,
    pub counts: Compartments,
}

impl Region {
    pub fn size(&self) -> u64 {
        self.counts.sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub name: String,
    pub weight: f64,
    pub lockdown_sensitivity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Economy {
    /// Fixed at initialization.
    pub initial_gdp: f64,
    pub current_gdp: f64,
    pub sectors: Vec<Sector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Decreases as resources are allocated.
    pub available: f64,
    /// Cumulative spend per category.
    pub spent: Ledger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Research {
    /// Progress in [0, 1], never decreasing.
    pub progress: f64,
    pub breakthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcare {
    pub baseline_capacity: f64,
    pub capacity: f64,
    /// Severe cases currently in care.
    pub utilization: f64,
}

impl Healthcare {
    pub fn load(&self) -> f64 {
        self.utilization / self.capacity
    }
}

/// Control settings chosen by the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    /// Lockdown level in [0, 1].
    pub lockdown_level: f64,
    pub travel_restricted: bool,
    /// Fraction of the population that follows the lockdown.
    pub compliance: f64,
    /// Resources allocated during the current step.
    pub allocations: Ledger,
}

/// Runtime status of a catalogue variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantState {
    pub name: String,
    pub active: bool,
    /// Share of infections caused by this variant.
    pub prevalence: f64,
    /// Step at which the variant emerged.
    pub emerged_at: Option<usize>,
}

/// State of a run at a given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpidemicState {
    pub population: Population,
    pub regions: Vec<Region>,
    pub economy: Economy,
    pub resources: Resources,
    pub research: Research,
    pub healthcare: Healthcare,
    pub controls: Controls,
    /// Same order as the variant catalogue.
    pub variants: Vec<VariantState>,
}

impl EpidemicState {
    /// Build the initial state of a scenario.
    pub fn from_config(cfg: &Config) -> Self {
        let pop_cfg = &cfg.population;

        let shares: Vec<_> = pop_cfg.regions.iter().map(|reg| reg.share).collect();
        let reg_sizes = apportion(pop_cfg.total, &shares);
        let reg_infected = apportion(pop_cfg.initial_infected, &shares);

        let mut regions = Vec::with_capacity(pop_cfg.regions.len());
        for (i_reg, reg_cfg) in pop_cfg.regions.iter().enumerate() {
            // Apportioned independently, so cap infections at the region size.
            let infected = reg_infected[i_reg].min(reg_sizes[i_reg]);
            regions.push(Region {
                name: reg_cfg.name.clone(),
                share: reg_cfg.share,
                density: reg_cfg.density,
                economic_weight: reg_cfg.economic_weight,
                counts: Compartments {
                    susceptible: reg_sizes[i_reg] - infected,
                    infected,
                    recovered: 0,
                    dead: 0,
                },
            });
        }
        // Place infections lost to capping in regions with room left.
        let placed: u64 = regions.iter().map(|reg| reg.counts.infected).sum();
        let mut missing = pop_cfg.initial_infected.saturating_sub(placed);
        for reg in regions.iter_mut() {
            let moved = missing.min(reg.counts.susceptible);
            reg.counts.susceptible -= moved;
            reg.counts.infected += moved;
            missing -= moved;
        }

        let infected: u64 = regions.iter().map(|reg| reg.counts.infected).sum();
        let population = Population {
            total: pop_cfg.total,
            susceptible: pop_cfg.total - infected,
            infected,
            recovered: 0,
            dead: 0,
            cumulative_infected: infected,
        };

        let economy = Economy {
            initial_gdp: cfg.economy.initial_gdp,
            current_gdp: cfg.economy.initial_gdp,
            sectors: cfg
                .economy
                .sectors
                .iter()
                .map(|sec| Sector {
                    name: sec.name.clone(),
                    weight: sec.weight,
                    lockdown_sensitivity: sec.lockdown_sensitivity,
                })
                .collect(),
        };

        let mut state = Self {
            population,
            regions,
            economy,
            resources: Resources {
                available: cfg.initial_resources,
                spent: Ledger::default(),
            },
            research: Research {
                progress: 0.0,
                breakthrough: false,
            },
            healthcare: Healthcare {
                baseline_capacity: cfg.healthcare.capacity,
                capacity: cfg.healthcare.capacity,
                utilization: 0.0,
            },
            controls: Controls {
                lockdown_level: 0.0,
                travel_restricted: false,
                compliance: 1.0,
                allocations: Ledger::default(),
            },
            variants: cfg
                .variants
                .catalogue
                .iter()
                .map(|var| VariantState {
                    name: var.name.clone(),
                    active: false,
                    prevalence: 0.0,
                    emerged_at: None,
                })
                .collect(),
        };
        state.healthcare.utilization =
            state.population.infected as f64 * cfg.healthcare.severe_fraction;
        state
    }

    /// Recompute population totals from the regional counts.
    pub fn sync_totals(&mut self) {
        let mut sums = Compartments::default();
        for reg in &self.regions {
            sums.susceptible += reg.counts.susceptible;
            sums.infected += reg.counts.infected;
            sums.recovered += reg.counts.recovered;
            sums.dead += reg.counts.dead;
        }
        self.population.susceptible = sums.susceptible;
        self.population.infected = sums.infected;
        self.population.recovered = sums.recovered;
        self.population.dead = sums.dead;
    }

    /// Sum of the prevalences of all active variants.
    pub fn variant_prevalence(&self) -> f64 {
        self.variants
            .iter()
            .filter(|var| var.active)
            .map(|var| var.prevalence)
            .sum()
    }

    /// Check every structural invariant of the state.
    pub fn check_invariants(&self) -> Result<()> {
        let pop = &self.population;
        let sum = pop.susceptible + pop.infected + pop.recovered + pop.dead;
        if sum != pop.total {
            bail!("compartments sum to {sum}, but the total is {}", pop.total);
        }
        let reg_sum: u64 = self.regions.iter().map(Region::size).sum();
        if reg_sum != pop.total {
            bail!("regions sum to {reg_sum}, but the total is {}", pop.total);
        }
        if pop.cumulative_infected > pop.total {
            bail!("cumulative infected exceeds the total population");
        }
        if !(self.economy.current_gdp >= 0.0) {
            bail!("GDP must be non-negative, but is {}", self.economy.current_gdp);
        }
        if !(self.resources.available >= 0.0) {
            bail!("available resources must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.research.progress) {
            bail!("research progress must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.controls.lockdown_level) {
            bail!("lockdown level must be in [0, 1]");
        }
        for var in &self.variants {
            if !(0.0..=1.0).contains(&var.prevalence) {
                bail!("prevalence of {:?} must be in [0, 1]", var.name);
            }
            if !var.active && var.prevalence > 0.0 {
                bail!("inactive variant {:?} has a prevalence", var.name);
            }
        }
        let total_prevalence = self.variant_prevalence();
        if total_prevalence > 1.0 + 1e-9 {
            bail!("variant prevalences sum to {total_prevalence}");
        }
        Ok(())
    }
}

/// Split `total` into integer parts proportional to `shares` (largest remainder).
fn apportion(total: u64, shares: &[f64]) -> Vec<u64> {
    let exact: Vec<f64> = shares.iter().map(|&share| share * total as f64).collect();
    let mut parts: Vec<u64> = exact.iter().map(|&val| val.floor() as u64).collect();
    let assigned: u64 = parts.iter().sum();
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let rem_a = exact[a] - exact[a].floor();
        let rem_b = exact[b] - exact[b].floor();
        rem_b.total_cmp(&rem_a).then(a.cmp(&b))
    });
    // Hand out the whole leftover: full rounds first, then by largest remainder.
    let left = total.saturating_sub(assigned);
    let n_parts = order.len() as u64;
    if n_parts > 0 {
        let (rounds, extra) = (left / n_parts, left % n_parts);
        for (rank, &idx) in order.iter().enumerate() {
            parts[idx] += rounds + u64::from((rank as u64) < extra);
        }
    }
    // Guard against float rounding in the floors.
    let over = parts.iter().sum::<u64>().saturating_sub(total);
    if over > 0 {
        if let Some(part) = parts.iter_mut().max() {
            *part -= over.min(*part);
        }
    }
    parts
}

/// Per-step outcome figures recorded alongside the state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub new_infections: u64,
    pub reinfections: u64,
    pub recoveries: u64,
    pub deaths: u64,
    pub effective_r0: f64,
    pub mortality_rate: f64,
    pub gdp_delta: f64,
    pub dominant_variant: Option<String>,
}

/// Read-only record of a run after a step.
///
/// Passed to step callbacks as their view of the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: usize,
    pub status: Status,
    pub state: EpidemicState,
    pub metrics: StepMetrics,
}

impl Snapshot {
    pub fn infection_rate(&self) -> f64 {
        self.state.population.infection_rate()
    }

    pub fn mortality_rate(&self) -> f64 {
        self.state.population.dead as f64 / self.state.population.total as f64
    }

    pub fn gdp_ratio(&self) -> f64 {
        self.state.economy.current_gdp / self.state.economy.initial_gdp
    }
}

/// Append-only trajectory of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Number of steps the run is scored against.
    pub horizon: usize,
    /// First step of the sustained low-infection window, once contained.
    pub containment_step: Option<usize>,
    pub variants_enabled: bool,
    /// Initial snapshot (step 0) followed by one snapshot per step.
    pub snapshots: Vec<Snapshot>,
}

impl History {
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn steps_taken(&self) -> usize {
        self.snapshots.last().map_or(0, |snap| snap.step)
    }
}
