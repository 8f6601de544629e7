//! Stochastic disease transitions.

use crate::config::{DiseaseConfig, HealthcareConfig};
use crate::interventions::Multipliers;
use crate::model::EpidemicState;
use crate::rng::RandomStream;
use crate::variants::StrainMix;

/// Transitions drawn for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionDelta {
    /// Susceptible -> infected.
    pub new_infections: u64,
    /// Recovered -> infected.
    pub reinfections: u64,
    /// Infected -> recovered.
    pub recoveries: u64,
    /// Infected -> dead.
    pub deaths: u64,
}

/// Transitions of one step, applied all at once by [`DeltaCounts::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaCounts {
    pub regions: Vec<RegionDelta>,
    pub effective_r0: f64,
    pub mortality_rate: f64,
}

impl DeltaCounts {
    pub fn new_infections(&self) -> u64 {
        self.regions.iter().map(|delta| delta.new_infections).sum()
    }

    pub fn reinfections(&self) -> u64 {
        self.regions.iter().map(|delta| delta.reinfections).sum()
    }

    pub fn recoveries(&self) -> u64 {
        self.regions.iter().map(|delta| delta.recoveries).sum()
    }

    pub fn deaths(&self) -> u64 {
        self.regions.iter().map(|delta| delta.deaths).sum()
    }

    /// Move individuals between compartments.
    ///
    /// Every draw is bounded by the compartment it leaves, so the total is preserved.
    pub fn apply(&self, state: &mut EpidemicState) {
        for (reg, delta) in state.regions.iter_mut().zip(&self.regions) {
            let counts = &mut reg.counts;
            counts.susceptible -= delta.new_infections;
            counts.recovered = counts.recovered - delta.reinfections + delta.recoveries;
            counts.infected = counts.infected + delta.new_infections + delta.reinfections
                - delta.recoveries
                - delta.deaths;
            counts.dead += delta.deaths;
        }
        let pop = &mut state.population;
        pop.cumulative_infected = (pop.cumulative_infected + self.new_infections()).min(pop.total);
        state.sync_totals();
    }
}

/// Computes new infections, recoveries and deaths.
#[derive(Debug, Clone)]
pub struct DiseaseTransitionModel {
    disease: DiseaseConfig,
    healthcare: HealthcareConfig,
}

impl DiseaseTransitionModel {
    pub fn new(disease: DiseaseConfig, healthcare: HealthcareConfig) -> Self {
        Self {
            disease,
            healthcare,
        }
    }

    /// Mortality multiplier for the current healthcare load.
    ///
    /// Grows quadratically once the load passes the overwhelm threshold.
    pub fn overwhelm_penalty(&self, state: &EpidemicState) -> f64 {
        let threshold = self.healthcare.overwhelm_threshold;
        let load = state.healthcare.load();
        if !(load > threshold) {
            return 1.0;
        }
        let excess = ((load - threshold) / threshold).min(2.0);
        1.0 + self.healthcare.overwhelm_penalty * excess * excess
    }

    /// Severe cases needing care for a given number of infected.
    pub fn utilization(&self, infected: u64) -> f64 {
        infected as f64 * self.healthcare.severe_fraction
    }

    /// Draw this step's transitions without touching the state.
    pub fn step(
        &self,
        state: &EpidemicState,
        mult: &Multipliers,
        mix: &StrainMix,
        rng: &mut RandomStream,
    ) -> DeltaCounts {
        let dis = &self.disease;

        let effective_r0 = dis.r0_base * mix.transmissibility * mult.transmission;
        let beta = effective_r0 / dis.recovery_period;
        let p_recover = (1.0 / dis.recovery_period).clamp(0.0, 1.0);

        let mortality_rate =
            dis.mortality_rate * mix.mortality * mult.mortality * self.overwhelm_penalty(state);
        let p_death = (mortality_rate / dis.recovery_period).clamp(0.0, 1.0);

        let mut mean_density: f64 = state.regions.iter().map(|reg| reg.share * reg.density).sum();
        if !(mean_density > 0.0) {
            mean_density = 1.0;
        }

        let pop = &state.population;
        let living = pop.total - pop.dead;
        let global_prev = if living > 0 {
            pop.infected as f64 / living as f64
        } else {
            0.0
        };

        let mut regions = Vec::with_capacity(state.regions.len());
        for reg in &state.regions {
            let counts = &reg.counts;
            let reg_living = counts.susceptible + counts.infected + counts.recovered;
            let local_prev = if reg_living > 0 {
                counts.infected as f64 / reg_living as f64
            } else {
                0.0
            };
            let prev = (1.0 - dis.regional_mixing) * local_prev + dis.regional_mixing * global_prev;

            let force = beta * (reg.density / mean_density) * prev;
            let p_infect = 1.0 - (-force.max(0.0)).exp();

            let new_infections = rng.binomial(counts.susceptible, p_infect);
            let reinfections = rng.binomial(counts.recovered, p_infect * mix.immune_escape);
            let recoveries = rng.binomial(counts.infected, p_recover);
            let deaths = rng.binomial(counts.infected - recoveries, p_death);

            regions.push(RegionDelta {
                new_infections,
                reinfections,
                recoveries,
                deaths,
            });
        }

        DeltaCounts {
            regions,
            effective_r0,
            mortality_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn setup(cfg: &Config) -> (DiseaseTransitionModel, EpidemicState) {
        (
            DiseaseTransitionModel::new(cfg.disease.clone(), cfg.healthcare.clone()),
            EpidemicState::from_config(cfg),
        )
    }

    #[test]
    fn applying_deltas_preserves_population() {
        let cfg = Config::standard();
        let (model, mut state) = setup(&cfg);
        let mut rng = RandomStream::new(11);
        let mult = Multipliers::default();
        for _ in 0..300 {
            let delta = model.step(&state, &mult, &StrainMix::default(), &mut rng);
            delta.apply(&mut state);
            state.healthcare.utilization = model.utilization(state.population.infected);
            state.check_invariants().expect("invariant broken");
        }
        assert!(state.population.dead > 0);
        assert!(state.population.recovered > 0);
    }

    #[test]
    fn no_infected_no_transitions() {
        let mut cfg = Config::standard();
        cfg.population.initial_infected = 0;
        let (model, state) = setup(&cfg);
        let mut rng = RandomStream::new(5);
        let delta = model.step(&state, &Multipliers::default(), &StrainMix::default(), &mut rng);
        assert_eq!(delta.new_infections(), 0);
        assert_eq!(delta.recoveries(), 0);
        assert_eq!(delta.deaths(), 0);
    }

    #[test]
    fn effective_r0_combines_factors() {
        let cfg = Config::standard();
        let (model, state) = setup(&cfg);
        let mut rng = RandomStream::new(5);
        let mult = Multipliers {
            transmission: 0.5,
            ..Multipliers::default()
        };
        let mix = StrainMix {
            transmissibility: 1.2,
            ..StrainMix::default()
        };
        let delta = model.step(&state, &mult, &mix, &mut rng);
        assert!((delta.effective_r0 - 2.5 * 1.2 * 0.5).abs() < 1e-12);
    }

    #[test]
    fn immune_escape_reinfects_recovered() {
        let cfg = Config::standard();
        let (model, mut state) = setup(&cfg);
        let counts = [[2000, 2000, 3000], [1000, 500, 1500]];
        for (reg, [s, i, r]) in state.regions.iter_mut().zip(counts) {
            reg.counts.susceptible = s;
            reg.counts.infected = i;
            reg.counts.recovered = r;
        }
        state.sync_totals();
        state.population.cumulative_infected = 6000;
        state.check_invariants().expect("invariant broken");

        let mut rng = RandomStream::new(7);
        let delta = model.step(&state, &Multipliers::default(), &StrainMix::default(), &mut rng);
        assert_eq!(delta.reinfections(), 0);

        let mix = StrainMix {
            immune_escape: 1.0,
            ..StrainMix::default()
        };
        let delta = model.step(&state, &Multipliers::default(), &mix, &mut rng);
        assert!(delta.reinfections() > 0);

        let recovered = state.population.recovered;
        delta.apply(&mut state);
        state.check_invariants().expect("invariant broken");
        // Reinfections are not first infections.
        assert_eq!(state.population.cumulative_infected, 6000 + delta.new_infections());
        assert_eq!(
            state.population.recovered,
            recovered + delta.recoveries() - delta.reinfections()
        );
    }

    #[test]
    fn overwhelmed_care_raises_mortality() {
        let cfg = Config::standard();
        let (model, mut state) = setup(&cfg);
        assert_eq!(model.overwhelm_penalty(&state), 1.0);
        state.healthcare.utilization = state.healthcare.capacity * 0.7;
        assert_eq!(model.overwhelm_penalty(&state), 1.0);
        state.healthcare.utilization = state.healthcare.capacity * 1.4;
        let moderate = model.overwhelm_penalty(&state);
        state.healthcare.utilization = state.healthcare.capacity * 2.1;
        let severe = model.overwhelm_penalty(&state);
        assert!(moderate > 1.0);
        // Past the threshold the penalty grows faster than the load.
        assert!(severe - moderate > moderate - 1.0);
    }
}
