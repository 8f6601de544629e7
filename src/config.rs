use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Scenario configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scenario name.
    pub name: String,
    /// Fixed seed of the scenario.
    pub seed: u64,
    /// Maximum number of steps of a run.
    pub step_budget: usize,
    /// Resources available at the start of a run.
    pub initial_resources: f64,

    /// Population parameters.
    pub population: PopulationConfig,
    /// Disease parameters.
    pub disease: DiseaseConfig,
    /// Economic parameters.
    pub economy: EconomyConfig,
    /// Healthcare parameters.
    pub healthcare: HealthcareConfig,
    /// Intervention coefficients.
    pub interventions: InterventionConfig,
    /// Variant parameters and catalogue.
    pub variants: VariantConfig,
    /// Containment detection parameters.
    pub containment: ContainmentConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Total number of individuals.
    pub total: u64,
    /// Number of individuals infected at the start.
    pub initial_infected: u64,
    /// Regions (population shares must sum to 1.0).
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    /// Fraction of the total population living in the region.
    pub share: f64,
    /// Relative contact density.
    pub density: f64,
    /// Relative contribution to the workforce.
    pub economic_weight: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DiseaseConfig {
    /// Basic reproduction number.
    pub r0_base: f64,
    /// Fatality ratio among resolved cases.
    pub mortality_rate: f64,
    /// Average number of steps an infection lasts.
    pub recovery_period: f64,
    /// Weight of global prevalence in each region's force of infection.
    pub regional_mixing: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub initial_gdp: f64,
    /// Fraction of the gap to the target output closed per step.
    pub adjustment_rate: f64,
    /// Output lost per unit fraction of sick or dead workforce.
    pub illness_productivity_loss: f64,
    /// Economic sectors (weights must sum to 1.0).
    pub sectors: Vec<SectorConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SectorConfig {
    pub name: String,
    /// Share of GDP.
    pub weight: f64,
    /// Fraction of sector output lost under full lockdown.
    pub lockdown_sensitivity: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HealthcareConfig {
    /// Number of severe cases the system can treat.
    pub capacity: f64,
    /// Fraction of infected individuals who need care.
    pub severe_fraction: f64,
    /// Utilization ratio above which care starts to collapse.
    pub overwhelm_threshold: f64,
    /// Strength of the mortality penalty past the threshold.
    pub overwhelm_penalty: f64,
    /// Scripted capacity changes.
    pub events: Vec<CapacityEvent>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CapacityEvent {
    /// Step from which the event applies.
    pub step: usize,
    /// Capacity relative to the baseline.
    pub capacity_factor: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InterventionConfig {
    /// Maximum fractional R0 reduction of a full lockdown.
    pub lockdown_r0_reduction: f64,

    /// Geometric compliance decay per step under lockdown.
    pub compliance_decay: f64,
    /// Lowest reachable compliance.
    pub compliance_floor: f64,
    /// Lockdown level above which compliance decays.
    pub compliance_threshold: f64,
    /// Fraction of lost compliance recovered per step below the threshold.
    pub compliance_recovery: f64,

    pub healthcare_effectiveness: f64,
    pub healthcare_max_reduction: f64,
    pub economic_effectiveness: f64,
    pub economic_max_reduction: f64,
    pub testing_effectiveness: f64,
    pub testing_max_reduction: f64,

    pub research_effectiveness: f64,
    pub breakthrough_threshold: f64,
    pub breakthrough_bonus: f64,
    pub breakthrough_mortality_reduction: f64,

    /// Transmission multiplier while travel is restricted.
    pub travel_transmission_multiplier: f64,
    /// Fraction of GDP lost while travel is restricted.
    pub travel_gdp_drag: f64,

    /// Tipping-point response curve of the lockdown.
    pub lockdown_curve: LockdownCurve,
}

/// Three-segment piecewise-linear curve through `(0, 0)`, the two knees and `(1, 1)`.
///
/// The slopes must increase from segment to segment.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LockdownCurve {
    pub knees: [f64; 2],
    pub values: [f64; 2],
}

impl LockdownCurve {
    /// Evaluate the curve at `level` (clamped to [0, 1]).
    pub fn eval(&self, level: f64) -> f64 {
        let level = level.clamp(0.0, 1.0);
        let xs = [0.0, self.knees[0], self.knees[1], 1.0];
        let ys = [0.0, self.values[0], self.values[1], 1.0];
        for i_seg in 0..3 {
            if level <= xs[i_seg + 1] {
                let t = (level - xs[i_seg]) / (xs[i_seg + 1] - xs[i_seg]);
                return ys[i_seg] + t * (ys[i_seg + 1] - ys[i_seg]);
            }
        }
        1.0
    }

    fn slopes(&self) -> [f64; 3] {
        let [k_0, k_1] = self.knees;
        let [v_0, v_1] = self.values;
        [v_0 / k_0, (v_1 - v_0) / (k_1 - k_0), (1.0 - v_1) / (1.0 - k_1)]
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    pub enabled: bool,
    /// Per-step emergence probability of an eligible variant.
    pub emergence_rate: f64,
    /// Prevalence of a variant right after it emerges.
    pub seed_prevalence: f64,
    /// Replicator update rate of prevalences.
    pub selection_rate: f64,
    /// Prevalence fraction removed per unit of effective targeted research.
    pub targeted_research_rate: f64,
    /// Potential variants, in declaration order.
    pub catalogue: Vec<VariantSpec>,
}

/// Catalogue entry of a potential variant.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    pub transmissibility: f64,
    pub mortality: f64,
    pub immune_escape: f64,
    /// Cumulative infected proportion that unlocks emergence.
    pub emergence_threshold: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ContainmentConfig {
    /// Infection rate below which a step counts toward containment.
    pub threshold: f64,
    /// Number of consecutive steps required.
    pub window: usize,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Write the configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents = toml::to_string(self).context("failed to serialize config")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }

    /// Standard competition scenario.
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            seed: 42,
            step_budget: 730,
            initial_resources: 1000.0,
            population: PopulationConfig {
                total: 10_000,
                initial_infected: 10,
                regions: vec![
                    RegionConfig {
                        name: "urban".to_string(),
                        share: 0.7,
                        density: 1.5,
                        economic_weight: 0.8,
                    },
                    RegionConfig {
                        name: "rural".to_string(),
                        share: 0.3,
                        density: 0.8,
                        economic_weight: 0.2,
                    },
                ],
            },
            disease: DiseaseConfig {
                r0_base: 2.5,
                mortality_rate: 0.02,
                recovery_period: 14.0,
                regional_mixing: 0.1,
            },
            economy: EconomyConfig {
                initial_gdp: 1000.0,
                adjustment_rate: 0.05,
                illness_productivity_loss: 0.5,
                sectors: vec![
                    SectorConfig {
                        name: "essential".to_string(),
                        weight: 0.3,
                        lockdown_sensitivity: 0.2,
                    },
                    SectorConfig {
                        name: "in_person_services".to_string(),
                        weight: 0.4,
                        lockdown_sensitivity: 0.8,
                    },
                    SectorConfig {
                        name: "remote_capable".to_string(),
                        weight: 0.3,
                        lockdown_sensitivity: 0.3,
                    },
                ],
            },
            healthcare: HealthcareConfig {
                capacity: 100.0,
                severe_fraction: 0.05,
                overwhelm_threshold: 0.7,
                overwhelm_penalty: 2.5,
                events: Vec::new(),
            },
            interventions: InterventionConfig {
                lockdown_r0_reduction: 0.8,
                lockdown_curve: LockdownCurve {
                    knees: [0.3, 0.7],
                    values: [0.15, 0.55],
                },
                compliance_decay: 0.02,
                compliance_floor: 0.5,
                compliance_threshold: 0.1,
                compliance_recovery: 0.1,
                healthcare_effectiveness: 0.06,
                healthcare_max_reduction: 0.6,
                economic_effectiveness: 0.06,
                economic_max_reduction: 0.7,
                testing_effectiveness: 0.05,
                testing_max_reduction: 0.5,
                research_effectiveness: 0.1,
                breakthrough_threshold: 0.5,
                breakthrough_bonus: 1.5,
                breakthrough_mortality_reduction: 0.3,
                travel_transmission_multiplier: 0.7,
                travel_gdp_drag: 0.02,
            },
            variants: VariantConfig {
                enabled: true,
                emergence_rate: 0.01,
                seed_prevalence: 0.05,
                selection_rate: 0.1,
                targeted_research_rate: 0.0005,
                catalogue: vec![
                    VariantSpec {
                        name: "Alpha".to_string(),
                        transmissibility: 1.5,
                        mortality: 1.1,
                        immune_escape: 0.1,
                        emergence_threshold: 0.2,
                    },
                    VariantSpec {
                        name: "Beta".to_string(),
                        transmissibility: 1.3,
                        mortality: 1.3,
                        immune_escape: 0.3,
                        emergence_threshold: 0.3,
                    },
                    VariantSpec {
                        name: "Gamma".to_string(),
                        transmissibility: 1.7,
                        mortality: 1.2,
                        immune_escape: 0.5,
                        emergence_threshold: 0.4,
                    },
                ],
            },
            containment: ContainmentConfig {
                threshold: 0.001,
                window: 14,
            },
        }
    }

    /// Harder competition scenario: deadlier, fewer beds, smaller budget.
    pub fn challenging() -> Self {
        let mut cfg = Self::standard();
        cfg.name = "challenging".to_string();
        cfg.initial_resources = 800.0;
        cfg.population.initial_infected = 50;
        cfg.disease.r0_base = 3.0;
        cfg.disease.mortality_rate = 0.03;
        cfg.healthcare.capacity = 60.0;
        cfg.healthcare.events = vec![CapacityEvent {
            step: 180,
            capacity_factor: 0.8,
        }];
        cfg.variants.emergence_rate = 0.02;
        cfg
    }

    /// Whether this scenario simulates variants.
    pub fn supports_variants(&self) -> bool {
        self.variants.enabled && !self.variants.catalogue.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.step_budget, 1..=100_000).context("invalid step budget")?;
        check_num(self.initial_resources, 0.0..1e12).context("invalid initial resources")?;

        let pop = &self.population;
        check_num(pop.total, 1..=1_000_000_000).context("invalid total population")?;
        check_num(pop.initial_infected, 0..=pop.total).context("invalid initial infected")?;
        if pop.regions.is_empty() {
            bail!("at least one region is required");
        }
        check_unique(pop.regions.iter().map(|reg| reg.name.as_str()))
            .context("invalid region names")?;
        let shares: Vec<_> = pop.regions.iter().map(|reg| reg.share).collect();
        check_vec(&shares, pop.regions.len(), true).context("invalid region shares")?;
        for reg in &pop.regions {
            check_num(reg.density, 0.0..100.0)
                .with_context(|| format!("invalid density of region {:?}", reg.name))?;
            check_num(reg.economic_weight, 0.0..=1.0)
                .with_context(|| format!("invalid economic weight of region {:?}", reg.name))?;
        }
        if pop.regions.iter().all(|reg| reg.density <= 0.0) {
            bail!("at least one region must have a positive density");
        }

        let dis = &self.disease;
        check_num(dis.r0_base, 0.0..50.0).context("invalid base R0")?;
        check_num(dis.mortality_rate, 0.0..=1.0).context("invalid mortality rate")?;
        check_num(dis.recovery_period, 1.0..1000.0).context("invalid recovery period")?;
        check_num(dis.regional_mixing, 0.0..=1.0).context("invalid regional mixing")?;

        let eco = &self.economy;
        check_num(eco.initial_gdp, f64::MIN_POSITIVE..1e15).context("invalid initial GDP")?;
        check_num(eco.adjustment_rate, 0.0..=1.0).context("invalid adjustment rate")?;
        check_num(eco.illness_productivity_loss, 0.0..=1.0)
            .context("invalid illness productivity loss")?;
        if eco.sectors.is_empty() {
            bail!("at least one sector is required");
        }
        check_unique(eco.sectors.iter().map(|sec| sec.name.as_str()))
            .context("invalid sector names")?;
        let weights: Vec<_> = eco.sectors.iter().map(|sec| sec.weight).collect();
        check_vec(&weights, eco.sectors.len(), true).context("invalid sector weights")?;
        for sec in &eco.sectors {
            check_num(sec.lockdown_sensitivity, 0.0..=1.0)
                .with_context(|| format!("invalid lockdown sensitivity of {:?}", sec.name))?;
        }

        let hc = &self.healthcare;
        check_num(hc.capacity, f64::MIN_POSITIVE..1e12).context("invalid healthcare capacity")?;
        check_num(hc.severe_fraction, 0.0..=1.0).context("invalid severe fraction")?;
        check_num(hc.overwhelm_threshold, f64::MIN_POSITIVE..=10.0)
            .context("invalid overwhelm threshold")?;
        check_num(hc.overwhelm_penalty, 0.0..100.0).context("invalid overwhelm penalty")?;
        for (i_evt, evt) in hc.events.iter().enumerate() {
            check_num(evt.capacity_factor, f64::MIN_POSITIVE..=10.0)
                .with_context(|| format!("invalid capacity factor of event {i_evt}"))?;
        }

        self.interventions
            .validate()
            .context("invalid intervention coefficients")?;
        self.variants.validate().context("invalid variants")?;

        check_num(self.containment.threshold, 0.0..=1.0).context("invalid containment threshold")?;
        check_num(self.containment.window, 1..=10_000).context("invalid containment window")?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::standard()
    }
}

impl InterventionConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.lockdown_r0_reduction, 0.0..=1.0).context("invalid lockdown R0 reduction")?;

        let curve = &self.lockdown_curve;
        let [k_0, k_1] = curve.knees;
        let [v_0, v_1] = curve.values;
        if !(0.0 < k_0 && k_0 < k_1 && k_1 < 1.0) {
            bail!("lockdown curve knees must satisfy 0 < k0 < k1 < 1, but are {:?}", curve.knees);
        }
        if !(0.0 <= v_0 && v_0 <= v_1 && v_1 <= 1.0) {
            bail!(
                "lockdown curve values must be non-decreasing in [0, 1], but are {:?}",
                curve.values
            );
        }
        let slopes = curve.slopes();
        if !(slopes[0] <= slopes[1] && slopes[1] <= slopes[2]) {
            bail!("lockdown curve slopes must be increasing, but are {slopes:?}");
        }

        check_num(self.compliance_decay, 0.0..1.0).context("invalid compliance decay")?;
        check_num(self.compliance_floor, 0.0..=1.0).context("invalid compliance floor")?;
        check_num(self.compliance_threshold, 0.0..=1.0).context("invalid compliance threshold")?;
        check_num(self.compliance_recovery, 0.0..=1.0).context("invalid compliance recovery")?;

        for (name, eff, max) in [
            ("healthcare", self.healthcare_effectiveness, self.healthcare_max_reduction),
            ("economic", self.economic_effectiveness, self.economic_max_reduction),
            ("testing", self.testing_effectiveness, self.testing_max_reduction),
        ] {
            check_num(eff, 0.0..10.0).with_context(|| format!("invalid {name} effectiveness"))?;
            check_num(max, 0.0..=1.0).with_context(|| format!("invalid {name} max reduction"))?;
        }

        check_num(self.research_effectiveness, 0.0..10.0)
            .context("invalid research effectiveness")?;
        check_num(self.breakthrough_threshold, 0.0..=1.0)
            .context("invalid breakthrough threshold")?;
        check_num(self.breakthrough_bonus, 1.0..100.0).context("invalid breakthrough bonus")?;
        check_num(self.breakthrough_mortality_reduction, 0.0..=1.0)
            .context("invalid breakthrough mortality reduction")?;

        check_num(self.travel_transmission_multiplier, 0.0..=1.0)
            .context("invalid travel transmission multiplier")?;
        check_num(self.travel_gdp_drag, 0.0..=1.0).context("invalid travel GDP drag")?;

        Ok(())
    }
}

impl VariantConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.emergence_rate, 0.0..=1.0).context("invalid emergence rate")?;
        check_num(self.seed_prevalence, 0.0..=1.0).context("invalid seed prevalence")?;
        check_num(self.selection_rate, 0.0..=1.0).context("invalid selection rate")?;
        check_num(self.targeted_research_rate, 0.0..1.0)
            .context("invalid targeted research rate")?;
        check_unique(self.catalogue.iter().map(|var| var.name.as_str()))
            .context("invalid variant names")?;
        for var in &self.catalogue {
            let name = &var.name;
            check_num(var.transmissibility, f64::MIN_POSITIVE..100.0)
                .with_context(|| format!("invalid transmissibility of {name:?}"))?;
            check_num(var.mortality, 0.0..100.0)
                .with_context(|| format!("invalid mortality of {name:?}"))?;
            check_num(var.immune_escape, 0.0..=1.0)
                .with_context(|| format!("invalid immune escape of {name:?}"))?;
            check_num(var.emergence_threshold, 0.0..=1.0)
                .with_context(|| format!("invalid emergence threshold of {name:?}"))?;
        }
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_vec(vec: &[f64], exp_len: usize, prob_vec: bool) -> Result<()> {
    // Ensure vector has expected length.
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }
    if !prob_vec {
        return Ok(());
    }
    // For probability vectors: non-negative elements and sums to ~1.0.
    if vec.iter().any(|&ele| !(ele >= 0.0)) {
        bail!("vector must have only non-negative elements");
    }
    let sum: f64 = vec.iter().sum();
    let tol = 1e-8;
    if (sum - 1.0).abs() > tol {
        bail!("vector must sum to 1.0 (tolerance: {tol}), but sums to {sum}");
    }
    Ok(())
}

fn check_unique<'a, I>(names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            bail!("names must not be empty");
        }
        if !seen.insert(name) {
            bail!("name {name:?} is used more than once");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        Config::standard().validate().expect("standard preset is invalid");
        Config::challenging()
            .validate()
            .expect("challenging preset is invalid");
    }

    #[test]
    fn toml_round_trip_keeps_config() {
        let cfg = Config::challenging();
        let contents = toml::to_string(&cfg).expect("failed to serialize config");
        let parsed: Config = toml::from_str(&contents).expect("failed to deserialize config");
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn rejects_shares_not_summing_to_one() {
        let mut cfg = Config::standard();
        cfg.population.regions[0].share = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_too_many_initial_infected() {
        let mut cfg = Config::standard();
        cfg.population.initial_infected = cfg.population.total + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_concave_lockdown_curve() {
        let mut cfg = Config::standard();
        cfg.interventions.lockdown_curve.values = [0.6, 0.8];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_variant_names() {
        let mut cfg = Config::standard();
        cfg.variants.catalogue[1].name = "Alpha".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn lockdown_curve_has_increasing_marginal_returns() {
        let curve = Config::standard().interventions.lockdown_curve;
        assert_eq!(curve.eval(0.0), 0.0);
        assert!((curve.eval(1.0) - 1.0).abs() < 1e-12);
        assert!((curve.eval(0.3) - 0.15).abs() < 1e-12);
        let low = curve.eval(0.2) - curve.eval(0.1);
        let mid = curve.eval(0.5) - curve.eval(0.4);
        let high = curve.eval(0.9) - curve.eval(0.8);
        assert!(low < mid && mid < high);
        assert_eq!(curve.eval(-3.0), 0.0);
        assert!((curve.eval(7.0) - 1.0).abs() < 1e-12);
    }
}
