use crate::model::{History, Status};
use crate::scoring::ScoreBreakdown;
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use rmp_serde::decode;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
};

/// Outcome of one run, as written to its score file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub seed: u64,
    pub strategy: String,
    pub steps_taken: usize,
    pub status: Status,
    pub score: ScoreBreakdown,
}

impl RunReport {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let report = toml::from_str(&contents).context("failed to parse score file")?;
        Ok(report)
    }

    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents = toml::to_string(self).context("failed to serialize score")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }
}

/// Quantity aggregated across runs.
pub trait Obs {
    fn update(&mut self, report: &RunReport, history: &History) -> Result<()>;
    fn report(&self) -> Result<toml::Table>;
}

fn to_table<T: Serialize>(key: &str, val: &T) -> Result<toml::Table> {
    let val = toml::Value::try_from(val).with_context(|| format!("failed to serialize {key}"))?;
    let mut table = toml::Table::new();
    table.insert(key.to_string(), val);
    Ok(table)
}

/// Every score component.
pub struct Scores {
    names: Vec<&'static str>,
    acc_vec: Vec<Accumulator>,
}

impl Scores {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            acc_vec: Vec::new(),
        }
    }
}

impl Obs for Scores {
    fn update(&mut self, report: &RunReport, _history: &History) -> Result<()> {
        for (name, val) in report.score.components() {
            let i_comp = match self.names.iter().position(|&known| known == name) {
                Some(i_comp) => i_comp,
                None => {
                    self.names.push(name);
                    self.acc_vec.push(Accumulator::new());
                    self.acc_vec.len() - 1
                }
            };
            self.acc_vec[i_comp].add(val);
        }
        Ok(())
    }

    fn report(&self) -> Result<toml::Table> {
        let mut table = toml::Table::new();
        for (name, acc) in self.names.iter().zip(&self.acc_vec) {
            table.extend(to_table(name, &acc.report())?);
        }
        to_table("scores", &table)
    }
}

/// Height and timing of the infection peak.
pub struct Peak {
    rate: Accumulator,
    step: Accumulator,
}

impl Peak {
    pub fn new() -> Self {
        Self {
            rate: Accumulator::new(),
            step: Accumulator::new(),
        }
    }
}

impl Obs for Peak {
    fn update(&mut self, _report: &RunReport, history: &History) -> Result<()> {
        let peak = history
            .snapshots
            .iter()
            .max_by(|a, b| a.infection_rate().total_cmp(&b.infection_rate()))
            .context("history is empty")?;
        self.rate.add(peak.infection_rate());
        self.step.add(peak.step as f64);
        Ok(())
    }

    fn report(&self) -> Result<toml::Table> {
        let mut table = to_table("rate", &self.rate.report())?;
        table.extend(to_table("step", &self.step.report())?);
        to_table("peak", &table)
    }
}

/// Share of contained runs, variant emergences, and run lengths.
pub struct Outcome {
    contained: Accumulator,
    variants_emerged: Accumulator,
    steps_taken: Accumulator,
}

impl Outcome {
    pub fn new() -> Self {
        Self {
            contained: Accumulator::new(),
            variants_emerged: Accumulator::new(),
            steps_taken: Accumulator::new(),
        }
    }
}

impl Obs for Outcome {
    fn update(&mut self, report: &RunReport, history: &History) -> Result<()> {
        let contained = report.status == Status::Contained;
        self.contained.add(if contained { 1.0 } else { 0.0 });
        let last = history.last().context("history is empty")?;
        let emerged = last.state.variants.iter().filter(|var| var.active).count();
        self.variants_emerged.add(emerged as f64);
        self.steps_taken.add(report.steps_taken as f64);
        Ok(())
    }

    fn report(&self) -> Result<toml::Table> {
        let mut table = to_table("contained", &self.contained.report())?;
        table.extend(to_table("variants_emerged", &self.variants_emerged.report())?);
        table.extend(to_table("steps_taken", &self.steps_taken.report())?);
        to_table("outcome", &table)
    }
}

/// Aggregates the runs of a simulation directory.
pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Scores::new()),
            Box::new(Peak::new()),
            Box::new(Outcome::new()),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_run<P: AsRef<Path>>(&mut self, score_file: P, history_file: P) -> Result<()> {
        let report = RunReport::from_file(score_file).context("failed to load score")?;

        let file = history_file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let history: History =
            decode::from_read(&mut reader).context("failed to deserialize history")?;

        for obs in &mut self.obs_ptr_vec {
            obs.update(&report, &history)
                .context("failed to update observable")?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let mut summary = toml::Table::new();
        summary.insert("n_runs".to_string(), toml::Value::Integer(self.n_runs as i64));
        for obs in &self.obs_ptr_vec {
            summary.extend(obs.report()?);
        }

        let file = file.as_ref();
        let contents = toml::to_string(&summary).context("failed to serialize summary")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }
}
