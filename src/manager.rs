use crate::analysis::{Analyzer, RunReport};
use crate::config::Config;
use crate::engine::Engine;
use crate::strategy::StrategyKind;
use anyhow::{Context, Result, anyhow, bail};
use glob::glob;
use rmp_serde::encode;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
};

/// Settings shared by the runs of one `run` or `batch` command.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub strategy: StrategyKind,
    /// Steps per run; the scenario's step budget when `None`.
    pub steps: Option<usize>,
}

/// Owns a simulation directory: its scenario file, run directories and summary.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Perform one run in a new run directory.
    pub fn run_simulation(&self, seed: u64, opts: RunOptions) -> Result<RunReport> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;
        self.perform_run(run_idx, seed, opts)
    }

    /// Perform `n_runs` runs with consecutive seeds, in parallel.
    pub fn run_batch(
        &self,
        n_runs: usize,
        first_seed: u64,
        opts: RunOptions,
    ) -> Result<Vec<RunReport>> {
        let first_idx = self.count_run_dirs().context("failed to count run dirs")?;
        log::info!("starting {n_runs} runs from seed {first_seed}");

        let results: Vec<Result<RunReport>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..n_runs)
                .map(|i_run| {
                    let seed = first_seed.wrapping_add(i_run as u64);
                    scope.spawn(move || self.perform_run(first_idx + i_run, seed, opts))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("run thread panicked")))
                })
                .collect()
        });

        let mut reports = Vec::with_capacity(n_runs);
        for (i_run, result) in results.into_iter().enumerate() {
            let report = result.with_context(|| format!("failed to perform run {i_run}"))?;
            reports.push(report);
        }
        Ok(reports)
    }

    fn perform_run(&self, run_idx: usize, seed: u64, opts: RunOptions) -> Result<RunReport> {
        let run_dir = self.run_dir(run_idx);
        if run_dir.exists() {
            bail!("{run_dir:?} already exists");
        }
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let mut engine = Engine::new(self.cfg.clone(), seed).context("failed to create engine")?;
        engine.register_strategy(opts.strategy.build());

        let steps = opts.steps.unwrap_or(self.cfg.step_budget);
        let score = engine.run(steps).context("failed to run simulation")?;

        let history_file = self.history_file(run_idx);
        let file = File::create(&history_file)
            .with_context(|| format!("failed to create {history_file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, engine.history()).context("failed to serialize history")?;
        writer.flush().context("failed to flush writer stream")?;

        let report = RunReport {
            seed,
            strategy: format!("{:?}", opts.strategy),
            steps_taken: engine.history().steps_taken(),
            status: engine.status(),
            score,
        };
        report
            .to_file(self.score_file(run_idx))
            .context("failed to save score")?;

        Ok(report)
    }

    /// Aggregate every run into the summary file.
    pub fn run_analysis(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        if n_runs == 0 {
            bail!("no runs to analyze in {:?}", self.sim_dir);
        }

        let mut analyzer = Analyzer::new();
        for run_idx in 0..n_runs {
            analyzer
                .add_run(self.score_file(run_idx), self.history_file(run_idx))
                .with_context(|| format!("failed to add run {run_idx}"))?;
        }

        let summary_file = self.summary_file();
        analyzer
            .save_results(&summary_file)
            .context("failed to save results")?;
        log::info!("wrote {summary_file:?}");

        Ok(())
    }

    /// Remove every run directory and the summary file.
    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs()? {
            fs::remove_dir_all(&run_dir).with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }
        let summary_file = self.summary_file();
        if summary_file.exists() {
            fs::remove_file(&summary_file)
                .with_context(|| format!("failed to remove {summary_file:?}"))?;
        }
        Ok(())
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn history_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("history.msgpack")
    }

    fn score_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("score.toml")
    }

    fn summary_file(&self) -> PathBuf {
        self.sim_dir.join("summary.toml")
    }
}
