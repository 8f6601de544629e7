use outbreak::engine::Engine;
use outbreak::error::EngineError;
use outbreak::model::{History, ResourceCategory, Status};
use outbreak::strategy::{Idle, PhaseBased, ResponseCurve};
use outbreak::Config;
use proptest::prelude::*;

fn standard(step_budget: usize) -> Config {
    let mut cfg = Config::standard();
    cfg.step_budget = step_budget;
    cfg
}

fn no_variants(step_budget: usize) -> Config {
    let mut cfg = standard(step_budget);
    cfg.variants.enabled = false;
    cfg
}

fn encode(history: &History) -> Vec<u8> {
    rmp_serde::to_vec(history).expect("failed to serialize history")
}

#[test]
fn population_is_conserved() {
    let mut engine = Engine::new(standard(730), 5).expect("failed to create engine");
    engine.register_strategy(PhaseBased::default());
    engine.run(730).expect("run failed");
    for snap in &engine.history().snapshots {
        let pop = &snap.state.population;
        assert_eq!(pop.susceptible + pop.infected + pop.recovered + pop.dead, pop.total);
        snap.state.check_invariants().expect("invariant broken");
    }
}

#[test]
fn same_seed_same_history() {
    let run = |seed| {
        let mut engine = Engine::new(standard(200), seed).expect("failed to create engine");
        engine.register_strategy(ResponseCurve::default());
        engine.run(200).expect("run failed");
        encode(engine.history())
    };
    assert_eq!(run(17), run(17));
    assert_ne!(run(17), run(18));
}

#[test]
fn idle_strategy_matches_plain_stepping() {
    let mut plain = Engine::new(standard(150), 9).expect("failed to create engine");
    while !plain.status().is_terminal() {
        plain.step().expect("step failed");
    }

    let mut idle = Engine::new(standard(150), 9).expect("failed to create engine");
    idle.register_strategy(Idle);
    idle.register_step_callback(|_, _, _| Ok(()));
    idle.run(150).expect("run failed");

    assert_eq!(encode(plain.history()), encode(idle.history()));
}

#[test]
fn resource_ledger_is_monotonic() {
    let mut engine = Engine::new(standard(300), 2).expect("failed to create engine");
    engine.register_strategy(PhaseBased::default());
    engine.run(300).expect("run failed");

    for pair in engine.history().snapshots.windows(2) {
        let (prev, next) = (&pair[0].state.resources, &pair[1].state.resources);
        assert!(next.available <= prev.available);
        for cat in ResourceCategory::ALL {
            assert!(next.spent.get(cat) >= prev.spent.get(cat));
        }
    }
    let last = engine.history().last().expect("empty history");
    assert!(last.state.resources.spent.total() > 0.0);
}

#[test]
fn unmitigated_outbreak_grows() {
    let mut engine = Engine::new(no_variants(100), 42).expect("failed to create engine");
    engine.run(100).expect("run failed");
    let snaps = &engine.history().snapshots;
    let infected = |step: usize| snaps[step].state.population.infected;

    assert_eq!(infected(0), 10);
    assert!(infected(10) > infected(0));
    assert!(infected(20) > infected(10));
    assert!(infected(30) > infected(20));

    let max_rate = snaps
        .iter()
        .map(|snap| snap.infection_rate())
        .fold(0.0, f64::max);
    assert!(max_rate > 0.0);
}

#[test]
fn lockdown_trades_output_for_control() {
    let run = |level: f64| {
        let mut engine = Engine::new(no_variants(200), 4).expect("failed to create engine");
        engine.set_lockdown_level(level).expect("lockdown rejected");
        engine.run(200).expect("run failed")
    };
    let open = run(0.0);
    let closed = run(1.0);
    assert!(closed.infection_control > open.infection_control);
    assert!(closed.gdp_preserved < open.gdp_preserved);
}

#[test]
fn allocations_are_validated_and_capped() {
    let mut engine = Engine::new(standard(10), 1).expect("failed to create engine");
    assert!(matches!(
        engine.allocate_resources("healthcare", -5.0),
        Err(EngineError::InvalidAllocation(_))
    ));
    assert!(matches!(
        engine.allocate_resources("vaccines", 5.0),
        Err(EngineError::InvalidAllocation(_))
    ));

    let available = engine.available_resources();
    let allocated = engine
        .allocate_resources("healthcare", available + 1000.0)
        .expect("allocation rejected");
    assert_eq!(allocated, available);
    assert_eq!(engine.available_resources(), 0.0);
    assert_eq!(engine.state().resources.spent.healthcare, available);
}

#[test]
fn lockdown_is_clamped() {
    let mut engine = Engine::new(standard(10), 1).expect("failed to create engine");
    assert_eq!(engine.set_lockdown_level(3.0), Ok(1.0));
    assert_eq!(engine.lockdown_level(), 1.0);
    assert!(matches!(
        engine.set_lockdown_level(f64::NAN),
        Err(EngineError::InvalidControl(_))
    ));
    assert_eq!(engine.lockdown_level(), 1.0);
}

#[test]
fn variants_wait_for_their_threshold() {
    let mut cfg = standard(400);
    cfg.variants.emergence_rate = 1.0;
    for var in &mut cfg.variants.catalogue {
        var.emergence_threshold = 0.2;
    }
    let mut engine = Engine::new(cfg, 8).expect("failed to create engine");
    engine.register_step_callback(|_, _, controls| {
        controls.set_lockdown_level(1.0)?;
        controls.restrict_travel(true);
        Ok(())
    });
    engine.run(400).expect("run failed");

    for snap in &engine.history().snapshots {
        if snap.state.population.cumulative_infected_proportion() < 0.2 {
            assert!(snap.state.variants.iter().all(|var| !var.active));
        }
    }
}

#[test]
fn variants_emerge_in_a_large_outbreak() {
    let mut cfg = standard(300);
    cfg.variants.emergence_rate = 1.0;
    let mut engine = Engine::new(cfg, 8).expect("failed to create engine");
    engine.run(300).expect("run failed");

    let status = engine.get_variant_status();
    assert_eq!(status.len(), 3);
    assert!(status.iter().any(|var| var.active));
    let dominant = engine.dominant_variant().expect("no dominant variant");
    let last = engine.history().last().expect("empty history");
    assert_eq!(last.metrics.dominant_variant.as_deref(), Some(dominant.name.as_str()));

    let score = engine.score();
    assert!(score.variant_control.is_some_and(|val| val < 1.0));
}

#[test]
fn targeted_research_needs_a_known_variant() {
    let mut engine = Engine::new(standard(10), 1).expect("failed to create engine");
    assert_eq!(
        engine.target_research("Omicron", 10.0),
        Err(EngineError::UnknownVariant("Omicron".to_string()))
    );
    assert_eq!(engine.target_research("Alpha", 10.0), Ok(10.0));
}

#[test]
fn capability_flag_reports_variants() {
    let engine = Engine::new(no_variants(10), 1).expect("failed to create engine");
    assert!(!engine.supports_variants());
    let engine = Engine::new(standard(10), 1).expect("failed to create engine");
    assert!(engine.supports_variants());
}

#[test]
fn step_after_exhaustion_fails() {
    let mut engine = Engine::new(standard(20), 3).expect("failed to create engine");
    engine.run(50).expect("run failed");
    assert_eq!(engine.status(), Status::Exhausted);
    assert_eq!(engine.history().steps_taken(), 20);
    assert!(matches!(
        engine.step(),
        Err(EngineError::SimulationTerminated(Status::Exhausted))
    ));
    assert!(matches!(
        engine.allocate_resources("research", 1.0),
        Err(EngineError::SimulationTerminated(_))
    ));
    assert!(matches!(engine.run(1), Err(EngineError::SimulationTerminated(_))));
}

#[test]
fn reset_restores_initial_state() {
    let mut engine = Engine::new(standard(20), 3).expect("failed to create engine");
    engine.run(20).expect("run failed");
    engine.reset(standard(20), 3).expect("reset failed");
    assert_eq!(engine.status(), Status::Initialized);
    assert_eq!(engine.history().snapshots.len(), 1);

    let fresh = Engine::new(standard(20), 3).expect("failed to create engine");
    assert_eq!(encode(engine.history()), encode(fresh.history()));
}

#[test]
fn challenging_scenario_scores_lower() {
    let run = |cfg: Config| {
        let mut engine = Engine::new(cfg, 21).expect("failed to create engine");
        engine.run(365).expect("run failed")
    };
    let mut standard = Config::standard();
    standard.step_budget = 365;
    let mut challenging = Config::challenging();
    challenging.step_budget = 365;
    let easy = run(standard);
    let hard = run(challenging);
    assert!(hard.population_survived < easy.population_survived);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn scores_stay_in_bounds(
        seed in any::<u64>(),
        level in -1.0..2.0f64,
        spend in 0.0..50.0f64,
        travel in any::<bool>(),
    ) {
        let mut engine = Engine::new(standard(150), seed).expect("failed to create engine");
        engine.register_step_callback(move |_, _, controls| {
            controls.set_lockdown_level(level)?;
            controls.allocate(ResourceCategory::Testing, spend)?;
            controls.allocate_resources("economic", spend)?;
            controls.restrict_travel(travel);
            Ok(())
        });
        let score = engine.run(150).expect("run failed");
        for (name, val) in score.components() {
            prop_assert!((0.0..=1.0).contains(&val), "{name} = {val}");
        }
        for snap in &engine.history().snapshots {
            prop_assert!(snap.state.check_invariants().is_ok());
        }
    }
}
