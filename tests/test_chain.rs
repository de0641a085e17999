use std::sync::Arc;

use crossbeam_channel::unbounded;
use density_finder::engine::packing::RandomPacker;
use density_finder::workflow::builder::density_workflow;
use density_finder::workflow::executor::{ChainOutcome, LocalExecutor, HISTORY_FILE};
use density_finder::workflow::graph::{Task, UnitStatus};
use density_finder::workflow::sink::{read_history, JsonLinesSink, MemorySink};
use density_finder::workflow::ChainEvent;

use crate::common::{base_config, write_seed, FailingSimulator, MockSimulator, SilentSimulator};

mod common;

#[test]
fn chain_converges_after_rescaling() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let sim = Arc::new(MockSimulator::new(1100.0, 1000.0));
    let sink = Arc::new(MemorySink::default());
    let executor = LocalExecutor::new(sim.clone(), tmp.path().join("runs")).with_sink(sink.clone());

    let report = executor.run(graph);

    let ChainOutcome::Converged(result) = report.outcome else {
        panic!("expected convergence, got {:?}", report.outcome);
    };
    assert!(result.density_calculated);
    assert!(result.pressure.abs() <= config.pressure_threshold);

    // 90.9 -> 8.26 -> 0.068 -> ~0 kB on the default beta.
    let spawns: Vec<u32> = report.cycles.iter().map(|c| c.spawn_count).collect();
    assert_eq!(spawns, vec![0, 1, 2, 3]);
    assert_eq!(sim.calls(), 4);
    assert_eq!(report.graph.len(), 5);
    assert!(report.graph.units().iter().all(|u| u.status == UnitStatus::Completed));

    // Volumes grow monotonically towards v0.
    let first = &report.cycles[0];
    assert!(first.volume_after.unwrap() > first.volume_before.unwrap());

    let finals: Vec<_> = sink.records().into_iter().filter(|r| r.label == "final").collect();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].density_calculated, Some(true));
    assert!(finals[0].volume.unwrap() > 1099.9);
}

#[test]
fn each_cycle_depends_on_the_previous_one() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), tmp.path());
    let report = executor.run(graph);

    let units = report.graph.units();
    for pair in units.windows(2) {
        assert_eq!(pair[1].parents, vec![pair[0].id]);
    }
    // Spawned cycles share one task layout.
    let layouts: Vec<Vec<&str>> = units[2..]
        .iter()
        .map(|u| u.tasks.iter().map(Task::name).collect())
        .collect();
    assert!(layouts.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(units[2].name, "chain_run1");
    assert_eq!(units[2].cycle_state().unwrap().spawn_count, 1);
    assert_eq!(units[3].cycle_state().unwrap().spawn_count, 2);
}

#[test]
fn chain_stops_at_spawn_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let mut config = base_config(&seed);
    config.max_spawns = 2;

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let sim = Arc::new(MockSimulator::new(1100.0, 1000.0));
    let executor = LocalExecutor::new(sim.clone(), tmp.path().join("runs"));
    let report = executor.run(graph);

    let ChainOutcome::BudgetExhausted(result) = report.outcome else {
        panic!("expected budget exhaustion, got {:?}", report.outcome);
    };
    assert!(!result.density_calculated);
    assert_eq!(report.decisions(), config.max_spawns as usize + 1);
    assert_eq!(sim.calls(), 3);
    assert_eq!(report.cycles.last().unwrap().spawn_count, 2);
    assert_eq!(report.cycles.last().unwrap().decision, "budget exhausted");
}

#[test]
fn relaxed_seed_converges_without_spawning() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let sim = Arc::new(MockSimulator::new(1000.0, 1000.0));
    let executor = LocalExecutor::new(sim.clone(), tmp.path().join("runs"));
    let report = executor.run(graph);

    assert!(matches!(report.outcome, ChainOutcome::Converged(_)));
    assert_eq!(report.decisions(), 1);
    assert_eq!(report.graph.len(), 2);
    assert_eq!(sim.calls(), 1);
}

#[test]
fn engine_failure_reports_last_state() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let executor = LocalExecutor::new(Arc::new(FailingSimulator), tmp.path().join("runs"));
    let report = executor.run(graph);

    let ChainOutcome::Failed { unit, last_state, reason } = &report.outcome else {
        panic!("expected failure, got {:?}", report.outcome);
    };
    assert_eq!(unit, "run0");
    assert!(reason.contains("137"));
    assert_eq!(last_state.as_ref().unwrap().spawn_count, 0);
    assert_eq!(report.graph.units()[0].status, UnitStatus::Failed);
    assert_eq!(report.graph.units()[1].status, UnitStatus::Skipped);
    assert!(report.cycles.is_empty());
}

#[test]
fn missing_engine_output_fails_the_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let executor = LocalExecutor::new(Arc::new(SilentSimulator), tmp.path().join("runs"));
    let report = executor.run(graph);

    let ChainOutcome::Failed { reason, .. } = &report.outcome else {
        panic!("expected failure, got {:?}", report.outcome);
    };
    assert!(reason.contains("Missing simulation output"));
}

#[test]
fn history_and_results_are_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);
    let results = tmp.path().join("results.jsonl");

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let workdir = tmp.path().join("runs");
    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), &workdir)
        .with_sink(Arc::new(JsonLinesSink::open(&results).unwrap()));
    let report = executor.run(graph);

    let history = read_history(&workdir.join("chain").join(HISTORY_FILE)).unwrap();
    assert_eq!(history, report.cycles);

    let records = JsonLinesSink::read_all(&results).unwrap();
    let pressures: Vec<_> = records.iter().filter(|r| r.label == "pressure").collect();
    assert_eq!(pressures.len(), 4);
    for r in pressures {
        let p = r.pressure.unwrap();
        assert!((r.avg_pres.unwrap() - p * 1000.0).abs() < 1e-6);
    }
    assert!(records.iter().any(|r| r.label == "density_adjustment"));
    assert!(records.iter().any(|r| r.label == "initial_md"));
}

#[test]
fn events_stream_to_the_monitor() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let config = base_config(&seed);

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let (tx, rx) = unbounded();
    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), tmp.path())
        .with_events(tx);
    executor.run(graph);
    drop(executor);

    let events: Vec<ChainEvent> = rx.iter().collect();
    assert!(matches!(events.first(), Some(ChainEvent::GraphStarted { .. })));
    assert!(matches!(events.last(), Some(ChainEvent::Finished { outcome: ChainOutcome::Converged(_), .. })));
    let decisions = events.iter().filter(|e| matches!(e, ChainEvent::Decision(_))).count();
    assert_eq!(decisions, 4);
}

#[test]
fn independent_chains_run_in_parallel_without_interference() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);

    let mut good = base_config(&seed);
    good.name = "good".into();
    let mut capped = base_config(&seed);
    capped.name = "capped".into();
    capped.max_spawns = 1;

    let graphs = vec![
        density_workflow(&good, &RandomPacker::default()).unwrap(),
        density_workflow(&capped, &RandomPacker::default()).unwrap(),
    ];
    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), tmp.path());
    let reports = executor.run_all(graphs);

    assert_eq!(reports[0].name, "good");
    assert!(matches!(reports[0].outcome, ChainOutcome::Converged(_)));
    assert!(matches!(reports[1].outcome, ChainOutcome::BudgetExhausted(_)));
    assert_eq!(reports[1].decisions(), 2);
}

#[test]
fn copy_calcs_mirrors_every_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = write_seed(tmp.path(), 10.0);
    let home = tmp.path().join("home");
    std::fs::create_dir(&home).unwrap();

    let mut config = base_config(&seed);
    config.copy_calcs = true;
    config.calc_home = home.clone();

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    assert!(home.join("chain").is_dir());

    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), tmp.path().join("runs"));
    let report = executor.run(graph);
    assert!(matches!(report.outcome, ChainOutcome::Converged(_)));

    for run in ["run0", "run1", "run2", "run3"] {
        assert!(home.join("chain").join(run).join("OUTCAR").is_file(), "{} not mirrored", run);
    }
}

#[test]
fn amorphous_seed_runs_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.structure = None;
    config.composition = Some([("Li".to_string(), 8), ("O".to_string(), 4)].into_iter().collect());
    config.amorphous = Some(density_finder::engine::packing::AmorphousParams {
        box_scale: 10.0,
        tol: 1.5,
        seed: Some(3),
    });

    let graph = density_workflow(&config, &RandomPacker::default()).unwrap();
    let executor = LocalExecutor::new(Arc::new(MockSimulator::new(1100.0, 1000.0)), tmp.path().join("runs"));
    let report = executor.run(graph);
    assert!(report.outcome.is_terminal());
    assert!(report.decisions() <= config.max_spawns as usize + 1);
}
