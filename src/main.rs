//! stepwise-gen CLI - Run a generation strategy against a benchmark function.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rand::prelude::*;
use rayon::prelude::*;

use stepwise_gen::{
    experiment::{Experiment, ExperimentView, Metric},
    generation::{GenOptions, GenerationStrategy},
    schema::{ExperimentConfig, RunConfig},
    storage::{JsonFileStore, SnapshotSaver},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json> [--snapshot <dir>]", args[0]);
        eprintln!();
        eprintln!("Run a generation strategy against a synthetic benchmark.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json          Path to run configuration file");
        eprintln!("  --snapshot <dir>  Store the final experiment and strategy in <dir>");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let snapshot_dir = args
        .iter()
        .position(|a| a == "--snapshot")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let mut config: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    if let Some(seed) = config.random_seed {
        for (i, step) in config.strategy.steps.iter_mut().enumerate() {
            step.model_kwargs
                .entry("seed")
                .or_insert_with(|| serde_json::json!(seed.wrapping_add(i as u64)));
        }
    }

    let mut strategy = GenerationStrategy::from_config(&config.strategy).unwrap_or_else(|e| {
        eprintln!("Invalid strategy: {}", e);
        std::process::exit(1);
    });

    let mut experiment = Experiment::new(
        config.experiment.name.clone(),
        config.experiment.search_space.clone(),
    )
    .with_metric(Metric {
        lower_is_better: Some(true),
        ..Metric::new(config.experiment.objective.clone())
    });

    println!("stepwise-gen");
    println!("============");
    println!("Strategy: {}", strategy);
    println!(
        "Experiment: {} ({} parameters, {:?})",
        config.experiment.name,
        config.experiment.search_space.dimension(),
        config.experiment.benchmark
    );
    println!("Max trials: {}, batch size: {}", config.max_trials, config.batch_size);
    println!();

    let start = Instant::now();
    let mut round = 0u64;

    while experiment.num_trials() < config.max_trials {
        let (limit, completed) = strategy
            .current_generator_run_limit(&experiment)
            .unwrap_or_else(|e| {
                eprintln!("Error querying generator run limit: {}", e);
                std::process::exit(1);
            });
        if completed {
            break;
        }

        let mut batch = config
            .batch_size
            .min(config.max_trials - experiment.num_trials());
        if limit >= 0 {
            batch = batch.min(limit as usize);
        }
        if batch == 0 {
            // Every trial is completed before the next round, so nothing can unblock us.
            log::warn!("Strategy cannot generate more trials right now; stopping.");
            break;
        }

        let runs = match strategy.generate_multiple(&experiment, batch, None, GenOptions::new()) {
            Ok(runs) => runs,
            Err(e) if e.is_completed() => break,
            Err(e) if e.is_wait_and_retry() => {
                log::warn!("Stopping: {}", e);
                break;
            }
            Err(e) => {
                eprintln!("Error generating trials: {}", e);
                std::process::exit(1);
            }
        };

        let trials: Vec<usize> = runs
            .iter()
            .map(|run| {
                let index = experiment.new_trial(run);
                exit_on_error(experiment.mark_running(index));
                index
            })
            .collect();

        let evaluations = evaluate(&experiment, &config.experiment, &trials, config.random_seed);
        for (index, values) in evaluations {
            exit_on_error(experiment.attach_trial_values(
                index,
                &config.experiment.objective,
                &values,
            ));
            exit_on_error(experiment.mark_completed(index));
        }

        round += 1;
        println!(
            "  Round {}: step {} ({}), {} trials",
            round,
            strategy.current_step_index(),
            strategy.current_step().model_name(),
            experiment.num_trials()
        );
    }

    let elapsed = start.elapsed();

    println!();
    println!("Trials:");
    for row in strategy.trials_summary(&experiment) {
        println!("  {}", row);
    }

    let best = experiment
        .lookup_data(None)
        .observations
        .into_iter()
        .min_by(|a, b| a.mean.total_cmp(&b.mean));
    println!();
    match best {
        Some(obs) => println!(
            "Best: {} = {:.6} (arm {}, trial {})",
            obs.metric_name, obs.mean, obs.arm_name, obs.trial_index
        ),
        None => println!("Best: no observations"),
    }
    println!("Time: {:.2}s", elapsed.as_secs_f32());

    if let Some(dir) = snapshot_dir {
        let store = JsonFileStore::open(&dir).unwrap_or_else(|e| {
            eprintln!("Error opening snapshot directory: {}", e);
            std::process::exit(1);
        });
        let saver = SnapshotSaver::new(store).suppress_errors(true);
        let saved_experiment = saver.save_experiment(&experiment).unwrap_or(false);
        let saved_strategy = saver.save_strategy(&strategy).unwrap_or(false);
        println!(
            "Snapshot written to {} (experiment: {}, strategy: {})",
            dir.display(),
            saved_experiment,
            saved_strategy
        );
    }
}

/// Evaluate every arm of `trials` in parallel, adding observation noise.
fn evaluate(
    experiment: &Experiment,
    config: &ExperimentConfig,
    trials: &[usize],
    seed: Option<u64>,
) -> Vec<(usize, Vec<f64>)> {
    let space = experiment.search_space();
    trials
        .par_iter()
        .map(|&index| {
            let mut rng = match seed {
                Some(seed) => {
                    StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(0x9E37_79B9))
                }
                None => StdRng::from_entropy(),
            };
            let values = experiment
                .trial_arms(index)
                .iter()
                .map(|arm| {
                    let point: Vec<f64> = space
                        .parameters
                        .iter()
                        .map(|p| arm.parameters.get(&p.name).copied().unwrap_or(p.lower))
                        .collect();
                    let noise: f64 = rng.sample(rand_distr::StandardNormal);
                    config.benchmark.evaluate(space, &point) + config.noise_sd * noise
                })
                .collect();
            (index, values)
        })
        .collect()
}

fn exit_on_error<E: std::fmt::Display>(result: Result<(), E>) {
    if let Err(e) = result {
        eprintln!("Error updating experiment: {}", e);
        std::process::exit(1);
    }
}

fn print_example_config() {
    let config = RunConfig::default();

    println!("Example configuration (run.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
