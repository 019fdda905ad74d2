//! JSON file store for experiments and strategy snapshots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{RetryConfig, StorageError, StrategySnapshot, retry_on_transient};
use crate::experiment::{Experiment, ExperimentView};
use crate::generation::GenerationStrategy;

const STRATEGY_SUFFIX: &str = "strategy.json";
const EXPERIMENT_SUFFIX: &str = "experiment.json";

/// Stores one experiment and one strategy snapshot per experiment name
/// under a root directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, experiment_name: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{experiment_name}.{suffix}"))
    }

    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(value)?;
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        path: &Path,
        kind: &'static str,
        experiment_name: &str,
    ) -> Result<T, StorageError> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound {
                kind,
                name: experiment_name.to_string(),
            },
            _ => e.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_experiment(&self, experiment: &Experiment) -> Result<(), StorageError> {
        self.write(&self.path(experiment.name(), EXPERIMENT_SUFFIX), experiment)
    }

    pub fn load_experiment(&self, experiment_name: &str) -> Result<Experiment, StorageError> {
        self.read(
            &self.path(experiment_name, EXPERIMENT_SUFFIX),
            "experiment",
            experiment_name,
        )
    }

    /// Save a strategy snapshot under the name of the experiment the
    /// strategy is bound to.
    pub fn save_strategy(&self, strategy: &GenerationStrategy) -> Result<(), StorageError> {
        let experiment_name = strategy.experiment_name().ok_or_else(|| {
            StorageError::Unsupported(format!(
                "Generation strategy {} is not bound to an experiment",
                strategy.name()
            ))
        })?;
        let snapshot = strategy.to_snapshot()?;
        self.write(&self.path(experiment_name, STRATEGY_SUFFIX), &snapshot)
    }

    pub fn load_strategy_snapshot(
        &self,
        experiment_name: &str,
    ) -> Result<StrategySnapshot, StorageError> {
        self.read(
            &self.path(experiment_name, STRATEGY_SUFFIX),
            "generation strategy",
            experiment_name,
        )
    }

    pub fn load_strategy(&self, experiment_name: &str) -> Result<GenerationStrategy, StorageError> {
        GenerationStrategy::from_snapshot(&self.load_strategy_snapshot(experiment_name)?)
    }
}

/// Saves through a [`JsonFileStore`] with retries.
///
/// With `suppress_errors`, failures are logged and reported as `Ok(false)`
/// so an optimization loop can carry on without persistence.
#[derive(Debug, Clone)]
pub struct SnapshotSaver {
    store: JsonFileStore,
    retry: RetryConfig,
    suppress_errors: bool,
}

impl SnapshotSaver {
    pub fn new(store: JsonFileStore) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            suppress_errors: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    pub fn store(&self) -> &JsonFileStore {
        &self.store
    }

    /// Returns whether the experiment was saved.
    pub fn save_experiment(&self, experiment: &Experiment) -> Result<bool, StorageError> {
        self.finish(retry_on_transient(&self.retry, || {
            self.store.save_experiment(experiment)
        }))
    }

    /// Returns whether the strategy was saved.
    pub fn save_strategy(&self, strategy: &GenerationStrategy) -> Result<bool, StorageError> {
        self.finish(retry_on_transient(&self.retry, || {
            self.store.save_strategy(strategy)
        }))
    }

    fn finish(&self, result: Result<(), StorageError>) -> Result<bool, StorageError> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if self.suppress_errors => {
                log::error!("Failed to save snapshot, continuing without it: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenOptions, GenerationStepConfig};
    use crate::schema::{Arm, ModelRegistry};
    use crate::testing::{StubModel, complete_trial, run_trial, test_experiment};

    fn uniform_strategy() -> GenerationStrategy {
        GenerationStrategy::new(
            vec![GenerationStepConfig::new(ModelRegistry::Uniform, -1)],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_experiment_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let mut exp = test_experiment("stored");
        let mut gs = uniform_strategy();
        let run = gs.generate(&exp, None, GenOptions::new()).unwrap();
        let trial = run_trial(&mut exp, &run);
        complete_trial(&mut exp, trial);

        store.save_experiment(&exp).unwrap();
        let loaded = store.load_experiment("stored").unwrap();
        assert_eq!(loaded.num_trials(), 1);
        assert_eq!(
            loaded.trial_indices_by_status(),
            exp.trial_indices_by_status()
        );
        assert_eq!(loaded.lookup_data(None).len(), 1);
    }

    #[test]
    fn test_status_quo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let mut exp = test_experiment("stored");
        let control = Arm::from_pairs([("x", 0.5)]).named("status_quo");
        exp.set_status_quo(control.clone());

        store.save_experiment(&exp).unwrap();
        let loaded = store.load_experiment("stored").unwrap();
        assert_eq!(loaded.status_quo(), Some(&control));
    }

    #[test]
    fn test_strategy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested")).unwrap();
        let mut exp = test_experiment("stored");
        let mut gs = uniform_strategy();
        let run = gs.generate(&exp, None, GenOptions::new()).unwrap();
        run_trial(&mut exp, &run);

        store.save_strategy(&gs).unwrap();
        let loaded = store.load_strategy("stored").unwrap();
        assert_eq!(loaded.name(), gs.name());
        assert_eq!(loaded.generator_runs().len(), 1);
        assert_eq!(loaded.experiment_name(), Some("stored"));
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load_strategy("absent"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unbound_strategy_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save_strategy(&uniform_strategy()),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn test_saver_suppresses_errors() {
        let dir = tempfile::tempdir().unwrap();
        let exp = test_experiment("stored");
        let mut gs = GenerationStrategy::new(
            vec![GenerationStepConfig::new(StubModel::new().factory(), -1)],
            None,
        )
        .unwrap();
        gs.generate(&exp, None, GenOptions::new()).unwrap();

        let saver = SnapshotSaver::new(JsonFileStore::open(dir.path()).unwrap());
        assert!(saver.save_strategy(&gs).is_err());
        let saver = saver.suppress_errors(true);
        assert!(!saver.save_strategy(&gs).unwrap());
        assert!(saver.save_experiment(&exp).unwrap());
    }
}
