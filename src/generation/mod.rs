//! Generation module - Steps, nodes and the strategy state machine.
//!
//! The layering is:
//!
//! - [`ModelSpec`]: a model source plus kwargs, and the model fitted from it
//! - [`GenerationNode`]: one or more specs, with model selection and deduplication
//! - [`GenerationStep`]: a node with a trial budget and a transition policy
//! - [`GenerationStrategy`]: an ordered list of steps and a current-step pointer
//!
//! The strategy reads trial statuses and data through
//! [`ExperimentView`](crate::experiment::ExperimentView) and never mutates the
//! experiment; callers turn generator runs into trials themselves.

mod criteria;
mod error;
mod model_spec;
mod node;
mod step;
mod strategy;

pub use criteria::{CompletionCriterion, MinimumTrialsInStatus};
pub use error::GenerationError;
pub use model_spec::{ModelFactory, ModelSource, ModelSpec, UNKNOWN_MODEL_KEY};
pub use node::{GenOptions, GenerationNode, MAX_GEN_DRAWS};
pub use step::{GenerationStep, GenerationStepConfig};
pub use strategy::{GenerationStrategy, TrialSummaryRow, extend_pending_observations};
