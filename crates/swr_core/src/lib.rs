/// The `swr_core` crate coordinates Schwarz waveform relaxation between an
/// atmosphere and an ocean model that exchange boundary fields through files.
///
/// Key components:
/// - **Remapper**: turns the coupling output of one iteration into the
///   boundary input of the next (renaming, stencil reshaping, time alignment).
/// - **Convergence**: relative 2-norm and ∞-norm criteria over all coupling
///   variables, measured against a reference iterate.
/// - **Schwarz**: the iteration controller that runs the model, archives
///   iterates, stages inputs and decides when to stop.
/// - **Experiment**: run configuration and the persisted iteration state.
/// - **Traits**: the external model runner and configuration renderer.
pub mod convergence;
pub mod coupling;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod output;
pub mod remap;
pub mod schwarz;
pub mod traits;

pub use convergence::{ConvergenceChecker, ConvergenceResult, NormOrder};
pub use coupling::{CouplingMap, CouplingScheme, ModelVariant, Side};
pub use error::{SwrError, SwrResult};
pub use experiment::{Context, Experiment, ExperimentState};
pub use remap::{remap, Remapper};
pub use schwarz::{IterationPhase, RunOutcome, RunSettings, SchwarzCoupling};
pub use traits::{ConfigRenderer, MessagePassing, ModelRunner};
