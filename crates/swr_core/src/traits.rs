use std::path::PathBuf;

use crate::experiment::Experiment;

/// Runs the external coupled model.
///
/// Implementations block until the model has written its output into the
/// active run directory. A failed run is reported as an error and is never
/// retried by the controller.
pub trait ModelRunner {
    /// schwarz_correction: select the correction sweep entry point instead of
    /// the initial parallel guess.
    fn run_coupled_model(&mut self, schwarz_correction: bool) -> anyhow::Result<()>;
}

/// Writes the model run configuration for an experiment.
pub trait ConfigRenderer {
    /// Returns the path of the written configuration file.
    fn render(&self, experiment: &Experiment) -> anyhow::Result<PathBuf>;
}

/// Message-passing runtime that may have been initialized in-process by the
/// model's I/O library.
pub trait MessagePassing {
    /// True while the runtime is initialized and not yet finalized.
    fn is_active(&self) -> bool;

    fn finalize(&self);
}

/// Finalizes the runtime if it is still active. Calling this again after the
/// runtime has been finalized does nothing.
pub fn finalize_if_active(runtime: &dyn MessagePassing) {
    if runtime.is_active() {
        runtime.finalize();
    }
}
