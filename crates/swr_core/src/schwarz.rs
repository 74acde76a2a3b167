//! Iteration controller for Schwarz waveform relaxation.
//!
//! Each iteration runs the coupled model once, archives its output as
//! `<exp_id>_<iteration>`, stages the boundary data for the next iteration in
//! a fresh run directory and, from the second iteration on, checks whether
//! the coupling fields stopped changing.
//!
//! ```text
//! NotStarted → Running(k) → Postprocessed(k) → Running(k + 1)
//!                                            ↘ Converged(k)
//!                                            ↘ MaxItersReached(k)
//! ```
//!
//! The rename of the run directory is the point at which the model output
//! changes hands: before it the directory belongs to the running model, after
//! it the iterate is archived and only pruned, never modified.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::convergence::ConvergenceChecker;
use crate::experiment::{persist_state, Context, Experiment, ExperimentState, STATE_FILE_NAME};
use crate::error::{SwrError, SwrResult};
use crate::output::{reduce_output, KeepList};
use crate::remap::Remapper;
use crate::traits::{ConfigRenderer, ModelRunner};

/// Bounds and stopping rule of one call to [`SchwarzCoupling::run`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub max_iters: usize,
    pub current_iter: usize,
    pub stop_at_convergence: bool,
    pub relative_tolerance: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_iters: 1,
            current_iter: 1,
            stop_at_convergence: false,
            relative_tolerance: 1e-3,
        }
    }
}

impl RunSettings {
    pub fn with_max_iters(max_iters: usize) -> Self {
        Self {
            max_iters,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SwrResult<()> {
        if self.max_iters < 1 {
            return Err(SwrError::Config(
                "Maximum amount of iterations must be >= 1".into(),
            ));
        }
        if self.current_iter < 1 {
            return Err(SwrError::Config("Current iteration must be >= 1".into()));
        }
        if self.current_iter > self.max_iters {
            return Err(SwrError::Config(format!(
                "Current iteration {} is beyond the maximum of {} iterations",
                self.current_iter, self.max_iters
            )));
        }
        if !(self.relative_tolerance.is_finite() && self.relative_tolerance > 0.0) {
            return Err(SwrError::Config(format!(
                "Relative tolerance must be positive, got {}",
                self.relative_tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationPhase {
    NotStarted,
    Running(usize),
    Postprocessed(usize),
    Converged(usize),
    MaxItersReached(usize),
}

impl IterationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IterationPhase::Converged(_) | IterationPhase::MaxItersReached(_)
        )
    }
}

/// Result of a completed run. Not converging within `max_iters` is a normal
/// outcome; inspect `state.converged`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub phase: IterationPhase,
    pub state: ExperimentState,
    /// Archived iterate directories produced by this call, in order.
    pub iterates: Vec<PathBuf>,
    /// Iterate directories that existed before this call and were replaced.
    pub overwritten: Vec<PathBuf>,
}

/// Drives a coupled experiment through Schwarz iterations.
pub struct SchwarzCoupling<'a, R: ModelRunner, C: ConfigRenderer> {
    context: &'a Context,
    experiment: Experiment,
    runner: R,
    renderer: C,
    remapper: Remapper,
    convergence_checker: ConvergenceChecker,
    reduce_output: bool,
    keep_debug_output: bool,
    state: ExperimentState,
    phase: IterationPhase,
}

impl<'a, R: ModelRunner, C: ConfigRenderer> SchwarzCoupling<'a, R, C> {
    pub fn new(
        experiment: Experiment,
        context: &'a Context,
        runner: R,
        renderer: C,
    ) -> SwrResult<Self> {
        experiment.validate(false)?;
        let remapper = Remapper::new(
            experiment.cpl_scheme,
            experiment.dt_cpl,
            experiment.dt_ifs,
            experiment.dt_nemo,
            context.model_variant,
        );
        Ok(Self {
            context,
            experiment,
            runner,
            renderer,
            remapper,
            convergence_checker: ConvergenceChecker::new(),
            reduce_output: true,
            keep_debug_output: false,
            state: ExperimentState::default(),
            phase: IterationPhase::NotStarted,
        })
    }

    /// Whether archived iterates are pruned after post-processing.
    pub fn with_output_reduction(mut self, reduce_output: bool, keep_debug_output: bool) -> Self {
        self.reduce_output = reduce_output;
        self.keep_debug_output = keep_debug_output;
        self
    }

    pub fn with_remapper(mut self, remapper: Remapper) -> Self {
        self.remapper = remapper;
        self
    }

    pub fn with_convergence_checker(mut self, checker: ConvergenceChecker) -> Self {
        self.convergence_checker = checker;
        self
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn phase(&self) -> IterationPhase {
        self.phase
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn renderer(&self) -> &C {
        &self.renderer
    }

    pub fn run_directory(&self) -> PathBuf {
        self.context.run_directory(&self.experiment)
    }

    fn iterate_directory(&self, iteration: usize) -> PathBuf {
        self.context.iterate_directory(&self.experiment, iteration)
    }

    /// Runs iterations `current_iter..=max_iters`, stopping early on
    /// convergence if requested.
    pub fn run(&mut self, settings: RunSettings) -> SwrResult<RunOutcome> {
        settings.validate()?;

        let mut iteration = settings.current_iter;
        self.state.iteration = iteration;
        if iteration > 1 {
            self.prepare_restart(iteration - 1)?;
        } else {
            fs::create_dir_all(self.run_directory())?;
        }

        let mut iterates = Vec::new();
        let mut overwritten = Vec::new();
        while iteration <= settings.max_iters {
            info!("Iteration {}", iteration);
            self.phase = IterationPhase::Running(iteration);
            self.renderer
                .render(&self.experiment)
                .map_err(SwrError::Render)?;
            self.runner
                .run_coupled_model(iteration > 1)
                .map_err(|source| SwrError::ModelRun { iteration, source })?;

            let (iterate_dir, replaced) = self.postprocess_iteration(iteration, &settings)?;
            if replaced {
                overwritten.push(iterate_dir.clone());
            }
            iterates.push(iterate_dir);
            self.phase = IterationPhase::Postprocessed(iteration);

            if settings.stop_at_convergence && self.state.converged {
                self.phase = IterationPhase::Converged(iteration);
                break;
            }
            iteration += 1;
        }
        if !self.phase.is_terminal() {
            self.phase = IterationPhase::MaxItersReached(self.state.iteration);
        }

        Ok(RunOutcome {
            phase: self.phase,
            state: self.state,
            iterates,
            overwritten,
        })
    }

    /// Stages the boundary data of an archived iterate into a fresh run
    /// directory so that iteration `previous + 1` can start.
    pub fn prepare_restart(&mut self, previous: usize) -> SwrResult<()> {
        let previous_dir = self.iterate_directory(previous);
        if !previous_dir.is_dir() {
            return Err(SwrError::missing(
                format!("prior iteration output for iteration {previous}"),
                previous_dir,
            ));
        }
        let run_directory = self.run_directory();
        if run_directory.exists() {
            fs::remove_dir_all(&run_directory)?;
        }
        fs::create_dir_all(&run_directory)?;
        info!("Restarting from {}", previous_dir.display());
        self.remapper.remap(&previous_dir, &run_directory)?;
        Ok(())
    }

    /// Returns the archived iterate and whether an earlier archive was replaced.
    fn postprocess_iteration(
        &mut self,
        iteration: usize,
        settings: &RunSettings,
    ) -> SwrResult<(PathBuf, bool)> {
        info!("Postprocessing iteration {}", iteration);
        let run_directory = self.run_directory();
        let iterate_dir = self.iterate_directory(iteration);

        if !run_directory.is_dir() {
            return Err(SwrError::missing("model run directory", run_directory));
        }
        let replaced = iterate_dir.exists();
        if replaced {
            warn!(
                "{} already exists and will be overwritten",
                iterate_dir.display()
            );
            fs::remove_dir_all(&iterate_dir)?;
        }
        fs::rename(&run_directory, &iterate_dir)?;

        fs::create_dir(&run_directory)?;
        self.remapper.remap(&iterate_dir, &run_directory)?;

        self.state.iteration = iteration;
        if iteration > 1 {
            let result = self.convergence_checker.check_convergence(
                &iterate_dir,
                &self.iterate_directory(iteration - 1),
                &self.iterate_directory(1),
                settings.relative_tolerance,
            )?;
            self.state.record(result);
            if result.all() {
                info!("Iteration {} converged!", iteration);
            }
        }

        persist_state(&self.experiment, &self.state, &iterate_dir)?;

        if self.reduce_output {
            let last_iteration = iteration >= settings.max_iters
                || (settings.stop_at_convergence && self.state.converged);
            if last_iteration {
                fs::remove_dir_all(&run_directory)?;
            }
            let mut keep = KeepList::new(self.convergence_checker.variables(), self.keep_debug_output);
            keep.names.push(STATE_FILE_NAME.to_string());
            reduce_output(&iterate_dir, &keep)?;
        }
        Ok((iterate_dir, replaced))
    }
}
