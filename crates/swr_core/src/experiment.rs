//! Experiment configuration and per-iteration run state.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::convergence::ConvergenceResult;
use crate::coupling::{CouplingScheme, ModelVariant};
use crate::error::{SwrError, SwrResult};

/// Name of the provenance file written into every iterate directory.
pub const STATE_FILE_NAME: &str = "setup_dict.yaml";

fn default_nstrtini() -> u32 {
    1
}

fn default_levels() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_nradfr() -> i32 {
    1
}

/// Static description of one coupled experiment. Intervals are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub exp_id: String,
    pub dt_cpl: u32,
    pub dt_nemo: u32,
    pub dt_ifs: u32,
    pub run_start_date: NaiveDateTime,
    pub run_end_date: NaiveDateTime,
    pub nem_input_file: PathBuf,
    pub ifs_input_file: PathBuf,
    pub oasis_rstas: PathBuf,
    pub oasis_rstos: PathBuf,
    #[serde(default)]
    pub with_ice: bool,
    #[serde(default)]
    pub ice_input_file: Option<PathBuf>,
    #[serde(default = "default_nstrtini")]
    pub ifs_nstrtini: u32,
    #[serde(default)]
    pub ifs_leocwa: bool,
    #[serde(default)]
    pub cpl_scheme: CouplingScheme,
    #[serde(default = "default_levels")]
    pub ifs_levels: u32,
    #[serde(default = "default_true")]
    pub ifs_legwwms: bool,
    #[serde(default = "default_true")]
    pub ifs_lecumf: bool,
    #[serde(default = "default_nradfr")]
    pub ifs_nradfr: i32,
}

impl Experiment {
    /// Checks settings that do not depend on the file system. With
    /// `check_paths`, every referenced input file must also exist.
    pub fn validate(&self, check_paths: bool) -> SwrResult<()> {
        if self.exp_id.is_empty() {
            return Err(SwrError::Config("Experiment id must not be empty".into()));
        }
        if self.dt_cpl == 0 || self.dt_nemo == 0 || self.dt_ifs == 0 {
            return Err(SwrError::Config("Time steps must be positive".into()));
        }
        if self.run_end_date <= self.run_start_date {
            return Err(SwrError::Config(format!(
                "Run end {} is not after run start {}",
                self.run_end_date, self.run_start_date
            )));
        }
        if !matches!(self.ifs_levels, 60 | 137) {
            return Err(SwrError::Config(format!(
                "{} levels are not supported",
                self.ifs_levels
            )));
        }
        if self.with_ice && self.ice_input_file.is_none() {
            return Err(SwrError::Config(
                "Experiments with ice need an ice input file".into(),
            ));
        }

        if check_paths {
            for path in self.input_files() {
                if !path.exists() {
                    return Err(SwrError::missing("experiment input file", path));
                }
            }
        }
        Ok(())
    }

    pub fn input_files(&self) -> Vec<&Path> {
        let mut paths = vec![
            self.ifs_input_file.as_path(),
            self.nem_input_file.as_path(),
            self.oasis_rstas.as_path(),
            self.oasis_rstos.as_path(),
        ];
        if self.with_ice {
            if let Some(ice) = &self.ice_input_file {
                paths.push(ice.as_path());
            }
        }
        paths
    }

    /// Directory name of an archived iterate.
    pub fn iterate_dir_name(&self, iteration: usize) -> String {
        format!("{}_{}", self.exp_id, iteration)
    }
}

/// Paths and model generation shared by every experiment on one system.
/// Built once and passed by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub model_variant: ModelVariant,
    pub output_dir: PathBuf,
}

impl Context {
    /// Creates `output_dir` if it does not exist yet.
    pub fn new(model_variant: ModelVariant, output_dir: impl Into<PathBuf>) -> SwrResult<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            model_variant,
            output_dir,
        })
    }

    /// Directory the model writes into while it runs.
    pub fn run_directory(&self, experiment: &Experiment) -> PathBuf {
        self.output_dir.join(&experiment.exp_id)
    }

    pub fn iterate_directory(&self, experiment: &Experiment, iteration: usize) -> PathBuf {
        self.output_dir.join(experiment.iterate_dir_name(iteration))
    }
}

/// Progress of a Schwarz run, owned and updated by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentState {
    pub iteration: usize,
    #[serde(default)]
    pub iterate_converged: Option<ConvergenceResult>,
    pub converged: bool,
}

impl Default for ExperimentState {
    fn default() -> Self {
        Self {
            iteration: 1,
            iterate_converged: None,
            converged: false,
        }
    }
}

impl ExperimentState {
    /// Stores a convergence check. Once converged the run stays converged.
    pub fn record(&mut self, result: ConvergenceResult) {
        self.iterate_converged = Some(result);
        if result.all() {
            self.converged = true;
        }
    }
}

/// Provenance document: the experiment plus its state after an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(flatten)]
    pub experiment: Experiment,
    #[serde(flatten)]
    pub state: ExperimentState,
}

pub fn persist_state(
    experiment: &Experiment,
    state: &ExperimentState,
    directory: &Path,
) -> SwrResult<PathBuf> {
    let document = PersistedState {
        experiment: experiment.clone(),
        state: *state,
    };
    let path = directory.join(STATE_FILE_NAME);
    fs::write(&path, serde_yaml::to_string(&document)?)?;
    Ok(path)
}

pub fn load_persisted_state(directory: &Path) -> SwrResult<PersistedState> {
    let path = directory.join(STATE_FILE_NAME);
    let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SwrError::missing("persisted experiment state", &path),
        _ => SwrError::Io(e),
    })?;
    Ok(serde_yaml::from_str(&text)?)
}

/// 1-based index of `simulation_start` in a forcing file that starts at
/// `forcing_start` with one record every `forcing_dt_hours`.
pub fn compute_nstrtini(
    simulation_start: NaiveDateTime,
    forcing_start: NaiveDateTime,
    forcing_dt_hours: u32,
) -> SwrResult<u32> {
    if forcing_dt_hours == 0 {
        return Err(SwrError::Config("Forcing interval must be positive".into()));
    }
    let delta = (simulation_start - forcing_start).num_seconds();
    if delta < 0 {
        return Err(SwrError::Config(
            "Start date is earlier than first value of forcing file!".into(),
        ));
    }
    let step = i64::from(forcing_dt_hours) * 3600;
    if delta % step != 0 {
        return Err(SwrError::Config(
            "Start date is not available in forcing file!".into(),
        ));
    }
    u32::try_from(delta / step + 1)
        .map_err(|_| SwrError::Config("Start date is too far into the forcing file".into()))
}
