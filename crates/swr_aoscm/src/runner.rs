//! Process wrapper around the AOSCM run scripts.
//!
//! Every run first calls `ec-conf` to turn `config-run.xml` into the run
//! scripts, then executes the requested script inside the runscript
//! directory. Both steps block until the process exits.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{bail, Context as _, Result};
use swr_core::ModelRunner;
use tracing::info;

use crate::context::AoscmContext;

pub struct Aoscm {
    context: AoscmContext,
    /// Log the wall clock summary lines the run scripts print.
    pub print_time: bool,
}

impl Aoscm {
    pub fn new(context: AoscmContext) -> Self {
        Self {
            context,
            print_time: false,
        }
    }

    pub fn context(&self) -> &AoscmContext {
        &self.context
    }

    fn run_ecconf(&self) -> Result<()> {
        let output = Command::new(&self.context.ecconf_executable)
            .args(["-p", self.context.platform.as_str(), "config-run.xml"])
            .current_dir(&self.context.runscript_dir)
            .output()
            .with_context(|| {
                format!("Failed to start {}", self.context.ecconf_executable.display())
            })?;
        check_status(&self.context.ecconf_executable, &output)
    }

    /// Runs the coupled model, using the correction script for Schwarz
    /// iterations after the first.
    pub fn run_coupled_model(&self, schwarz_correction: bool) -> Result<()> {
        self.run_ecconf()?;
        let executable = if schwarz_correction {
            &self.context.aoscm_schwarz_correction_executable
        } else {
            &self.context.aoscm_executable
        };
        self.run_model(executable)
    }

    pub fn run_atmosphere_only(&self) -> Result<()> {
        self.run_ecconf()?;
        self.run_model(&self.context.ascm_executable)
    }

    pub fn run_ocean_only(&self) -> Result<()> {
        self.run_ecconf()?;
        self.run_model(&self.context.oscm_executable)
    }

    fn run_model(&self, executable: &Path) -> Result<()> {
        info!("Running model {}", executable.display());
        let output = Command::new(executable)
            .current_dir(&self.context.runscript_dir)
            .output()
            .with_context(|| format!("Failed to start {}", executable.display()))?;
        check_status(executable, &output)?;
        info!("Model run complete.");

        if self.print_time {
            for line in finished_legs(&String::from_utf8_lossy(&output.stdout)) {
                info!("{}", line);
            }
        }
        Ok(())
    }
}

impl ModelRunner for Aoscm {
    fn run_coupled_model(&mut self, schwarz_correction: bool) -> Result<()> {
        Aoscm::run_coupled_model(self, schwarz_correction)
    }
}

fn check_status(executable: &Path, output: &Output) -> Result<()> {
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            executable.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Wall clock lines printed at the end of each leg.
pub fn finished_legs(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .filter(|line| line.contains("Finished leg"))
        .collect()
}
