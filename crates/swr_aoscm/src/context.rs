//! System paths of an EC-Earth AOSCM installation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use swr_core::{Context, ModelVariant};

pub const SUPPORTED_IFS_VERSIONS: [&str; 2] = ["43r3v1.ref", "40r1v1.1.ref"];

fn default_ifs_version() -> String {
    SUPPORTED_IFS_VERSIONS[0].to_string()
}

/// User-facing description of an installation, e.g. read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoscmSettings {
    pub model_version: u8,
    pub platform: String,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template_dir: PathBuf,
    pub data_dir: PathBuf,
    #[serde(default = "default_ifs_version")]
    pub ifs_version: String,
}

impl AoscmSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid AOSCM settings")
    }
}

/// Validated installation paths. Shared by every experiment on one system.
#[derive(Debug, Clone)]
pub struct AoscmContext {
    pub core: Context,
    pub platform: String,
    pub model_dir: PathBuf,
    pub template_dir: PathBuf,
    pub data_dir: PathBuf,
    pub ifs_version: String,
    pub ecconf_executable: PathBuf,
    pub runscript_dir: PathBuf,
    pub config_run_template: PathBuf,
    pub ascm_executable: PathBuf,
    pub oscm_executable: PathBuf,
    pub aoscm_executable: PathBuf,
    pub aoscm_schwarz_correction_executable: PathBuf,
}

impl AoscmContext {
    pub fn new(settings: AoscmSettings) -> Result<Self> {
        let variant = ModelVariant::try_from(settings.model_version)?;
        if !SUPPORTED_IFS_VERSIONS.contains(&settings.ifs_version.as_str()) {
            bail!("Unsupported IFS version {}", settings.ifs_version);
        }

        let config_run_template = match variant {
            ModelVariant::Ece3 => settings.template_dir.join("config-run.xml.j2"),
            ModelVariant::Ece4 => settings.template_dir.join("config-run_ece4.xml.j2"),
        };
        let ecconf_executable = settings.model_dir.join("sources/util/ec-conf/ec-conf");
        let runscript_dir = settings.model_dir.join("runtime/scm-classic/PAPA");
        let prefix = variant.script_prefix();
        let script = |name: &str| runscript_dir.join(format!("{prefix}-scm_{name}.sh"));

        for path in [
            settings.model_dir.as_path(),
            settings.data_dir.as_path(),
            runscript_dir.as_path(),
            config_run_template.as_path(),
            ecconf_executable.as_path(),
        ] {
            ensure_exists(path)?;
        }

        let core = Context::new(variant, settings.output_dir)?;
        Ok(Self {
            core,
            platform: settings.platform,
            ascm_executable: script("oifs"),
            oscm_executable: script("nemo"),
            aoscm_executable: script("oifs+nemo"),
            aoscm_schwarz_correction_executable: script("oifs+nemo_schwarz_corr"),
            model_dir: settings.model_dir,
            template_dir: settings.template_dir,
            data_dir: settings.data_dir,
            ifs_version: settings.ifs_version,
            ecconf_executable,
            runscript_dir,
            config_run_template,
        })
    }

    pub fn model_variant(&self) -> ModelVariant {
        self.core.model_variant
    }

    pub fn output_dir(&self) -> &Path {
        &self.core.output_dir
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }
    Ok(())
}
