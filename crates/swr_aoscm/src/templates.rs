//! Rendering of the `config-run.xml` run configuration.
//!
//! Templates are Jinja documents. The experiment is available as
//! `setup_dict`, next to the installation fields `platform`, `model_dir`,
//! `output_dir`, `data_dir` and `ifs_version`. Undefined names are errors.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{json, Value};
use swr_core::{ConfigRenderer, Experiment};
use tracing::debug;

use crate::context::AoscmContext;

pub const CONFIG_RUN_FILE: &str = "config-run.xml";

/// Renders a Jinja `template` against `context`. Referencing an undefined
/// variable or attribute fails instead of rendering an empty string.
pub fn render_template<S: Serialize>(template: &str, context: S) -> Result<String> {
    let mut environment = Environment::new();
    environment.set_undefined_behavior(UndefinedBehavior::Strict);
    Ok(environment.render_str(template, context)?)
}

/// Writes `config-run.xml` into the runscript directory of an installation.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    context: AoscmContext,
}

impl TemplateRenderer {
    pub fn new(context: AoscmContext) -> Self {
        Self { context }
    }

    /// The experiment under `setup_dict` plus the installation fields.
    pub fn template_context(&self, experiment: &Experiment) -> Result<Value> {
        let path = |p: &Path| p.display().to_string();
        Ok(json!({
            "setup_dict": serde_json::to_value(experiment)?,
            "platform": self.context.platform,
            "model_dir": path(&self.context.model_dir),
            "output_dir": path(self.context.output_dir()),
            "data_dir": path(&self.context.data_dir),
            "ifs_version": self.context.ifs_version,
        }))
    }
}

impl ConfigRenderer for TemplateRenderer {
    fn render(&self, experiment: &Experiment) -> Result<PathBuf> {
        let template_path = &self.context.config_run_template;
        let template = fs::read_to_string(template_path)
            .with_context(|| format!("Failed to read {}", template_path.display()))?;
        let rendered = render_template(&template, self.template_context(experiment)?)
            .with_context(|| format!("Failed to render {}", template_path.display()))?;

        let target = self.context.runscript_dir.join(CONFIG_RUN_FILE);
        fs::write(&target, rendered)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        debug!("Rendered {} for {}", target.display(), experiment.exp_id);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::installation;
    use chrono::NaiveDate;

    fn experiment(exp_id: &str) -> Experiment {
        let start = NaiveDate::from_ymd_opt(2014, 7, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("date");
        serde_json::from_value(json!({
            "exp_id": exp_id,
            "dt_cpl": 3600,
            "dt_nemo": 900,
            "dt_ifs": 900,
            "run_start_date": start,
            "run_end_date": start + chrono::Duration::days(2),
            "nem_input_file": "nemo.nc",
            "ifs_input_file": "ifs.nc",
            "oasis_rstas": "rstas.nc",
            "oasis_rstos": "rstos.nc",
        }))
        .expect("experiment")
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn render_template_supports_jinja_syntax() {
        let context = json!({
            "setup_dict": {"exp_id": "SWR1", "with_ice": false, "dt_cpl": 900},
            "platform": "docker-gcc",
        });
        let rendered = render_template(
            "<exp>{{ setup_dict.exp_id | lower }}</exp>\
             {% if setup_dict.with_ice %}<ice/>{% else %}<noice/>{% endif %}\
             <cpl>{{ setup_dict.dt_cpl * 4 }}</cpl><p>{{ platform }}</p>",
            &context,
        )
        .expect("render");
        assert_eq!(rendered, "<exp>swr1</exp><noice/><cpl>3600</cpl><p>docker-gcc</p>");
    }

    #[test]
    fn render_template_rejects_undefined_names_and_bad_syntax() {
        let context = json!({"setup_dict": {"exp_id": "SWR1"}});
        assert_err_contains(render_template("{{ exp_name }}", &context), "undefined");
        assert_err_contains(render_template("{{ setup_dict.exp_name }}", &context), "undefined");
        assert!(render_template("{% if setup_dict.exp_id %}open", &context).is_err());
    }

    #[test]
    fn renderer_writes_config_run_into_runscript_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = AoscmContext::new(installation(dir.path(), 3)).expect("context");
        fs::write(
            &context.config_run_template,
            "<exp>{{ setup_dict.exp_id }}</exp><cpl>{{ setup_dict.dt_cpl }}</cpl>\
             <scheme>{{ setup_dict.cpl_scheme }}</scheme><p>{{ platform }}</p>\
             {% if setup_dict.with_ice %}<ice>{{ setup_dict.ice_input_file }}</ice>{% endif %}\
             <levels>{{ setup_dict.ifs_levels }}</levels>",
        )
        .expect("template");

        let renderer = TemplateRenderer::new(context.clone());
        let path = renderer.render(&experiment("SWR1")).expect("render");
        assert_eq!(path, context.runscript_dir.join(CONFIG_RUN_FILE));
        assert_eq!(
            fs::read_to_string(&path).expect("config"),
            "<exp>SWR1</exp><cpl>3600</cpl><scheme>0</scheme><p>docker-gcc</p><levels>60</levels>"
        );

        let values = renderer.template_context(&experiment("SWR1")).expect("context");
        assert_eq!(values["data_dir"], json!(context.data_dir.display().to_string()));
        assert_eq!(values["setup_dict"]["exp_id"], json!("SWR1"));
    }

    #[test]
    fn renderer_reports_unknown_variables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = AoscmContext::new(installation(dir.path(), 4)).expect("context");
        fs::write(&context.config_run_template, "{{ setup_dict.exp_name }}").expect("template");
        assert_err_contains(
            TemplateRenderer::new(context.clone()).render(&experiment("SWR2")),
            "Failed to render",
        );
        assert!(!context.runscript_dir.join(CONFIG_RUN_FILE).exists());
    }
}
