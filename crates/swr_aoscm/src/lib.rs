/// The `swr_aoscm` crate connects the Schwarz controller of `swr_core` to an
/// EC-Earth atmosphere-ocean single column model installation.
///
/// - **Context**: validated installation paths and run scripts.
/// - **Runner**: runs `ec-conf` and the model scripts as child processes.
/// - **Templates**: renders `config-run.xml` from an experiment.
pub mod context;
pub mod runner;
pub mod templates;

pub use context::{AoscmContext, AoscmSettings};
pub use runner::Aoscm;
pub use templates::{render_template, TemplateRenderer};
