//! Staging of boundary data for the next Schwarz iteration.
//!
//! The coupling layer writes every exchanged field as it was *sent*. To replay
//! an iteration, each field has to be renamed to what the receiver expects,
//! reshaped to the receiver's stencil, trimmed according to the coupling
//! scheme and moved onto the receiver's clock.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coupling::{CouplingMap, CouplingScheme, ModelVariant, Side};
use crate::dataset::{read_time_series, write_time_series, TimeSeries, DATASET_EXTENSION};
use crate::error::{SwrError, SwrResult};
use crate::traits::{finalize_if_active, MessagePassing};

/// Column picked from the ocean stencil when it is laid out as one row of
/// nine points.
pub const OCEAN_CENTER_COLUMN: usize = 4;

/// Stencil the ocean expects atmosphere data on.
pub const OCEAN_STENCIL: (usize, usize) = (3, 3);

/// Result of sampling an ocean field for the atmosphere.
#[derive(Debug, Clone, PartialEq)]
pub enum StencilSample {
    /// Every row at [`OCEAN_CENTER_COLUMN`].
    Primary(TimeSeries),
    /// The stencil has no center column; point (0, 0) only.
    Fallback(TimeSeries),
}

impl StencilSample {
    pub fn is_fallback(&self) -> bool {
        matches!(self, StencilSample::Fallback(_))
    }

    pub fn into_series(self) -> TimeSeries {
        match self {
            StencilSample::Primary(series) | StencilSample::Fallback(series) => series,
        }
    }
}

/// Samples an ocean field for the atmosphere. The center-column extraction is
/// tried first; only when that column does not exist is the single point
/// (0, 0) used.
pub fn extract_ocean_sample(series: &TimeSeries) -> SwrResult<StencilSample> {
    let (_, ny, nx) = series.shape();
    if ny == 0 || nx == 0 {
        return Err(SwrError::Shape(format!(
            "'{}' has an empty stencil ({ny}, {nx})",
            series.name
        )));
    }
    if OCEAN_CENTER_COLUMN < nx {
        let sample = TimeSeries::from_fn(series.name.clone(), series.time().to_vec(), ny, 1, |t, y, _| {
            series.value(t, y, OCEAN_CENTER_COLUMN)
        });
        return Ok(StencilSample::Primary(sample));
    }
    let sample = TimeSeries::from_fn(series.name.clone(), series.time().to_vec(), 1, 1, |t, _, _| {
        series.value(t, 0, 0)
    });
    Ok(StencilSample::Fallback(sample))
}

/// Replicates point (0, 0) of an atmosphere field onto a `(ny, nx)` stencil.
pub fn broadcast_atmosphere_sample(series: &TimeSeries, stencil: (usize, usize)) -> SwrResult<TimeSeries> {
    if series.ny() == 0 || series.nx() == 0 {
        return Err(SwrError::Shape(format!(
            "'{}' has an empty stencil ({}, {})",
            series.name, series.ny(), series.nx()
        )));
    }
    let (ny, nx) = stencil;
    Ok(TimeSeries::from_fn(series.name.clone(), series.time().to_vec(), ny, nx, |t, _, _| {
        series.value(t, 0, 0)
    }))
}

/// Files written and skipped by one remapping pass.
#[derive(Debug, Clone, Default)]
pub struct RemapReport {
    pub written: Vec<PathBuf>,
    /// Coupling files whose variable has no counterpart on the receiving side.
    pub skipped: Vec<PathBuf>,
    /// Ocean fields that went through the single-point fallback.
    pub fallbacks: usize,
}

/// Converts the coupling output of one iteration into the boundary input of
/// the next.
#[derive(Clone)]
pub struct Remapper {
    pub coupling_scheme: CouplingScheme,
    /// Coupling interval in seconds.
    pub dt_cpl: u32,
    pub dt_atm: u32,
    pub dt_oce: u32,
    pub model_variant: ModelVariant,
    pub coupling_map: CouplingMap,
    pub ocean_stencil: (usize, usize),
    message_passing: Option<Arc<dyn MessagePassing>>,
}

impl std::fmt::Debug for Remapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remapper")
            .field("coupling_scheme", &self.coupling_scheme)
            .field("dt_cpl", &self.dt_cpl)
            .field("dt_atm", &self.dt_atm)
            .field("dt_oce", &self.dt_oce)
            .field("model_variant", &self.model_variant)
            .field("ocean_stencil", &self.ocean_stencil)
            .field("message_passing", &self.message_passing.is_some())
            .finish()
    }
}

impl Remapper {
    pub fn new(
        coupling_scheme: CouplingScheme,
        dt_cpl: u32,
        dt_atm: u32,
        dt_oce: u32,
        model_variant: ModelVariant,
    ) -> Self {
        Self {
            coupling_scheme,
            dt_cpl,
            dt_atm,
            dt_oce,
            model_variant,
            coupling_map: CouplingMap::aoscm(),
            ocean_stencil: OCEAN_STENCIL,
            message_passing: None,
        }
    }

    pub fn with_coupling_map(mut self, coupling_map: CouplingMap) -> Self {
        self.coupling_map = coupling_map;
        self
    }

    /// Runtime to finalize once a remapping pass is complete.
    pub fn with_message_passing(mut self, runtime: Arc<dyn MessagePassing>) -> Self {
        self.message_passing = Some(runtime);
        self
    }

    fn sender_interval(&self, sender: Side) -> u32 {
        match sender {
            Side::Atmosphere => self.dt_atm,
            Side::Ocean => self.dt_oce,
        }
    }

    /// Seconds subtracted from the sender's time axis.
    pub fn time_offset(&self, sender: Side) -> f64 {
        (i64::from(self.dt_cpl) - i64::from(self.sender_interval(sender))) as f64
    }

    /// Sending side and variable name encoded in a raw output file name.
    pub fn classify<'a>(&self, stem: &'a str) -> Vec<(Side, &'a str)> {
        [Side::Atmosphere, Side::Ocean]
            .into_iter()
            .filter_map(|side| {
                let separator = self.model_variant.separator(side);
                stem.find(separator).map(|idx| (side, &stem[..idx]))
            })
            .collect()
    }

    /// Remaps every coupling file in `source` into `destination`.
    ///
    /// Files are processed in name order. If two sender variables map to the
    /// same receiver variable, the later file wins and a warning is logged.
    pub fn remap(&self, source: &Path, destination: &Path) -> SwrResult<RemapReport> {
        if !source.is_dir() {
            return Err(SwrError::missing("iterate output directory", source));
        }
        let mut inputs: Vec<PathBuf> = fs::read_dir(source)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == DATASET_EXTENSION))
            .collect();
        inputs.sort();

        let mut report = RemapReport::default();
        let mut targets = HashSet::new();
        for path in inputs {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            for (sender, variable) in self.classify(stem) {
                match self.coupling_map.receiver_name(sender, variable) {
                    Some(receiver_name) => {
                        let receiver_name = receiver_name.to_string();
                        if !targets.insert(receiver_name.clone()) {
                            warn!(
                                "{} overwrites previously remapped {}",
                                path.display(),
                                receiver_name
                            );
                        }
                        let (written, fallback) =
                            self.remap_file(&path, sender, &receiver_name, destination)?;
                        if fallback {
                            report.fallbacks += 1;
                        }
                        report.written.push(written);
                    }
                    None => {
                        debug!("{} is not a coupling variable, skipping", variable);
                        report.skipped.push(path.clone());
                    }
                }
            }
        }

        if let Some(runtime) = &self.message_passing {
            finalize_if_active(runtime.as_ref());
        }

        info!(
            "Remapped {} coupling fields from {} into {}",
            report.written.len(),
            source.display(),
            destination.display()
        );
        Ok(report)
    }

    fn remap_file(
        &self,
        path: &Path,
        sender: Side,
        receiver_name: &str,
        destination: &Path,
    ) -> SwrResult<(PathBuf, bool)> {
        let series = read_time_series(path)?;
        let (reshaped, fallback) = match sender {
            Side::Atmosphere => (broadcast_atmosphere_sample(&series, self.ocean_stencil)?, false),
            Side::Ocean => {
                let sample = extract_ocean_sample(&series)?;
                let fallback = sample.is_fallback();
                (sample.into_series(), fallback)
            }
        };

        let mut remapped = reshaped.renamed(receiver_name);
        if self.coupling_scheme.trims_leading_sample(sender) {
            remapped = remapped.drop_leading(1);
        }
        let remapped = remapped.shift_time(self.time_offset(sender));

        let target = destination.join(format!("{receiver_name}.{DATASET_EXTENSION}"));
        write_time_series(&target, &remapped)?;
        Ok((target, fallback))
    }
}

/// One-shot remapping with the default coupling map.
pub fn remap(
    source: &Path,
    destination: &Path,
    coupling_scheme: CouplingScheme,
    dt_cpl: u32,
    dt_atm: u32,
    dt_oce: u32,
    model_variant: ModelVariant,
) -> SwrResult<RemapReport> {
    Remapper::new(coupling_scheme, dt_cpl, dt_atm, dt_oce, model_variant).remap(source, destination)
}
