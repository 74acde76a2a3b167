//! Termination criteria for Schwarz iterations.
//!
//! Two iterates are compared field by field. For each coupling variable the
//! difference between the current and the previous iterate is normed along
//! time and divided by the time norm of a reference iterate:
//!
//! ```text
//! e_rel = ‖current − previous‖_p / ‖reference‖_p
//! ```
//!
//! An iterate has converged under order `p` when `e_rel` is below the
//! relative tolerance for every variable and every remaining point. A point
//! whose difference is exactly zero always counts as converged, so identical
//! iterates converge even where the reference norm vanishes. Any other point
//! with a zero reference norm evaluates to `inf` or `NaN` and fails the test;
//! no special casing is applied.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{read_time_series, TimeSeries, DATASET_EXTENSION};
use crate::error::{SwrError, SwrResult};

/// Fields checked for convergence: everything the atmosphere sends followed
/// by everything the ocean sends.
pub const COUPLING_VARIABLES: [&str; 19] = [
    "A_TauX_oce",
    "A_TauY_oce",
    "A_TauX_ice",
    "A_TauY_ice",
    "A_Qs_mix",
    "A_Qns_mix",
    "A_Qs_ice",
    "A_Qns_ice",
    "A_Precip_liquid",
    "A_Precip_solid",
    "A_Evap_total",
    "A_Evap_ice",
    "A_dQns_dT",
    "O_SSTSST",
    "O_TepIce",
    "O_AlbIce",
    "OIceFrc",
    "OIceTck",
    "OSnwTck",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormOrder {
    Two,
    Infinity,
}

/// Norm of a time series. The infinity norm propagates `NaN`.
pub fn vector_norm(x: &DVector<f64>, ord: NormOrder) -> f64 {
    match ord {
        NormOrder::Two => x.norm(),
        NormOrder::Infinity => x.iter().fold(0.0_f64, |acc, v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.max(v.abs())
            }
        }),
    }
}

/// Pointwise convergence test on already normed quantities.
pub fn within_tolerance(normed_delta: f64, normed_reference: f64, tolerance: f64) -> bool {
    normed_delta == 0.0 || normed_delta / normed_reference < tolerance
}

/// Convergence test for a single time series.
pub fn relative_criterion(
    current: &DVector<f64>,
    previous: &DVector<f64>,
    reference: &DVector<f64>,
    tolerance: f64,
    ord: NormOrder,
) -> bool {
    let delta = current - previous;
    within_tolerance(vector_norm(&delta, ord), vector_norm(reference, ord), tolerance)
}

/// Outcome of one convergence check, one flag per norm order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    #[serde(rename = "2-norm")]
    pub two_norm: bool,
    #[serde(rename = "inf-norm")]
    pub inf_norm: bool,
}

impl ConvergenceResult {
    pub fn flag(&self, ord: NormOrder) -> bool {
        match ord {
            NormOrder::Two => self.two_norm,
            NormOrder::Infinity => self.inf_norm,
        }
    }

    /// Both orders agree that the iterate converged.
    pub fn all(&self) -> bool {
        self.two_norm && self.inf_norm
    }
}

/// Normalizes coupling files before comparison: the horizontal stencil the
/// coupling layer always writes is reduced to its first point and time is
/// made relative to the first sample, optionally anchored at `origin`.
#[derive(Debug, Clone, Default)]
pub struct CouplingPreprocessor {
    pub origin: Option<NaiveDateTime>,
    /// Extra shift in seconds applied together with `origin`.
    pub time_shift: f64,
}

impl CouplingPreprocessor {
    pub fn anchored(origin: NaiveDateTime, time_shift: f64) -> Self {
        Self {
            origin: Some(origin),
            time_shift,
        }
    }

    pub fn preprocess(&self, series: TimeSeries) -> SwrResult<TimeSeries> {
        if series.ny() == 0 || series.nx() == 0 {
            return Err(SwrError::Shape(format!(
                "'{}' has no horizontal point",
                series.name
            )));
        }
        let stripped = TimeSeries::from_fn(series.name.clone(), series.time().to_vec(), 1, 1, |t, _, _| {
            series.value(t, 0, 0)
        })
        .rebase_time();
        Ok(match self.origin {
            Some(origin) => {
                let anchor = origin.and_utc().timestamp() as f64 + self.time_shift;
                stripped.shift_time(-anchor)
            }
            None => stripped,
        })
    }
}

/// First file in `dir` matching `<variable>_*.nc`.
pub fn find_coupling_file(dir: &Path, variable: &str) -> SwrResult<PathBuf> {
    let pattern = format!(
        "{}/{}_*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(variable),
        DATASET_EXTENSION
    );
    glob::glob(&pattern)?
        .filter_map(Result::ok)
        .next()
        .ok_or_else(|| SwrError::missing(format!("coupling file for {variable}"), dir))
}

/// Preprocessed coupling fields of one iterate, in checker variable order.
#[derive(Debug, Clone)]
pub struct IterateFields {
    pub directory: PathBuf,
    pub fields: Vec<TimeSeries>,
}

/// Compares consecutive iterates against a reference iterate.
///
/// The reference is read from disk on the first check only and kept for the
/// lifetime of the checker; later calls ignore their reference directory.
#[derive(Debug)]
pub struct ConvergenceChecker {
    variables: Vec<String>,
    preprocessor: CouplingPreprocessor,
    reference_preprocessor: CouplingPreprocessor,
    reference: OnceCell<IterateFields>,
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceChecker {
    pub fn new() -> Self {
        Self::with_variables(COUPLING_VARIABLES.iter().map(|v| v.to_string()).collect())
    }

    pub fn with_variables(variables: Vec<String>) -> Self {
        Self {
            variables,
            preprocessor: CouplingPreprocessor::default(),
            reference_preprocessor: CouplingPreprocessor::default(),
            reference: OnceCell::new(),
        }
    }

    /// Anchors the reference time axis at an absolute start date.
    pub fn with_reference_origin(mut self, origin: NaiveDateTime) -> Self {
        self.reference_preprocessor = CouplingPreprocessor::anchored(origin, 0.0);
        self
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// The cached reference, if it has been loaded.
    pub fn reference(&self) -> Option<&IterateFields> {
        self.reference.get()
    }

    /// Loads the reference on first use and returns the cached copy after.
    pub fn load_reference(&self, reference_dir: &Path) -> SwrResult<&IterateFields> {
        if let Some(reference) = self.reference.get() {
            return Ok(reference);
        }
        let loaded = self.load_iterate(reference_dir, &self.reference_preprocessor)?;
        info!("Loaded convergence reference from {}", reference_dir.display());
        Ok(self.reference.get_or_init(|| loaded))
    }

    pub fn load_iterate(
        &self,
        dir: &Path,
        preprocessor: &CouplingPreprocessor,
    ) -> SwrResult<IterateFields> {
        let fields = self
            .variables
            .iter()
            .map(|variable| {
                let path = find_coupling_file(dir, variable)?;
                preprocessor.preprocess(read_time_series(&path)?)
            })
            .collect::<SwrResult<Vec<_>>>()?;
        Ok(IterateFields {
            directory: dir.to_path_buf(),
            fields,
        })
    }

    /// Returns the convergence flags for the 2-norm and the infinity norm.
    /// The flags are never combined here.
    pub fn check_convergence(
        &self,
        current_dir: &Path,
        previous_dir: &Path,
        reference_dir: &Path,
        relative_tolerance: f64,
    ) -> SwrResult<ConvergenceResult> {
        let reference = self.load_reference(reference_dir)?;
        let current = self.load_iterate(current_dir, &self.preprocessor)?;
        let previous = self.load_iterate(previous_dir, &self.preprocessor)?;

        let result = ConvergenceResult {
            two_norm: converged(&current, &previous, reference, relative_tolerance, NormOrder::Two)?,
            inf_norm: converged(&current, &previous, reference, relative_tolerance, NormOrder::Infinity)?,
        };
        info!(
            "Convergence of {} against {}: 2-norm {}, inf-norm {}",
            current_dir.display(),
            previous_dir.display(),
            result.two_norm,
            result.inf_norm
        );
        Ok(result)
    }
}

fn check_shapes(a: &TimeSeries, b: &TimeSeries) -> SwrResult<()> {
    if a.shape() != b.shape() {
        return Err(SwrError::Shape(format!(
            "'{}' has shape {:?} but '{}' has shape {:?}",
            a.name,
            a.shape(),
            b.name,
            b.shape()
        )));
    }
    Ok(())
}

/// "All" reduction over every variable and point of the iterates.
fn converged(
    current: &IterateFields,
    previous: &IterateFields,
    reference: &IterateFields,
    tolerance: f64,
    ord: NormOrder,
) -> SwrResult<bool> {
    let mut all_converged = true;
    for ((cur, prev), refr) in current
        .fields
        .iter()
        .zip(previous.fields.iter())
        .zip(reference.fields.iter())
    {
        check_shapes(cur, prev)?;
        if (cur.ny(), cur.nx()) != (refr.ny(), refr.nx()) {
            return Err(SwrError::Shape(format!(
                "reference '{}' is laid out on ({}, {}), iterate on ({}, {})",
                refr.name, refr.ny(), refr.nx(), cur.ny(), cur.nx()
            )));
        }
        for y in 0..cur.ny() {
            for x in 0..cur.nx() {
                let delta = cur.point_series(y, x) - prev.point_series(y, x);
                let normed_delta = vector_norm(&delta, ord);
                let normed_reference = vector_norm(&refr.point_series(y, x), ord);
                if !within_tolerance(normed_delta, normed_reference, tolerance) {
                    debug!(
                        "{} not converged under {:?}: {} vs reference {}",
                        cur.name, ord, normed_delta, normed_reference
                    );
                    all_converged = false;
                }
            }
        }
    }
    Ok(all_converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::write_time_series;
    use std::fs;

    fn assert_err_contains<T: std::fmt::Debug>(result: SwrResult<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn base_values() -> Vec<f64> {
        vec![0.3, 1.7, 2.2, 0.9, 1.1]
    }

    fn write_iterate(dir: &Path, variables: &[&str], values: &[f64]) {
        fs::create_dir_all(dir).expect("iterate dir");
        for variable in variables {
            let time: Vec<f64> = (0..values.len()).map(|i| 3600.0 * (i + 1) as f64).collect();
            let series = TimeSeries::from_fn(*variable, time, 3, 3, |t, y, x| {
                if y == 0 && x == 0 {
                    values[t]
                } else {
                    -999.0
                }
            });
            write_time_series(&dir.join(format!("{variable}_ATMIFS_01.nc")), &series)
                .expect("write iterate");
        }
    }

    fn checker_for(variables: &[&str]) -> ConvergenceChecker {
        ConvergenceChecker::with_variables(variables.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn vector_norm_matches_definitions() {
        let x = DVector::from_vec(vec![3.0, -4.0]);
        assert!((vector_norm(&x, NormOrder::Two) - 5.0).abs() < 1e-12);
        assert_eq!(vector_norm(&x, NormOrder::Infinity), 4.0);
        let with_nan = DVector::from_vec(vec![1.0, f64::NAN, 2.0]);
        assert!(vector_norm(&with_nan, NormOrder::Infinity).is_nan());
    }

    #[test]
    fn relative_criterion_threshold_is_strict() {
        let previous = DVector::from_vec(base_values());
        let tolerance = 1e-3;
        for ord in [NormOrder::Two, NormOrder::Infinity] {
            let below = previous.map(|v| v * (1.0 + 0.99e-3));
            let above = previous.map(|v| v * (1.0 + 1.01e-3));
            assert!(relative_criterion(&below, &previous, &previous, tolerance, ord));
            assert!(!relative_criterion(&above, &previous, &previous, tolerance, ord));
        }
    }

    #[test]
    fn zero_reference_norm_only_passes_identical_iterates() {
        let zero = DVector::from_vec(vec![0.0; 4]);
        let nonzero = DVector::from_vec(vec![0.0, 1e-12, 0.0, 0.0]);
        assert!(relative_criterion(&zero, &zero, &zero, 1e-3, NormOrder::Two));
        assert!(!relative_criterion(&nonzero, &zero, &zero, 1e-3, NormOrder::Two));
        assert!(!relative_criterion(&nonzero, &zero, &zero, 1e-3, NormOrder::Infinity));
    }

    #[test]
    fn identical_iterates_converge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let variables = ["A_Qs_mix", "O_SSTSST"];
        write_iterate(&dir.path().join("exp_1"), &variables, &base_values());
        write_iterate(&dir.path().join("exp_2"), &variables, &base_values());
        write_iterate(&dir.path().join("exp_3"), &variables, &base_values());

        let result = checker_for(&variables)
            .check_convergence(
                &dir.path().join("exp_3"),
                &dir.path().join("exp_2"),
                &dir.path().join("exp_1"),
                1e-12,
            )
            .expect("check");
        assert_eq!(result, ConvergenceResult { two_norm: true, inf_norm: true });
    }

    #[test]
    fn perturbation_around_tolerance_decides_verdict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let variables = ["A_Qs_mix", "O_SSTSST"];
        let previous = base_values();
        let close: Vec<f64> = previous.iter().map(|v| v * (1.0 + 0.99e-3)).collect();
        let far: Vec<f64> = previous.iter().map(|v| v * (1.0 + 1.01e-3)).collect();
        write_iterate(&dir.path().join("exp_1"), &variables, &previous);
        write_iterate(&dir.path().join("close"), &variables, &close);
        write_iterate(&dir.path().join("far"), &variables, &far);

        let checker = checker_for(&variables);
        let reference = dir.path().join("exp_1");
        let result = checker
            .check_convergence(&dir.path().join("close"), &reference, &reference, 1e-3)
            .expect("check");
        assert!(result.all());
        let result = checker
            .check_convergence(&dir.path().join("far"), &reference, &reference, 1e-3)
            .expect("check");
        assert!(!result.two_norm);
        assert!(!result.inf_norm);
    }

    #[test]
    fn one_diverging_variable_fails_the_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_iterate(&dir.path().join("exp_1"), &["A_Qs_mix", "O_SSTSST"], &base_values());
        write_iterate(&dir.path().join("exp_2"), &["A_Qs_mix", "O_SSTSST"], &base_values());
        let shifted: Vec<f64> = base_values().iter().map(|v| v + 1.0).collect();
        write_iterate(&dir.path().join("exp_3"), &["A_Qs_mix"], &base_values());
        write_iterate(&dir.path().join("exp_3"), &["O_SSTSST"], &shifted);

        let result = checker_for(&["A_Qs_mix", "O_SSTSST"])
            .check_convergence(
                &dir.path().join("exp_3"),
                &dir.path().join("exp_2"),
                &dir.path().join("exp_1"),
                1e-3,
            )
            .expect("check");
        assert!(!result.two_norm && !result.inf_norm);
    }

    #[test]
    fn reference_is_loaded_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let variables = ["A_Qs_mix"];
        write_iterate(&dir.path().join("exp_1"), &variables, &base_values());
        write_iterate(&dir.path().join("exp_2"), &variables, &base_values());
        let checker = checker_for(&variables);
        assert!(checker.reference().is_none());

        checker
            .check_convergence(
                &dir.path().join("exp_2"),
                &dir.path().join("exp_1"),
                &dir.path().join("exp_1"),
                1e-3,
            )
            .expect("first check");
        fs::remove_dir_all(dir.path().join("exp_1")).expect("remove reference");
        write_iterate(&dir.path().join("exp_3"), &variables, &base_values());

        checker
            .check_convergence(
                &dir.path().join("exp_3"),
                &dir.path().join("exp_2"),
                &dir.path().join("does_not_exist"),
                1e-3,
            )
            .expect("cached reference should be used");
        let reference = checker.reference().expect("reference cached");
        assert!(reference.directory.ends_with("exp_1"));
    }

    #[test]
    fn missing_coupling_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_iterate(&dir.path().join("exp_1"), &["A_Qs_mix"], &base_values());
        write_iterate(&dir.path().join("exp_2"), &["A_Qs_mix"], &base_values());
        let checker = checker_for(&["A_Qs_mix", "OIceTck"]);
        assert_err_contains(
            checker.check_convergence(
                &dir.path().join("exp_2"),
                &dir.path().join("exp_1"),
                &dir.path().join("exp_1"),
                1e-3,
            ),
            "coupling file for OIceTck",
        );
    }

    #[test]
    fn preprocess_strips_stencil_and_rebases_time() {
        let series = TimeSeries::from_fn("A_SST", vec![900.0, 1800.0], 3, 3, |t, y, x| {
            (t * 100 + y * 10 + x) as f64
        });
        let stripped = CouplingPreprocessor::default().preprocess(series.clone()).expect("strip");
        assert_eq!(stripped.shape(), (2, 1, 1));
        assert_eq!(stripped.time(), &[0.0, 900.0]);
        assert_eq!(stripped.values(), &[0.0, 100.0]);

        let origin = chrono::NaiveDate::from_ymd_opt(2014, 7, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("origin");
        let anchored = CouplingPreprocessor::anchored(origin, 0.0)
            .preprocess(series)
            .expect("anchor");
        assert_eq!(anchored.time()[0], origin.and_utc().timestamp() as f64);
    }

    #[test]
    fn mismatched_time_axes_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_iterate(&dir.path().join("exp_1"), &["A_Qs_mix"], &base_values());
        write_iterate(&dir.path().join("exp_2"), &["A_Qs_mix"], &base_values()[..3]);
        assert_err_contains(
            checker_for(&["A_Qs_mix"]).check_convergence(
                &dir.path().join("exp_2"),
                &dir.path().join("exp_1"),
                &dir.path().join("exp_1"),
                1e-3,
            ),
            "has shape (3, 1, 1) but 'A_Qs_mix' has shape (5, 1, 1)",
        );
    }
}
