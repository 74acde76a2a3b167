//! Named time series datasets exchanged between the coupled components.
//!
//! Every coupling file holds exactly one variable sampled on a small
//! horizontal stencil of shape `(ny, nx)` at a sequence of times given in
//! seconds. Values are stored row-major as `[time][ny][nx]`.
//!
//! The on-disk encoding is the JSON form of [`TimeSeries`]. File names keep
//! the `.nc` suffix used by the model's coupling layer so that the directory
//! layout stays the same regardless of the encoding.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{SwrError, SwrResult};

/// File suffix of coupling datasets.
pub const DATASET_EXTENSION: &str = "nc";

/// Number of values a `(nt, ny, nx)` series holds, or a shape error when the
/// product does not fit in `usize`.
pub fn layout_len(nt: usize, ny: usize, nx: usize) -> SwrResult<usize> {
    nt.checked_mul(ny)
        .and_then(|n| n.checked_mul(nx))
        .ok_or_else(|| SwrError::Shape(format!("shape ({nt}, {ny}, {nx}) is too large")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimeSeriesRecord")]
pub struct TimeSeries {
    pub name: String,
    time: Vec<f64>,
    ny: usize,
    nx: usize,
    values: Vec<f64>,
}

/// Unvalidated on-disk form of a [`TimeSeries`].
#[derive(Debug, Deserialize)]
struct TimeSeriesRecord {
    name: String,
    time: Vec<f64>,
    ny: usize,
    nx: usize,
    values: Vec<f64>,
}

impl TryFrom<TimeSeriesRecord> for TimeSeries {
    type Error = SwrError;

    fn try_from(record: TimeSeriesRecord) -> Result<Self, Self::Error> {
        TimeSeries::new(record.name, record.time, record.ny, record.nx, record.values)
    }
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        time: Vec<f64>,
        ny: usize,
        nx: usize,
        values: Vec<f64>,
    ) -> SwrResult<Self> {
        let series = Self {
            name: name.into(),
            time,
            ny,
            nx,
            values,
        };
        series.check_layout()?;
        Ok(series)
    }

    /// Builds a series by evaluating `f(t, y, x)` for every sample. The shape
    /// must describe values that fit in memory.
    pub fn from_fn<F>(name: impl Into<String>, time: Vec<f64>, ny: usize, nx: usize, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let mut values = Vec::with_capacity(layout_len(time.len(), ny, nx).unwrap_or(0));
        for t in 0..time.len() {
            for y in 0..ny {
                for x in 0..nx {
                    values.push(f(t, y, x));
                }
            }
        }
        Self {
            name: name.into(),
            time,
            ny,
            nx,
            values,
        }
    }

    fn check_layout(&self) -> SwrResult<()> {
        let expected = layout_len(self.time.len(), self.ny, self.nx)?;
        if self.values.len() != expected {
            return Err(SwrError::Shape(format!(
                "'{}' has {} values, expected {} for shape ({}, {}, {})",
                self.name,
                self.values.len(),
                expected,
                self.time.len(),
                self.ny,
                self.nx
            )));
        }
        Ok(())
    }

    /// Sample times in seconds.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn len_time(&self) -> usize {
        self.time.len()
    }

    /// (time, ny, nx)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time.len(), self.ny, self.nx)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn value(&self, t: usize, y: usize, x: usize) -> f64 {
        self.values[(t * self.ny + y) * self.nx + x]
    }

    /// Time series at one horizontal point.
    pub fn point_series(&self, y: usize, x: usize) -> DVector<f64> {
        DVector::from_iterator(
            self.time.len(),
            (0..self.time.len()).map(|t| self.value(t, y, x)),
        )
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Drops the first `count` time samples.
    pub fn drop_leading(mut self, count: usize) -> Self {
        let count = count.min(self.time.len());
        self.time.drain(..count);
        self.values.drain(..count * self.ny * self.nx);
        self
    }

    /// Subtracts `offset` seconds from every time coordinate.
    pub fn shift_time(mut self, offset: f64) -> Self {
        for t in self.time.iter_mut() {
            *t -= offset;
        }
        self
    }

    /// Makes the time coordinate relative to the first sample.
    pub fn rebase_time(self) -> Self {
        match self.time.first().copied() {
            Some(start) => self.shift_time(start),
            None => self,
        }
    }
}

pub fn read_time_series(path: &Path) -> SwrResult<TimeSeries> {
    let file = fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SwrError::missing("coupling dataset", path),
        _ => SwrError::Io(e),
    })?;
    let record: TimeSeriesRecord = serde_json::from_reader(BufReader::new(file))?;
    TimeSeries::try_from(record)
}

pub fn write_time_series(path: &Path, series: &TimeSeries) -> SwrResult<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), series)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimeSeries {
        TimeSeries::from_fn("A_SST", vec![0.0, 900.0, 1800.0], 1, 2, |t, _y, x| {
            (10 * t + x) as f64
        })
    }

    #[test]
    fn new_rejects_inconsistent_layout() {
        let err = TimeSeries::new("v", vec![0.0, 1.0], 3, 3, vec![0.0; 5])
            .expect_err("layout should be rejected");
        assert!(format!("{err}").contains("expected 18"));
    }

    #[test]
    fn value_indexing_is_row_major() {
        let series = sample();
        assert_eq!(series.shape(), (3, 1, 2));
        assert_eq!(series.value(2, 0, 1), 21.0);
        assert_eq!(series.point_series(0, 1).as_slice(), &[1.0, 11.0, 21.0]);
    }

    #[test]
    fn drop_leading_removes_values_and_times() {
        let series = sample().drop_leading(1);
        assert_eq!(series.time(), &[900.0, 1800.0]);
        assert_eq!(series.value(0, 0, 0), 10.0);
        assert_eq!(series.values().len(), 4);
    }

    #[test]
    fn rebase_time_starts_at_zero() {
        let series = sample().shift_time(-600.0).rebase_time();
        assert_eq!(series.time(), &[0.0, 900.0, 1800.0]);
    }

    #[test]
    fn write_then_read_preserves_series() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("A_SST.nc");
        write_time_series(&path, &sample()).expect("write");
        let loaded = read_time_series(&path).expect("read");
        assert_eq!(loaded, sample());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_header_is_a_shape_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("O_SSTSST_oceanx_01.nc");
        fs::write(
            &path,
            r#"{"name":"O_SSTSST","time":[0.0],"ny":4294967296,"nx":4294967296,"values":[]}"#,
        )
        .expect("write header");
        let err = read_time_series(&path).expect_err("overflowing shape");
        assert!(matches!(err, SwrError::Shape(_)), "got {err}");
        assert!(format!("{err}").contains("too large"));
    }

    #[test]
    fn inconsistent_file_is_rejected_on_any_deserialization() {
        let text = r#"{"name":"A_SST","time":[0.0,1.0],"ny":1,"nx":1,"values":[1.0]}"#;
        let err = serde_json::from_str::<TimeSeries>(text).expect_err("layout");
        assert!(format!("{err}").contains("expected 2"));
    }

    #[test]
    fn read_missing_file_is_missing_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_time_series(&dir.path().join("absent.nc")).expect_err("missing file");
        assert!(matches!(err, SwrError::MissingInput { .. }));
    }
}
