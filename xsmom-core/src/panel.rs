//! Date × instrument panels and date-indexed series.
//!
//! A `Panel` is a dense row-major table of `f64` values. Rows are trading days
//! (strictly ascending, unique), columns are instruments (unique labels).
//! Unknown cells are `NaN` and are never coerced to zero by the panel itself.

use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

/// Structural errors raised when building a panel or series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PanelError {
    #[error("expected {expected} values for {rows}x{cols} panel, got {got}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    #[error("row {row} has {got} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("dates are not strictly ascending at row {row} ({date})")]
    UnsortedDates { row: usize, date: NaiveDate },

    #[error("duplicate date {0}")]
    DuplicateDate(NaiveDate),

    #[error("duplicate instrument '{0}'")]
    DuplicateInstrument(String),
}

/// Two-dimensional time-indexed table (dates × instruments).
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    instruments: Vec<String>,
    values: Vec<f64>,
}

impl Panel {
    /// Build a panel from row-major values.
    pub fn new(
        dates: Vec<NaiveDate>,
        instruments: Vec<String>,
        values: Vec<f64>,
    ) -> Result<Self, PanelError> {
        let expected = dates.len() * instruments.len();
        if values.len() != expected {
            return Err(PanelError::ShapeMismatch {
                rows: dates.len(),
                cols: instruments.len(),
                expected,
                got: values.len(),
            });
        }
        check_dates(&dates)?;
        check_instruments(&instruments)?;
        Ok(Self {
            dates,
            instruments,
            values,
        })
    }

    /// Build a panel from one `Vec` per date.
    pub fn from_rows(
        dates: Vec<NaiveDate>,
        instruments: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, PanelError> {
        let cols = instruments.len();
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(PanelError::RaggedRow {
                    row: i,
                    expected: cols,
                    got: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(dates, instruments, values)
    }

    /// Build a panel from rows in arbitrary date order, sorting them ascending.
    ///
    /// Duplicate dates are still rejected.
    pub fn from_unsorted(
        instruments: Vec<String>,
        mut rows: Vec<(NaiveDate, Vec<f64>)>,
    ) -> Result<Self, PanelError> {
        rows.sort_by_key(|(date, _)| *date);
        let (dates, rows): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        Self::from_rows(dates, instruments, rows)
    }

    /// A panel with the same axes as `other`, every cell set to `value`.
    pub fn filled_like(other: &Panel, value: f64) -> Self {
        Self {
            dates: other.dates.clone(),
            instruments: other.instruments.clone(),
            values: vec![value; other.values.len()],
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Row-major cell values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.dates.len()
    }

    pub fn ncols(&self) -> usize {
        self.instruments.len()
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.ncols() + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let cols = self.ncols();
        self.values[row * cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let cols = self.ncols();
        &self.values[row * cols..(row + 1) * cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let cols = self.ncols();
        &mut self.values[row * cols..(row + 1) * cols]
    }

    /// Iterate rows in date order.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks(0) panics, so a zero-column panel yields one empty row per date.
        let cols = self.ncols();
        (0..self.nrows()).map(move |r| &self.values[r * cols..(r + 1) * cols])
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.nrows()).map(|r| self.get(r, col)).collect()
    }

    pub fn column_index(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|i| i == instrument)
    }

    pub fn column_by_name(&self, instrument: &str) -> Option<Vec<f64>> {
        self.column_index(instrument).map(|c| self.column(c))
    }

    /// Apply `f` to every cell.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Panel {
        Self {
            dates: self.dates.clone(),
            instruments: self.instruments.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Apply a column transform. `f` receives the full column in date order and
    /// must return a column of the same length.
    pub fn map_columns(&self, f: impl Fn(&[f64]) -> Vec<f64>) -> Panel {
        let mut out = Panel::filled_like(self, f64::NAN);
        for c in 0..self.ncols() {
            let transformed = f(&self.column(c));
            debug_assert_eq!(transformed.len(), self.nrows());
            for (r, v) in transformed.into_iter().enumerate().take(self.nrows()) {
                out.set(r, c, v);
            }
        }
        out
    }

    /// Shift rows down by `k` (lagging every column). The first `k` rows become unknown.
    pub fn shift_rows(&self, k: usize) -> Panel {
        let mut out = Panel::filled_like(self, f64::NAN);
        for r in k..self.nrows() {
            out.row_mut(r).copy_from_slice(self.row(r - k));
        }
        out
    }

    /// Whether `other` has identical dates and instruments.
    pub fn same_axes(&self, other: &Panel) -> bool {
        self.dates == other.dates && self.instruments == other.instruments
    }

    /// Number of rows from the top in which every cell is unknown.
    pub fn leading_unknown_rows(&self) -> usize {
        self.rows()
            .take_while(|row| row.iter().all(|v| v.is_nan()))
            .count()
    }

    /// True when the panel carries no known value at all.
    pub fn is_all_unknown(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }

    /// Count of known (non-NaN) cells.
    pub fn known_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Date-indexed vector of scalars (portfolio PnL, turnover, exposure).
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl Series {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self, PanelError> {
        if dates.len() != values.len() {
            return Err(PanelError::ShapeMismatch {
                rows: dates.len(),
                cols: 1,
                expected: dates.len(),
                got: values.len(),
            });
        }
        check_dates(&dates)?;
        Ok(Self { dates, values })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }
}

fn check_dates(dates: &[NaiveDate]) -> Result<(), PanelError> {
    for (i, pair) in dates.windows(2).enumerate() {
        if pair[1] == pair[0] {
            return Err(PanelError::DuplicateDate(pair[1]));
        }
        if pair[1] < pair[0] {
            return Err(PanelError::UnsortedDates {
                row: i + 1,
                date: pair[1],
            });
        }
    }
    Ok(())
}

fn check_instruments(instruments: &[String]) -> Result<(), PanelError> {
    let mut seen = HashSet::with_capacity(instruments.len());
    for name in instruments {
        if !seen.insert(name.as_str()) {
            return Err(PanelError::DuplicateInstrument(name.clone()));
        }
    }
    Ok(())
}

/// Consecutive calendar days starting at 2024-01-02, for tests.
#[cfg(test)]
pub(crate) fn test_dates(n: usize) -> Vec<NaiveDate> {
    let base = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    (0..n)
        .map(|i| base + chrono::Duration::days(i as i64))
        .collect()
}

/// Build a panel from columns, for tests.
#[cfg(test)]
pub(crate) fn panel_from_columns(columns: &[(&str, Vec<f64>)]) -> Panel {
    let n = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
    let instruments = columns.iter().map(|(name, _)| name.to_string()).collect();
    let rows = (0..n)
        .map(|r| columns.iter().map(|(_, c)| c[r]).collect())
        .collect();
    Panel::from_rows(test_dates(n), instruments, rows).unwrap()
}
