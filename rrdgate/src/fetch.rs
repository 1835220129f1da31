//! Matrix retrieval for one consolidation function.
//!
//! [`fetch`] asks the engine for the values of every data source in a store
//! between two points in time. The engine snaps the bounds to the archive it
//! picks and reports the ones it actually used; the result carries those,
//! not the requested ones.
//!
//! The value matrix stays in the engine's allocation. The result owns it and
//! releases it on [`FetchResult::free_values`] or drop.

use std::ptr;
use std::time::{Duration, SystemTime};

use libc::{c_char, c_ulong, time_t};

use crate::engine::Engine;
use crate::error::{Result, RrdError};
use crate::gateway::{c_string, check, from_unix_seconds, take_strings, to_step, to_time_t};
use crate::matrix::{ForeignAlloc, ForeignMatrix};

/// The values of one fetch.
///
/// Rows are time steps from [`start`](Self::start) to [`end`](Self::end),
/// both included; columns are data sources in declaration order.
#[derive(Debug)]
pub struct FetchResult {
    filename: String,
    cf: String,
    start: SystemTime,
    end: SystemTime,
    step: Duration,
    ds_names: Vec<String>,
    row_count: usize,
    matrix: ForeignMatrix,
}

impl FetchResult {
    /// The store that was read.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The consolidation function that was read.
    pub fn cf(&self) -> &str {
        &self.cf
    }

    /// Timestamp of the first row, as reported by the engine.
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Timestamp of the last row, as reported by the engine.
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// Interval between rows, as reported by the engine.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Data-source names, one per column.
    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Timestamp of row `row`.
    pub fn time_at(&self, row: usize) -> Option<SystemTime> {
        let offset = self.step.checked_mul(u32::try_from(row).ok()?)?;
        (row < self.row_count).then(|| self.start + offset)
    }

    /// Value of data source `column` at row `row`; unknown readings are `NaN`.
    pub fn value_at(&self, column: usize, row: usize) -> Option<f64> {
        self.matrix.value_at(column, row)
    }

    /// Borrows one row.
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        self.matrix.row(row)
    }

    /// Borrows the whole row-major matrix.
    pub fn as_slice(&self) -> &[f64] {
        self.matrix.as_slice()
    }

    /// Copies the matrix. The copy is independent of the result.
    pub fn values(&self) -> Vec<f64> {
        self.matrix.to_vec()
    }

    /// Releases the engine's matrix.
    pub fn free_values(self) {
        self.matrix.release();
    }
}

/// Fetches the `cf` values of `filename` between `start` and `end`.
///
/// `cf` is a consolidation function name such as `AVERAGE`; see
/// [`ConsolidationFn`](crate::schema::ConsolidationFn).
///
/// # Errors
///
/// Returns [`RrdError::Engine`] if the engine fails (missing file, no archive
/// for `cf`) or reports impossible bounds, and
/// [`RrdError::InvalidArgument`] if `filename` or `cf` contains a NUL byte.
pub fn fetch<E: Engine + ?Sized>(
    engine: &E,
    filename: &str,
    cf: &str,
    start: SystemTime,
    end: SystemTime,
    step: Duration,
) -> Result<FetchResult> {
    let c_filename = c_string(filename)?;
    let c_cf = c_string(cf)?;
    let mut ret_start = to_time_t(start)?;
    let mut ret_end = to_time_t(end)?;
    let mut ret_step = to_step(step)?;
    let mut ds_cnt: c_ulong = 0;
    let mut names: *mut *mut c_char = ptr::null_mut();
    let mut data: *mut f64 = ptr::null_mut();

    tracing::debug!(filename, cf, start = ret_start, end = ret_end, step = ret_step, "fetching");
    let release = engine.releaser();
    // SAFETY: Both strings outlive the call and every out-pointer refers to a
    // local that is valid for writes.
    unsafe {
        let err = engine.fetch(
            c_filename.as_ptr(),
            c_cf.as_ptr(),
            &mut ret_start,
            &mut ret_end,
            &mut ret_step,
            &mut ds_cnt,
            &mut names,
            &mut data,
        );
        check(err, release)?;
    }

    // SAFETY: On success the engine hands over `data`, which nothing else
    // releases.
    let alloc = unsafe { ForeignAlloc::new(data, release) };
    let columns = usize::try_from(ds_cnt)
        .map_err(|_| RrdError::engine(format!("engine returned {ds_cnt} data sources")))?;
    // SAFETY: On success `names` holds `ds_cnt` engine-allocated strings.
    let ds_names = unsafe { take_strings(names, columns, release) };
    let row_count = fetch_row_count(i64::from(ret_start), i64::from(ret_end), u64::from(ret_step))?;
    // SAFETY: The engine allocates `row_count * ds_cnt` doubles.
    let matrix = unsafe { alloc.into_matrix(row_count, columns) }?;

    Ok(FetchResult {
        filename: filename.to_string(),
        cf: cf.to_string(),
        start: from_unix_seconds(ret_start),
        end: from_unix_seconds(ret_end),
        step: Duration::from_secs(u64::from(ret_step)),
        ds_names,
        row_count,
        matrix,
    })
}

/// Rows of a fetch reply: `(end - start) / step + 1`, both ends included.
///
/// # Errors
///
/// Returns [`RrdError::Engine`] for a zero step or `end` before `start`.
pub fn fetch_row_count(start: i64, end: i64, step: u64) -> Result<usize> {
    let steps = span_steps(start, end, step)?;
    usize::try_from(steps + 1)
        .map_err(|_| RrdError::engine(format!("{steps} rows do not fit in memory")))
}

/// Number of whole steps between `start` and `end`.
pub(crate) fn span_steps(start: i64, end: i64, step: u64) -> Result<u64> {
    if step == 0 {
        return Err(RrdError::engine("engine returned a zero step"));
    }
    let span = end
        .checked_sub(start)
        .and_then(|span| u64::try_from(span).ok())
        .ok_or_else(|| RrdError::engine(format!("engine returned end {end} before start {start}")))?;
    Ok(span / step)
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::engine::testing::{Call, FixedReply, ScriptedEngine};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_fetch_result_shape() {
        let engine = ScriptedEngine::with_names(&["cnt", "g"]);
        let result = fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(1_000), at(1_010), Duration::from_secs(1))
            .unwrap();

        assert_eq!(result.filename(), "/tmp/f.rrd");
        assert_eq!(result.cf(), "AVERAGE");
        assert_eq!(result.ds_names(), ["cnt", "g"]);
        assert_eq!(result.row_count(), 11);
        assert_eq!(result.as_slice().len(), 22);
        assert_eq!(result.value_at(1, 0), Some(1.0));
        assert_eq!(result.row(10), Some(&[20.0, 21.0][..]));
        assert_eq!(result.value_at(2, 0), None);
        assert_eq!(result.time_at(10), Some(at(1_010)));
        assert_eq!(result.time_at(11), None);

        assert_eq!(
            engine.calls(),
            vec![Call::Fetch {
                filename: "/tmp/f.rrd".to_string(),
                cf: "AVERAGE".to_string(),
                start: 1_000,
                end: 1_010,
                step: 1,
            }]
        );
    }

    #[test]
    fn test_fetch_reports_engine_bounds() {
        let engine = ScriptedEngine::with_names(&["g"]);
        let result =
            fetch(&engine, "/tmp/f.rrd", "MAX", at(1_003), at(1_012), Duration::from_secs(5)).unwrap();

        assert_eq!(result.start(), at(1_000));
        assert_eq!(result.end(), at(1_010));
        assert_eq!(result.step(), Duration::from_secs(5));
        assert_eq!(result.row_count(), 3);
    }

    #[test]
    fn test_names_released_and_matrix_owned_until_free() {
        let engine = ScriptedEngine::with_names(&["a", "b", "c"]);
        let result =
            fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(0), at(4), Duration::from_secs(1)).unwrap();
        let handed = engine.handed().unwrap();

        assert!(handed.names_released());
        assert!(handed.data_live());
        result.free_values();
        assert!(!handed.data_live());
    }

    #[test]
    fn test_drop_releases_matrix() {
        let engine = ScriptedEngine::with_names(&["a"]);
        let result =
            fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(0), at(4), Duration::from_secs(1)).unwrap();
        let handed = engine.handed().unwrap();
        drop(result);
        assert!(!handed.data_live());
    }

    #[test]
    fn test_values_is_an_independent_copy() {
        let engine = ScriptedEngine::with_names(&["a", "b"]);
        let result =
            fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(0), at(2), Duration::from_secs(1)).unwrap();

        let mut first = result.values();
        assert_eq!(first, result.values());
        first[0] = -1.0;
        assert_eq!(result.value_at(0, 0), Some(0.0));
        assert_eq!(result.values().len(), result.row_count() * result.ds_names().len());
    }

    #[test]
    fn test_engine_error_hands_nothing_out() {
        let engine = ScriptedEngine::with_names(&["a"]);
        engine.fail_next("opening '/tmp/missing.rrd': No such file or directory");

        let err = fetch(&engine, "/tmp/missing.rrd", "AVERAGE", at(0), at(4), Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("No such file"));
        assert!(engine.handed().is_none());
    }

    #[test]
    fn test_fixed_bounds_are_trusted_when_sane() {
        let engine = FixedReply::new(0, 10, 10, &["a", "b"]);
        let result =
            fetch(&engine, "/tmp/f.rrd", "LAST", at(3), at(7), Duration::from_secs(1)).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.step(), Duration::from_secs(10));
        assert_eq!(result.values(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_zero_step_reply_is_rejected_and_released() {
        let engine = FixedReply::new(0, 10, 0, &["a"]);
        let err = fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(0), at(10), Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("zero step"));

        let handed = engine.handed.lock().unwrap().unwrap();
        assert!(handed.names_released());
        assert!(!handed.data_live());
    }

    #[test]
    fn test_negative_span_reply_is_rejected_and_released() {
        let engine = FixedReply::new(20, 10, 1, &["a"]);
        let err = fetch(&engine, "/tmp/f.rrd", "AVERAGE", at(0), at(10), Duration::from_secs(1))
            .unwrap_err();
        assert!(err.as_engine().is_some());

        let handed = engine.handed.lock().unwrap().unwrap();
        assert!(!handed.data_live());
    }

    #[test]
    fn test_row_count_includes_both_ends() {
        assert_eq!(fetch_row_count(0, 0, 1).unwrap(), 1);
        assert_eq!(fetch_row_count(100, 200, 10).unwrap(), 11);
        assert_eq!(fetch_row_count(100, 205, 10).unwrap(), 11);
        assert!(fetch_row_count(0, 10, 0).is_err());
        assert!(fetch_row_count(10, 0, 1).is_err());
    }

    #[test]
    fn test_result_is_send_and_sync() {
        assert_send_sync::<FetchResult>();
    }
}
