//! Export of computed series.
//!
//! An [`Exporter`] holds a small definition graph (`DEF`, `CDEF`, `XPORT`)
//! in the engine's graph language and evaluates it over a time range with
//! [`Exporter::xport`]. Each `XPORT` definition becomes one column of the
//! result.
//!
//! # Serialization
//!
//! The engine's export primitive keeps global state and is not reentrant.
//! Every call goes through one process-wide lock, held only while the engine
//! runs; argument building and result wrapping happen outside it.

use std::ffi::CStr;
use std::ptr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use libc::{c_char, c_int, c_ulong};

use crate::engine::Engine;
use crate::error::{Result, RrdError};
use crate::fetch::span_steps;
use crate::gateway::{
    Arg, CArgs, check, from_unix_seconds, join_args, take_strings, to_step, to_time_t, unix_seconds,
};
use crate::matrix::{ForeignAlloc, ForeignMatrix};

/// Serializes every export call in the process.
static XPORT_LOCK: Mutex<()> = Mutex::new(());

const XPORT: &CStr = c"xport";
const START: &CStr = c"-s";
const END: &CStr = c"-e";
const STEP: &CStr = c"--step";
const MAX_ROWS: &CStr = c"-m";
const DAEMON: &CStr = c"--daemon";

/// Builder for an export over one or more stores.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    defs: Vec<String>,
    max_rows: Option<u64>,
    daemon: Option<String>,
}

impl Exporter {
    /// Creates an exporter with no definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `DEF:vname=file:ds:cf`, reading one data source of a store.
    pub fn def(&mut self, vname: &str, file: &str, ds: &str, cf: &str) -> &mut Self {
        self.defs.push(format!("DEF:{vname}={file}:{ds}:{cf}"));
        self
    }

    /// Appends a `DEF` with trailing options such as `step=60` or
    /// `reduce=MAX`.
    pub fn def_with_options<I, A>(
        &mut self,
        vname: &str,
        file: &str,
        ds: &str,
        cf: &str,
        options: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let options = join_args(options);
        if options.is_empty() {
            return self.def(vname, file, ds, cf);
        }
        self.defs
            .push(format!("DEF:{vname}={file}:{ds}:{cf}:{options}"));
        self
    }

    /// Appends `CDEF:vname=rpn`, a series computed from other definitions.
    pub fn cdef(&mut self, vname: &str, rpn: &str) -> &mut Self {
        self.defs.push(format!("CDEF:{vname}={rpn}"));
        self
    }

    /// Appends `XPORT:vname:legend`, making `vname` an output column.
    ///
    /// An empty legend is left off.
    pub fn xport_def(&mut self, vname: &str, legend: &str) -> &mut Self {
        if legend.is_empty() {
            self.defs.push(format!("XPORT:{vname}"));
        } else {
            self.defs.push(format!("XPORT:{vname}:{legend}"));
        }
        self
    }

    /// Caps the number of rows the engine returns (`-m`). Zero removes the
    /// cap.
    pub fn set_max_rows(&mut self, rows: u64) -> &mut Self {
        self.max_rows = (rows != 0).then_some(rows);
        self
    }

    /// Routes reads through a caching daemon (`--daemon`). An empty address
    /// removes it.
    pub fn set_daemon(&mut self, address: &str) -> &mut Self {
        self.daemon = (!address.is_empty()).then(|| address.to_string());
        self
    }

    /// Definitions in the order they were appended.
    pub fn defs(&self) -> &[String] {
        &self.defs
    }

    /// Builds the engine command line for an export over `start..end`.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidArgument`] if a definition or the daemon
    /// address contains a NUL byte.
    pub fn command(&self, start: SystemTime, end: SystemTime, step: Duration) -> Result<CArgs> {
        let mut args = CArgs::new();
        args.push_static(XPORT);
        args.push_static(START);
        args.push(&unix_seconds(start).to_string())?;
        args.push_static(END);
        args.push(&unix_seconds(end).to_string())?;
        args.push_static(STEP);
        args.push(&step.as_secs().to_string())?;
        if let Some(rows) = self.max_rows {
            args.push_static(MAX_ROWS);
            args.push(&rows.to_string())?;
        }
        if let Some(daemon) = &self.daemon {
            args.push_static(DAEMON);
            args.push(daemon)?;
        }
        for def in &self.defs {
            args.push(def)?;
        }
        Ok(args)
    }

    /// Evaluates the definitions over `start..end` at `step` resolution.
    ///
    /// Blocks while another thread is exporting.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::Engine`] if the engine rejects the definitions or
    /// reports impossible bounds, and [`RrdError::InvalidArgument`] if a
    /// string contains a NUL byte.
    pub fn xport<E: Engine + ?Sized>(
        &self,
        engine: &E,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    ) -> Result<XportResult> {
        let mut args = self.command(start, end, step)?;
        let mut ret_start = to_time_t(start)?;
        let mut ret_end = to_time_t(end)?;
        let mut ret_step = to_step(step)?;
        let mut xsize: c_int = 0;
        let mut col_cnt: c_ulong = 0;
        let mut legends: *mut *mut c_char = ptr::null_mut();
        let mut data: *mut f64 = ptr::null_mut();
        let (argc, argv) = args.argv()?;
        let release = engine.releaser();

        tracing::debug!(argc, defs = self.defs.len(), "exporting");
        let err = {
            let _guard = XPORT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            // SAFETY: `args` owns every string `argv` points to and is not
            // touched until after the call; out-pointers refer to locals.
            // The lock is held for the whole call.
            unsafe {
                engine.xport(
                    argc,
                    argv,
                    &mut xsize,
                    &mut ret_start,
                    &mut ret_end,
                    &mut ret_step,
                    &mut col_cnt,
                    &mut legends,
                    &mut data,
                )
            }
        };
        // SAFETY: `err` is null or an engine-allocated message.
        unsafe { check(err, release) }?;

        // SAFETY: On success the engine hands over `data`.
        let alloc = unsafe { ForeignAlloc::new(data, release) };
        let columns = usize::try_from(col_cnt)
            .map_err(|_| RrdError::engine(format!("engine returned {col_cnt} columns")))?;
        // SAFETY: On success `legends` holds `col_cnt` engine-allocated strings.
        let legends = unsafe { take_strings(legends, columns, release) };
        let row_count =
            xport_row_count(i64::from(ret_start), i64::from(ret_end), u64::from(ret_step))?;
        // SAFETY: The engine allocates at least `row_count * col_cnt` doubles.
        let matrix = unsafe { alloc.into_matrix(row_count, columns) }?;

        Ok(XportResult {
            start: from_unix_seconds(ret_start),
            end: from_unix_seconds(ret_end),
            step: Duration::from_secs(u64::from(ret_step)),
            legends,
            row_count,
            matrix,
        })
    }
}

/// Rows of an export reply: `(end - start) / step`, the end excluded.
///
/// One less than [`fetch_row_count`](crate::fetch::fetch_row_count) for the
/// same bounds.
///
/// # Errors
///
/// Returns [`RrdError::Engine`] for a zero step or `end` before `start`.
pub fn xport_row_count(start: i64, end: i64, step: u64) -> Result<usize> {
    let steps = span_steps(start, end, step)?;
    usize::try_from(steps)
        .map_err(|_| RrdError::engine(format!("{steps} rows do not fit in memory")))
}

/// The values of one export.
///
/// Columns follow the `XPORT` definitions in order.
#[derive(Debug)]
pub struct XportResult {
    start: SystemTime,
    end: SystemTime,
    step: Duration,
    legends: Vec<String>,
    row_count: usize,
    matrix: ForeignMatrix,
}

impl XportResult {
    /// Timestamp of the first row, as reported by the engine.
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// End of the exported range, as reported by the engine.
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// Interval between rows, as reported by the engine.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Column legends.
    pub fn legends(&self) -> &[String] {
        &self.legends
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

    /// Value of column `column` at row `row`.
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

    /// Copies the matrix.
    pub fn values(&self) -> Vec<f64> {
        self.matrix.to_vec()
    }

    /// Releases the engine's matrix.
    pub fn free_values(self) {
        self.matrix.release();
    }
}
