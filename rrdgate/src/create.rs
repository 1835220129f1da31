//! Store creation.
//!
//! A [`Creator`] collects data-source and archive declarations and then
//! creates the store file in one engine call. It keeps no state after that:
//! the file on disk is the store.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "librrd")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::{Duration, SystemTime};
//! use rrdgate::{Arg, Creator, Librrd};
//!
//! let mut c = Creator::new("/tmp/test.rrd", SystemTime::now(), Duration::from_secs(1));
//! c.rra("AVERAGE", [Arg::from(0.5), Arg::from(1), Arg::from(100)]);
//! c.ds("cnt", "COUNTER", [2, 0, 100]);
//! c.create(&Librrd, true)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "librrd"))]
//! # fn main() {}
//! ```

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::engine::Engine;
use crate::error::{Result, RrdError};
use crate::gateway::{Arg, CArgs, c_string, check, join_args, to_step, to_time_t};
use crate::schema::{Archive, DataSource, StoreDefinition, ds_declaration, rra_declaration};

/// Builder for a new store file.
#[derive(Debug, Clone)]
pub struct Creator {
    filename: String,
    start: SystemTime,
    step: Duration,
    data_sources: Vec<String>,
    archives: Vec<String>,
}

impl Creator {
    /// Starts a store at `filename` whose first timestamp is `start` and whose
    /// base interval is `step`.
    pub fn new(filename: impl Into<String>, start: SystemTime, step: Duration) -> Self {
        Self {
            filename: filename.into(),
            start,
            step,
            data_sources: Vec::new(),
            archives: Vec::new(),
        }
    }

    /// Builds a creator from a store definition.
    ///
    /// A definition without a start time starts ten seconds before now.
    pub fn from_definition(def: &StoreDefinition) -> Self {
        let mut creator = Self::new(
            def.filename.clone(),
            def.start_time(SystemTime::now()),
            def.step,
        );
        for ds in &def.data_sources {
            creator.data_source(ds);
        }
        for rra in &def.archives {
            creator.archive(rra);
        }
        creator
    }

    /// Appends a `DS:name:type:args...` declaration.
    ///
    /// The shape of `args` depends on `ds_type`: heartbeat, min and max for
    /// sampled types, a single RPN expression for `COMPUTE`.
    ///
    /// ```rust
    /// use std::time::{Duration, SystemTime};
    /// use rrdgate::Creator;
    /// use rrdgate::gateway::{Arg, Value};
    ///
    /// let mut c = Creator::new("x.rrd", SystemTime::now(), Duration::from_secs(300));
    /// c.ds("regular_ds", "DERIVE", [Arg::from(900), Arg::from(0), Arg::Value(Value::Unknown)]);
    /// c.ds("computed_ds", "COMPUTE", ["regular_ds,8,*"]);
    /// assert_eq!(c.data_sources(), ["DS:regular_ds:DERIVE:900:0:U", "DS:computed_ds:COMPUTE:regular_ds,8,*"]);
    /// ```
    pub fn ds<I, A>(&mut self, name: &str, ds_type: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.data_sources
            .push(ds_declaration(name, ds_type, &join_args(args)));
        self
    }

    /// Appends an `RRA:cf:args...` declaration.
    ///
    /// The shape of `args` depends on `cf`: xff, steps and rows for the
    /// consolidating functions, rows, alpha, beta and period for `HWPREDICT`.
    /// Step and row counts are integers to the engine; pass them as integer
    /// [`Arg`]s, since floats are sent in scientific notation.
    ///
    /// ```rust
    /// use std::time::{Duration, SystemTime};
    /// use rrdgate::{Arg, Creator};
    ///
    /// let mut c = Creator::new("x.rrd", SystemTime::now(), Duration::from_secs(1));
    /// c.rra("AVERAGE", [Arg::from(0.5), Arg::from(5), Arg::from(100)]);
    /// assert_eq!(c.archives(), ["RRA:AVERAGE:5.0000000000e-1:5:100"]);
    /// ```
    pub fn rra<I, A>(&mut self, cf: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.archives.push(rra_declaration(cf, &join_args(args)));
        self
    }

    /// Appends a typed data-source declaration.
    pub fn data_source(&mut self, ds: &DataSource) -> &mut Self {
        self.data_sources.push(ds.declaration());
        self
    }

    /// Appends a typed archive declaration.
    pub fn archive(&mut self, rra: &Archive) -> &mut Self {
        self.archives.push(rra.declaration());
        self
    }

    /// The store path.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Data-source declarations, in index order.
    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    /// Archive declarations, in index order.
    pub fn archives(&self) -> &[String] {
        &self.archives
    }

    /// The positional arguments for the engine: data sources, then archives.
    pub fn args(&self) -> Vec<&str> {
        self.data_sources
            .iter()
            .chain(&self.archives)
            .map(String::as_str)
            .collect()
    }

    /// Creates the store file.
    ///
    /// With `overwrite` false, an existing file at the path is an error and
    /// the engine is not called. The path is claimed before the engine runs
    /// and given back if the call fails, so a failed create leaves nothing
    /// behind.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::Engine`] if the file exists and `overwrite` is
    /// false, if the path cannot be created, or if the engine rejects a
    /// declaration. Returns [`RrdError::InvalidArgument`] if a string
    /// contains a NUL byte.
    pub fn create<E: Engine + ?Sized>(&self, engine: &E, overwrite: bool) -> Result<()> {
        if overwrite {
            return self.create_file(engine);
        }

        claim_path(&self.filename)?;
        let result = self.create_file(engine);
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(&self.filename) {
                tracing::warn!(filename = %self.filename, error = %e, "failed to release claimed path");
            }
        }
        result
    }

    fn create_file<E: Engine + ?Sized>(&self, engine: &E) -> Result<()> {
        let filename = c_string(&self.filename)?;
        let step = to_step(self.step)?;
        let start = to_time_t(self.start)?;
        let mut args = CArgs::from_strs(self.args())?;
        let (argc, argv) = args.argv()?;

        tracing::debug!(filename = %self.filename, step, start, argc, "creating store");
        // SAFETY: `filename` and `args` own their C strings until the end of
        // this function; `argv` points to `argc` of them.
        unsafe {
            let err = engine.create(filename.as_ptr(), step, start, argc, argv.cast_const().cast());
            check(err, engine.releaser())
        }
    }
}

/// Creates `path` exclusively, failing if anything already exists there.
fn claim_path(path: &str) -> Result<()> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(Path::new(path))
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(RrdError::engine(format!("creating '{path}': file exists")))
        }
        Err(e) => Err(RrdError::engine(format!("creating '{path}': {e}"))),
    }
}
