//! Sample updates, immediate or batched.
//!
//! An [`Updater`] sends samples to one store either one at a time
//! ([`Updater::update`]) or as a batch accumulated with [`Updater::cache`]
//! and sent with [`Updater::flush`]. Both paths format identical sample
//! strings and go through the same engine call, so caching N samples and
//! flushing them is equivalent to N immediate updates.
//!
//! The engine enforces that timestamps strictly increase; the updater does
//! not reorder or deduplicate.

use std::ffi::CString;
use std::ptr;
use std::time::SystemTime;

use crate::engine::Engine;
use crate::error::Result;
use crate::gateway::{CArgs, Value, c_string, check, format_sample};

/// One pending sample: a timestamp and one value per data source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// When the values were observed.
    pub timestamp: SystemTime,
    /// Values in data-source declaration order.
    pub values: Vec<Value>,
}

impl Sample {
    /// Formats the sample as `timestamp:v1:v2:...`.
    pub fn to_arg(&self) -> String {
        format_sample(self.timestamp, &self.values)
    }
}

/// Appends samples to one store.
#[derive(Debug, Clone)]
pub struct Updater {
    filename: String,
    template: Option<String>,
    cache: Vec<Sample>,
}

impl Updater {
    /// Creates an updater for the store at `filename` with an empty batch.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            template: None,
            cache: Vec::new(),
        }
    }

    /// Names the data sources each sample covers, in value order.
    ///
    /// Without a template, samples must carry a value for every data source
    /// in declaration order.
    pub fn set_template<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = names
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(":");
        self.template = (!joined.is_empty()).then_some(joined);
        self
    }

    /// The store path.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The template sent with every update, if any.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Samples waiting for [`flush`](Self::flush), oldest first.
    pub fn pending(&self) -> &[Sample] {
        &self.cache
    }

    /// Sends one sample right away.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::Engine`](crate::RrdError::Engine) if the engine
    /// rejects the sample (for example, a timestamp not after the last
    /// update).
    pub fn update<E: Engine + ?Sized>(
        &self,
        engine: &E,
        timestamp: SystemTime,
        values: &[Value],
    ) -> Result<()> {
        self.send(engine, &[format_sample(timestamp, values)])
    }

    /// Adds a sample to the pending batch without touching the engine.
    pub fn cache(&mut self, timestamp: SystemTime, values: &[Value]) {
        self.cache.push(Sample {
            timestamp,
            values: values.to_vec(),
        });
    }

    /// Sends the whole pending batch in one engine call.
    ///
    /// An empty batch makes no call. On success the batch is cleared; on
    /// failure it is kept so the caller may retry or inspect it.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::Engine`](crate::RrdError::Engine) if the engine
    /// rejects any sample in the batch.
    pub fn flush<E: Engine + ?Sized>(&mut self, engine: &E) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let samples: Vec<String> = self.cache.iter().map(Sample::to_arg).collect();
        self.send(engine, &samples)?;
        self.cache.clear();
        Ok(())
    }

    fn send<E: Engine + ?Sized>(&self, engine: &E, samples: &[String]) -> Result<()> {
        let filename = c_string(&self.filename)?;
        let template: Option<CString> = self.template.as_deref().map(c_string).transpose()?;
        let mut args = CArgs::from_strs(samples)?;
        let (argc, argv) = args.argv()?;

        tracing::debug!(filename = %self.filename, samples = argc, "updating store");
        // SAFETY: `filename`, `template` and `args` outlive the call; `argv`
        // points to `argc` C strings.
        unsafe {
            let err = engine.update(
                filename.as_ptr(),
                template.as_ref().map_or(ptr::null(), |t| t.as_ptr()),
                argc,
                argv.cast_const().cast(),
            );
            check(err, engine.releaser())
        }
    }
}
