//! # rrdgate
//!
//! Safe Rust bindings to the librrd round-robin database engine.
//!
//! rrdgate creates fixed-size round-robin stores, appends timestamped samples
//! to them, and reads historical series back, all through librrd. The engine
//! does the storage and the math; this crate owns the boundary: argument
//! marshaling, ownership of the buffers the engine hands back, and
//! serialization of the calls that are not safe to run concurrently.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Fetch and export results borrow the engine's value matrix without copying it
//! - Every engine allocation is released exactly once, checked by the type system
//! - Cached sample updates go to the engine in a single call
//! - Exports are serialized process-wide; everything else runs on the caller's thread
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "librrd")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::{Duration, SystemTime};
//! use rrdgate::{Arg, Creator, Exporter, Librrd, Updater, Value, fetch};
//!
//! let step = Duration::from_secs(1);
//! let start = SystemTime::now() - Duration::from_secs(60);
//!
//! // One counter and one gauge, averaged over 1s and 5s.
//! let mut c = Creator::new("/tmp/test.rrd", start, step);
//! c.ds("cnt", "COUNTER", [2, 0, 100]);
//! c.ds("g", "GAUGE", [2, 0, 60]);
//! c.rra("AVERAGE", [Arg::from(0.5), Arg::from(1), Arg::from(100)]);
//! c.rra("AVERAGE", [Arg::from(0.5), Arg::from(5), Arg::from(100)]);
//! c.create(&Librrd, true)?;
//!
//! // Batch samples, then send them in one call.
//! let mut u = Updater::new("/tmp/test.rrd");
//! for i in 1..=10u64 {
//!     u.cache(start + step * i as u32, &[Value::from(i), Value::from(1.5 * i as f64)]);
//! }
//! u.flush(&Librrd)?;
//!
//! // Read the series back.
//! let end = start + step * 10;
//! let res = fetch(&Librrd, "/tmp/test.rrd", "AVERAGE", start, end, step)?;
//! for row in 0..res.row_count() {
//!     println!("{:?}", res.row(row));
//! }
//! res.free_values();
//!
//! // Compute a sum of both sources.
//! let mut e = Exporter::new();
//! e.def("a", "/tmp/test.rrd", "cnt", "AVERAGE")
//!     .def("b", "/tmp/test.rrd", "g", "AVERAGE")
//!     .cdef("s", "a,b,+")
//!     .xport_def("s", "sum");
//! let out = e.xport(&Librrd, start, end, step)?;
//! println!("{:?}", out.legends());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "librrd"))]
//! # fn main() {}
//! ```
//!
//! ## Architecture
//!
//! - [`Creator`] — Builds a store file from data-source and archive declarations
//! - [`Updater`] — Immediate and cached sample updates
//! - [`fetch()`] / [`FetchResult`] — Matrix retrieval for one consolidation function
//! - [`Exporter`] / [`XportResult`] — Definition graph evaluation
//! - [`Engine`] — The raw engine call surface; [`Librrd`] with the `librrd` feature
//!
//! ## Modules
//!
//! - [`create`] — Store creation
//! - [`update`] — Sample updates and the update batch
//! - [`fetch`](mod@fetch) — Fetch and its result type
//! - [`xport`] — Export, its result type and the export lock
//! - [`schema`] — Typed declarations and JSON store definitions
//! - [`gateway`] — Argument marshaling and engine error conversion
//! - [`matrix`] — Ownership of engine-allocated value matrices
//! - [`engine`] — The engine trait and the librrd binding
//! - [`error`] — Error types

pub mod create;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod matrix;
pub mod schema;
pub mod update;
pub mod xport;

// Re-export primary API types at crate root for convenience.
pub use create::Creator;
#[cfg(feature = "librrd")]
pub use engine::Librrd;
pub use engine::Engine;
pub use error::{EngineError, Result, RrdError};
pub use fetch::{FetchResult, fetch};
pub use gateway::{Arg, Value};
pub use matrix::ForeignMatrix;
pub use schema::{Archive, ConsolidationFn, DataSource, StoreDefinition};
pub use update::{Sample, Updater};
pub use xport::{Exporter, XportResult};
