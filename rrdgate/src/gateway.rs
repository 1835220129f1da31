//! Foreign call gateway: argument marshaling and buffer lifetimes.
//!
//! Everything that crosses the engine boundary goes through this module.
//! Native values are formatted into the engine's argument grammar, owned as
//! C strings for exactly one call, and released when the owning value drops,
//! on success and on every error path alike.
//!
//! # Formatting
//!
//! | Native value | Engine argument |
//! |--------------|-----------------|
//! | `f64` | scientific notation, 10 fractional digits (`1.5000000000e0`) |
//! | integers | decimal |
//! | [`SystemTime`] | Unix seconds |
//! | [`Duration`] | whole seconds |
//! | [`Value::Unknown`], `NaN` | `U` |

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_void};
use std::fmt;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libc::{c_char, c_int, c_ulong, time_t};
use serde::{Deserialize, Serialize};

use crate::engine::Release;
use crate::error::{EngineError, Result, RrdError};

/// The engine's token for an unknown sample value or unbounded limit.
pub const UNKNOWN: &str = "U";

/// One slot of a sample tuple.
///
/// The engine distinguishes "no reading" from zero, so unknown values are
/// a separate variant rather than a magic number. A `NaN` float is treated as
/// unknown too.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A signed integer reading.
    Int(i64),
    /// An unsigned integer reading (counters).
    Uint(u64),
    /// A floating point reading.
    Float(f64),
    /// No reading for this slot.
    Unknown,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_nan() => f.write_str(UNKNOWN),
            Self::Float(v) => write!(f, "{}", FloatArg(*v)),
            Self::Unknown => f.write_str(UNKNOWN),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from!(i64 => Int, i32 => Int, u64 => Uint, u32 => Uint, f64 => Float, f32 => Float);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Unknown, Into::into)
    }
}

/// A trailing argument of a declaration (`DS:...`, `RRA:...`, `DEF:...`).
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A number or the unknown token.
    Value(Value),
    /// Free text, passed through verbatim (RPN expressions, names).
    Text(String),
    /// A duration, sent as whole seconds.
    Seconds(Duration),
    /// A point in time, sent as Unix seconds.
    Time(SystemTime),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => fmt::Display::fmt(v, f),
            Self::Text(s) => f.write_str(s),
            Self::Seconds(d) => write!(f, "{}", d.as_secs()),
            Self::Time(t) => write!(f, "{}", unix_seconds(*t)),
        }
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Self::Value(v.into())
                }
            }
        )*
    };
}

arg_from_value!(Value, i64, i32, u64, u32, f64, f32);

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Duration> for Arg {
    fn from(d: Duration) -> Self {
        Self::Seconds(d)
    }
}

impl From<SystemTime> for Arg {
    fn from(t: SystemTime) -> Self {
        Self::Time(t)
    }
}

/// Formats a float the way the engine expects it.
struct FloatArg(f64);

impl fmt::Display for FloatArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.10e}", self.0)
    }
}

/// Formats a float argument (`1.5` becomes `1.5000000000e0`).
///
/// Ten fractional digits keep consolidation from drifting on values that do
/// not round-trip through shorter representations.
pub fn format_float(v: f64) -> String {
    FloatArg(v).to_string()
}

/// Joins declaration arguments with `:`.
pub fn join_args<I, A>(args: I) -> String
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    let mut out = String::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&arg.into().to_string());
    }
    out
}

/// Formats one sample as `timestamp:v1:v2:...`.
pub fn format_sample(timestamp: SystemTime, values: &[Value]) -> String {
    let mut out = unix_seconds(timestamp).to_string();
    for v in values {
        out.push(':');
        out.push_str(&v.to_string());
    }
    out
}

/// Converts a point in time to Unix seconds, negative before the epoch.
#[allow(clippy::cast_possible_wrap)] // u64 seconds beyond i64::MAX are not representable times
pub fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

/// Converts engine seconds back to a point in time.
pub(crate) fn from_unix_seconds(secs: time_t) -> SystemTime {
    let secs = i64::from(secs);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

pub(crate) fn to_time_t(t: SystemTime) -> Result<time_t> {
    time_t::try_from(unix_seconds(t))
        .map_err(|_| RrdError::engine(format!("timestamp {t:?} does not fit the engine's time_t")))
}

pub(crate) fn to_step(d: Duration) -> Result<c_ulong> {
    c_ulong::try_from(d.as_secs())
        .map_err(|_| RrdError::engine(format!("step {d:?} does not fit the engine's step type")))
}

/// Converts a native string into an owned C string for one call.
///
/// # Errors
///
/// Returns [`RrdError::InvalidArgument`] if `s` contains a NUL byte.
pub fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|source| RrdError::InvalidArgument {
        argument: s.to_string(),
        source,
    })
}

/// An owned argument vector.
///
/// Holds a mix of static flag names and per-call strings. The strings are
/// released together when the vector drops; the pointer array handed to the
/// engine is rebuilt from them on demand and may be permuted by the engine
/// without affecting ownership.
#[derive(Debug, Default)]
pub struct CArgs {
    strings: Vec<Cow<'static, CStr>>,
    pointers: Vec<*mut c_char>,
}

impl CArgs {
    /// Creates an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a static flag or command name.
    pub fn push_static(&mut self, s: &'static CStr) {
        self.strings.push(Cow::Borrowed(s));
    }

    /// Appends a per-call string.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidArgument`] if `s` contains a NUL byte.
    pub fn push(&mut self, s: &str) -> Result<()> {
        self.strings.push(Cow::Owned(c_string(s)?));
        Ok(())
    }

    /// Builds a vector from per-call strings.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::InvalidArgument`] if any string contains a NUL byte.
    pub fn from_strs<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = Self::new();
        for item in items {
            args.push(item.as_ref())?;
        }
        Ok(args)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the arguments as text, for logging and tests.
    pub fn to_strings(&self) -> Vec<String> {
        self.strings
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    /// Returns `(argc, argv)` with a null pointer after the last argument.
    ///
    /// The pointers stay valid until `self` is next mutated or dropped.
    pub(crate) fn argv(&mut self) -> Result<(c_int, *mut *mut c_char)> {
        let argc = c_int::try_from(self.strings.len())
            .map_err(|_| RrdError::engine("too many arguments for the engine"))?;
        self.pointers.clear();
        self.pointers
            .extend(self.strings.iter().map(|s| s.as_ptr().cast_mut()));
        self.pointers.push(ptr::null_mut());
        Ok((argc, self.pointers.as_mut_ptr()))
    }
}

/// Converts an engine error return into a native result.
///
/// A null pointer is success. Otherwise the message is copied out and the
/// engine's buffer released.
///
/// # Safety
///
/// `err` must be null or an unreleased, NUL-terminated engine allocation
/// that `release` frees.
pub(crate) unsafe fn check(err: *mut c_char, release: Release) -> Result<()> {
    if err.is_null() {
        return Ok(());
    }
    // SAFETY: Non-null error returns are valid C strings per the contract.
    let message = unsafe { CStr::from_ptr(err) }
        .to_string_lossy()
        .into_owned();
    // SAFETY: The message has been copied; the buffer is released once here.
    unsafe { release(err.cast::<c_void>()) };
    tracing::warn!(error = %message, "engine call failed");
    Err(EngineError::new(message).into())
}

/// Copies an engine-allocated array of strings and releases it.
///
/// Each element is copied and released, then the array itself.
///
/// # Safety
///
/// `array` must be null (only when `count` is zero) or an unreleased engine
/// allocation holding `count` unreleased, NUL-terminated strings.
pub(crate) unsafe fn take_strings(
    array: *mut *mut c_char,
    count: usize,
    release: Release,
) -> Vec<String> {
    if array.is_null() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        // SAFETY: `array` holds `count` elements.
        let elem = unsafe { *array.add(i) };
        if elem.is_null() {
            tracing::warn!(index = i, count, "engine returned a null string");
            out.push(String::new());
            continue;
        }
        // SAFETY: Elements are valid C strings per the contract.
        out.push(unsafe { CStr::from_ptr(elem) }.to_string_lossy().into_owned());
        // SAFETY: Copied above; each element is released exactly once.
        unsafe { release(elem.cast::<c_void>()) };
    }
    // SAFETY: All elements are released; the array is released once.
    unsafe { release(array.cast::<c_void>()) };
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.5), "1.5000000000e0");
        assert_eq!(format_float(0.0), "0.0000000000e0");
        assert_eq!(format_float(-1234.5), "-1.2345000000e3");
        assert_eq!(format_float(0.3), "3.0000000000e-1");
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(Value::from(7).to_string(), "7");
        assert_eq!(Value::from(7u64).to_string(), "7");
        assert_eq!(Value::from(-3i64).to_string(), "-3");
        assert_eq!(Value::Unknown.to_string(), "U");
        assert_eq!(Value::Float(f64::NAN).to_string(), "U");
        assert_eq!(Value::from(None::<f64>).to_string(), "U");
        assert_eq!(Value::from(Some(2.0)).to_string(), "2.0000000000e0");
    }

    #[test]
    fn test_sample_formatting() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let sample = format_sample(t, &[Value::from(3), Value::from(4.5), Value::Unknown]);
        assert_eq!(sample, "1700000000:3:4.5000000000e0:U");

        assert_eq!(format_sample(t, &[]), "1700000000");
    }

    #[test]
    fn test_join_args_mixed() {
        let joined = join_args([
            Arg::from(Duration::from_secs(900)),
            Arg::from(0),
            Arg::Value(Value::Unknown),
            Arg::from("regular_ds,8,*"),
        ]);
        assert_eq!(joined, "900:0:U:regular_ds,8,*");
        assert_eq!(join_args(Vec::<Arg>::new()), "");
    }

    #[test]
    fn test_unix_seconds_round_trip() {
        let t = UNIX_EPOCH + Duration::from_secs(42);
        assert_eq!(unix_seconds(t), 42);
        assert_eq!(from_unix_seconds(42), t);

        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(unix_seconds(before), -10);
        assert_eq!(from_unix_seconds(-10), before);
    }

    #[test]
    fn test_cargs_argv_is_null_terminated() {
        let mut args = CArgs::new();
        args.push_static(c"xport");
        args.push("-s").unwrap();
        args.push("100").unwrap();
        assert_eq!(args.len(), 3);

        let (argc, argv) = args.argv().unwrap();
        assert_eq!(argc, 3);
        // SAFETY: `argv` holds argc strings plus a terminating null.
        unsafe {
            assert_eq!(CStr::from_ptr(*argv).to_str().unwrap(), "xport");
            assert_eq!(CStr::from_ptr(*argv.add(2)).to_str().unwrap(), "100");
            assert!((*argv.add(3)).is_null());
        }
    }

    #[test]
    fn test_cargs_rejects_interior_nul() {
        let err = CArgs::from_strs(["ok", "bad\0arg"]).unwrap_err();
        assert!(matches!(err, RrdError::InvalidArgument { ref argument, .. } if argument == "bad\0arg"));
    }

    #[test]
    fn test_check_null_is_success() {
        // SAFETY: Null is always accepted.
        assert!(unsafe { check(ptr::null_mut(), crate::engine::release_with_free) }.is_ok());
    }

    #[test]
    fn test_check_copies_and_releases_message() {
        // SAFETY: strdup returns a fresh C allocation released by `check`.
        let err = unsafe { libc::strdup(c"illegal attempt to update".as_ptr()) };
        // SAFETY: `err` is a fresh C allocation.
        let result = unsafe { check(err, crate::engine::release_with_free) };
        let err = result.unwrap_err();
        assert_eq!(
            err.as_engine().map(EngineError::message),
            Some("illegal attempt to update")
        );
    }

    #[test]
    fn test_take_strings_keeps_position_of_null_entry() {
        // SAFETY: A fresh two-slot array; the first slot gets a strdup'd
        // string and the second stays null. `take_strings` releases both
        // the string and the array.
        let names = unsafe {
            let array = libc::malloc(2 * std::mem::size_of::<*mut c_char>()).cast::<*mut c_char>();
            assert!(!array.is_null());
            *array = libc::strdup(c"cnt".as_ptr());
            *array.add(1) = ptr::null_mut();
            take_strings(array, 2, crate::engine::release_with_free)
        };
        assert_eq!(names, ["cnt", ""]);
    }

    #[test]
    fn test_take_strings_null_array() {
        // SAFETY: A null array is returned as empty without releasing.
        let names = unsafe { take_strings(ptr::null_mut(), 3, crate::engine::release_with_free) };
        assert!(names.is_empty());
    }
}
