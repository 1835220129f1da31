//! Typed store declarations.
//!
//! The engine takes data-source and archive declarations as positional
//! strings (`DS:...`, `RRA:...`). The types here produce those strings from
//! typed values, and [`StoreDefinition`] lets a whole store be described in a
//! JSON configuration file.
//!
//! Nothing here validates declarations: the engine is authoritative on its
//! grammar, and malformed combinations surface as engine errors when the
//! store is created.

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RrdError};
use crate::gateway::{Arg, Value, join_args};

/// How long before "now" a store starts when a definition gives no start.
const DEFAULT_START_OFFSET: Duration = Duration::from_secs(10);

/// Aggregation rule applied when collapsing samples into an archive row.
///
/// # Examples
///
/// ```rust
/// use rrdgate::schema::ConsolidationFn;
///
/// assert_eq!(ConsolidationFn::Average.as_str(), "AVERAGE");
/// assert_eq!("LAST".parse::<ConsolidationFn>(), Ok(ConsolidationFn::Last));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Arithmetic mean.
    Average,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Most recent value.
    Last,
}

impl ConsolidationFn {
    /// The engine's name for this function.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsolidationFn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            other => Err(format!("unknown consolidation function '{other}'")),
        }
    }
}

/// A data source fed by samples, with a heartbeat and optional bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledSource {
    /// Data source name.
    pub name: String,
    /// Longest gap between samples before the value becomes unknown.
    #[serde(with = "duration_serde")]
    pub heartbeat: Duration,
    /// Lower bound; `None` leaves it unbounded.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound; `None` leaves it unbounded.
    #[serde(default)]
    pub max: Option<f64>,
}

impl SampledSource {
    /// Creates a source with no bounds.
    pub fn new(name: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            name: name.into(),
            heartbeat,
            min: None,
            max: None,
        }
    }

    /// Sets the bounds.
    #[must_use]
    pub fn bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    fn args(&self) -> [Arg; 3] {
        [
            Arg::Seconds(self.heartbeat),
            Value::from(self.min).into(),
            Value::from(self.max).into(),
        ]
    }
}

/// A data source computed from other sources by an RPN expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedSource {
    /// Data source name.
    pub name: String,
    /// RPN expression over other data sources.
    pub rpn: String,
}

/// A data-source declaration.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use rrdgate::schema::{ComputedSource, DataSource, SampledSource};
///
/// let regular = DataSource::Derive(
///     SampledSource::new("regular_ds", Duration::from_secs(900)).bounds(Some(0.0), None),
/// );
/// assert_eq!(regular.declaration(), "DS:regular_ds:DERIVE:900:0.0000000000e0:U");
///
/// let computed = DataSource::Compute(ComputedSource {
///     name: "computed_ds".to_string(),
///     rpn: "regular_ds,8,*".to_string(),
/// });
/// assert_eq!(computed.declaration(), "DS:computed_ds:COMPUTE:regular_ds,8,*");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum DataSource {
    /// Stores the value as given.
    Gauge(SampledSource),
    /// A monotonically increasing counter; stores the rate.
    Counter(SampledSource),
    /// Like a counter but may decrease; stores the rate.
    Derive(SampledSource),
    /// A counter reset on every read; stores the rate.
    Absolute(SampledSource),
    /// Computed from other sources.
    Compute(ComputedSource),
}

impl DataSource {
    /// The data source name.
    pub fn name(&self) -> &str {
        match self {
            Self::Gauge(s) | Self::Counter(s) | Self::Derive(s) | Self::Absolute(s) => &s.name,
            Self::Compute(c) => &c.name,
        }
    }

    /// The engine's name for the source type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Gauge(_) => "GAUGE",
            Self::Counter(_) => "COUNTER",
            Self::Derive(_) => "DERIVE",
            Self::Absolute(_) => "ABSOLUTE",
            Self::Compute(_) => "COMPUTE",
        }
    }

    /// Formats the `DS:` declaration string.
    pub fn declaration(&self) -> String {
        let args = match self {
            Self::Gauge(s) | Self::Counter(s) | Self::Derive(s) | Self::Absolute(s) => {
                join_args(s.args())
            }
            Self::Compute(c) => c.rpn.clone(),
        };
        ds_declaration(self.name(), self.type_name(), &args)
    }
}

/// A consolidated archive: `steps` primary points per row, `rows` rows kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRobinArchive {
    /// Fraction of unknown primary points tolerated per row.
    pub xff: f64,
    /// Primary data points consolidated into one row.
    pub steps: u64,
    /// Number of rows kept.
    pub rows: u64,
}

/// Holt-Winters forecasting parameters for aberrant behavior detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoltWinters {
    /// Number of rows kept.
    pub rows: u64,
    /// Intercept adaptation parameter.
    pub alpha: f64,
    /// Slope adaptation parameter.
    pub beta: f64,
    /// Primary data points per seasonal period.
    pub period: u64,
    /// Index of an existing archive to pair with, if any.
    #[serde(default)]
    pub rra_num: Option<u64>,
}

/// An archive (RRA) declaration.
///
/// # Examples
///
/// ```rust
/// use rrdgate::schema::{Archive, HoltWinters, RoundRobinArchive};
///
/// let avg = Archive::Average(RoundRobinArchive { xff: 0.3, steps: 5, rows: 1200 });
/// assert_eq!(avg.declaration(), "RRA:AVERAGE:3.0000000000e-1:5:1200");
///
/// let hw = Archive::Hwpredict(HoltWinters {
///     rows: 1200,
///     alpha: 0.4,
///     beta: 0.5,
///     period: 288,
///     rra_num: None,
/// });
/// assert_eq!(hw.declaration(), "RRA:HWPREDICT:1200:4.0000000000e-1:5.0000000000e-1:288");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cf", rename_all = "UPPERCASE")]
pub enum Archive {
    /// Averages primary points.
    Average(RoundRobinArchive),
    /// Keeps the minimum.
    Min(RoundRobinArchive),
    /// Keeps the maximum.
    Max(RoundRobinArchive),
    /// Keeps the most recent.
    Last(RoundRobinArchive),
    /// Holt-Winters prediction.
    Hwpredict(HoltWinters),
    /// Holt-Winters prediction with multiplicative seasonality.
    Mhwpredict(HoltWinters),
}

impl Archive {
    /// The engine's name for the archive function.
    pub fn cf_name(&self) -> &'static str {
        match self {
            Self::Average(_) => "AVERAGE",
            Self::Min(_) => "MIN",
            Self::Max(_) => "MAX",
            Self::Last(_) => "LAST",
            Self::Hwpredict(_) => "HWPREDICT",
            Self::Mhwpredict(_) => "MHWPREDICT",
        }
    }

    /// Formats the `RRA:` declaration string.
    pub fn declaration(&self) -> String {
        let args = match self {
            Self::Average(a) | Self::Min(a) | Self::Max(a) | Self::Last(a) => {
                join_args([Arg::from(a.xff), a.steps.into(), a.rows.into()])
            }
            Self::Hwpredict(hw) | Self::Mhwpredict(hw) => {
                let mut args = vec![
                    Arg::from(hw.rows),
                    hw.alpha.into(),
                    hw.beta.into(),
                    hw.period.into(),
                ];
                if let Some(rra_num) = hw.rra_num {
                    args.push(rra_num.into());
                }
                join_args(args)
            }
        };
        rra_declaration(self.cf_name(), &args)
    }
}

/// Formats `DS:name:type:args`.
pub(crate) fn ds_declaration(name: &str, ds_type: &str, args: &str) -> String {
    format!("DS:{name}:{ds_type}:{args}")
}

/// Formats `RRA:cf:args`.
pub(crate) fn rra_declaration(cf: &str, args: &str) -> String {
    format!("RRA:{cf}:{args}")
}

/// A complete store description, loadable from JSON.
///
/// Durations are given in seconds and `start` in Unix seconds; a missing
/// `start` means ten seconds before the store is created.
///
/// # Example
///
/// ```rust
/// use rrdgate::schema::StoreDefinition;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let def = StoreDefinition::from_json_str(r#"{
///     "filename": "/var/lib/metrics/load.rrd",
///     "step": 60,
///     "data_sources": [
///         { "type": "GAUGE", "name": "load", "heartbeat": 120, "min": 0.0 }
///     ],
///     "archives": [
///         { "cf": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 1440 }
///     ]
/// }"#)?;
/// assert_eq!(def.data_sources[0].name(), "load");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDefinition {
    /// Path of the store file.
    pub filename: String,
    /// Base interval between primary data points.
    #[serde(with = "duration_serde")]
    pub step: Duration,
    /// First timestamp of the store, in Unix seconds.
    #[serde(default)]
    pub start: Option<i64>,
    /// Data sources, in index order.
    pub data_sources: Vec<DataSource>,
    /// Archives, in index order.
    pub archives: Vec<Archive>,
}

impl StoreDefinition {
    /// Parses a definition from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::DefinitionParse`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a definition from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::DefinitionRead`] if the file cannot be read, or
    /// [`RrdError::DefinitionParse`] if it is malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| RrdError::DefinitionRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&data)
    }

    /// Serializes the definition as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RrdError::DefinitionParse`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The start time, resolving a missing start against `now`.
    pub fn start_time(&self, now: SystemTime) -> SystemTime {
        match self.start {
            Some(secs) if secs >= 0 => UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs()),
            Some(secs) => UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()),
            None => now
                .checked_sub(DEFAULT_START_OFFSET)
                .unwrap_or(UNIX_EPOCH),
        }
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as whole seconds, the engine's resolution.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
