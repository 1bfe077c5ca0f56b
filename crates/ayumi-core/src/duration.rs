//! Human-readable duration expressions such as `"10 second"` or `"2 minutes"`.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Parses `"<number> <unit>"` into whole milliseconds.
///
/// Units: `second`, `seconds`, `minute`, `minutes`, `hour`, `hours`
/// (case-insensitive). The quantity may carry a decimal part; the result is
/// rounded to the nearest millisecond.
///
/// # Errors
///
/// Returns [`WorkflowError::Configuration`] for an empty expression, a
/// non-numeric or negative quantity, an unknown unit, or a value too large
/// to represent.
///
/// # Examples
///
/// ```
/// use ayumi_core::parse_duration_ms;
///
/// assert_eq!(parse_duration_ms("10 second").unwrap(), 10_000);
/// assert_eq!(parse_duration_ms("1 minute").unwrap(), 60_000);
/// assert_eq!(parse_duration_ms("1.5 hours").unwrap(), 5_400_000);
/// assert!(parse_duration_ms("ten seconds").is_err());
/// assert!(parse_duration_ms("5 fortnights").is_err());
/// ```
pub fn parse_duration_ms(expr: &str) -> Result<u64, WorkflowError> {
    let invalid = |why: &str| WorkflowError::Configuration(format!("duration '{expr}': {why}"));

    let mut parts = expr.split_whitespace();
    let (quantity, unit) = match (parts.next(), parts.next(), parts.next()) {
        (Some(quantity), Some(unit), None) => (quantity, unit),
        _ => return Err(invalid("expected '<number> <unit>'")),
    };

    if quantity.starts_with('-') {
        return Err(invalid("quantity must not be negative"));
    }
    let well_formed = quantity.chars().any(|c| c.is_ascii_digit())
        && quantity.chars().all(|c| c.is_ascii_digit() || c == '.')
        && quantity.matches('.').count() <= 1;
    if !well_formed {
        return Err(invalid("quantity is not a number"));
    }
    let value: f64 = quantity
        .parse()
        .map_err(|_| invalid("quantity is not a number"))?;

    let per_unit = match unit.to_ascii_lowercase().as_str() {
        "second" | "seconds" => MS_PER_SECOND,
        "minute" | "minutes" => MS_PER_MINUTE,
        "hour" | "hours" => MS_PER_HOUR,
        _ => return Err(invalid("unknown unit")),
    };

    let millis = (value * per_unit as f64).round();
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        return Err(invalid("value out of range"));
    }
    Ok(millis as u64)
}

/// A duration validated at construction time.
///
/// Parse it once from an expression (`"10 second".parse()`) or build it from
/// a [`Duration`]. Serialises as a canonical expression string, and
/// deserialising an invalid string fails immediately.
///
/// # Examples
///
/// ```
/// use ayumi_core::StepDuration;
/// use std::time::Duration;
///
/// let d: StepDuration = "2 minutes".parse()?;
/// assert_eq!(d.as_duration(), Duration::from_secs(120));
/// assert_eq!(d.to_string(), "2 minutes");
/// # Ok::<(), ayumi_core::WorkflowError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepDuration(Duration);

impl StepDuration {
    /// Zero-length duration.
    pub const ZERO: StepDuration = StepDuration(Duration::ZERO);

    /// Creates a duration from whole milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Creates a duration from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Returns the underlying [`Duration`].
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Returns the duration in whole milliseconds, saturating at `u64::MAX`.
    pub fn as_millis(&self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }
}

impl FromStr for StepDuration {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration_ms(s).map(Self::from_millis)
    }
}

impl TryFrom<&str> for StepDuration {
    type Error = WorkflowError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for StepDuration {
    type Error = WorkflowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Duration> for StepDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<StepDuration> for Duration {
    fn from(d: StepDuration) -> Self {
        d.0
    }
}

impl From<StepDuration> for String {
    fn from(d: StepDuration) -> Self {
        d.to_string()
    }
}

impl fmt::Display for StepDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.as_millis();
        let plural = |n: u64| if n == 1 { "" } else { "s" };

        if ms > 0 && ms % MS_PER_HOUR == 0 {
            let n = ms / MS_PER_HOUR;
            write!(f, "{n} hour{}", plural(n))
        } else if ms > 0 && ms % MS_PER_MINUTE == 0 {
            let n = ms / MS_PER_MINUTE;
            write!(f, "{n} minute{}", plural(n))
        } else if ms % MS_PER_SECOND == 0 {
            let n = ms / MS_PER_SECOND;
            write!(f, "{n} second{}", plural(n))
        } else {
            let fraction = format!("{:03}", ms % MS_PER_SECOND);
            write!(
                f,
                "{}.{} seconds",
                ms / MS_PER_SECOND,
                fraction.trim_end_matches('0')
            )
        }
    }
}
