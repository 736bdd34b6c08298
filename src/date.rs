use crate::error::EtlError;
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use time::{Duration, OffsetDateTime, UtcOffset};

/// One partition-hour, always read in UTC.
///
/// Fields are zero-padded strings ("2019", "03", "07", "00") because they are
/// embedded verbatim into object keys and SQL literals.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitionHour {
    pub year: String,
    pub month: String,
    pub day: String,
    pub hour: String,
}

impl PartitionHour {
    pub fn from_datetime(at: OffsetDateTime) -> Self {
        let utc = at.to_offset(UtcOffset::UTC);
        Self {
            year: format!("{:04}", utc.year()),
            month: format!("{:02}", u8::from(utc.month())),
            day: format!("{:02}", utc.day()),
            hour: format!("{:02}", utc.hour()),
        }
    }

    /// The hour containing `now + offset_hours`.
    pub fn shifted(now: OffsetDateTime, offset_hours: i64) -> Self {
        Self::from_datetime(now + Duration::hours(offset_hours))
    }

    /// `year=YYYY/month=MM/day=DD/hour=HH`
    pub fn hive_path(&self) -> String {
        format!("year={}/month={}/day={}/hour={}", self.year, self.month, self.day, self.hour)
    }

    /// `YYYY_MM_DD_HH`, used in transient table names.
    pub fn table_suffix(&self) -> String {
        format!("{}_{}_{}_{}", self.year, self.month, self.day, self.hour)
    }

    /// `(column, literal)` pairs in partition-key order.
    pub fn literals(&self) -> [(&'static str, &str); 4] {
        [
            ("year", self.year.as_str()),
            ("month", self.month.as_str()),
            ("day", self.day.as_str()),
            ("hour", self.hour.as_str()),
        ]
    }

    pub fn day(&self) -> PartitionDay {
        PartitionDay { year: self.year.clone(), month: self.month.clone(), day: self.day.clone() }
    }
}

impl fmt::Display for PartitionHour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.year, self.month, self.day, self.hour)
    }
}

/// A calendar day in UTC, the retention granularity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitionDay {
    pub year: String,
    pub month: String,
    pub day: String,
}

impl PartitionDay {
    /// Day that contains `now - days * 24h`. Works on the absolute instant, so month and
    /// year boundaries fall out of the calendar conversion.
    ///
    /// Negative spans and results outside the representable calendar are errors.
    pub fn days_before(now: OffsetDateTime, days: i64) -> Result<Self> {
        if days < 0 {
            return Err(EtlError::config(format!("retention must not be negative, got {days} days")).into());
        }
        let then = days
            .checked_mul(86_400)
            .and_then(|secs| now.checked_sub(Duration::seconds(secs)))
            .ok_or_else(|| EtlError::config(format!("retention of {days} days is out of range")))?;
        Ok(PartitionHour::from_datetime(then).day())
    }

    /// `/year=YYYY/month=MM/day=DD`, appended to a storage root.
    pub fn path_suffix(&self) -> String {
        format!("/year={}/month={}/day={}", self.year, self.month, self.day)
    }
}

impl fmt::Display for PartitionDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}
