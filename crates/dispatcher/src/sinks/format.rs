//! Record formatting shared by the sinks

use std::io::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};

use contracts::{ContractError, RecordData};

/// Time zone used to render timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneSpec {
    #[default]
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl TimeZoneSpec {
    /// Parse `utc`, `local` or a `+HH:MM` / `-HH:MM` offset
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("utc") || value == "Z" {
            return Ok(Self::Utc);
        }
        if value.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }

        let invalid = || format!("invalid timezone '{value}', expected utc, local or +HH:MM");
        let (sign, rest) = match value.as_bytes().first() {
            Some(b'+') => (1, &value[1..]),
            Some(b'-') => (-1, &value[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(invalid)
    }
}

/// Renders record timestamps
///
/// Without a pattern the output is RFC 3339 at second resolution, e.g.
/// `2023-11-14T22:13:20Z`.
#[derive(Debug, Clone, Default)]
pub struct TimestampFormat {
    pattern: Option<String>,
    tz: TimeZoneSpec,
}

impl TimestampFormat {
    /// RFC 3339 in UTC
    pub fn rfc3339() -> Self {
        Self::default()
    }

    /// Build a formatter, rejecting strftime patterns chrono cannot render
    pub fn new(pattern: Option<&str>, tz: TimeZoneSpec) -> Result<Self, String> {
        let pattern = pattern.filter(|p| !p.is_empty());
        if let Some(p) = pattern {
            if StrftimeItems::new(p).any(|item| matches!(item, Item::Error)) {
                return Err(format!("invalid time_format '{p}'"));
            }
        }
        Ok(Self {
            pattern: pattern.map(str::to_string),
            tz,
        })
    }

    /// Append the rendered `timestamp` (seconds since epoch) to `out`
    pub fn write_to(&self, out: &mut Vec<u8>, timestamp: u64) -> std::io::Result<()> {
        let utc = to_datetime(timestamp)?;
        match self.tz {
            TimeZoneSpec::Utc => self.render(out, utc),
            TimeZoneSpec::Local => self.render(out, utc.with_timezone(&Local)),
            TimeZoneSpec::Fixed(offset) => self.render(out, utc.with_timezone(&offset)),
        }
    }

    /// Rendered `timestamp` as a string
    pub fn format(&self, timestamp: u64) -> std::io::Result<String> {
        let mut out = Vec::with_capacity(32);
        self.write_to(&mut out, timestamp)?;
        String::from_utf8(out)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn render<Tz>(&self, out: &mut Vec<u8>, time: DateTime<Tz>) -> std::io::Result<()>
    where
        Tz: chrono::TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        match &self.pattern {
            Some(pattern) => write!(out, "{}", time.format(pattern)),
            None => out.write_all(time.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes()),
        }
    }
}

fn to_datetime(timestamp: u64) -> std::io::Result<DateTime<Utc>> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp {timestamp} out of range"),
            )
        })
}

/// Append `data` as compact JSON, keys in insertion order
pub fn write_json(
    out: &mut Vec<u8>,
    sink: &str,
    tag: &str,
    data: &RecordData,
) -> Result<(), ContractError> {
    serde_json::to_writer(out, data).map_err(|e| ContractError::encode(sink, tag, e.to_string()))
}
