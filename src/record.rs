use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tag attached to every captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warn,
    Debug,
    Info,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw output line.
///
/// Case-insensitive substring match with priority ERROR > WARN > DEBUG > INFO.
/// Lines that mention none of the keywords are INFO.
pub fn classify(line: &str) -> Level {
    let upper = line.to_uppercase();

    if upper.contains("ERROR") {
        Level::Error
    } else if upper.contains("WARN") {
        Level::Warn
    } else if upper.contains("DEBUG") {
        Level::Debug
    } else {
        Level::Info
    }
}

/// One captured, classified, timestamped line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    #[serde(with = "rfc3339_seconds")]
    pub timestamp: DateTime<Utc>,
    pub level: Level,
}

impl LogRecord {
    /// Build a record for a line observed right now.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::at(message, Utc::now())
    }

    pub fn at(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let message = message.into();
        let level = classify(&message);
        Self {
            message,
            timestamp,
            level,
        }
    }
}

// Wire format is second-precision RFC3339 in UTC, e.g. 2025-01-01T10:00:00Z
mod rfc3339_seconds {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
