//! VERSION reply grammar: `<client>/<database version>/<database date>`

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `ctime`-style timestamp the daemon reports, e.g. `Wed Jun 10 08:23:45 2015`
pub const DATABASE_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Daemon and signature database version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version of the ClamAV engine, e.g. `ClamAV 0.98.1`
    pub client_version: String,
    /// Signature database number; higher is newer
    pub database_version: u64,
    /// When the signature database was built (daemon local time)
    pub database_time: NaiveDateTime,
}

/// The VERSION reply did not have the expected shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed version response {response:?}: {reason}")]
pub struct MalformedVersion {
    pub response: String,
    pub reason: String,
}

impl MalformedVersion {
    fn new(response: &str, reason: impl Into<String>) -> Self {
        Self {
            response: response.to_string(),
            reason: reason.into(),
        }
    }
}

impl VersionInfo {
    /// Parse a VERSION reply (without its sentinel)
    pub fn parse(response: &str) -> Result<Self, MalformedVersion> {
        let fields: Vec<&str> = response.split('/').collect();
        let [client, database, date] = fields.as_slice() else {
            return Err(MalformedVersion::new(
                response,
                format!("expected 3 '/'-separated fields, got {}", fields.len()),
            ));
        };

        if database.is_empty() || !database.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedVersion::new(
                response,
                format!("database version {:?}: expected decimal digits", database),
            ));
        }
        let database_version = database.parse::<u64>().map_err(|e| {
            MalformedVersion::new(response, format!("database version {:?}: {}", database, e))
        })?;

        if date.trim() != *date {
            return Err(MalformedVersion::new(
                response,
                format!("database time {:?}: surrounding whitespace", date),
            ));
        }
        let database_time = NaiveDateTime::parse_from_str(date, DATABASE_TIME_FORMAT)
            .map_err(|e| {
                MalformedVersion::new(response, format!("database time {:?}: {}", date, e))
            })?;

        Ok(Self {
            client_version: client.to_string(),
            database_version,
            database_time,
        })
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.client_version,
            self.database_version,
            self.database_time.format(DATABASE_TIME_FORMAT)
        )
    }
}

impl std::str::FromStr for VersionInfo {
    type Err = MalformedVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
