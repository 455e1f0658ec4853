//! Job protocol version gate
//!
//! Producers stamp each job with their protocol version. An engine accepts
//! jobs from its own major version and the previous one, or the previous two
//! for majors configured to bridge a longer rolling upgrade.

use semver::Version;
use std::fmt;

/// Protocol version this engine stamps on the jobs it creates
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Verdict of the version gate for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Supported,
    /// Older than anything this engine can process
    TooOld { floor: Version },
    /// Produced by a newer engine than this one
    TooNew,
    /// Version string cannot be parsed; treated like `TooOld`
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct VersionGate {
    engine: Version,
    floor: Version,
}

impl VersionGate {
    pub fn new(engine: Version, extended_floor_majors: &[u64]) -> Self {
        let span = if extended_floor_majors.contains(&engine.major) {
            2
        } else {
            1
        };
        let floor = Version::new(engine.major.saturating_sub(span), 0, 0);
        Self { engine, floor }
    }

    /// Gate for the version of this crate
    pub fn current(extended_floor_majors: &[u64]) -> Self {
        let engine = Version::parse(ENGINE_VERSION)
            .unwrap_or_else(|_| Version::new(0, 0, 0));
        Self::new(engine, extended_floor_majors)
    }

    pub fn engine_version(&self) -> &Version {
        &self.engine
    }

    pub fn floor(&self) -> &Version {
        &self.floor
    }

    pub fn check(&self, job_version: &str) -> Compatibility {
        let version = match Version::parse(job_version.trim()) {
            Ok(version) => version,
            Err(e) => return Compatibility::Invalid(format!("{}: {}", job_version, e)),
        };

        if version < self.floor {
            Compatibility::TooOld {
                floor: self.floor.clone(),
            }
        } else if version > self.engine {
            Compatibility::TooNew
        } else {
            Compatibility::Supported
        }
    }
}

impl fmt::Display for VersionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.floor, self.engine)
    }
}
