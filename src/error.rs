// Error taxonomy for the discovery engine
//
// Every core operation (probing, SSH, driver parsing, persistence,
// topology) returns `Result<T>` built on `DiscoveryError`. CLI glue and
// `main` use `anyhow::Result`, wrapping `DiscoveryError` at the boundary
// with `?`. A single device's failure is handled locally by the scanner
// and never reaches this type as `Fatal`/`Aborted` — those two variants
// are the only ones allowed to unwind out of `scan_device`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// TCP/SSH/SNMP timeouts and connection failures. Recovered by demoting
    /// the device to "not accessible" rather than propagating.
    #[error("transient I/O failure against {host} ({operation}): {reason}")]
    Transient {
        host: String,
        operation: String,
        reason: String,
    },

    /// Every candidate credential failed for a reachable device.
    #[error("no working credential for {host} after {attempted} attempt(s)")]
    AuthExhausted { host: String, attempted: usize },

    /// A vendor driver could not make sense of device output (prompt regex
    /// miss, unexpected table shape, etc).
    #[error("driver '{driver}' failed to parse output from {host}: {details}")]
    DriverParse {
        driver: String,
        host: String,
        details: String,
    },

    /// Cooperative abort observed at a suspension point.
    #[error("scan aborted")]
    Aborted,

    /// A persistence write was rejected; the offending row is skipped and
    /// the scan continues.
    #[error("persistence conflict writing {entity} {key}: {reason}")]
    PersistenceConflict {
        entity: String,
        key: String,
        reason: String,
    },

    /// Unrecoverable scan-level failure: the scan is marked `failed` and the
    /// terminal status event is emitted.
    #[error("fatal scan failure: {reason}")]
    Fatal { reason: String },
}

/// Result type alias for discovery-engine operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Error context extension trait for enriching errors with additional info
/// at the point a raw I/O or parse failure is first observed, before it is
/// classified into a `DiscoveryError` variant.
pub trait ErrorContext<T> {
    fn with_host_context(self, host: &str, operation: &str) -> Result<T>;
    fn with_driver_context(self, driver: &str, host: &str) -> Result<T>;
    fn with_persistence_context(self, entity: &str, key: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn with_host_context(self, host: &str, operation: &str) -> Result<T> {
        self.map_err(|e| DiscoveryError::Transient {
            host: host.to_string(),
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    fn with_driver_context(self, driver: &str, host: &str) -> Result<T> {
        self.map_err(|e| DiscoveryError::DriverParse {
            driver: driver.to_string(),
            host: host.to_string(),
            details: e.to_string(),
        })
    }

    fn with_persistence_context(self, entity: &str, key: &str) -> Result<T> {
        self.map_err(|e| DiscoveryError::PersistenceConflict {
            entity: entity.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl DiscoveryError {
    /// True for the two variants allowed to unwind a whole scan rather than
    /// being absorbed into a per-device "not accessible" record.
    pub fn is_scan_fatal(&self) -> bool {
        matches!(self, DiscoveryError::Fatal { .. } | DiscoveryError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::AuthExhausted {
            host: "10.0.0.5".to_string(),
            attempted: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.5"));
        assert!(msg.contains("3 attempt"));
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), &str> = Err("connection refused");
        let enriched = result.with_host_context("10.0.0.1", "ssh-connect");
        assert!(enriched.is_err());

        let err_msg = enriched.unwrap_err().to_string();
        assert!(err_msg.contains("10.0.0.1"));
        assert!(err_msg.contains("ssh-connect"));
    }

    #[test]
    fn test_scan_fatal_classification() {
        assert!(DiscoveryError::Aborted.is_scan_fatal());
        assert!(DiscoveryError::Fatal { reason: "x".into() }.is_scan_fatal());
        assert!(!DiscoveryError::AuthExhausted { host: "x".into(), attempted: 1 }.is_scan_fatal());
    }
}
