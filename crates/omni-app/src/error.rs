//! # Design
//!
//! - Centralize application-level errors for bootstrap.
//! - Carry enough context to map every failure onto the documented exit
//!   codes: 1 config, 2 database, 3 port in use.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration load or validation failed.
    #[error("configuration error")]
    Config {
        /// Source configuration error.
        source: omni_config::ConfigError,
    },
    /// Logging could not be installed.
    #[error("telemetry initialisation failed")]
    Telemetry {
        /// Human-readable detail.
        detail: String,
    },
    /// The database was unreachable or rejected the connection.
    #[error("database unreachable")]
    Database {
        /// Source database error.
        source: sqlx::Error,
    },
    /// Schema migration failed.
    #[error("database migration failed")]
    Migration {
        /// Source data-layer error.
        source: omni_data::DataError,
    },
    /// A required port was already taken.
    #[error("port in use")]
    PortInUse {
        /// Address that failed to bind.
        addr: SocketAddr,
    },
    /// Serving the API failed after startup.
    #[error("server failed")]
    Serve {
        /// Source IO error.
        source: io::Error,
    },
    /// The site runtime failed to assemble.
    #[error("site runtime failed")]
    Site {
        /// Source site error.
        source: omni_site::SiteError,
    },
    /// Hub-side persistence failed during bootstrap.
    #[error("hub bootstrap failed")]
    Hub {
        /// Source data-layer error.
        source: omni_data::DataError,
    },
}

impl AppError {
    /// Documented process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config { .. } | Self::Telemetry { .. } => 1,
            Self::Database { .. } | Self::Migration { .. } => 2,
            Self::PortInUse { .. } => 3,
            Self::Serve { .. } | Self::Site { .. } | Self::Hub { .. } => 1,
        }
    }
}

/// Map a bind failure onto the port-in-use exit code, leaving other IO
/// errors as generic serve failures.
#[must_use]
pub fn bind_error(addr: SocketAddr, source: io::Error) -> AppError {
    if source.kind() == io::ErrorKind::AddrInUse {
        AppError::PortInUse { addr }
    } else {
        AppError::Serve { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_contract() {
        let config = AppError::Config {
            source: omni_config::ConfigError::MissingField {
                field: "registration_key",
            },
        };
        assert_eq!(config.exit_code(), 1);

        let addr: SocketAddr = "127.0.0.1:9080".parse().expect("addr");
        let port = bind_error(addr, io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(port.exit_code(), 3);

        let other = bind_error(addr, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(other.exit_code(), 1);
    }
}
