//! Connection-related data models.
//!
//! This module defines the database type, connection configuration and the
//! key used to share pools between configurations that target the same server.

use crate::config::PoolOptions;
use serde::{Deserialize, Serialize};
use url::Url;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Whether `SELECT ... FOR UPDATE` is understood.
    pub fn supports_row_locks(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Identifies which pool a configuration resolves to.
///
/// Two configurations with equal keys share one pool; the pool is sized by
/// whichever configuration resolved it first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub db_type: DatabaseType,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    /// Database name, or the file path for SQLite.
    pub database: String,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.db_type {
            DatabaseType::SQLite => write!(f, "sqlite:{}", self.database),
            _ => write!(
                f,
                "{}://{}@{}:{}/{}",
                self.db_type.display_name().to_lowercase(),
                self.user,
                self.host,
                self.port.map(|p| p.to_string()).unwrap_or_default(),
                self.database
            ),
        }
    }
}

/// Configuration for a database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Connection pool configuration options.
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration.
    pub fn new(
        connection_string: impl Into<String>,
        pool_options: PoolOptions,
    ) -> Result<Self, ConnectionConfigError> {
        let connection_string = connection_string.into();

        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| ConnectionConfigError::UnknownDatabaseType(mask(&connection_string)))?;

        Ok(Self {
            db_type,
            connection_string,
            pool_options,
        })
    }

    /// Derive the pool key from the connection string.
    pub fn pool_key(&self) -> Result<PoolKey, ConnectionConfigError> {
        if self.db_type == DatabaseType::SQLite {
            let path = self
                .connection_string
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            let path = path.split('?').next().unwrap_or_default();
            if path.is_empty() {
                return Err(ConnectionConfigError::MissingDatabase);
            }
            return Ok(PoolKey {
                db_type: self.db_type,
                host: String::new(),
                port: None,
                user: String::new(),
                database: path.to_string(),
            });
        }

        let url = Url::parse(&self.connection_string)
            .map_err(|e| ConnectionConfigError::InvalidUrl(e.to_string()))?;
        Ok(PoolKey {
            db_type: self.db_type,
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().or(self.db_type.default_port()),
            user: url.username().to_string(),
            database: url.path().trim_start_matches('/').to_string(),
        })
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        mask(&self.connection_string)
    }
}

fn mask(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("****")).is_ok() {
                url.to_string()
            } else {
                connection_string.to_string()
            }
        }
        _ => connection_string.to_string(),
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    /// Could not determine database type from connection string
    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),

    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("SQLite connection string is missing a file path")]
    MissingDatabase,
}
