//! Connection parameters and retry policy.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TxError};

/// Which native backend a descriptor targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Postgres,
    Sqlite,
}

impl FromStr for DriverKind {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DriverKind::Postgres),
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            other => Err(TxError::ConfigError(format!(
                "Unsupported driver kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Postgres => write!(f, "postgres"),
            DriverKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Everything needed to open a connection. Immutable once built.
///
/// For SQLite the `database` field holds the file path (or `:memory:`) and
/// the network fields are ignored.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    user: String,
    password: String,
    port: String,
    database: String,
    host: String,
    driver: DriverKind,
}

impl ConnectionDescriptor {
    /// Build a descriptor. The driver kind is parsed from its string name
    /// (`postgres`, `sqlite`, ...).
    pub fn new(
        user: &str,
        password: &str,
        port: &str,
        database: &str,
        host: &str,
        driver: &str,
    ) -> Result<Self> {
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            port: port.to_string(),
            database: database.to_string(),
            host: host.to_string(),
            driver: driver.parse()?,
        })
    }

    /// Descriptor for a SQLite database file, or `:memory:`.
    pub fn sqlite(path: &str) -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            port: String::new(),
            database: path.to_string(),
            host: String::new(),
            driver: DriverKind::Sqlite,
        }
    }

    /// Load the descriptor from the environment, reading a `.env` file first
    /// when one exists.
    ///
    /// Variables: `TXKIT_DB_USER`, `TXKIT_DB_PASSWORD`, `TXKIT_DB_PORT`
    /// (default 5432), `TXKIT_DB_NAME`, `TXKIT_DB_HOST` (default localhost),
    /// `TXKIT_DB_DRIVER` (default postgres).
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();

        let required = |name: &str| {
            env::var(name).map_err(|_| TxError::ConfigError(format!("{} must be set.", name)))
        };
        let optional = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());

        let driver = optional("TXKIT_DB_DRIVER", "postgres");
        let database = required("TXKIT_DB_NAME")?;
        if driver.parse::<DriverKind>()? == DriverKind::Sqlite {
            return Ok(Self::sqlite(&database));
        }

        Self::new(
            &required("TXKIT_DB_USER")?,
            &optional("TXKIT_DB_PASSWORD", ""),
            &optional("TXKIT_DB_PORT", "5432"),
            &database,
            &optional("TXKIT_DB_HOST", "localhost"),
            &driver,
        )
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    /// Key/value connection string in libpq format.
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

// Never print the password.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("user", &self.user)
            .field("password", &"****")
            .field("port", &self.port)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("driver", &self.driver)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.driver {
            DriverKind::Sqlite => write!(f, "sqlite:{}", self.database),
            DriverKind::Postgres => write!(
                f,
                "postgresql://{}:****@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
        }
    }
}

/// Fixed-interval retry policy used when establishing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    /// Pause after every failed attempt
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 25,
            interval: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Worst case time spent sleeping before giving up. There is no pause
    /// after the last attempt.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}
