use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::io::Error;

use crate::SerializableSecretString;

/// Environment variable carrying the relational cluster host.
const RDB_HOST_ENV: &str = "RDB_HOST";
/// Environment variable carrying the relational cluster port.
const RDB_PORT_ENV: &str = "RDB_PORT";
/// Environment variable carrying the admin username.
const RDB_ADMIN_USER_ENV: &str = "RDB_ADMIN_USER";
/// Environment variable carrying the admin password.
const RDB_ADMIN_PASSWORD_ENV: &str = "RDB_ADMIN_PASSWORD";
/// Environment variable carrying the database the admin connection opens.
const RDB_ADMIN_DATABASE_ENV: &str = "RDB_ADMIN_DATABASE";

/// Configuration for connecting to the per-tenant relational cluster.
///
/// The cluster is reached two ways: an admin connection used for database
/// and role lifecycle, and per-tenant connections opened as the tenant's own
/// role. Tenant roles carry no password; isolation comes from the cluster
/// being unreachable from outside the private network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RdbConnectionConfig {
    /// Hostname or IP address of the cluster.
    pub host: String,
    /// Port number on which the cluster is listening.
    pub port: u16,
    /// Admin role used for tenant lifecycle and billing queries.
    pub admin_username: String,
    /// Password for the admin role. Sensitive and redacted in debug output.
    pub admin_password: Option<SerializableSecretString>,
    /// Database the admin connection opens.
    pub admin_database: String,
}

impl RdbConnectionConfig {
    /// Loads the cluster configuration from `RDB_*` environment variables,
    /// falling back to local-development defaults.
    pub fn from_env() -> Result<Self, Error> {
        let port = match std::env::var(RDB_PORT_ENV) {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::other(format!("invalid {RDB_PORT_ENV}: {e}")))?,
            Err(_) => 26257,
        };

        Ok(Self {
            host: std::env::var(RDB_HOST_ENV).unwrap_or_else(|_| "localhost".into()),
            port,
            admin_username: std::env::var(RDB_ADMIN_USER_ENV).unwrap_or_else(|_| "root".into()),
            admin_password: std::env::var(RDB_ADMIN_PASSWORD_ENV)
                .ok()
                .map(SerializableSecretString::from),
            admin_database: std::env::var(RDB_ADMIN_DATABASE_ENV)
                .unwrap_or_else(|_| "defaultdb".into()),
        })
    }

    /// Connection options for the admin connection.
    pub fn admin_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.admin_username)
            .database(&self.admin_database)
            .ssl_mode(PgSslMode::Prefer);

        if let Some(password) = &self.admin_password {
            options.password(password.expose_secret())
        } else {
            options
        }
    }

    /// Connection options for a tenant connection opened as the tenant role.
    pub fn tenant_options(&self, username: &str, database: &str) -> PgConnectOptions {
        PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(username)
            .database(database)
            .ssl_mode(PgSslMode::Prefer)
    }

    /// Connection string a tenant-side process would use to reach `database`
    /// as `username`, optionally pinned to a schema via `search_path`.
    pub fn tenant_dsn(&self, username: &str, database: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!(
                "postgresql://{username}@{host}:{port}/{database}?sslmode=disable&search_path={schema}",
                host = self.host,
                port = self.port,
            ),
            None => format!(
                "postgresql://{username}@{host}:{port}/{database}?sslmode=disable",
                host = self.host,
                port = self.port,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RdbConnectionConfig {
        RdbConnectionConfig {
            host: "rdb.internal".into(),
            port: 26257,
            admin_username: "root".into(),
            admin_password: None,
            admin_database: "defaultdb".into(),
        }
    }

    #[test]
    fn tenant_dsn_without_schema() {
        let dsn = config().tenant_dsn("user_abc1234", "db_abc1234", None);
        assert_eq!(
            dsn,
            "postgresql://user_abc1234@rdb.internal:26257/db_abc1234?sslmode=disable"
        );
    }

    #[test]
    fn tenant_dsn_pins_search_path() {
        let dsn = config().tenant_dsn("user_abc1234", "db_abc1234", Some("schema_deadbeef"));
        assert!(dsn.ends_with("?sslmode=disable&search_path=schema_deadbeef"));
    }
}
