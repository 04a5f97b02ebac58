//! Connection-related data models.
//!
//! This module defines the endpoint a connection is opened against and the
//! password-free views of open connections handed back to callers.

use crate::models::EngineKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where to connect and as whom.
///
/// Only used while a connection is being built; pooled connections keep an
/// [`EndpointInfo`] instead.
#[derive(Clone, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(default)]
    pub password: String,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// The endpoint with the password stripped.
    pub fn info(&self) -> EndpointInfo {
        EndpointInfo {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Endpoint descriptor minus the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
}

/// Request body for opening a new connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Engine name in any accepted spelling.
    pub database_type: String,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

/// Returned after a connection has been opened and registered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub database_type: EngineKind,
    pub connection_string: String,
}

/// One row of the registry listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub database: EngineKind,
    pub connection_string: String,
    pub username: String,
    pub is_current: bool,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionList {
    pub connections: Vec<ConnectionSummary>,
    pub current_connection_id: Option<String>,
    pub connection_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_password() {
        let endpoint = Endpoint::new("localhost", 5432, "app", "admin", "hunter2");
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_info_drops_password() {
        let endpoint = Endpoint::new("localhost", 8123, "default", "default", "secret");
        let json = serde_json::to_string(&endpoint.info()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"username\":\"default\""));
    }

    #[test]
    fn test_connect_request_parses_flat_body() {
        let request: ConnectRequest = serde_json::from_str(
            r#"{"databaseType":"postgres","host":"db","port":5432,"database":"app","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(request.database_type, "postgres");
        assert_eq!(request.endpoint.port, 5432);
        assert_eq!(request.endpoint.password, "p");
    }
}
