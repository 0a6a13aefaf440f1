//! File configuration for the proxy binary
//!
//! ```toml
//! listen = "0.0.0.0:7891"
//! handshake_timeout = 30
//!
//! [auth]
//! method = "password"
//!
//! [auth.users]
//! admin = "123456"
//! ```

use crate::auth::{Credentials, UserPass};
use crate::protocol::AuthMethod;
use crate::server::ServerConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top level of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    /// Seconds
    pub handshake_timeout: Option<u64>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthKind,
    /// username -> password
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    Password,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<FileConfig> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

impl FileConfig {
    /// add_user registers a user and switches to password authentication
    pub fn add_user(&mut self, user: UserPass) {
        self.auth.method = AuthKind::Password;
        self.auth.users.insert(user.username, user.password);
    }

    /// server_config builds the engine configuration. Password
    /// authentication without users yields no checker, which the server
    /// rejects at bind time
    pub fn server_config(&self) -> ServerConfig {
        let handshake_timeout = self.handshake_timeout.map(Duration::from_secs);

        match self.auth.method {
            AuthKind::None => ServerConfig::no_auth().handshake_timeout(handshake_timeout),
            AuthKind::Password => {
                let credentials: Credentials = self
                    .auth
                    .users
                    .iter()
                    .map(|(username, password)| UserPass {
                        username: username.clone(),
                        password: password.clone(),
                    })
                    .collect();

                ServerConfig {
                    auth_method: AuthMethod::UserPass,
                    password_checker: if credentials.is_empty() {
                        None
                    } else {
                        Some(Arc::new(credentials))
                    },
                    handshake_timeout,
                }
            }
        }
    }
}
