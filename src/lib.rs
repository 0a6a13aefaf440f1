//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT
//!     - UDP ASSOCIATE, relayed over a single connected UDP socket
//!     - No Authentication
//!     - Username/Password Authentication with a pluggable checker
//!     - One tokio task per connection, two per relay
//!     - Optional handshake timeout
//! - BIND is answered with "command not supported"
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use minisocks::{Credentials, ServerConfig, Socks5Server, UserPass};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let users: Credentials = [UserPass {
//!         username: "admin".to_string(),
//!         password: "123456".to_string(),
//!     }]
//!     .into_iter()
//!     .collect();
//!
//!     let mut server =
//!         Socks5Server::new("127.0.0.1:1080").with_config(ServerConfig::with_password(users));
//!     server.run().await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

// Re-export main types at crate root for convenience
pub use address::{Address, TargetAddress};
pub use auth::{Credentials, PasswordChecker, UserPass};
pub use commands::Target;
pub use error::Socks5Error;
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use relay::{RelayStats, Session};
pub use server::{ServerConfig, Socks5Server};
