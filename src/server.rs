use crate::{
    auth::{self, PasswordChecker},
    commands,
    error::Socks5Error,
    protocol::AuthMethod,
    relay::{RelayStats, Session},
};
use anyhow::{Context, Result, anyhow, bail};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    time::{sleep, timeout},
};
use tracing::{error, info};

/// Pause after a failed accept. Errors such as EMFILE repeat immediately,
/// so retrying without one spins the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// accept_with_backoff retries `accept` until it succeeds, logging each
/// failure and sleeping [`ACCEPT_BACKOFF`] before the next attempt
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                error!("failed to accept connection: {e}");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// ServerConfig is the per-server configuration shared read-only by every
/// connection
#[derive(Clone)]
pub struct ServerConfig {
    /// Method every client must offer
    pub auth_method: AuthMethod,
    /// Required when `auth_method` is `UserPass`
    pub password_checker: Option<Arc<dyn PasswordChecker>>,
    /// Upper bound on negotiation, request and dial together. The relay
    /// itself is never timed
    pub handshake_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::no_auth()
    }
}

impl ServerConfig {
    pub fn no_auth() -> Self {
        Self {
            auth_method: AuthMethod::NoAuth,
            password_checker: None,
            handshake_timeout: None,
        }
    }

    /// with_password requires username/password authentication checked by
    /// `checker`
    pub fn with_password(checker: impl PasswordChecker + 'static) -> Self {
        Self {
            auth_method: AuthMethod::UserPass,
            password_checker: Some(Arc::new(checker)),
            handshake_timeout: None,
        }
    }

    pub fn handshake_timeout(mut self, limit: Option<Duration>) -> Self {
        self.handshake_timeout = limit;
        self
    }

    /// validate catches misconfiguration before any connection is accepted
    pub fn validate(&self) -> Result<(), Socks5Error> {
        if self.auth_method == AuthMethod::UserPass && self.password_checker.is_none() {
            return Err(Socks5Error::PasswordCheckerNotSet);
        }
        Ok(())
    }
}

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    config: Arc<ServerConfig>,
    listener: Option<TcpListener>,
}

impl Socks5Server {
    /// new is a constructor for the Socks5Server type. No authentication is
    /// required until a config says otherwise
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            config: Arc::new(ServerConfig::default()),
            listener: None,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// bind validates the configuration and binds the listen address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("server is already bound");
        }

        self.config
            .validate()
            .context("invalid server configuration")?;

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run accepts connections forever, one task per connection. Only
    /// startup errors are returned
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("listener missing after bind"))?;

        loop {
            let (inbound, peer_addr) = accept_with_backoff(|| listener.accept()).await;

            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                info!("new client: {peer_addr}");

                match handle_connection(inbound, &config).await {
                    Ok(stats) => info!(
                        "connection from {peer_addr} closed: {} bytes from client, {} bytes from target",
                        stats.client_to_target, stats.target_to_client
                    ),
                    Err(e) => error!("connection from {peer_addr} failed: {e}"),
                }
            });
        }
    }
}

/// handle_connection runs negotiation, request, dial and relay in order on
/// one client stream
pub async fn handle_connection<S>(
    mut stream: S,
    config: &ServerConfig,
) -> Result<RelayStats, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handshake = async {
        auth::negotiate_auth(
            &mut stream,
            config.auth_method,
            config.password_checker.as_deref(),
        )
        .await?;
        commands::handle_socks_request(&mut stream).await
    };

    let (_request, target) = match config.handshake_timeout {
        Some(limit) => timeout(limit, handshake)
            .await
            .map_err(|_| Socks5Error::Timeout)??,
        None => handshake.await?,
    };

    Ok(Session::new(stream, target).run().await)
}
