use crate::codec::{decode_greeting, decode_password_credential, encode_choice, encode_password_result};
use crate::error::{Result, Socks5Error};
use crate::protocol::AuthMethod;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// PasswordChecker validates username/password pairs. One checker is shared
/// by every connection, so implementations must tolerate concurrent calls
pub trait PasswordChecker: Send + Sync {
    fn check(&self, username: &[u8], password: &[u8]) -> bool;
}

impl<F> PasswordChecker for F
where
    F: Fn(&[u8], &[u8]) -> bool + Send + Sync,
{
    fn check(&self, username: &[u8], password: &[u8]) -> bool {
        self(username, password)
    }
}

/// UserPass holds a single username/password pair
#[derive(Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

/// Credentials is a username -> password store
#[derive(Clone, Default)]
pub struct Credentials {
    users: HashMap<Vec<u8>, Vec<u8>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert adds or replaces a user
    pub fn insert(&mut self, user: UserPass) {
        self.users
            .insert(user.username.into_bytes(), user.password.into_bytes());
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<UserPass> for Credentials {
    fn from_iter<I: IntoIterator<Item = UserPass>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for user in iter {
            credentials.insert(user);
        }
        credentials
    }
}

impl PasswordChecker for Credentials {
    fn check(&self, username: &[u8], password: &[u8]) -> bool {
        self.users
            .get(username)
            .is_some_and(|want| want.as_slice() == password)
    }
}

/// negotiate_auth runs the method handshake and, for username/password,
/// the RFC 1929 sub-negotiation. The choice is always written before any
/// request byte is read
pub async fn negotiate_auth<S>(
    stream: &mut S,
    required: AuthMethod,
    checker: Option<&dyn PasswordChecker>,
) -> Result<AuthMethod>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = decode_greeting(stream).await?;
    debug!("client offered methods: {:?}", greeting.methods);

    if !greeting.methods.contains(&(required as u8)) {
        encode_choice(stream, AuthMethod::NoAcceptable as u8).await?;
        return Err(Socks5Error::NoAcceptableMethod);
    }

    encode_choice(stream, required as u8).await?;

    if required == AuthMethod::UserPass {
        let checker = checker.ok_or(Socks5Error::PasswordCheckerNotSet)?;
        authenticate_userpass(stream, checker).await?;
    }

    Ok(required)
}

/// authenticate_userpass reads the credential, asks the checker and writes
/// the status
async fn authenticate_userpass<S>(stream: &mut S, checker: &dyn PasswordChecker) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let credential = decode_password_credential(stream).await?;
    let accepted = checker.check(&credential.username, &credential.password);

    encode_password_result(stream, accepted).await?;

    if !accepted {
        warn!(
            "authentication rejected for user {:?}",
            String::from_utf8_lossy(&credential.username)
        );
        return Err(Socks5Error::PasswordAuthFailure);
    }

    Ok(())
}
