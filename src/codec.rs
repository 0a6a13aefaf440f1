//! Wire codec for the SOCKS5 handshake
//!
//! Decoders read exactly one message from the stream and fail with the
//! `Socks5Error` kind the caller needs to pick a reply. Encoders write one
//! message and flush it.
//!
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)

use crate::address::TargetAddress;
use crate::error::{Result, Socks5Error};
use crate::protocol::{AuthStatus, Command, RSV, ReplyCode, SUBNEGOTIATION_VERSION, Version};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// ClientGreeting is the first message of a SOCKS5 connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGreeting {
    /// Offered method identifiers, in the order received
    pub methods: Vec<u8>,
}

/// PasswordCredential is the client half of the RFC 1929 exchange
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCredential {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}

/// ProxyRequest is a validated client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub command: Command,
    pub destination: TargetAddress,
}

/// decode_greeting reads the method selection message
pub async fn decode_greeting<S>(stream: &mut S) -> Result<ClientGreeting>
where
    S: AsyncRead + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let [version, n_methods] = buf;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::VersionNotSupported(version));
    }

    let mut methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut methods).await?;

    Ok(ClientGreeting { methods })
}

/// encode_choice writes the server's method selection
pub async fn encode_choice<S>(stream: &mut S, method: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[Version::SOCKS5 as u8, method]).await?;
    stream.flush().await?;
    Ok(())
}

/// decode_password_credential reads the username/password request
pub async fn decode_password_credential<S>(stream: &mut S) -> Result<PasswordCredential>
where
    S: AsyncRead + Unpin,
{
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+
    let version = stream.read_u8().await?;
    if version != SUBNEGOTIATION_VERSION {
        return Err(Socks5Error::MethodVersionNotSupported(version));
    }

    let username_len = stream.read_u8().await?;
    let mut username = vec![0u8; username_len as usize];
    stream.read_exact(&mut username).await?;

    let password_len = stream.read_u8().await?;
    let mut password = vec![0u8; password_len as usize];
    stream.read_exact(&mut password).await?;

    Ok(PasswordCredential { username, password })
}

/// encode_password_result writes the sub-negotiation status
pub async fn encode_password_result<S>(stream: &mut S, success: bool) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let status = if success {
        AuthStatus::Success
    } else {
        AuthStatus::Failure
    };
    stream
        .write_all(&[SUBNEGOTIATION_VERSION, status as u8])
        .await?;
    stream.flush().await?;
    Ok(())
}

/// decode_request reads a SOCKS5 request. The command byte is checked
/// last, once the whole request has been consumed
pub async fn decode_request<S>(stream: &mut S) -> Result<ProxyRequest>
where
    S: AsyncRead + Unpin,
{
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let [version, command, reserved, atyp] = header;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::VersionNotSupported(version));
    }
    if reserved != RSV {
        return Err(Socks5Error::InvalidReservedField(reserved));
    }

    let destination = TargetAddress::read_from(stream, atyp).await?;
    let command = Command::from_byte(command).ok_or(Socks5Error::CommandNotSupported(command))?;

    Ok(ProxyRequest {
        command,
        destination,
    })
}

/// encode_request writes a SOCKS5 request, as a client would
pub async fn encode_request<S>(stream: &mut S, request: &ProxyRequest) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = vec![Version::SOCKS5 as u8, request.command as u8, RSV];
    request.destination.encode(&mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// encode_reply writes a SOCKS5 reply carrying the bound endpoint
pub async fn encode_reply<S>(stream: &mut S, code: ReplyCode, bound: SocketAddr) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut reply = vec![Version::SOCKS5 as u8, code as u8, RSV];
    TargetAddress::from(bound).encode(&mut reply)?;
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use std::io::{self, Cursor};
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_decode_greeting() {
        let mut cursor = Cursor::new(vec![0x05, 0x02, 0x00, 0x02]);
        let greeting = decode_greeting(&mut cursor).await.unwrap();
        assert_eq!(greeting.methods, vec![0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_decode_greeting_bad_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00]);
        let err = decode_greeting(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::VersionNotSupported(4)));
    }

    #[tokio::test]
    async fn test_decode_greeting_short_methods() {
        let mut cursor = Cursor::new(vec![0x05, 0x03, 0x00]);
        let err = decode_greeting(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_encode_choice() {
        let mut out = Vec::new();
        encode_choice(&mut out, 0xFF).await.unwrap();
        assert_eq!(out, vec![0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_decode_password_credential() {
        let mut data = vec![0x01, 5];
        data.extend_from_slice(b"admin");
        data.push(6);
        data.extend_from_slice(b"123456");
        let mut cursor = Cursor::new(data);

        let cred = decode_password_credential(&mut cursor).await.unwrap();
        assert_eq!(cred.username, b"admin");
        assert_eq!(cred.password, b"123456");
        assert!(!format!("{cred:?}").contains("123456"));
    }

    #[tokio::test]
    async fn test_decode_password_credential_bad_version() {
        let mut cursor = Cursor::new(vec![0x05, 1, b'a', 1, b'b']);
        let err = decode_password_credential(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::MethodVersionNotSupported(5)));
    }

    #[tokio::test]
    async fn test_encode_password_result() {
        let mut out = Vec::new();
        encode_password_result(&mut out, true).await.unwrap();
        encode_password_result(&mut out, false).await.unwrap();
        assert_eq!(out, vec![0x01, 0x00, 0x01, 0x01]);
    }

    #[tokio::test]
    async fn test_decode_request_connect_ipv4() {
        let mut cursor = Cursor::new(vec![0x05, 0x01, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x01, 0x1f, 0x90]);
        let request = decode_request(&mut cursor).await.unwrap();
        assert_eq!(request.command, Command::Connect);
        assert_eq!(
            request.destination,
            TargetAddress::new(Address::IPv4(Ipv4Addr::LOCALHOST), 8080)
        );
    }

    #[tokio::test]
    async fn test_decode_request_reserved_field() {
        let mut cursor = Cursor::new(vec![0x05, 0x01, 0x01, 0x01, 127, 0, 0, 1, 0, 80]);
        let err = decode_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::InvalidReservedField(1)));
    }

    #[tokio::test]
    async fn test_decode_request_bad_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80]);
        let err = decode_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::VersionNotSupported(4)));
    }

    #[tokio::test]
    async fn test_decode_request_address_type() {
        let mut cursor = Cursor::new(vec![0x05, 0x01, 0x00, 0x05, 127, 0, 0, 1, 0, 80]);
        let err = decode_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::AddressTypeNotSupported(5)));
    }

    #[tokio::test]
    async fn test_decode_request_unknown_command_consumes_request() {
        let mut cursor = Cursor::new(vec![0x05, 0x09, 0x00, 0x01, 127, 0, 0, 1, 0, 80]);
        let err = decode_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Socks5Error::CommandNotSupported(9)));
        assert_eq!(cursor.position(), 10);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let requests = [
            ProxyRequest {
                command: Command::Connect,
                destination: TargetAddress::new(Address::DomainName("example.com".into()), 443),
            },
            ProxyRequest {
                command: Command::UdpAssociate,
                destination: "[2001:db8::1]:53".parse::<SocketAddr>().unwrap().into(),
            },
            ProxyRequest {
                command: Command::Bind,
                destination: "10.1.2.3:0".parse::<SocketAddr>().unwrap().into(),
            },
        ];

        for request in requests {
            let mut buf = Vec::new();
            encode_request(&mut buf, &request).await.unwrap();
            let decoded = decode_request(&mut Cursor::new(buf)).await.unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[tokio::test]
    async fn test_encode_reply_refused() {
        let mut out = Vec::new();
        encode_reply(&mut out, ReplyCode::ConnectionRefused, "0.0.0.0:0".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(out, vec![0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_encode_reply_ipv6() {
        let mut out = Vec::new();
        encode_reply(&mut out, ReplyCode::Succeeded, "[::1]:1080".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(&out[..4], &[0x05, 0x00, 0x00, 0x04]);
        assert_eq!(out.len(), 4 + 16 + 2);
        assert_eq!(&out[20..], &1080u16.to_be_bytes());
    }
}
