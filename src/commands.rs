use crate::codec::{ProxyRequest, decode_request, encode_reply};
use crate::error::{Result, Socks5Error};
use crate::protocol::{Command, ReplyCode};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{error, info};

/// Target is the outbound side of a session: a TCP stream for CONNECT or
/// a connected UDP socket for UDP ASSOCIATE
#[derive(Debug)]
pub enum Target {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Target {
    /// local_addr is the endpoint reported back to the client
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Target::Tcp(stream) => stream.local_addr(),
            Target::Udp(socket) => socket.local_addr(),
        }
    }
}

/// handle_socks_request reads the client request, resolves its
/// destination and dials it. BIND is answered with "command not
/// supported" and never dialed
pub async fn handle_socks_request<S>(stream: &mut S) -> Result<(ProxyRequest, Target)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = decode_request(stream).await?;

    if request.command == Command::Bind {
        encode_reply(stream, ReplyCode::CommandNotSupported, unspecified()).await?;
        return Err(Socks5Error::CommandNotSupported(Command::Bind as u8));
    }

    let addr = request.destination.resolve().await?;
    info!("{} {} -> {}", request.command, request.destination, addr);

    let target = dial_target(stream, addr, request.command).await?;
    Ok((request, target))
}

/// dial_target opens the outbound connection and writes exactly one reply.
/// Every dial failure is reported as "connection refused"
pub async fn dial_target<S>(stream: &mut S, addr: SocketAddr, command: Command) -> Result<Target>
where
    S: AsyncWrite + Unpin,
{
    let dialed = async {
        let target = match command {
            Command::Connect => Target::Tcp(TcpStream::connect(addr).await?),
            Command::UdpAssociate => Target::Udp(connect_udp(addr).await?),
            Command::Bind => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "BIND cannot be dialed",
                ));
            }
        };
        let local_addr = target.local_addr()?;
        Ok::<_, io::Error>((target, local_addr))
    }
    .await;

    match dialed {
        Ok((target, local_addr)) => {
            encode_reply(stream, ReplyCode::Succeeded, local_addr).await?;
            Ok(target)
        }
        Err(e) => {
            error!("failed to reach {addr}: {e}");
            encode_reply(stream, ReplyCode::ConnectionRefused, unspecified()).await?;
            Err(Socks5Error::ConnectionRefused)
        }
    }
}

/// connect_udp binds an ephemeral socket of the destination's family and
/// connects it to the destination
async fn connect_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

/// Bound address sent with failure replies
fn unspecified() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, 0).into()
}
