use crate::commands::Target;
use crate::protocol::{MAX_DGRAM, MAX_UDP_PAYLOAD};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error};

/// Copy buffer for stream targets, the same size tokio::io::copy uses
pub const RELAY_BUFFER_SIZE: usize = 8 * 1024;

/// RelayStats counts the bytes relayed in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Session pairs an accepted client with its outbound target. Both are
/// owned by the relay and closed together when it returns
pub struct Session<C> {
    pub client: C,
    pub target: Target,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: C, target: Target) -> Self {
        Self { client, target }
    }

    /// run relays until either side finishes
    pub async fn run(self) -> RelayStats {
        match self.target {
            Target::Tcp(stream) => relay(self.client, stream).await,
            // A whole datagram has to fit in one read
            Target::Udp(socket) => {
                relay_with_buffer(self.client, DatagramStream::new(socket), MAX_DGRAM).await
            }
        }
    }
}

/// relay copies bytes in both directions. As soon as one direction ends
/// (EOF or error) the other is stopped; both directions are joined and
/// both write sides shut down before this returns
pub async fn relay<C, T>(client: C, target: T) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    relay_with_buffer(client, target, RELAY_BUFFER_SIZE).await
}

/// relay_with_buffer is [`relay`] with an explicit per-direction copy
/// buffer size
pub async fn relay_with_buffer<C, T>(client: C, target: T, buffer_size: usize) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (target_read, target_write) = tokio::io::split(target);

    let (stop_tx, stop_rx) = watch::channel(false);

    let upstream = tokio::spawn(pipe(
        "client->target",
        buffer_size,
        client_read,
        target_write,
        stop_tx.clone(),
        stop_rx.clone(),
    ));
    let downstream = tokio::spawn(pipe(
        "target->client",
        buffer_size,
        target_read,
        client_write,
        stop_tx,
        stop_rx,
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    RelayStats {
        client_to_target: upstream.unwrap_or_else(|e| {
            error!("client->target relay task failed: {e}");
            0
        }),
        target_to_client: downstream.unwrap_or_else(|e| {
            error!("target->client relay task failed: {e}");
            0
        }),
    }
}

/// pipe runs one direction of the relay and returns the bytes it copied
async fn pipe<R, W>(
    direction: &'static str,
    buffer_size: usize,
    mut reader: R,
    mut writer: W,
    stop_tx: watch::Sender<bool>,
    mut stop_rx: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;

    tokio::select! {
        result = copy_until_eof(&mut reader, &mut writer, buffer_size, &mut copied) => {
            if let Err(e) = result {
                debug!("{direction} ended with error: {e}");
            }
        }
        _ = stop_rx.wait_for(|stopped| *stopped) => {
            debug!("{direction} stopped by peer direction");
        }
    }

    // Either way the whole session is over
    let _ = stop_tx.send(true);
    if let Err(e) = writer.shutdown().await {
        debug!("{direction} shutdown: {e}");
    }

    debug!("{direction} finished: {copied} bytes");
    copied
}

async fn copy_until_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    copied: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

/// DatagramStream adapts a connected UDP socket to the byte stream
/// interface: every write is sent as one datagram and every read returns
/// one received datagram. An empty datagram reads as EOF. Writes longer
/// than [`MAX_UDP_PAYLOAD`] are cut short, so `write_all` sends the rest
/// as further datagrams
pub struct DatagramStream {
    socket: UdpSocket,
}

impl DatagramStream {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for DatagramStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for DatagramStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let len = buf.len().min(MAX_UDP_PAYLOAD);
        self.socket.poll_send(cx, &buf[..len])
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_relay_bidirectional() {
        let (mut client, client_side) = duplex(1024);
        let (mut target, target_side) = duplex(1024);

        let handle = tokio::spawn(relay(client_side, target_side));

        client.write_all(b"message A->B").await.unwrap();
        let mut buf = [0u8; 12];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"message A->B");

        target.write_all(b"reply B->A").await.unwrap();
        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply B->A");

        drop(client);
        let stats = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stats,
            RelayStats {
                client_to_target: 12,
                target_to_client: 10,
            }
        );
    }

    #[tokio::test]
    async fn test_relay_closes_both_when_one_side_ends() {
        let (client, client_side) = duplex(1024);
        let (mut target, target_side) = duplex(1024);

        let handle = tokio::spawn(relay(client_side, target_side));

        // Client goes away; the target must observe EOF even though it
        // never closed its own side
        drop(client);

        let mut out = Vec::new();
        timeout(Duration::from_secs(1), target.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert!(out.is_empty());

        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_large_transfer() {
        let (mut client, client_side) = duplex(65536);
        let (mut target, target_side) = duplex(65536);

        let handle = tokio::spawn(relay(client_side, target_side));

        let data = vec![0xAB; 200_000];
        let writer = {
            let data = data.clone();
            tokio::spawn(async move {
                client.write_all(&data).await.unwrap();
                client
            })
        };

        let mut received = vec![0u8; data.len()];
        target.read_exact(&mut received).await.unwrap();
        assert_eq!(received, data);

        drop(writer.await.unwrap());
        let stats = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.client_to_target, 200_000);
    }

    #[tokio::test]
    async fn test_session_tcp_echo() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = stream.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let outbound = TcpStream::connect(echo_addr).await.unwrap();
        let (mut client, client_side) = duplex(1024);
        let handle = tokio::spawn(Session::new(client_side, Target::Tcp(outbound)).run());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        let stats = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.client_to_target, 4);
        assert_eq!(stats.target_to_client, 4);
    }

    #[tokio::test]
    async fn test_session_udp() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();
        let relay_addr = socket.local_addr().unwrap();

        let (mut client, client_side) = duplex(1024);
        let handle = tokio::spawn(Session::new(client_side, Target::Udp(socket)).run());

        client.write_all(b"query").await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"query");
        assert_eq!(from, relay_addr);

        peer.send_to(b"answer", from).await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"answer");

        drop(client);
        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_udp_splits_oversized_write() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();

        let (mut client, client_side) = duplex(128 * 1024);
        let handle = tokio::spawn(Session::new(client_side, Target::Udp(socket)).run());

        // One client burst larger than any UDP payload
        let burst = vec![0x5A; MAX_DGRAM];
        client.write_all(&burst).await.unwrap();

        let mut buf = vec![0u8; MAX_DGRAM];
        let mut received = 0;
        while received < burst.len() {
            let n = timeout(Duration::from_secs(1), peer.recv(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n <= MAX_UDP_PAYLOAD);
            assert!(buf[..n].iter().all(|&b| b == 0x5A));
            received += n;
        }
        assert_eq!(received, burst.len());

        // The session survives and keeps relaying
        client.write_all(b"after").await.unwrap();
        let n = timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"after");
        assert!(!handle.is_finished());

        drop(client);
        let stats = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.client_to_target, (burst.len() + 5) as u64);
    }
}
