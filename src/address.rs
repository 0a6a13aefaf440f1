use crate::error::{Result, Socks5Error};
use crate::protocol::AddressType;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Address represents a network address or domain to be used as the
/// SOCKS5 target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4(Ipv4Addr),
    DomainName(String),
    IPv6(Ipv6Addr),
}

impl Address {
    /// address_type returns the ATYP byte this address is encoded with
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::IPv4(_) => AddressType::IPv4,
            Address::DomainName(_) => AddressType::DomainName,
            Address::IPv6(_) => AddressType::IPv6,
        }
    }
}

/// TargetAddress represents a destination (or bound) address and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub address: Address,
    pub port: u16,
}

impl TargetAddress {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    /// read_from parses DST.ADDR and DST.PORT for an already consumed
    /// ATYP byte
    pub async fn read_from<S>(stream: &mut S, atyp: u8) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let address = match AddressType::from_byte(atyp) {
            Some(AddressType::IPv4) => {
                let mut addr = [0u8; 4];
                stream.read_exact(&mut addr).await?;
                Address::IPv4(Ipv4Addr::from(addr))
            }
            Some(AddressType::DomainName) => {
                // First octet in DomainName contains the number of
                // octets to follow
                let len = stream.read_u8().await?;
                let mut domain = vec![0u8; len as usize];
                stream.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Address::DomainName(domain)
            }
            Some(AddressType::IPv6) => {
                let mut addr = [0u8; 16];
                stream.read_exact(&mut addr).await?;
                Address::IPv6(Ipv6Addr::from(addr))
            }
            None => return Err(Socks5Error::AddressTypeNotSupported(atyp)),
        };

        // Port is in network order
        let port = stream.read_u16().await?;

        Ok(Self { address, port })
    }

    /// encode appends ATYP, ADDR and PORT to the buffer
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.address.address_type() as u8);
        match &self.address {
            Address::IPv4(ip) => buf.extend_from_slice(&ip.octets()),
            Address::IPv6(ip) => buf.extend_from_slice(&ip.octets()),
            Address::DomainName(domain) => {
                let len = u8::try_from(domain.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "domain name longer than 255 bytes")
                })?;
                buf.push(len);
                buf.extend_from_slice(domain.as_bytes());
            }
        }
        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(())
    }

    /// resolve turns the target into a socket address. Literals are used
    /// verbatim; domain names go through the system resolver and the first
    /// answer wins, whatever its family
    pub async fn resolve(&self) -> Result<SocketAddr> {
        match &self.address {
            Address::IPv4(ip) => Ok(SocketAddr::new((*ip).into(), self.port)),
            Address::IPv6(ip) => Ok(SocketAddr::new((*ip).into(), self.port)),
            Address::DomainName(domain) => {
                let mut addrs = tokio::net::lookup_host((domain.as_str(), self.port))
                    .await
                    .map_err(|e| {
                        debug!("lookup of {domain} failed: {e}");
                        Socks5Error::ResolutionFailed(domain.clone())
                    })?;
                addrs
                    .next()
                    .ok_or_else(|| Socks5Error::ResolutionFailed(domain.clone()))
            }
        }
    }
}

impl From<SocketAddr> for TargetAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::new(Address::IPv4(*v4.ip()), v4.port()),
            SocketAddr::V6(v6) => Self::new(Address::IPv6(*v6.ip()), v6.port()),
        }
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::IPv4(ip) => write!(f, "{ip}:{}", self.port),
            Address::IPv6(ip) => write!(f, "[{ip}]:{}", self.port),
            Address::DomainName(domain) => write!(f, "{domain}:{}", self.port),
        }
    }
}
