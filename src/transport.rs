//! Transport is an external collaborator per §6: connect/read/write/close,
//! TLS selected by scheme. This module supplies one concrete blocking
//! implementation per scheme so the connection manager (§4.4, synchronous by
//! design per §5) is directly runnable, without pulling in an async runtime
//! the synchronous core has no use for.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// One resolved endpoint in the connection manager's address pool (§4.4).
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub host: String,
    pub tls: bool,
}

pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn close(&mut self) -> io::Result<()>;
}

pub struct TcpTransport(TcpStream);

impl TcpTransport {
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<TcpTransport> {
        let stream = TcpStream::connect_timeout(&endpoint.addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        Ok(TcpTransport(stream))
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(feature = "tls")]
pub struct TlsTransport(native_tls::TlsStream<TcpStream>);

#[cfg(feature = "tls")]
impl TlsTransport {
    pub fn connect(endpoint: &Endpoint, timeout: Duration, no_tls_verify: bool) -> io::Result<TlsTransport> {
        let stream = TcpStream::connect_timeout(&endpoint.addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(no_tls_verify)
            .danger_accept_invalid_hostnames(no_tls_verify)
            .build()
            .map_err(io::Error::other)?;
        let tls = connector.connect(&endpoint.host, stream).map_err(io::Error::other)?;
        Ok(TlsTransport(tls))
    }
}

#[cfg(feature = "tls")]
impl Transport for TlsTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.shutdown()
    }
}

/// Opens the right transport for an endpoint's scheme.
pub fn connect(endpoint: &Endpoint, timeout: Duration, no_tls_verify: bool) -> io::Result<Box<dyn Transport>> {
    if endpoint.tls {
        #[cfg(feature = "tls")]
        {
            Ok(Box::new(TlsTransport::connect(endpoint, timeout, no_tls_verify)?))
        }
        #[cfg(not(feature = "tls"))]
        {
            let _ = no_tls_verify;
            Err(io::Error::new(io::ErrorKind::Other, "TLS support not compiled in"))
        }
    } else {
        Ok(Box::new(TcpTransport::connect(endpoint, timeout)?))
    }
}
