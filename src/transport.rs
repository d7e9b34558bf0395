use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::AsyncRead;
use url::Url;

use crate::error::TransportError;

/// A connected byte stream. Chunk boundaries carry no meaning.
pub type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

/// Where the device's byte stream comes from.
///
/// An RFCOMM-bound Bluetooth serial link shows up as a device node such as
/// `/dev/rfcomm0`; serial-over-TCP adapters are reached with `tcp://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Tcp { host: String, port: u16 },
    Device(PathBuf),
    Stdin,
}

impl FromStr for TransportTarget {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::InvalidTarget(s.to_string()));
        }
        if s == "-" || s == "stdin" {
            return Ok(TransportTarget::Stdin);
        }
        if s.starts_with("tcp://") {
            let url = Url::parse(s).map_err(|_| TransportError::InvalidTarget(s.to_string()))?;
            let host = url.host_str().ok_or_else(|| TransportError::InvalidTarget(s.to_string()))?;
            let port = url.port().ok_or_else(|| TransportError::InvalidTarget(s.to_string()))?;
            return Ok(TransportTarget::Tcp { host: host.to_string(), port });
        }
        let path = s.strip_prefix("file:").unwrap_or(s);
        Ok(TransportTarget::Device(PathBuf::from(path)))
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportTarget::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            TransportTarget::Device(path) => write!(f, "file:{}", path.display()),
            TransportTarget::Stdin => write!(f, "stdin"),
        }
    }
}

impl TransportTarget {
    pub async fn connect(&self) -> Result<ByteStream, TransportError> {
        let connect_err = |source: std::io::Error| TransportError::Connect { target: self.to_string(), source };
        match self {
            TransportTarget::Tcp { host, port } => {
                let stream = tokio::net::TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            TransportTarget::Device(path) => {
                let file = tokio::fs::File::open(path).await.map_err(connect_err)?;
                Ok(Box::new(file))
            }
            TransportTarget::Stdin => Ok(Box::new(tokio::io::stdin())),
        }
    }
}
