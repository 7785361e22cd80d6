use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyError, PublicKey};

/// How to reach a node: its id plus any direct socket addresses
///
/// Text form is `<node id hex>` or `<node id hex>@<ip:port>[,<ip:port>...]`.
/// Without addresses the transport falls back to discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub id: PublicKey,
    pub addrs: Vec<SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum PeerAddrError {
    #[error("invalid node id: {0}")]
    Id(#[from] KeyError),
    #[error("invalid socket address {0:?}")]
    Socket(String),
}

impl PeerAddr {
    pub fn new(id: PublicKey) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }

    pub fn with_addrs(id: PublicKey, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            id,
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Fold in addresses learned elsewhere, keeping order and dropping repeats
    pub fn merge(&mut self, other: &PeerAddr) {
        for addr in &other.addrs {
            if !self.addrs.contains(addr) {
                self.addrs.push(*addr);
            }
        }
    }
}

impl From<PublicKey> for PeerAddr {
    fn from(id: PublicKey) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            let sep = if i == 0 { '@' } else { ',' };
            write!(f, "{}{}", sep, addr)?;
        }
        Ok(())
    }
}

impl FromStr for PeerAddr {
    type Err = PeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (id, addrs) = match s.split_once('@') {
            Some((id, addrs)) => (id, Some(addrs)),
            None => (s, None),
        };
        let id = PublicKey::from_hex(id)?;
        let addrs = addrs
            .map(|list| {
                list.split(',')
                    .map(|a| {
                        a.trim()
                            .parse::<SocketAddr>()
                            .map_err(|_| PeerAddrError::Socket(a.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(Self { id, addrs })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_parse_and_display() {
        let id = SecretKey::generate().unwrap().public();

        let bare: PeerAddr = id.to_hex().parse().unwrap();
        assert_eq!(bare, PeerAddr::new(id));
        assert_eq!(bare.to_string(), id.to_hex());

        let text = format!("{}@127.0.0.1:1717,[::1]:1718", id);
        let addr: PeerAddr = text.parse().unwrap();
        assert_eq!(addr.addrs.len(), 2);
        assert_eq!(addr.to_string(), text);
    }

    #[test]
    fn test_parse_errors() {
        let id = SecretKey::generate().unwrap().public();
        assert!("nothex@127.0.0.1:1".parse::<PeerAddr>().is_err());
        assert!(format!("{}@localhost", id).parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_merge() {
        let id = SecretKey::generate().unwrap().public();
        let a: SocketAddr = "10.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1".parse().unwrap();
        let mut left = PeerAddr::with_addrs(id, [a]);
        left.merge(&PeerAddr::with_addrs(id, [a, b]));
        assert_eq!(left.addrs, vec![a, b]);
    }
}
