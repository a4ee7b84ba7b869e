//! Candidate addresses for one endpoint.
//!
//! An endpoint is reachable at any of several candidates (LAN address,
//! public address, alternate port). Until one is confirmed by a received
//! packet, writes go to every candidate. No acknowledgement, no retry.

use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Ordered candidate addresses plus the one known to work, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    candidates: Vec<SocketAddr>,
    confirmed: Option<SocketAddr>,
}

impl AddressSet {
    pub fn new(candidates: Vec<SocketAddr>) -> Self {
        Self {
            candidates,
            confirmed: None,
        }
    }

    pub fn candidates(&self) -> &[SocketAddr] {
        &self.candidates
    }

    pub fn confirmed(&self) -> Option<SocketAddr> {
        self.confirmed
    }

    pub fn confirm(&mut self, addr: SocketAddr) {
        let addr = canonical(addr);
        if self.confirmed != Some(addr) {
            debug!("confirmed address {}", addr);
            self.confirmed = Some(addr);
        }
    }

    /// Bind a socket to the first candidate that accepts it.
    ///
    /// The winning candidate becomes the confirmed address.
    pub async fn bind(&mut self) -> Result<UdpSocket, TransportError> {
        let mut last_error = None;

        for candidate in &self.candidates {
            info!("binding to {}", candidate);
            match UdpSocket::bind(*candidate).await {
                Ok(socket) => {
                    self.confirmed = Some(*candidate);
                    return Ok(socket);
                }
                Err(e) => {
                    warn!("bind to {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(source) => Err(TransportError::Bind {
                attempts: self.candidates.len(),
                source,
            }),
            None => Err(TransportError::NoCandidates),
        }
    }

    /// Where outbound packets go: the confirmed address, or every candidate.
    pub fn targets(&self) -> Vec<SocketAddr> {
        match self.confirmed {
            Some(addr) => vec![addr],
            None => self.candidates.clone(),
        }
    }

    /// Send `bytes` to every target. Returns how many sends succeeded.
    pub async fn write(&self, socket: &UdpSocket, bytes: &[u8]) -> usize {
        let mut sent = 0;
        for target in self.targets() {
            match socket.send_to(bytes, target).await {
                Ok(_) => sent += 1,
                Err(e) => warn!("send to {} failed: {}", target, e),
            }
        }
        sent
    }

    /// Non-blocking [`write`](Self::write) for real-time callers.
    ///
    /// A full socket buffer counts as a failed send for that target.
    pub fn try_write(&self, socket: &UdpSocket, bytes: &[u8]) -> usize {
        let mut sent = 0;
        for target in self.targets() {
            match socket.try_send_to(bytes, target) {
                Ok(_) => sent += 1,
                Err(e) => debug!("try_send to {} failed: {}", target, e),
            }
        }
        sent
    }

    /// True if `addr` is one of the candidates.
    pub fn matches(&self, addr: SocketAddr) -> bool {
        let addr = canonical(addr);
        self.candidates.iter().any(|c| canonical(*c) == addr)
    }

    /// True if `addr` is a candidate or the confirmed address.
    pub fn recognizes(&self, addr: SocketAddr) -> bool {
        self.matches(addr) || self.confirmed == Some(canonical(addr))
    }
}

/// Fold IPv4-mapped IPv6 addresses onto plain IPv4.
pub fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), addr.port()),
            None => addr,
        },
        IpAddr::V4(_) => addr,
    }
}
