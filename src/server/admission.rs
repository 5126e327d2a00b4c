//! Per-peer connection cap.
//!
//! The cap counts distinct remote addresses, not sockets. A peer that is
//! already being served is always let in again, so one client opening
//! several sockets cannot be locked out by its own connections.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Default)]
struct Peers {
    active: HashMap<IpAddr, usize>,
}

#[derive(Debug, Clone)]
pub struct Admission {
    max_peers: usize,
    peers: Arc<Mutex<Peers>>,
}

impl Admission {
    /// `max_peers == 0` disables the cap.
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            peers: Arc::new(Mutex::new(Peers::default())),
        }
    }

    /// Admits `ip` unless the cap is reached and `ip` is not already active.
    /// The peer stays active until every returned guard is dropped.
    pub fn try_admit(&self, ip: IpAddr) -> Option<AdmissionGuard> {
        let mut peers = self.peers.lock();
        let known = peers.active.contains_key(&ip);
        if !known && self.max_peers > 0 && peers.active.len() >= self.max_peers {
            return None;
        }

        *peers.active.entry(ip).or_insert(0) += 1;
        trace!(peer = %ip, active = peers.active.len(), "Admitted");
        Some(AdmissionGuard {
            ip,
            peers: self.peers.clone(),
        })
    }

    /// Distinct peers currently being served.
    pub fn active_peers(&self) -> usize {
        self.peers.lock().active.len()
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }
}

/// Releases the peer's slot on drop.
#[derive(Debug)]
pub struct AdmissionGuard {
    ip: IpAddr,
    peers: Arc<Mutex<Peers>>,
}

impl AdmissionGuard {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut peers = self.peers.lock();
        if let Some(count) = peers.active.get_mut(&self.ip) {
            *count -= 1;
            if *count == 0 {
                peers.active.remove(&self.ip);
            }
        }
    }
}
