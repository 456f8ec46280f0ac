//! Admission policy: inbound ceiling, per-IP and per-subnet limits.
//!
//! Peer addresses are stored in IPv6 form in an ordered multimap, so the
//! number of peers inside a prefix block is a range query from the block's
//! network address to its broadcast address.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::config::ListenerConfig;
use crate::domain::{
    broadcast, ip_prefix_len, network, subnetwork_prefix_len, to_ipv6, RejectReason,
};
use crate::ports::Socket;

/// Sockets per peer address.
///
/// Holds weak references only; entries whose socket was dropped or closed
/// are pruned whenever they are counted.
#[derive(Default)]
pub struct AddressRegistry {
    by_address: BTreeMap<Ipv6Addr, Vec<Weak<dyn Socket>>>,
}

impl AddressRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted socket under its peer address.
    pub fn register(&mut self, socket: &Arc<dyn Socket>) {
        let addr = to_ipv6(socket.remote_endpoint().ip());
        self.by_address
            .entry(addr)
            .or_default()
            .push(Arc::downgrade(socket));
    }

    /// Live sockets from the same IP (IPv4 exact, IPv6 by /48).
    pub fn count_ip(&mut self, ip: IpAddr) -> usize {
        let addr = to_ipv6(ip);
        self.count_block(addr, ip_prefix_len(&addr))
    }

    /// Live sockets from the same subnetwork (IPv4 /24, IPv6 /32).
    pub fn count_subnetwork(&mut self, ip: IpAddr) -> usize {
        let addr = to_ipv6(ip);
        self.count_block(addr, subnetwork_prefix_len(&addr))
    }

    fn count_block(&mut self, addr: Ipv6Addr, prefix_len: u8) -> usize {
        let first = network(addr, prefix_len);
        let last = broadcast(addr, prefix_len);

        let mut count = 0;
        let mut emptied = Vec::new();
        for (key, sockets) in self.by_address.range_mut(first..=last) {
            sockets.retain(is_live);
            if sockets.is_empty() {
                emptied.push(*key);
            }
            count += sockets.len();
        }
        for key in emptied {
            self.by_address.remove(&key);
        }
        count
    }

    /// Drop entries whose socket is gone or closed.
    pub fn evict_closed(&mut self) {
        self.by_address.retain(|_, sockets| {
            sockets.retain(is_live);
            !sockets.is_empty()
        });
    }

    /// Entries held, live or not.
    pub fn len(&self) -> usize {
        self.by_address.values().map(Vec::len).sum()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.by_address.clear();
    }

    /// Run the admission checks for a new peer, in order: inbound
    /// ceiling, per-IP limit, per-subnet limit.
    pub fn check(
        &mut self,
        config: &ListenerConfig,
        connection_count: usize,
        remote: IpAddr,
    ) -> Result<(), RejectReason> {
        if connection_count >= config.max_inbound_connections {
            return Err(RejectReason::MaxInbound);
        }

        if !config.disable_max_peers_per_ip {
            let count = self.count_ip(remote);
            if count >= config.max_peers_per_ip {
                debug!(remote = %remote, count, "Per-IP limit reached");
                return Err(RejectReason::MaxPerIp);
            }
        }

        if !config.disable_max_peers_per_subnetwork {
            let count = self.count_subnetwork(remote);
            if count >= config.max_peers_per_subnetwork {
                debug!(remote = %remote, count, "Per-subnetwork limit reached");
                return Err(RejectReason::MaxPerSubnetwork);
            }
        }

        Ok(())
    }
}

fn is_live(socket: &Weak<dyn Socket>) -> bool {
    socket.upgrade().is_some_and(|s| !s.is_closed())
}
