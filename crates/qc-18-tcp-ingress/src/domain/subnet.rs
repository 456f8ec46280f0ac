//! Address normalisation for per-IP and per-subnet admission limits.
//!
//! All addresses are handled in IPv6 form; IPv4 peers appear as
//! v4-mapped addresses (`::ffff:a.b.c.d`).
//!
//! | limit      | IPv4          | IPv6  |
//! |------------|---------------|-------|
//! | per-IP     | exact address | /48   |
//! | per-subnet | /24           | /32   |

use std::net::{IpAddr, Ipv6Addr};

/// Prefix grouping IPv6 addresses for the per-IP limit.
pub const IPV6_IP_PREFIX: u8 = 48;
/// Prefix grouping IPv6 addresses for the per-subnet limit.
pub const IPV6_SUBNETWORK_PREFIX: u8 = 32;
/// Prefix grouping IPv4 addresses for the per-subnet limit.
pub const IPV4_SUBNETWORK_PREFIX: u8 = 24;

/// Bits taken by the `::ffff:0:0/96` prefix of a v4-mapped address.
const V4_MAPPED_PREFIX: u8 = 96;

/// Normalise any IP to IPv6, mapping IPv4 into `::ffff:0:0/96`.
pub fn to_ipv6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// True for `::ffff:a.b.c.d`.
pub fn is_v4_mapped(addr: &Ipv6Addr) -> bool {
    addr.to_ipv4_mapped().is_some()
}

/// Network address of `addr` under a prefix of `prefix_len` bits.
pub fn network(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(addr) & prefix_mask(prefix_len))
}

/// Last address of the block `addr/prefix_len`.
pub fn broadcast(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(addr) | !prefix_mask(prefix_len))
}

fn prefix_mask(prefix_len: u8) -> u128 {
    match prefix_len.min(128) {
        0 => 0,
        bits => u128::MAX << (128 - u32::from(bits)),
    }
}

/// Key counted by the per-IP limit: an IPv4 address as-is, an IPv6
/// address by its /48.
pub fn ipv4_address_or_ipv6_subnet(ip: IpAddr) -> Ipv6Addr {
    let addr = to_ipv6(ip);
    if is_v4_mapped(&addr) {
        addr
    } else {
        network(addr, IPV6_IP_PREFIX)
    }
}

/// Prefix length used for the per-IP limit of `addr`.
pub fn ip_prefix_len(addr: &Ipv6Addr) -> u8 {
    if is_v4_mapped(addr) {
        128
    } else {
        IPV6_IP_PREFIX
    }
}

/// Enclosing subnetwork: IPv4 /24, IPv6 /32.
pub fn map_address_to_subnetwork(ip: IpAddr) -> Ipv6Addr {
    let addr = to_ipv6(ip);
    network(addr, subnetwork_prefix_len(&addr))
}

/// Prefix length used for the per-subnet limit of `addr`.
pub fn subnetwork_prefix_len(addr: &Ipv6Addr) -> u8 {
    if is_v4_mapped(addr) {
        V4_MAPPED_PREFIX + IPV4_SUBNETWORK_PREFIX
    } else {
        IPV6_SUBNETWORK_PREFIX
    }
}
