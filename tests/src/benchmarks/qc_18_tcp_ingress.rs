//! # QC-18 TCP Ingress Benchmarks
//!
//! Hot paths on every accepted socket:
//! - Subnetwork mapping of the remote address
//! - Admission check against a full address registry
//! - Syn-cookie query / sign / verify cycle
//!
//! Brutal Conditions:
//! - Registry at the inbound ceiling, clustered in one /24
//! - IPv6 peers spread across a single /32

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use qc_18_tcp_ingress::service::AddressRegistry;
use qc_18_tcp_ingress::testing::MockSocket;
use qc_18_tcp_ingress::{
    map_address_to_subnetwork, HandshakeAuthority, ListenerConfig, Socket, SynCookieAuthority,
};

fn clustered_v4(count: usize) -> Vec<Arc<dyn Socket>> {
    (0..count)
        .map(|i| {
            let ip = Ipv4Addr::new(203, 0, 113, (i % 250) as u8 + 1);
            let socket: Arc<dyn Socket> = MockSocket::new(SocketAddr::new(ip.into(), 7075));
            socket
        })
        .collect()
}

fn spread_v6(count: usize) -> Vec<Arc<dyn Socket>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let ip = Ipv6Addr::new(0x2001, 0x0db8, rng.gen(), rng.gen(), 0, 0, 0, 1);
            let socket: Arc<dyn Socket> = MockSocket::new(SocketAddr::new(ip.into(), 7075));
            socket
        })
        .collect()
}

pub fn brutal_subnetwork_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18/brutal/subnetwork_mapping");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("ipv4", |b| {
        let ip = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));
        b.iter(|| black_box(map_address_to_subnetwork(black_box(ip))))
    });

    group.bench_function("ipv6", |b| {
        let ip = IpAddr::V6(Ipv6Addr::new(0x2001, 0x0db8, 0xbeef, 1, 2, 3, 4, 5));
        b.iter(|| black_box(map_address_to_subnetwork(black_box(ip))))
    });

    group.finish();
}

pub fn brutal_admission_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18/brutal/admission");
    group.measurement_time(Duration::from_secs(10));

    let config = ListenerConfig {
        disable_max_peers_per_ip: true,
        max_peers_per_subnetwork: usize::MAX,
        ..ListenerConfig::default()
    };

    for size in [64usize, 512, 2047] {
        group.throughput(Throughput::Elements(size as u64));

        let v4 = clustered_v4(size);
        let mut registry = AddressRegistry::new();
        v4.iter().for_each(|socket| registry.register(socket));
        let remote = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 200));
        group.bench_with_input(BenchmarkId::new("clustered_v4", size), &size, |b, &size| {
            b.iter(|| black_box(registry.check(&config, size, remote)))
        });

        let v6 = spread_v6(size);
        let mut registry = AddressRegistry::new();
        v6.iter().for_each(|socket| registry.register(socket));
        let remote = IpAddr::V6(Ipv6Addr::new(0x2001, 0x0db8, 1, 2, 0, 0, 0, 9));
        group.bench_with_input(BenchmarkId::new("spread_v6", size), &size, |b, &size| {
            b.iter(|| black_box(registry.check(&config, size, remote)))
        });
    }

    group.finish();
}

pub fn brutal_syn_cookie_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18/brutal/syn_cookies");
    group.measurement_time(Duration::from_secs(10));

    let genesis = [0x5A; 32];
    let local = SynCookieAuthority::generate(genesis);
    let peer = SynCookieAuthority::generate(genesis);
    let remote = SocketAddr::from(([192, 0, 2, 1], 7075));

    for v2 in [false, true] {
        let name = if v2 { "query_sign_verify_v2" } else { "query_sign_verify" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let query = local.prepare_query(remote);
                let verified = query
                    .and_then(|query| peer.prepare_response(&query, v2).ok())
                    .map(|response| local.verify_response(&response, remote).is_ok());
                black_box(verified)
            })
        });
    }

    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_subnetwork_mapping(c);
    brutal_admission_check(c);
    brutal_syn_cookie_cycle(c);
}
