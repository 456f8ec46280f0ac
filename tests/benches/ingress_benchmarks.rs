//! # Quantum-Chain TCP Ingress Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | Subnetwork mapping | < 50ns |
//! | Admission check, 2047 live peers | < 100µs |
//! | Syn-cookie query / sign / verify | < 200µs |

use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn ingress(c: &mut Criterion) {
    qc_tests::benchmarks::qc_18_tcp_ingress::register_benchmarks(c);
}

criterion_group!(
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(2));
    targets = ingress
);
criterion_main!(benches);
