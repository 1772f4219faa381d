// PinTrust benchmarks using criterion.
//
// Measures:
//   - certificate fingerprinting under each registry digest
//   - fingerprint parse / render
//   - AEAD record sealing at various payload sizes
//   - full in-memory handshake latency

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use pintrust::crypto::aead::{AeadKey, CipherSuite};
use pintrust::handshake::{Handshake, HandshakeConfig, Role};
use pintrust::identity::{Certificate, Identity};
use pintrust::{DigestAlgorithm, Fingerprint};

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

fn bench_fingerprint(c: &mut Criterion) {
    let id = Identity::generate("bench").unwrap();

    let mut group = c.benchmark_group("certificate_fingerprint");
    for alg in DigestAlgorithm::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(alg.name()), &alg, |b, &alg| {
            b.iter(|| black_box(Fingerprint::from_identity(alg, black_box(&id))));
        });
    }
    group.finish();

    let rendered = Fingerprint::from_identity(DigestAlgorithm::Sha256, &id).to_string();
    c.bench_function("fingerprint_parse", |b| {
        b.iter(|| black_box(black_box(rendered.as_str()).parse::<Fingerprint>().unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Record sealing
// ---------------------------------------------------------------------------

fn bench_aead(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 16 * 1024];
    for suite in CipherSuite::ALL {
        let key = AeadKey::new(suite, &[0x42u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let mut group = c.benchmark_group(format!("seal_{suite:?}"));
        for &size in sizes {
            let plaintext = vec![0xABu8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{size}B")),
                &plaintext,
                |b, pt| {
                    b.iter(|| black_box(key.encrypt(&nonce, black_box(pt), b"").unwrap()));
                },
            );
        }
        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Full handshake latency
// ---------------------------------------------------------------------------

fn bench_full_handshake(c: &mut Criterion) {
    let server_identity = Identity::generate("server").unwrap();
    let client_identity = Identity::generate("client").unwrap();

    c.bench_function("full_handshake_mutual", |b| {
        b.iter(|| {
            let mut client_cfg = HandshakeConfig::new(Role::Client);
            client_cfg.identity = Some(client_identity.clone());
            let mut server_cfg = HandshakeConfig::new(Role::Server);
            server_cfg.identity = Some(server_identity.clone());
            server_cfg.require_client_certificate = true;

            let mut client = Handshake::new(client_cfg).unwrap();
            let mut server = Handshake::new(server_cfg).unwrap();
            let mut accept = |_: &Certificate, _: usize| true;

            let mut to_server = client.start().unwrap();
            server.start().unwrap();
            while !to_server.is_empty() {
                let mut to_client = Vec::new();
                for msg in to_server.drain(..) {
                    to_client.extend(server.handle_message(msg, &mut accept).unwrap());
                }
                for msg in to_client {
                    to_server.extend(client.handle_message(msg, &mut accept).unwrap());
                }
            }
            black_box(server.is_complete());
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group! {
    name = crypto_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_fingerprint,
        bench_aead,
        bench_full_handshake
}

criterion_main!(crypto_benches);
