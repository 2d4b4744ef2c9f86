//! Performance benchmarks for fingerprinting

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stratum_fingerprint::features::subband::SubbandAnalyzer;
use stratum_fingerprint::io::pcm::encode_samples;
use stratum_fingerprint::preprocessing::whitening::{Whitening, WhiteningConfig};
use stratum_fingerprint::{fingerprint_pcm, FingerprintConfig};

/// 30 seconds at 11025 Hz: a 440 Hz tone with a click every half second
fn synthetic_audio() -> Vec<i16> {
    (0..11025 * 30)
        .map(|i| {
            let tone = (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 11025.0).sin() * 8000.0;
            let click = if i % 5512 < 64 { 12000.0 } else { 0.0 };
            (tone + click) as i16
        })
        .collect()
}

fn bench_whitening(c: &mut Criterion) {
    let samples = synthetic_audio();
    c.bench_function("whitening_30s", |b| {
        b.iter(|| {
            let mut whitening = Whitening::new(WhiteningConfig::default()).unwrap();
            black_box(whitening.process(black_box(&samples)))
        });
    });
}

fn bench_subband(c: &mut Criterion) {
    let samples = synthetic_audio();
    let analyzer = SubbandAnalyzer::new();
    c.bench_function("subband_30s", |b| {
        b.iter(|| black_box(analyzer.analyze(black_box(&samples))))
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    let pcm = encode_samples(&synthetic_audio());
    let config = FingerprintConfig::default();
    c.bench_function("fingerprint_pcm_30s", |b| {
        b.iter(|| black_box(fingerprint_pcm(black_box(&pcm), black_box(&config))));
    });
}

criterion_group!(benches, bench_whitening, bench_subband, bench_fingerprint);
criterion_main!(benches);
