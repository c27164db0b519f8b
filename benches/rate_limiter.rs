use criterion::{black_box, criterion_group, criterion_main, Criterion};
use security_core::events::SecurityRequest;
use security_core::rate_limiter::{strategy, RateLimitConfig, RateLimitStrategy, RateLimiter};
use security_core::validation::patterns;
use std::time::Duration;

/// Pure quota arithmetic for each strategy
fn bench_strategies(c: &mut Criterion) {
    for kind in [
        RateLimitStrategy::FixedWindow,
        RateLimitStrategy::SlidingWindow,
        RateLimitStrategy::TokenBucket,
        RateLimitStrategy::LeakyBucket,
    ] {
        c.bench_function(&format!("apply_{}", kind), |b| {
            let mut now_ms = 1_700_000_000_000i64;
            let mut entry = None;
            b.iter(|| {
                now_ms += 7;
                let (next, verdict) = strategy::apply(kind, entry, black_box(now_ms), 100, 60_000);
                entry = Some(next);
                verdict
            })
        });
    }
}

/// Full limiter check including key derivation and the DashMap store
fn bench_check_limit(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime");
    let limiter = RateLimiter::new(RateLimitConfig {
        max_requests: u32::MAX,
        window_duration: Duration::from_secs(60),
        strategy: RateLimitStrategy::SlidingWindow,
        ..Default::default()
    });

    let requests: Vec<SecurityRequest> = (0..256)
        .map(|i| SecurityRequest::new("GET", "/api/items", format!("10.0.{}.{}", i / 16, i % 16)))
        .collect();

    c.bench_function("check_limit_256_identities", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % requests.len();
            runtime.block_on(limiter.check_limit(black_box(&requests[i])))
        })
    });
}

/// Attack-pattern scan over benign and hostile input
fn bench_scan(c: &mut Criterion) {
    let benign = "Quarterly report: revenue grew 12% while costs stayed flat. See section 4.";
    let hostile = "name=x' OR '1'='1; <script>alert(1)</script> ../../etc/passwd; rm -rf /";

    c.bench_function("scan_benign", |b| b.iter(|| patterns::scan(black_box(benign))));
    c.bench_function("scan_hostile", |b| b.iter(|| patterns::scan(black_box(hostile))));
}

criterion_group!(benches, bench_strategies, bench_check_limit, bench_scan);
criterion_main!(benches);
