//! Host cache, dispatcher and cache-hit resolve benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hostresolver::base::dispatcher::{Dispatch, Limits, PrioritizedDispatcher};
use hostresolver::base::priority::RequestPriority;
use hostresolver::dns::{
    AddressFamily, AddressList, CacheEntry, HostCache, HostPortPair, HostResolver,
    HostResolverConfig, HostResolverFlags, RequestInfo, ResolutionKey,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;

fn key(i: usize) -> ResolutionKey {
    ResolutionKey::new(
        format!("host{}.example.com", i),
        AddressFamily::Unspecified,
        HostResolverFlags::empty(),
    )
}

fn entry(i: usize) -> CacheEntry {
    let ip = IpAddr::V4(Ipv4Addr::new(10, 0, (i >> 8) as u8, i as u8));
    CacheEntry::new(Ok(AddressList::from_ip(ip, 0)), Duration::from_secs(60))
}

fn host_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_cache_lookup");
    for size in [100, 1000] {
        let now = Instant::now();
        let mut cache = HostCache::new(size);
        for i in 0..size {
            cache.set(key(i), entry(i), now, Duration::from_secs(60));
        }
        let hit = key(size / 2);
        let miss = key(size + 1);
        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, _| {
            b.iter(|| cache.lookup(&hit, now).is_some())
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| cache.lookup(&miss, now).is_some())
        });
    }
    group.finish();
}

fn host_cache_insert_full(c: &mut Criterion) {
    c.bench_function("host_cache_insert_evicting", |b| {
        let now = Instant::now();
        let mut cache = HostCache::new(1000);
        for i in 0..1000 {
            cache.set(key(i), entry(i), now, Duration::from_secs(60 + i as u64));
        }
        let mut next = 1000;
        b.iter(|| {
            cache.set(key(next), entry(next), now, Duration::from_secs(60));
            next += 1;
        })
    });
}

fn dispatcher_churn(c: &mut Criterion) {
    c.bench_function("dispatcher_add_finish", |b| {
        let mut dispatcher = PrioritizedDispatcher::new(Limits::new(6));
        let mut n = 0usize;
        b.iter(|| {
            let priority = RequestPriority::ALL[n % RequestPriority::ALL.len()];
            if let Dispatch::Queued(_) = dispatcher.add(n, priority) {
                dispatcher.on_job_finished();
            }
            n += 1;
        })
    });
}

fn resolve_cache_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolver = rt.block_on(async {
        HostResolver::builder()
            .config(HostResolverConfig::new().ipv6_probe(false))
            .build()
    });

    c.bench_function("resolve_localhost", |b| {
        b.to_async(&rt).iter(|| async {
            let info = RequestInfo::new(HostPortPair::new("localhost", 80));
            resolver
                .resolve(info, RequestPriority::Medium)
                .await
                .into_result()
                .await
        })
    });

    c.bench_function("resolve_ip_literal", |b| {
        b.to_async(&rt).iter(|| async {
            let info = RequestInfo::new(HostPortPair::new("192.0.2.1", 443));
            resolver.resolve_from_cache(info).await
        })
    });
}

criterion_group!(
    benches,
    host_cache_lookup,
    host_cache_insert_full,
    dispatcher_churn,
    resolve_cache_hit
);
criterion_main!(benches);
