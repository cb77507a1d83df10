//! DNS client path tests
//!
//! Covers:
//! - A/AAAA transactions, merging and slot handling
//! - Fallback to the system resolver and the failure threshold
//! - DNS config changes, client replacement and runtime settings
//! - Snapshot persistence

mod common;

use common::*;
use hostresolver::base::neterror::NetError;
use hostresolver::base::priority::RequestPriority;
use hostresolver::dns::{
    AddressFamily, DnsHosts, DnsRecordType, HostResolver, HostResolverConfig, HostResolverFlags,
    HostResolverProc, Name, Resolution, ResolutionSource, Resolve, ResolveRequest,
    ResolverSettings, ResolverSnapshot, MAXIMUM_DNS_FAILURES,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const TTL: Duration = Duration::from_secs(300);

fn config() -> HostResolverConfig {
    HostResolverConfig::new().ipv6_probe(false)
}

fn dns_resolver(
    client: Arc<MockDnsClient>,
    proc: Arc<dyn HostResolverProc>,
    config: HostResolverConfig,
) -> HostResolver {
    HostResolver::builder()
        .config(config)
        .system_resolver(proc)
        .dns_client(client)
        .dns_config(valid_dns_config())
        .build()
}

fn pending(resolution: Resolution) -> ResolveRequest {
    match resolution {
        Resolution::Pending(request) => request,
        Resolution::Complete(result) => panic!("expected a pending request, got {:?}", result),
    }
}

fn ipv4(host: &str) -> hostresolver::dns::RequestInfo {
    info(host, 80).address_family(AddressFamily::Ipv4)
}

#[tokio::test]
async fn test_dual_stack_answers_are_merged() {
    let client = Arc::new(MockDnsClient::new());
    client.answer("www.example.com", DnsRecordType::A, &[v4(1, 2, 3, 4)], TTL);
    client.answer("www.example.com", DnsRecordType::Aaaa, &[v6("2001:db8::1")], Duration::from_secs(120));
    let proc = Arc::new(StaticProc::new());
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    let list = pending(resolver.resolve(info("www.example.com", 443), RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(ips(&list), vec![v6("2001:db8::1"), v4(1, 2, 3, 4)]);
    assert!(list.iter().all(|a| a.port() == 443));
    assert_eq!(
        client.transactions(),
        vec![
            ("www.example.com".to_string(), DnsRecordType::A),
            ("www.example.com".to_string(), DnsRecordType::Aaaa),
        ]
    );
    assert_eq!(proc.num_calls(), 0);
    assert!(resolver.resolve_from_cache(info("www.example.com", 80)).await.is_ok());
}

#[tokio::test]
async fn test_dual_stack_with_a_single_slot() {
    let client = Arc::new(MockDnsClient::new());
    client.answer("www.example.com", DnsRecordType::A, &[v4(1, 2, 3, 4)], TTL);
    client.answer("www.example.com", DnsRecordType::Aaaa, &[v6("2001:db8::1")], TTL);
    let resolver = dns_resolver(
        client.clone(),
        Arc::new(StaticProc::new()),
        config().max_concurrent_resolves(1),
    );

    let list = pending(resolver.resolve(info("www.example.com", 80), RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(client.num_transactions(), 2);

    let stats = resolver.stats().await.unwrap();
    assert_eq!(stats.num_running_jobs, 0);
    assert_eq!(stats.num_queued_jobs, 0);
}

#[tokio::test]
async fn test_single_family_uses_one_transaction() {
    let client = Arc::new(MockDnsClient::new());
    client.answer("v6.example.com", DnsRecordType::Aaaa, &[v6("2001:db8::9")], TTL);
    let resolver = dns_resolver(client.clone(), Arc::new(StaticProc::new()), config());

    let request = info("v6.example.com", 80).address_family(AddressFamily::Ipv6);
    let list = pending(resolver.resolve(request, RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(ips(&list), vec![v6("2001:db8::9")]);
    assert_eq!(
        client.transactions(),
        vec![("v6.example.com".to_string(), DnsRecordType::Aaaa)]
    );
}

#[tokio::test]
async fn test_dns_failure_falls_back_to_system_resolver() {
    let client = Arc::new(MockDnsClient::new());
    client.fail("www.example.com", DnsRecordType::A, NetError::DnsServerFailed);
    let proc = Arc::new(StaticProc::new().with("www.example.com", &[v4(10, 0, 0, 7)]));
    let resolver = dns_resolver(client, proc.clone(), config());

    let list = pending(resolver.resolve(ipv4("www.example.com"), RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(ips(&list), vec![v4(10, 0, 0, 7)]);
    assert_eq!(proc.num_calls(), 1);
}

#[tokio::test]
async fn test_dns_failure_without_fallback() {
    let client = Arc::new(MockDnsClient::new());
    client.fail("www.example.com", DnsRecordType::A, NetError::DnsServerFailed);
    let proc = Arc::new(StaticProc::new().with("www.example.com", &[v4(10, 0, 0, 7)]));
    let mut config = config();
    config.settings.fallback_to_proc = false;
    let resolver = dns_resolver(client, proc.clone(), config);

    let result = pending(resolver.resolve(ipv4("www.example.com"), RequestPriority::Medium).await).await;
    assert_eq!(result, Err(NetError::DnsServerFailed));
    assert_eq!(proc.num_calls(), 0);
}

#[tokio::test]
async fn test_icann_name_collision() {
    let client = Arc::new(MockDnsClient::new());
    client.answer("corp.example", DnsRecordType::A, &[v4(127, 0, 53, 53)], TTL);
    let resolver = dns_resolver(client, Arc::new(StaticProc::new()), config());

    let result = pending(resolver.resolve(ipv4("corp.example"), RequestPriority::Medium).await).await;
    assert_eq!(result, Err(NetError::IcannNameCollision));
    assert_eq!(
        resolver.resolve_from_cache(ipv4("corp.example")).await,
        Err(NetError::DnsCacheMiss)
    );
}

#[tokio::test]
async fn test_system_only_and_mdns_names_skip_dns() {
    let client = Arc::new(MockDnsClient::new());
    let proc = Arc::new(
        StaticProc::new()
            .with("www.example.com", &[v4(10, 0, 0, 1)])
            .with("printer.local", &[v4(10, 0, 0, 2)]),
    );
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    let system_only = info("www.example.com", 80).flags(HostResolverFlags::SYSTEM_ONLY);
    pending(resolver.resolve(system_only, RequestPriority::Medium).await)
        .await
        .unwrap();
    pending(resolver.resolve(info("printer.local", 80), RequestPriority::Medium).await)
        .await
        .unwrap();

    assert_eq!(client.num_transactions(), 0);
    assert_eq!(proc.num_calls(), 2);
}

#[tokio::test]
async fn test_repeated_rescued_failures_disable_dns() {
    let client = Arc::new(MockDnsClient::new());
    let proc = StaticProc::new();
    let total = MAXIMUM_DNS_FAILURES as usize + 1;
    for i in 0..total {
        let host = format!("host{}.example.com", i);
        client.fail(&host, DnsRecordType::A, NetError::NameNotResolved);
        proc.set(&host, Ok(hostresolver::dns::AddressList::from_ip(v4(10, 0, 1, i as u8), 0)));
    }
    let proc = Arc::new(proc);
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    for i in 0..MAXIMUM_DNS_FAILURES as usize {
        assert!(resolver.stats().await.unwrap().dns_client_enabled);
        let host = format!("host{}.example.com", i);
        pending(resolver.resolve(ipv4(&host), RequestPriority::Medium).await)
            .await
            .unwrap();
    }
    assert!(!resolver.stats().await.unwrap().dns_client_enabled);

    let last = format!("host{}.example.com", total - 1);
    pending(resolver.resolve(ipv4(&last), RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(client.num_transactions(), MAXIMUM_DNS_FAILURES as usize);
    assert_eq!(proc.num_calls(), total);

    // A new config gives the DNS client another chance.
    resolver.on_dns_config_changed(Some(valid_dns_config()));
    assert!(resolver.stats().await.unwrap().dns_client_enabled);
}

#[tokio::test]
async fn test_dns_success_resets_failure_count() {
    let client = Arc::new(MockDnsClient::new());
    let proc = StaticProc::new();
    for i in 0..MAXIMUM_DNS_FAILURES as usize {
        let host = format!("host{}.example.com", i);
        client.fail(&host, DnsRecordType::A, NetError::NameNotResolved);
        proc.set(&host, Ok(hostresolver::dns::AddressList::from_ip(v4(10, 0, 2, 1), 0)));
    }
    client.answer("good.example.com", DnsRecordType::A, &[v4(1, 1, 1, 1)], TTL);
    let resolver = dns_resolver(client, Arc::new(proc), config());

    for i in 0..MAXIMUM_DNS_FAILURES as usize {
        if i == 8 {
            pending(resolver.resolve(ipv4("good.example.com"), RequestPriority::Medium).await)
                .await
                .unwrap();
        }
        let host = format!("host{}.example.com", i);
        pending(resolver.resolve(ipv4(&host), RequestPriority::Medium).await)
            .await
            .unwrap();
    }
    assert!(resolver.stats().await.unwrap().dns_client_enabled);
}

#[tokio::test]
async fn test_dns_config_change_restarts_dns_tasks() {
    let client = Arc::new(MockDnsClient::new());
    let resolver = dns_resolver(client.clone(), Arc::new(StaticProc::new()), config());

    let request = pending(resolver.resolve(ipv4("slow.example.com"), RequestPriority::Medium).await);
    // Jobs start after the reply goes out; a round trip makes sure it has.
    resolver.stats().await.unwrap();
    assert_eq!(client.num_transactions(), 1);

    client.answer("slow.example.com", DnsRecordType::A, &[v4(5, 6, 7, 8)], TTL);
    resolver.on_dns_config_changed(Some(valid_dns_config()));

    let list = request.await.unwrap();
    assert_eq!(ips(&list), vec![v4(5, 6, 7, 8)]);
    assert_eq!(client.num_transactions(), 2);
    assert_eq!(client.num_config_changes(), 2);
}

#[tokio::test]
async fn test_dns_config_change_aborts_system_jobs() {
    let proc = Arc::new(GatedProc::new());
    let resolver = HostResolver::builder()
        .config(config())
        .system_resolver(proc.clone())
        .build();

    let request = pending(resolver.resolve(info("www.example.com", 80), RequestPriority::Medium).await);
    resolver.on_dns_config_changed(Some(valid_dns_config()));
    assert_eq!(request.await, Err(NetError::NetworkChanged));
    proc.release_all();
}

#[tokio::test]
async fn test_dns_config_change_serves_jobs_from_new_hosts() {
    let proc = Arc::new(GatedProc::new());
    let resolver = HostResolver::builder()
        .config(config().max_concurrent_resolves(1))
        .system_resolver(proc.clone())
        .build();

    let running = pending(resolver.resolve(info("a.example.com", 80), RequestPriority::Medium).await);
    let queued = pending(resolver.resolve(info("nas.lan", 445), RequestPriority::Medium).await);

    let mut hosts = DnsHosts::new();
    hosts.insert("nas.lan", v4(10, 1, 1, 1));
    resolver.on_dns_config_changed(Some(valid_dns_config().hosts(hosts)));

    assert_eq!(running.await, Err(NetError::NetworkChanged));
    let list = queued.await.unwrap();
    assert_eq!(ips(&list), vec![v4(10, 1, 1, 1)]);
    assert_eq!(list.first().unwrap().port(), 445);
    assert_eq!(resolver.stats().await.unwrap().num_jobs, 0);
    proc.release_all();
}

#[tokio::test]
async fn test_removing_dns_client_moves_jobs_to_system_resolver() {
    let client = Arc::new(MockDnsClient::new());
    let proc = Arc::new(StaticProc::new().with("slow.example.com", &[v4(10, 0, 0, 3)]));
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    let request = pending(resolver.resolve(ipv4("slow.example.com"), RequestPriority::Medium).await);
    resolver.set_dns_client(None);

    let list = request.await.unwrap();
    assert_eq!(ips(&list), vec![v4(10, 0, 0, 3)]);
    assert_eq!(client.num_transactions(), 1);
    assert!(!resolver.stats().await.unwrap().dns_client_enabled);
}

#[tokio::test]
async fn test_disabling_dns_in_settings_moves_jobs_to_system_resolver() {
    let client = Arc::new(MockDnsClient::new());
    let proc = Arc::new(StaticProc::new().with("slow.example.com", &[v4(10, 0, 0, 4)]));
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    let request = pending(resolver.resolve(ipv4("slow.example.com"), RequestPriority::Medium).await);
    resolver.update_config(ResolverSettings {
        dns_client_enabled: false,
        ..ResolverSettings::default()
    });

    assert_eq!(ips(&request.await.unwrap()), vec![v4(10, 0, 0, 4)]);
    assert_eq!(proc.num_calls(), 1);
}

#[tokio::test]
async fn test_invalid_config_disables_dns() {
    let client = Arc::new(MockDnsClient::new());
    let proc = Arc::new(StaticProc::new().with("www.example.com", &[v4(10, 0, 0, 5)]));
    let resolver = dns_resolver(client.clone(), proc.clone(), config());

    resolver.on_dns_config_changed(None);
    assert!(!resolver.stats().await.unwrap().dns_client_enabled);
    pending(resolver.resolve(ipv4("www.example.com"), RequestPriority::Medium).await)
        .await
        .unwrap();
    assert_eq!(client.num_transactions(), 0);
}

#[tokio::test]
async fn test_resolve_trait_goes_through_dns() {
    let client = Arc::new(MockDnsClient::new());
    client.answer("api.example.com", DnsRecordType::A, &[v4(9, 9, 9, 9)], TTL);
    client.answer("api.example.com", DnsRecordType::Aaaa, &[], TTL);
    let resolver: Arc<dyn Resolve> =
        Arc::new(dns_resolver(client, Arc::new(StaticProc::new()), config()));

    let addrs: Vec<_> = resolver
        .resolve(Name::new("api.example.com"))
        .await
        .unwrap()
        .collect();
    assert_eq!(addrs.len(), 1);
    assert_eq!(addrs[0].ip(), v4(9, 9, 9, 9));
    assert_eq!(addrs[0].port(), 0);
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("resolver.json");
    let config = config().persist_to(&path, Duration::from_secs(300));

    let proc = Arc::new(StaticProc::new().with("www.example.com", &[v4(1, 2, 3, 4)]));
    let resolver = HostResolver::builder()
        .config(config.clone())
        .system_resolver(proc)
        .build();
    pending(resolver.resolve(info("www.example.com", 80), RequestPriority::Medium).await)
        .await
        .unwrap();
    resolver.persist_now().await.unwrap();

    let snapshot = ResolverSnapshot::load(&path).unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].key.hostname, "www.example.com");
    assert_eq!(snapshot.latencies.get(ResolutionSource::Proc).unwrap().samples, 1);
    drop(resolver);

    let failing = Arc::new(StaticProc::new());
    let restored = HostResolver::builder()
        .config(config)
        .system_resolver(failing)
        .build();
    assert_eq!(
        restored.resolve_from_cache(info("www.example.com", 80)).await,
        Err(NetError::DnsCacheMiss)
    );
    let (result, staleness) = restored.resolve_stale(info("www.example.com", 80)).await;
    assert_eq!(ips(&result.unwrap()), vec![v4(1, 2, 3, 4)]);
    assert!(staleness.unwrap().is_stale());
}

#[tokio::test]
async fn test_persist_without_path() {
    let resolver = HostResolver::builder()
        .config(config())
        .system_resolver(Arc::new(StaticProc::new()))
        .build();
    let err = resolver.persist_now().await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("resolver.json");
    std::fs::write(&path, "not json").unwrap();

    let resolver = HostResolver::builder()
        .config(config().persist_to(&path, Duration::from_secs(300)))
        .system_resolver(Arc::new(StaticProc::new()))
        .build();
    assert_eq!(resolver.stats().await.unwrap().cache_size, 0);
}
