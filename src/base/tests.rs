use crate::base::neterror::NetError;

#[test]
fn test_net_error_roundtrip() {
    let original = NetError::NameNotResolved;
    let code = original.as_i32();
    assert_eq!(code, -105);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::NameNotResolved));

    let queue = NetError::HostResolverQueueTooLarge;
    assert_eq!(queue.as_i32(), -119);
    assert!(matches!(NetError::from(-119), NetError::HostResolverQueueTooLarge));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
    assert_eq!(err.as_i32(), -9999);
}

#[test]
fn test_dns_error_range() {
    assert!(NetError::DnsTimedOut.is_dns_error());
    assert!(NetError::DnsSortError.is_dns_error());
    assert!(!NetError::NameNotResolved.is_dns_error());
    assert!(!NetError::NetworkChanged.is_dns_error());
}

#[test]
fn test_error_display() {
    assert_eq!(NetError::IcannNameCollision.to_string(), "ICANN name collision");
    assert_eq!(NetError::Unknown(-42).to_string(), "Unknown error: -42");
}
