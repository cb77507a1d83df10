use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Generic Errors
    #[error("Operation aborted")]
    Aborted,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("Unexpected error")]
    Unexpected,
    #[error("Network changed")]
    NetworkChanged,

    // Resolution Errors
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("Host resolver queue too large")]
    HostResolverQueueTooLarge,
    #[error("ICANN name collision")]
    IcannNameCollision,

    // DNS Errors
    #[error("DNS malformed response")]
    DnsMalformedResponse,
    #[error("DNS server requires TCP")]
    DnsServerRequiresTcp,
    #[error("DNS server failed")]
    DnsServerFailed,
    #[error("DNS timed out")]
    DnsTimedOut,
    #[error("DNS cache miss")]
    DnsCacheMiss,
    #[error("DNS search empty")]
    DnsSearchEmpty,
    #[error("DNS sort error")]
    DnsSortError,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::InvalidArgument => -4,
            NetError::Unexpected => -9,
            NetError::NetworkChanged => -21,
            NetError::NameNotResolved => -105,
            NetError::InternetDisconnected => -106,
            NetError::HostResolverQueueTooLarge => -119,
            NetError::IcannNameCollision => -166,
            NetError::DnsMalformedResponse => -800,
            NetError::DnsServerRequiresTcp => -801,
            NetError::DnsServerFailed => -802,
            NetError::DnsTimedOut => -803,
            NetError::DnsCacheMiss => -804,
            NetError::DnsSearchEmpty => -805,
            NetError::DnsSortError => -806,
            NetError::Unknown(code) => *code,
        }
    }

    /// True for the DNS-client family of errors (-800 range).
    pub fn is_dns_error(&self) -> bool {
        (-899..=-800).contains(&self.as_i32())
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -4 => NetError::InvalidArgument,
            -9 => NetError::Unexpected,
            -21 => NetError::NetworkChanged,
            -105 => NetError::NameNotResolved,
            -106 => NetError::InternetDisconnected,
            -119 => NetError::HostResolverQueueTooLarge,
            -166 => NetError::IcannNameCollision,
            -800 => NetError::DnsMalformedResponse,
            -801 => NetError::DnsServerRequiresTcp,
            -802 => NetError::DnsServerFailed,
            -803 => NetError::DnsTimedOut,
            -804 => NetError::DnsCacheMiss,
            -805 => NetError::DnsSearchEmpty,
            -806 => NetError::DnsSortError,
            _ => NetError::Unknown(code),
        }
    }
}
