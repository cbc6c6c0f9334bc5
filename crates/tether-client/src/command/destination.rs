//! Local vs. remote destination classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::Url;

/// Where a command endpoint lives, for timeout and backoff selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Loopback, link-local, private LAN, or mDNS host.
    Local,
    /// Everything else.
    Remote,
}

impl Destination {
    /// Classify a URL by its host.
    pub fn classify(url: &Url) -> Self {
        let Some(host) = url.host_str() else {
            return Self::Remote;
        };
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.')
            .to_ascii_lowercase();

        let local = match host.parse::<IpAddr>() {
            Ok(ip) => is_local_ip(ip),
            Err(_) => host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local"),
        };
        if local { Self::Local } else { Self::Remote }
    }

    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => is_local_v6(v6),
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        || ip.to_ipv4_mapped().is_some_and(is_local_v4)
}
