//! Known premium vendors and local free-tier identities

use crate::models::{Credentials, ProxyEndpoint, ProxyProtocol, ProxyTier};

/// A premium proxy vendor's rotating gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vendor {
    pub name: &'static str,
    /// Prefix of the `{PREFIX}_USERNAME` / `{PREFIX}_PASSWORD` variables
    pub env_prefix: &'static str,
    pub host: &'static str,
    pub port: u16,
    pub protocol: ProxyProtocol,
}

impl Vendor {
    pub fn username_var(&self) -> String {
        format!("{}_USERNAME", self.env_prefix)
    }

    pub fn password_var(&self) -> String {
        format!("{}_PASSWORD", self.env_prefix)
    }

    pub fn host_var(&self) -> String {
        format!("{}_HOST", self.env_prefix)
    }

    pub fn port_var(&self) -> String {
        format!("{}_PORT", self.env_prefix)
    }

    /// Premium endpoint for this vendor's gateway
    pub fn endpoint(&self, credentials: Credentials) -> ProxyEndpoint {
        ProxyEndpoint::new(
            self.host,
            self.port,
            self.protocol,
            self.name,
            ProxyTier::Premium,
        )
        .with_credentials(credentials)
    }
}

/// Catalog order is pool order within the premium tier
pub const PREMIUM_VENDORS: &[Vendor] = &[
    Vendor {
        name: "brightdata",
        env_prefix: "BRIGHTDATA",
        host: "zproxy.lum-superproxy.io",
        port: 22225,
        protocol: ProxyProtocol::Http,
    },
    Vendor {
        name: "smartproxy",
        env_prefix: "SMARTPROXY",
        host: "gate.smartproxy.com",
        port: 10000,
        protocol: ProxyProtocol::Http,
    },
    Vendor {
        name: "proxyempire",
        env_prefix: "PROXYEMPIRE",
        host: "rotating.proxyempire.io",
        port: 9001,
        protocol: ProxyProtocol::Http,
    },
    Vendor {
        name: "oxylabs",
        env_prefix: "OXYLABS",
        host: "pr.oxylabs.io",
        port: 7777,
        protocol: ProxyProtocol::Http,
    },
];

pub fn find_vendor(name: &str) -> Option<&'static Vendor> {
    PREMIUM_VENDORS
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
}

/// Local Tor daemon: SOCKS port plus the Privoxy-style HTTP bridge
pub fn tor_endpoints() -> Vec<ProxyEndpoint> {
    vec![
        ProxyEndpoint::new("127.0.0.1", 9050, ProxyProtocol::Socks5, "tor", ProxyTier::Free),
        ProxyEndpoint::new("127.0.0.1", 8118, ProxyProtocol::Http, "tor-http", ProxyTier::Free),
    ]
}
