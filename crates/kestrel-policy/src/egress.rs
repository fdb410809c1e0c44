use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};
use url::{Host, Url};

use kestrel_core::error::{KestrelError, Result};

/// Name resolution used by the egress check.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, host: String, port: u16) -> BoxFuture<'_, std::io::Result<Vec<IpAddr>>>;
}

/// Resolver backed by the operating system (via tokio).
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: String, port: u16) -> BoxFuture<'_, std::io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            Ok(addrs.map(|a| a.ip()).collect())
        })
    }
}

/// Fixed host table, for tests and air-gapped deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.entries.insert(host.into().to_lowercase(), addrs);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: String, _port: u16) -> BoxFuture<'_, std::io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            self.entries
                .get(&host.to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no such host: {}", host),
                    )
                })
        })
    }
}

/// A vetted outbound target.
#[derive(Debug, Clone)]
pub struct EgressTarget {
    pub url: Url,
    /// Addresses that passed the denylist. Connections must go to these and
    /// nowhere else, or a second lookup could answer differently. Empty when
    /// the domain did not resolve.
    pub addrs: Vec<SocketAddr>,
}

impl EgressTarget {
    /// Domain name to pin, if the host is not an IP literal.
    pub fn domain(&self) -> Option<&str> {
        self.url.domain()
    }
}

/// Scheme allow-list plus the private-address denylist.
pub struct EgressPolicy {
    allowed_schemes: Vec<String>,
    resolver: Arc<dyn Resolver>,
}

impl EgressPolicy {
    pub fn new(allowed_schemes: Vec<String>) -> Self {
        Self {
            allowed_schemes: allowed_schemes
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn allowed_schemes(&self) -> &[String] {
        &self.allowed_schemes
    }

    /// Check an outbound target. Returns the parsed URL and the vetted addresses.
    pub async fn check(&self, raw: &str) -> Result<EgressTarget> {
        let url = Url::parse(raw.trim())
            .map_err(|e| KestrelError::EgressProtocol(format!("{} ({})", raw, e)))?;

        if !self.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(KestrelError::EgressProtocol(raw.to_string()));
        }
        let port = url.port_or_known_default().unwrap_or(443);

        // url::Host already strips IPv6 brackets.
        let addrs = match url.host() {
            None => return Err(KestrelError::EgressProtocol(format!("{} has no host", raw))),
            Some(Host::Ipv4(ip)) => vec![check_literal(IpAddr::V4(ip), port)?],
            Some(Host::Ipv6(ip)) => vec![check_literal(IpAddr::V6(ip), port)?],
            Some(Host::Domain(domain)) => match self.resolver.resolve(domain.to_string(), port).await {
                Ok(addrs) => {
                    if let Some(addr) = addrs.iter().find(|a| is_private_ip(**a)) {
                        return Err(KestrelError::EgressDnsPrivateIp {
                            host: domain.to_string(),
                            addr: addr.to_string(),
                        });
                    }
                    debug!(host = %domain, count = addrs.len(), "Egress target resolved");
                    addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect()
                }
                Err(e) => {
                    warn!(host = %domain, error = %e, "Egress resolution failed, not treated as violation");
                    Vec::new()
                }
            },
        };
        Ok(EgressTarget { url, addrs })
    }
}

fn check_literal(ip: IpAddr, port: u16) -> Result<SocketAddr> {
    if is_private_ip(ip) {
        return Err(KestrelError::EgressDenylist {
            host: ip.to_string(),
        });
    }
    Ok(SocketAddr::new(ip, port))
}

/// Loopback, RFC1918, link-local, unspecified, and IPv6 unique-local/link-local.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.octets()[0] == 0
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_ipv4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
