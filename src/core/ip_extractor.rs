//! Client address resolution for rate limiting and report attribution
//!
//! Proxy headers are only honoured when the socket peer is an explicitly
//! trusted proxy, so a direct client cannot spoof its origin.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use warp::hyper::HeaderMap;
use log::{debug, warn};

use crate::config::ServerConfig;

/// Headers consulted, in order, when the peer is a trusted proxy
const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

const FALLBACK_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Configuration for IP extraction behavior
#[derive(Debug, Clone, Default)]
pub struct IpExtractionConfig {
    /// Whether to trust proxy headers at all. Off by default.
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,
}

impl IpExtractionConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            trust_proxy_headers: config.trust_proxy_headers,
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }

    fn trusts(&self, peer: IpAddr) -> bool {
        self.trust_proxy_headers && self.trusted_proxies.contains(&peer)
    }
}

/// Extract the real client IP address from headers and connection info
pub fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &IpExtractionConfig,
) -> IpAddr {
    let Some(peer) = remote_addr.map(|addr| addr.ip()) else {
        debug!("No peer address available, using {}", FALLBACK_IP);
        return FALLBACK_IP;
    };

    if !config.trusts(peer) {
        return peer;
    }

    for name in FORWARDING_HEADERS {
        if let Some(ip) = header_ip(headers, name) {
            debug!("Extracted client IP {} from {}", ip, name);
            return ip;
        }
    }

    warn!("Trusted proxy {} sent no usable forwarding header", peer);
    peer
}

/// Parse the client address out of one header. X-Forwarded-For can list
/// "client, proxy1, proxy2"; the leftmost entry is the client.
fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let raw = headers.get(name)?.to_str().ok()?;
    let candidate = raw.split(',').next().unwrap_or("").trim();
    match candidate.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Invalid IP format in {} header: {}", name, candidate);
            None
        }
    }
}
