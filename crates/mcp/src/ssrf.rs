//! SSRF guard for outbound registry and MCP HTTP calls.
//!
//! Every destination resolves through the guard before a request is issued.
//! Loopback, link-local, and private ranges are rejected unless explicitly
//! allowed (local development, tests).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfGuard {
    /// Permit loopback/link-local/private destinations.
    pub allow_private: bool,
}

impl SsrfGuard {
    pub fn new(allow_private: bool) -> Self {
        Self { allow_private }
    }

    /// Validate a URL and resolve its host, rejecting guarded ranges.
    /// Returns the parsed URL on success so callers keep a checked handle.
    pub async fn check_url(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw).map_err(|e| Error::Ssrf {
            url: raw.to_string(),
            reason: format!("invalid URL: {e}"),
        })?;

        match url.scheme() {
            "http" | "https" => {},
            other => {
                return Err(Error::Ssrf {
                    url: raw.to_string(),
                    reason: format!("scheme '{other}' not allowed"),
                });
            },
        }

        let Some(host) = url.host_str() else {
            return Err(Error::Ssrf {
                url: raw.to_string(),
                reason: "missing host".into(),
            });
        };

        if self.allow_private {
            return Ok(url);
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| Error::Ssrf {
                    url: raw.to_string(),
                    reason: format!("DNS resolution failed: {e}"),
                })?
                .map(|sa| sa.ip())
                .collect(),
        };

        if addrs.is_empty() {
            return Err(Error::Ssrf {
                url: raw.to_string(),
                reason: "host resolved to no addresses".into(),
            });
        }

        for ip in addrs {
            if let Some(reason) = guarded_range(&ip) {
                return Err(Error::Ssrf {
                    url: raw.to_string(),
                    reason: format!("{ip} is {reason}"),
                });
            }
        }
        Ok(url)
    }
}

/// Returns the range name when `ip` falls in a guarded range.
fn guarded_range(ip: &IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => guarded_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return guarded_v4(&mapped);
            }
            guarded_v6(v6)
        },
    }
}

fn guarded_v4(ip: &Ipv4Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.octets()[0] == 100 && (64..128).contains(&ip.octets()[1]) {
        // 100.64.0.0/10 carrier-grade NAT.
        Some("shared address space")
    } else {
        None
    }
}

fn guarded_v6(ip: &Ipv6Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_unspecified() {
        Some("unspecified")
    } else if (ip.segments()[0] & 0xfe00) == 0xfc00 {
        // fc00::/7 unique local.
        Some("private")
    } else if (ip.segments()[0] & 0xffc0) == 0xfe80 {
        // fe80::/10 link-local.
        Some("link-local")
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_loopback() {
        let guard = SsrfGuard::new(false);
        let err = guard.check_url("http://127.0.0.1:8080/mcp").await.unwrap_err();
        assert!(matches!(err, Error::Ssrf { .. }));
    }

    #[tokio::test]
    async fn rejects_private_ranges() {
        let guard = SsrfGuard::new(false);
        for url in [
            "http://10.0.0.5/",
            "http://192.168.1.1/",
            "http://172.16.0.9/",
            "http://169.254.1.1/",
            "http://100.64.0.1/",
            "http://[::1]/",
            "http://[fd00::1]/",
        ] {
            assert!(guard.check_url(url).await.is_err(), "expected reject: {url}");
        }
    }

    #[tokio::test]
    async fn allows_private_when_opted_in() {
        let guard = SsrfGuard::new(true);
        assert!(guard.check_url("http://127.0.0.1:9/mcp").await.is_ok());
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let guard = SsrfGuard::new(true);
        assert!(guard.check_url("file:///etc/passwd").await.is_err());
        assert!(guard.check_url("ftp://example.com/").await.is_err());
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let guard = SsrfGuard::new(true);
        assert!(guard.check_url("not a url").await.is_err());
    }

    #[test]
    fn public_v4_not_guarded() {
        assert!(guarded_range(&"93.184.216.34".parse().unwrap()).is_none());
    }
}
