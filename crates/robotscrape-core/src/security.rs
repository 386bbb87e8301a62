//! SSRF guard: rejects outbound targets (extraction URLs, webhook URLs) that
//! resolve to loopback, private, link-local, or other non-routable address
//! space, so the service cannot be used to probe internal infrastructure.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

/// Check if an IP address is safe for outbound connections.
///
/// Rejects loopback, private (RFC 1918), link-local, carrier-grade NAT,
/// IPv4-mapped IPv6 addresses that map to unsafe IPs, multicast,
/// unspecified, and deprecated site-local IPv6.
pub fn is_safe_ip(ip: &IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }

    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            // 10.0.0.0/8
            if octets[0] == 10 {
                return false;
            }
            // 172.16.0.0/12
            if octets[0] == 172 && (16..=31).contains(&octets[1]) {
                return false;
            }
            // 192.168.0.0/16
            if octets[0] == 192 && octets[1] == 168 {
                return false;
            }
            // 169.254.0.0/16 (link-local, includes cloud metadata 169.254.169.254)
            if octets[0] == 169 && octets[1] == 254 {
                return false;
            }
            // 100.64.0.0/10 (carrier-grade NAT)
            if octets[0] == 100 && (64..=127).contains(&octets[1]) {
                return false;
            }
            true
        }
        IpAddr::V6(v6) => {
            // IPv4-mapped (::ffff:0:0/96) - canonicalize to IPv4 and re-check
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_safe_ip(&IpAddr::V4(v4));
            }

            let segments = v6.segments();
            // Unique Local (fc00::/7)
            if (segments[0] & 0xfe00) == 0xfc00 {
                return false;
            }
            // Link-local (fe80::/10)
            if (segments[0] & 0xffc0) == 0xfe80 {
                return false;
            }
            // Site-local (fec0::/10) - deprecated but block anyway
            if (segments[0] & 0xffc0) == 0xfec0 {
                return false;
            }

            true
        }
    }
}

/// Hostnames that are always rejected regardless of what they resolve to.
fn is_blocked_host_literal(host: &str) -> bool {
    let lower = host.trim_matches(|c| c == '[' || c == ']').to_ascii_lowercase();
    lower == "localhost"
        || lower == "metadata.google.internal"
        || lower.ends_with(".localhost")
        || lower == "0"
        || lower == "0.0.0.0"
}

/// A URL that has passed the SSRF guard, with its validated connect-to
/// socket address pinned so a later DNS re-resolution cannot substitute an
/// unsafe address (DNS rebinding / TOCTOU).
#[derive(Debug, Clone)]
pub struct SafeUrl {
    pub url: url::Url,
    pub host: String,
    pub pinned_addr: SocketAddr,
}

/// Parse and validate a URL for outbound use: scheme restricted to
/// http/https (or https only when `require_https`), host must not be a
/// blocked literal, and at least one resolved address must be public.
pub async fn validate_outbound_url(raw: &str, require_https: bool) -> Result<SafeUrl> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::BadRequest(format!("invalid url: {e}")))?;

    let scheme = parsed.scheme();
    if require_https {
        if scheme != "https" {
            return Err(Error::BadRequest("url must use https".into()));
        }
    } else if scheme != "http" && scheme != "https" {
        return Err(Error::BadRequest("url must use http or https".into()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::BadRequest("url is missing a host".into()))?
        .to_string();

    if is_blocked_host_literal(&host) {
        return Err(Error::BadRequest("url targets a disallowed host".into()));
    }

    let port = parsed.port_or_known_default().unwrap_or(if scheme == "https" { 443 } else { 80 });
    let addr_str = format!("{host}:{port}");
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr_str)
        .await
        .map_err(|e| Error::BadRequest(format!("dns resolution failed: {e}")))?
        .collect();

    let pinned_addr = addrs
        .into_iter()
        .find(|a| is_safe_ip(&a.ip()))
        .ok_or_else(|| Error::BadRequest("url resolves to a private or internal address".into()))?;

    Ok(SafeUrl {
        url: parsed,
        host,
        pinned_addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ipv4_mapped_loopback() {
        let ip: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(!is_safe_ip(&ip));
    }

    #[test]
    fn rejects_ipv4_mapped_private() {
        assert!(!is_safe_ip(&"::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_safe_ip(&"::ffff:192.168.1.1".parse().unwrap()));
        assert!(!is_safe_ip(&"::ffff:172.16.0.1".parse().unwrap()));
    }

    #[test]
    fn rejects_ipv4_mapped_link_local() {
        assert!(!is_safe_ip(&"::ffff:169.254.169.254".parse().unwrap()));
    }

    #[test]
    fn rejects_multicast() {
        assert!(!is_safe_ip(&"ff02::1".parse().unwrap()));
    }

    #[test]
    fn rejects_site_local() {
        assert!(!is_safe_ip(&"fec0::1".parse().unwrap()));
    }

    #[test]
    fn rejects_private_ipv4() {
        assert!(!is_safe_ip(&"10.0.0.1".parse().unwrap()));
        assert!(!is_safe_ip(&"192.168.1.1".parse().unwrap()));
        assert!(!is_safe_ip(&"172.16.0.1".parse().unwrap()));
        assert!(!is_safe_ip(&"100.64.0.1".parse().unwrap()));
    }

    #[test]
    fn rejects_loopback() {
        assert!(!is_safe_ip(&"127.0.0.1".parse().unwrap()));
        assert!(!is_safe_ip(&"::1".parse().unwrap()));
    }

    #[test]
    fn rejects_unspecified() {
        assert!(!is_safe_ip(&"0.0.0.0".parse().unwrap()));
        assert!(!is_safe_ip(&"::".parse().unwrap()));
    }

    #[test]
    fn allows_public_ipv4() {
        assert!(is_safe_ip(&"8.8.8.8".parse().unwrap()));
        assert!(is_safe_ip(&"1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn allows_public_ipv6() {
        assert!(is_safe_ip(&"2606:4700:4700::1111".parse().unwrap()));
    }

    #[test]
    fn rejects_carrier_grade_nat_boundary() {
        assert!(!is_safe_ip(&"100.64.0.0".parse().unwrap()));
        assert!(!is_safe_ip(&"100.127.255.255".parse().unwrap()));
        assert!(is_safe_ip(&"100.128.0.0".parse().unwrap()));
    }

    #[test]
    fn rejects_unique_local_ipv6() {
        assert!(!is_safe_ip(&"fc00::1".parse().unwrap()));
        assert!(!is_safe_ip(&"fd00::1".parse().unwrap()));
    }

    #[test]
    fn rejects_localhost_literal() {
        assert!(is_blocked_host_literal("localhost"));
        assert!(is_blocked_host_literal("LOCALHOST"));
        assert!(is_blocked_host_literal("metadata.google.internal"));
    }

    #[tokio::test]
    async fn validate_outbound_url_rejects_non_https_when_required() {
        let err = validate_outbound_url("http://example.com/hook", true).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn validate_outbound_url_rejects_bad_scheme() {
        let err = validate_outbound_url("ftp://example.com", false).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
}
