//! Client IP normalization and allow-list matching
//!
//! Chargers arrive with addresses in every shape proxies produce: bracketed
//! IPv6, trailing ports, zone identifiers, IPv4-mapped IPv6. Everything is
//! normalized to a binary `IpAddr` before comparison; allow-list entries go
//! through the same normalization so textual variants never disagree.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use tracing::warn;

/// Normalize a textual address to a comparable `IpAddr`.
pub fn normalize_ip(raw: &str) -> Option<IpAddr> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // Bracketed IPv6, with or without a port: [2001:db8::1]:8080
    if let Some(rest) = s.strip_prefix('[') {
        s = rest.split(']').next()?;
    } else {
        // Unbracketed host:port only makes sense for IPv4 (exactly one colon).
        if s.matches(':').count() == 1 {
            if let Some((host, port)) = s.rsplit_once(':') {
                if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() {
                    s = host;
                }
            }
        }
    }

    // Zone identifier: fe80::1%eth0
    if let Some((addr, _zone)) = s.split_once('%') {
        s = addr;
    }

    let addr = IpAddr::from_str(s).ok()?;
    Some(canonical(addr))
}

/// Collapse IPv4-mapped IPv6 to plain IPv4 so `::ffff:10.0.0.1` and
/// `10.0.0.1` compare equal.
pub fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    }
}

/// Parse allow-list CIDRs, skipping unparseable entries with a warning.
pub fn parse_cidrs(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .filter_map(|entry| match IpNet::from_str(entry.trim()) {
            Ok(net) => Some(net),
            Err(_) => {
                warn!(entry = entry.as_str(), "Skipping unparseable CIDR allow-list entry");
                None
            }
        })
        .collect()
}

/// Check an address against verbatim-IP and CIDR allow-lists. Empty lists
/// impose no restriction.
pub fn ip_allowed(addr: IpAddr, allowed_ips: &[String], allowed_cidrs: &[IpNet]) -> bool {
    if allowed_ips.is_empty() && allowed_cidrs.is_empty() {
        return true;
    }
    let addr = canonical(addr);

    if allowed_ips
        .iter()
        .filter_map(|entry| normalize_ip(entry))
        .any(|allowed| allowed == addr)
    {
        return true;
    }
    allowed_cidrs.iter().any(|net| net.contains(&addr))
}

/// Resolve the client address. With trusted proxies, the left-most
/// `X-Forwarded-For` entry wins, then RFC 7239 `Forwarded: for=`; otherwise
/// the socket peer is authoritative.
pub fn resolve_client_ip(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    forwarded: Option<&str>,
    trust_proxy: bool,
) -> IpAddr {
    if trust_proxy {
        if let Some(xff) = forwarded_for {
            if let Some(first) = xff.split(',').next() {
                if let Some(addr) = normalize_ip(first) {
                    return addr;
                }
            }
        }
        if let Some(fwd) = forwarded {
            if let Some(addr) = parse_forwarded_for(fwd) {
                return addr;
            }
        }
    }
    canonical(peer)
}

// First `for=` value of an RFC 7239 Forwarded header, e.g.
// `for=192.0.2.60;proto=http, for="[2001:db8::1]:8080"`.
fn parse_forwarded_for(header: &str) -> Option<IpAddr> {
    let first_element = header.split(',').next()?;
    for pair in first_element.split(';') {
        let (key, value) = pair.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("for") {
            let value = value.trim().trim_matches('"');
            return normalize_ip(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_shapes() {
        let expected: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(normalize_ip("10.1.2.3").unwrap(), expected);
        assert_eq!(normalize_ip("10.1.2.3:8080").unwrap(), expected);
        assert_eq!(normalize_ip("::ffff:10.1.2.3").unwrap(), expected);
        assert_eq!(normalize_ip("[::ffff:10.1.2.3]:9000").unwrap(), expected);

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(normalize_ip("2001:db8::1").unwrap(), v6);
        assert_eq!(normalize_ip("[2001:db8::1]").unwrap(), v6);
        assert_eq!(normalize_ip("[2001:db8::1]:443").unwrap(), v6);
        assert_eq!(normalize_ip("fe80::1%eth0").unwrap(), "fe80::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_ip(""), None);
        assert_eq!(normalize_ip("charger.example.com"), None);
        assert_eq!(normalize_ip("999.1.1.1"), None);
    }

    #[test]
    fn allow_list_matches_across_notations() {
        let addr = normalize_ip("::ffff:192.168.1.50").unwrap();
        assert!(ip_allowed(addr, &["192.168.1.50".to_string()], &[]));

        let cidrs = parse_cidrs(&["192.168.1.0/24".to_string()]);
        assert!(ip_allowed(addr, &[], &cidrs));
        assert!(!ip_allowed(
            normalize_ip("192.168.2.1").unwrap(),
            &[],
            &cidrs
        ));
    }

    #[test]
    fn empty_lists_allow_everything() {
        assert!(ip_allowed("203.0.113.1".parse().unwrap(), &[], &[]));
    }

    #[test]
    fn proxy_headers_only_honored_when_trusted() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let client: IpAddr = "203.0.113.9".parse().unwrap();

        assert_eq!(
            resolve_client_ip(peer, Some("203.0.113.9, 10.0.0.1"), None, true),
            client
        );
        assert_eq!(
            resolve_client_ip(peer, Some("203.0.113.9"), None, false),
            peer
        );
        assert_eq!(
            resolve_client_ip(peer, None, Some(r#"for="[2001:db8::1]:8080";proto=https"#), true),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
    }
}
