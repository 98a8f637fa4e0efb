//! Navigation safety filter.
//!
//! The isolated browser must not become a pivot into the host network, so
//! navigation targets pointing at internal or loopback ranges are refused
//! before they ever reach the engine (the classic SSRF-via-headless-browser
//! risk).

use url::{Host, Url};

/// Resolves a navigation target, returning the normalized URL when allowed.
///
/// Policy:
/// - `data:` and `about:` imply no network access and pass unchanged.
/// - Any other non-http(s) scheme is refused.
/// - The `localhost` hostname is refused.
/// - IPv4 literals with a first octet of 0, 10, or 127 are refused ("this
///   network", private class A, loopback).
/// - Everything else is allowed, href-normalized.
///
/// This is deliberately a minimal allowlist-by-exclusion: it does not cover
/// 169.254.0.0/16, 172.16.0.0/12, 192.168.0.0/16, IPv6 loopback/private
/// literals, or DNS names that resolve to internal addresses after the
/// check. Deployments needing strict isolation must filter at the network
/// layer as well.
pub fn check_rewrite_url(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;

    match url.scheme() {
        "http" | "https" => {}
        "data" | "about" => return Some(url.into()),
        _ => return None,
    }

    match url.host() {
        Some(Host::Domain(host)) => {
            if host == "localhost" {
                return None;
            }
        }
        Some(Host::Ipv4(addr)) => match addr.octets()[0] {
            0 | 10 | 127 => return None,
            _ => {}
        },
        _ => {}
    }

    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_v4_are_refused() {
        assert_eq!(check_rewrite_url("http://127.0.0.1/"), None);
        assert_eq!(check_rewrite_url("http://10.0.0.5/"), None);
        assert_eq!(check_rewrite_url("http://0.1.2.3/"), None);
    }

    #[test]
    fn localhost_name_is_refused() {
        assert_eq!(check_rewrite_url("http://localhost/"), None);
        assert_eq!(check_rewrite_url("http://localhost:8080/admin"), None);
        // Hosts are lowercased during parsing.
        assert_eq!(check_rewrite_url("http://LOCALHOST/"), None);
    }

    #[test]
    fn shorthand_v4_literals_normalize_before_the_check() {
        // "127.1" is the loopback address in shorthand notation.
        assert_eq!(check_rewrite_url("http://127.1/"), None);
        assert_eq!(check_rewrite_url("http://10.5/"), None);
    }

    #[test]
    fn public_targets_pass_unchanged() {
        assert_eq!(
            check_rewrite_url("https://example.com/").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            check_rewrite_url("http://8.8.8.8/path?q=1").as_deref(),
            Some("http://8.8.8.8/path?q=1")
        );
    }

    #[test]
    fn schemes_without_network_access_pass_unchanged() {
        assert_eq!(
            check_rewrite_url("data:text/html,hi").as_deref(),
            Some("data:text/html,hi")
        );
        assert_eq!(
            check_rewrite_url("about:blank").as_deref(),
            Some("about:blank")
        );
    }

    #[test]
    fn other_schemes_are_refused() {
        assert_eq!(check_rewrite_url("ftp://example.com/"), None);
        assert_eq!(check_rewrite_url("file:///etc/passwd"), None);
        assert_eq!(check_rewrite_url("javascript:alert(1)"), None);
    }

    #[test]
    fn relative_and_garbage_inputs_are_refused() {
        assert_eq!(check_rewrite_url("/local/path"), None);
        assert_eq!(check_rewrite_url("not a url"), None);
        assert_eq!(check_rewrite_url(""), None);
    }
}
