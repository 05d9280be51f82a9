//! Best-effort client IP derivation from proxy and CDN headers.
//!
//! Services behind a CDN or reverse proxy see the edge's socket address, not
//! the client's, so the real address has to come from forwarding headers.
//! Header precedence follows the trust chain: the CDN's own connecting-IP
//! header first, then the standard `X-Forwarded-For` chain, then the
//! alternate and reverse-proxy conventions, and finally the raw peer address.
//!
//! Derivation never fails. Requests with no attributable address all map to
//! the [`UNKNOWN_IP`] sentinel and therefore share a single bucket. This is
//! intentionally coarse: it keeps un-attributable traffic bounded without
//! inventing per-request identities.

use std::net::SocketAddr;

use hyper::header::HeaderMap;

/// Sentinel identity for requests with no derivable client address.
pub const UNKNOWN_IP: &str = "unknown";

/// Returns the first non-empty value of the named header, trimmed.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|val| val.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Derives a best-effort client IP string from the request headers and the
/// runtime-provided peer address.
///
/// Precedence (first present wins): `cf-connecting-ip`, `x-forwarded-for`
/// (first comma-separated entry, trimmed), `true-client-ip`, `x-real-ip`,
/// then the peer address. Falls back to [`UNKNOWN_IP`] when nothing applies.
///
/// Values are not validated as IP addresses; they are opaque identities used
/// only for bucket keying.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = header_value(headers, "cf-connecting-ip") {
        return ip;
    }

    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first.to_owned();
        }
    }

    if let Some(ip) = header_value(headers, "true-client-ip") {
        return ip;
    }

    if let Some(ip) = header_value(headers, "x-real-ip") {
        return ip;
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_IP.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .fold(HeaderMap::new(), |mut map, (name, value)| {
                map.insert(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_str(value).unwrap(),
                );
                map
            })
    }

    #[test]
    fn cdn_header_takes_precedence() {
        let headers = header_map(&[
            ("cf-connecting-ip", "9.9.9.9"),
            ("x-forwarded-for", "1.2.3.4, 5.6.6.6"),
            ("x-real-ip", "7.7.7.7"),
        ]);
        assert_eq!(client_ip(&headers, None), "9.9.9.9");
    }

    #[test]
    fn forwarded_for_uses_first_entry_trimmed() {
        let headers = header_map(&[("x-forwarded-for", " 1.2.3.4 , 5.6.6.6")]);
        assert_eq!(client_ip(&headers, None), "1.2.3.4");
    }

    #[test]
    fn true_client_ip_beats_real_ip() {
        let headers = header_map(&[("true-client-ip", "2.2.2.2"), ("x-real-ip", "3.3.3.3")]);
        assert_eq!(client_ip(&headers, None), "2.2.2.2");
    }

    #[test]
    fn real_ip_used_when_nothing_else_present() {
        let headers = header_map(&[("x-real-ip", "3.3.3.3")]);
        assert_eq!(client_ip(&headers, None), "3.3.3.3");
    }

    #[test]
    fn falls_back_to_peer_address() {
        let peer = "192.168.1.10:5000".parse::<SocketAddr>().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.168.1.10");
    }

    #[test]
    fn no_headers_no_peer_yields_unknown() {
        assert_eq!(client_ip(&HeaderMap::new(), None), UNKNOWN_IP);
    }

    #[test]
    fn empty_header_values_are_skipped() {
        let headers = header_map(&[("cf-connecting-ip", "  "), ("x-real-ip", "3.3.3.3")]);
        assert_eq!(client_ip(&headers, None), "3.3.3.3");
    }

    #[test]
    fn empty_forwarded_for_is_skipped() {
        let headers = header_map(&[("x-forwarded-for", " , 5.6.6.6")]);
        // First entry is empty after trimming, so the whole header is skipped.
        assert_eq!(client_ip(&headers, None), UNKNOWN_IP);
    }
}
