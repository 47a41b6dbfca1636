//! Classification of outbound hosts into private and public.
//!
//! Pure string and literal-address checks, no DNS. A public hostname that
//! resolves to a private address at connect time is not caught here.

use std::net::{Ipv4Addr, Ipv6Addr};

const LOCALHOST_ALIASES: &[&str] = &["localhost", "0.0.0.0", "::1"];

/// Returns true when `host` names the local machine or a private,
/// loopback or link-local network.
pub fn is_private_host(host: &str) -> bool {
    let normalized = normalize_host(host);
    if normalized.is_empty() {
        return false;
    }
    if LOCALHOST_ALIASES.contains(&normalized.as_str()) || normalized.ends_with(".localhost") {
        return true;
    }
    if let Ok(v4) = normalized.parse::<Ipv4Addr>() {
        return is_private_ipv4(v4);
    }
    if normalized.contains(':') {
        return is_private_ipv6(&normalized);
    }
    false
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    let without_zone = unbracketed
        .split_once('%')
        .map(|(address, _zone)| address)
        .unwrap_or(unbracketed);
    without_zone.trim_end_matches('.').to_ascii_lowercase()
}

fn is_private_ipv4(address: Ipv4Addr) -> bool {
    let [a, b, _, _] = address.octets();
    a == 127
        || a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
        || address.is_unspecified()
}

fn is_private_ipv6(address: &str) -> bool {
    if address == "::1" || address.starts_with("fc") || address.starts_with("fd") {
        return true;
    }
    if address.starts_with("fe80:") {
        return true;
    }
    let Ok(parsed) = address.parse::<Ipv6Addr>() else {
        return false;
    };
    if parsed.is_loopback() || parsed.is_unspecified() {
        return true;
    }
    parsed.to_ipv4_mapped().map(is_private_ipv4).unwrap_or(false)
}
