//! Identifier masking for security logs.
//!
//! Security events must be traceable without writing raw e-mail addresses,
//! account ids or client IPs to the log stream.

use std::net::IpAddr;

/// Mask an account identifier, keeping just enough to correlate events.
///
/// `alice@example.com` → `al***@example.com`, `customer-1234` → `cu***34`.
pub fn mask_identifier(identifier: &str) -> String {
    if let Some((local, domain)) = identifier.split_once('@') {
        return format!("{}***@{}", prefix(local, 2), domain);
    }
    let chars: Vec<char> = identifier.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

/// Mask an IP address: IPv4 keeps the first two octets, IPv6 the first two groups.
pub fn mask_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.x.x", o[0], o[1])
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:x:x:x:x:x:x", s[0], s[1])
        }
        Err(_) => mask_identifier(ip),
    }
}

fn prefix(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_identifier("alice@example.com"), "al***@example.com");
        assert_eq!(mask_identifier("a@example.com"), "a***@example.com");
    }

    #[test]
    fn test_mask_plain_identifier() {
        assert_eq!(mask_identifier("customer-1234"), "cu***34");
        assert_eq!(mask_identifier("abc"), "***");
    }

    #[test]
    fn test_mask_ip() {
        assert_eq!(mask_ip("192.168.10.20"), "192.168.x.x");
        assert_eq!(mask_ip("2001:db8::1"), "2001:db8:x:x:x:x:x:x");
        assert_eq!(mask_ip("not-an-ip"), "no***ip");
    }
}
