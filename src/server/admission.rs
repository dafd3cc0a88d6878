use std::net::IpAddr;

use crate::client::ClientAddr;

/// Packed network prefix keying the per-IP connection table.
///
/// IPv4 remotes are counted per address. IPv6 remotes are aggregated by their
/// leading 56 bits, so the many addresses a single subscriber derives from one
/// delegated prefix occupy a single slot while unrelated peers stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum NetworkKey {
    V4([u8; 4]),
    V6([u8; 7]),
}

/// Computes the accounting key for a remote address.
///
/// Returns `None` for exempt remotes: Unix sockets and loopback peers
/// (127.0.0.0/8, ::1, and the mapped form ::ffff:127.0.0.0/104) are never
/// counted against the per-IP limit.
pub(crate) fn network_key(remote: &ClientAddr) -> Option<NetworkKey> {
    let ip = match remote {
        ClientAddr::Tcp(addr) => addr.ip(),
        ClientAddr::Unix(_) => return None,
    };

    // Mapped IPv4 peers share a slot with their plain IPv4 form instead of
    // collapsing into one /56 for every mapped address on the internet.
    let ip = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(mapped) => IpAddr::V4(mapped),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };

    match ip {
        IpAddr::V4(v4) if v4.is_loopback() => None,
        IpAddr::V4(v4) => Some(NetworkKey::V4(v4.octets())),
        IpAddr::V6(v6) if v6.is_loopback() => None,
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut prefix = [0u8; 7];
            prefix.copy_from_slice(&octets[..7]);
            Some(NetworkKey::V6(prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn tcp(addr: &str) -> ClientAddr {
        ClientAddr::Tcp(addr.parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn ipv4_keys_on_the_full_address() {
        assert_eq!(
            network_key(&tcp("203.0.113.5:4711")),
            Some(NetworkKey::V4([203, 0, 113, 5]))
        );
        assert_ne!(
            network_key(&tcp("203.0.113.5:4711")),
            network_key(&tcp("203.0.113.6:4711"))
        );
    }

    #[test]
    fn ipv4_loopback_is_exempt() {
        assert_eq!(network_key(&tcp("127.0.0.1:80")), None);
        assert_eq!(network_key(&tcp("127.255.3.4:80")), None);
    }

    #[test]
    fn ipv6_loopback_is_exempt() {
        assert_eq!(network_key(&tcp("[::1]:80")), None);
    }

    #[test]
    fn mapped_ipv4_loopback_is_exempt() {
        assert_eq!(network_key(&tcp("[::ffff:127.0.0.9]:80")), None);
    }

    #[test]
    fn mapped_ipv4_shares_the_plain_ipv4_slot() {
        assert_eq!(
            network_key(&tcp("[::ffff:203.0.113.5]:80")),
            network_key(&tcp("203.0.113.5:80"))
        );
    }

    #[test]
    fn ipv6_aggregates_by_56_bit_prefix() {
        let a = network_key(&tcp("[2001:db8:aa:bb00::1]:80"));
        let b = network_key(&tcp("[2001:db8:aa:bbff::2]:80"));
        let c = network_key(&tcp("[2001:db8:aa:cc00::1]:80"));
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unix_sockets_are_exempt() {
        assert_eq!(network_key(&ClientAddr::Unix(None)), None);
        assert_eq!(
            network_key(&ClientAddr::Unix(Some("/tmp/app.sock".into()))),
            None
        );
    }
}
