// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network interface snapshots and the priority order in which interfaces
//! are announced.
//!
//! Interface names encode how the kernel assigned them: legacy numbering
//! (`eth0`), onboard (`eno1`), bus/slot (`enp0s3`), MAC (`enx001122334455`)
//! or hotplug slots. The parser understands all of these so interfaces sort
//! stably even when the naming scheme is mixed.
use std::cmp::Ordering;
use std::net::Ipv4Addr;

/// Announcement order. Wireless first, then wired, tunnels last before
/// loopback. Interfaces with unknown prefixes sort after all of these.
pub const INTERFACE_PRIORITY: [&str; 8] = ["wl", "wlan", "en", "eth", "tun", "tap", "utun", "lo"];

/// IPv4 address with its prefix length, as configured on one interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub ip: Ipv4Addr,
    pub prefix: u8,
}

/// Snapshot of one network interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub is_up: bool,
    pub is_loopback: bool,
    pub is_multicast: bool,
    pub addrs: Vec<InterfaceAddr>,
}

/// Source of interface snapshots. The system implementation reads from the
/// OS, tests inject fixed lists.
pub trait InterfaceProvider: Send + Sync + 'static {
    fn interfaces(&self) -> Vec<Interface>;
}

/// OS-backed interface enumeration.
#[derive(Debug, Default)]
pub struct SystemInterfaces;

impl InterfaceProvider for SystemInterfaces {
    fn interfaces(&self) -> Vec<Interface> {
        netdev::get_interfaces()
            .into_iter()
            .map(|iface| Interface {
                name: iface.name.clone(),
                index: iface.index,
                is_up: iface.is_up(),
                is_loopback: iface.is_loopback(),
                is_multicast: iface.is_multicast(),
                addrs: iface
                    .ipv4
                    .iter()
                    .map(|net| InterfaceAddr {
                        ip: net.addr(),
                        prefix: net.prefix_len(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Interfaces eligible for mDNS announcements: up, multicast-capable,
/// non-loopback and carrying at least one IPv4 address. Sorted by
/// [`INTERFACE_PRIORITY`].
pub fn eligible_interfaces(interfaces: Vec<Interface>) -> Vec<Interface> {
    let mut eligible: Vec<Interface> = interfaces
        .into_iter()
        .filter(|iface| {
            iface.is_up && iface.is_multicast && !iface.is_loopback && !iface.addrs.is_empty()
        })
        .collect();
    eligible.sort_by(|a, b| compare_names(&a.name, &b.name));
    eligible
}

/// Peer-to-peer connections are possible while at least one non-loopback
/// interface is up.
pub fn p2p_possible(interfaces: &[Interface]) -> bool {
    interfaces
        .iter()
        .any(|iface| iface.is_up && !iface.is_loopback)
}

/// All announced addresses of an interface set, in interface order.
pub fn announced_ips(interfaces: &[Interface]) -> Vec<Ipv4Addr> {
    interfaces
        .iter()
        .flat_map(|iface| iface.addrs.iter().map(|addr| addr.ip))
        .collect()
}

/// How the kernel named an interface, in sort order: legacy numbering wins
/// over predictable names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NamingType {
    Legacy,
    Onboard,
    BusSlot,
    Mac,
    Hotplug,
}

impl NamingType {
    fn from_marker(marker: char) -> Option<Self> {
        match marker {
            'o' => Some(Self::Onboard),
            'p' => Some(Self::BusSlot),
            'x' => Some(Self::Mac),
            's' => Some(Self::Hotplug),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedName {
    prefix: String,
    naming: NamingType,
    bus: i64,
    num: i64,
}

impl ParsedName {
    fn priority(&self) -> Option<usize> {
        INTERFACE_PRIORITY
            .iter()
            .position(|prefix| *prefix == self.prefix)
    }
}

fn parse_name(name: &str) -> ParsedName {
    parse_predictable_name(name).unwrap_or_else(|| parse_legacy_name(name))
}

/// Predictable naming schemes: `enp0s3`, `eno1`, `wlx001122334455` and the
/// like. The marker after the two-letter type selects the scheme, the rest
/// is hexadecimal bus and slot (or MAC) numbers.
fn parse_predictable_name(name: &str) -> Option<ParsedName> {
    let kind = name.get(..3)?;
    if !matches!(kind, "enp" | "eno" | "ens" | "enx" | "wlp" | "wlx") {
        return None;
    }
    let naming = NamingType::from_marker(kind.chars().nth(2)?)?;

    let rest = &name[3..];
    let (bus_part, slot_part) = match rest.split_once('s') {
        Some((bus, slot)) => (bus, slot),
        None => (rest, ""),
    };
    if !bus_part.chars().all(|c| c.is_ascii_hexdigit())
        || !slot_part.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }

    Some(ParsedName {
        prefix: kind[..2].to_string(),
        naming,
        bus: i64::from_str_radix(bus_part, 16).unwrap_or_default(),
        num: i64::from_str_radix(slot_part, 16).unwrap_or_default(),
    })
}

/// Legacy numbering: lowercase prefix plus decimal suffix (`eth0`, `wlan1`).
/// Names without a numeric suffix parse to an empty prefix and sort last.
fn parse_legacy_name(name: &str) -> ParsedName {
    let digits_at = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(at, _)| at);
    let parsed = digits_at.and_then(|at| {
        let prefix = &name[..at];
        if !prefix.chars().all(|c| c.is_ascii_lowercase()) {
            return None;
        }
        Some(ParsedName {
            prefix: prefix.to_string(),
            naming: NamingType::Legacy,
            bus: 0,
            num: name[at..].parse().unwrap_or_default(),
        })
    });
    parsed.unwrap_or(ParsedName {
        prefix: String::new(),
        naming: NamingType::Legacy,
        bus: 0,
        num: 0,
    })
}

fn compare_names(a: &str, b: &str) -> Ordering {
    let a = parse_name(a);
    let b = parse_name(b);

    match (a.priority(), b.priority()) {
        (Some(a_priority), Some(b_priority)) if a.prefix != b.prefix => {
            a_priority.cmp(&b_priority)
        }
        (None, None) if a.prefix != b.prefix => a.prefix.cmp(&b.prefix),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => (a.naming, a.bus, a.num).cmp(&(b.naming, b.bus, b.num)),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Interface, InterfaceAddr, NamingType, ParsedName, compare_names, eligible_interfaces,
        p2p_possible, parse_name,
    };

    fn iface(name: &str, up: bool, loopback: bool, addrs: usize) -> Interface {
        Interface {
            name: name.to_string(),
            index: 0,
            is_up: up,
            is_loopback: loopback,
            is_multicast: !loopback,
            addrs: (0..addrs)
                .map(|n| InterfaceAddr {
                    ip: [192, 168, 1, n as u8].into(),
                    prefix: 24,
                })
                .collect(),
        }
    }

    #[test]
    fn predictable_names_parse() {
        assert_eq!(parse_name("enp0s3"), ParsedName {
            prefix: "en".into(),
            naming: NamingType::BusSlot,
            bus: 0,
            num: 3,
        });
        assert_eq!(parse_name("eno1"), ParsedName {
            prefix: "en".into(),
            naming: NamingType::Onboard,
            bus: 1,
            num: 0,
        });
        assert_eq!(parse_name("wlp2s0"), ParsedName {
            prefix: "wl".into(),
            naming: NamingType::BusSlot,
            bus: 2,
            num: 0,
        });
        // MAC-based names carry the address as one hex number.
        assert_eq!(parse_name("enx001122334455"), ParsedName {
            prefix: "en".into(),
            naming: NamingType::Mac,
            bus: 0x001122334455,
            num: 0,
        });
    }

    #[test]
    fn legacy_names_parse() {
        assert_eq!(parse_name("eth0"), ParsedName {
            prefix: "eth".into(),
            naming: NamingType::Legacy,
            bus: 0,
            num: 0,
        });
        assert_eq!(parse_name("wlan12"), ParsedName {
            prefix: "wlan".into(),
            naming: NamingType::Legacy,
            bus: 0,
            num: 12,
        });
        // No numeric suffix parses to an empty prefix.
        assert_eq!(parse_name("docker").prefix, "");
    }

    #[test]
    fn priority_order_is_stable() {
        let mut names = vec!["lo0", "eth0", "enp0s3", "wlan0", "docker0", "eth1"];
        names.sort_by(|a, b| compare_names(a, b));
        assert_eq!(names, vec![
            "wlan0", "enp0s3", "eth0", "eth1", "lo0", "docker0"
        ]);
    }

    #[test]
    fn same_prefix_sorts_by_scheme_then_number() {
        // Legacy beats predictable naming for the same prefix.
        assert!(compare_names("eth0", "enp0s3").is_gt());
        assert!(compare_names("en0", "enp0s3").is_lt());
        assert!(compare_names("enp0s3", "enp0s4").is_lt());
        assert!(compare_names("enp0s3", "enp1s0").is_lt());
    }

    #[test]
    fn only_usable_interfaces_are_announced() {
        let interfaces = vec![
            iface("lo0", true, true, 1),
            iface("eth0", true, false, 1),
            iface("eth1", false, false, 1),
            iface("wlan0", true, false, 0),
            iface("wlp2s0", true, false, 2),
        ];
        let eligible = eligible_interfaces(interfaces);
        let names: Vec<&str> = eligible.iter().map(|iface| iface.name.as_str()).collect();
        // Down, loopback and addressless interfaces are dropped, wireless
        // sorts first.
        assert_eq!(names, vec!["wlp2s0", "eth0"]);
    }

    #[test]
    fn p2p_needs_a_non_loopback_interface() {
        assert!(!p2p_possible(&[iface("lo0", true, true, 1)]));
        assert!(!p2p_possible(&[iface("eth0", false, false, 1)]));
        assert!(p2p_possible(&[
            iface("lo0", true, true, 1),
            iface("eth0", true, false, 1),
        ]));
    }
}
