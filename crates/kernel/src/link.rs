//! Interface inventory from `ip -j addr`, the default route, and wireless
//! capability markers in sysfs.

use crate::Error;
use itertools::Itertools;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

/// One non-loopback interface as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub is_up: bool,
    pub is_wireless: bool,
    pub mac_address: Option<String>,
    pub ipv4_addresses: Vec<Ipv4Addr>,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    #[serde(default)]
    ifname: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<RawAddr>,
}

#[derive(Debug, Deserialize)]
struct RawAddr {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    local: Option<String>,
}

/// Parse the JSON emitted by `ip -j addr`.
///
/// Loopback and nameless entries are dropped. `is_wireless` is filled in by
/// the `wireless` predicate, which receives the interface name.
pub fn parse_ip_addr_json(
    json: &str,
    wireless: impl Fn(&str) -> bool,
) -> Result<Vec<Link>, Error> {
    let raw: Vec<RawLink> = serde_json::from_str(json)?;
    let links = raw
        .into_iter()
        .filter_map(|entry| {
            let name = entry.ifname.filter(|name| !name.is_empty() && name != "lo")?;
            let ipv4_addresses = entry
                .addr_info
                .iter()
                .filter(|addr| addr.family.as_deref() == Some("inet"))
                .filter_map(|addr| addr.local.as_deref()?.parse().ok())
                .collect();
            Some(Link {
                is_up: entry.flags.iter().any(|flag| flag == "UP"),
                is_wireless: wireless(&name),
                mac_address: entry.address.filter(|mac| !mac.is_empty()),
                ipv4_addresses,
                name,
            })
        })
        .collect();
    Ok(links)
}

/// Interface named after `dev` in the first line of `ip route show default`.
///
/// ```
/// # use kernel::link::parse_default_route;
/// let out = "default via 192.168.1.1 dev eth0 proto dhcp metric 100\n";
/// assert_eq!(parse_default_route(out).as_deref(), Some("eth0"));
/// assert_eq!(parse_default_route(""), None);
/// ```
pub fn parse_default_route(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.split_whitespace()
            .tuple_windows()
            .find(|(key, _)| *key == "dev")
            .map(|(_, dev)| dev.to_owned())
    })
}

/// SSIDs from `nmcli -t -f SSID device wifi list`, blank lines removed.
pub fn parse_ssid_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .unique()
        .collect()
}

/// Whether `<sys_class_net>/<name>/wireless` exists.
pub fn is_wireless(sys_class_net: &Path, name: &str) -> bool {
    sys_class_net.join(name).join("wireless").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IP_ADDR: &str = r#"[
      {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"address":"00:00:00:00:00:00",
       "addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
      {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],"address":"52:54:00:12:34:56",
       "addr_info":[{"family":"inet","local":"10.0.2.15","prefixlen":24},
                    {"family":"inet6","local":"fe80::5054:ff:fe12:3456","prefixlen":64}]},
      {"ifindex":3,"ifname":"wlan0","flags":["BROADCAST","MULTICAST"],"address":"a0:b1:c2:d3:e4:f5",
       "addr_info":[]},
      {"ifindex":4,"flags":["UP"]}
    ]"#;

    #[test]
    fn parses_links_and_skips_loopback() {
        let links = parse_ip_addr_json(IP_ADDR, |name| name.starts_with("wlan")).unwrap();
        assert_eq!(
            links,
            vec![
                Link {
                    name: "eth0".into(),
                    is_up: true,
                    is_wireless: false,
                    mac_address: Some("52:54:00:12:34:56".into()),
                    ipv4_addresses: vec![Ipv4Addr::new(10, 0, 2, 15)],
                },
                Link {
                    name: "wlan0".into(),
                    is_up: false,
                    is_wireless: true,
                    mac_address: Some("a0:b1:c2:d3:e4:f5".into()),
                    ipv4_addresses: vec![],
                },
            ]
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_ip_addr_json("not json", |_| false).is_err());
    }

    #[test]
    fn default_route_without_dev_is_none() {
        assert_eq!(parse_default_route("default via 10.0.0.1\n"), None);
        assert_eq!(
            parse_default_route("default dev wlan1 scope link\n").as_deref(),
            Some("wlan1")
        );
    }

    #[test]
    fn ssid_list_dedups_and_trims() {
        let out = "home\n\ncafe\nhome\n  \n";
        assert_eq!(parse_ssid_list(out), vec!["home", "cafe"]);
    }

    #[test]
    fn wireless_marker_is_a_directory_probe() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("wlan0/wireless")).unwrap();
        std::fs::create_dir_all(root.path().join("eth0")).unwrap();
        assert!(is_wireless(root.path(), "wlan0"));
        assert!(!is_wireless(root.path(), "eth0"));
    }
}
