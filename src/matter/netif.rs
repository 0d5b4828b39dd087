//! Network interface selection.
//!
//! The default UnixNetifs implementation returns all interfaces, including
//! Thread mesh addresses that may be visible via mDNS reflection but don't
//! belong to this host. The bridge reports exactly one interface instead.

use std::ffi::CString;
use std::net::{Ipv4Addr, Ipv6Addr};

use log::{debug, warn};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{InterfaceFlags, if_nametoindex};
use nix::sys::socket::{AddressFamily, SockaddrLike};

use rs_matter::dm::clusters::gen_diag::{InterfaceTypeEnum, NetifDiag, NetifInfo};
use rs_matter::dm::networks::NetChangeNotif;
use rs_matter::error::{Error, ErrorCode};

/// Addresses of one interface, link-local IPv6 excluded.
#[derive(Debug, Default)]
pub struct InterfaceAddrs {
    pub index: u32,
    pub operational: bool,
    pub hw_addr: [u8; 8],
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

fn is_link_local(ip: &Ipv6Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80
}

/// Collect the addresses of `interface_name`. `None` if it does not exist.
pub fn interface_addrs(interface_name: &str) -> Option<InterfaceAddrs> {
    let addrs = getifaddrs().ok()?;
    let mut result = InterfaceAddrs::default();
    let mut found = false;

    for ifaddr in addrs {
        if ifaddr.interface_name != interface_name {
            continue;
        }
        found = true;

        if ifaddr.flags.contains(InterfaceFlags::IFF_RUNNING) {
            result.operational = true;
        }

        if let Some(addr) = ifaddr.address
            && let Some(family) = addr.family()
        {
            match family {
                AddressFamily::Inet => {
                    if let Some(sockaddr) = addr.as_sockaddr_in() {
                        result.ipv4.push(sockaddr.ip());
                    }
                }
                AddressFamily::Inet6 => {
                    if let Some(sockaddr) = addr.as_sockaddr_in6()
                        && !is_link_local(&sockaddr.ip())
                    {
                        result.ipv6.push(sockaddr.ip());
                    }
                }
                AddressFamily::Packet => {
                    if let Some(link_addr) = addr.as_link_addr()
                        && let Some(mac) = link_addr.addr()
                    {
                        let len = mac.len().min(8);
                        result.hw_addr[..len].copy_from_slice(&mac[..len]);
                    }
                }
                _ => {}
            }
        }
    }

    if !found {
        return None;
    }
    result.index = CString::new(interface_name)
        .ok()
        .and_then(|name| if_nametoindex(name.as_c_str()).ok())
        .unwrap_or(0);
    Some(result)
}

/// Pick the interface to announce on.
///
/// An explicit choice is used as-is; otherwise the first running, non-loopback
/// interface with an IPv4 address wins.
pub fn detect_interface(preferred: Option<&str>) -> Result<String, Error> {
    if let Some(name) = preferred {
        return Ok(name.to_string());
    }

    let addrs = getifaddrs().map_err(|e| {
        warn!("[Matter] Failed to list interfaces: {}", e);
        Error::from(ErrorCode::NoNetworkInterface)
    })?;
    for ifaddr in addrs {
        let usable = ifaddr.flags.contains(InterfaceFlags::IFF_RUNNING)
            && !ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK);
        let has_ipv4 = ifaddr
            .address
            .as_ref()
            .and_then(|a| a.as_sockaddr_in())
            .is_some();
        if usable && has_ipv4 {
            debug!("[Matter] Auto-detected interface '{}'", ifaddr.interface_name);
            return Ok(ifaddr.interface_name);
        }
    }
    Err(ErrorCode::NoNetworkInterface.into())
}

/// Network diagnostics restricted to a single interface.
#[derive(Clone, Copy)]
pub struct FilteredNetifs {
    interface_name: &'static str,
}

impl FilteredNetifs {
    pub const fn new(interface_name: &'static str) -> Self {
        Self { interface_name }
    }
}

impl NetifDiag for FilteredNetifs {
    fn netifs(&self, f: &mut dyn FnMut(&NetifInfo) -> Result<(), Error>) -> Result<(), Error> {
        let Some(addrs) = interface_addrs(self.interface_name) else {
            warn!(
                "[Matter] Interface '{}' not found",
                self.interface_name
            );
            return Ok(());
        };

        let info = NetifInfo {
            name: self.interface_name,
            operational: addrs.operational,
            offprem_svc_reachable_ipv4: None,
            offprem_svc_reachable_ipv6: None,
            hw_addr: &addrs.hw_addr,
            ipv4_addrs: &addrs.ipv4,
            ipv6_addrs: &addrs.ipv6,
            netif_type: InterfaceTypeEnum::Ethernet,
            netif_index: addrs.index,
        };

        f(&info)
    }
}

impl NetChangeNotif for FilteredNetifs {
    async fn wait_changed(&self) {
        core::future::pending().await
    }
}
