//! Conversions between [`no_std_net`] and [`std::net`] address types —
//! the two crates are structurally identical but nominally distinct,
//! so every std socket call needs one of these at its seam.

pub(crate) fn to_std(addr: no_std_net::SocketAddr) -> std::net::SocketAddr {
  match addr {
    | no_std_net::SocketAddr::V4(a) => std::net::SocketAddr::V4(std::net::SocketAddrV4::new(to_std_ipv4(*a.ip()), a.port())),
    | no_std_net::SocketAddr::V6(a) => {
      std::net::SocketAddr::V6(std::net::SocketAddrV6::new(to_std_ipv6(*a.ip()), a.port(), a.flowinfo(), a.scope_id()))
    },
  }
}

pub(crate) fn to_no_std(addr: std::net::SocketAddr) -> no_std_net::SocketAddr {
  match addr {
    | std::net::SocketAddr::V4(a) => no_std_net::SocketAddr::V4(no_std_net::SocketAddrV4::new(to_no_std_ipv4(*a.ip()), a.port())),
    | std::net::SocketAddr::V6(a) => {
      no_std_net::SocketAddr::V6(no_std_net::SocketAddrV6::new(to_no_std_ipv6(*a.ip()), a.port(), a.flowinfo(), a.scope_id()))
    },
  }
}

pub(crate) fn to_std_ip(addr: no_std_net::IpAddr) -> std::net::IpAddr {
  match addr {
    | no_std_net::IpAddr::V4(v4) => std::net::IpAddr::V4(to_std_ipv4(v4)),
    | no_std_net::IpAddr::V6(v6) => std::net::IpAddr::V6(to_std_ipv6(v6)),
  }
}

fn to_std_ipv4(ip: no_std_net::Ipv4Addr) -> std::net::Ipv4Addr {
  std::net::Ipv4Addr::from(ip.octets())
}

fn to_std_ipv6(ip: no_std_net::Ipv6Addr) -> std::net::Ipv6Addr {
  std::net::Ipv6Addr::from(ip.octets())
}

fn to_no_std_ipv4(ip: std::net::Ipv4Addr) -> no_std_net::Ipv4Addr {
  no_std_net::Ipv4Addr::from(ip.octets())
}

fn to_no_std_ipv6(ip: std::net::Ipv6Addr) -> no_std_net::Ipv6Addr {
  no_std_net::Ipv6Addr::from(ip.octets())
}
