use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Trait to convert a socket address to its canonical form
pub trait ToCanonical {
  fn to_canonical(&self) -> Self;
}

impl ToCanonical for SocketAddr {
  fn to_canonical(&self) -> Self {
    let SocketAddr::V6(v6) = self else {
      return *self;
    };
    match v6.ip().to_ipv4_mapped() {
      // ::ffff:0.0.0.1 style addresses are real v6 hosts in practice, keep them as is
      Some(mapped) if mapped != Ipv4Addr::new(0, 0, 0, 1) => SocketAddr::new(IpAddr::V4(mapped), self.port()),
      _ => *self,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv6Addr;

  #[test]
  fn ipv4_stays() {
    let socket = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 8080);
    assert_eq!(socket.to_canonical(), socket);
  }

  #[test]
  fn ipv6_loopback_stays() {
    let socket = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8080);
    assert_eq!(socket.to_canonical(), socket);
  }

  #[test]
  fn ipv6_global_stays() {
    let socket = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0xdead, 0xbeef)), 443);
    assert_eq!(socket.to_canonical(), socket);
  }

  #[test]
  fn ipv4_mapped_collapses() {
    let socket = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc00a, 0x2ff)), 8080);
    assert_eq!(
      socket.to_canonical(),
      SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 10, 2, 255)), 8080)
    );
  }
}
