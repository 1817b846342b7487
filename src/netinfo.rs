use std::net::{IpAddr, Ipv4Addr, UdpSocket};

const PROBE_ADDR: &str = "8.8.8.8:80";

/// Best-effort LAN address of this host.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface, whose address is read back. Any failure yields
/// `127.0.0.1`.
pub fn local_ip() -> IpAddr {
    match probe() {
        Ok(ip) => ip,
        Err(err) => {
            log::debug!("netinfo: LAN address discovery failed: {}", err);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(PROBE_ADDR)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no outbound interface",
        ));
    }
    Ok(ip)
}
