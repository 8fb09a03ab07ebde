use std::net::{SocketAddr, TcpListener, UdpSocket};

/// Gets a new socket address allocated by the OS.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Gets a new socket address allocated by the OS which is free for UDP traffic.
///
/// Gossip runs over UDP, so the TCP allocation above says nothing about it.
pub fn get_unused_udp_addr() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unused_addr() {
        let addr = get_unused_addr();
        TcpListener::bind(addr).expect("Connect to allocated address");
    }

    #[test]
    fn test_get_unused_udp_addr() {
        let addr = get_unused_udp_addr();
        UdpSocket::bind(addr).expect("Bind to allocated address");
    }
}
