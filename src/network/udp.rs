use std::{
    collections::BTreeMap,
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
};

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{DeviceId, DuelError, Transport};

const RECV_BUFFER_SIZE: usize = 512;

/// A non-blocking UDP stand-in for the radio, for running devices as separate
/// processes on one network.
///
/// Every device id maps to a socket address in a fixed peer table. A broadcast
/// is one datagram to each table entry. Datagrams carry raw frame bytes, so the
/// streaming decoder above sees exactly what a radio would hand it.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peers: BTreeMap<DeviceId, SocketAddr>,
    recv_buffer: [u8; RECV_BUFFER_SIZE],
}

impl UdpTransport {
    /// Binds to 0.0.0.0:port in non-blocking mode.
    pub fn bind_to_port(port: u16) -> Result<Self, DuelError> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// Binds to `addr` in non-blocking mode.
    pub fn bind(addr: SocketAddr) -> Result<Self, DuelError> {
        let socket = UdpSocket::bind(addr).map_err(|err| DuelError::TransportError {
            context: format!("bind {addr}: {err}"),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|err| DuelError::TransportError {
                context: format!("set_nonblocking on {addr}: {err}"),
            })?;
        Ok(Self {
            socket,
            peers: BTreeMap::new(),
            recv_buffer: [0; RECV_BUFFER_SIZE],
        })
    }

    /// Adds (or replaces) the address of a peer device.
    #[must_use]
    pub fn with_peer(mut self, id: DeviceId, addr: SocketAddr) -> Self {
        self.add_peer(id, addr);
        self
    }

    /// Adds (or replaces) the address of a peer device.
    pub fn add_peer(&mut self, id: DeviceId, addr: SocketAddr) {
        self.peers.insert(id, addr);
    }

    /// The address this transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, DuelError> {
        self.socket
            .local_addr()
            .map_err(|err| DuelError::TransportError {
                context: format!("local_addr: {err}"),
            })
    }

    fn send_datagram(&self, bytes: &[u8], addr: SocketAddr) {
        // Best effort, like the radio it stands in for
        if let Err(e) = self.socket.send_to(bytes, addr) {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Transport,
                "Failed to send UDP datagram to {}: {}",
                addr,
                e
            );
        }
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, bytes: &[u8], to: DeviceId) {
        if to == DeviceId::BROADCAST {
            for addr in self.peers.values() {
                self.send_datagram(bytes, *addr);
            }
            return;
        }
        match self.peers.get(&to) {
            Some(addr) => self.send_datagram(bytes, *addr),
            None => report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Transport,
                "No address known for {}; {} bytes dropped",
                to,
                bytes.len()
            ),
        }
    }

    fn receive_all_bytes(&mut self) -> Vec<u8> {
        let mut received = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((number_of_bytes, _src)) => {
                    if let Some(slice) = self.recv_buffer.get(..number_of_bytes) {
                        received.extend_from_slice(slice);
                    }
                },
                // there are no more datagrams
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return received,
                // datagram sockets sometimes get this after a send to a closed port
                Err(ref err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    report_violation!(
                        ViolationSeverity::Error,
                        ViolationKind::Transport,
                        "Unexpected socket error: {:?}: {}",
                        err.kind(),
                        err
                    );
                    return received;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::network::codec::{decode_stream, encode};
    use crate::network::messages::codes;
    use web_time::{Duration, Instant};

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn receive_with_deadline(transport: &mut UdpTransport) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let bytes = transport.receive_all_bytes();
            if !bytes.is_empty() || Instant::now() > deadline {
                return bytes;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn frames_travel_between_sockets() {
        let mut stick = UdpTransport::bind(localhost()).unwrap();
        let stick_addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            stick.local_addr().unwrap().port(),
        );
        let mut host = UdpTransport::bind(localhost())
            .unwrap()
            .with_peer(DeviceId::STICK1, stick_addr);

        let frame = encode(0x01, 0x00, codes::GO, 0);
        host.send_to(&frame, DeviceId::STICK1);

        let frames = decode_stream(&receive_with_deadline(&mut stick));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd, codes::GO);
    }

    #[test]
    fn unknown_peer_is_dropped_quietly() {
        let mut host = UdpTransport::bind(localhost()).unwrap();
        host.send_to(&[0; 7], DeviceId::DISPLAY);
        assert!(host.receive_all_bytes().is_empty());
    }
}
