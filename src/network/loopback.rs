//! In-memory shared medium.
//!
//! Every device attaches a [`LoopbackPort`] to one [`LoopbackBus`]. A unicast
//! lands in the destination's inbound queue; a broadcast lands in every queue
//! except the sender's. Delivery is instant, lossless and ordered; wrap a port
//! in [`ChaosTransport`](crate::ChaosTransport) for anything else.
//!
//! ```
//! use reflex_duel::network::loopback::LoopbackBus;
//! use reflex_duel::{DeviceId, Transport};
//!
//! let bus = LoopbackBus::new();
//! let mut host = bus.port(DeviceId::HOST);
//! let mut stick = bus.port(DeviceId::STICK1);
//!
//! host.send_to(&[1, 2, 3], DeviceId::BROADCAST);
//! assert_eq!(stick.receive_all_bytes(), vec![1, 2, 3]);
//! assert!(host.receive_all_bytes().is_empty());
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::transport::Transport;
use crate::DeviceId;

#[derive(Debug, Default)]
struct BusState {
    queues: BTreeMap<DeviceId, VecDeque<u8>>,
    bytes_delivered: u64,
    bytes_unroutable: u64,
}

/// Shared in-memory medium. Clones share the same medium.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl LoopbackBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device and returns its port.
    ///
    /// Attaching the same id twice returns a second handle to the same queue.
    #[must_use]
    pub fn port(&self, id: DeviceId) -> LoopbackPort {
        self.state.lock().queues.entry(id).or_default();
        LoopbackPort {
            id,
            state: Arc::clone(&self.state),
        }
    }

    /// Total bytes placed in inbound queues.
    #[must_use]
    pub fn bytes_delivered(&self) -> u64 {
        self.state.lock().bytes_delivered
    }

    /// Bytes sent to ids with no attached port.
    #[must_use]
    pub fn bytes_unroutable(&self) -> u64 {
        self.state.lock().bytes_unroutable
    }
}

/// One device's attachment to a [`LoopbackBus`].
#[derive(Debug)]
pub struct LoopbackPort {
    id: DeviceId,
    state: Arc<Mutex<BusState>>,
}

impl LoopbackPort {
    /// The id this port was attached with.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }
}

impl Transport for LoopbackPort {
    fn send_to(&mut self, bytes: &[u8], to: DeviceId) {
        let mut state = self.state.lock();
        let len = bytes.len() as u64;
        if to == DeviceId::BROADCAST {
            let mut copies = 0;
            for (_, queue) in state.queues.iter_mut().filter(|(id, _)| **id != self.id) {
                queue.extend(bytes.iter().copied());
                copies += 1;
            }
            state.bytes_delivered += len * copies;
        } else if let Some(queue) = state.queues.get_mut(&to) {
            queue.extend(bytes.iter().copied());
            state.bytes_delivered += len;
        } else {
            state.bytes_unroutable += len;
        }
    }

    fn receive_all_bytes(&mut self) -> Vec<u8> {
        self.state
            .lock()
            .queues
            .get_mut(&self.id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
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

    #[test]
    fn unicast_reaches_only_destination() {
        let bus = LoopbackBus::new();
        let mut host = bus.port(DeviceId::HOST);
        let mut stick1 = bus.port(DeviceId::STICK1);
        let mut stick2 = bus.port(DeviceId::STICK2);

        host.send_to(&[0xAA], DeviceId::STICK2);
        assert!(stick1.receive_all_bytes().is_empty());
        assert_eq!(stick2.receive_all_bytes(), vec![0xAA]);
        assert_eq!(bus.bytes_delivered(), 1);
    }

    #[test]
    fn broadcast_skips_sender() {
        let bus = LoopbackBus::new();
        let mut host = bus.port(DeviceId::HOST);
        let mut sticks: Vec<_> = DeviceId::CONTROLLERS.iter().map(|id| bus.port(*id)).collect();

        host.send_to(&[1, 2], DeviceId::BROADCAST);
        for stick in &mut sticks {
            assert_eq!(stick.receive_all_bytes(), vec![1, 2]);
        }
        assert!(host.receive_all_bytes().is_empty());
        assert_eq!(bus.bytes_delivered(), 8);
    }

    #[test]
    fn unattached_destination_is_counted() {
        let bus = LoopbackBus::new();
        let mut host = bus.port(DeviceId::HOST);
        host.send_to(&[0; 7], DeviceId::DISPLAY);
        assert_eq!(bus.bytes_unroutable(), 7);
    }

    #[test]
    fn ports_work_across_threads() {
        let bus = LoopbackBus::new();
        let mut host = bus.port(DeviceId::HOST);
        let mut stick = bus.port(DeviceId::STICK1);
        std::thread::spawn(move || stick.send_to(&[9], DeviceId::HOST))
            .join()
            .unwrap();
        assert_eq!(host.receive_all_bytes(), vec![9]);
    }
}
