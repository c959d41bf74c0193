//! Live-connection registry: slot assignment, admission control, eviction.
//!
//! The registry order is canonical: a connection's index in the vector is
//! its slot into the input/camera tables. Removing a connection compacts
//! the tables so indices stay dense and every surviving connection keeps
//! the slot matching its registry position.

use crate::state::SlotTables;
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One logical outbound payload: the ordered transport messages that carry
/// it. A descriptor is one message; a fragmented frame is several.
pub type Payload = Vec<Vec<u8>>;

/// A live connection as the engine sees it.
pub struct ClientHandle {
    id: u64,
    outbound: mpsc::Sender<Payload>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking enqueue onto the client's outbound queue. Returns
    /// false when the queue is full or the pump is gone; the payload is
    /// dropped either way.
    pub fn try_send(&self, payload: Payload) -> bool {
        self.outbound.try_send(payload).is_ok()
    }
}

/// All live connections, ordered by slot.
pub struct ClientRegistry {
    clients: Vec<ClientHandle>,
    tables: Arc<SlotTables>,
    next_id: u64,
}

impl ClientRegistry {
    /// The table capacity doubles as the admission cap.
    pub fn new(tables: Arc<SlotTables>) -> Self {
        Self {
            clients: Vec::new(),
            tables,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Slot-ordered view of the live connections.
    pub fn handles(&self) -> &[ClientHandle] {
        &self.clients
    }

    /// Admits a connection, assigning it the next free slot with a zeroed
    /// input and the centred initial camera. Returns `None` at capacity.
    pub fn admit(&mut self, outbound: mpsc::Sender<Payload>) -> Option<u64> {
        if self.clients.len() >= self.tables.capacity() {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        let slot = self.clients.len();
        self.tables.reset_slot(slot);
        self.clients.push(ClientHandle { id, outbound });

        info!("client {} connected (slot {})", id, slot);
        Some(id)
    }

    /// Current slot of a connection, if it is still live.
    pub fn slot_of(&self, id: u64) -> Option<usize> {
        self.clients.iter().position(|c| c.id == id)
    }

    /// Removes a connection and compacts the slot tables. Dropping the
    /// handle closes the outbound queue, which stops the write pump.
    /// Returns false if the connection was already gone.
    pub fn evict(&mut self, id: u64) -> bool {
        let Some(slot) = self.slot_of(id) else {
            return false;
        };

        let live_before = self.clients.len();
        self.clients.remove(slot);
        self.tables.compact_from(slot, live_before);

        info!("client {} disconnected (slot {})", id, slot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Input;

    fn test_registry(max_clients: usize) -> (ClientRegistry, Arc<SlotTables>) {
        let tables = Arc::new(SlotTables::new(max_clients, 2800, 2800));
        (ClientRegistry::new(Arc::clone(&tables)), tables)
    }

    fn queue() -> (mpsc::Sender<Payload>, mpsc::Receiver<Payload>) {
        mpsc::channel(2)
    }

    #[test]
    fn admits_up_to_capacity_then_refuses() {
        let (mut registry, _tables) = test_registry(2);

        let (tx1, _rx1) = queue();
        let (tx2, _rx2) = queue();
        let (tx3, _rx3) = queue();

        assert!(registry.admit(tx1).is_some());
        assert!(registry.admit(tx2).is_some());
        assert_eq!(registry.len(), 2);

        // The third connection is refused cleanly.
        assert!(registry.admit(tx3).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn slots_follow_registry_order() {
        let (mut registry, _tables) = test_registry(3);
        let (tx1, _rx1) = queue();
        let (tx2, _rx2) = queue();

        let a = registry.admit(tx1).unwrap();
        let b = registry.admit(tx2).unwrap();

        assert_eq!(registry.slot_of(a), Some(0));
        assert_eq!(registry.slot_of(b), Some(1));
        assert_eq!(registry.slot_of(999), None);
    }

    #[test]
    fn eviction_compacts_slots_and_tables() {
        let (mut registry, tables) = test_registry(3);
        let (tx1, _rx1) = queue();
        let (tx2, _rx2) = queue();

        let a = registry.admit(tx1).unwrap();
        let b = registry.admit(tx2).unwrap();

        tables.inputs[0].store(Input {
            x: 1.0,
            y: 0.0,
            is_touch_down: true,
        });
        tables.inputs[1].store(Input {
            x: 2.0,
            y: 0.0,
            is_touch_down: true,
        });

        assert!(registry.evict(a));
        assert_eq!(registry.len(), 1);

        // The survivor moved down a slot and its input followed it.
        assert_eq!(registry.slot_of(b), Some(0));
        assert_eq!(tables.inputs[0].load().x, 2.0);
        assert_eq!(tables.cameras[1].load(), tables.initial_camera());
        assert!(!tables.inputs[1].load().is_touch_down);
    }

    #[test]
    fn eviction_is_idempotent() {
        let (mut registry, _tables) = test_registry(2);
        let (tx, _rx) = queue();
        let id = registry.admit(tx).unwrap();

        assert!(registry.evict(id));
        assert!(!registry.evict(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn admission_resets_a_recycled_slot() {
        let (mut registry, tables) = test_registry(2);
        let (tx, _rx) = queue();
        let id = registry.admit(tx).unwrap();
        tables.inputs[0].store(Input {
            x: 5.0,
            y: 5.0,
            is_touch_down: true,
        });
        registry.evict(id);

        let (tx2, _rx2) = queue();
        registry.admit(tx2).unwrap();
        assert!(!tables.inputs[0].load().is_touch_down);
        assert_eq!(tables.cameras[0].load(), tables.initial_camera());
    }

    #[tokio::test]
    async fn try_send_drops_when_queue_is_full() {
        let (mut registry, _tables) = test_registry(1);
        let (tx, mut rx) = queue();
        registry.admit(tx).unwrap();
        let client = &registry.handles()[0];

        assert!(client.try_send(vec![vec![1]]));
        assert!(client.try_send(vec![vec![2]]));
        // Queue holds 2 payloads; the third is dropped.
        assert!(!client.try_send(vec![vec![3]]));

        assert_eq!(rx.recv().await.unwrap(), vec![vec![1]]);
        assert_eq!(rx.recv().await.unwrap(), vec![vec![2]]);
    }
}
