use std::{cell::RefCell, rc::Rc};

use canopy::{
    LiveValue, NodeId, Room, RoomConfig, StorageUpdate, op::Op, room::SubscribeOptions,
    transport::BufferedTransport,
};
use serde_json::Value as Json;

/// Every notification delivered to one subscription, in order.
pub type Recorded = Rc<RefCell<Vec<Vec<StorageUpdate>>>>;

// ==========================
// ROOM FACTORIES
// ==========================

/// A room with a fixed connection id and no transport.
pub fn test_room(connection_id: u32) -> Room {
    Room::new(RoomConfig::default().with_connection_id(connection_id))
}

/// A room whose root holds an empty list under `items`.
pub fn room_with_list(connection_id: u32) -> (Room, NodeId) {
    let mut room = test_room(connection_id);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(Vec::<LiveValue>::new()))
        .expect("Failed to create list")
        .expect("lists are nodes");
    (room, list)
}

/// Root projection as plain JSON.
pub fn root_json(room: &Room) -> Json {
    room.root().expect("Failed to project root").to_json()
}

/// Plain JSON of one list.
pub fn list_json(room: &Room, list: &NodeId) -> Json {
    room.to_immutable(list)
        .expect("Failed to project list")
        .to_json()
}

/// Subscribes to `target` and records each notification.
pub fn record_updates(room: &mut Room, target: &NodeId, options: SubscribeOptions) -> Recorded {
    let recorded: Recorded = Rc::default();
    let sink = recorded.clone();
    room.subscribe(target, options, move |updates| {
        sink.borrow_mut().push(updates.to_vec())
    })
    .expect("Failed to subscribe");
    recorded
}

// ==========================
// SEQUENCING SERVER
// ==========================

pub struct Client {
    pub room: Room,
    outbox: BufferedTransport,
    connected: bool,
}

/// An in-process stand-in for the room server.
///
/// Clients send through a [`BufferedTransport`]; [`Network::sync`] drains
/// every outbox in client order, sequences the ops and echoes them to all
/// clients, the sender included (where they act as acks). An observer room
/// with no local writes receives the same sequence and serves snapshots.
pub struct Network {
    pub clients: Vec<Client>,
    pub observer: Room,
    pub log: Vec<Op>,
}

impl Network {
    /// `count` clients sharing the same initial storage.
    pub fn new(count: usize) -> Self {
        Self::with_setup(count, |_| {})
    }

    /// Runs `setup` on a seed room and loads every client from its snapshot.
    pub fn with_setup(count: usize, setup: impl FnOnce(&mut Room)) -> Self {
        let mut seed = test_room(1000);
        setup(&mut seed);
        let snapshot = seed
            .get_full_state_snapshot()
            .expect("Failed to snapshot seed room");

        let clients = (0..count)
            .map(|i| {
                let outbox = BufferedTransport::new();
                let config = RoomConfig::default().with_connection_id(i as u32 + 1);
                let room = Room::from_snapshot(config, snapshot.clone())
                    .expect("Failed to load client")
                    .with_transport(outbox.clone());
                Client {
                    room,
                    outbox,
                    connected: true,
                }
            })
            .collect();
        let observer = Room::from_snapshot(RoomConfig::default().with_connection_id(999), snapshot)
            .expect("Failed to load observer");

        Self {
            clients,
            observer,
            log: Vec::new(),
        }
    }

    pub fn room(&mut self, index: usize) -> &mut Room {
        &mut self.clients[index].room
    }

    /// Everything client `index` has sent and the server has not sequenced yet.
    pub fn take_outgoing(&mut self, index: usize) -> Vec<Op> {
        self.clients[index].outbox.take().into_iter().flatten().collect()
    }

    /// Cuts client `index` off: nothing it sends arrives and it receives nothing.
    pub fn disconnect(&mut self, index: usize) {
        self.clients[index].outbox.take();
        self.clients[index].connected = false;
    }

    /// Reconnects client `index` with a fresh server snapshot.
    pub fn reconnect(&mut self, index: usize) {
        let snapshot = self
            .observer
            .get_full_state_snapshot()
            .expect("Failed to snapshot server state");
        let client = &mut self.clients[index];
        client.outbox.take();
        client.connected = true;
        client
            .room
            .reconnect_with_snapshot(snapshot)
            .expect("Failed to resync");
    }

    /// Echoes an already sequenced run of ops to every connected client and
    /// the observer.
    pub fn broadcast(&mut self, ops: &[Op]) {
        for client in self.clients.iter_mut().filter(|c| c.connected) {
            client
                .room
                .apply_remote_operations(ops)
                .expect("Failed to apply broadcast");
        }
        self.observer
            .apply_remote_operations(ops)
            .expect("Failed to apply broadcast to observer");
        self.log.extend_from_slice(ops);
    }

    /// Sequences outgoing ops client by client until every outbox is empty.
    pub fn sync(&mut self) {
        loop {
            let mut idle = true;
            for index in 0..self.clients.len() {
                if !self.clients[index].connected {
                    continue;
                }
                let ops = self.take_outgoing(index);
                if !ops.is_empty() {
                    idle = false;
                    self.broadcast(&ops);
                }
            }
            if idle {
                break;
            }
        }
    }

    /// Asserts every client matches the observer and has nothing pending.
    pub fn assert_converged(&self) {
        let expected = root_json(&self.observer);
        for (index, client) in self.clients.iter().enumerate() {
            assert_eq!(
                root_json(&client.room),
                expected,
                "client {index} diverged from the server state"
            );
            assert!(
                client.room.pending().is_empty(),
                "client {index} still has pending ops"
            );
        }
    }
}
