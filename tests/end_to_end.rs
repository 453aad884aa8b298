#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Full-stack tests: two network endpoints over an in-process transport,
//! covering handshake, encrypted envelopes, group decode and dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use gamenet::config::NetworkConfig;
use gamenet::core::packet::{take_i32, GroupTag, Packet, PacketContext, PacketGroup};
use gamenet::core::ping::{self, Ping, TYPE_PONG};
use gamenet::core::ConnectionId;
use gamenet::error::Result;
use gamenet::service::{Network, NetworkBuilder};
use gamenet::transport::MemoryTransport;
use gamenet::utils::{StaticKeypair, StaticPublicKey};
use std::any::Any;

const MOVE_TAG: u8 = 0x01;
const TYPE_MOVE: &str = "game.move";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Move {
    x: i32,
    y: i32,
}

impl Packet for Move {
    fn group(&self) -> GroupTag {
        GroupTag(MOVE_TAG)
    }

    fn type_tag(&self) -> &'static str {
        TYPE_MOVE
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        Ok(())
    }

    fn decode(&mut self, buf: &mut Bytes) -> Result<()> {
        self.x = take_i32(buf)?;
        self.y = take_i32(buf)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MoveGroup;

impl PacketGroup for MoveGroup {
    fn tag(&self) -> GroupTag {
        GroupTag(MOVE_TAG)
    }

    fn create(&self, _ctx: &PacketContext, _buf: &mut Bytes) -> Result<Box<dyn Packet>> {
        Ok(Box::new(Move::default()))
    }
}

type IdSlot = Arc<Mutex<Vec<ConnectionId>>>;

fn config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.workers.count = 2;
    })
}

fn server_with_moves(
    transport: MemoryTransport,
    keys: StaticKeypair,
    received: Arc<Mutex<Vec<(ConnectionId, Move)>>>,
    connected: IdSlot,
) -> Network {
    NetworkBuilder::new(config())
        .transport(transport)
        .server_keys(keys)
        .register_group(Box::new(MoveGroup))
        .unwrap()
        .register_handler(TYPE_MOVE, move |conn, packet| {
            let hit = packet.as_any().downcast_ref::<Move>().unwrap();
            received.lock().unwrap().push((conn, *hit));
            Ok(())
        })
        .unwrap()
        .on_connected(move |id| connected.lock().unwrap().push(id))
        .build()
        .unwrap()
}

fn client_with_moves(
    transport: MemoryTransport,
    server_key: StaticPublicKey,
    received: Arc<Mutex<Vec<(ConnectionId, Move)>>>,
    connected: IdSlot,
) -> Network {
    NetworkBuilder::new(config())
        .transport(transport)
        .pinned_server_key(server_key)
        .register_group(Box::new(MoveGroup))
        .unwrap()
        .register_handler(TYPE_MOVE, move |conn, packet| {
            let hit = packet.as_any().downcast_ref::<Move>().unwrap();
            received.lock().unwrap().push((conn, *hit));
            Ok(())
        })
        .unwrap()
        .on_connected(move |id| connected.lock().unwrap().push(id))
        .build()
        .unwrap()
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_packet_reaches_server_handler() {
    let server_transport = MemoryTransport::server();
    let client_transport = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let server_key = keys.public();

    let server_moves = Arc::new(Mutex::new(Vec::new()));
    let server_ids: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let server = server_with_moves(
        server_transport,
        keys,
        Arc::clone(&server_moves),
        Arc::clone(&server_ids),
    );

    let client_moves = Arc::new(Mutex::new(Vec::new()));
    let client_ids: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let client = client_with_moves(
        client_transport,
        server_key,
        Arc::clone(&client_moves),
        Arc::clone(&client_ids),
    );

    server.start().unwrap();
    client.start().unwrap();
    client.connect().unwrap();

    wait_until("handshake", || {
        !server_ids.lock().unwrap().is_empty() && !client_ids.lock().unwrap().is_empty()
    })
    .await;

    // Both sides agree on the connection identity.
    let client_id = client_ids.lock().unwrap()[0];
    let server_id = server_ids.lock().unwrap()[0];
    assert_eq!(client_id, server_id);

    client.send(&client_id, &Move { x: 5, y: 9 }).unwrap();
    wait_until("server receives move", || {
        !server_moves.lock().unwrap().is_empty()
    })
    .await;

    let (from, hit) = server_moves.lock().unwrap()[0];
    assert_eq!(from, server_id);
    assert_eq!(hit, Move { x: 5, y: 9 });

    // And the reverse direction.
    server.send(&server_id, &Move { x: -3, y: 7 }).unwrap();
    wait_until("client receives move", || {
        !client_moves.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(client_moves.lock().unwrap()[0].1, Move { x: -3, y: 7 });

    client.stop().unwrap();
    server.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_reaches_every_client() {
    let server_transport = MemoryTransport::server();
    let transport_a = MemoryTransport::client(&server_transport);
    let transport_b = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let server_key = keys.public();

    let server_moves = Arc::new(Mutex::new(Vec::new()));
    let server_ids: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let server = server_with_moves(server_transport, keys, server_moves, server_ids);

    let moves_a = Arc::new(Mutex::new(Vec::new()));
    let ids_a: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let client_a = client_with_moves(transport_a, server_key, Arc::clone(&moves_a), ids_a);

    let moves_b = Arc::new(Mutex::new(Vec::new()));
    let ids_b: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let client_b = client_with_moves(transport_b, server_key, Arc::clone(&moves_b), ids_b);

    server.start().unwrap();
    client_a.start().unwrap();
    client_b.start().unwrap();
    client_a.connect().unwrap();
    client_b.connect().unwrap();

    wait_until("both handshakes", || server.connection_count() == 2).await;

    let delivered = server.broadcast(&Move { x: 1, y: 2 }).unwrap();
    assert_eq!(delivered, 2);

    wait_until("both clients receive", || {
        !moves_a.lock().unwrap().is_empty() && !moves_b.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(moves_a.lock().unwrap()[0].1, Move { x: 1, y: 2 });
    assert_eq!(moves_b.lock().unwrap()[0].1, Move { x: 1, y: 2 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_pong_over_the_reserved_group() {
    let server_transport = MemoryTransport::server();
    let client_transport = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let server_key = keys.public();

    let server_ids: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let pongs = Arc::new(AtomicUsize::new(0));

    let ids = Arc::clone(&server_ids);
    let server = NetworkBuilder::new(config())
        .transport(server_transport)
        .server_keys(keys)
        .on_connected(move |id| ids.lock().unwrap().push(id))
        .build()
        .unwrap();
    ping::register_default_handlers(server.dispatcher()).unwrap();

    let counter = Arc::clone(&pongs);
    let client = NetworkBuilder::new(config())
        .transport(client_transport)
        .pinned_server_key(server_key)
        .register_handler(TYPE_PONG, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
        .build()
        .unwrap();

    server.start().unwrap();
    client.start().unwrap();
    client.connect().unwrap();

    wait_until("handshake", || !server_ids.lock().unwrap().is_empty()).await;
    let id = server_ids.lock().unwrap()[0];

    // The client probes; the server's default handler logs it. The server
    // answers with a pong the client counts.
    client.send(&id, &Ping::now()).unwrap();
    server
        .send(&id, &gamenet::core::ping::Pong { timestamp_ms: 1 })
        .unwrap();

    wait_until("pong arrives", || pongs.load(Ordering::SeqCst) == 1).await;

    let snapshot = server.metrics();
    assert_eq!(snapshot.dispatched, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refused_approval_never_connects() {
    let server_transport = MemoryTransport::server();
    let client_transport = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let server_key = keys.public();

    let server = NetworkBuilder::new(config())
        .transport(server_transport)
        .server_keys(keys)
        .on_approval(|_| false)
        .build()
        .unwrap();

    let client = NetworkBuilder::new(config())
        .transport(client_transport)
        .pinned_server_key(server_key)
        .build()
        .unwrap();

    server.start().unwrap();
    client.start().unwrap();
    client.connect().unwrap();

    // Give the refusal time to round-trip.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 0);
    assert_eq!(client.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wrong_pinned_key_tears_the_connection_down() {
    let server_transport = MemoryTransport::server();
    let client_transport = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let wrong_key = StaticKeypair::generate().public();

    let server = NetworkBuilder::new(config())
        .transport(server_transport)
        .server_keys(keys)
        .build()
        .unwrap();

    let client = NetworkBuilder::new(config())
        .transport(client_transport)
        .pinned_server_key(wrong_key)
        .build()
        .unwrap();

    server.start().unwrap();
    client.start().unwrap();
    client.connect().unwrap();

    // The server approves (the init itself is valid), the client rejects
    // the confirmation and hangs up, and the server unwinds its entry.
    wait_until("server unwinds", || server.connection_count() == 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_group_is_dropped_without_killing_the_session() {
    let server_transport = MemoryTransport::server();
    let client_transport = MemoryTransport::client(&server_transport);

    let keys = StaticKeypair::generate();
    let server_key = keys.public();

    // The server does not register the move group.
    let server_ids: IdSlot = Arc::new(Mutex::new(Vec::new()));
    let ids = Arc::clone(&server_ids);
    let server = NetworkBuilder::new(config())
        .transport(server_transport)
        .server_keys(keys)
        .on_connected(move |id| ids.lock().unwrap().push(id))
        .build()
        .unwrap();

    let client = NetworkBuilder::new(config())
        .transport(client_transport)
        .pinned_server_key(server_key)
        .register_group(Box::new(MoveGroup))
        .unwrap()
        .build()
        .unwrap();

    server.start().unwrap();
    client.start().unwrap();
    client.connect().unwrap();

    wait_until("handshake", || !server_ids.lock().unwrap().is_empty()).await;
    let id = server_ids.lock().unwrap()[0];

    client.send(&id, &Move { x: 5, y: 9 }).unwrap();
    wait_until("drop is counted", || {
        server.metrics().dropped_unknown_group == 1
    })
    .await;

    // The session survives; a ping still gets through.
    client.send(&id, &Ping::now()).unwrap();
    wait_until("ping is consumed", || {
        let snap = server.metrics();
        snap.dispatched + snap.no_handler == 1
    })
    .await;
    assert_eq!(server.connection_count(), 1);
}
