//! Integration tests for the world client
//!
//! These tests drive the connection manager, queue and world together, first
//! through in-memory channels and then over a real loopback WebSocket.

use client::channel::mock::MockConnector;
use client::channel::{ChannelEvent, ChannelSignal, SignalReceiver, WsConnector};
use client::config::{ClientConfig, ConnectionConfig};
use client::connection::{ConnectionManager, ConnectionState};
use client::identity::{Identity, IdentityStore, MemoryIdentityStore};
use client::intent::{Action, Intent};
use client::network::Client;
use client::world::EntityKind;
use futures::{SinkExt, StreamExt};
use shared::{ClientMessage, Position, ServerMessage};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;

fn ann() -> Identity {
    Identity::parse("Ann").unwrap()
}

/// PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests that every outbound kind carries the wire tag the server expects
    #[test]
    fn outbound_type_tags() {
        let cases = vec![
            (
                ClientMessage::PlayerJoinRequest {
                    name: "Ann".to_string(),
                },
                "player_join_request",
            ),
            (ClientMessage::PlayerMove { x: 1.0, y: 2.0 }, "player_move"),
            (
                ClientMessage::ActionDropFood {
                    pos: Position::new(1.0, 2.0),
                },
                "action_drop_food",
            ),
            (
                ClientMessage::PlayerChat {
                    text: "hi".to_string(),
                },
                "player_chat",
            ),
            (ClientMessage::RequestZoneRefresh, "request_zone_refresh"),
        ];

        for (message, tag) in cases {
            let value: serde_json::Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
            assert_eq!(value["type"], tag);
        }
    }

    /// Tests decoding of a full server snapshot with simulation-only fields
    #[test]
    fn snapshot_with_extra_fields_decodes() {
        let frame = r#"{
            "type": "zone_refresh",
            "player_id": "p1",
            "world": {
                "map": [[0, 1], [2, 3]],
                "players": {"p1": {"x": 1, "y": 2, "name": "Ann"}},
                "fauna": {"f1": {"x": 3, "y": 4, "kind": "rabbit", "stage": "Young",
                                 "age_seconds": 12.5, "is_dead": false, "hunger": 0.3}},
                "food": {"a": {"x": 5, "y": 6}}
            }
        }"#;
        match assert_ok!(ServerMessage::from_frame(frame)) {
            ServerMessage::ZoneRefresh { player_id, world } => {
                assert_eq!(player_id.as_deref(), Some("p1"));
                assert_eq!(world.fauna.len(), 1);
                assert_eq!(world.map[1][0], 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Tests that garbage frames are rejected rather than misread
    #[test]
    fn malformed_frames_are_errors() {
        for frame in ["", "{", "[]", r#"{"no_type": 1}"#] {
            assert_err!(ServerMessage::from_frame(frame));
        }
    }
}

/// SESSION TESTS OVER IN-MEMORY CHANNELS
mod session_tests {
    use super::*;

    fn client() -> (Client, MockConnector) {
        let connector = MockConnector::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let client = Client::with_connector(
            ClientConfig::default(),
            Box::new(connector.clone()),
            rx,
            Box::new(MemoryIdentityStore::new()),
        );
        (client, connector)
    }

    fn feed(client: &mut Client, event: ChannelEvent, now: Instant) {
        let id = client.connection().channel_id().unwrap();
        client.handle_signal(ChannelSignal::new(id, event), now);
    }

    fn frame(client: &mut Client, json: &str, now: Instant) {
        feed(client, ChannelEvent::Frame(json.to_string()), now);
    }

    /// Tests the join handshake through to a populated local world
    #[test]
    fn join_and_first_snapshot() {
        let now = Instant::now();
        let (mut client, connector) = client();

        assert_ok!(client.connect(Some(ann()), now));
        feed(&mut client, ChannelEvent::Opened, now);
        assert_eq!(
            connector.sent_messages(),
            vec![ClientMessage::PlayerJoinRequest {
                name: "Ann".to_string()
            }]
        );

        frame(&mut client, r#"{"type":"join_success"}"#, now);
        frame(
            &mut client,
            r#"{"type":"world_state","player_id":"p1","world":{"players":{"p1":{"x":10,"y":20}},"fauna":{},"food":{},"map":[[0]]}}"#,
            now,
        );
        client.tick(now);

        let world = client.world();
        assert_eq!(world.entity_count(EntityKind::Player), 1);
        let own = world.own_entity().unwrap();
        assert_eq!(own.id, "p1");
        assert_eq!(own.position, Position::new(10.0, 20.0));

        // The server echoing our own movement changes nothing
        frame(
            &mut client,
            r#"{"type":"player_moved","player_id":"p1","data":{"x":99,"y":99}}"#,
            now,
        );
        client.tick(now);
        assert_eq!(
            client.world().own_entity().unwrap().position,
            Position::new(10.0, 20.0)
        );
    }

    /// Tests that a lost connection is recovered with a fresh snapshot
    #[test]
    fn reconnect_resynchronizes_world() {
        let mut now = Instant::now();
        let (mut client, connector) = client();
        assert_ok!(client.connect(Some(ann()), now));
        feed(&mut client, ChannelEvent::Opened, now);
        frame(&mut client, r#"{"type":"join_success"}"#, now);
        frame(
            &mut client,
            r#"{"type":"world_state","player_id":"p1","world":{"players":{"p1":{"x":0,"y":0},"p2":{"x":5,"y":5}}}}"#,
            now,
        );
        client.tick(now);

        feed(
            &mut client,
            ChannelEvent::Closed {
                code: 1006,
                was_clean: false,
            },
            now,
        );
        client.tick(now);
        assert_eq!(client.connection().state(), ConnectionState::Reconnecting);
        assert!(!client.is_finished());

        now += ConnectionConfig::default().reconnect_delay;
        client.tick(now);
        assert_eq!(connector.open_count(), 2);

        feed(&mut client, ChannelEvent::Opened, now);
        let sent = connector.sent_messages();
        assert_eq!(
            &sent[sent.len() - 2..],
            &[
                ClientMessage::PlayerJoinRequest {
                    name: "Ann".to_string()
                },
                ClientMessage::RequestZoneRefresh,
            ]
        );

        frame(&mut client, r#"{"type":"join_success"}"#, now);
        frame(
            &mut client,
            r#"{"type":"zone_refresh","player_id":"p1","world":{"players":{"p1":{"x":0,"y":0},"p3":{"x":7,"y":7}}}}"#,
            now,
        );
        client.tick(now);

        let world = client.world();
        assert!(world.entity(EntityKind::Player, "p2").is_none());
        assert!(world.entity(EntityKind::Player, "p3").is_some());
        assert_eq!(client.connection().retry_budget().attempts_made, 0);
    }

    /// Tests that exhausting the retry budget stops the client for good
    #[test]
    fn permanent_disconnect_after_budget() {
        let mut now = Instant::now();
        let (mut client, connector) = client();
        assert_ok!(client.connect(Some(ann()), now));
        feed(&mut client, ChannelEvent::Opened, now);
        frame(&mut client, r#"{"type":"join_success"}"#, now);

        let lost = ChannelEvent::Closed {
            code: 1006,
            was_clean: false,
        };
        feed(&mut client, lost.clone(), now);
        for _ in 0..3 {
            now += Duration::from_secs(3);
            client.tick(now);
            feed(&mut client, lost.clone(), now);
        }
        client.tick(now);

        assert_eq!(
            client.connection().state(),
            ConnectionState::PermanentlyDisconnected
        );
        assert!(client.is_finished());

        client.tick(now + Duration::from_secs(60));
        assert_eq!(connector.open_count(), 4);
    }

    /// Tests that gameplay intents reach the wire in the expected shape
    #[test]
    fn intents_are_encoded() {
        let now = Instant::now();
        let (mut client, connector) = client();
        assert_ok!(client.connect(Some(ann()), now));
        feed(&mut client, ChannelEvent::Opened, now);
        frame(&mut client, r#"{"type":"join_success"}"#, now);
        frame(
            &mut client,
            r#"{"type":"world_state","player_id":"p1","world":{"players":{"p1":{"x":20,"y":40}}}}"#,
            now,
        );
        client.tick(now);

        assert_ok!(client.submit(Intent::Act(Action::DropFood), now));
        assert_ok!(client.submit(Intent::Chat(format!("  {}  ", "z".repeat(60))), now));

        let sent = connector.sent_messages();
        assert_eq!(
            sent[sent.len() - 2],
            ClientMessage::ActionDropFood {
                pos: Position::new(20.0, 40.0)
            }
        );
        match &sent[sent.len() - 1] {
            ClientMessage::PlayerChat { text } => assert_eq!(text.len(), 50),
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Tests that the stored identity is written on join and cleared on logout
    #[test]
    fn identity_store_follows_session() {
        struct SharedStore(std::rc::Rc<std::cell::RefCell<MemoryIdentityStore>>);

        impl IdentityStore for SharedStore {
            fn load(&self) -> Option<Identity> {
                self.0.borrow().load()
            }
            fn save(&mut self, identity: &Identity) -> std::io::Result<()> {
                self.0.borrow_mut().save(identity)
            }
            fn clear(&mut self) -> std::io::Result<()> {
                self.0.borrow_mut().clear()
            }
        }

        let now = Instant::now();
        let store = std::rc::Rc::new(std::cell::RefCell::new(MemoryIdentityStore::new()));
        let connector = MockConnector::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut client = Client::with_connector(
            ClientConfig::default(),
            Box::new(connector.clone()),
            rx,
            Box::new(SharedStore(store.clone())),
        );

        assert_ok!(client.connect(Some(ann()), now));
        feed(&mut client, ChannelEvent::Opened, now);
        frame(&mut client, r#"{"type":"join_success"}"#, now);
        assert_eq!(store.borrow().load(), Some(ann()));

        client.logout();
        assert!(store.borrow().load().is_none());
    }
}

/// LOOPBACK WEBSOCKET TESTS
mod websocket_tests {
    use super::*;

    async fn next_signal(rx: &mut SignalReceiver) -> ChannelSignal {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for channel signal")
            .expect("signal channel closed")
    }

    /// Feeds signals into the manager until `done` holds.
    async fn pump_until(
        manager: &mut ConnectionManager,
        rx: &mut SignalReceiver,
        done: impl Fn(&ConnectionManager) -> bool,
    ) {
        while !done(manager) {
            let signal = next_signal(rx).await;
            manager.handle_signal(signal, Instant::now());
        }
    }

    fn text(message: Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    /// Tests a full join, snapshot, chat and clean close against a live socket
    #[tokio::test]
    async fn join_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let join: ClientMessage =
                serde_json::from_str(&text(ws.next().await.unwrap().unwrap())).unwrap();
            assert_eq!(
                join,
                ClientMessage::PlayerJoinRequest {
                    name: "Ann".to_string()
                }
            );

            ws.send(Message::Text(r#"{"type":"join_success"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"type":"world_state","player_id":"p1","world":{"players":{"p1":{"x":10,"y":20}},"map":[[0]]}}"#.into(),
            ))
            .await
            .unwrap();

            let chat: ClientMessage =
                serde_json::from_str(&text(ws.next().await.unwrap().unwrap())).unwrap();
            ws.close(None).await.unwrap();
            chat
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(&format!("ws://{}/ws", addr), tx).unwrap();
        let mut manager = ConnectionManager::new(ConnectionConfig::default(), Box::new(connector));

        assert_ok!(manager.connect(ann(), Instant::now()));
        pump_until(&mut manager, &mut rx, |m| {
            m.state() == ConnectionState::Open && m.inbound_len() > 0
        })
        .await;

        let events = manager.drain_inbound();
        assert!(matches!(events[0], ServerMessage::WorldState { .. }));

        assert_ok!(manager.send_intent(&ClientMessage::PlayerChat {
            text: "hello".to_string()
        }));
        pump_until(&mut manager, &mut rx, |m| m.state() != ConnectionState::Open).await;

        // A close without a status code is not a clean logout
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        manager.logout();

        let chat = server.await.unwrap();
        assert_eq!(
            chat,
            ClientMessage::PlayerChat {
                text: "hello".to_string()
            }
        );
    }

    /// Tests that a dropped socket leads to a reconnect that asks for a refresh
    #[tokio::test]
    async fn reconnect_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First session: accept the join, then vanish
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _join = ws.next().await;
            ws.send(Message::Text(r#"{"type":"join_success"}"#.into()))
                .await
                .unwrap();
            drop(ws);

            // Second session: expect join followed by a refresh request
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut received = Vec::new();
            for _ in 0..2 {
                let message: ClientMessage =
                    serde_json::from_str(&text(ws.next().await.unwrap().unwrap())).unwrap();
                received.push(message);
            }
            ws.send(Message::Text(r#"{"type":"join_success"}"#.into()))
                .await
                .unwrap();
            let _ = ws.next().await;
            received
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(&format!("ws://{}/ws", addr), tx).unwrap();
        let config = ConnectionConfig {
            reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let mut manager = ConnectionManager::new(config, Box::new(connector));

        assert_ok!(manager.connect(ann(), Instant::now()));
        pump_until(&mut manager, &mut rx, |m| m.state() == ConnectionState::Open).await;
        pump_until(&mut manager, &mut rx, |m| {
            m.state() == ConnectionState::Reconnecting
        })
        .await;
        assert_eq!(manager.retry_budget().attempts_made, 1);

        manager.poll(Instant::now() + Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        pump_until(&mut manager, &mut rx, |m| m.state() == ConnectionState::Open).await;
        assert_eq!(manager.retry_budget().attempts_made, 0);

        manager.logout();
        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                ClientMessage::PlayerJoinRequest {
                    name: "Ann".to_string()
                },
                ClientMessage::RequestZoneRefresh,
            ]
        );
    }
}
