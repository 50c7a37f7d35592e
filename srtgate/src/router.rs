use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::{server::ServerHandler, ConnectionId};

/// Events that belong to the server as a whole rather than to one
/// connection.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer awaits admission; resolve it with
    /// `Server::answer_connect_request`, registering the connection's
    /// receiver first when accepting.
    ConnectRequest { peer: SocketAddr, stream_id: String },
    /// A connection event arrived for an id with no registered receiver (or
    /// one whose receiver was dropped).
    Unrouted {
        id: ConnectionId,
        event: ConnectionEvent,
    },
    FatalError(String),
}

/// The per-connection event stream, in delivery order: one `Connected`,
/// any number of `Data`, one `Disconnected`.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { stream_id: String },
    Data(Bytes),
    Disconnected,
}

/// Fans server callbacks out to per-connection channels, so each admitted
/// connection can be consumed by its own owner. The embedder registers a
/// connection's receiver between `ConnectRequest` and the accepting answer;
/// that pre-allocates the reply path, so the first events of the connection
/// cannot outrun the subscription.
pub struct EventRouter {
    server_tx: Sender<ServerEvent>,
    receivers: RwLock<HashMap<ConnectionId, Sender<ConnectionEvent>>>,
}

impl EventRouter {
    pub fn new() -> (Arc<Self>, Receiver<ServerEvent>) {
        let (server_tx, server_rx) = unbounded();
        (
            Arc::new(Self {
                server_tx,
                receivers: RwLock::new(HashMap::new()),
            }),
            server_rx,
        )
    }

    /// Installs the destination for a connection's events and returns its
    /// receiving end. A second registration for the same id replaces the
    /// first.
    pub fn register(&self, id: ConnectionId) -> Receiver<ConnectionEvent> {
        let (tx, rx) = unbounded();
        self.receivers.write().insert(id, tx);
        rx
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.receivers.write().remove(&id);
    }

    fn route(&self, id: ConnectionId, event: ConnectionEvent) {
        let event = {
            let receivers = self.receivers.read();
            if let Some(tx) = receivers.get(&id) {
                match tx.send(event) {
                    Ok(()) => return,
                    Err(undelivered) => undelivered.0,
                }
            } else {
                event
            }
        };

        let _ = self.server_tx.send(ServerEvent::Unrouted { id, event });
    }
}

impl ServerHandler for EventRouter {
    fn on_connect_request(&self, peer: SocketAddr, stream_id: &str) {
        let _ = self.server_tx.send(ServerEvent::ConnectRequest {
            peer,
            stream_id: stream_id.to_string(),
        });
    }

    fn on_socket_connected(&self, id: ConnectionId, stream_id: &str) {
        self.route(
            id,
            ConnectionEvent::Connected {
                stream_id: stream_id.to_string(),
            },
        );
    }

    fn on_socket_data(&self, id: ConnectionId, data: &[u8]) {
        self.route(id, ConnectionEvent::Data(Bytes::copy_from_slice(data)));
    }

    fn on_socket_disconnected(&self, id: ConnectionId) {
        self.route(id, ConnectionEvent::Disconnected);
        self.unregister(id);
    }

    fn on_fatal_error(&self, message: &str) {
        let _ = self.server_tx.send(ServerEvent::FatalError(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    #[test]
    fn connect_requests_reach_the_server_channel() {
        let (router, server_rx) = EventRouter::new();

        router.on_connect_request(peer(), "tenant-a");

        match server_rx.try_recv().unwrap() {
            ServerEvent::ConnectRequest { stream_id, .. } => assert_eq!(stream_id, "tenant-a"),
            event => panic!("unexpected event: {:?}", event),
        }
    }

    #[test]
    fn registered_connection_receives_its_events_in_order() {
        let (router, _server_rx) = EventRouter::new();
        let conn_rx = router.register(4);

        router.on_socket_connected(4, "tenant-a");
        router.on_socket_data(4, b"one");
        router.on_socket_data(4, b"two");
        router.on_socket_disconnected(4);

        assert!(matches!(
            conn_rx.try_recv().unwrap(),
            ConnectionEvent::Connected { .. }
        ));
        match conn_rx.try_recv().unwrap() {
            ConnectionEvent::Data(data) => assert_eq!(&data[..], b"one"),
            event => panic!("unexpected event: {:?}", event),
        }
        match conn_rx.try_recv().unwrap() {
            ConnectionEvent::Data(data) => assert_eq!(&data[..], b"two"),
            event => panic!("unexpected event: {:?}", event),
        }
        assert!(matches!(
            conn_rx.try_recv().unwrap(),
            ConnectionEvent::Disconnected
        ));
    }

    #[test]
    fn events_without_a_receiver_fall_back_to_the_server_channel() {
        let (router, server_rx) = EventRouter::new();

        router.on_socket_data(9, b"lost");

        match server_rx.try_recv().unwrap() {
            ServerEvent::Unrouted { id, event } => {
                assert_eq!(id, 9);
                assert!(matches!(event, ConnectionEvent::Data(_)));
            }
            event => panic!("unexpected event: {:?}", event),
        }
    }

    #[test]
    fn disconnect_clears_the_registration() {
        let (router, server_rx) = EventRouter::new();
        let conn_rx = router.register(4);

        router.on_socket_disconnected(4);
        assert!(matches!(
            conn_rx.try_recv().unwrap(),
            ConnectionEvent::Disconnected
        ));

        router.on_socket_data(4, b"late");
        assert!(matches!(
            server_rx.try_recv().unwrap(),
            ServerEvent::Unrouted { .. }
        ));
    }

    #[test]
    fn dropped_receiver_downgrades_to_unrouted() {
        let (router, server_rx) = EventRouter::new();
        drop(router.register(2));

        router.on_socket_data(2, b"x");
        assert!(matches!(
            server_rx.try_recv().unwrap(),
            ServerEvent::Unrouted { id: 2, .. }
        ));
    }
}
