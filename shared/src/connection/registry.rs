//! Ownership of the live peer set.
//!
//! Each registered connection gets two background workers: a receive loop
//! that decodes hybrid messages into the connection's inbox, and a send loop
//! that drains the connection's outbox in order. The outbox length doubles as
//! the backpressure signal the frame orchestrator consults.
//!
//! Background connect/accept tasks never touch the live peer map; they
//! publish established transports into a synchronized pending queue that the
//! owning thread drains at the top of every registry operation.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::{
    connection::{
        framing::{receive_hybrid, send_hybrid},
        hybrid_message::HybridMessage,
    },
    transport::{TcpAcceptor, TcpTransport, Transport, POLL_INTERVAL},
};

/// Identifies one peer relationship for the lifetime of a registry.
/// Ids are assigned monotonically and never reused.
pub type ConnectionId = i64;

/// Sleep used by workers when their queue or socket is idle.
const IDLE_PAUSE: Duration = Duration::from_millis(10);

struct Peer {
    transport: Arc<dyn Transport>,
    inbox: Arc<Mutex<Vec<HybridMessage>>>,
    outbox: Arc<Mutex<VecDeque<HybridMessage>>>,
    recv_worker: Option<thread::JoinHandle<()>>,
    send_worker: Option<thread::JoinHandle<()>>,
    connected_at: Instant,
}

impl Peer {
    /// Cooperative teardown. The registry shutdown flag (or a dead
    /// transport) stops the workers; the disconnect notice is best-effort
    /// and not even attempted when the peer already has a backlog it will
    /// never drain.
    fn shutdown(mut self, id: ConnectionId) {
        if self.transport.is_connected() && lock_outbox(&self.outbox).is_empty() {
            let notice = json!({ "type": "disconnect" });
            if let Err(err) = send_hybrid(self.transport.as_ref(), &notice, &[]) {
                debug!("Connection {id}: could not deliver disconnect notice: {err}");
            }
        }
        self.transport.disconnect();
        if let Some(worker) = self.send_worker.take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.recv_worker.take() {
            let _ = worker.join();
        }
        debug!("Connection {id}: shut down");
    }
}

/// Owns every active peer connection, keyed by [`ConnectionId`].
pub struct ConnectionRegistry {
    shutdown: Arc<AtomicBool>,
    next_id: ConnectionId,
    peers: HashMap<ConnectionId, Peer>,
    order: Vec<ConnectionId>,
    pending: Arc<Mutex<Vec<Arc<dyn Transport>>>>,
    acceptor: Option<Arc<TcpAcceptor>>,
    wait_thread: Option<thread::JoinHandle<()>>,
    client_mode: bool,
    server_mode: bool,
}

impl ConnectionRegistry {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            next_id: 1,
            peers: HashMap::new(),
            order: Vec::new(),
            pending: Arc::new(Mutex::new(Vec::new())),
            acceptor: None,
            wait_thread: None,
            client_mode: false,
            server_mode: false,
        }
    }

    /// Connect out to a listening viewer.
    ///
    /// With `blocking`, retries until the connection is made and registers it
    /// before returning. Otherwise a background task keeps retrying and
    /// publishes the connection once established, so a producer's render loop
    /// is never stalled waiting for a viewer to attach.
    pub fn connect_client(&mut self, blocking: bool, host: &str, port: u16) {
        if self.client_mode {
            panic!("Client mode already active");
        }
        if self.server_mode {
            panic!("Can't use server and client mode at the same time");
        }

        if blocking {
            info!("Waiting for client connection to {host}:{port}...");
            loop {
                match TcpTransport::connect(host, port) {
                    Ok(transport) => {
                        self.add_connection(Arc::new(transport));
                        break;
                    }
                    Err(_) => thread::sleep(POLL_INTERVAL),
                }
            }
        } else {
            let shutdown = self.shutdown.clone();
            let pending = self.pending.clone();
            let host = host.to_string();
            self.wait_thread = Some(thread::spawn(move || {
                info!("Waiting for client connection to {host}:{port} in background");
                while !shutdown.load(Ordering::SeqCst) {
                    match TcpTransport::connect(&host, port) {
                        Ok(transport) => {
                            info!("Client connection made");
                            push_pending(&pending, Arc::new(transport));
                            break;
                        }
                        Err(_) => thread::sleep(POLL_INTERVAL),
                    }
                }
            }));
        }

        self.client_mode = true;
    }

    /// Bind the listener if it is not already bound. Re-binding an
    /// already-bound listener is a no-op; a fresh bind failure returns false
    /// so self-hosting modes can retry on another port.
    pub fn bind_and_listen(&mut self, port: u16) -> bool {
        if self.acceptor.is_none() {
            match TcpAcceptor::bind(port) {
                Ok(acceptor) => {
                    info!("Listening on port {}", acceptor.local_port());
                    self.acceptor = Some(Arc::new(acceptor));
                }
                Err(err) => {
                    warn!("Could not bind listener on port {port}: {err}");
                    return false;
                }
            }
        }
        true
    }

    /// Listen for incoming viewer connections.
    ///
    /// With `blocking`, waits for exactly one initial accept before
    /// returning. Otherwise a background accept loop keeps registering every
    /// new incoming connection until shutdown.
    pub fn connect_server(&mut self, blocking: bool, port: u16) -> bool {
        if self.server_mode {
            panic!("Server mode already active");
        }
        if self.client_mode {
            panic!("Can't use server and client mode at the same time");
        }

        if !self.bind_and_listen(port) {
            return false;
        }
        let Some(acceptor) = self.acceptor.clone() else {
            panic!("Listener must exist after bind_and_listen");
        };

        if blocking {
            info!("Waiting for server connection...");
            loop {
                match acceptor.accept() {
                    Ok(Some(transport)) => {
                        self.add_connection(Arc::new(transport));
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!("Accept failed: {err}");
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        } else {
            let shutdown = self.shutdown.clone();
            let pending = self.pending.clone();
            self.wait_thread = Some(thread::spawn(move || {
                info!("Waiting for server connections in background");
                while !shutdown.load(Ordering::SeqCst) {
                    match acceptor.accept() {
                        Ok(Some(transport)) => {
                            info!("Server connection made");
                            push_pending(&pending, Arc::new(transport));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!("Accept failed: {err}");
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
            }));
        }

        self.server_mode = true;
        true
    }

    /// Register an already-established transport and start its workers.
    /// Returns the id the peer will be known by.
    pub fn add_connection(&mut self, transport: Arc<dyn Transport>) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let outbox: Arc<Mutex<VecDeque<HybridMessage>>> = Arc::new(Mutex::new(VecDeque::new()));

        let recv_worker = {
            let transport = transport.clone();
            let inbox = inbox.clone();
            let shutdown = self.shutdown.clone();
            thread::spawn(move || run_receive_worker(id, transport, inbox, shutdown))
        };
        let send_worker = {
            let transport = transport.clone();
            let outbox = outbox.clone();
            let shutdown = self.shutdown.clone();
            thread::spawn(move || run_send_worker(id, transport, outbox, shutdown))
        };

        self.peers.insert(
            id,
            Peer {
                transport,
                inbox,
                outbox,
                recv_worker: Some(recv_worker),
                send_worker: Some(send_worker),
                connected_at: Instant::now(),
            },
        );
        self.order.push(id);
        info!("Connection {id} registered");
        id
    }

    /// Ids of every live connection, in registration order.
    pub fn connection_ids(&mut self) -> Vec<ConnectionId> {
        self.drain_pending();
        self.order.clone()
    }

    pub fn is_active(&self, conn_id: ConnectionId) -> bool {
        self.peers.contains_key(&conn_id)
    }

    /// Drop every connection whose transport reports not-connected. Called
    /// once per frame before diffing, never mid-diff.
    pub fn clean_conns(&mut self) {
        self.drain_pending();
        let dead: Vec<ConnectionId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.peers
                    .get(id)
                    .map(|peer| !peer.transport.is_connected())
                    .unwrap_or(true)
            })
            .collect();
        for id in dead {
            info!("Conn {id} disconnected, removing...");
            self.remove_peer(id);
        }
    }

    /// Queue one hybrid message for a single connection. Best-effort: false
    /// means the peer is gone (or going), and only that peer is affected.
    pub fn send_to(&mut self, conn_id: ConnectionId, header: Value, payloads: Vec<Vec<u8>>) -> bool {
        self.drain_pending();
        let Some(peer) = self.peers.get(&conn_id) else {
            panic!("Attempt to send using invalid conn id: {conn_id}");
        };
        if !peer.transport.is_connected() {
            return false;
        }
        lock_outbox(&peer.outbox).push_back(HybridMessage::with_payloads(header, payloads));
        true
    }

    /// Queue one hybrid message for every live connection. True if at least
    /// one peer could take it.
    pub fn send_to_all(&mut self, header: &Value, payloads: &[Vec<u8>]) -> bool {
        self.drain_pending();
        let mut any_success = false;
        for peer in self.peers.values() {
            if !peer.transport.is_connected() {
                continue;
            }
            lock_outbox(&peer.outbox).push_back(HybridMessage::with_payloads(
                header.clone(),
                payloads.to_vec(),
            ));
            any_success = true;
        }
        any_success
    }

    /// Messages queued for sending but not yet on the wire; the frame
    /// orchestrator's backpressure estimate.
    pub fn outgoing_queue_len(&self, conn_id: ConnectionId) -> usize {
        let Some(peer) = self.peers.get(&conn_id) else {
            panic!("Attempt to query invalid conn id: {conn_id}");
        };
        lock_outbox(&peer.outbox).len()
    }

    /// Atomically take every message received on this connection since the
    /// last drain.
    pub fn drain_inbox(&mut self, conn_id: ConnectionId) -> Vec<HybridMessage> {
        self.drain_pending();
        let Some(peer) = self.peers.get(&conn_id) else {
            panic!("Attempt to drain invalid conn id: {conn_id}");
        };
        std::mem::take(&mut *lock_inbox(&peer.inbox))
    }

    /// Take every queued inbound message across all connections, in
    /// per-connection arrival order.
    pub fn drain_all_inboxes(&mut self) -> Vec<HybridMessage> {
        self.drain_pending();
        let mut messages = Vec::new();
        for id in &self.order {
            if let Some(peer) = self.peers.get(id) {
                messages.append(&mut lock_inbox(&peer.inbox));
            }
        }
        messages
    }

    /// Monotonic time since this connection was registered.
    pub fn connection_time(&self, conn_id: ConnectionId) -> Duration {
        let Some(peer) = self.peers.get(&conn_id) else {
            panic!("Attempt to get time using invalid conn id: {conn_id}");
        };
        peer.connected_at.elapsed()
    }

    /// Bound listener port, once `connect_server`/`bind_and_listen` has run.
    pub fn listen_port(&self) -> Option<u16> {
        self.acceptor.as_ref().map(|acceptor| acceptor.local_port())
    }

    fn drain_pending(&mut self) {
        let established: Vec<Arc<dyn Transport>> = {
            let Ok(mut pending) = self.pending.lock() else {
                panic!("Pending connection queue poisoned");
            };
            pending.drain(..).collect()
        };
        for transport in established {
            self.add_connection(transport);
        }
    }

    fn remove_peer(&mut self, id: ConnectionId) {
        if let Some(peer) = self.peers.remove(&id) {
            peer.shutdown(id);
        }
        self.order.retain(|other| *other != id);
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        debug!("ConnectionRegistry: shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(waiter) = self.wait_thread.take() {
            let _ = waiter.join();
        }
        let ids: Vec<ConnectionId> = self.order.clone();
        for id in ids {
            self.remove_peer(id);
        }
        debug!("ConnectionRegistry: shutdown complete");
    }
}

fn push_pending(pending: &Arc<Mutex<Vec<Arc<dyn Transport>>>>, transport: Arc<dyn Transport>) {
    let Ok(mut pending) = pending.lock() else {
        panic!("Pending connection queue poisoned");
    };
    pending.push(transport);
}

fn lock_inbox(inbox: &Arc<Mutex<Vec<HybridMessage>>>) -> std::sync::MutexGuard<'_, Vec<HybridMessage>> {
    let Ok(guard) = inbox.lock() else {
        panic!("Connection inbox poisoned");
    };
    guard
}

fn lock_outbox(
    outbox: &Arc<Mutex<VecDeque<HybridMessage>>>,
) -> std::sync::MutexGuard<'_, VecDeque<HybridMessage>> {
    let Ok(guard) = outbox.lock() else {
        panic!("Connection outbox poisoned");
    };
    guard
}

fn run_receive_worker(
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    inbox: Arc<Mutex<Vec<HybridMessage>>>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Connection {id}: receive worker started");
    while !shutdown.load(Ordering::SeqCst) && transport.is_connected() {
        match receive_hybrid(transport.as_ref()) {
            Ok(Some(mut msg)) => {
                if msg.message_type() == Some("disconnect") {
                    info!("Disconnect received for connection {id}");
                    transport.disconnect();
                    break;
                }
                if let Value::Object(fields) = &mut msg.header {
                    fields.insert("conn_id".to_string(), Value::from(id));
                }
                lock_inbox(&inbox).push(msg);
            }
            Ok(None) => thread::sleep(IDLE_PAUSE),
            Err(err) => {
                warn!("Connection {id}: receive failed, tearing down: {err}");
                transport.disconnect();
                break;
            }
        }
    }
    debug!("Connection {id}: receive worker stopped");
}

fn run_send_worker(
    id: ConnectionId,
    transport: Arc<dyn Transport>,
    outbox: Arc<Mutex<VecDeque<HybridMessage>>>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Connection {id}: send worker started");
    while !shutdown.load(Ordering::SeqCst) && transport.is_connected() {
        let next = lock_outbox(&outbox).pop_front();
        match next {
            None => thread::sleep(IDLE_PAUSE),
            Some(msg) => {
                if let Err(err) = send_hybrid(transport.as_ref(), &msg.header, &msg.payloads) {
                    warn!("Connection {id}: send failed, tearing down: {err}");
                    transport.disconnect();
                    break;
                }
            }
        }
    }
    debug!("Connection {id}: send worker stopped");
}
