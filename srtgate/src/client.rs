use std::{
    collections::VecDeque,
    ffi::c_int,
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bytes::Bytes;
use common::atomic::EasyAtomic;
use os_socketaddr::OsSocketAddr;
use parking_lot::{Condvar, Mutex};

use crate::{
    srt::{
        epoll::Epoll,
        error, last_error_code,
        options::{resolve_addr, SrtOptions},
        reject_reason_string, srt_close, srt_connect, srt_create_socket, srt_getrejectreason,
        srt_getsockstate, srt_sendmsg, SRTSOCKET, SRT_EPOLL_ERR, SRT_EPOLL_OUT, SRT_ERROR,
        SRT_INVALID_SOCK, SRT_REJC_PREDEFINED, SRT_SOCKSTATUS,
    },
    stats::{read_socket_stats, SocketStats},
    Error,
};

const POLL_TIMEOUT_MS: i64 = 200;

/// How long the worker parks on an empty queue before looping back to the
/// poll, so a disconnect is still observed while idle.
const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Callbacks a client embedder receives, all on the client's worker thread.
/// At most one of `on_disconnected` / `on_error` fires per activation, and
/// only after `on_connected`; none of them may call back into the same
/// endpoint synchronously.
pub trait ClientHandler: Send + Sync + 'static {
    fn on_connected(&self);

    /// The peer closed the connection in an orderly fashion.
    fn on_disconnected(&self);

    /// The connection failed; the client is inactive once this fires.
    fn on_error(&self, message: &str);
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Handshake-carried tenant identifier the server admits or denies.
    pub stream_id: String,
    /// Enables SRT's built-in encryption; must match the server's.
    pub passphrase: Option<String>,
    /// Receiver buffer depth in milliseconds.
    pub latency: Option<u32>,
    /// Bound of the send queue; a full queue blocks producers.
    pub max_pending_messages: usize,
    /// Milliseconds a queued message may still wait for delivery on the
    /// wire before SRT drops it.
    pub send_ttl: i32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            passphrase: None,
            latency: None,
            max_pending_messages: 1000,
            send_ttl: 200,
        }
    }
}

enum Dequeue {
    Item(Bytes),
    Empty,
    Inactive,
}

/// The bounded FIFO between producer threads and the worker. Producers park
/// on capacity only, never behind I/O; every state change broadcasts so a
/// shutdown wakes whoever is parked.
struct SendQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<Bytes>,
    active: bool,
}

impl SendQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                active: true,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Hands a message over to the queue, blocking while it is full. The
    /// queue owns the buffer from here on. Reports [`Error::NotActive`] if
    /// the client shut down before space opened up.
    fn push(&self, item: Bytes) -> Result<(), Error> {
        let mut state = self.state.lock();
        while state.active && state.items.len() >= self.capacity {
            self.cond.wait(&mut state);
        }

        if !state.active {
            return Err(Error::NotActive);
        }

        state.items.push_back(item);
        drop(state);

        self.cond.notify_all();
        Ok(())
    }

    /// Worker side: waits up to `timeout` for a message.
    fn pop(&self, timeout: Duration) -> Dequeue {
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock();
        while state.active && state.items.is_empty() {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        if !state.active {
            return Dequeue::Inactive;
        }

        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.cond.notify_all();
                Dequeue::Item(item)
            }
            None => Dequeue::Empty,
        }
    }

    /// Stop side: parks until the worker drained everything (or died and
    /// deactivated the queue), then deactivates it. Producers and the
    /// worker both observe the shutdown through the broadcast.
    fn drain_and_deactivate(&self) {
        let mut state = self.state.lock();
        while state.active && !state.items.is_empty() {
            self.cond.wait(&mut state);
        }

        state.active = false;
        drop(state);

        self.cond.notify_all();
    }

    fn deactivate(&self) {
        let mut state = self.state.lock();
        state.active = false;
        drop(state);

        self.cond.notify_all();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

struct ClientShared {
    fd: SRTSOCKET,
    epoll: Epoll,
    running: AtomicBool,
    queue: SendQueue,
    send_ttl: i32,
    handler: Arc<dyn ClientHandler>,
}

impl ClientShared {
    fn run_loop(&self) {
        if let Err(e) = self.poll_loop() {
            let message = e.to_string();
            log::error!("client worker failed, fd={}, error={}", self.fd, message);

            self.running.set(false);
            self.queue.deactivate();
            self.handler.on_error(&message);
        }
    }

    fn poll_loop(&self) -> Result<(), Error> {
        let mut connected = false;
        let mut errors = [SRT_INVALID_SOCK; 1];
        let mut writable = [SRT_INVALID_SOCK; 1];

        while self.running.get() {
            let Some((error_len, writable_len)) =
                self.epoll.wait(&mut errors, &mut writable, POLL_TIMEOUT_MS)
            else {
                continue;
            };

            if writable_len > 0 && !connected {
                connected = true;
                log::info!("client socket connected, fd={}", self.fd);
                self.handler.on_connected();
            }

            if error_len > 0 {
                if !connected {
                    // a late rejection, observed instead of writability
                    let code = unsafe { srt_getrejectreason(self.fd) };
                    return Err(Error::Transport(reject_reason_string(code)));
                }

                if last_error_code() == 0 {
                    // orderly close from the peer
                    self.running.set(false);
                    self.queue.deactivate();

                    log::info!("client socket disconnected, fd={}", self.fd);
                    self.handler.on_disconnected();
                    return Ok(());
                }

                return Err(Error::Transport(error().to_string()));
            }

            if writable_len > 0 {
                match self.queue.pop(QUEUE_WAIT_TIMEOUT) {
                    Dequeue::Item(payload) => self.send_payload(&payload)?,
                    Dequeue::Empty | Dequeue::Inactive => continue,
                }
            }
        }

        Ok(())
    }

    fn send_payload(&self, payload: &Bytes) -> Result<(), Error> {
        if unsafe {
            srt_sendmsg(
                self.fd,
                payload.as_ptr() as *const _,
                payload.len() as c_int,
                self.send_ttl,
                0,
            )
        } == SRT_ERROR
        {
            let state = unsafe { srt_getsockstate(self.fd) };
            return Err(Error::Transport(
                if matches!(
                    state,
                    SRT_SOCKSTATUS::SRTS_CLOSED | SRT_SOCKSTATUS::SRTS_BROKEN
                ) {
                    "Socket is closed or broken".to_string()
                } else {
                    error().to_string()
                },
            ));
        }

        Ok(())
    }
}

/// One outbound sender-mode SRT connection fed from a bounded,
/// back-pressured queue that arbitrary producer threads write into.
pub struct Client {
    shared: Arc<ClientShared>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to a numeric address and starts the worker. The connect is
    /// synchronous: a server-side denial surfaces here as
    /// [`Error::StreamRejected`] carrying the application code.
    pub fn run(
        address: &str,
        port: u16,
        options: ClientOptions,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self, Error> {
        let addr = resolve_addr(address, port).map_err(|e| Error::Config(e.to_string()))?;

        let srt_options = SrtOptions {
            stream_id: (!options.stream_id.is_empty()).then(|| options.stream_id.clone()),
            passphrase: options.passphrase.clone(),
            latency: options.latency,
        };

        let fd = unsafe { srt_create_socket() };
        if fd == SRT_INVALID_SOCK {
            return Err(Error::Config(error().to_string()));
        }

        if let Err(e) = srt_options.apply_caller(fd, addr.is_ipv6()) {
            unsafe { srt_close(fd) };
            return Err(Error::Config(e.to_string()));
        }

        let epoll = match Epoll::new() {
            Ok(it) => it,
            Err(e) => {
                unsafe { srt_close(fd) };
                return Err(Error::Config(e.to_string()));
            }
        };

        if let Err(e) = epoll.add(fd, SRT_EPOLL_OUT | SRT_EPOLL_ERR) {
            epoll.release();
            unsafe { srt_close(fd) };
            return Err(Error::Config(e.to_string()));
        }

        let os_addr: OsSocketAddr = addr.into();
        if unsafe { srt_connect(fd, os_addr.as_ptr() as *const _, os_addr.len() as c_int) }
            == SRT_ERROR
        {
            // The server's admission decision rides back on the reject
            // reason; codes are normalized to offsets above the reserved
            // range.
            let code = unsafe { srt_getrejectreason(fd) };
            epoll.release();
            unsafe { srt_close(fd) };
            return Err(Error::StreamRejected(code - SRT_REJC_PREDEFINED));
        }

        let shared = Arc::new(ClientShared {
            fd,
            epoll,
            running: AtomicBool::new(true),
            queue: SendQueue::new(options.max_pending_messages),
            send_ttl: options.send_ttl,
            handler,
        });

        let shared_ = shared.clone();
        let worker = match thread::Builder::new()
            .name("SrtgateClientWorker".to_string())
            .spawn(move || shared_.run_loop())
        {
            Ok(it) => it,
            Err(e) => {
                shared.epoll.release();
                unsafe { srt_close(fd) };
                return Err(Error::Config(e.to_string()));
            }
        };

        log::info!(
            "srt client running, addr={}, stream_id={}",
            addr,
            options.stream_id
        );

        Ok(Self {
            shared,
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueues one datagram. Blocks while the queue is at capacity and
    /// never performs I/O on the calling thread; reports
    /// [`Error::NotActive`] once the client shut down.
    pub fn send(&self, payload: Bytes) -> Result<(), Error> {
        if !self.shared.running.get() {
            return Err(Error::NotActive);
        }

        self.shared.queue.push(payload)
    }

    /// Drains the queue through normal worker progress, terminates the
    /// worker, releases the poll handle and closes the socket. Idempotent.
    pub fn stop(&self) {
        if EasyAtomic::update(&self.stopped, true) {
            return;
        }

        self.shared.queue.drain_and_deactivate();
        self.shared.running.set(false);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("client worker thread panicked");
            }
        }

        self.shared.epoll.release();

        // The reference client sleeps before closing so the last datagrams
        // actually leave the wire:
        // https://github.com/Haivision/srt/blob/952f9495246abc201bac55b8f9ad7409c0572423/examples/test-c-client.c#L94
        thread::sleep(Duration::from_secs(1));

        unsafe { srt_close(self.shared.fd) };

        log::info!("srt client stopped, fd={}", self.shared.fd);
    }

    /// A statistics snapshot of the outbound socket, or `None` if the
    /// library refused to report.
    pub fn read_socket_stats(&self, clear_intervals: bool) -> Option<SocketStats> {
        read_socket_stats(self.shared.fd, clear_intervals)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = SendQueue::new(8);

        for it in ["a", "b", "c"] {
            queue.push(Bytes::from(it)).unwrap();
        }

        for expected in ["a", "b", "c"] {
            match queue.pop(Duration::from_millis(10)) {
                Dequeue::Item(item) => assert_eq!(item, Bytes::from(expected)),
                _ => panic!("expected an item"),
            }
        }

        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Dequeue::Empty
        ));
    }

    #[test]
    fn full_queue_blocks_until_one_drains() {
        let queue = Arc::new(SendQueue::new(4));

        for _ in 0..4 {
            queue.push(Bytes::from_static(b"x")).unwrap();
        }

        let queue_ = queue.clone();
        let producer = thread::spawn(move || queue_.push(Bytes::from_static(b"y")));

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 4);

        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Dequeue::Item(_)
        ));

        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn blocked_producer_wakes_on_shutdown() {
        let queue = Arc::new(SendQueue::new(1));
        queue.push(Bytes::from_static(b"x")).unwrap();

        let queue_ = queue.clone();
        let producer = thread::spawn(move || queue_.push(Bytes::from_static(b"y")));

        thread::sleep(Duration::from_millis(50));
        queue.deactivate();

        assert!(matches!(
            producer.join().unwrap(),
            Err(Error::NotActive)
        ));
    }

    #[test]
    fn push_after_shutdown_is_rejected() {
        let queue = SendQueue::new(4);
        queue.deactivate();

        assert!(matches!(
            queue.push(Bytes::from_static(b"x")),
            Err(Error::NotActive)
        ));
        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Dequeue::Inactive
        ));
    }

    #[test]
    fn drain_parks_until_the_worker_catches_up() {
        let queue = Arc::new(SendQueue::new(16));

        for _ in 0..3 {
            queue.push(Bytes::from_static(b"x")).unwrap();
        }

        let queue_ = queue.clone();
        let worker = thread::spawn(move || loop {
            match queue_.pop(Duration::from_millis(100)) {
                Dequeue::Item(_) => thread::sleep(Duration::from_millis(20)),
                Dequeue::Empty => continue,
                Dequeue::Inactive => break,
            }
        });

        queue.drain_and_deactivate();
        assert_eq!(queue.len(), 0);

        worker.join().unwrap();
    }

    #[test]
    fn drain_does_not_hang_on_a_dead_worker() {
        let queue = SendQueue::new(4);
        queue.push(Bytes::from_static(b"x")).unwrap();

        // the worker's failure path deactivates before anything drains
        queue.deactivate();
        queue.drain_and_deactivate();
    }

    #[test]
    fn options_default_to_the_reference_limits() {
        let options = ClientOptions::default();
        assert_eq!(options.max_pending_messages, 1000);
        assert_eq!(options.send_ttl, 200);
        assert!(options.stream_id.is_empty());
    }
}
