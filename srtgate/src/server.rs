use std::{
    collections::{HashMap, HashSet},
    ffi::{c_char, c_int, c_void},
    mem::size_of,
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc, LazyLock, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use common::{atomic::EasyAtomic, strings::PSTR};
use libc::sockaddr;
use os_socketaddr::OsSocketAddr;
use parking_lot::{Condvar, Mutex};

use crate::{
    srt::{
        epoll::Epoll,
        error,
        options::{get_sock_opt_str, resolve_addr, SrtOptions},
        srt_accept, srt_bind, srt_close, srt_create_socket, srt_getsockname, srt_getsockstate,
        srt_listen, srt_listen_callback, srt_recv, srt_setrejectreason, SRTSOCKET, SRT_EPOLL_ERR,
        SRT_EPOLL_IN, SRT_ERROR, SRT_INVALID_SOCK, SRT_REJC_PREDEFINED, SRT_SOCKOPT,
        SRT_SOCKSTATUS,
    },
    stats::{read_socket_stats, SocketStats},
    ConnectionId, Error,
};

/// Application reject code a denied admission carries back to the peer, as
/// an offset above `SRT_REJC_PREDEFINED`.
pub const REJECT_CODE_DENIED: i32 = 403;

/// Application reject code for an admission nobody answered in time.
pub const REJECT_CODE_TIMEOUT: i32 = 504;

const BACKLOG: c_int = 5;
const POLL_TIMEOUT_MS: i64 = 1000;
const POLL_SET_CAPACITY: usize = 100;

/// MTU-sized read, one datagram per `srt_recv` in live mode.
const RECV_BUFFER_SIZE: usize = 1500;

/// How long the listen hook stays parked on the embedder's admission
/// decision before the handshake is turned down.
const ADMISSION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Callbacks a server embedder receives. All of them fire on the server's
/// worker thread except `on_connect_request`, which fires on an SRT-internal
/// thread that stays blocked until `answer_connect_request` (or the
/// admission timeout) resolves it — so none of them may call back into the
/// same endpoint synchronously.
pub trait ServerHandler: Send + Sync + 'static {
    /// A peer reached the listener and awaits an admission decision for its
    /// stream id. Must be resolved with `Server::answer_connect_request`.
    fn on_connect_request(&self, peer: SocketAddr, stream_id: &str);

    /// An admitted connection finished its handshake and joined the poll
    /// set.
    fn on_socket_connected(&self, id: ConnectionId, stream_id: &str);

    /// One received datagram. Delivered in SRT arrival order, strictly
    /// between the connected and disconnected events of `id`.
    fn on_socket_data(&self, id: ConnectionId, data: &[u8]);

    /// The connection left the active set, whether the peer closed, broke,
    /// or the embedder called `close_connection`.
    fn on_socket_disconnected(&self, id: ConnectionId);

    /// The worker hit an error that is not attributable to one connection.
    fn on_fatal_error(&self, _message: &str) {}
}

#[derive(Debug, Default, Clone)]
pub struct ServerOptions {
    /// Enables SRT's built-in encryption for every admitted connection.
    pub passphrase: Option<String>,
    /// Receiver buffer depth in milliseconds.
    pub latency: Option<u32>,
}

/// Single-slot rendezvous between the SRT listen hook and the embedder. The
/// hook publishes the tentative socket and parks; the embedder answers from
/// any thread. At most one admission is outstanding at a time because the
/// library serializes listen callbacks per listener.
#[derive(Default)]
struct Admission {
    slot: Mutex<AdmissionSlot>,
    cond: Condvar,
}

#[derive(Default)]
struct AdmissionSlot {
    awaiting: Option<SRTSOCKET>,
    decision: Option<bool>,
}

impl Admission {
    fn begin(&self, fd: SRTSOCKET) {
        let mut slot = self.slot.lock();
        slot.awaiting = Some(fd);
        slot.decision = None;
    }

    /// Parks the hook thread until the embedder decides or the window
    /// closes. Clears the slot either way; a timeout fails closed.
    fn wait(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;

        let mut slot = self.slot.lock();
        while slot.decision.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }

        slot.awaiting = None;
        slot.decision.take()
    }

    fn answer(&self, accept: bool) -> Result<(), Error> {
        let mut slot = self.slot.lock();
        if slot.awaiting.is_none() {
            return Err(Error::NotFound);
        }

        slot.decision = Some(accept);
        self.cond.notify_all();
        Ok(())
    }

    fn awaiting(&self) -> Option<SRTSOCKET> {
        self.slot.lock().awaiting
    }
}

/// The listen hook only receives an opaque pointer, which a teardown racing
/// with a handshake could turn into a dangling box. Handing the hook a
/// listener-keyed weak reference instead makes a late callback resolve to
/// nothing rather than to freed memory.
static LISTENERS: LazyLock<Mutex<HashMap<SRTSOCKET, Weak<ServerShared>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

struct ServerShared {
    fd: SRTSOCKET,
    epoll: Epoll,
    options: SrtOptions,
    running: AtomicBool,
    active: Mutex<HashSet<SRTSOCKET>>,
    admission: Admission,
    handler: Arc<dyn ServerHandler>,
}

impl ServerShared {
    fn poll_loop(&self) {
        let mut ready = [SRT_INVALID_SOCK; POLL_SET_CAPACITY];
        let mut broken = [SRT_INVALID_SOCK; POLL_SET_CAPACITY];

        while self.running.get() {
            let Some((ready_len, broken_len)) =
                self.epoll.wait(&mut ready, &mut broken, POLL_TIMEOUT_MS)
            else {
                continue;
            };

            for &fd in &ready[..ready_len] {
                if fd == self.fd {
                    self.accept_connection();
                    continue;
                }

                match unsafe { srt_getsockstate(fd) } {
                    SRT_SOCKSTATUS::SRTS_BROKEN | SRT_SOCKSTATUS::SRTS_CLOSED => {
                        self.disconnect(fd)
                    }
                    SRT_SOCKSTATUS::SRTS_CONNECTED => self.read_socket(fd),
                    status => {
                        log::warn!("socket in unexpected state, fd={}, state={:?}", fd, status)
                    }
                }
            }

            for &fd in &broken[..broken_len] {
                if fd != self.fd && !ready[..ready_len].contains(&fd) {
                    self.disconnect(fd);
                }
            }
        }
    }

    fn accept_connection(&self) {
        let mut addr = OsSocketAddr::new();
        let mut addrlen = addr.capacity() as c_int;

        let fd = unsafe { srt_accept(self.fd, addr.as_mut_ptr() as *mut _, &mut addrlen) };
        if fd == SRT_INVALID_SOCK {
            let reason = error().to_string();
            log::error!("failed to accept a connection, error={}", reason);
            self.handler.on_fatal_error(&reason);
            return;
        }

        let stream_id = get_sock_opt_str(fd, SRT_SOCKOPT::SRTO_STREAMID).unwrap_or_default();
        log::info!("connection accepted, fd={}, stream_id={}", fd, stream_id);

        self.handler.on_socket_connected(fd, &stream_id);
        self.active.lock().insert(fd);

        if let Err(e) = self.epoll.add(fd, SRT_EPOLL_IN | SRT_EPOLL_ERR) {
            log::error!("failed to watch accepted socket, fd={}, error={}", fd, e);
            self.disconnect(fd);
        }
    }

    fn read_socket(&self, fd: SRTSOCKET) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        let size = unsafe { srt_recv(fd, buf.as_mut_ptr() as *mut _, buf.len() as c_int) };
        if size <= 0 {
            self.disconnect(fd);
        } else {
            self.handler.on_socket_data(fd, &buf[..size as usize]);
        }
    }

    /// Removes a connection from the poll and active sets, closes it and
    /// reports it gone. Membership in the active set makes this idempotent
    /// across the worker and embedder threads.
    fn disconnect(&self, fd: SRTSOCKET) {
        if !self.active.lock().remove(&fd) {
            return;
        }

        self.epoll.remove(fd);
        unsafe { srt_close(fd) };

        log::info!("connection closed, fd={}", fd);
        self.handler.on_socket_disconnected(fd);
    }
}

/// A listening SRT endpoint that multiplexes every admitted connection over
/// one poll loop and lets the embedder decide, per stream id, who gets in.
pub struct Server {
    shared: Arc<ServerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Binds and listens on a numeric address, installs the admission hook
    /// and starts the worker. Any SRT setup failure surfaces as
    /// [`Error::Config`] with the library's reason text.
    pub fn run(
        address: &str,
        port: u16,
        options: ServerOptions,
        handler: Arc<dyn ServerHandler>,
    ) -> Result<Self, Error> {
        let addr = resolve_addr(address, port).map_err(|e| Error::Config(e.to_string()))?;

        let options = SrtOptions {
            stream_id: None,
            passphrase: options.passphrase,
            latency: options.latency,
        };

        let fd = unsafe { srt_create_socket() };
        if fd == SRT_INVALID_SOCK {
            return Err(Error::Config(error().to_string()));
        }

        if let Err(e) = options.apply_listener(fd, addr.is_ipv6()) {
            unsafe { srt_close(fd) };
            return Err(Error::Config(e.to_string()));
        }

        let os_addr: OsSocketAddr = addr.into();
        if unsafe { srt_bind(fd, os_addr.as_ptr() as *const _, os_addr.len() as c_int) }
            == SRT_ERROR
        {
            let err = Error::Config(error().to_string());
            unsafe { srt_close(fd) };
            return Err(err);
        }

        let epoll = match Epoll::new() {
            Ok(it) => it,
            Err(e) => {
                unsafe { srt_close(fd) };
                return Err(Error::Config(e.to_string()));
            }
        };

        let shared = Arc::new(ServerShared {
            fd,
            epoll,
            options,
            handler,
            running: AtomicBool::new(true),
            active: Mutex::new(HashSet::new()),
            admission: Admission::default(),
        });

        LISTENERS.lock().insert(fd, Arc::downgrade(&shared));

        let setup = (|| {
            if unsafe { srt_listen_callback(fd, admission_hook, fd as usize as *mut c_void) } != 0
            {
                return Err(Error::Config(error().to_string()));
            }

            if unsafe { srt_listen(fd, BACKLOG) } == SRT_ERROR {
                return Err(Error::Config(error().to_string()));
            }

            shared
                .epoll
                .add(fd, SRT_EPOLL_IN | SRT_EPOLL_ERR)
                .map_err(|e| Error::Config(e.to_string()))?;

            let shared = shared.clone();
            thread::Builder::new()
                .name("SrtgateServerWorker".to_string())
                .spawn(move || shared.poll_loop())
                .map_err(|e| Error::Config(e.to_string()))
        })();

        let worker = match setup {
            Ok(it) => it,
            Err(e) => {
                LISTENERS.lock().remove(&fd);
                shared.epoll.release();
                unsafe { srt_close(fd) };
                return Err(e);
            }
        };

        log::info!("srt server listening, addr={}", addr);

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Terminates the worker, closes every active connection (each one still
    /// reports `on_socket_disconnected`), releases the poll handle and
    /// closes the listener. Safe from any thread; later calls are no-ops and
    /// no event is emitted after this returns.
    pub fn stop(&self) {
        if !EasyAtomic::update(&self.shared.running, false) {
            return;
        }

        LISTENERS.lock().remove(&self.shared.fd);

        // A hook parked on the admission window would otherwise hold the
        // handshake thread until its timeout.
        let _ = self.shared.admission.answer(false);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("server worker thread panicked");
            }
        }

        let active = self.shared.active.lock().iter().copied().collect::<Vec<_>>();
        for fd in active {
            self.shared.disconnect(fd);
        }

        self.shared.epoll.release();
        unsafe { srt_close(self.shared.fd) };

        log::info!("srt server stopped");
    }

    /// Closes one connection on the embedder's initiative. Unknown ids are
    /// ignored so this cannot race the worker observing the same disconnect.
    pub fn close_connection(&self, id: ConnectionId) {
        self.shared.disconnect(id);
    }

    /// Resolves the pending admission. Exactly one call is expected per
    /// `on_connect_request`; without a pending request this reports
    /// [`Error::NotFound`].
    pub fn answer_connect_request(&self, accept: bool) -> Result<(), Error> {
        self.shared.admission.answer(accept)
    }

    /// The socket id currently parked in the admission window, if any.
    pub fn awaiting_connect_request_id(&self) -> Option<ConnectionId> {
        self.shared.admission.awaiting()
    }

    /// A statistics snapshot for one active connection.
    pub fn read_socket_stats(
        &self,
        id: ConnectionId,
        clear_intervals: bool,
    ) -> Result<SocketStats, Error> {
        if !self.shared.active.lock().contains(&id) {
            return Err(Error::NotFound);
        }

        read_socket_stats(id, clear_intervals).ok_or(Error::NotFound)
    }

    /// The bound address, useful when the port was system-autoselected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let mut addr = OsSocketAddr::new();
        let mut addrlen = addr.capacity() as c_int;
        unsafe {
            srt_getsockname(self.shared.fd, addr.as_mut_ptr() as *mut _, &mut addrlen);
        }

        addr.into()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop()
    }
}

extern "C" fn admission_hook(
    opaque: *mut c_void,
    ns: SRTSOCKET,
    _hs_version: c_int,
    peeraddr: *const sockaddr,
    streamid: *const c_char,
) -> c_int {
    let Some(shared) = LISTENERS
        .lock()
        .get(&(opaque as usize as SRTSOCKET))
        .and_then(|it| it.upgrade())
    else {
        return -1;
    };

    if !shared.running.get() {
        return -1;
    }

    let len = match unsafe { (*peeraddr).sa_family } as c_int {
        libc::AF_INET6 => size_of::<libc::sockaddr_in6>(),
        _ => size_of::<libc::sockaddr_in>(),
    };

    let peer: Option<SocketAddr> =
        unsafe { OsSocketAddr::copy_from_raw(peeraddr as *const _, len as _) }.into();
    let Some(peer) = peer else {
        return -1;
    };

    // Security and timing options must be in force on the tentative socket
    // before the handshake concludes.
    if let Err(e) = shared.options.apply_accepted(ns) {
        log::error!("failed to configure pending socket, fd={}, error={}", ns, e);
        return -1;
    }

    let stream_id = PSTR::from(streamid as *const c_char)
        .to_string()
        .unwrap_or_default();

    shared.admission.begin(ns);
    shared.handler.on_connect_request(peer, &stream_id);

    match shared.admission.wait(ADMISSION_TIMEOUT) {
        Some(true) => 0,
        Some(false) => {
            log::info!("connect request denied, fd={}, stream_id={}", ns, stream_id);
            unsafe { srt_setrejectreason(ns, SRT_REJC_PREDEFINED + REJECT_CODE_DENIED) };
            -1
        }
        None => {
            log::warn!("connect request timed out, fd={}, stream_id={}", ns, stream_id);
            unsafe { srt_setrejectreason(ns, SRT_REJC_PREDEFINED + REJECT_CODE_TIMEOUT) };
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_answer_resolves_waiting_hook() {
        let admission = Arc::new(Admission::default());

        let admission_ = admission.clone();
        let hook = thread::spawn(move || {
            admission_.begin(7);
            admission_.wait(Duration::from_secs(5))
        });

        while admission.awaiting() != Some(7) {
            thread::yield_now();
        }

        admission.answer(true).unwrap();
        assert_eq!(hook.join().unwrap(), Some(true));
        assert_eq!(admission.awaiting(), None);
    }

    #[test]
    fn admission_times_out_without_answer() {
        let admission = Admission::default();

        admission.begin(3);
        assert_eq!(admission.awaiting(), Some(3));
        assert_eq!(admission.wait(Duration::from_millis(50)), None);
        assert_eq!(admission.awaiting(), None);
    }

    #[test]
    fn admission_answer_without_request_is_rejected() {
        let admission = Admission::default();
        assert!(matches!(admission.answer(true), Err(Error::NotFound)));
    }

    #[test]
    fn admission_decision_may_arrive_before_the_wait() {
        let admission = Admission::default();

        admission.begin(9);
        admission.answer(false).unwrap();
        assert_eq!(admission.wait(Duration::from_millis(50)), Some(false));
    }

    #[test]
    fn admission_slot_is_reusable_across_handshakes() {
        let admission = Admission::default();

        admission.begin(1);
        admission.answer(false).unwrap();
        assert_eq!(admission.wait(Duration::from_millis(50)), Some(false));

        admission.begin(2);
        assert_eq!(admission.awaiting(), Some(2));
        admission.answer(true).unwrap();
        assert_eq!(admission.wait(Duration::from_millis(50)), Some(true));
    }
}
