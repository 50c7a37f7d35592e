pub(crate) mod epoll;
pub(crate) mod options;

use std::{
    ffi::{c_char, c_int, c_void, CStr},
    io::Error,
    ptr::null,
};

use common::strings::PSTR;
use libc::sockaddr;
use log::{log, Level};

/// Builds an `io::Error` out of the SRT library's last-error string.
pub(crate) fn error() -> Error {
    Error::other(
        unsafe { CStr::from_ptr(srt_getlasterror_str()) }
            .to_str()
            .map(|s| s.to_string())
            .ok()
            .unwrap_or_default(),
    )
}

/// The library's last-error code. Zero means the previous operation ended
/// without an error, which after an `SRT_EPOLL_ERR` wake distinguishes an
/// orderly peer close from a real failure.
pub(crate) fn last_error_code() -> c_int {
    let mut errno = 0;
    unsafe { srt_getlasterror(&mut errno) }
}

/// The peer-facing text for a reject reason code.
pub(crate) fn reject_reason_string(code: c_int) -> String {
    unsafe { CStr::from_ptr(srt_rejectreason_str(code)) }
        .to_str()
        .map(|s| s.to_string())
        .ok()
        .unwrap_or_default()
}

extern "C" fn log_handler(
    _ctx: *const c_void,
    level: SRT_LOG_LEVEL,
    _file: *const c_char,
    _line: c_int,
    area: *const c_char,
    message: *const c_char,
) {
    if let (Ok(area), Ok(message)) = (
        PSTR::from(area).to_string(),
        PSTR::from(message).to_string(),
    ) {
        log!(
            target: "srt",
            level.into(),
            "area={}, message={}",
            area,
            message.replace(['\r', '\n'], "")
        );
    }
}

/// Starts the SRT runtime. Must run once per process before any socket is
/// created; also redirects the library's own logging into the `log` facade.
pub(crate) fn startup(level: SRT_LOG_LEVEL) -> bool {
    unsafe { srt_setloglevel(level as c_int) }
    unsafe { srt_setloghandler(null(), log_handler) }
    unsafe { srt_startup() != -1 }
}

/// Tears the SRT runtime down, after every endpoint has stopped.
pub(crate) fn cleanup() {
    unsafe {
        srt_cleanup();
    }
}

#[allow(clippy::upper_case_acronyms)]
pub(crate) type SRTSOCKET = i32;
pub(crate) const SRT_INVALID_SOCK: i32 = -1;
pub(crate) const SRT_ERROR: c_int = -1;

/// Reject reasons at or above this base are reserved for the application;
/// the admission codes this library emits are offsets from it.
pub(crate) const SRT_REJC_PREDEFINED: c_int = 1000;

pub(crate) const SRT_EPOLL_IN: c_int = 0x1;
pub(crate) const SRT_EPOLL_OUT: c_int = 0x4;
pub(crate) const SRT_EPOLL_ERR: c_int = 0x8;

/// `srt_epoll_set` flag: an `srt_epoll_wait` on a drained poll set reports a
/// timeout instead of an error.
pub(crate) const SRT_EPOLL_ENABLE_EMPTY: c_int = 1;

#[repr(C)]
#[allow(unused)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SRT_SOCKSTATUS {
    SRTS_INIT = 1,
    SRTS_OPENED,
    SRTS_LISTENING,
    SRTS_CONNECTING,
    SRTS_CONNECTED,
    SRTS_BROKEN,
    SRTS_CLOSING,
    SRTS_CLOSED,
    SRTS_NONEXIST,
}

#[repr(C)]
#[allow(unused)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SRT_SOCKOPT {
    SRTO_MSS = 0,
    SRTO_SNDSYN = 1,
    SRTO_RCVSYN = 2,
    SRTO_ISN = 3,
    SRTO_FC = 4,
    SRTO_SNDBUF = 5,
    SRTO_RCVBUF = 6,
    SRTO_LINGER = 7,
    SRTO_UDP_SNDBUF = 8,
    SRTO_UDP_RCVBUF = 9,
    SRTO_RENDEZVOUS = 12,
    SRTO_SNDTIMEO = 13,
    SRTO_RCVTIMEO = 14,
    SRTO_REUSEADDR = 15,
    SRTO_MAXBW = 16,
    SRTO_STATE = 17,
    SRTO_EVENT = 18,
    SRTO_SNDDATA = 19,
    SRTO_RCVDATA = 20,
    SRTO_SENDER = 21,
    SRTO_TSBPDMODE = 22,
    SRTO_LATENCY = 23,
    SRTO_INPUTBW = 24,
    SRTO_OHEADBW,
    SRTO_PASSPHRASE = 26,
    SRTO_PBKEYLEN,
    SRTO_KMSTATE,
    SRTO_IPTTL = 29,
    SRTO_IPTOS,
    SRTO_TLPKTDROP = 31,
    SRTO_SNDDROPDELAY = 32,
    SRTO_NAKREPORT = 33,
    SRTO_VERSION = 34,
    SRTO_PEERVERSION,
    SRTO_CONNTIMEO = 36,
    SRTO_DRIFTTRACER = 37,
    SRTO_MININPUTBW = 38,
    SRTO_SNDKMSTATE = 40,
    SRTO_RCVKMSTATE,
    SRTO_LOSSMAXTTL,
    SRTO_RCVLATENCY,
    SRTO_PEERLATENCY,
    SRTO_MINVERSION,
    SRTO_STREAMID,
    SRTO_CONGESTION,
    SRTO_MESSAGEAPI,
    SRTO_PAYLOADSIZE,
    SRTO_TRANSTYPE = 50,
    SRTO_KMREFRESHRATE,
    SRTO_KMPREANNOUNCE,
    SRTO_ENFORCEDENCRYPTION,
    SRTO_IPV6ONLY,
    SRTO_PEERIDLETIMEO,
    SRTO_BINDTODEVICE,
    SRTO_GROUPCONNECT,
    SRTO_GROUPMINSTABLETIMEO,
    SRTO_GROUPTYPE,
    SRTO_PACKETFILTER = 60,
    SRTO_RETRANSMITALGO = 61,
    SRTO_E_SIZE,
}

#[repr(C)]
#[allow(unused)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SRT_LOG_LEVEL {
    LOG_EMERG = 0,
    LOG_ALERT,
    LOG_CRIT,
    LOG_ERR,
    LOG_WARNING,
    LOG_NOTICE,
    LOG_INFO,
    LOG_DEBUG,
}

impl From<SRT_LOG_LEVEL> for Level {
    fn from(value: SRT_LOG_LEVEL) -> Self {
        match value {
            SRT_LOG_LEVEL::LOG_EMERG | SRT_LOG_LEVEL::LOG_CRIT | SRT_LOG_LEVEL::LOG_ERR => {
                Level::Error
            }
            SRT_LOG_LEVEL::LOG_ALERT | SRT_LOG_LEVEL::LOG_WARNING => Level::Warn,
            SRT_LOG_LEVEL::LOG_NOTICE | SRT_LOG_LEVEL::LOG_INFO => Level::Info,
            SRT_LOG_LEVEL::LOG_DEBUG => Level::Debug,
        }
    }
}

/// The listen hook the library invokes on its own thread while a handshake
/// is in progress, before `srt_accept` can return the pending socket.
/// Returning 0 admits the connection, -1 rejects it with the reason
/// previously set through `srt_setrejectreason`.
pub(crate) type SrtListenCallback = extern "C" fn(
    opaque: *mut c_void,
    ns: SRTSOCKET,
    hs_version: c_int,
    peeraddr: *const sockaddr,
    streamid: *const c_char,
) -> c_int;

#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
#[allow(non_camel_case_types)]
pub(crate) struct SRT_TRACEBSTATS {
    pub ms_time_stamp: i64,
    pub pkt_sent_total: i64,
    pub pkt_recv_total: i64,
    pub pkt_snd_loss_total: c_int,
    pub pkt_rcv_loss_total: c_int,
    pub pkt_retrans_total: c_int,
    pub pkt_sent_ack_total: c_int,
    pub pkt_recv_ack_total: c_int,
    pub pkt_sent_nak_total: c_int,
    pub pkt_recv_nak_total: c_int,
    pub us_snd_duration_total: i64,
    pub pkt_snd_drop_total: c_int,
    pub pkt_rcv_drop_total: c_int,
    pub pkt_rcv_undecrypt_total: c_int,
    pub byte_sent_total: u64,
    pub byte_recv_total: u64,
    pub byte_rcv_loss_total: u64,
    pub byte_retrans_total: u64,
    pub byte_snd_drop_total: u64,
    pub byte_rcv_drop_total: u64,
    pub byte_rcv_undecrypt_total: u64,
    pub pkt_sent: i64,
    pub pkt_recv: i64,
    pub pkt_snd_loss: c_int,
    pub pkt_rcv_loss: c_int,
    pub pkt_retrans: c_int,
    pub pkt_rcv_retrans: c_int,
    pub pkt_sent_ack: c_int,
    pub pkt_recv_ack: c_int,
    pub pkt_sent_nak: c_int,
    pub pkt_recv_nak: c_int,
    pub mbps_send_rate: f64,
    pub mbps_recv_rate: f64,
    pub us_snd_duration: i64,
    pub pkt_reorder_distance: c_int,
    pub pkt_rcv_avg_belated_time: f64,
    pub pkt_rcv_belated: i64,
    pub pkt_snd_drop: c_int,
    pub pkt_rcv_drop: c_int,
    pub pkt_rcv_undecrypt: c_int,
    pub byte_sent: u64,
    pub byte_recv: u64,
    pub byte_rcv_loss: u64,
    pub byte_retrans: u64,
    pub byte_snd_drop: u64,
    pub byte_rcv_drop: u64,
    pub byte_rcv_undecrypt: u64,
    pub us_pkt_snd_period: f64,
    pub pkt_flow_window: c_int,
    pub pkt_congestion_window: c_int,
    pub pkt_flight_size: c_int,
    pub ms_rtt: f64,
    pub mbps_bandwidth: f64,
    pub byte_avail_snd_buf: c_int,
    pub byte_avail_rcv_buf: c_int,
    pub mbps_max_bw: f64,
    pub byte_mss: c_int,
    pub pkt_snd_buf: c_int,
    pub byte_snd_buf: c_int,
    pub ms_snd_buf: c_int,
    pub ms_snd_tsb_pd_delay: c_int,
    pub pkt_rcv_buf: c_int,
    pub byte_rcv_buf: c_int,
    pub ms_rcv_buf: c_int,
    pub ms_rcv_tsb_pd_delay: c_int,
    pub pkt_snd_filter_extra_total: c_int,
    pub pkt_rcv_filter_extra_total: c_int,
    pub pkt_rcv_filter_supply_total: c_int,
    pub pkt_rcv_filter_loss_total: c_int,
    pub pkt_snd_filter_extra: c_int,
    pub pkt_rcv_filter_extra: c_int,
    pub pkt_rcv_filter_supply: c_int,
    pub pkt_rcv_filter_loss: c_int,
    pub pkt_reorder_tolerance: c_int,
    pub pkt_sent_unique_total: i64,
    pub pkt_recv_unique_total: i64,
    pub byte_sent_unique_total: u64,
    pub byte_recv_unique_total: u64,
    pub pkt_sent_unique: i64,
    pub pkt_recv_unique: i64,
    pub byte_sent_unique: u64,
    pub byte_recv_unique: u64,
}

unsafe extern "C" {
    pub(crate) fn srt_getlasterror_str() -> *const c_char;
    /// Returns the last error code, optionally writing the matched system
    /// errno through `errno_loc`.
    pub(crate) fn srt_getlasterror(errno_loc: *mut c_int) -> c_int;
    /// Clears the last error stored for the calling thread. Needed after a
    /// teardown-time `srt_epoll_wait` failure so the stale timeout error does
    /// not leak into later reads.
    pub(crate) fn srt_clearlasterror();
    /// Replaces printing SRT's logs to standard error with a handler
    /// function that receives them.
    pub(crate) fn srt_setloghandler(
        ctx: *const c_void,
        callback: extern "C" fn(
            ctx: *const c_void,
            level: SRT_LOG_LEVEL,
            file: *const c_char,
            line: c_int,
            area: *const c_char,
            message: *const c_char,
        ),
    );
    /// Sets the minimum severity for logging; entries below it are dropped
    /// inside the library.
    pub(crate) fn srt_setloglevel(level: c_int);
    /// Platform-specific initialization, global data setup and the SRT GC
    /// thread. Shall be called once at the start of an application that uses
    /// the library.
    pub(crate) fn srt_startup() -> c_int;
    /// Releases all global SRT resources, just before the application exits.
    pub(crate) fn srt_cleanup() -> c_int;
    /// Creates an SRT socket.
    pub(crate) fn srt_create_socket() -> SRTSOCKET;
    /// Binds a socket to a local address and port. Obligatory for a
    /// listening socket before `srt_listen`. When binding an IPv6 wildcard,
    /// `SRTO_IPV6ONLY` must be set explicitly beforehand.
    pub(crate) fn srt_bind(s: SRTSOCKET, name: *const sockaddr, name_len: c_int) -> c_int;
    /// Closes the socket or group and frees all used resources.
    pub(crate) fn srt_close(s: SRTSOCKET) -> c_int;
    /// Sets up the listening state on a socket. `backlog` bounds how many
    /// sockets may wait to be accepted; excess connection requests are
    /// rejected in advance.
    pub(crate) fn srt_listen(s: SRTSOCKET, backlog: c_int) -> c_int;
    /// Accepts a pending connection and returns the new socket handling it.
    /// On a nonblocking listener the call returns immediately; check the
    /// `SRT_EPOLL_IN` event on the listener first.
    pub(crate) fn srt_accept(s: SRTSOCKET, name: *mut sockaddr, name_len: *mut c_int) -> SRTSOCKET;
    /// Installs a hook that is called during a handshake on the listener,
    /// before the connection can be returned by `srt_accept`. The hook may
    /// decide to reject the connection.
    pub(crate) fn srt_listen_callback(
        s: SRTSOCKET,
        hook: SrtListenCallback,
        opaque: *mut c_void,
    ) -> c_int;
    /// Connects a socket to a remote party with a specified address and
    /// port. In blocking mode the call returns once the connection succeeds
    /// or fails; a rejection can then be examined with
    /// `srt_getrejectreason`.
    pub(crate) fn srt_connect(s: SRTSOCKET, name: *const sockaddr, name_len: c_int) -> c_int;
    /// Extracts the payload waiting to be received. In live mode exactly one
    /// message of at most one MTU is retrieved.
    pub(crate) fn srt_recv(s: SRTSOCKET, buf: *mut c_char, len: c_int) -> c_int;
    /// Sends a payload over a connected socket. `ttl` is the time in
    /// milliseconds the message may still wait for delivery before being
    /// dropped; `inorder` is meaningful in message mode only.
    pub(crate) fn srt_sendmsg(
        s: SRTSOCKET,
        buf: *const c_char,
        len: c_int,
        ttl: c_int,
        inorder: c_int,
    ) -> c_int;
    /// Extracts the address to which the socket was bound, useful when the
    /// port was system-autoselected.
    pub(crate) fn srt_getsockname(s: SRTSOCKET, addr: *mut sockaddr, addr_len: *mut c_int)
        -> c_int;
    /// Gets the current status of the socket.
    pub(crate) fn srt_getsockstate(s: SRTSOCKET) -> SRT_SOCKSTATUS;
    /// Sets a value for a socket option in the socket or group.
    pub(crate) fn srt_setsockflag(
        s: SRTSOCKET,
        opt: SRT_SOCKOPT,
        optval: *const c_void,
        optlen: c_int,
    ) -> c_int;
    /// Gets the value of the given socket option.
    pub(crate) fn srt_getsockflag(
        s: SRTSOCKET,
        opt: SRT_SOCKOPT,
        optval: *mut c_void,
        optlen: *mut c_int,
    ) -> c_int;
    /// Sets the reject reason the peer observes when the listen hook turns a
    /// handshake down. Values at or above `SRT_REJC_PREDEFINED` carry
    /// application codes.
    pub(crate) fn srt_setrejectreason(s: SRTSOCKET, value: c_int) -> c_int;
    /// Reads the reason a connection was rejected.
    pub(crate) fn srt_getrejectreason(s: SRTSOCKET) -> c_int;
    /// A human-readable message for a reject reason code.
    pub(crate) fn srt_rejectreason_str(id: c_int) -> *const c_char;
    /// Creates a new epoll container.
    pub(crate) fn srt_epoll_create() -> c_int;
    /// Adds a socket to a container with the given event mask.
    pub(crate) fn srt_epoll_add_usock(eid: c_int, s: SRTSOCKET, events: *const c_int) -> c_int;
    /// Removes a socket from a container.
    pub(crate) fn srt_epoll_remove_usock(eid: c_int, s: SRTSOCKET) -> c_int;
    /// Blocks until any registered socket reports an event or the timeout
    /// passes. Readiness and error handles are written to `readfds`,
    /// write-readiness (and errors, when write events are subscribed) to
    /// `writefds`; the two counters are value-result.
    pub(crate) fn srt_epoll_wait(
        eid: c_int,
        readfds: *mut SRTSOCKET,
        rnum: *mut c_int,
        writefds: *mut SRTSOCKET,
        wnum: *mut c_int,
        ms_timeout: i64,
        lrfds: *mut c_int,
        lrnum: *mut c_int,
        lwfds: *mut c_int,
        lwnum: *mut c_int,
    ) -> c_int;
    /// Changes container flags; this library enables
    /// `SRT_EPOLL_ENABLE_EMPTY` so a drained container does not turn every
    /// wait into an error.
    pub(crate) fn srt_epoll_set(eid: c_int, flags: c_int) -> c_int;
    /// Releases an epoll container.
    pub(crate) fn srt_epoll_release(eid: c_int) -> c_int;
    /// Reports the current statistics. `clear` resets the interval counters
    /// after retrieval.
    pub(crate) fn srt_bstats(s: SRTSOCKET, perf: *mut SRT_TRACEBSTATS, clear: c_int) -> c_int;
}
