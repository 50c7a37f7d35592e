use std::{
    ffi::{c_char, c_int},
    fmt::Debug,
    io::Error,
    mem::size_of,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
};

use common::strings::PSTR;

use super::{error, srt_getsockflag, srt_setsockflag, SRT_SOCKOPT, SRTSOCKET};

/// Stream ids travel inside the handshake and are capped by SRT itself.
const MAX_STREAM_ID_LEN: usize = 512;

/// The SRT options an endpoint carries into socket setup. A listener keeps
/// `stream_id` empty (the id is the caller's to declare); passphrase and
/// latency apply to both sides of a connection and, on the server, to every
/// accepted socket before its handshake completes.
#[derive(Debug, Default, Clone)]
pub(crate) struct SrtOptions {
    pub stream_id: Option<String>,
    pub passphrase: Option<String>,
    pub latency: Option<u32>,
}

impl SrtOptions {
    /// Options for the listening socket: nonblocking accepts plus the shared
    /// security and timing options, which accepted sockets inherit.
    pub(crate) fn apply_listener(&self, fd: SRTSOCKET, ipv6: bool) -> Result<(), Error> {
        set_sock_opt(fd, SRT_SOCKOPT::SRTO_RCVSYN, &0_i32)?;
        if ipv6 {
            set_sock_opt(fd, SRT_SOCKOPT::SRTO_IPV6ONLY, &1_i32)?;
        }

        self.apply_shared(fd)
    }

    /// Options for a tentative accepted socket, applied inside the listen
    /// callback so they are in force before the handshake concludes.
    pub(crate) fn apply_accepted(&self, fd: SRTSOCKET) -> Result<(), Error> {
        self.apply_shared(fd)
    }

    /// Options for an outbound sender socket: sender mode, nonblocking send
    /// and the caller's stream id.
    pub(crate) fn apply_caller(&self, fd: SRTSOCKET, ipv6: bool) -> Result<(), Error> {
        set_sock_opt(fd, SRT_SOCKOPT::SRTO_SENDER, &1_i32)?;
        set_sock_opt(fd, SRT_SOCKOPT::SRTO_SNDSYN, &0_i32)?;
        if ipv6 {
            set_sock_opt(fd, SRT_SOCKOPT::SRTO_IPV6ONLY, &1_i32)?;
        }

        if let Some(stream_id) = &self.stream_id {
            set_sock_opt_str(fd, SRT_SOCKOPT::SRTO_STREAMID, stream_id)?;
        }

        self.apply_shared(fd)
    }

    fn apply_shared(&self, fd: SRTSOCKET) -> Result<(), Error> {
        if let Some(latency) = self.latency {
            set_sock_opt(fd, SRT_SOCKOPT::SRTO_LATENCY, &(latency as i32))?;
        }

        if let Some(passphrase) = &self.passphrase {
            set_sock_opt_str(fd, SRT_SOCKOPT::SRTO_PASSPHRASE, passphrase)?;
        }

        Ok(())
    }
}

/// Endpoint addresses are numeric literals, never hostnames. IPv6 is tried
/// first; a v6 endpoint runs with `SRTO_IPV6ONLY` to keep dual-stack
/// ambiguity out of the bind.
pub(crate) fn resolve_addr(address: &str, port: u16) -> Result<SocketAddr, Error> {
    if let Ok(it) = address.parse::<Ipv6Addr>() {
        return Ok(SocketAddr::V6(SocketAddrV6::new(it, port, 0, 0)));
    }

    if let Ok(it) = address.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::V4(SocketAddrV4::new(it, port)));
    }

    Err(Error::other(format!(
        "failed to parse endpoint address: {}",
        address
    )))
}

pub(crate) fn set_sock_opt<T: Sized + Debug + PartialEq>(
    sock: SRTSOCKET,
    opt: SRT_SOCKOPT,
    flag: &T,
) -> Result<(), Error> {
    if unsafe {
        srt_setsockflag(
            sock,
            opt,
            flag as *const T as *const _,
            size_of::<T>() as c_int,
        )
    } == 0
    {
        Ok(())
    } else {
        Err(error())
    }
}

pub(crate) fn set_sock_opt_str(sock: SRTSOCKET, opt: SRT_SOCKOPT, flag: &str) -> Result<(), Error> {
    if unsafe {
        srt_setsockflag(
            sock,
            opt,
            PSTR::from(flag).as_ptr() as *const _,
            flag.len() as c_int,
        )
    } == 0
    {
        Ok(())
    } else {
        Err(error())
    }
}

pub(crate) fn get_sock_opt_str(sock: SRTSOCKET, opt: SRT_SOCKOPT) -> Option<String> {
    let mut optval: [c_char; MAX_STREAM_ID_LEN + 1] = [0; MAX_STREAM_ID_LEN + 1];
    let mut optlen = optval.len() as c_int;

    if unsafe { srt_getsockflag(sock, opt, optval.as_mut_ptr() as *mut _, &mut optlen) } == 0 {
        PSTR::from(optval.as_ptr() as *const c_char).to_string().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_ipv6_with_scope_free_parse() {
        let addr = resolve_addr("::1", 9000).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn falls_back_to_ipv4() {
        let addr = resolve_addr("127.0.0.1", 7000).unwrap();
        assert_eq!(addr, "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn rejects_hostnames() {
        assert!(resolve_addr("localhost", 7000).is_err());
        assert!(resolve_addr("", 7000).is_err());
    }
}
