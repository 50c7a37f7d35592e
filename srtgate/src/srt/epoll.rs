use std::{ffi::c_int, io::Error, ptr::null_mut, sync::atomic::AtomicBool};

use common::atomic::EasyAtomic;

use super::{
    error, srt_clearlasterror, srt_epoll_add_usock, srt_epoll_create, srt_epoll_release,
    srt_epoll_remove_usock, srt_epoll_set, srt_epoll_wait, SRTSOCKET, SRT_EPOLL_ENABLE_EMPTY,
};

/// One SRT epoll container. Registration happens from whichever thread owns
/// the endpoint at the time, waiting only ever from the endpoint's worker.
pub(crate) struct Epoll {
    id: c_int,
    released: AtomicBool,
}

impl Epoll {
    pub fn new() -> Result<Self, Error> {
        let id = unsafe { srt_epoll_create() };
        if id < 0 {
            return Err(error());
        }

        // Without empty mode a container whose last socket was removed turns
        // every wait during teardown into an error report.
        if unsafe { srt_epoll_set(id, SRT_EPOLL_ENABLE_EMPTY) } < 0 {
            let err = error();
            unsafe { srt_epoll_release(id) };
            return Err(err);
        }

        Ok(Self {
            id,
            released: AtomicBool::new(false),
        })
    }

    pub fn add(&self, fd: SRTSOCKET, events: c_int) -> Result<(), Error> {
        if unsafe { srt_epoll_add_usock(self.id, fd, &events) } != 0 {
            return Err(error());
        }

        Ok(())
    }

    pub fn remove(&self, fd: SRTSOCKET) {
        unsafe { srt_epoll_remove_usock(self.id, fd) };
    }

    /// Waits for events, filling the two output sets and returning how many
    /// handles landed in each. `readfds` receives read-ready and errored
    /// sockets, `writefds` write-ready ones (plus errored, when write events
    /// were subscribed). `None` covers both timeouts and teardown wakes; the
    /// stored library error is cleared so it cannot shadow a later failure.
    pub fn wait(
        &self,
        readfds: &mut [SRTSOCKET],
        writefds: &mut [SRTSOCKET],
        timeout_ms: i64,
    ) -> Option<(usize, usize)> {
        let mut rnum = readfds.len() as c_int;
        let mut wnum = writefds.len() as c_int;

        let n = unsafe {
            srt_epoll_wait(
                self.id,
                readfds.as_mut_ptr(),
                &mut rnum,
                writefds.as_mut_ptr(),
                &mut wnum,
                timeout_ms,
                null_mut(),
                null_mut(),
                null_mut(),
                null_mut(),
            )
        };

        if n < 0 {
            unsafe { srt_clearlasterror() };
            return None;
        }

        Some((rnum as usize, wnum as usize))
    }

    /// Releases the container. The poll handle must go before the sockets it
    /// watches are closed, so endpoints call this explicitly during their
    /// stop sequence; the `Drop` impl only covers early-exit paths.
    pub fn release(&self) {
        if !EasyAtomic::update(&self.released, true) {
            unsafe { srt_epoll_release(self.id) };
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        self.release();
    }
}
