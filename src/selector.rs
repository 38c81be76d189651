use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use std::{cmp, fmt, io};

use libc::{EPOLLET, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

use crate::event::Events;
use crate::source::Source;
use crate::{EpollOpt, Ready, Token};

static NEXT_SELECTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// The readiness multiplexer: one epoll instance a [`SelectorLoop`](crate::SelectorLoop)
/// owns exclusively.
///
/// Channels register interest through [`Source`]; `Selector` itself only
/// deals in raw file descriptors. Registering the same channel with two
/// different selectors is a programming error the channel itself is
/// expected to catch with [`SelectorId`] — `Selector` has no way to detect
/// it from its own side.
pub struct Selector {
    id: usize,
    epfd: RawFd,
    closed: AtomicBool,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let epfd = crate::sys::syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let id = NEXT_SELECTOR_ID.fetch_add(1, Ordering::Relaxed) + 1;

        Ok(Selector { id, epfd, closed: AtomicBool::new(false) })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Closes the underlying epoll fd immediately rather than waiting on
    /// `Drop`. Idempotent: a second call (including the one `Drop` makes)
    /// is a no-op, so the fd is never closed twice.
    pub fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            unsafe {
                let _ = libc::close(self.epfd);
            }
        }
    }

    /// Blocks until at least one registered channel is ready, `timeout`
    /// elapses, or the selector's [`Waker`](crate::Waker) fires — whichever
    /// comes first. `None` blocks indefinitely.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let cnt = crate::sys::syscall!(epoll_wait(
            self.epfd,
            events.events.as_mut_ptr(),
            events.events.capacity() as i32,
            timeout_ms
        ))?;

        // Safety: epoll_wait just initialized the first `cnt` slots of a
        // buffer allocated (not necessarily zeroed) up to `capacity()`.
        unsafe { events.events.set_len(cnt as usize) };

        Ok(cnt as usize)
    }

    pub fn register<S: Source + ?Sized>(
        &self,
        source: &S,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        validate(interest)?;
        source.add(self, token, interest, opts)
    }

    pub fn reregister<S: Source + ?Sized>(
        &self,
        source: &S,
        token: Token,
        interest: Ready,
        opts: EpollOpt,
    ) -> io::Result<()> {
        validate(interest)?;
        source.modify(self, token, interest, opts)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &S) -> io::Result<()> {
        source.delete(self)
    }

    pub(crate) fn add(&self, fd: RawFd, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest, opts),
            u64: usize::from(token) as u64,
        };

        crate::sys::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    pub(crate) fn modify(&self, fd: RawFd, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: ioevent_to_epoll(interest, opts),
            u64: usize::from(token) as u64,
        };

        crate::sys::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;
        Ok(())
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        crate::sys::syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }
}

fn validate(interest: Ready) -> io::Result<()> {
    if !interest.is_readable() && !interest.is_writable() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interest must include readable or writable",
        ));
    }
    Ok(())
}

fn ioevent_to_epoll(interest: Ready, opts: EpollOpt) -> u32 {
    let mut kind = 0;

    if interest.is_readable() {
        kind |= EPOLLIN;
    }

    if interest.is_writable() {
        kind |= EPOLLOUT;
    }

    if interest.is_hup() {
        kind |= EPOLLRDHUP;
    }

    if opts.is_edge() {
        kind |= EPOLLET;
    }

    if opts.is_oneshot() {
        kind |= EPOLLONESHOT;
    }

    if opts.is_level() {
        kind &= !EPOLLET;
    }

    kind as u32
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Selector {{ id: {} }}", self.id)
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        self.close();
    }
}

/// Guards a channel against being registered with more than one
/// [`Selector`] at a time; cloned alongside the channel on `try_clone`.
#[derive(Debug, Default)]
pub struct SelectorId {
    id: AtomicUsize,
}

impl SelectorId {
    pub fn new() -> SelectorId {
        SelectorId { id: AtomicUsize::new(0) }
    }

    pub fn associate_selector(&self, selector: &Selector) -> io::Result<()> {
        let bound = self.id.load(Ordering::SeqCst);

        if bound != 0 && bound != selector.id() {
            Err(io::Error::new(io::ErrorKind::Other, "channel already registered with another selector"))
        } else {
            self.id.store(selector.id(), Ordering::SeqCst);
            Ok(())
        }
    }
}

impl Clone for SelectorId {
    fn clone(&self) -> SelectorId {
        SelectorId {
            id: AtomicUsize::new(self.id.load(Ordering::SeqCst)),
        }
    }
}
