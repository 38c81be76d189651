use libc::{c_int, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::{Ready, Token};

/// A readiness event returned by [`Selector::wait`](crate::Selector::wait).
///
/// `Event` pairs a [readiness state](Ready) with the [`Token`] it was
/// registered under.
///
/// # Examples
///
/// ```
/// use queen_loop::{Event, Ready, Token};
///
/// let event = Event::new(Ready::readable() | Ready::writable(), Token(0));
///
/// assert_eq!(event.readiness(), Ready::readable() | Ready::writable());
/// assert_eq!(event.token(), Token(0));
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Event {
    kind: Ready,
    token: Token,
}

impl Event {
    pub fn new(readiness: Ready, token: Token) -> Event {
        Event { kind: readiness, token }
    }

    pub fn readiness(&self) -> Ready {
        self.kind
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// A reusable buffer of readiness results filled in by one
/// [`Selector::wait`](crate::Selector::wait) call.
///
/// A single `Events` instance is normally allocated once alongside the
/// selector and reused across iterations so a wait never allocates.
///
/// # Examples
///
/// ```no_run
/// use queen_loop::Events;
///
/// let events = Events::with_capacity(1024);
/// assert_eq!(1024, events.capacity());
/// ```
pub struct Events {
    pub(crate) events: Vec<libc::epoll_event>,
}

/// [`Events`] iterator, created by [`Events::iter`].
pub struct Iter<'a> {
    inner: &'a Events,
    pos: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            events: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Event> {
        self.events.get(idx).map(decode)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { inner: self, pos: 0 }
    }
}

fn decode(raw: &libc::epoll_event) -> Event {
    let flags = raw.events as c_int;
    let mut ready = Ready::empty();

    if (flags & EPOLLIN) != 0 || (flags & EPOLLPRI) != 0 {
        ready.insert(Ready::readable());
    }

    if (flags & EPOLLOUT) != 0 {
        ready.insert(Ready::writable());
    }

    if (flags & EPOLLERR) != 0 {
        ready.insert(Ready::error());
    }

    if (flags & EPOLLRDHUP) != 0 || (flags & EPOLLHUP) != 0 {
        ready.insert(Ready::hup());
    }

    Event::new(ready, Token(raw.u64 as usize))
}

impl<'a> IntoIterator for &'a Events {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Iterator for Iter<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let ret = self.inner.get(self.pos);
        self.pos += 1;
        ret
    }
}
