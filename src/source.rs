use std::io;
use std::os::unix::io::RawFd;

use crate::selector::Selector;
use crate::{EpollOpt, Ready, Token};

/// The registration contract a channel implements to take part in a
/// [`SelectorLoop`](crate::SelectorLoop).
///
/// `add`/`modify`/`delete` are thin forwarders onto the underlying raw file
/// descriptor; types that wrap a raw fd (sockets, eventfds, the internal
/// waker) implement this directly rather than going through any
/// intermediate registration object.
pub trait Source {
    fn add(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()>;

    fn modify(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()>;

    fn delete(&self, selector: &Selector) -> io::Result<()>;
}

impl Source for RawFd {
    fn add(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        selector.add(*self, token, interest, opts)
    }

    fn modify(&self, selector: &Selector, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        selector.modify(*self, token, interest, opts)
    }

    fn delete(&self, selector: &Selector) -> io::Result<()> {
        selector.delete(*self)
    }
}
