//! A single-threaded managed selector: a cooperative event loop that
//! multiplexes non-blocking network channels onto one epoll instance and
//! drives lifecycle callbacks on attached endpoints.
//!
//! One process typically runs several [`SelectorLoop`]s in parallel, each
//! bound to its own OS thread, behind a [`SelectorManager`] pool, to scale
//! accept/connect/readiness work across cores.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use queen_loop::manager::SelectorPool;
//! use queen_loop::scheduler::TimerScheduler;
//! use queen_loop::net::TcpListener;
//! use queen_loop::SelectorLoop;
//!
//! let scheduler = Arc::new(TimerScheduler::new());
//! let selector_loop = SelectorLoop::new(Arc::new(SelectorPool::new(
//!     Vec::new(),
//!     scheduler,
//!     Duration::from_secs(10),
//! ))).unwrap();
//!
//! selector_loop.start().unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! selector_loop.submit_acceptor(listener).unwrap();
//!
//! selector_loop.stop().unwrap();
//! ```

extern crate libc;
#[macro_use]
extern crate log;

pub mod change;
pub mod connect;
pub mod diagnostics;
pub mod endpoint;
pub mod epoll_opt;
pub mod error;
pub mod event;
pub mod manager;
pub mod net;
pub mod ready;
pub mod scheduler;
pub mod selector;
pub mod selector_loop;
pub mod source;
pub(crate) mod sys;
pub mod token;
pub mod waker;

pub use change::Change;
pub use connect::Connect;
pub use endpoint::{Attachment, Connection, EndPoint, SelectableEndPoint, UserAttachment};
pub use epoll_opt::EpollOpt;
pub use error::ConnectError;
pub use event::{Event, Events};
pub use manager::SelectorManager;
pub use ready::Ready;
pub use scheduler::{ScheduledHandle, Scheduler};
pub use selector::{Selector, SelectorId};
pub use selector_loop::{Channel, SelectorLoop};
pub use source::Source;
pub use token::Token;
pub use waker::Waker;
