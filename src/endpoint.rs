use std::any::Any;
use std::sync::Arc;

use crate::connect::Connect;
use crate::ready::Ready;

/// Opaque, caller-supplied data threaded through accept/connect and handed
/// back on the registration key. The loop never inspects it.
pub type UserAttachment = Arc<dyn Any + Send + Sync>;

/// The live, framework-side object backing a connected channel.
///
/// Concrete implementations are external collaborators the loop never
/// constructs itself; the loop only ever holds one behind `Arc<dyn Connection>`.
pub trait Connection: Send + Sync {
    fn close(&self);
}

/// The collaborator a [`SelectorLoop`](crate::SelectorLoop) notifies on
/// readiness and on close.
pub trait EndPoint: Send + Sync {
    fn close(&self);

    fn connection(&self) -> Option<Arc<dyn Connection>>;

    fn set_connection(&self, connection: Arc<dyn Connection>);
}

/// An [`EndPoint`] that can itself be dispatched readiness.
pub trait SelectableEndPoint: EndPoint {
    /// Invoked on the loop thread when the key is ready. Must not block.
    fn on_selected(&self);

    /// Invoked on the loop thread after dispatch, once the two-phase sweep
    /// has let any momentary interest-ops edits from a worker thread settle.
    /// Must not block.
    fn update_key(&self);

    /// The interest ops this endpoint currently wants registered. Read by
    /// the loop right after `update_key()` returns; a change from the key's
    /// last-registered interest triggers a single `epoll_ctl` rewrite.
    fn interest(&self) -> Ready;
}

/// The tag stored per registration key, replacing runtime-type dispatch on
/// the attachment with an explicit variant.
#[derive(Clone)]
pub enum Attachment {
    Nil,
    Pending(Arc<Connect>),
    Live(Arc<dyn SelectableEndPoint>),
}

impl Attachment {
    pub fn is_nil(&self) -> bool {
        matches!(self, Attachment::Nil)
    }

    pub fn as_pending(&self) -> Option<&Arc<Connect>> {
        match self {
            Attachment::Pending(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_live(&self) -> Option<&Arc<dyn SelectableEndPoint>> {
        match self {
            Attachment::Live(ep) => Some(ep),
            _ => None,
        }
    }
}
