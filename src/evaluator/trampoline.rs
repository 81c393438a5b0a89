//! Packets and the trampoline driver.
//!
//! A step of evaluation returns a [`Packet`]: either the final node, or a thunk for the
//! next step. Tail positions return a bounce instead of calling into the next evaluation,
//! so the host stack stays flat no matter how many tail calls a program makes.

use crate::Error;
use crate::ast::Node;

/// Deferred evaluation step
pub(crate) type Thunk<'a> = Box<dyn FnOnce() -> Result<Packet<'a>, Error> + 'a>;

pub(crate) enum Packet<'a> {
    /// More work to do
    Bounce(Thunk<'a>),
    /// Final value
    Respond(Node),
}

pub(crate) fn bounce<'a>(
    thunk: impl FnOnce() -> Result<Packet<'a>, Error> + 'a,
) -> Result<Packet<'a>, Error> {
    Ok(Packet::Bounce(Box::new(thunk)))
}

pub(crate) fn respond<'a>(node: Node) -> Result<Packet<'a>, Error> {
    Ok(Packet::Respond(node))
}

/// Run thunks until one responds with a value
pub(crate) fn trampoline(start: Thunk<'_>) -> Result<Node, Error> {
    let mut thunk = start;
    loop {
        match thunk()? {
            Packet::Bounce(next) => thunk = next,
            Packet::Respond(node) => return Ok(node),
        }
    }
}
