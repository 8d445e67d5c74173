//! Entity codecs for the single-table layout.
//!
//! Each entity knows its primary key, its index keys and how to move to and
//! from a stored [`Item`]. Decoding never fills in defaults for required
//! attributes; a missing or malformed one is a [`DecodeError`].

mod browser;
mod location;
mod rollup;
mod session;
mod visit;
mod visitor;

pub use browser::{parse_user_agent, Browser, UserAgent};
pub use location::{AutonomousSystem, Location};
pub use rollup::{Granularity, Period, Rollup};
pub use session::Session;
pub use visit::Visit;
pub use visitor::{Visitor, NUMBER_SESSIONS};

use crate::error::DecodeError;
use crate::store::{Item, Key};

pub trait Entity: Sized {
    /// Entity name, used in errors and as the default `Type` attribute.
    const TYPE: &'static str;

    /// Value written to the `Type` attribute.
    fn kind(&self) -> &'static str {
        Self::TYPE
    }

    fn key(&self) -> Key;
    fn encode(&self) -> Item;
    fn decode(item: &Item) -> Result<Self, DecodeError>;
}

pub(crate) fn visitor_pk(ip: &str) -> String {
    format!("VISITOR#{ip}")
}

pub(crate) fn page_pk(slug: &str) -> String {
    format!("PAGE#{slug}")
}

/// Starts an item with its primary key and `Type`.
pub(crate) fn base_item<E: Entity>(entity: &E) -> Item {
    let mut item = entity.key().to_item();
    item.insert(crate::store::TYPE.to_string(), crate::codec::s(entity.kind()));
    item
}
