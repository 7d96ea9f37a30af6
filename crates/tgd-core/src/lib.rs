//! Update dispatch and conversation engine for Telegram-style bots.
//!
//! No transport code lives here. The wire codec, the update source (long
//! polling or webhook) and the outbound client are ports (traits) implemented
//! in adapter crates.

pub mod config;
pub mod conversation;
pub mod cursor;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod event;
pub mod handler;
pub mod lanes;
pub mod logging;
pub mod polling;
pub mod pool;
pub mod ports;
pub mod router;
pub mod sequence;

pub use dispatcher::Dispatcher;
pub use errors::{Error, Result};
pub use event::{Category, Event, EventKind, Update};
pub use handler::{Guard, Handler};
pub use sequence::Sequence;
