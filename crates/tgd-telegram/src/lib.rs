//! Telegram Bot API adapter.
//!
//! Implements the `tgd-core` ports: the JSON update codec, the `getUpdates`
//! long poller and the outbound messenger (teloxide).

pub mod codec;
pub mod messenger;
pub mod transport;

pub use codec::JsonCodec;
pub use messenger::TelegramMessenger;
pub use transport::{HttpPoller, PollerConfig};
