//! Decoded inbound events.
//!
//! The wire codec turns raw payloads into these types; everything downstream
//! (routers, sequences, handlers) works on them only. Telegram-specific JSON
//! shapes live in the adapter crate.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::{ChatId, ConversationId, MessageId, UserId};

/// Category of an inbound event. Exactly one per update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Message,
    EditedMessage,
    CallbackQuery,
    InlineQuery,
    ChosenInlineResult,
    ShippingQuery,
    PreCheckoutQuery,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Message,
        Category::EditedMessage,
        Category::CallbackQuery,
        Category::InlineQuery,
        Category::ChosenInlineResult,
        Category::ShippingQuery,
        Category::PreCheckoutQuery,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Message => "message",
            Category::EditedMessage => "edited_message",
            Category::CallbackQuery => "callback_query",
            Category::InlineQuery => "inline_query",
            Category::ChosenInlineResult => "chosen_inline_result",
            Category::ShippingQuery => "shipping_query",
            Category::PreCheckoutQuery => "pre_checkout_query",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    /// "private", "group", "supergroup" or "channel".
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    pub from: Option<User>,
    pub chat: Chat,
    pub date: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
}

impl Message {
    /// Leading whitespace-delimited token of the text (`/start` in `/start 42`).
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        text.split_whitespace().next()
    }
}

/// A message that was edited after being sent.
#[derive(Clone, Debug, PartialEq)]
pub struct EditedMessage {
    pub message: Message,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub inline_message_id: Option<String>,
    pub chat_instance: String,
    pub data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
    pub offset: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    pub query: String,
    pub inline_message_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ShippingAddress {
    pub country_code: String,
    pub state: String,
    pub city: String,
    pub street_line1: String,
    pub street_line2: String,
    pub post_code: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShippingQuery {
    pub id: String,
    pub from: User,
    pub invoice_payload: String,
    pub shipping_address: ShippingAddress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
    pub shipping_option_id: Option<String>,
}

/// Any update kind the engine does not model (polls, chat member changes...).
#[derive(Clone, Debug, PartialEq)]
pub struct OtherUpdate {
    /// Name of the field that carried the payload, when one was present.
    pub kind: Option<String>,
    pub payload: serde_json::Value,
}

/// Closed set of decoded events.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Message(Message),
    EditedMessage(EditedMessage),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    Other(OtherUpdate),
}

impl Event {
    pub fn category(&self) -> Category {
        match self {
            Event::Message(_) => Category::Message,
            Event::EditedMessage(_) => Category::EditedMessage,
            Event::CallbackQuery(_) => Category::CallbackQuery,
            Event::InlineQuery(_) => Category::InlineQuery,
            Event::ChosenInlineResult(_) => Category::ChosenInlineResult,
            Event::ShippingQuery(_) => Category::ShippingQuery,
            Event::PreCheckoutQuery(_) => Category::PreCheckoutQuery,
            Event::Other(_) => Category::Other,
        }
    }

    /// The sender of the event, when the category carries one.
    pub fn sender(&self) -> Option<&User> {
        match self {
            Event::Message(m) => m.from.as_ref(),
            Event::EditedMessage(e) => e.message.from.as_ref(),
            Event::CallbackQuery(q) => Some(&q.from),
            Event::InlineQuery(q) => Some(&q.from),
            Event::ChosenInlineResult(r) => Some(&r.from),
            Event::ShippingQuery(q) => Some(&q.from),
            Event::PreCheckoutQuery(q) => Some(&q.from),
            Event::Other(_) => None,
        }
    }

    /// Conversation identity used for sequence routing (the sender id).
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.sender().map(|u| ConversationId::from(u.id))
    }

    /// Category-specific routing string.
    ///
    /// Command token for messages, callback data for callback queries, query
    /// text for inline queries and chosen results, invoice payload for
    /// shipping and pre-checkout queries. `None` means only the fallback can
    /// match.
    pub fn discriminant(&self) -> Option<&str> {
        match self {
            Event::Message(m) => m.command(),
            Event::EditedMessage(e) => e.message.command(),
            Event::CallbackQuery(q) => q.data.as_deref(),
            Event::InlineQuery(q) => Some(q.query.as_str()),
            Event::ChosenInlineResult(r) => Some(r.query.as_str()),
            Event::ShippingQuery(q) => Some(q.invoice_payload.as_str()),
            Event::PreCheckoutQuery(q) => Some(q.invoice_payload.as_str()),
            Event::Other(_) => None,
        }
    }
}

/// One decoded update: the source-assigned identifier plus its event.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub id: u64,
    pub event: Event,
}

/// Payload types that can be registered against directly.
///
/// Each implementor names its category; the dispatcher uses this to erase
/// typed handlers and sequences into `Event`-level ones.
pub trait EventKind: Clone + Send + Sync + 'static {
    const CATEGORY: Category;

    fn from_event(event: Event) -> Option<Self>;
    fn from_event_ref(event: &Event) -> Option<&Self>;
}

macro_rules! event_kind {
    ($ty:ident) => {
        impl EventKind for $ty {
            const CATEGORY: Category = Category::$ty;

            fn from_event(event: Event) -> Option<Self> {
                match event {
                    Event::$ty(v) => Some(v),
                    _ => None,
                }
            }

            fn from_event_ref(event: &Event) -> Option<&Self> {
                match event {
                    Event::$ty(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Event {
            fn from(v: $ty) -> Self {
                Event::$ty(v)
            }
        }
    };
}

event_kind!(Message);
event_kind!(EditedMessage);
event_kind!(CallbackQuery);
event_kind!(InlineQuery);
event_kind!(ChosenInlineResult);
event_kind!(ShippingQuery);
event_kind!(PreCheckoutQuery);

impl EventKind for OtherUpdate {
    const CATEGORY: Category = Category::Other;

    fn from_event(event: Event) -> Option<Self> {
        match event {
            Event::Other(v) => Some(v),
            _ => None,
        }
    }

    fn from_event_ref(event: &Event) -> Option<&Self> {
        match event {
            Event::Other(v) => Some(v),
            _ => None,
        }
    }
}

impl From<OtherUpdate> for Event {
    fn from(v: OtherUpdate) -> Self {
        Event::Other(v)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn message_discriminant_is_leading_token() {
        let ev = Event::Message(text_message(7, "/start  deep-link"));
        assert_eq!(ev.category(), Category::Message);
        assert_eq!(ev.discriminant(), Some("/start"));
        assert_eq!(ev.conversation_id(), Some(ConversationId(7)));
    }

    #[test]
    fn message_without_text_has_no_discriminant() {
        let mut m = text_message(7, "x");
        m.text = None;
        assert_eq!(Event::Message(m).discriminant(), None);
    }

    #[test]
    fn callback_discriminant_is_data() {
        let ev = Event::CallbackQuery(callback(3, "image"));
        assert_eq!(ev.discriminant(), Some("image"));
        assert_eq!(ev.conversation_id(), Some(ConversationId(3)));
    }

    #[test]
    fn other_updates_carry_no_identity() {
        let ev = Event::Other(OtherUpdate {
            kind: Some("poll".to_string()),
            payload: serde_json::json!({"id": "p"}),
        });
        assert_eq!(ev.category(), Category::Other);
        assert_eq!(ev.conversation_id(), None);
        assert_eq!(ev.discriminant(), None);
    }

    #[test]
    fn event_kind_round_trips_variant() {
        let ev: Event = callback(1, "x").into();
        assert!(Message::from_event_ref(&ev).is_none());
        let q = CallbackQuery::from_event(ev).unwrap();
        assert_eq!(q.data.as_deref(), Some("x"));
    }
}
