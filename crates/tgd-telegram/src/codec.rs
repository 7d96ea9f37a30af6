//! Bot API JSON codec.
//!
//! Accepts the three shapes the Bot API produces:
//! - `{"ok": true, "result": [ ...updates ]}` from `getUpdates`;
//! - a bare array of updates;
//! - a single update object (webhook body).
//!
//! `{"ok": false, ...}` is reported as [`Error::Api`]. A single update that
//! fails to decode is rejected on its own and the rest of the batch survives.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use tgd_core::{
    domain::{ChatId, MessageId, UserId},
    errors::Error,
    event::{
        CallbackQuery, Chat, ChosenInlineResult, EditedMessage, Event, InlineQuery, Message,
        OtherUpdate, PreCheckoutQuery, ShippingAddress, ShippingQuery, User,
    },
    ports::{DecodedBatch, RejectedUpdate, UpdateCodec},
    Result, Update,
};

/// Category fields in classification order. An update carries at most one.
const CATEGORY_FIELDS: [&str; 7] = [
    "message",
    "edited_message",
    "callback_query",
    "inline_query",
    "chosen_inline_result",
    "shipping_query",
    "pre_checkout_query",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl UpdateCodec for JsonCodec {
    fn decode_batch(&self, raw: &[u8]) -> Result<DecodedBatch> {
        let root: Value = serde_json::from_slice(raw)?;
        let items = match root {
            Value::Array(items) => items,
            Value::Object(obj) if obj.contains_key("ok") => unwrap_envelope(obj)?,
            Value::Object(obj) if obj.contains_key("update_id") => vec![Value::Object(obj)],
            other => {
                return Err(Error::Decode(format!(
                    "expected update, update array or envelope, got {}",
                    kind_of(&other)
                )))
            }
        };

        let mut batch = DecodedBatch::default();
        for item in items {
            match decode_update(item) {
                Ok(update) => batch.updates.push(update),
                Err(rejected) => batch.rejected.push(rejected),
            }
        }
        Ok(batch)
    }
}

fn unwrap_envelope(mut obj: Map<String, Value>) -> Result<Vec<Value>> {
    if !obj.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let code = obj.get("error_code").and_then(Value::as_i64);
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        return Err(Error::Api(match code {
            Some(code) => format!("{code}: {description}"),
            None => description.to_string(),
        }));
    }

    match obj.remove("result") {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Object(update)) => Ok(vec![Value::Object(update)]),
        Some(other) => Err(Error::Decode(format!(
            "envelope result is {}, expected array or object",
            kind_of(&other)
        ))),
        None => Err(Error::Decode("envelope has no result".to_string())),
    }
}

fn decode_update(item: Value) -> std::result::Result<Update, RejectedUpdate> {
    let mut obj = match item {
        Value::Object(obj) => obj,
        other => {
            return Err(RejectedUpdate {
                update_id: None,
                reason: format!("update is {}, expected object", kind_of(&other)),
            })
        }
    };

    let Some(id) = obj.get("update_id").and_then(Value::as_u64) else {
        return Err(RejectedUpdate {
            update_id: None,
            reason: "missing or invalid update_id".to_string(),
        });
    };

    let reject = |field: &str, e: String| RejectedUpdate {
        update_id: Some(id),
        reason: format!("{field}: {e}"),
    };

    let Some(field) = CATEGORY_FIELDS.into_iter().find(|f| obj.contains_key(*f)) else {
        obj.remove("update_id");
        let kind = obj.keys().next().cloned();
        return Ok(Update {
            id,
            event: Event::Other(OtherUpdate {
                kind,
                payload: Value::Object(obj),
            }),
        });
    };

    let payload = obj.remove(field).unwrap_or(Value::Null);
    let event = match field {
        "message" => parse::<WireMessage>(payload)
            .and_then(Message::try_from)
            .map(Event::Message),
        "edited_message" => parse::<WireMessage>(payload)
            .and_then(Message::try_from)
            .map(|message| Event::EditedMessage(EditedMessage { message })),
        "callback_query" => parse::<WireCallbackQuery>(payload)
            .and_then(CallbackQuery::try_from)
            .map(Event::CallbackQuery),
        "inline_query" => parse::<WireInlineQuery>(payload)
            .map(InlineQuery::from)
            .map(Event::InlineQuery),
        "chosen_inline_result" => parse::<WireChosenInlineResult>(payload)
            .map(ChosenInlineResult::from)
            .map(Event::ChosenInlineResult),
        "shipping_query" => parse::<WireShippingQuery>(payload)
            .map(ShippingQuery::from)
            .map(Event::ShippingQuery),
        _ => parse::<WirePreCheckoutQuery>(payload)
            .map(PreCheckoutQuery::from)
            .map(Event::PreCheckoutQuery),
    };

    event
        .map(|event| Update { id, event })
        .map_err(|e| reject(field, e))
}

fn parse<T: for<'de> Deserialize<'de>>(v: Value) -> std::result::Result<T, String> {
    serde_json::from_value(v).map_err(|e| e.to_string())
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---- wire types ----

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
    language_code: Option<String>,
}

impl From<WireUser> for User {
    fn from(u: WireUser) -> Self {
        Self {
            id: UserId(u.id),
            is_bot: u.is_bot,
            first_name: u.first_name,
            last_name: u.last_name,
            username: u.username,
            language_code: u.language_code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    title: Option<String>,
    username: Option<String>,
}

impl From<WireChat> for Chat {
    fn from(c: WireChat) -> Self {
        Self {
            id: ChatId(c.id),
            kind: c.kind,
            title: c.title,
            username: c.username,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    from: Option<WireUser>,
    chat: WireChat,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<WireMessage>>,
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(m: WireMessage) -> std::result::Result<Self, String> {
        let date = DateTime::<Utc>::from_timestamp(m.date, 0)
            .ok_or_else(|| format!("date {} out of range", m.date))?;
        let reply_to_message = match m.reply_to_message {
            Some(reply) => Some(Box::new(Message::try_from(*reply)?)),
            None => None,
        };
        Ok(Self {
            message_id: MessageId(m.message_id),
            from: m.from.map(User::from),
            chat: m.chat.into(),
            date,
            text: m.text,
            caption: m.caption,
            reply_to_message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireCallbackQuery {
    id: String,
    from: WireUser,
    message: Option<WireMessage>,
    inline_message_id: Option<String>,
    #[serde(default)]
    chat_instance: String,
    data: Option<String>,
}

impl TryFrom<WireCallbackQuery> for CallbackQuery {
    type Error = String;

    fn try_from(q: WireCallbackQuery) -> std::result::Result<Self, String> {
        Ok(Self {
            id: q.id,
            from: q.from.into(),
            message: q.message.map(Message::try_from).transpose()?,
            inline_message_id: q.inline_message_id,
            chat_instance: q.chat_instance,
            data: q.data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireInlineQuery {
    id: String,
    from: WireUser,
    query: String,
    #[serde(default)]
    offset: String,
}

impl From<WireInlineQuery> for InlineQuery {
    fn from(q: WireInlineQuery) -> Self {
        Self {
            id: q.id,
            from: q.from.into(),
            query: q.query,
            offset: q.offset,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChosenInlineResult {
    result_id: String,
    from: WireUser,
    query: String,
    inline_message_id: Option<String>,
}

impl From<WireChosenInlineResult> for ChosenInlineResult {
    fn from(r: WireChosenInlineResult) -> Self {
        Self {
            result_id: r.result_id,
            from: r.from.into(),
            query: r.query,
            inline_message_id: r.inline_message_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireShippingAddress {
    country_code: String,
    state: String,
    city: String,
    street_line1: String,
    street_line2: String,
    post_code: String,
}

#[derive(Debug, Deserialize)]
struct WireShippingQuery {
    id: String,
    from: WireUser,
    invoice_payload: String,
    #[serde(default)]
    shipping_address: WireShippingAddress,
}

impl From<WireShippingQuery> for ShippingQuery {
    fn from(q: WireShippingQuery) -> Self {
        let a = q.shipping_address;
        Self {
            id: q.id,
            from: q.from.into(),
            invoice_payload: q.invoice_payload,
            shipping_address: ShippingAddress {
                country_code: a.country_code,
                state: a.state,
                city: a.city,
                street_line1: a.street_line1,
                street_line2: a.street_line2,
                post_code: a.post_code,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePreCheckoutQuery {
    id: String,
    from: WireUser,
    currency: String,
    total_amount: i64,
    invoice_payload: String,
    shipping_option_id: Option<String>,
}

impl From<WirePreCheckoutQuery> for PreCheckoutQuery {
    fn from(q: WirePreCheckoutQuery) -> Self {
        Self {
            id: q.id,
            from: q.from.into(),
            currency: q.currency,
            total_amount: q.total_amount,
            invoice_payload: q.invoice_payload,
            shipping_option_id: q.shipping_option_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tgd_core::Category;

    fn decode(v: Value) -> Result<DecodedBatch> {
        JsonCodec.decode_batch(v.to_string().as_bytes())
    }

    fn message(id: u64, from: i64, text: &str) -> Value {
        json!({
            "update_id": id,
            "message": {
                "message_id": 100 + id,
                "from": {"id": from, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": from, "type": "private"},
                "date": 1_700_000_000,
                "text": text
            }
        })
    }

    #[test]
    fn decodes_get_updates_envelope() {
        let batch = decode(json!({
            "ok": true,
            "result": [message(1, 42, "/start"), message(2, 42, "hello")]
        }))
        .unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.updates.len(), 2);
        let Event::Message(m) = &batch.updates[0].event else {
            panic!("expected message");
        };
        assert_eq!(batch.updates[0].id, 1);
        assert_eq!(m.text.as_deref(), Some("/start"));
        assert_eq!(m.chat.id, ChatId(42));
        assert_eq!(m.date.timestamp(), 1_700_000_000);
        assert_eq!(
            batch.updates[0].event.conversation_id().map(|c| c.0),
            Some(42)
        );
    }

    #[test]
    fn accepts_single_object_and_bare_array() {
        let single = decode(message(5, 1, "hi")).unwrap();
        assert_eq!(single.updates.len(), 1);

        let array = decode(json!([message(6, 1, "a"), message(7, 1, "b")])).unwrap();
        assert_eq!(array.highest_id(), Some(7));
    }

    #[test]
    fn envelope_may_carry_a_single_update() {
        let batch = decode(json!({"ok": true, "result": message(9, 3, "hey")})).unwrap();
        assert_eq!(batch.updates.len(), 1);
        assert_eq!(batch.updates[0].id, 9);

        assert!(matches!(
            decode(json!({"ok": true, "result": 5})),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn api_failure_is_an_error() {
        let err = decode(json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        }))
        .unwrap_err();
        match err {
            Error::Api(msg) => assert_eq!(msg, "401: Unauthorized"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            JsonCodec.decode_batch(b"{not json"),
            Err(Error::Json(_))
        ));
        assert!(matches!(decode(json!("text")), Err(Error::Decode(_))));
    }

    #[test]
    fn one_bad_update_does_not_sink_the_batch() {
        let batch = decode(json!([
            message(1, 1, "ok"),
            {"update_id": 2, "message": {"message_id": "nope"}},
            {"no_id": true},
            message(3, 1, "ok")
        ]))
        .unwrap();

        assert_eq!(batch.updates.len(), 2);
        assert_eq!(batch.rejected.len(), 2);
        assert_eq!(batch.rejected[0].update_id, Some(2));
        assert!(batch.rejected[0].reason.starts_with("message:"));
        assert_eq!(batch.rejected[1].update_id, None);
        assert_eq!(batch.highest_id(), Some(3));
    }

    #[test]
    fn classifies_callback_query() {
        let batch = decode(json!({
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 7, "is_bot": false, "first_name": "Bo"},
                "chat_instance": "x",
                "data": "menu:2",
                "message": {
                    "message_id": 3,
                    "chat": {"id": 7, "type": "private"},
                    "date": 0,
                    "text": "pick one"
                }
            }
        }))
        .unwrap();

        let ev = &batch.updates[0].event;
        assert_eq!(ev.category(), Category::CallbackQuery);
        assert_eq!(ev.discriminant(), Some("menu:2"));
        assert_eq!(ev.conversation_id().map(|c| c.0), Some(7));
    }

    #[test]
    fn classifies_remaining_categories() {
        let from = json!({"id": 9, "first_name": "Cy"});
        let batch = decode(json!([
            {"update_id": 1, "edited_message": {
                "message_id": 1, "chat": {"id": 9, "type": "private"}, "date": 0, "text": "/fix typo"
            }},
            {"update_id": 2, "inline_query": {"id": "iq", "from": from, "query": "cats", "offset": ""}},
            {"update_id": 3, "chosen_inline_result": {"result_id": "r", "from": from, "query": "cats"}},
            {"update_id": 4, "shipping_query": {
                "id": "sq", "from": from, "invoice_payload": "order-1",
                "shipping_address": {"country_code": "DE", "city": "Berlin"}
            }},
            {"update_id": 5, "pre_checkout_query": {
                "id": "pc", "from": from, "currency": "EUR", "total_amount": 1299, "invoice_payload": "order-1"
            }},
            {"update_id": 6, "poll": {"id": "p1"}}
        ]))
        .unwrap();

        let cats: Vec<_> = batch.updates.iter().map(|u| u.event.category()).collect();
        assert_eq!(
            cats,
            vec![
                Category::EditedMessage,
                Category::InlineQuery,
                Category::ChosenInlineResult,
                Category::ShippingQuery,
                Category::PreCheckoutQuery,
                Category::Other,
            ]
        );
        let discriminants: Vec<_> = batch
            .updates
            .iter()
            .map(|u| u.event.discriminant())
            .collect();
        assert_eq!(
            discriminants,
            vec![
                Some("/fix"),
                Some("cats"),
                Some("cats"),
                Some("order-1"),
                Some("order-1"),
                None
            ]
        );
        let Event::Other(other) = &batch.updates[5].event else {
            panic!("expected other");
        };
        assert_eq!(other.kind.as_deref(), Some("poll"));
    }

    #[test]
    fn message_wins_when_several_category_fields_are_present() {
        let mut v = message(1, 1, "/a");
        v["callback_query"] = json!({"id": "x", "from": {"id": 1}, "data": "d"});
        let batch = decode(v).unwrap();
        assert_eq!(batch.updates[0].event.category(), Category::Message);
    }
}
