use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    event::Update,
    Result,
};

/// An update the codec recognised as an update but could not decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedUpdate {
    /// Set when the id could still be read; the cursor moves past it.
    pub update_id: Option<u64>,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedBatch {
    pub updates: Vec<Update>,
    pub rejected: Vec<RejectedUpdate>,
}

impl DecodedBatch {
    /// Highest update id seen, decoded or not.
    pub fn highest_id(&self) -> Option<u64> {
        self.updates
            .iter()
            .map(|u| u.id)
            .chain(self.rejected.iter().filter_map(|r| r.update_id))
            .max()
    }
}

/// Turns a raw payload into typed updates.
///
/// Envelope-level failures (unparseable body, remote `ok:false`) are errors.
/// A single bad item inside a good envelope is reported in
/// [`DecodedBatch::rejected`] instead.
pub trait UpdateCodec: Send + Sync {
    fn decode_batch(&self, raw: &[u8]) -> Result<DecodedBatch>;
}

/// Pull-based source of raw update batches (long polling).
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch the next batch, starting at update id `offset`.
    async fn fetch(&self, offset: u64) -> Result<Vec<u8>>;
}

/// One button of an inline keyboard; pressing it produces a callback query
/// carrying `callback_data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Outbound side used by handlers to reply.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    /// Send `text` with one button per row.
    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: &[InlineButton],
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{fixtures::*, Event};

    #[test]
    fn highest_id_covers_rejected_items() {
        let batch = DecodedBatch {
            updates: vec![Update {
                id: 10,
                event: Event::Message(text_message(1, "hi")),
            }],
            rejected: vec![
                RejectedUpdate {
                    update_id: Some(12),
                    reason: "bad".into(),
                },
                RejectedUpdate {
                    update_id: None,
                    reason: "worse".into(),
                },
            ],
        };
        assert_eq!(batch.highest_id(), Some(12));
        assert!(DecodedBatch::default().highest_id().is_none());
    }
}
