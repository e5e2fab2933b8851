//! Message channel
//!
//! Validates outgoing text, decodes inbound bytes, and keeps the ordered history of
//! the active session. The channel does not talk to the radio itself: `prepare_send`
//! hands back the bytes to write and the runtime reports the outcome through
//! `mark_sent` / `mark_failed`.

use smallvec::SmallVec;

use crate::config::DEFAULT_MAX_MESSAGE_CHARS;
use crate::errors::SessionError;
use crate::types::{ChannelHandle, DeliveryStatus, Message, MessageId, Timestamp};

/// A validated outgoing message ready to be written to the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub message_id: MessageId,
    pub channel: ChannelHandle,
    pub bytes: Vec<u8>,
}

/// Counters kept across sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub messages_received: u64,
    /// Inbound payloads for a channel that is not open
    pub inbound_dropped: u64,
}

// ----------------------------------------------------------------------------
// Message Channel
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MessageChannel {
    channel: Option<ChannelHandle>,
    history: Vec<Message>,
    next_id: u64,
    max_body_chars: usize,
    stats: ChannelStats,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_CHARS)
    }
}

impl MessageChannel {
    pub fn new(max_body_chars: usize) -> Self {
        Self {
            channel: None,
            history: Vec::new(),
            next_id: 1,
            max_body_chars: max_body_chars.max(1),
            stats: ChannelStats::default(),
        }
    }

    /// Bind to a freshly connected link, starting an empty history
    pub fn open(&mut self, channel: ChannelHandle) {
        self.history.clear();
        self.channel = Some(channel);
    }

    /// Session end: unbind and clear history
    ///
    /// Message ids keep increasing so an id is never reused within the process.
    pub fn reset(&mut self) {
        self.channel = None;
        self.history.clear();
    }

    /// Stop accepting inbound data while keeping history and pending writes
    pub fn close_inbound(&mut self) {
        self.channel = None;
    }

    pub fn channel(&self) -> Option<ChannelHandle> {
        self.channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Validate `body` and append it as a pending outgoing message
    ///
    /// Blank input is a no-op and yields `Ok(None)`.
    pub fn prepare_send(
        &mut self,
        body: &str,
        now: Timestamp,
    ) -> Result<Option<OutgoingFrame>, SessionError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }

        let len = body.chars().count();
        if len > self.max_body_chars {
            return Err(SessionError::MessageTooLong {
                len,
                max: self.max_body_chars,
            });
        }

        let channel = self.channel.ok_or(SessionError::NotConnected)?;
        let message_id = self.allocate_id();
        self.history
            .push(Message::outgoing(message_id, body.to_string(), now));

        Ok(Some(OutgoingFrame {
            message_id,
            channel,
            bytes: body.as_bytes().to_vec(),
        }))
    }

    /// The capability acknowledged the write
    pub fn mark_sent(&mut self, id: MessageId) -> bool {
        let updated = self.set_status(id, DeliveryStatus::Sent);
        if updated {
            self.stats.messages_sent += 1;
        }
        updated
    }

    /// The capability reported a write failure; the message stays in history
    pub fn mark_failed(&mut self, id: MessageId) -> bool {
        let updated = self.set_status(id, DeliveryStatus::Failed);
        if updated {
            self.stats.messages_failed += 1;
        }
        updated
    }

    /// Decode inbound bytes from `channel` into incoming messages
    ///
    /// The whole buffer is one text payload. Payloads longer than the body limit become
    /// consecutive messages. Returns the ids appended, in order.
    pub fn on_receive(
        &mut self,
        channel: ChannelHandle,
        bytes: &[u8],
        now: Timestamp,
    ) -> SmallVec<[MessageId; 2]> {
        let mut appended = SmallVec::new();
        if self.channel != Some(channel) {
            self.stats.inbound_dropped += 1;
            tracing::debug!("Dropping {} inbound bytes for inactive {}", bytes.len(), channel);
            return appended;
        }

        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            return appended;
        }

        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(self.max_body_chars) {
            let id = self.allocate_id();
            self.history
                .push(Message::incoming(id, chunk.iter().collect(), now));
            self.stats.messages_received += 1;
            appended.push(id);
        }
        appended
    }

    /// Ordered snapshot of the session history
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.history
            .binary_search_by_key(&id, |m| m.id)
            .ok()
            .map(|idx| &self.history[idx])
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn set_status(&mut self, id: MessageId, status: DeliveryStatus) -> bool {
        match self.history.binary_search_by_key(&id, |m| m.id) {
            Ok(idx) => {
                let message = &mut self.history[idx];
                if message.delivery_status == Some(DeliveryStatus::Pending) {
                    message.delivery_status = Some(status);
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }
}
