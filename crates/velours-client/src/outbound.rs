//! The outbound message pipeline.
//!
//! A send is optimistic: the message is visible locally (and durably saved)
//! before any network work happens.  Delivery failures are attached to the
//! message per recipient, never thrown.  The one exception is early
//! validation, which is caught at the `send_message` boundary and yields no
//! message at all.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, warn};

use velours_net::SendError;
use velours_shared::{
    AccountId, DeliveryError, DeliveryErrorKind, Destination, Message, MessageId, MessageKind,
    MessageMode, SendState,
};

use crate::conversation::{Conversation, Inner};
use crate::events::{ChangeReason, ConversationEvent};
use crate::window::MessageWindow;

/// How a draft relates to an existing message.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Reply under a topic: the thread root is the topic itself.
    Topic { topic_id: MessageId },
    /// Plain quote reply: the thread follows the quoted message.
    Message { message_id: MessageId },
}

/// User input for one outgoing message.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub body: String,
    pub expires_in: Option<u32>,
    pub mode: MessageMode,
    pub reply: Option<Reply>,
    /// Present for recall messages: the message being recalled.
    pub recall_of: Option<MessageId>,
}

/// Early validation failures (the first pipeline stage).
#[derive(Error, Debug)]
pub enum OutboundError {
    #[error("cannot send into a group that is no longer alive")]
    GroupNotAlive,
    #[error("only our own outgoing messages can be recalled")]
    RecallNotAllowed,
    #[error("recall target is not in the working set")]
    RecallTargetMissing,
}

impl Conversation {
    /// Construct, persist, and transmit an outgoing message.
    ///
    /// Returns `None` when early validation fails (logged, never thrown up);
    /// otherwise the optimistic message, possibly already carrying
    /// per-recipient delivery errors (offline, payload failure).  The
    /// network transmission itself is enqueued and settles asynchronously.
    pub async fn send_message(&self, draft: MessageDraft) -> Option<Message> {
        match self.prepare_outgoing(&draft) {
            Ok((message, recipients)) => {
                Some(self.dispatch_outgoing(message, recipients, draft.reply).await)
            }
            Err(e) => {
                // Deliberate boundary: a bad send must not crash the
                // conversation.
                error!(conversation = %self.inner.id, error = %e, "refusing to send message");
                None
            }
        }
    }

    /// Pipeline steps 1-3: preconditions, recipient/policy resolution, canonical
    /// attributes.  Fully synchronous.
    fn prepare_outgoing(
        &self,
        draft: &MessageDraft,
    ) -> Result<(Message, Vec<AccountId>), OutboundError> {
        let inner = &self.inner;
        let st = inner.lock();

        if matches!(inner.destination, Destination::Group { .. }) && !st.group_alive {
            return Err(OutboundError::GroupNotAlive);
        }
        if let Some(recall) = draft.recall_of {
            match st.window.get(&recall) {
                Some(original)
                    if original.kind == MessageKind::Outgoing
                        && original.sender == Some(inner.identity.account) => {}
                Some(_) => return Err(OutboundError::RecallNotAllowed),
                None => return Err(OutboundError::RecallTargetMissing),
            }
        }

        let recipients = match &inner.destination {
            Destination::Private(peer) => vec![*peer],
            Destination::Group { .. } => st.members.clone(),
            Destination::SelfDevices => Vec::new(),
        };

        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            conversation_id: inner.id,
            sender: Some(inner.identity.account),
            source_device: inner.identity.device,
            kind: MessageKind::Outgoing,
            body: draft.body.clone(),
            sent_at: now.timestamp_millis(),
            // Assigned by the server on confirmation.
            server_timestamp: 0,
            notify_sequence_id: None,
            thread_id: None,
            expires_in: draft.expires_in,
            mode: draft.mode,
            recall_of: draft.recall_of,
            // Outgoing messages are never auto-translated.
            translate_lang: None,
            send_state: Some(SendState::Sending),
            delivery_errors: Vec::new(),
            mentions_self: false,
            received_at: now,
        };
        Ok((message, recipients))
    }

    /// Pipeline steps 4-10.
    async fn dispatch_outgoing(
        &self,
        mut message: Message,
        recipients: Vec<AccountId>,
        reply: Option<Reply>,
    ) -> Message {
        let inner = &self.inner;

        // 4+5: thread linkage, then optimistic insert.  Synchronous, before
        // any await, so the UI sees "sending" immediately.
        {
            let mut st = inner.lock();
            message.thread_id = derive_thread_id(&st.window, reply.as_ref());
            st.window.insert(message.clone());
        }
        inner.events.changed(ChangeReason::MessageAdded);

        // 6: forced durable save of the optimistic message.
        if let Err(e) = inner.store.save_message(&message, true).await {
            warn!(conversation = %inner.id, error = %e, "failed to persist optimistic message");
        }

        // 7: summary update.  A recall must not re-surface an archived
        // conversation.
        if message.recall_of.is_none() {
            {
                let mut st = inner.lock();
                st.last_message = Some(preview(&message.body));
                st.last_activity_at = message.sent_at;
                st.is_archived = false;
            }
            inner.events.changed(ChangeReason::Summary);
            Self::save_summary(inner).await;
        }

        // 8: offline fast-fail.
        let Some(messaging) = inner.transport.current() else {
            return Self::fail_delivery(
                inner,
                message,
                &recipients,
                DeliveryErrorKind::Network,
                "no network transport available",
            )
            .await;
        };

        // 9: wire payload, one construction path per destination kind.
        let payload = match messaging.build_payload(&message, &inner.destination).await {
            Ok(payload) => payload,
            Err(e) => {
                return Self::fail_delivery(
                    inner,
                    message,
                    &recipients,
                    DeliveryErrorKind::Payload,
                    &e.to_string(),
                )
                .await;
            }
        };

        // 10: enqueue the transmission; the pipeline does not block on
        // network completion.
        let task_inner = self.inner.clone();
        let message_id = message.id;
        let to_self = matches!(inner.destination, Destination::SelfDevices);
        let task_recipients = recipients.clone();
        tokio::spawn(async move {
            let result = task_inner
                .queue
                .run("send-message", async {
                    if to_self {
                        messaging.sync_to_self(payload).await?;
                    } else {
                        messaging.send_payload(payload).await?;
                    }
                    Ok(())
                })
                .await;
            Self::settle_delivery(&task_inner, message_id, task_recipients, result).await;
        });

        message
    }

    /// Shared error-attachment path for steps 8 and 9: record a
    /// per-recipient delivery error, keep the message visible, return it.
    async fn fail_delivery(
        inner: &Arc<Inner>,
        mut message: Message,
        recipients: &[AccountId],
        kind: DeliveryErrorKind,
        detail: &str,
    ) -> Message {
        message.delivery_errors = delivery_errors(inner, recipients, kind, detail);
        message.send_state = Some(SendState::Failed);
        inner.lock().window.insert(message.clone());
        if let Err(e) = inner.store.save_message(&message, true).await {
            warn!(conversation = %inner.id, error = %e, "failed to persist message delivery errors");
        }
        inner.events.emit(ConversationEvent::DeliverySettled {
            message_id: message.id,
            failed: true,
        });
        message
    }

    /// Apply the asynchronous transmission outcome to the stored message.
    async fn settle_delivery(
        inner: &Arc<Inner>,
        message_id: MessageId,
        recipients: Vec<AccountId>,
        result: anyhow::Result<()>,
    ) {
        let settled = match result {
            Ok(()) => {
                let mut st = inner.lock();
                st.window.update(&message_id, |m| {
                    m.send_state = Some(SendState::Sent);
                });
                st.window.get(&message_id).cloned()
            }
            Err(e) => {
                let kind = match e.downcast_ref::<SendError>() {
                    Some(SendError::IdentityKeyMismatch { .. }) => {
                        DeliveryErrorKind::IdentityKeyMismatch
                    }
                    Some(SendError::Payload(_)) => DeliveryErrorKind::Payload,
                    _ => DeliveryErrorKind::Network,
                };
                let errors = delivery_errors(inner, &recipients, kind, &e.to_string());
                let mut st = inner.lock();
                st.window.update(&message_id, |m| {
                    m.send_state = Some(SendState::Failed);
                    m.delivery_errors = errors;
                });
                st.window.get(&message_id).cloned()
            }
        };

        let Some(message) = settled else { return };
        let failed = message.send_state == Some(SendState::Failed);
        if let Err(e) = inner.store.save_message(&message, true).await {
            warn!(conversation = %inner.id, error = %e, "failed to persist delivery state");
        }
        inner.events.emit(ConversationEvent::DeliverySettled { message_id, failed });
    }
}

/// Topic replies root at the topic; quote replies follow the quoted
/// message's thread (or start one at the quoted message).
fn derive_thread_id(window: &MessageWindow, reply: Option<&Reply>) -> Option<MessageId> {
    match reply {
        None => None,
        Some(Reply::Topic { topic_id }) => Some(*topic_id),
        Some(Reply::Message { message_id }) => Some(
            window
                .get(message_id)
                .and_then(|quoted| quoted.thread_id)
                .unwrap_or(*message_id),
        ),
    }
}

fn delivery_errors(
    inner: &Arc<Inner>,
    recipients: &[AccountId],
    kind: DeliveryErrorKind,
    detail: &str,
) -> Vec<DeliveryError> {
    if recipients.is_empty() {
        // Self-destined: attribute the failure to our own account.
        return vec![DeliveryError {
            recipient: inner.identity.account,
            kind,
            detail: detail.to_string(),
        }];
    }
    recipients
        .iter()
        .map(|recipient| DeliveryError { recipient: *recipient, kind, detail: detail.to_string() })
        .collect()
}

/// Conversation-list preview of a message body.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(80).collect()
}
