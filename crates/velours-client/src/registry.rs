//! Fetch-or-create registry of conversation aggregates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use velours_shared::{ConversationId, Destination};
use velours_store::ConversationStore;

use crate::config::{LocalIdentity, SyncPolicy};
use crate::conversation::Conversation;
use crate::transport::TransportHandle;

pub struct Conversations {
    identity: LocalIdentity,
    policy: SyncPolicy,
    store: Arc<dyn ConversationStore>,
    transport: TransportHandle,
    map: Mutex<HashMap<ConversationId, Conversation>>,
}

impl Conversations {
    pub fn new(
        identity: LocalIdentity,
        policy: SyncPolicy,
        store: Arc<dyn ConversationStore>,
        transport: TransportHandle,
    ) -> Self {
        Self {
            identity,
            policy,
            store,
            transport,
            map: Mutex::new(HashMap::new()),
        }
    }

    /// The shared transport availability handle.
    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Fetch the aggregate for `id`, creating (and rehydrating from
    /// storage) on first access.
    pub async fn get_or_create(
        &self,
        id: ConversationId,
        destination: Destination,
    ) -> Conversation {
        if let Some(existing) = self.map.lock().expect("registry lock poisoned").get(&id) {
            return existing.clone();
        }

        let record = match self.store.conversation(&id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(conversation = %id, error = %e, "failed to load conversation snapshot");
                None
            }
        };
        let conversation = match record {
            Some(record) => Conversation::from_record(
                record,
                self.identity,
                self.policy.clone(),
                self.store.clone(),
                self.transport.clone(),
            ),
            None => Conversation::new(
                id,
                destination,
                self.identity,
                self.policy.clone(),
                self.store.clone(),
                self.transport.clone(),
            ),
        };

        // Another caller may have won the race while we were loading.
        self.map
            .lock()
            .expect("registry lock poisoned")
            .entry(id)
            .or_insert(conversation)
            .clone()
    }

    /// Look up an already-instantiated aggregate.
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.map.lock().expect("registry lock poisoned").get(id).cloned()
    }

    /// Destroy a conversation: reset its state and drop it from the
    /// registry.  Returns whether it existed.
    pub async fn wipe(&self, id: &ConversationId) -> bool {
        let removed = self.map.lock().expect("registry lock poisoned").remove(id);
        match removed {
            Some(conversation) => {
                conversation.wipe().await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
