// ABOUTME: Mutex-guarded owner of a task's model history, UI conversation, and active deleted range.
// ABOUTME: Every mutation persists both sequences and broadcasts a state snapshot to subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use archscribe_core::{ConversationMessage, DeletedRange, StorageMessage};
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::storage::{MessageStorage, StorageError};

const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid API message index: {index} (len {len})")]
    InvalidApiIndex { index: usize, len: usize },

    #[error("Invalid conversation message index: {index} (len {len})")]
    InvalidConversationIndex { index: usize, len: usize },

    #[error("deleted range {new:?} does not subsume the active range {current:?}")]
    RangeNotMonotonic {
        current: DeletedRange,
        new: DeletedRange,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The aggregate state handed to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageState {
    pub api_messages: Vec<StorageMessage>,
    pub conversation_messages: Vec<ConversationMessage>,
    pub deleted_range: Option<DeletedRange>,
}

pub struct MessageStateHandler {
    task_id: Ulid,
    storage: Arc<dyn MessageStorage>,
    state: Mutex<MessageState>,
    updates: broadcast::Sender<Arc<MessageState>>,
}

impl MessageStateHandler {
    pub fn new(task_id: Ulid, storage: Arc<dyn MessageStorage>) -> Self {
        let (updates, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            task_id,
            storage,
            state: Mutex::new(MessageState::default()),
            updates,
        }
    }

    pub fn task_id(&self) -> Ulid {
        self.task_id
    }

    /// Receive a snapshot after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MessageState>> {
        self.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, MessageState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a mutation under the lock, then persist and notify before releasing it.
    ///
    /// Persistence is blocking and happens while the guard is held, so the
    /// files on disk always match the state the lock last published. The
    /// guard never crosses an await; a tokio worker calling in stalls for at
    /// most the two JSON writes of a single mutation.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut MessageState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut state = self.lock();
        let result = f(&mut state)?;
        self.storage
            .save_api_messages(self.task_id, &state.api_messages)?;
        self.storage
            .save_conversation_messages(self.task_id, &state.conversation_messages)?;
        // no receivers is fine
        let _ = self.updates.send(Arc::new(state.clone()));
        Ok(result)
    }

    pub fn snapshot(&self) -> MessageState {
        self.lock().clone()
    }

    pub fn api_messages(&self) -> Vec<StorageMessage> {
        self.lock().api_messages.clone()
    }

    pub fn conversation_messages(&self) -> Vec<ConversationMessage> {
        self.lock().conversation_messages.clone()
    }

    pub fn deleted_range(&self) -> Option<DeletedRange> {
        self.lock().deleted_range
    }

    /// Append to the model-facing history. Returns the new message's index.
    pub fn add_api_message(&self, message: StorageMessage) -> Result<usize, StoreError> {
        self.mutate(|state| {
            state.api_messages.push(message);
            Ok(state.api_messages.len() - 1)
        })
    }

    /// Append a UI entry, stamping it with the current last model-history
    /// index and the active deleted range.
    pub fn add_conversation_message(
        &self,
        mut message: ConversationMessage,
    ) -> Result<usize, StoreError> {
        self.mutate(|state| {
            message.conversation_history_index = state.api_messages.len().checked_sub(1);
            message.conversation_history_deleted_range = state.deleted_range;
            state.conversation_messages.push(message);
            Ok(state.conversation_messages.len() - 1)
        })
    }

    pub fn update_api_message(
        &self,
        index: usize,
        update: impl FnOnce(&mut StorageMessage),
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            let len = state.api_messages.len();
            let message = state
                .api_messages
                .get_mut(index)
                .ok_or(StoreError::InvalidApiIndex { index, len })?;
            update(message);
            Ok(())
        })
    }

    pub fn update_conversation_message(
        &self,
        index: usize,
        update: impl FnOnce(&mut ConversationMessage),
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            let len = state.conversation_messages.len();
            let message = state
                .conversation_messages
                .get_mut(index)
                .ok_or(StoreError::InvalidConversationIndex { index, len })?;
            update(message);
            Ok(())
        })
    }

    pub fn set_api_messages(&self, messages: Vec<StorageMessage>) -> Result<(), StoreError> {
        self.mutate(|state| {
            state.api_messages = messages;
            Ok(())
        })
    }

    pub fn set_conversation_messages(
        &self,
        messages: Vec<ConversationMessage>,
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            state.conversation_messages = messages;
            Ok(())
        })
    }

    /// Activate a new deleted range. A range that would un-hide messages
    /// hidden by the active one is refused.
    pub fn set_deleted_range(&self, range: DeletedRange) -> Result<(), StoreError> {
        self.mutate(|state| {
            if let Some(current) = state.deleted_range {
                if !range.subsumes(&current) {
                    return Err(StoreError::RangeNotMonotonic {
                        current,
                        new: range,
                    });
                }
            }
            state.deleted_range = Some(range);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|state| {
            *state = MessageState::default();
            Ok(())
        })
    }

    /// Replace in-memory state with what storage holds. The deleted range is
    /// restored from the most recent UI entry that recorded one.
    pub fn load_from_disk(&self) -> Result<(), StoreError> {
        let api_messages = self.storage.load_api_messages(self.task_id)?;
        let conversation_messages = self.storage.load_conversation_messages(self.task_id)?;
        let deleted_range = conversation_messages
            .iter()
            .rev()
            .find_map(|m| m.conversation_history_deleted_range);

        let mut state = self.lock();
        *state = MessageState {
            api_messages,
            conversation_messages,
            deleted_range,
        };
        tracing::debug!(
            task_id = %self.task_id,
            api = state.api_messages.len(),
            conversation = state.conversation_messages.len(),
            "loaded task messages from storage"
        );
        let _ = self.updates.send(Arc::new(state.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use archscribe_core::TokenUsage;
    use tempfile::TempDir;

    fn handler() -> MessageStateHandler {
        MessageStateHandler::new(Ulid::new(), Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn conversation_entries_are_stamped() {
        let h = handler();
        let first = h
            .add_conversation_message(ConversationMessage::task("go"))
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(h.conversation_messages()[0].conversation_history_index, None);

        h.add_api_message(StorageMessage::user_text("go")).unwrap();
        h.add_api_message(StorageMessage::assistant_text("ok")).unwrap();
        h.set_deleted_range(DeletedRange::new(2, 3)).unwrap();
        h.add_conversation_message(ConversationMessage::api_request(TokenUsage::default()))
            .unwrap();

        let entry = &h.conversation_messages()[1];
        assert_eq!(entry.conversation_history_index, Some(1));
        assert_eq!(
            entry.conversation_history_deleted_range,
            Some(DeletedRange::new(2, 3))
        );
    }

    #[test]
    fn update_out_of_range_fails() {
        let h = handler();
        h.add_api_message(StorageMessage::user_text("a")).unwrap();
        let err = h
            .update_api_message(5, |m| *m = StorageMessage::user_text("b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidApiIndex { index: 5, len: 1 }));
        assert!(err.to_string().starts_with("Invalid API message index"));
    }

    #[test]
    fn update_replaces_content() {
        let h = handler();
        h.add_api_message(StorageMessage::user_text("a")).unwrap();
        h.update_api_message(0, |m| *m = StorageMessage::user_text("b"))
            .unwrap();
        assert_eq!(h.api_messages()[0].render(), "b");
    }

    #[test]
    fn deleted_range_must_grow() {
        let h = handler();
        h.set_deleted_range(DeletedRange::new(2, 9)).unwrap();
        let err = h.set_deleted_range(DeletedRange::new(2, 5)).unwrap_err();
        assert!(matches!(err, StoreError::RangeNotMonotonic { .. }));
        h.set_deleted_range(DeletedRange::new(2, 12)).unwrap();
        assert_eq!(h.deleted_range(), Some(DeletedRange::new(2, 12)));
    }

    #[test]
    fn clear_resets_everything() {
        let h = handler();
        h.add_api_message(StorageMessage::user_text("a")).unwrap();
        h.set_deleted_range(DeletedRange::new(2, 3)).unwrap();
        h.clear().unwrap();
        assert_eq!(h.snapshot(), MessageState::default());
    }

    #[tokio::test]
    async fn subscribers_see_each_mutation() {
        let h = handler();
        let mut rx = h.subscribe();
        h.add_api_message(StorageMessage::user_text("a")).unwrap();
        h.add_api_message(StorageMessage::assistant_text("b")).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.api_messages.len(), 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.api_messages.len(), 2);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        let task = Ulid::new();
        let h = Arc::new(MessageStateHandler::new(task, storage.clone()));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        h.add_api_message(StorageMessage::user_text(format!("{t}-{i}")))
                            .unwrap();
                        h.add_conversation_message(ConversationMessage::text("x"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let state = h.snapshot();
        assert_eq!(state.api_messages.len(), 80);
        assert_eq!(state.conversation_messages.len(), 80);
        // every stamp points at a message that existed when the entry was added
        for entry in &state.conversation_messages {
            assert!(entry.conversation_history_index.unwrap() < 80);
        }

        assert_eq!(storage.load_api_messages(task).unwrap(), state.api_messages);
        assert_eq!(
            storage.load_conversation_messages(task).unwrap(),
            state.conversation_messages
        );
    }

    #[test]
    fn load_from_disk_restores_state_and_range() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn MessageStorage> = Arc::new(FileStorage::new(dir.path()));
        let task = Ulid::new();

        let writer = MessageStateHandler::new(task, Arc::clone(&storage));
        writer.add_api_message(StorageMessage::user_text("go")).unwrap();
        writer
            .add_api_message(StorageMessage::assistant_text("ok"))
            .unwrap();
        writer.set_deleted_range(DeletedRange::new(2, 4)).unwrap();
        writer
            .add_conversation_message(ConversationMessage::text("after"))
            .unwrap();

        let reader = MessageStateHandler::new(task, storage);
        reader.load_from_disk().unwrap();
        assert_eq!(reader.api_messages().len(), 2);
        assert_eq!(reader.conversation_messages().len(), 1);
        assert_eq!(reader.deleted_range(), Some(DeletedRange::new(2, 4)));
    }
}
