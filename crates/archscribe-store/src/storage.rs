// ABOUTME: Persists each task's two message sequences as JSON files under a home directory.
// ABOUTME: Writes go through a temp file and rename so a crash never leaves a half-written file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::collections::HashMap;

use archscribe_core::{ConversationMessage, StorageMessage};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use ulid::Ulid;

pub const API_MESSAGES_FILE: &str = "api-messages.json";
pub const CONVERSATION_MESSAGES_FILE: &str = "conversation-messages.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a task's message sequences live between runs.
pub trait MessageStorage: Send + Sync {
    fn save_api_messages(&self, task_id: Ulid, messages: &[StorageMessage])
    -> Result<(), StorageError>;

    fn save_conversation_messages(
        &self,
        task_id: Ulid,
        messages: &[ConversationMessage],
    ) -> Result<(), StorageError>;

    /// Missing data loads as an empty sequence.
    fn load_api_messages(&self, task_id: Ulid) -> Result<Vec<StorageMessage>, StorageError>;

    fn load_conversation_messages(
        &self,
        task_id: Ulid,
    ) -> Result<Vec<ConversationMessage>, StorageError>;

    fn exists(&self, task_id: Ulid) -> bool;

    /// Remove everything stored for a task. Deleting an unknown task is not an error.
    fn delete(&self, task_id: Ulid) -> Result<(), StorageError>;
}

/// JSON files at `{home}/tasks/{task_id}/`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    home: PathBuf,
}

impl FileStorage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn task_dir(&self, task_id: Ulid) -> PathBuf {
        self.home.join("tasks").join(task_id.to_string())
    }

    /// Ids of every task with a directory under `tasks/`, oldest first.
    pub fn list_tasks(&self) -> Result<Vec<Ulid>, StorageError> {
        let dir = self.home.join("tasks");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<Ulid> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn write_json<T: Serialize + ?Sized>(
        &self,
        task_id: Ulid,
        file_name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir)?;

        let tmp_path = dir.join(format!("{file_name}.tmp"));
        let final_path = dir.join(file_name);

        let json = serde_json::to_string_pretty(value)?;
        let mut file = File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        task_id: Ulid,
        file_name: &str,
    ) -> Result<Vec<T>, StorageError> {
        let path = self.task_dir(task_id).join(file_name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl MessageStorage for FileStorage {
    fn save_api_messages(
        &self,
        task_id: Ulid,
        messages: &[StorageMessage],
    ) -> Result<(), StorageError> {
        self.write_json(task_id, API_MESSAGES_FILE, messages)
    }

    fn save_conversation_messages(
        &self,
        task_id: Ulid,
        messages: &[ConversationMessage],
    ) -> Result<(), StorageError> {
        self.write_json(task_id, CONVERSATION_MESSAGES_FILE, messages)
    }

    fn load_api_messages(&self, task_id: Ulid) -> Result<Vec<StorageMessage>, StorageError> {
        self.read_json(task_id, API_MESSAGES_FILE)
    }

    fn load_conversation_messages(
        &self,
        task_id: Ulid,
    ) -> Result<Vec<ConversationMessage>, StorageError> {
        self.read_json(task_id, CONVERSATION_MESSAGES_FILE)
    }

    fn exists(&self, task_id: Ulid) -> bool {
        self.task_dir(task_id).join(API_MESSAGES_FILE).exists()
    }

    fn delete(&self, task_id: Ulid) -> Result<(), StorageError> {
        let dir = self.task_dir(task_id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

/// In-process storage, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tasks: Mutex<HashMap<Ulid, (Vec<StorageMessage>, Vec<ConversationMessage>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tasks<R>(
        &self,
        f: impl FnOnce(&mut HashMap<Ulid, (Vec<StorageMessage>, Vec<ConversationMessage>)>) -> R,
    ) -> R {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut tasks)
    }
}

impl MessageStorage for MemoryStorage {
    fn save_api_messages(
        &self,
        task_id: Ulid,
        messages: &[StorageMessage],
    ) -> Result<(), StorageError> {
        self.with_tasks(|tasks| tasks.entry(task_id).or_default().0 = messages.to_vec());
        Ok(())
    }

    fn save_conversation_messages(
        &self,
        task_id: Ulid,
        messages: &[ConversationMessage],
    ) -> Result<(), StorageError> {
        self.with_tasks(|tasks| tasks.entry(task_id).or_default().1 = messages.to_vec());
        Ok(())
    }

    fn load_api_messages(&self, task_id: Ulid) -> Result<Vec<StorageMessage>, StorageError> {
        Ok(self.with_tasks(|tasks| {
            tasks
                .get(&task_id)
                .map(|(api, _)| api.clone())
                .unwrap_or_default()
        }))
    }

    fn load_conversation_messages(
        &self,
        task_id: Ulid,
    ) -> Result<Vec<ConversationMessage>, StorageError> {
        Ok(self.with_tasks(|tasks| {
            tasks
                .get(&task_id)
                .map(|(_, conversation)| conversation.clone())
                .unwrap_or_default()
        }))
    }

    fn exists(&self, task_id: Ulid) -> bool {
        self.with_tasks(|tasks| tasks.contains_key(&task_id))
    }

    fn delete(&self, task_id: Ulid) -> Result<(), StorageError> {
        self.with_tasks(|tasks| tasks.remove(&task_id));
        Ok(())
    }
}
