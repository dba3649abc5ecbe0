use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chat_core::llm::{Message, Role};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Chat";
const TITLE_MAX_GRAPHEMES: usize = 40;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for Message {
    fn from(m: &StoredMessage) -> Self {
        Message::new(m.role, m.content.clone())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub preferred_model: Option<String>,
}

/// File-backed chat history: `chats.json` holds the chat list, each chat's
/// messages live in `messages/<id>.jsonl`.
#[derive(Clone, Debug)]
pub struct ChatStore {
    root: PathBuf,
}

impl ChatStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let messages = root.join("messages");
        fs::create_dir_all(&messages)
            .with_context(|| format!("create store dir: {}", messages.display()))?;
        Ok(Self { root })
    }

    pub fn open_default() -> Result<Self> {
        let base = BaseDirs::new().context("no home directory")?;
        Self::open(base.data_dir().join("aichat"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("chats.json")
    }

    fn messages_path(&self, id: Uuid) -> PathBuf {
        self.root.join("messages").join(format!("{}.jsonl", id))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    fn read_index(&self) -> Result<Vec<Chat>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&path).with_context(|| format!("read chat index: {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| "parse chat index json")
    }

    fn write_index(&self, chats: &[Chat]) -> Result<()> {
        let data = serde_json::to_vec_pretty(chats)?;
        write_atomic(&self.index_path(), &data)
    }

    /// Most recently updated first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut chats = self.read_index()?;
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Chat> {
        self.read_index()?
            .into_iter()
            .find(|c| c.id == id)
            .with_context(|| format!("chat {} not found", id))
    }

    /// Looks a chat up by full id or unambiguous id prefix.
    pub fn resolve(&self, key: &str) -> Result<Chat> {
        if let Ok(id) = Uuid::parse_str(key) {
            return self.get_chat(id);
        }
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            bail!("empty chat id");
        }
        let mut hits: Vec<Chat> = self
            .read_index()?
            .into_iter()
            .filter(|c| c.id.to_string().starts_with(&key))
            .collect();
        match hits.len() {
            0 => bail!("chat {} not found", key),
            1 => Ok(hits.remove(0)),
            n => bail!("chat id prefix {} is ambiguous ({} matches)", key, n),
        }
    }

    pub fn create_chat(&self, title: Option<&str>) -> Result<Chat> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut chats = self.read_index()?;
        chats.push(chat.clone());
        self.write_index(&chats)?;
        Ok(chat)
    }

    pub fn rename_chat(&self, id: Uuid, title: &str) -> Result<Chat> {
        let title = title.trim();
        if title.is_empty() {
            bail!("chat title must not be empty");
        }
        self.update_chat(id, |c| c.title = title.to_string())
    }

    pub fn delete_chat(&self, id: Uuid) -> Result<()> {
        let mut chats = self.read_index()?;
        let before = chats.len();
        chats.retain(|c| c.id != id);
        if chats.len() == before {
            bail!("chat {} not found", id);
        }
        self.write_index(&chats)?;
        let path = self.messages_path(id);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Oldest first.
    pub fn load_messages(&self, chat_id: Uuid) -> Result<Vec<StoredMessage>> {
        self.get_chat(chat_id)?;
        let path = self.messages_path(chat_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read messages file: {}", path.display()))?;
        let mut out = Vec::new();
        for (n, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(line) {
                Ok(m) => out.push(m),
                Err(e) => warn!(target: "aichat::store", "skip bad line {} in {}: {}", n + 1, path.display(), e),
            }
        }
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    /// Appends a message and bumps the chat's `updated_at`. The first user
    /// message of a chat still carrying the default title becomes its title.
    pub fn add_message(
        &self,
        chat_id: Uuid,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<StoredMessage> {
        if role == Role::System {
            bail!("system messages are not stored");
        }
        let chat = self.get_chat(chat_id)?;
        let first_user = role == Role::User
            && !self.load_messages(chat_id)?.iter().any(|m| m.role == Role::User);

        let msg = StoredMessage {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.to_string(),
            model: model.map(str::to_string),
            created_at: Utc::now(),
        };
        let path = self.messages_path(chat_id);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open messages file: {}", path.display()))?;
        let line = serde_json::to_string(&msg)?;
        f.write_all(line.as_bytes())?;
        f.write_all(b"\n")?;
        f.flush()?;

        let retitle = first_user && chat.title == DEFAULT_TITLE;
        self.update_chat(chat_id, |c| {
            c.updated_at = msg.created_at;
            if retitle {
                if let Some(t) = title_from(content) {
                    c.title = t;
                }
            }
        })?;
        Ok(msg)
    }

    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(Settings::default());
        }
        let data = fs::read(&path).with_context(|| format!("read settings: {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| "parse settings json")
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let data = serde_json::to_vec_pretty(settings)?;
        write_atomic(&self.settings_path(), &data)
    }

    fn update_chat(&self, id: Uuid, f: impl FnOnce(&mut Chat)) -> Result<Chat> {
        let mut chats = self.read_index()?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == id) else {
            bail!("chat {} not found", id);
        };
        f(chat);
        let updated = chat.clone();
        self.write_index(&chats)?;
        Ok(updated)
    }
}

fn title_from(content: &str) -> Option<String> {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return None;
    }
    Some(flat.graphemes(true).take(TITLE_MAX_GRAPHEMES).collect())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("json.tmp");
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("create tmp: {}", tmp.display()))?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("persist to {}", path.display()))?;
    Ok(())
}
