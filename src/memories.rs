use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::BmoConfig;

pub const CATEGORY_ORDER: [&str; 5] = [
    "personal_facts",
    "relationships",
    "preferences",
    "goals",
    "uncategorized",
];
const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, thiserror::Error)]
pub enum MemoriesError {
    #[error("wrong PIN")]
    Unauthorized,
    #[error("memories are locked; unlock with a PIN first")]
    Locked,
    #[error("memory API returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pin store error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub memory: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Memory {
    pub fn category(&self) -> &str {
        if self.category.is_empty() {
            UNCATEGORIZED
        } else {
            &self.category
        }
    }
}

#[derive(Deserialize)]
struct MemoryList {
    memories: Vec<Memory>,
}

#[derive(Serialize)]
struct MemoryBody<'a> {
    memory: &'a str,
    category: &'a str,
}

/// Client for the PIN-protected memories API.
#[derive(Clone)]
pub struct MemoriesClient {
    http: reqwest::Client,
    base_url: String,
}

impl MemoriesClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, id: Option<&str>, pin: &str) -> String {
        match id {
            Some(id) => format!(
                "{}/api/memories/{}?pin={}",
                self.base_url,
                urlencoding::encode(id),
                urlencoding::encode(pin)
            ),
            None => format!("{}/api/memories?pin={}", self.base_url, urlencoding::encode(pin)),
        }
    }

    pub async fn list(&self, pin: &str) -> Result<Vec<Memory>, MemoriesError> {
        let resp = check(self.http.get(self.url(None, pin)).send().await?).await?;
        let list: MemoryList = resp.json().await?;
        debug!(count = list.memories.len(), "memories fetched");
        Ok(list.memories)
    }

    pub async fn add(&self, pin: &str, memory: &str, category: &str) -> Result<(), MemoriesError> {
        let body = MemoryBody { memory, category };
        check(self.http.post(self.url(None, pin)).json(&body).send().await?).await?;
        Ok(())
    }

    pub async fn update(
        &self,
        pin: &str,
        id: &str,
        memory: &str,
        category: &str,
    ) -> Result<(), MemoriesError> {
        let body = MemoryBody { memory, category };
        check(self.http.put(self.url(Some(id), pin)).json(&body).send().await?).await?;
        Ok(())
    }

    pub async fn delete(&self, pin: &str, id: &str) -> Result<(), MemoriesError> {
        check(self.http.delete(self.url(Some(id), pin)).send().await?).await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, MemoriesError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MemoriesError::Unauthorized);
    }
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    // The API answers `{"detail": ...}`; the proxy in front of it answers `{"error": ...}`.
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            ["detail", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|e| e.as_str()).map(str::to_string))
        })
        .unwrap_or(text);
    Err(MemoriesError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Locked/unlocked state of the memories view. An accepted PIN is kept on
/// disk until the API rejects it.
#[derive(Debug)]
pub struct PinGate {
    path: PathBuf,
    pin: Option<String>,
}

impl PinGate {
    /// ~/.config/bmo/pin
    pub fn default_path() -> PathBuf {
        BmoConfig::config_dir().join("pin")
    }

    /// Open the gate backed by `path`, unlocked if a PIN was stored there.
    pub fn load(path: &Path) -> Self {
        let pin = std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            path: path.to_path_buf(),
            pin,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.pin.is_some()
    }

    pub fn pin(&self) -> Result<&str, MemoriesError> {
        self.pin.as_deref().ok_or(MemoriesError::Locked)
    }

    /// Try `pin` against the API; on success it is remembered.
    pub async fn unlock(
        &mut self,
        client: &MemoriesClient,
        pin: &str,
    ) -> Result<Vec<Memory>, MemoriesError> {
        let memories = client.list(pin).await?;
        self.store(pin)?;
        info!("memories unlocked");
        Ok(memories)
    }

    fn store(&mut self, pin: &str) -> Result<(), MemoriesError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, pin)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        self.pin = Some(pin.to_string());
        Ok(())
    }

    pub fn lock(&mut self) {
        self.pin = None;
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Pass a result through, re-locking when the API rejected the PIN.
    pub fn guard<T>(&mut self, result: Result<T, MemoriesError>) -> Result<T, MemoriesError> {
        if matches!(result, Err(MemoriesError::Unauthorized)) {
            info!("stored PIN rejected, locking");
            self.lock();
        }
        result
    }
}

/// Group by category: known categories in display order, then any others
/// alphabetically. Empty groups are omitted.
pub fn group_by_category(memories: &[Memory]) -> Vec<(String, Vec<Memory>)> {
    let mut groups: Vec<(String, Vec<Memory>)> = Vec::new();
    for mem in memories {
        match groups.iter_mut().find(|(cat, _)| cat == mem.category()) {
            Some((_, items)) => items.push(mem.clone()),
            None => groups.push((mem.category().to_string(), vec![mem.clone()])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| {
        let rank = |c: &str| CATEGORY_ORDER.iter().position(|o| *o == c).unwrap_or(CATEGORY_ORDER.len());
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
    groups
}

/// Sort by creation time (ISO-8601 strings compare chronologically); items
/// without a timestamp count as oldest.
pub fn sort_memories(items: &mut [Memory], ascending: bool) {
    items.sort_by(|a, b| {
        let ord = a
            .created_at
            .as_deref()
            .unwrap_or("")
            .cmp(b.created_at.as_deref().unwrap_or(""));
        if ascending { ord } else { ord.reverse() }
    });
}

pub fn category_label(category: &str) -> String {
    match category {
        "personal_facts" => "Personal Facts".to_string(),
        "relationships" => "Relationships".to_string(),
        "preferences" => "Preferences".to_string(),
        "goals" => "Goals".to_string(),
        "uncategorized" => "Uncategorized".to_string(),
        other => other.to_string(),
    }
}

pub fn format_memories(memories: &[Memory], ascending: bool) -> String {
    if memories.is_empty() {
        return "No memories yet.\n".to_string();
    }
    let mut text = String::new();
    for (category, mut items) in group_by_category(memories) {
        sort_memories(&mut items, ascending);
        text.push_str(&format!("{} ({})\n", category_label(&category), items.len()));
        for m in items {
            text.push_str(&format!("  [{}] {}\n", m.id, m.memory));
        }
        text.push('\n');
    }
    text
}
