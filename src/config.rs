use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("tasklight")
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".into()
}

fn default_api_base() -> String {
    "https://api.anthropic.com".into()
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TasklightConfig {
    pub data_directory: PathBuf,
    /// Explicit identity; when unset the login name is used.
    pub user: Option<String>,
    pub model: String,
    pub api_base: String,
    pub max_tokens: u32,
    /// Pasted text beyond this many characters is not sent to the service.
    pub max_input_chars: usize,
    pub debug_logging: bool,
}

impl Default for TasklightConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_dir(),
            user: None,
            model: default_model(),
            api_base: default_api_base(),
            max_tokens: 1024,
            max_input_chars: 4000,
            debug_logging: false,
        }
    }
}

impl TasklightConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tasklight")
            .join("config.json")
    }

    /// Load from `path`, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn user_directory(&self, user: &str) -> PathBuf {
        self.data_directory.join(user)
    }

    pub fn tasks_path(&self, user: &str) -> PathBuf {
        self.user_directory(user).join("tasks.json")
    }
}
