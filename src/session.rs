use crate::config::TasklightConfig;
use crate::store::MemoryCollection;

/// A signed-in user. Only tasks in this user's collection are ever touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: String,
}

impl Session {
    /// A session for `user`, if the name is usable as a collection key.
    pub fn new(user: &str) -> Option<Self> {
        let user = user.trim();
        let valid = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !user.starts_with('.');
        if !valid {
            log::warn!("Rejecting user identity {:?}", user);
            return None;
        }
        Some(Self {
            user: user.to_string(),
        })
    }

    /// Identity from the config, else the login name.
    pub fn resolve(config: &TasklightConfig) -> Option<Self> {
        let user = config
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())?;
        Self::new(&user)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Open this user's task collection.
    pub fn open_collection(&self, config: &TasklightConfig) -> MemoryCollection {
        MemoryCollection::open(&config.tasks_path(&self.user))
    }
}
