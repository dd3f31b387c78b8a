use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use super::{StoreError, Subscription, TaskCollection};
use crate::core::task::{NewTask, Task, TaskPatch};

/// A task collection held in memory and shared by every clone of the handle,
/// optionally mirrored to a JSON file after each change.
#[derive(Clone, Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<Inner>>,
    /// Held for a whole commit so file writes land in commit order.
    writer: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct Inner {
    /// Newest first.
    tasks: Vec<Task>,
    subscribers: Vec<UnboundedSender<Vec<Task>>>,
    path: Option<PathBuf>,
    last_created: Option<DateTime<Utc>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a collection persisted at `path`. A missing file starts empty.
    /// Records that cannot be read are skipped after the file is copied to
    /// `<path>.bak`; if that copy fails the collection stays in memory only,
    /// so the original file is never overwritten.
    pub fn open(path: &Path) -> Self {
        let Loaded { mut tasks, writable } = load_tasks(path);
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let last_created = tasks.first().map(|t| t.created_at);
        log::info!("Loaded {} tasks from {}", tasks.len(), path.display());

        Self {
            inner: Arc::new(Mutex::new(Inner {
                tasks,
                subscribers: Vec::new(),
                path: writable.then(|| path.to_path_buf()),
                last_created,
            })),
            writer: Arc::default(),
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.lock().map(|inner| inner.tasks.clone()).unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|inner| inner.subscribers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("task collection lock poisoned".to_string()))
    }

    /// Apply `change` to a copy of the tasks, persist it, then publish it.
    /// The file is written off the async thread with the state lock released.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut Inner, &mut Vec<Task>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;

        let (tasks, out, path) = {
            let mut inner = self.lock()?;
            let mut tasks = inner.tasks.clone();
            let out = change(&mut *inner, &mut tasks)?;
            (tasks, out, inner.path.clone())
        };

        if let Some(path) = path {
            let to_save = tasks.clone();
            tokio::task::spawn_blocking(move || save_tasks(&path, &to_save))
                .await
                .map_err(|e| StoreError::Unavailable(format!("persist task failed: {}", e)))??;
        }

        let mut inner = self.lock()?;
        inner.tasks = tasks;
        inner.publish();
        Ok(out)
    }
}

impl Inner {
    fn publish(&mut self) {
        let snapshot = self.tasks.clone();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    /// Creation timestamps are strictly increasing so ordering by `createdAt`
    /// reproduces creation order even for back-to-back creates.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_created = Some(now);
        now
    }
}

impl TaskCollection for MemoryCollection {
    async fn create(&self, new: NewTask) -> Result<Uuid, StoreError> {
        self.commit(|inner, tasks| {
            let id = Uuid::new_v4();
            let task = Task::from_new(new, id, inner.next_created_at());
            log::debug!("Created task {}: {}", id, task.text);
            tasks.insert(0, task);
            Ok(id)
        })
        .await
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<(), StoreError> {
        self.commit(|_, tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(StoreError::NotFound(id))?;
            task.apply(&patch);
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.commit(|_, tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            if tasks.len() == before {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.lock() {
            Ok(mut inner) => {
                if tx.send(inner.tasks.clone()).is_ok() {
                    inner.subscribers.push(tx);
                }
            }
            Err(e) => log::error!("Cannot subscribe: {}", e),
        }
        Subscription::new(rx)
    }
}

pub struct Loaded {
    pub tasks: Vec<Task>,
    /// False when unreadable content could not be backed up first.
    pub writable: bool,
}

pub fn load_tasks(path: &Path) -> Loaded {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Loaded {
                tasks: Vec::new(),
                writable: true,
            };
        }
        Err(e) => {
            log::error!("Failed to read {}: {}", path.display(), e);
            return Loaded {
                tasks: Vec::new(),
                writable: back_up(path),
            };
        }
    };

    let records: Vec<Value> = match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            log::error!("Failed to parse {}: {}", path.display(), e);
            return Loaded {
                tasks: Vec::new(),
                writable: back_up(path),
            };
        }
    };

    let total = records.len();
    let tasks: Vec<Task> = records
        .into_iter()
        .filter_map(|record| {
            serde_json::from_value(record)
                .map_err(|e| log::warn!("Skipping unreadable task in {}: {}", path.display(), e))
                .ok()
        })
        .collect();

    let writable = if tasks.len() < total {
        log::error!("Skipped {} of {} tasks in {}", total - tasks.len(), total, path.display());
        back_up(path)
    } else {
        true
    };
    Loaded { tasks, writable }
}

fn back_up(path: &Path) -> bool {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    let backup = PathBuf::from(backup);
    match std::fs::copy(path, &backup) {
        Ok(_) => {
            log::warn!("Copied {} to {}", path.display(), backup.display());
            true
        }
        Err(e) => {
            log::error!("Cannot back up {}, keeping changes in memory: {}", path.display(), e);
            false
        }
    }
}

pub fn save_tasks(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(tasks)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::Priority;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tasklight-test-{}", Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn back_to_back_creates_keep_order() {
        let c = MemoryCollection::new();
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(c.create(NewTask::new(format!("Task {}", i))).await.unwrap());
        }
        let snapshot = c.snapshot();
        ids.reverse();
        assert_eq!(snapshot.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
        assert!(snapshot.windows(2).all(|w| w[0].created_at > w[1].created_at));
    }

    #[tokio::test]
    async fn missing_ids_are_reported() {
        let c = MemoryCollection::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            c.update(id, TaskPatch::completed(true)).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
        assert!(matches!(c.delete(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let path = temp_path("tasks.json");
        let c = MemoryCollection::open(&path);
        let older = c.create(NewTask::new("Older")).await.unwrap();
        let newer = c
            .create(NewTask::new("Newer").with_priority(Priority::High))
            .await
            .unwrap();
        c.update(older, TaskPatch::completed(true)).await.unwrap();

        let reopened = MemoryCollection::open(&path);
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, newer);
        assert_eq!(snapshot[0].priority, Priority::High);
        assert_eq!(snapshot[1].id, older);
        assert!(snapshot[1].completed);

        // New tasks still sort after the reloaded ones.
        let newest = reopened.create(NewTask::new("Newest")).await.unwrap();
        assert_eq!(reopened.snapshot()[0].id, newest);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    const GOOD: &str = r#"{"id":"550e8400-e29b-41d4-a716-446655440000","text":"Good task","priority":"high","createdAt":"2026-02-23T14:00:00Z"}"#;

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn odd_priority_does_not_lose_the_file() {
        let path = temp_path("tasks.json");
        let numeric = r#"{"id":"550e8400-e29b-41d4-a716-446655440001","text":"Numeric","priority":2,"createdAt":"2026-02-22T14:00:00Z"}"#;
        write_file(&path, &format!("[{},{}]", GOOD, numeric));

        let c = MemoryCollection::open(&path);
        assert_eq!(c.snapshot().len(), 2);
        c.create(NewTask::new("New one")).await.unwrap();

        let texts: Vec<String> = load_tasks(&path).tasks.into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["New one", "Good task", "Numeric"]);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn unreadable_records_are_backed_up_before_writing() {
        let path = temp_path("tasks.json");
        let broken = r#"{"text":"No id","createdAt":"2026-02-22T14:00:00Z"}"#;
        let original = format!("[{},{}]", GOOD, broken);
        write_file(&path, &original);

        let c = MemoryCollection::open(&path);
        assert_eq!(c.snapshot().len(), 1);
        c.create(NewTask::new("New one")).await.unwrap();

        let backup = path.with_file_name("tasks.json.bak");
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), original);
        let texts: Vec<String> = load_tasks(&path).tasks.into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["New one", "Good task"]);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_and_is_kept() {
        let path = temp_path("tasks.json");
        write_file(&path, "not json");

        let c = MemoryCollection::open(&path);
        assert!(c.snapshot().is_empty());
        c.create(NewTask::new("Fresh start")).await.unwrap();

        let backup = path.with_file_name("tasks.json.bak");
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "not json");
        assert_eq!(load_tasks(&path).tasks.len(), 1);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn non_text_file_is_backed_up_before_writing() {
        let path = temp_path("tasks.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let c = MemoryCollection::open(&path);
        assert!(c.snapshot().is_empty());
        c.create(NewTask::new("Fresh start")).await.unwrap();

        let backup = path.with_file_name("tasks.json.bak");
        assert_eq!(std::fs::read(&backup).unwrap(), vec![0xff, 0xfe, 0x00]);
        assert_eq!(load_tasks(&path).tasks.len(), 1);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn failed_backup_keeps_changes_in_memory() {
        let path = temp_path("tasks.json");
        write_file(&path, "not json");
        // A non-empty directory where the backup should go makes the copy fail.
        std::fs::create_dir_all(path.with_file_name("tasks.json.bak").join("blocker")).unwrap();

        let c = MemoryCollection::open(&path);
        c.create(NewTask::new("Only in memory")).await.unwrap();
        assert_eq!(c.snapshot().len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
