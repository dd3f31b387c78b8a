use serde_json::Value;
use uuid::Uuid;

use super::ingest::create_in_sequence;
use super::{DisplayOrder, ExtractRequest, Extraction, Extractor, parse_array};
use crate::core::task::{NewTask, Task};
use crate::store::{TaskCollection, TaskStore};

/// Marks a task as derived from another in the list.
pub const SUBTASK_PREFIX: &str = "↳ ";

pub const MAX_SUBTASKS: usize = 5;

const BREAKDOWN_INSTRUCTION: &str = "You break a to-do item into smaller steps. Return ONLY a JSON array of 3 to 5 strings, no explanation.\n\n\
     Each string is one concrete, actionable subtask phrased as a short imperative, in the order they should be done.";

/// Outcome of a breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenDown {
    pub extraction: Extraction<String>,
    pub created: Vec<Uuid>,
}

/// Split `task` into subtasks via the extraction service. Each subtask is a
/// new task carrying the source's priority and due date; the source itself
/// is left alone. Any service failure creates nothing.
pub async fn break_down<C, E>(
    store: &TaskStore<C>,
    extractor: &E,
    task: &Task,
    order: DisplayOrder,
) -> BrokenDown
where
    C: TaskCollection,
    E: Extractor,
{
    if !store.is_ready() {
        log::debug!("No session, skipping breakdown");
        return BrokenDown {
            extraction: Extraction::Fallback("not signed in".to_string()),
            created: Vec::new(),
        };
    }

    let extraction = extract_subtasks(extractor, &task.text).await;
    let created = match &extraction {
        Extraction::Extracted(steps) => {
            log::info!("Breaking \"{}\" into {} subtasks", task.text, steps.len());
            let subtasks = steps
                .iter()
                .map(|step| {
                    NewTask::new(format!("{}{}", SUBTASK_PREFIX, step))
                        .with_priority(task.priority)
                        .with_due_date(task.due_date)
                })
                .collect();
            create_in_sequence(store, order.creation_sequence(subtasks)).await
        }
        Extraction::Fallback(reason) => {
            log::warn!("Breakdown of {} failed: {}", task.id, reason);
            Vec::new()
        }
    };

    BrokenDown {
        extraction,
        created,
    }
}

/// Query the service for subtask strings. Non-string and blank entries are
/// dropped and at most [`MAX_SUBTASKS`] are kept.
pub async fn extract_subtasks<E: Extractor>(extractor: &E, text: &str) -> Extraction<String> {
    let request = ExtractRequest {
        instruction: BREAKDOWN_INSTRUCTION,
        prompt: text,
        now: None,
    };

    let items = match extractor.extract(request).await.and_then(|reply| parse_array(&reply)) {
        Ok(items) => items,
        Err(e) => return Extraction::Fallback(e.to_string()),
    };

    let steps: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_SUBTASKS)
        .map(str::to_string)
        .collect();

    // The instruction asks for 3 to 5, but a short answer is still a usable
    // breakdown; only an empty one counts as a failure.
    if steps.is_empty() {
        return Extraction::Fallback(format!("no usable subtasks in {} items", items.len()));
    }
    Extraction::Extracted(steps)
}
