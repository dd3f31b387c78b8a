use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use super::{DisplayOrder, ExtractRequest, Extraction, Extractor, parse_array};
use crate::core::dates::parse_due_date;
use crate::core::task::{NewTask, Priority};
use crate::store::{TaskCollection, TaskStore};

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*•]\s*").unwrap());

const EXTRACT_INSTRUCTION: &str = "You turn pasted notes into a to-do list. Return ONLY a JSON array, no explanation.\n\n\
     Each element is an object with:\n\
     - \"text\": the task as a short imperative phrase\n\
     - \"priority\": \"low\", \"medium\" or \"high\"\n\
     - \"dueDate\": an ISO-8601 date-time if the notes imply one (resolve relative dates against the current time), else null\n\n\
     Keep the order the tasks appear in the notes.";

/// Outcome of an ingestion: how the tasks were derived and what was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub extraction: Extraction<NewTask>,
    pub created: Vec<Uuid>,
}

/// Split pasted text into task texts: one per non-blank line, with a single
/// leading `-`, `*` or `•` bullet removed.
pub fn split_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| BULLET_RE.replace(line, "").trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// Create one default task per line, in input line order.
pub async fn ingest_naive<C: TaskCollection>(store: &TaskStore<C>, raw: &str) -> Vec<Uuid> {
    let tasks = split_lines(raw).into_iter().map(NewTask::new).collect();
    create_in_sequence(store, tasks).await
}

/// Ask the extraction service for structured tasks, falling back to
/// [`ingest_naive`] on the same text if the service fails or answers with
/// something unusable.
pub async fn ingest_assisted<C, E>(
    store: &TaskStore<C>,
    extractor: &E,
    raw: &str,
    now: DateTime<FixedOffset>,
    order: DisplayOrder,
) -> Ingested
where
    C: TaskCollection,
    E: Extractor,
{
    if !store.is_ready() {
        log::debug!("No session, skipping ingestion");
        return Ingested {
            extraction: Extraction::Fallback("not signed in".to_string()),
            created: Vec::new(),
        };
    }

    let extraction = extract_tasks(extractor, raw, now).await;
    let created = match &extraction {
        Extraction::Extracted(tasks) => {
            log::info!("Service extracted {} tasks", tasks.len());
            create_in_sequence(store, order.creation_sequence(tasks.clone())).await
        }
        Extraction::Fallback(reason) => {
            log::warn!("Assisted ingestion fell back to line split: {}", reason);
            ingest_naive(store, raw).await
        }
    };

    Ingested {
        extraction,
        created,
    }
}

/// Query the service and validate its answer into creatable tasks.
pub async fn extract_tasks<E: Extractor>(
    extractor: &E,
    raw: &str,
    now: DateTime<FixedOffset>,
) -> Extraction<NewTask> {
    if raw.trim().is_empty() {
        return Extraction::Fallback("empty input".to_string());
    }

    let now_str = now.to_rfc3339();
    let request = ExtractRequest {
        instruction: EXTRACT_INSTRUCTION,
        prompt: raw,
        now: Some(&now_str),
    };

    let items = match extractor.extract(request).await.and_then(|text| parse_array(&text)) {
        Ok(items) => items,
        Err(e) => return Extraction::Fallback(e.to_string()),
    };

    let tasks: Vec<NewTask> = items
        .iter()
        .filter_map(|item| task_from_value(item, now.offset()))
        .collect();

    if tasks.is_empty() {
        return Extraction::Fallback(format!("no usable tasks in {} items", items.len()));
    }
    Extraction::Extracted(tasks)
}

/// Unknown priorities read as medium and unparseable due dates as none;
/// items without text are dropped.
fn task_from_value(item: &Value, offset: &FixedOffset) -> Option<NewTask> {
    let text = item.get("text")?.as_str()?.trim();
    if text.is_empty() {
        log::debug!("Dropping extracted item without text");
        return None;
    }
    let priority = item
        .get("priority")
        .and_then(Value::as_str)
        .and_then(Priority::parse)
        .unwrap_or_default();
    let due_date = item
        .get("dueDate")
        .or_else(|| item.get("due_date"))
        .and_then(Value::as_str)
        .and_then(|s| parse_due_date(s, offset));

    Some(
        NewTask::new(text)
            .with_priority(priority)
            .with_due_date(due_date),
    )
}

/// Each create is awaited before the next so store-assigned creation order
/// matches `tasks` order.
pub(crate) async fn create_in_sequence<C: TaskCollection>(
    store: &TaskStore<C>,
    tasks: Vec<NewTask>,
) -> Vec<Uuid> {
    let mut created = Vec::with_capacity(tasks.len());
    for task in tasks {
        if let Some(id) = store.create(task).await {
            created.push(id);
        }
    }
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::ExtractError;
    use crate::assist::tests::ScriptedExtractor;
    use crate::store::MemoryCollection;
    use crate::store::tests::FlakyCollection;
    use chrono::{TimeZone, Utc};

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 12, 20, 10, 0, 0)
            .unwrap()
    }

    fn texts(collection: &MemoryCollection) -> Vec<String> {
        collection.snapshot().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn split_strips_bullets_and_blank_lines() {
        assert_eq!(
            split_lines("- Buy milk\n\n* Call mom\n• Pay rent"),
            vec!["Buy milk", "Call mom", "Pay rent"]
        );
        assert_eq!(split_lines("  -   indented\r\n--double"), vec!["indented", "-double"]);
        assert_eq!(split_lines("-\n  \n*"), Vec::<String>::new());
        assert_eq!(split_lines("no-bullet-here"), vec!["no-bullet-here"]);
    }

    #[tokio::test]
    async fn naive_ingestion_creates_default_tasks_in_line_order() {
        let collection = MemoryCollection::new();
        let store = TaskStore::new(collection.clone());
        let created = ingest_naive(&store, "- Buy milk\n\n* Call mom\n• Pay rent").await;
        assert_eq!(created.len(), 3);

        let snapshot = collection.snapshot();
        // Newest first, so the last line is on top.
        assert_eq!(texts(&collection), vec!["Pay rent", "Call mom", "Buy milk"]);
        for task in &snapshot {
            assert_eq!(task.priority, Priority::Medium);
            assert_eq!(task.due_date, None);
            assert!(!task.completed);
        }
        assert_eq!(snapshot[2].id, created[0]);
    }

    #[tokio::test]
    async fn assisted_ingestion_creates_in_reverse_for_newest_first_display() {
        let collection = MemoryCollection::new();
        let store = TaskStore::new(collection.clone());
        let extractor = ScriptedExtractor::replying(
            r#"[{"text":"A","priority":"high","dueDate":null},{"text":"B","priority":"low","dueDate":"2025-01-01T00:00:00Z"}]"#,
        );

        let result =
            ingest_assisted(&store, &extractor, "a then b", now(), DisplayOrder::NewestFirst).await;
        assert!(!result.extraction.is_fallback());
        assert_eq!(result.created.len(), 2);

        let snapshot = collection.snapshot();
        // B was created first, so A is newest and listed on top.
        assert_eq!(result.created[0], snapshot[1].id);
        assert_eq!(snapshot[0].text, "A");
        assert_eq!(snapshot[0].priority, Priority::High);
        assert_eq!(snapshot[0].due_date, None);
        assert_eq!(snapshot[1].text, "B");
        assert_eq!(snapshot[1].priority, Priority::Low);
        assert_eq!(
            snapshot[1].due_date,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(extractor.prompts.lock().unwrap()[0], "a then b");
    }

    #[tokio::test]
    async fn oldest_first_display_keeps_service_order() {
        let collection = MemoryCollection::new();
        let store = TaskStore::new(collection.clone());
        let extractor = ScriptedExtractor::replying(r#"[{"text":"A"},{"text":"B"}]"#);
        ingest_assisted(&store, &extractor, "x", now(), DisplayOrder::OldestFirst).await;
        assert_eq!(texts(&collection), vec!["B", "A"]);
    }

    async fn fallback_matches_naive(extractor: ScriptedExtractor) {
        let raw = "- Buy milk\n\n* Call mom\n• Pay rent";

        let assisted = MemoryCollection::new();
        let store = TaskStore::new(assisted.clone());
        let result =
            ingest_assisted(&store, &extractor, raw, now(), DisplayOrder::NewestFirst).await;
        assert!(result.extraction.is_fallback());
        assert_eq!(result.created.len(), 3);

        let naive = MemoryCollection::new();
        ingest_naive(&TaskStore::new(naive.clone()), raw).await;

        let strip = |c: &MemoryCollection| {
            c.snapshot()
                .into_iter()
                .map(|t| (t.text, t.priority, t.due_date, t.completed))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&assisted), strip(&naive));
    }

    #[tokio::test]
    async fn service_error_falls_back_to_naive() {
        fallback_matches_naive(ScriptedExtractor::failing(ExtractError::Status {
            status: 529,
            body: "overloaded".to_string(),
        }))
        .await;
    }

    #[tokio::test]
    async fn non_array_reply_falls_back_to_naive() {
        fallback_matches_naive(ScriptedExtractor::replying("{}")).await;
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_naive() {
        fallback_matches_naive(ScriptedExtractor::replying("Here are your tasks: ...")).await;
    }

    #[tokio::test]
    async fn reply_without_usable_items_falls_back_to_naive() {
        let reply = r#"[{"title":"wrong key"}, 7, {"text":"  "}]"#;
        fallback_matches_naive(ScriptedExtractor::replying(reply)).await;
    }

    #[tokio::test]
    async fn oversized_paste_falls_back_on_every_line() {
        let raw: String = (1..=40).map(|n| format!("- Item {}\n", n)).collect();
        let extractor = ScriptedExtractor::replying(r#"[{"text":"Item 1"}]"#).with_limit(100);

        let collection = MemoryCollection::new();
        let store = TaskStore::new(collection.clone());
        let result =
            ingest_assisted(&store, &extractor, &raw, now(), DisplayOrder::NewestFirst).await;

        assert!(matches!(
            &result.extraction,
            Extraction::Fallback(reason) if reason.contains("character limit")
        ));
        assert_eq!(result.created.len(), 40);
        let texts = texts(&collection);
        assert_eq!(texts.first().map(String::as_str), Some("Item 40"));
        assert_eq!(texts.last().map(String::as_str), Some("Item 1"));
    }

    #[tokio::test]
    async fn rejected_create_mid_paste_keeps_the_others() {
        let flaky = FlakyCollection::failing_create(MemoryCollection::new(), 2);
        let store = TaskStore::new(flaky.clone());
        let created = ingest_naive(&store, "A\nB\nC").await;

        let snapshot = flaky.inner.snapshot();
        assert_eq!(created.len(), 2);
        assert_eq!(
            snapshot.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["C", "A"]
        );
        assert_eq!(created, vec![snapshot[1].id, snapshot[0].id]);
    }

    #[tokio::test]
    async fn rejected_create_mid_extraction_keeps_the_others() {
        let flaky = FlakyCollection::failing_create(MemoryCollection::new(), 1);
        let store = TaskStore::new(flaky.clone());
        let extractor = ScriptedExtractor::replying(r#"[{"text":"A"},{"text":"B"},{"text":"C"}]"#);
        let result =
            ingest_assisted(&store, &extractor, "abc", now(), DisplayOrder::NewestFirst).await;

        // Created C, B, A in turn; C was rejected.
        assert!(!result.extraction.is_fallback());
        let snapshot = flaky.inner.snapshot();
        assert_eq!(
            snapshot.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(result.created, vec![snapshot[1].id, snapshot[0].id]);
    }

    #[tokio::test]
    async fn invalid_fields_are_defaulted() {
        let extractor = ScriptedExtractor::replying(
            r#"```json
[{"text":" Book flights ","priority":"URGENT","dueDate":"soon"},{"text":"Pack","priority":2}]
```"#,
        );
        let Extraction::Extracted(tasks) = extract_tasks(&extractor, "trip", now()).await else {
            panic!("expected extracted tasks");
        };
        assert_eq!(
            tasks,
            vec![NewTask::new("Book flights"), NewTask::new("Pack")]
        );
    }

    #[tokio::test]
    async fn blank_input_skips_the_service() {
        let collection = MemoryCollection::new();
        let store = TaskStore::new(collection.clone());
        let extractor = ScriptedExtractor::replying("[]");
        let result =
            ingest_assisted(&store, &extractor, " \n ", now(), DisplayOrder::NewestFirst).await;
        assert!(result.extraction.is_fallback());
        assert!(result.created.is_empty());
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn signed_out_ingestion_is_inert() {
        let store: TaskStore<MemoryCollection> = TaskStore::signed_out();
        let extractor = ScriptedExtractor::replying(r#"[{"text":"A"}]"#);
        let result =
            ingest_assisted(&store, &extractor, "A", now(), DisplayOrder::NewestFirst).await;
        assert!(result.created.is_empty());
        assert_eq!(extractor.calls(), 0);
        assert!(ingest_naive(&store, "A\nB").await.is_empty());
    }
}
