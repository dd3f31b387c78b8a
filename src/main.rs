use std::io::Read;

use chrono::{Local, NaiveDate};

use tasklight::assist::anthropic::{self, AnthropicExtractor};
use tasklight::assist::{DisplayOrder, Extraction, breakdown, ingest};
use tasklight::config::TasklightConfig;
use tasklight::core::dates::{DueStatus, parse_due_date};
use tasklight::core::task::Task;
use tasklight::core::view::{Buckets, ViewMode};
use tasklight::session::Session;
use tasklight::store::{MemoryCollection, TaskStore};

const USAGE: &str = "\
usage: tasklight <command>

  list [all|active|completed|calendar [YYYY-MM-DD|today]]
  add <text>
  done <id>            toggle completion
  edit <id> <text>
  priority <id>        cycle low -> medium -> high
  due <id> <date|none>
  rm <id>
  paste [--naive]      read tasks from stdin
  breakdown <id>       split a task into subtasks
  set-key <key>        store the Anthropic API key";

fn init_logging(config: &TasklightConfig) {
    // Journal logging (`journalctl --user -t tasklight -f`): our crate at
    // info/debug (per config), everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("tasklight") {
                let max = if tasklight::debug_logging() {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    tasklight::set_debug_logging(config.debug_logging);

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(j) => j.with_syslog_identifier("tasklight".to_string()),
        Err(e) => {
            eprintln!("Journal unavailable, logging disabled: {}", e);
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        // Global max must be Debug so our debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = TasklightConfig::default_path();
    let config = TasklightConfig::load(&config_path);
    init_logging(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    if command == "set-key" {
        let key = rest.first().ok_or("set-key needs a key")?;
        anthropic::store_api_key(key).await?;
        AnthropicExtractor::new(key, &config)?.check_key().await?;
        println!("API key stored and verified");
        return Ok(());
    }

    let mut store = TaskStore::signed_out();
    match Session::resolve(&config) {
        Some(session) => {
            log::info!("Signed in as {}", session.user());
            store.sign_in(session.open_collection(&config));
        }
        None => {
            eprintln!("No user identity; set \"user\" in {}", config_path.display());
            return Ok(());
        }
    }

    let tasks = current_tasks(&store).await;

    match command {
        "list" => list(&tasks, rest)?,
        "add" => {
            match store.add(&rest.join(" ")).await {
                Some(id) => println!("Added {}", short_id(&id)),
                None => println!("Nothing added"),
            }
        }
        "done" => store.toggle(find_task(&tasks, rest.first())?).await,
        "edit" => {
            let task = find_task(&tasks, rest.first())?;
            store.edit(task.id, &rest[1..].join(" ")).await;
        }
        "priority" => store.cycle_priority(find_task(&tasks, rest.first())?).await,
        "due" => {
            let task = find_task(&tasks, rest.first())?;
            let due = match rest.get(1).map(String::as_str) {
                None | Some("none") => None,
                Some(s) => Some(
                    parse_due_date(s, Local::now().fixed_offset().offset())
                        .ok_or_else(|| format!("Cannot read date {:?}", s))?,
                ),
            };
            store.set_due(task.id, due).await;
        }
        "rm" => store.remove(find_task(&tasks, rest.first())?.id).await,
        "paste" => paste(&store, &config, rest.iter().any(|a| a == "--naive")).await?,
        "breakdown" => {
            let task = find_task(&tasks, rest.first())?;
            let extractor = match extractor(&config).await {
                Some(e) => e,
                None => {
                    println!("No API key configured; nothing to break down with");
                    return Ok(());
                }
            };
            eprintln!("Breaking down \"{}\"…", task.text);
            let result =
                breakdown::break_down(&store, &extractor, task, DisplayOrder::NewestFirst).await;
            println!("Created {} subtasks", result.created.len());
        }
        other => {
            eprintln!("Unknown command {:?}\n\n{}", other, USAGE);
        }
    }

    Ok(())
}

async fn current_tasks(store: &TaskStore<MemoryCollection>) -> Vec<Task> {
    match store.subscribe() {
        Some(mut sub) => {
            let tasks = sub.recv().await.unwrap_or_default();
            sub.unsubscribe();
            tasks
        }
        None => Vec::new(),
    }
}

async fn extractor(config: &TasklightConfig) -> Option<AnthropicExtractor> {
    let key = match anthropic::resolve_api_key().await {
        Ok(key) => key,
        Err(e) => {
            log::warn!("Extraction service unavailable: {}", e);
            return None;
        }
    };
    match AnthropicExtractor::new(&key, config) {
        Ok(e) => Some(e),
        Err(e) => {
            log::warn!("Failed to build extraction client: {}", e);
            None
        }
    }
}

async fn paste(
    store: &TaskStore<MemoryCollection>,
    config: &TasklightConfig,
    naive: bool,
) -> std::io::Result<()> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;

    if naive {
        let created = ingest::ingest_naive(store, &raw).await;
        println!("Added {} tasks", created.len());
        return Ok(());
    }

    let Some(extractor) = extractor(config).await else {
        let created = ingest::ingest_naive(store, &raw).await;
        println!("Added {} tasks (one per line)", created.len());
        return Ok(());
    };

    eprintln!("Extracting tasks…");
    let result = ingest::ingest_assisted(
        store,
        &extractor,
        &raw,
        Local::now().fixed_offset(),
        DisplayOrder::NewestFirst,
    )
    .await;
    match result.extraction {
        Extraction::Extracted(_) => println!("Added {} tasks", result.created.len()),
        Extraction::Fallback(_) => println!("Added {} tasks (one per line)", result.created.len()),
    }
    Ok(())
}

fn list(tasks: &[Task], rest: &[String]) -> Result<(), String> {
    let view = match rest.first() {
        Some(v) => ViewMode::parse(v).ok_or_else(|| format!("Unknown view {:?}", v))?,
        None => ViewMode::All,
    };
    let selected = selected_date(rest.get(1).map(String::as_str), Local::now().date_naive())?;

    let buckets = Buckets::build(tasks, view, selected, &Local);
    if buckets.is_empty() {
        println!("No tasks");
        return Ok(());
    }

    let now = Local::now();
    for (title, section) in buckets.sections() {
        if section.is_empty() {
            continue;
        }
        println!("{} ({})", title, section.len());
        for task in section {
            let check = if task.completed { "[x]" } else { "[ ]" };
            let badge = match task.due_status(&now) {
                Some(DueStatus::Overdue) => "  (overdue)".to_string(),
                Some(DueStatus::DueToday) => "  (due today)".to_string(),
                None => task
                    .due_date
                    .map(|d| format!("  (due {})", d.with_timezone(&Local).format("%Y-%m-%d")))
                    .unwrap_or_default(),
            };
            println!("  {}  {} {}{}", short_id(&task.id), check, task.text, badge);
        }
        println!();
    }
    Ok(())
}

/// The calendar day to filter on. No argument means no day filter, so the
/// calendar view shows every dated task.
fn selected_date(arg: Option<&str>, today: NaiveDate) -> Result<Option<NaiveDate>, String> {
    match arg {
        None => Ok(None),
        Some("today") => Ok(Some(today)),
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| format!("Bad date {:?}: {}", d, e)),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Resolve a task by id prefix; the prefix must match exactly one task.
fn find_task<'a>(tasks: &'a [Task], prefix: Option<&String>) -> Result<&'a Task, String> {
    let prefix = prefix.ok_or("missing task id")?.to_ascii_lowercase();
    let mut matches = tasks
        .iter()
        .filter(|t| t.id.simple().to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task),
        (None, _) => Err(format!("No task with id {}", prefix)),
        (Some(_), Some(_)) => Err(format!("Id {} is ambiguous", prefix)),
    }
}
