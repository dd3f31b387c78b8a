use chrono::{NaiveDate, TimeZone};

use super::dates::local_date;
use super::task::{Priority, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    All,
    Active,
    Completed,
    Calendar,
}

impl ViewMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "calendar" => Some(Self::Calendar),
            _ => None,
        }
    }
}

/// The four display groupings derived from a task snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    pub high: Vec<Task>,
    pub medium: Vec<Task>,
    pub low: Vec<Task>,
    pub done: Vec<Task>,
}

impl Buckets {
    /// Filter `tasks` by `view` and partition the result.
    ///
    /// `selected` only matters for [`ViewMode::Calendar`]; due dates are
    /// compared as calendar days in `tz`. Input order is preserved within each
    /// bucket.
    pub fn build<Tz: TimeZone>(
        tasks: &[Task],
        view: ViewMode,
        selected: Option<NaiveDate>,
        tz: &Tz,
    ) -> Self {
        let mut buckets = Self::default();

        for task in tasks.iter().filter(|t| in_view(t, view, selected, tz)) {
            let bucket = if task.completed {
                &mut buckets.done
            } else {
                match task.priority {
                    Priority::High => &mut buckets.high,
                    Priority::Medium => &mut buckets.medium,
                    Priority::Low => &mut buckets.low,
                }
            };
            bucket.push(task.clone());
        }

        buckets
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len() + self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buckets in display order, labelled.
    pub fn sections(&self) -> [(&'static str, &[Task]); 4] {
        [
            ("High priority", self.high.as_slice()),
            ("Medium priority", self.medium.as_slice()),
            ("Low priority", self.low.as_slice()),
            ("Completed", self.done.as_slice()),
        ]
    }
}

fn in_view<Tz: TimeZone>(
    task: &Task,
    view: ViewMode,
    selected: Option<NaiveDate>,
    tz: &Tz,
) -> bool {
    match (view, selected) {
        (ViewMode::Active, _) => !task.completed,
        (ViewMode::Completed, _) => task.completed,
        (ViewMode::Calendar, Some(day)) => task
            .due_date
            .as_ref()
            .is_some_and(|d| local_date(d, tz) == day),
        (ViewMode::All, _) | (ViewMode::Calendar, None) => true,
    }
}
