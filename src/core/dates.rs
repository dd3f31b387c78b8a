use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::task::Task;

/// True iff `due` is present and strictly earlier than `now`.
pub fn is_overdue<Tz: TimeZone>(due: Option<&DateTime<Utc>>, now: &DateTime<Tz>) -> bool {
    due.is_some_and(|d| *d < now.with_timezone(&Utc))
}

/// True iff `due` falls on the same calendar day as `now`, in `now`'s zone.
pub fn is_due_today<Tz: TimeZone>(due: Option<&DateTime<Utc>>, now: &DateTime<Tz>) -> bool {
    due.is_some_and(|d| local_date(d, &now.timezone()) == now.date_naive())
}

/// Calendar date of a stored timestamp as seen from `tz`.
pub fn local_date<Tz: TimeZone>(at: &DateTime<Utc>, tz: &Tz) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

/// Parse an ISO-8601 due date from the service boundary.
///
/// Accepts RFC 3339 timestamps, zone-less date-times and bare dates; the
/// latter two are read in `offset` (a bare date means midnight). Anything else
/// yields `None`.
pub fn parse_due_date(s: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    Overdue,
    DueToday,
}

impl Task {
    /// Completed tasks are never overdue.
    pub fn is_overdue<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        !self.completed && is_overdue(self.due_date.as_ref(), now)
    }

    /// Completed tasks are never due today.
    pub fn is_due_today<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        !self.completed && is_due_today(self.due_date.as_ref(), now)
    }

    /// Badge to display next to the task, overdue taking precedence.
    pub fn due_status<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DueStatus> {
        if self.is_overdue(now) {
            Some(DueStatus::Overdue)
        } else if self.is_due_today(now) {
            Some(DueStatus::DueToday)
        } else {
            None
        }
    }
}
