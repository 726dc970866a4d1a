//! ============================================================================
//! Core Types for Murmur
//! ============================================================================
//! Defines the durable entry model, its closed enums, the status transition
//! rules and the short ids the agent uses to reference entries.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of hex characters the agent sees for an entry id
pub const SHORT_ID_LEN: usize = 6;

/// Lowest and highest accepted priority
pub const PRIORITY_RANGE: (i32, i32) = (1, 5);

// ============================================================================
// Enums
// ============================================================================

/// Kind of entry the agent files user input under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryCategory {
    Todo,
    Note,
    Reminder,
    Idea,
    List,
    Habit,
    Question,
    Thought,
}

impl EntryCategory {
    pub const ALL: [EntryCategory; 8] = [
        EntryCategory::Todo,
        EntryCategory::Note,
        EntryCategory::Reminder,
        EntryCategory::Idea,
        EntryCategory::List,
        EntryCategory::Habit,
        EntryCategory::Question,
        EntryCategory::Thought,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryCategory::Todo => "todo",
            EntryCategory::Note => "note",
            EntryCategory::Reminder => "reminder",
            EntryCategory::Idea => "idea",
            EntryCategory::List => "list",
            EntryCategory::Habit => "habit",
            EntryCategory::Question => "question",
            EntryCategory::Thought => "thought",
        }
    }

    /// Case-insensitive parse; `None` for anything outside the closed set
    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == needle)
    }

    /// Parse agent output, falling back to `Note` for unknown strings
    pub fn from_agent(s: &str) -> Self {
        Self::parse(s).unwrap_or(EntryCategory::Note)
    }
}

impl fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Completed,
    Archived,
    Snoozed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Completed => "completed",
            EntryStatus::Archived => "archived",
            EntryStatus::Snoozed => "snoozed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(EntryStatus::Active),
            "completed" | "complete" | "done" => Some(EntryStatus::Completed),
            "archived" | "archive" => Some(EntryStatus::Archived),
            "snoozed" | "snooze" => Some(EntryStatus::Snoozed),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence for habit-style entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HabitCadence {
    Daily,
    Weekdays,
    Weekly,
    Monthly,
}

impl HabitCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            HabitCadence::Daily => "daily",
            HabitCadence::Weekdays => "weekdays",
            HabitCadence::Weekly => "weekly",
            HabitCadence::Monthly => "monthly",
        }
    }

    /// Unknown cadences are dropped rather than rejected
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Some(HabitCadence::Daily),
            "weekdays" => Some(HabitCadence::Weekdays),
            "weekly" => Some(HabitCadence::Weekly),
            "monthly" => Some(HabitCadence::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for HabitCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the input that produced an entry came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Voice,
    Text,
}

/// Clamp any agent-supplied priority into `PRIORITY_RANGE`
pub fn clamp_priority(value: i64) -> i32 {
    let (lo, hi) = PRIORITY_RANGE;
    value.clamp(lo as i64, hi as i64) as i32
}

// ============================================================================
// Entry
// ============================================================================

/// The durable unit of user-tracked information.
///
/// Invariants: `completed_at` is set iff `status == Completed`, and
/// `snooze_until` is set iff `status == Snoozed`. Use the transition
/// methods rather than writing `status` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub content: String,
    /// Short display text
    pub summary: String,
    /// Transcript excerpt the entry was extracted from
    pub source_text: String,
    pub category: EntryCategory,
    pub status: EntryStatus,
    pub priority: Option<i32>,
    pub due_date: Option<DateTime<Utc>>,
    /// Raw natural-language due phrase ("tomorrow at 5pm")
    pub due_date_description: Option<String>,
    pub cadence: Option<HabitCadence>,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub snooze_until: Option<DateTime<Utc>>,
}

impl Entry {
    /// New active entry with a fresh id
    pub fn new(
        content: impl Into<String>,
        category: EntryCategory,
        source: EntrySource,
        now: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            summary: content.clone(),
            source_text: String::new(),
            content,
            category,
            status: EntryStatus::Active,
            priority: None,
            due_date: None,
            due_date_description: None,
            cadence: None,
            source,
            created_at: now,
            updated_at: now,
            completed_at: None,
            snooze_until: None,
        }
    }

    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = EntryStatus::Completed;
        self.completed_at = Some(now);
        self.snooze_until = None;
        self.updated_at = now;
    }

    pub fn archive(&mut self, now: DateTime<Utc>) {
        self.status = EntryStatus::Archived;
        self.completed_at = None;
        self.snooze_until = None;
        self.updated_at = now;
    }

    pub fn snooze(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = EntryStatus::Snoozed;
        self.snooze_until = Some(until);
        self.completed_at = None;
        self.updated_at = now;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = EntryStatus::Active;
        self.completed_at = None;
        self.snooze_until = None;
        self.updated_at = now;
    }

    /// Route a status change through the matching transition.
    /// `snooze_until` is only consulted for `Snoozed`.
    pub fn transition(
        &mut self,
        status: EntryStatus,
        snooze_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        match status {
            EntryStatus::Active => self.activate(now),
            EntryStatus::Completed => self.complete(now),
            EntryStatus::Archived => self.archive(now),
            EntryStatus::Snoozed => self.snooze(snooze_until, now),
        }
    }

    /// Whether the agent should see this entry as current context
    pub fn is_current(&self) -> bool {
        matches!(self.status, EntryStatus::Active | EntryStatus::Snoozed)
    }
}

// ============================================================================
// Short IDs
// ============================================================================

/// First `SHORT_ID_LEN` hex characters of the id, lowercase
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string().chars().take(SHORT_ID_LEN).collect()
}

/// Result of resolving an agent-supplied id against a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLookup {
    /// Index into the snapshot
    Found(usize),
    NotFound,
    Ambiguous(usize),
}

/// Normalize the id text the agent sends: brackets, whitespace, case, hyphens
pub fn normalize_id_key(key: &str) -> String {
    key.trim()
        .trim_matches(|c| c == '[' || c == ']')
        .trim()
        .to_lowercase()
        .replace('-', "")
}

/// Resolve a short id (or any longer prefix of the full id)
pub fn resolve_entry(entries: &[Entry], key: &str) -> EntryLookup {
    let needle = normalize_id_key(key);
    if needle.is_empty() {
        return EntryLookup::NotFound;
    }

    let mut found = None;
    let mut matches = 0;
    for (idx, entry) in entries.iter().enumerate() {
        if entry.id.simple().to_string().starts_with(&needle) {
            matches += 1;
            found.get_or_insert(idx);
        }
    }

    match (found, matches) {
        (Some(idx), 1) => EntryLookup::Found(idx),
        (Some(_), n) => EntryLookup::Ambiguous(n),
        (None, _) => EntryLookup::NotFound,
    }
}

// ============================================================================
// Agent Context
// ============================================================================

/// Compact projection of an entry sent to the agent each turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContextEntry {
    pub id: String,
    pub summary: String,
    pub category: EntryCategory,
    pub priority: Option<i32>,
    pub due_date_description: Option<String>,
    pub cadence: Option<HabitCadence>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Entry> for AgentContextEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            id: entry.short_id(),
            summary: entry.summary.clone(),
            category: entry.category,
            priority: entry.priority,
            due_date_description: entry.due_date_description.clone(),
            cadence: entry.cadence,
            status: entry.status,
            created_at: entry.created_at,
        }
    }
}

/// Current (active/snoozed) entries, highest priority first, then newest
pub fn agent_context(entries: &[Entry]) -> Vec<AgentContextEntry> {
    let mut context: Vec<AgentContextEntry> = entries
        .iter()
        .filter(|e| e.is_current())
        .map(AgentContextEntry::from)
        .collect();
    context.sort_by(compare_for_agent);
    context
}

/// Priority ascending (absent priority last), then newest first
pub fn compare_for_agent(a: &AgentContextEntry, b: &AgentContextEntry) -> std::cmp::Ordering {
    let pa = a.priority.unwrap_or(PRIORITY_RANGE.1 + 1);
    let pb = b.priority.unwrap_or(PRIORITY_RANGE.1 + 1);
    pa.cmp(&pb).then_with(|| b.created_at.cmp(&a.created_at))
}
