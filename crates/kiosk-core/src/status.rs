//! Status debounce and history
//!
//! Drivers poll raw status codes, run them through [`StatusDebouncer`] and
//! only publish a [`StatusEvent`] when the set of codes actually changed.
//! Every poll is still kept in a bounded [`StatusHistory`] so that transient
//! glitch sequences can be recognised and rewritten to a canonical code.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Raw status code reported by a driver
pub type StatusCode = i32;

/// Number of collections kept per status group
pub const STATUS_HISTORY_CAPACITY: usize = 10;

/// Severity attached to a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Ok,
    Warning,
    Error,
}

/// Static description of one status code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCodeSpec {
    pub warning_level: WarningLevel,
    pub description: &'static str,
}

/// Immutable code table of a driver family, built once at startup
#[derive(Debug, Clone, Default)]
pub struct StatusCodeTable {
    codes: HashMap<StatusCode, StatusCodeSpec>,
}

impl StatusCodeTable {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (StatusCode, WarningLevel, &'static str)>,
    {
        let codes = entries
            .into_iter()
            .map(|(code, warning_level, description)| {
                (
                    code,
                    StatusCodeSpec {
                        warning_level,
                        description,
                    },
                )
            })
            .collect();
        Self { codes }
    }

    pub fn spec(&self, code: StatusCode) -> Option<&StatusCodeSpec> {
        self.codes.get(&code)
    }

    /// Unknown codes count as errors
    pub fn level(&self, code: StatusCode) -> WarningLevel {
        self.spec(code)
            .map(|s| s.warning_level)
            .unwrap_or(WarningLevel::Error)
    }

    pub fn description(&self, code: StatusCode) -> String {
        match self.spec(code) {
            Some(spec) => spec.description.to_string(),
            None => format!("Unknown status code {}", code),
        }
    }
}

/// One status poll; equality ignores order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCollection(BTreeSet<StatusCode>);

impl StatusCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: StatusCode) -> bool {
        self.0.contains(&code)
    }

    pub fn insert(&mut self, code: StatusCode) {
        self.0.insert(code);
    }

    pub fn remove(&mut self, code: StatusCode) -> bool {
        self.0.remove(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = StatusCode> + '_ {
        self.0.iter().copied()
    }

    /// Worst level among the codes; an empty poll is `Ok`
    pub fn level(&self, table: &StatusCodeTable) -> WarningLevel {
        self.codes()
            .map(|c| table.level(c))
            .max()
            .unwrap_or(WarningLevel::Ok)
    }
}

impl FromIterator<StatusCode> for StatusCollection {
    fn from_iter<T: IntoIterator<Item = StatusCode>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Bounded record of the latest polls of one status group
#[derive(Debug, Clone)]
pub struct StatusHistory {
    capacity: usize,
    entries: VecDeque<StatusCollection>,
    last_emitted: Option<StatusCollection>,
}

impl Default for StatusHistory {
    fn default() -> Self {
        Self::with_capacity(STATUS_HISTORY_CAPACITY)
    }
}

impl StatusHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
            last_emitted: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent collection
    pub fn last(&self) -> Option<&StatusCollection> {
        self.entries.back()
    }

    pub fn last_emitted(&self) -> Option<&StatusCollection> {
        self.last_emitted.as_ref()
    }

    /// Append a collection, dropping the oldest one when full
    pub fn push(&mut self, collection: StatusCollection) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(collection);
    }

    /// Whether the latest `pattern.len()` collections contain the pattern
    /// codes in chronological order
    pub fn is_status_collection_conformed(&self, pattern: &[StatusCode]) -> bool {
        if pattern.is_empty() || self.entries.len() < pattern.len() {
            return false;
        }

        let start = self.entries.len() - pattern.len();
        self.entries
            .iter()
            .skip(start)
            .zip(pattern)
            .all(|(collection, code)| collection.contains(*code))
    }

    /// Rewrite `from` to `to` when `from` keeps reappearing in the history
    pub fn replace_conformed_status_codes(
        &self,
        codes: &mut StatusCollection,
        from: StatusCode,
        to: StatusCode,
    ) -> bool {
        if codes.contains(from)
            && (self.is_status_collection_conformed(&[from])
                || self.is_status_collection_conformed(&[from, to]))
        {
            codes.remove(from);
            codes.insert(to);
            return true;
        }
        false
    }
}

/// Edge-triggered status notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    /// Log name of the reporting device
    pub device: String,
    /// Status group (e.g. `"validator"`, `"cassette"`)
    pub group: String,
    /// Worst level of the new collection
    pub level: WarningLevel,
    pub codes: Vec<StatusCode>,
    pub previous: Vec<StatusCode>,
    pub descriptions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-device debounce over one or more status groups
pub struct StatusDebouncer {
    device: String,
    table: &'static StatusCodeTable,
    histories: HashMap<String, StatusHistory>,
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusDebouncer {
    pub fn new(device: &str, table: &'static StatusCodeTable) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            device: device.to_string(),
            table,
            histories: HashMap::new(),
            sender,
        }
    }

    pub fn set_device_name(&mut self, device: &str) {
        self.device = device.to_string();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn history(&self, group: &str) -> Option<&StatusHistory> {
        self.histories.get(group)
    }

    /// Apply glitch rewrites `(from, to)` against the group history
    pub fn apply_replacements(
        &self,
        group: &str,
        codes: &mut StatusCollection,
        replacements: &[(StatusCode, StatusCode)],
    ) {
        let Some(history) = self.histories.get(group) else {
            return;
        };
        for &(from, to) in replacements {
            if history.replace_conformed_status_codes(codes, from, to) {
                debug!(device = %self.device, from, to, "Replaced conformed status code");
            }
        }
    }

    /// Record a poll and emit an event if it differs from the last emitted one
    pub fn submit(&mut self, group: &str, collection: StatusCollection) -> Option<StatusEvent> {
        let history = self.histories.entry(group.to_string()).or_default();
        history.push(collection.clone());

        if history.last_emitted() == Some(&collection) {
            return None;
        }

        let previous = history.last_emitted.replace(collection.clone());
        let event = self.send_statuses(group, &collection, previous.as_ref());
        Some(event)
    }

    fn send_statuses(
        &self,
        group: &str,
        new: &StatusCollection,
        old: Option<&StatusCollection>,
    ) -> StatusEvent {
        let event = StatusEvent {
            device: self.device.clone(),
            group: group.to_string(),
            level: new.level(self.table),
            codes: new.codes().collect(),
            previous: old.map(|c| c.codes().collect()).unwrap_or_default(),
            descriptions: new.codes().map(|c| self.table.description(c)).collect(),
            timestamp: Utc::now(),
        };

        debug!(
            device = %self.device,
            group = %group,
            level = ?event.level,
            statuses = ?event.descriptions,
            "Status changed"
        );
        // No receivers is fine; the event is also returned to the caller
        let _ = self.sender.send(event.clone());
        event
    }
}
