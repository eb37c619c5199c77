//! Schedule entries, their persisted form, and the per-tick planning rules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Task, TaskResponse, WrappedTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalTaskState {
    NotStarted,
    Running,
    Killed,
}

/// A live schedule entry owned by the manager loop.
pub(crate) struct ScheduledEntry {
    pub id: String,
    pub name: String,
    pub start: u64,
    pub end: u64,
    pub allow_multi_execution: bool,
    pub state: InternalTaskState,
    pub killed_at: u64,
    pub task: Arc<dyn Task>,
    pub response: TaskResponse,
}

impl ScheduledEntry {
    pub fn new(task: Arc<dyn Task>) -> Self {
        let base = task.base();
        Self {
            id: base.id().to_string(),
            name: base.name().to_string(),
            start: base.start(),
            end: base.end(),
            allow_multi_execution: base.allow_multi_execution(),
            state: InternalTaskState::NotStarted,
            killed_at: 0,
            response: TaskResponse::new(),
            task,
        }
    }

    pub fn view(&self) -> EntryView<'_> {
        EntryView {
            id: &self.id,
            name: &self.name,
            start: self.start,
            end: self.end,
            allow_multi_execution: self.allow_multi_execution,
            state: self.state,
            killed_at: self.killed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub name: String,
    pub start: u64,
    pub end: u64,
    pub allow_multi_execution: bool,
    pub state: InternalTaskState,
    pub killed_at: u64,
    pub task: WrappedTask,
}

/// What the manager writes under the task-manager key.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ManagerState {
    pub schedule: HashMap<String, StoredEntry>,
    pub last_height_seen: u64,
}

/// The scheduling fields of an entry, detached from its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryView<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub start: u64,
    pub end: u64,
    pub allow_multi_execution: bool,
    pub state: InternalTaskState,
    pub killed_at: u64,
}

impl EntryView<'_> {
    /// `start <= height < end`, where a zero bound is open.
    pub fn window_open(&self, height: u64) -> bool {
        let started = self.start == 0 || self.start <= height;
        let not_ended = self.end == 0 || self.end > height;
        started && not_ended
    }

    pub fn expired(&self, height: u64) -> bool {
        self.end != 0 && self.end <= height
    }
}

/// Decisions for one processing tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickPlan {
    /// NotStarted entries to hand to the executor.
    pub to_start: Vec<String>,
    /// Eligible entries held back because a task of the same name is already running.
    pub skipped: Vec<String>,
    /// Entries past their end height that still need to be killed.
    pub expired: Vec<String>,
    /// Killed entries that outlived the tolerance and must be dropped.
    pub unresponsive: Vec<String>,
}

pub fn plan_tick(entries: &[EntryView<'_>], height: u64, tolerance: u64) -> TickPlan {
    let mut sorted: Vec<&EntryView<'_>> = entries.iter().collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(b.id)));

    let mut busy: HashSet<&str> = sorted
        .iter()
        .filter(|e| e.state == InternalTaskState::Running)
        .map(|e| e.name)
        .collect();

    let mut plan = TickPlan::default();
    let mut single = Vec::new();
    for entry in sorted {
        match entry.state {
            InternalTaskState::Killed => {
                if entry.killed_at.saturating_add(tolerance) <= height {
                    plan.unresponsive.push(entry.id.to_string());
                }
            }
            _ if entry.expired(height) => plan.expired.push(entry.id.to_string()),
            InternalTaskState::NotStarted if entry.window_open(height) => {
                if entry.allow_multi_execution {
                    busy.insert(entry.name);
                    plan.to_start.push(entry.id.to_string());
                } else {
                    single.push(entry);
                }
            }
            _ => {}
        }
    }

    // Single-execution entries go last so they see every multi entry started this tick.
    for entry in single {
        if busy.insert(entry.name) {
            plan.to_start.push(entry.id.to_string());
        } else {
            plan.skipped.push(entry.id.to_string());
        }
    }
    plan
}
