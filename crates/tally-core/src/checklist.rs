use std::collections::BTreeMap;
use std::f64::consts::PI;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::datastore::{KeyValueStore, load_json, save_json};
use crate::datetime::iso_serde;
use crate::schedule::ResetRule;

pub const RING_RADIUS: f64 = 34.0;

/// One hard-coded mission. Its identity is its position in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub label: &'static str,
    pub quantity: Option<u32>,
    pub exchange: Option<&'static str>,
}

impl Task {
    const fn plain(label: &'static str) -> Self {
        Self {
            label,
            quantity: None,
            exchange: None,
        }
    }

    const fn delivery(label: &'static str, quantity: u32, exchange: &'static str) -> Self {
        Self {
            label,
            quantity: Some(quantity),
            exchange: Some(exchange),
        }
    }
}

pub const DAILY_TASKS: &[Task] = &[
    Task::plain("2x elite boss"),
    Task::plain("2x world boss"),
    Task::plain("guild check in"),
    Task::plain("guild cargo"),
    Task::plain("500 activity merits"),
    Task::plain("400 focus life skill"),
    Task::plain("buru commission x3"),
    Task::plain("unstable realms x2"),
];

pub const WEEKLY_LIFESTYLE_TASKS: &[Task] = &[
    Task::delivery("ENIGMITE POWDER", 40, "ALCHEMY EXCHANGE"),
    Task::delivery("PINE LUMBER", 40, "ARTISANRY EXCHANGE"),
    Task::delivery("BASE SOIL", 80, "BOTANY EXCHANGE"),
    Task::delivery("HAY", 80, "BOTANY EXCHANGE"),
    Task::delivery("RESIN", 80, "BOTANY EXCHANGE"),
    Task::delivery("TARTBERRY JUICE", 80, "BOTANY EXCHANGE"),
    Task::delivery("FLOUR", 45, "CULINARY EXCHANGE"),
    Task::delivery("SANDSTONE POLISHERS", 40, "GEMCRAFTING EXCHANGE"),
    Task::delivery("LIMPID AZURE WATER", 160, "GEMOLOGY EXCHANGE"),
    Task::delivery("ROCK SALT", 80, "GEMOLOGY EXCHANGE"),
    Task::delivery("CLAY", 160, "MINERALOGY EXCHANGE"),
    Task::delivery("FINE METAL SAND", 80, "MINERALOGY EXCHANGE"),
    Task::delivery("FINE SAND", 160, "MINERALOGY EXCHANGE"),
    Task::delivery("PIG IRON INGOT", 40, "SMELTING EXCHANGE"),
    Task::delivery("REFINED COTTON", 20, "WEAVING EXCHANGE"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistKind {
    DailyMissions,
    WeeklyLifestyle,
}

impl ChecklistKind {
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::DailyMissions => "daily-missions-v1",
            Self::WeeklyLifestyle => "weekly-lifestyle-v1",
        }
    }

    pub fn meta_key(self) -> &'static str {
        match self {
            Self::DailyMissions => "daily-missions-meta",
            Self::WeeklyLifestyle => "weekly-lifestyle-meta",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::DailyMissions => "task-",
            Self::WeeklyLifestyle => "lifestyle-task-",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::DailyMissions => "Daily Missions",
            Self::WeeklyLifestyle => "Weekly Lifestyle Missions",
        }
    }

    pub fn tasks(self) -> &'static [Task] {
        match self {
            Self::DailyMissions => DAILY_TASKS,
            Self::WeeklyLifestyle => WEEKLY_LIFESTYLE_TASKS,
        }
    }

    pub fn task_id(self, index: usize) -> String {
        format!("{}{index}", self.id_prefix())
    }
}

/// Persisted per-task completion flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionMap(BTreeMap<String, bool>);

impl CompletionMap {
    pub fn is_done(&self, id: &str) -> bool {
        self.0.get(id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: String, done: bool) {
        self.0.insert(id, done);
    }

    /// Marks every recorded entry as not done. Entries are kept, not removed.
    pub fn clear_all(&mut self) {
        for value in self.0.values_mut() {
            *value = false;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetMeta {
    #[serde(
        rename = "lastReset",
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_serde::option"
    )]
    pub last_reset: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub percent: u32,
}

impl Progress {
    pub fn new(done: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((done as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            done,
            total,
            percent,
        }
    }

    /// Dash offset of the progress ring: the part of the circle still empty.
    pub fn ring_offset(&self) -> f64 {
        let circumference = 2.0 * PI * RING_RADIUS;
        circumference * (1.0 - f64::from(self.percent) / 100.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChecklistRow<'a> {
    pub index: usize,
    pub task: &'a Task,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Toggle,
    Done,
    Undone,
}

#[derive(Debug, Clone)]
pub struct Checklist {
    kind: ChecklistKind,
    rule: ResetRule,
    completion: CompletionMap,
    meta: ResetMeta,
    reset_on_open: bool,
}

impl Checklist {
    /// Loads the checklist and applies its reset rule before returning, so
    /// whatever is shown first already reflects a due reset.
    #[tracing::instrument(skip(store, rule))]
    pub fn open<S>(
        store: &mut S,
        kind: ChecklistKind,
        rule: ResetRule,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self>
    where
        S: KeyValueStore + ?Sized,
    {
        let completion: CompletionMap = load_json(store, kind.storage_key());
        let meta: ResetMeta = load_json(store, kind.meta_key());
        debug!(
            entries = completion.len(),
            last_reset = ?meta.last_reset,
            "loaded checklist state"
        );

        let mut checklist = Self {
            kind,
            rule,
            completion,
            meta,
            reset_on_open: false,
        };

        if checklist.rule.should_reset(now, checklist.meta.last_reset) {
            info!(checklist = kind.title(), "reset boundary crossed; clearing");
            checklist.perform_reset(store, now)?;
            checklist.reset_on_open = true;
        }

        Ok(checklist)
    }

    pub fn kind(&self) -> ChecklistKind {
        self.kind
    }

    pub fn reset_on_open(&self) -> bool {
        self.reset_on_open
    }

    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        self.meta.last_reset
    }

    pub fn completion(&self) -> &CompletionMap {
        &self.completion
    }

    pub fn rows(&self) -> Vec<ChecklistRow<'static>> {
        self.kind
            .tasks()
            .iter()
            .enumerate()
            .map(|(index, task)| ChecklistRow {
                index,
                task,
                done: self.completion.is_done(&self.kind.task_id(index)),
            })
            .collect()
    }

    pub fn progress(&self) -> Progress {
        let rows = self.rows();
        let done = rows.iter().filter(|row| row.done).count();
        Progress::new(done, rows.len())
    }

    /// Applies `mark` to every index, or to none of them when any index is
    /// out of range. The map is saved once.
    #[tracing::instrument(skip(self, store))]
    pub fn mark_many<S>(
        &mut self,
        store: &mut S,
        indices: &[usize],
        mark: Mark,
    ) -> anyhow::Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        let ids = indices
            .iter()
            .map(|&index| self.checked_id(index))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut next = self.completion.clone();
        for id in ids {
            let done = match mark {
                Mark::Toggle => !next.is_done(&id),
                Mark::Done => true,
                Mark::Undone => false,
            };
            debug!(id = %id, done, "updating task");
            next.set(id, done);
        }
        save_json(store, self.kind.storage_key(), &next)?;
        self.completion = next;
        Ok(())
    }

    /// Clears every entry and stamps the reset time. Shared by the
    /// automatic gate and the manual reset command.
    #[tracing::instrument(skip(self, store))]
    pub fn perform_reset<S>(&mut self, store: &mut S, now: DateTime<Utc>) -> anyhow::Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        self.completion.clear_all();
        save_json(store, self.kind.storage_key(), &self.completion)?;
        self.meta.last_reset = Some(now);
        save_json(store, self.kind.meta_key(), &self.meta)?;
        Ok(())
    }

    fn checked_id(&self, index: usize) -> anyhow::Result<String> {
        let total = self.kind.tasks().len();
        if index >= total {
            return Err(anyhow!(
                "no task #{} in {} (1-{total})",
                index + 1,
                self.kind.title()
            ));
        }
        Ok(self.kind.task_id(index))
    }
}
