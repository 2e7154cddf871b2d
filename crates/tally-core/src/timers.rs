use std::io::{self, Write};
use std::time::Duration as StdDuration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::TOTAL_CHANNELS;
use crate::datastore::{KeyValueStore, load_json, save_json};
use crate::datetime::iso_serde;
use crate::poll::{PollEvent, PollRegistry};

pub const STORAGE_KEY: &str = "bossTimers";
pub const EXPORT_VERSION: &str = "1.0";
pub const MAX_SPAWN_MINUTES: u32 = 1440;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: String,
    pub name: String,
    pub spawn_time_minutes: u32,
    pub channel: u32,
    #[serde(default, with = "iso_serde::option")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Stopped,
    Active { remaining: Duration },
    Ready,
}

impl TimerStatus {
    pub fn label(&self) -> String {
        match self {
            Self::Stopped => "STOPPED".to_string(),
            Self::Active { remaining } => format_remaining(*remaining),
            Self::Ready => "READY!".to_string(),
        }
    }
}

impl Timer {
    pub fn status(&self, now: DateTime<Utc>) -> TimerStatus {
        match self.end_time {
            None => TimerStatus::Stopped,
            Some(end) if end > now => TimerStatus::Active {
                remaining: end - now,
            },
            Some(_) => TimerStatus::Ready,
        }
    }

    pub fn spawn_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.spawn_time_minutes))
    }
}

/// `MM:SS`, minutes not wrapped at the hour.
pub fn format_remaining(remaining: Duration) -> String {
    let total_seconds = remaining.num_seconds().max(0);
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Form input for a new timer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimer {
    #[serde(default)]
    pub name: String,
    pub spawn_time_minutes: u32,
    pub channel: u32,
}

impl NewTimer {
    pub fn validate(&self, max_channel: u32) -> anyhow::Result<()> {
        if self.name.trim().is_empty() || self.spawn_time_minutes == 0 || self.channel == 0 {
            return Err(anyhow!("Please fill in all fields"));
        }
        if self.spawn_time_minutes > MAX_SPAWN_MINUTES {
            return Err(anyhow!(
                "Spawn time must be between 1 and {MAX_SPAWN_MINUTES} minutes"
            ));
        }
        if self.channel > max_channel {
            return Err(anyhow!("Channel must be between 1 and {max_channel}"));
        }
        Ok(())
    }

    fn into_stopped_timer(self) -> Timer {
        Timer {
            id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            spawn_time_minutes: self.spawn_time_minutes,
            channel: self.channel,
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub total: usize,
    pub active: usize,
    pub ready: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerExport<'a> {
    pub version: &'static str,
    #[serde(with = "iso_serde")]
    pub timestamp: DateTime<Utc>,
    pub timers: &'a [Timer],
}

/// The persisted timer collection.
#[derive(Debug, Clone)]
pub struct TimerBoard {
    timers: Vec<Timer>,
    max_channel: u32,
}

impl Default for TimerBoard {
    fn default() -> Self {
        Self::new(TOTAL_CHANNELS)
    }
}

impl TimerBoard {
    pub fn new(max_channel: u32) -> Self {
        Self {
            timers: Vec::new(),
            max_channel,
        }
    }

    #[tracing::instrument(skip(store))]
    pub fn load<S>(store: &S, max_channel: u32) -> Self
    where
        S: KeyValueStore + ?Sized,
    {
        let timers: Vec<Timer> = load_json(store, STORAGE_KEY);
        debug!(count = timers.len(), "loaded timers");
        Self {
            timers,
            max_channel,
        }
    }

    pub fn save<S>(&self, store: &mut S) -> anyhow::Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        save_json(store, STORAGE_KEY, &self.timers)
    }

    pub fn timers(&self) -> &[Timer] {
        &self.timers
    }

    pub fn get(&self, idx: usize) -> Option<&Timer> {
        self.timers.get(idx)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.timers.iter().position(|timer| timer.id == id)
    }

    /// Resolves a 1-based position or a unique id prefix to an index.
    pub fn resolve(&self, selector: &str) -> anyhow::Result<usize> {
        let selector = selector.trim();
        if let Ok(position) = selector.parse::<usize>() {
            if position >= 1 && position <= self.timers.len() {
                return Ok(position - 1);
            }
            return Err(anyhow!("no timer #{position}"));
        }

        let mut matches = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| !selector.is_empty() && timer.id.starts_with(selector));
        match (matches.next(), matches.next()) {
            (Some((idx, _)), None) => Ok(idx),
            (Some(_), Some(_)) => Err(anyhow!("timer id prefix {selector:?} is ambiguous")),
            (None, _) => Err(anyhow!("no timer matches {selector:?}")),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn add(&mut self, input: NewTimer) -> anyhow::Result<&Timer> {
        input.validate(self.max_channel)?;
        let timer = input.into_stopped_timer();
        info!(id = %timer.id, name = %timer.name, "added timer");
        self.timers.push(timer);
        self.timers
            .last()
            .ok_or_else(|| anyhow!("timer list unexpectedly empty"))
    }

    /// Stopped (or any) timer becomes active with `endTime = now + spawn`.
    pub fn start(&mut self, idx: usize, now: DateTime<Utc>) -> anyhow::Result<&Timer> {
        let timer = self.timer_mut(idx)?;
        timer.end_time = Some(now + timer.spawn_duration());
        debug!(id = %timer.id, end = ?timer.end_time, "started timer");
        Ok(timer)
    }

    pub fn reset(&mut self, idx: usize) -> anyhow::Result<&Timer> {
        let timer = self.timer_mut(idx)?;
        timer.end_time = None;
        debug!(id = %timer.id, "reset timer");
        Ok(timer)
    }

    pub fn delete(&mut self, idx: usize) -> anyhow::Result<Timer> {
        if idx >= self.timers.len() {
            return Err(anyhow!("no timer #{}", idx + 1));
        }
        let timer = self.timers.remove(idx);
        info!(id = %timer.id, name = %timer.name, "deleted timer");
        Ok(timer)
    }

    pub fn clear(&mut self) -> usize {
        let count = self.timers.len();
        self.timers.clear();
        count
    }

    pub fn stats(&self, now: DateTime<Utc>) -> TimerStats {
        let mut stats = TimerStats {
            total: self.timers.len(),
            ..TimerStats::default()
        };
        for timer in &self.timers {
            match timer.status(now) {
                TimerStatus::Active { .. } => stats.active += 1,
                TimerStatus::Ready => stats.ready += 1,
                TimerStatus::Stopped => {}
            }
        }
        stats
    }

    pub fn export(&self, now: DateTime<Utc>) -> TimerExport<'_> {
        TimerExport {
            version: EXPORT_VERSION,
            timestamp: now,
            timers: &self.timers,
        }
    }

    pub fn export_json(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.export(now)).context("failed serializing timers")
    }

    /// Replaces the collection with the timers in an export file. Every
    /// imported timer gets a fresh id and starts stopped. Nothing changes
    /// when the file is invalid.
    #[tracing::instrument(skip(self, raw))]
    pub fn import_json(&mut self, raw: &str) -> anyhow::Result<usize> {
        let data: Value = serde_json::from_str(raw).context("Error reading timer file")?;
        let Some(entries) = data.get("timers").filter(|value| value.is_array()) else {
            return Err(anyhow!("Invalid timer file format"));
        };

        let inputs: Vec<NewTimer> =
            serde_json::from_value(entries.clone()).context("Invalid timer file format")?;
        for (idx, input) in inputs.iter().enumerate() {
            input
                .validate(self.max_channel)
                .with_context(|| format!("Invalid timer #{} in file", idx + 1))?;
        }

        self.timers = inputs
            .into_iter()
            .map(NewTimer::into_stopped_timer)
            .collect();
        info!(count = self.timers.len(), "imported timers");
        Ok(self.timers.len())
    }

    fn timer_mut(&mut self, idx: usize) -> anyhow::Result<&mut Timer> {
        self.timers
            .get_mut(idx)
            .ok_or_else(|| anyhow!("no timer #{}", idx + 1))
    }
}

/// Desktop-style alert fired when a timer becomes ready.
pub trait Notifier {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Rings the terminal bell and prints the alert on stderr. Does nothing
/// when permission is not granted.
#[derive(Debug, Clone, Copy)]
pub struct TerminalNotifier {
    pub permitted: bool,
}

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()> {
        if !self.permitted {
            debug!(title, "notifications not permitted; skipping");
            return Ok(());
        }
        let mut err = io::stderr().lock();
        writeln!(err, "\x07{title} {body}")?;
        Ok(())
    }
}

pub fn ready_notification(timer: &Timer) -> (String, String) {
    (
        format!("{} is ready!", timer.name),
        format!("Boss on channel {} has spawned!", timer.channel),
    )
}

/// A board with live countdowns: every active timer has exactly one poll,
/// and every mutation keeps the polls in step with the board.
#[derive(Debug)]
pub struct TimerSession {
    board: TimerBoard,
    polls: PollRegistry,
}

impl TimerSession {
    pub fn new(
        board: TimerBoard,
        period: StdDuration,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (polls, rx) = PollRegistry::new(period);
        (Self { board, polls }, rx)
    }

    pub fn board(&self) -> &TimerBoard {
        &self.board
    }

    pub fn polls(&self) -> &PollRegistry {
        &self.polls
    }

    /// Starts polls for timers that were still running when loaded.
    pub fn resume(&mut self, now: DateTime<Utc>) -> usize {
        let mut resumed = 0;
        for timer in &self.board.timers {
            if let TimerStatus::Active { remaining } = timer.status(now) {
                self.polls.spawn(&timer.id, to_std(remaining));
                resumed += 1;
            }
        }
        debug!(resumed, "resumed running timers");
        resumed
    }

    pub fn add(&mut self, input: NewTimer) -> anyhow::Result<()> {
        self.board.add(input)?;
        Ok(())
    }

    pub fn start(&mut self, idx: usize, now: DateTime<Utc>) -> anyhow::Result<()> {
        let timer = self.board.start(idx, now)?;
        let remaining = timer.spawn_duration();
        let id = timer.id.clone();
        self.polls.spawn(&id, to_std(remaining));
        Ok(())
    }

    pub fn reset(&mut self, idx: usize) -> anyhow::Result<()> {
        let id = self.board.reset(idx)?.id.clone();
        self.polls.cancel(&id);
        Ok(())
    }

    pub fn delete(&mut self, idx: usize) -> anyhow::Result<Timer> {
        let timer = self.board.delete(idx)?;
        self.polls.cancel(&timer.id);
        Ok(timer)
    }

    pub fn clear(&mut self) -> usize {
        self.polls.cancel_all();
        self.board.clear()
    }

    /// Applies a poll event. Returns the timer when it just became ready.
    pub fn handle(&mut self, event: &PollEvent, now: DateTime<Utc>) -> Option<Timer> {
        let PollEvent::Expired { id } = event else {
            return None;
        };
        self.polls.release(id);

        let idx = self.board.position(id)?;
        let timer = &self.board.timers[idx];
        match timer.status(now) {
            TimerStatus::Ready => Some(timer.clone()),
            status => {
                warn!(id = %id, ?status, "poll expired but timer is not ready");
                None
            }
        }
    }
}

fn to_std(remaining: Duration) -> StdDuration {
    remaining.to_std().unwrap_or(StdDuration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio::sync::mpsc::error::TryRecvError;

    use super::{NewTimer, TimerBoard, TimerSession, TimerStatus, format_remaining};
    use crate::datastore::{KeyValueStore, MemoryStore};
    use crate::poll::PollEvent;

    fn at(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, h, mi, s)
            .single()
            .expect("valid instant")
    }

    fn new_timer(name: &str, minutes: u32, channel: u32) -> NewTimer {
        NewTimer {
            name: name.to_string(),
            spawn_time_minutes: minutes,
            channel,
        }
    }

    #[test]
    fn lifecycle_stopped_active_ready_stopped() {
        let mut board = TimerBoard::default();
        board.add(new_timer("Golem", 5, 12)).expect("add");
        let now = at(10, 0, 0);
        assert_eq!(board.timers()[0].status(now), TimerStatus::Stopped);

        let started = board.start(0, now).expect("start").clone();
        assert_eq!(started.end_time, Some(now + Duration::minutes(5)));
        assert_eq!(
            started.status(now + Duration::seconds(61)),
            TimerStatus::Active {
                remaining: Duration::seconds(239)
            }
        );
        assert_eq!(
            started.status(now + Duration::minutes(5)),
            TimerStatus::Ready
        );

        let reset = board.reset(0).expect("reset");
        assert_eq!(reset.end_time, None);
        assert_eq!(reset.status(now), TimerStatus::Stopped);
    }

    #[test]
    fn validates_form_input() {
        let mut board = TimerBoard::default();
        assert!(board.add(new_timer("  ", 5, 1)).is_err());
        let err = board
            .add(new_timer("Wyrm", 1441, 1))
            .expect_err("spawn too long");
        assert_eq!(
            err.to_string(),
            "Spawn time must be between 1 and 1440 minutes"
        );
        let err = board
            .add(new_timer("Wyrm", 30, 451))
            .expect_err("channel too high");
        assert_eq!(err.to_string(), "Channel must be between 1 and 450");
        assert!(board.is_empty());
    }

    #[test]
    fn stats_count_active_and_ready() {
        let mut board = TimerBoard::default();
        for (name, minutes) in [("a", 1), ("b", 10), ("c", 30)] {
            board.add(new_timer(name, minutes, 1)).expect("add");
        }
        let now = at(9, 0, 0);
        board.start(0, now).expect("start");
        board.start(1, now).expect("start");

        let stats = board.stats(now + Duration::minutes(2));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.ready, 1);
    }

    #[test]
    fn resolves_positions_and_id_prefixes() {
        let mut board = TimerBoard::default();
        board.add(new_timer("a", 1, 1)).expect("add");
        board.add(new_timer("b", 1, 1)).expect("add");
        let id = board.timers()[1].id.clone();

        assert_eq!(board.resolve("1").expect("position"), 0);
        assert_eq!(board.resolve(&id[..9]).expect("prefix"), 1);
        assert!(board.resolve("3").is_err());
        assert!(board.resolve("zzzz").is_err());
    }

    #[test]
    fn export_then_import_gives_fresh_stopped_timers() {
        let mut board = TimerBoard::default();
        board.add(new_timer("Golem", 5, 12)).expect("add");
        board.start(0, at(10, 0, 0)).expect("start");
        let old_id = board.timers()[0].id.clone();

        let json = board.export_json(at(10, 1, 0)).expect("export");
        assert!(json.contains(r#""version": "1.0""#));
        assert!(json.contains(r#""timestamp": "2026-02-16T10:01:00.000Z""#));
        assert!(json.contains(r#""spawnTimeMinutes": 5"#));

        let mut other = TimerBoard::default();
        other.add(new_timer("Old", 3, 3)).expect("add");
        assert_eq!(other.import_json(&json).expect("import"), 1);
        let imported = &other.timers()[0];
        assert_eq!(imported.name, "Golem");
        assert_eq!(imported.channel, 12);
        assert_eq!(imported.end_time, None);
        assert_ne!(imported.id, old_id);
    }

    #[test]
    fn invalid_import_leaves_board_unchanged() {
        let mut board = TimerBoard::default();
        board.add(new_timer("Keep", 3, 3)).expect("add");
        let before = board.timers().to_vec();

        assert!(board.import_json("not json").is_err());
        assert!(board.import_json(r#"{"version":"1.0"}"#).is_err());
        assert!(board.import_json(r#"{"timers":{}}"#).is_err());
        assert!(
            board
                .import_json(r#"{"timers":[{"name":"x","spawnTimeMinutes":0,"channel":1}]}"#)
                .is_err()
        );
        assert_eq!(board.timers(), before.as_slice());
    }

    #[test]
    fn persisted_browser_format_loads() {
        let mut store = MemoryStore::new();
        store
            .set_item(
                "bossTimers",
                r#"[{"id":"4f1c","name":"Golem","spawnTimeMinutes":5,"channel":12,"endTime":"2026-02-16T10:05:00.000Z"},
                    {"id":"9a2b","name":"Wyrm","spawnTimeMinutes":60,"channel":3,"endTime":null}]"#,
            )
            .expect("set");

        let board = TimerBoard::load(&store, 450);
        assert_eq!(board.len(), 2);
        assert_eq!(board.timers()[0].end_time, Some(at(10, 5, 0)));
        assert_eq!(board.stats(at(10, 0, 0)).active, 1);

        board.save(&mut store).expect("save");
        let saved = store.get_item("bossTimers").expect("get").expect("present");
        assert!(saved.contains(r#""endTime":"2026-02-16T10:05:00.000Z""#));
        assert!(saved.contains(r#""endTime":null"#));
    }

    #[test]
    fn formats_countdown() {
        assert_eq!(format_remaining(Duration::seconds(0)), "00:00");
        assert_eq!(format_remaining(Duration::seconds(61)), "01:01");
        assert_eq!(format_remaining(Duration::minutes(90)), "90:00");
        assert_eq!(format_remaining(Duration::seconds(-5)), "00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn session_reports_ready_after_spawn_time() {
        let mut board = TimerBoard::default();
        board.add(new_timer("Golem", 1, 12)).expect("add");
        let (mut session, mut rx) = TimerSession::new(board, StdDuration::from_secs(1));
        let now = at(10, 0, 0);
        session.start(0, now).expect("start");

        let mut ticks = 0;
        let ready = loop {
            let event = rx.recv().await.expect("event");
            if let PollEvent::Tick { .. } = event {
                ticks += 1;
                continue;
            }
            break session.handle(&event, now + Duration::minutes(1));
        };
        assert_eq!(ticks, 59);
        assert_eq!(ready.map(|timer| timer.name), Some("Golem".to_string()));
        assert!(session.polls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_poll_survives_its_timer() {
        let mut board = TimerBoard::default();
        for name in ["a", "b", "c"] {
            board.add(new_timer(name, 2, 1)).expect("add");
        }
        let (mut session, mut rx) = TimerSession::new(board, StdDuration::from_secs(1));
        let now = at(10, 0, 0);
        for idx in 0..3 {
            session.start(idx, now).expect("start");
        }
        assert_eq!(session.polls().len(), 3);

        let deleted = session.delete(0).expect("delete");
        assert!(!session.polls().is_polling(&deleted.id));
        let reset_id = session.board().timers()[0].id.clone();
        session.reset(0).expect("reset");
        assert!(!session.polls().is_polling(&reset_id));
        assert_eq!(session.polls().len(), 1);

        assert_eq!(session.clear(), 2);
        assert!(session.polls().is_empty());

        tokio::time::sleep(StdDuration::from_secs(600)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_only_polls_running_timers() {
        let mut board = TimerBoard::default();
        for name in ["running", "done", "stopped"] {
            board.add(new_timer(name, 5, 1)).expect("add");
        }
        let now = at(10, 0, 0);
        board.start(0, now).expect("start");
        board.start(1, now - Duration::minutes(10)).expect("start");

        let (mut session, _rx) = TimerSession::new(board, StdDuration::from_secs(1));
        assert_eq!(session.resume(now), 1);
        let running_id = session.board().timers()[0].id.clone();
        assert!(session.polls().is_polling(&running_id));
    }
}
