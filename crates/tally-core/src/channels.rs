use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::datastore::{KeyValueStore, load_json, save_json};

pub const STORAGE_KEY: &str = "channelActiveState";
pub const TOTAL_CHANNELS: u32 = 450;

/// Parsed search box contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelQuery {
    All,
    Range { start: u64, end: u64 },
    List(Vec<u64>),
    Number { text: String, value: Option<u64> },
    Text(String),
}

impl ChannelQuery {
    pub fn parse(raw: &str) -> Self {
        let query = raw.trim().to_lowercase();
        if query.is_empty() {
            return Self::All;
        }

        if let Some(caps) = range_regex().and_then(|re| re.captures(&query)) {
            return Self::Range {
                start: parse_saturating(&caps[1]),
                end: parse_saturating(&caps[2]),
            };
        }

        if query.contains(',') {
            let numbers = query
                .split(',')
                .filter_map(|token| token.trim().parse::<u64>().ok())
                .collect();
            return Self::List(numbers);
        }

        if query.chars().all(|c| c.is_ascii_digit()) {
            let value = query.parse::<u64>().ok();
            return Self::Number { text: query, value };
        }

        Self::Text(query)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Domain members matching this query, in display order.
    pub fn apply(&self, total: u32) -> Vec<u32> {
        let domain = 1..=total;
        match self {
            Self::All => domain.collect(),
            Self::Range { start, end } => domain
                .filter(|num| (*start..=*end).contains(&u64::from(*num)))
                .collect(),
            Self::List(numbers) => domain
                .filter(|num| numbers.contains(&u64::from(*num)))
                .collect(),
            Self::Number { text, value } => {
                let exact = domain
                    .clone()
                    .filter(|num| Some(u64::from(*num)) == *value);
                let partial = domain.filter(|num| {
                    Some(u64::from(*num)) != *value && num.to_string().contains(text.as_str())
                });
                exact.chain(partial).collect()
            }
            Self::Text(text) => domain
                .filter(|num| num.to_string().contains(text.as_str()))
                .collect(),
        }
    }
}

fn range_regex() -> Option<&'static Regex> {
    static RANGE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    RANGE_RE
        .get_or_init(|| {
            Regex::new(r"^(\d+)-(\d+)$")
                .map_err(|err| error!(error = %err, "invalid channel range pattern"))
                .ok()
        })
        .as_ref()
}

fn parse_saturating(digits: &str) -> u64 {
    digits.parse::<u64>().unwrap_or(u64::MAX)
}

/// What one render of the tracker shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelView {
    pub query: ChannelQuery,
    /// Every domain member matching the query, active or not.
    pub matched: Vec<u32>,
    /// Matching channels that are not active; the main grid.
    pub visible: Vec<u32>,
    /// All active channels, ascending, regardless of the query.
    pub active: Vec<u32>,
    pub total: u32,
}

impl ChannelView {
    pub fn grid_notice(&self) -> Option<&'static str> {
        if !self.visible.is_empty() {
            return None;
        }
        if self.query.is_empty() {
            Some("All channels are currently active.")
        } else if self.matched.is_empty() {
            Some("No channels found matching your search.")
        } else {
            Some("All matching channels are currently active.")
        }
    }

    pub fn active_notice(&self) -> Option<&'static str> {
        self.active.is_empty().then_some("No active channels")
    }
}

#[derive(Debug, Clone)]
pub struct ChannelTracker {
    total: u32,
    active: BTreeSet<u32>,
}

impl ChannelTracker {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            active: BTreeSet::new(),
        }
    }

    #[tracing::instrument(skip(store))]
    pub fn load<S>(store: &S, total: u32) -> Self
    where
        S: KeyValueStore + ?Sized,
    {
        let stored: Vec<i64> = load_json(store, STORAGE_KEY);
        let mut tracker = Self::new(total);
        for value in stored {
            match u32::try_from(value) {
                Ok(num) if tracker.in_domain(num) => {
                    tracker.active.insert(num);
                }
                _ => warn!(value, "dropping stored channel outside the domain"),
            }
        }
        debug!(active = tracker.active.len(), "loaded active channels");
        tracker
    }

    pub fn save<S>(&self, store: &mut S) -> anyhow::Result<()>
    where
        S: KeyValueStore + ?Sized,
    {
        save_json(store, STORAGE_KEY, &self.active)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_active(&self, channel: u32) -> bool {
        self.active.contains(&channel)
    }

    pub fn active(&self) -> Vec<u32> {
        self.active.iter().copied().collect()
    }

    pub fn in_domain(&self, channel: u32) -> bool {
        (1..=self.total).contains(&channel)
    }

    pub fn view(&self, raw_query: &str) -> ChannelView {
        let query = ChannelQuery::parse(raw_query);
        let matched = query.apply(self.total);
        let visible = matched
            .iter()
            .copied()
            .filter(|num| !self.active.contains(num))
            .collect();
        ChannelView {
            query,
            matched,
            visible,
            active: self.active(),
            total: self.total,
        }
    }

    /// Flips membership in the active set. Returns `true` when the channel
    /// is active afterwards.
    #[tracing::instrument(skip(self))]
    pub fn toggle(&mut self, channel: u32) -> anyhow::Result<bool> {
        if !self.in_domain(channel) {
            return Err(anyhow!("channel must be between 1 and {}", self.total));
        }
        let now_active = if self.active.remove(&channel) {
            false
        } else {
            self.active.insert(channel);
            true
        };
        debug!(channel, now_active, "toggled channel");
        Ok(now_active)
    }

    pub fn clear_active(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }
}

impl Default for ChannelTracker {
    fn default() -> Self {
        Self::new(TOTAL_CHANNELS)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelQuery, ChannelTracker, STORAGE_KEY, TOTAL_CHANNELS};
    use crate::datastore::{KeyValueStore, MemoryStore};

    #[test]
    fn parses_query_grammar_in_precedence_order() {
        assert_eq!(ChannelQuery::parse("  "), ChannelQuery::All);
        assert_eq!(
            ChannelQuery::parse("50-60"),
            ChannelQuery::Range { start: 50, end: 60 }
        );
        assert_eq!(
            ChannelQuery::parse("1, x,10"),
            ChannelQuery::List(vec![1, 10])
        );
        assert_eq!(
            ChannelQuery::parse("12"),
            ChannelQuery::Number {
                text: "12".to_string(),
                value: Some(12)
            }
        );
        assert_eq!(
            ChannelQuery::parse("1-"),
            ChannelQuery::Text("1-".to_string())
        );
    }

    #[test]
    fn range_search_ignores_active_set() {
        let mut tracker = ChannelTracker::default();
        tracker.toggle(55).expect("toggle");

        let view = tracker.view("50-60");
        assert_eq!(view.matched, (50..=60).collect::<Vec<_>>());
        assert_eq!(view.matched.len(), 11);
        assert!(!view.visible.contains(&55));
        assert_eq!(view.visible.len(), 10);
    }

    #[test]
    fn reversed_range_matches_nothing() {
        let tracker = ChannelTracker::default();
        let view = tracker.view("60-50");
        assert!(view.matched.is_empty());
        assert_eq!(
            view.grid_notice(),
            Some("No channels found matching your search.")
        );
    }

    #[test]
    fn number_search_puts_exact_match_first() {
        let tracker = ChannelTracker::default();
        let found = tracker.view("12").matched;

        assert_eq!(found[0], 12);
        assert_eq!(found.iter().filter(|num| **num == 12).count(), 1);
        assert_eq!(&found[1..5], &[112, 120, 121, 122]);
        assert!(found.contains(&212));
        assert!(found.contains(&412));
        assert!(found.iter().all(|num| num.to_string().contains("12")));

        let expected = (1..=TOTAL_CHANNELS)
            .filter(|num| num.to_string().contains("12"))
            .count();
        assert_eq!(found.len(), expected);
    }

    #[test]
    fn comma_list_matches_exact_members() {
        let tracker = ChannelTracker::default();
        assert_eq!(tracker.view("10, 5,1,999").matched, vec![1, 5, 10]);
    }

    #[test]
    fn text_search_is_substring_match() {
        let tracker = ChannelTracker::default();
        assert!(tracker.view("abc").matched.is_empty());
        assert_eq!(tracker.view("45-").matched, Vec::<u32>::new());
    }

    #[test]
    fn toggling_moves_channel_between_sections() {
        let mut store = MemoryStore::new();
        let mut tracker = ChannelTracker::load(&store, TOTAL_CHANNELS);

        assert!(tracker.toggle(37).expect("toggle on"));
        tracker.save(&mut store).expect("save");
        let view = tracker.view("");
        assert_eq!(view.active, vec![37]);
        assert!(!view.visible.contains(&37));
        assert!(!tracker.view("37").visible.contains(&37));

        let reloaded = ChannelTracker::load(&store, TOTAL_CHANNELS);
        assert!(reloaded.is_active(37));
        assert_eq!(reloaded.active(), tracker.active());

        assert!(!tracker.toggle(37).expect("toggle off"));
        tracker.save(&mut store).expect("save");
        let view = tracker.view("");
        assert!(view.active.is_empty());
        assert!(view.visible.contains(&37));
        assert_eq!(view.active_notice(), Some("No active channels"));
        assert!(!ChannelTracker::load(&store, TOTAL_CHANNELS).is_active(37));
    }

    #[test]
    fn active_section_is_sorted_and_query_independent() {
        let mut tracker = ChannelTracker::default();
        for num in [300, 7, 42] {
            tracker.toggle(num).expect("toggle");
        }
        let view = tracker.view("1-5");
        assert_eq!(view.active, vec![7, 42, 300]);
        assert_eq!(view.visible, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn notices_when_everything_matching_is_active() {
        let mut tracker = ChannelTracker::new(3);
        tracker.toggle(2).expect("toggle");
        assert_eq!(
            tracker.view("2").grid_notice(),
            Some("All matching channels are currently active.")
        );

        tracker.toggle(1).expect("toggle");
        tracker.toggle(3).expect("toggle");
        assert_eq!(
            tracker.view("").grid_notice(),
            Some("All channels are currently active.")
        );
        assert_eq!(tracker.clear_active(), 3);
        assert_eq!(tracker.view("").grid_notice(), None);
    }

    #[test]
    fn rejects_channels_outside_domain() {
        let mut tracker = ChannelTracker::default();
        assert!(tracker.toggle(0).is_err());
        assert!(tracker.toggle(451).is_err());
    }

    #[test]
    fn load_drops_invalid_entries() {
        let mut store = MemoryStore::new();
        store
            .set_item(STORAGE_KEY, "[5, 0, 451, -3, 9]")
            .expect("set");
        let tracker = ChannelTracker::load(&store, TOTAL_CHANNELS);
        assert_eq!(tracker.active(), vec![5, 9]);

        store.set_item(STORAGE_KEY, "not json").expect("set");
        assert!(ChannelTracker::load(&store, TOTAL_CHANNELS).active().is_empty());
    }
}
