//! Sequence-gap detection.
//!
//! Live events carry a strictly increasing sequence number. A jump forward
//! means notifications were lost; the missing range is remembered so a late
//! arrival inside it can be told apart from a plain replay. Anything at or
//! below the last number seen is never applied: the gap already staled the
//! chunk, and its reload from files covers the missing range.
//!
//! | Arrival `S`            | Verdict     | Applied |
//! |------------------------|-------------|---------|
//! | first ever             | `First`     | yes     |
//! | `last + 1`             | `InOrder`   | yes     |
//! | `> last + 1`           | `Gap`       | yes     |
//! | `<= last`, was missing | `LateFill`  | no      |
//! | `<= last`, otherwise   | `Duplicate` | no      |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Most missing ranges remembered per stream. Older ranges are forgotten
/// and late arrivals in them count as duplicates.
const MAX_OPEN_RANGES: usize = 1024;

/// Which events share a sequence counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceScope {
    /// One counter across every event type.
    #[default]
    Global,
    /// One counter per `event_type`.
    PerTopic,
}

/// An inclusive range of missing sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapRange {
    /// First missing number.
    pub start: u64,
    /// Last missing number.
    pub end: u64,
}

impl GapRange {
    /// Whether `seq` lies in the range.
    pub const fn contains(&self, seq: u64) -> bool {
        self.start <= seq && seq <= self.end
    }

    /// Number of missing sequence numbers.
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Always `false`; a gap spans at least one number.
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Classification of one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// The first sequence seen on the stream.
    First,
    /// Exactly the next expected number.
    InOrder,
    /// Numbers were skipped.
    Gap(GapRange),
    /// A previously missing number arrived after newer ones. Counted, not
    /// applied.
    LateFill,
    /// Already seen, or too old to tell.
    Duplicate,
}

impl SequenceVerdict {
    /// Whether the operation carrying this sequence should be applied.
    pub const fn should_apply(self) -> bool {
        matches!(self, Self::First | Self::InOrder | Self::Gap(_))
    }
}

#[derive(Debug, Default)]
struct Stream {
    last: Option<u64>,
    /// Sorted, non-overlapping.
    missing: Vec<GapRange>,
}

impl Stream {
    fn observe(&mut self, seq: u64) -> SequenceVerdict {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SequenceVerdict::First;
        };

        if seq > last {
            self.last = Some(seq);
            let expected = last.saturating_add(1);
            if seq == expected {
                return SequenceVerdict::InOrder;
            }
            let gap = GapRange {
                start: expected,
                end: seq.saturating_sub(1),
            };
            self.missing.push(gap);
            if self.missing.len() > MAX_OPEN_RANGES {
                self.missing.remove(0);
            }
            return SequenceVerdict::Gap(gap);
        }

        if self.fill(seq) {
            SequenceVerdict::LateFill
        } else {
            SequenceVerdict::Duplicate
        }
    }

    fn fill(&mut self, seq: u64) -> bool {
        let Some(pos) = self.missing.iter().position(|r| r.contains(seq)) else {
            return false;
        };
        let range = self.missing.remove(pos);
        let mut insert_at = pos;
        if range.start < seq {
            self.missing.insert(
                insert_at,
                GapRange {
                    start: range.start,
                    end: seq.saturating_sub(1),
                },
            );
            insert_at = insert_at.saturating_add(1);
        }
        if seq < range.end {
            self.missing.insert(
                insert_at,
                GapRange {
                    start: seq.saturating_add(1),
                    end: range.end,
                },
            );
        }
        true
    }
}

/// Per-scope sequence bookkeeping. Owned by the engine writer.
#[derive(Debug)]
pub struct SequenceTracker {
    scope: SequenceScope,
    streams: HashMap<String, Stream>,
}

impl SequenceTracker {
    /// Create a tracker for `scope`.
    pub fn new(scope: SequenceScope) -> Self {
        Self {
            scope,
            streams: HashMap::new(),
        }
    }

    /// The configured scope.
    pub const fn scope(&self) -> SequenceScope {
        self.scope
    }

    fn stream_key<'a>(&self, topic: &'a str) -> &'a str {
        match self.scope {
            SequenceScope::Global => "",
            SequenceScope::PerTopic => topic,
        }
    }

    /// Classify `seq` arriving on `topic`.
    pub fn observe(&mut self, topic: &str, seq: u64) -> SequenceVerdict {
        let key = self.stream_key(topic);
        self.streams.entry(key.to_owned()).or_default().observe(seq)
    }

    /// Highest sequence seen on `topic`'s stream.
    pub fn last_seen(&self, topic: &str) -> Option<u64> {
        self.streams.get(self.stream_key(topic)).and_then(|s| s.last)
    }

    /// Ranges still missing on `topic`'s stream.
    pub fn missing(&self, topic: &str) -> Vec<GapRange> {
        self.streams
            .get(self.stream_key(topic))
            .map(|s| s.missing.clone())
            .unwrap_or_default()
    }

    /// Total number of sequence numbers still missing across all streams.
    pub fn outstanding(&self) -> u64 {
        self.streams
            .values()
            .flat_map(|s| s.missing.iter())
            .fold(0_u64, |acc, r| acc.saturating_add(r.len()))
    }

    /// Forget every stream.
    pub fn reset(&mut self) {
        self.streams.clear();
    }
}
