//! Event derivation engine.
//!
//! Turns a stream of snapshots into an ordered, deduplicated event stream.
//! Per snapshot:
//!
//! 1. Calibrate the server clock from the newest log line's age.
//! 2. Turn new raw log lines into candidates (kills, chat, joins, matches).
//! 3. Diff against the retained snapshot (membership, team/unit/role, alive).
//! 4. Drop candidates equivalent to an already emitted event: same dedup key
//!    and timestamps within the tolerance window. Raw-feed candidates are
//!    considered first, so when both sources saw the same occurrence the
//!    richer raw one survives.
//! 5. Order by timestamp, ties by variant priority, clamped so the stream
//!    never goes backwards, and assign sequence numbers.
//!
//! The retained snapshot is the only per-connection state besides the dedup
//! window, so memory stays bounded regardless of session length. It survives
//! gaps of any length: the first snapshot after an outage is diffed against
//! the last good one, so departures and arrivals during the outage still
//! show up.
//!
//! A capture that continues an existing log calls
//! [`DerivationEngine::resume`] first, so sequence numbers carry on and
//! admin-log lines already recorded are not recorded again.

pub mod clock;
pub mod diff;
pub mod merge;

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    env::span,
    event::{DedupKey, Event, EventKind},
    snapshot::Snapshot,
};
use clock::ClockCalibration;

/// Default window within which equivalent events are merged.
pub const DEFAULT_DEDUP_TOLERANCE: Duration = Duration::from_secs(2);

/// Default age after which emitted events are forgotten by dedup.
pub const DEFAULT_DEDUP_HORIZON: Duration = Duration::from_secs(5 * 60);

/// Derivation configuration
#[derive(Debug, Clone)]
pub struct DerivationConfig {
    /// Equivalent events closer than this are merged
    pub dedup_tolerance: Duration,
    /// How long emitted events are remembered for dedup
    pub dedup_horizon: Duration,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self { dedup_tolerance: DEFAULT_DEDUP_TOLERANCE, dedup_horizon: DEFAULT_DEDUP_HORIZON }
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    /// Admin-log line
    RawFeed,
    /// Snapshot diff
    Snapshot,
}

/// Event before ordering and dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Unclamped timestamp
    pub timestamp: DateTime<Utc>,
    /// Payload
    pub kind: EventKind,
    /// Origin
    pub source: Source,
}

/// Recently emitted dedup keys with their (unclamped) timestamps.
#[derive(Debug, Clone, Default)]
struct DedupWindow {
    seen: HashMap<DedupKey, VecDeque<DateTime<Utc>>>,
}

impl DedupWindow {
    fn is_duplicate(&self, key: &DedupKey, at: DateTime<Utc>, tolerance: TimeDelta) -> bool {
        self.seen
            .get(key)
            .is_some_and(|times| times.iter().any(|t| (*t - at).abs() <= tolerance))
    }

    fn record(&mut self, key: DedupKey, at: DateTime<Utc>) {
        self.seen.entry(key).or_default().push_back(at);
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.seen.retain(|_, times| {
            times.retain(|t| *t >= cutoff);
            !times.is_empty()
        });
    }

    fn len(&self) -> usize {
        self.seen.values().map(VecDeque::len).sum()
    }
}

/// Snapshot-to-event derivation for one server.
#[derive(Debug, Clone)]
pub struct DerivationEngine {
    config: DerivationConfig,
    previous: Option<Snapshot>,
    clock: ClockCalibration,
    dedup: DedupWindow,
    /// Timestamp and priority of the last emitted event
    watermark: Option<(DateTime<Utc>, u8)>,
    next_seq: u64,
    /// Raw lines older than this (less the dedup tolerance) are ignored
    raw_floor: Option<DateTime<Utc>>,
}

impl DerivationEngine {
    /// Engine with no retained snapshot.
    pub fn new(config: DerivationConfig) -> Self {
        Self {
            config,
            previous: None,
            clock: ClockCalibration::new(),
            dedup: DedupWindow::default(),
            watermark: None,
            next_seq: 0,
            raw_floor: None,
        }
    }

    /// Continue a log whose most recent stored events are `tail` (in order),
    /// for a session that began recording at `since`.
    ///
    /// Sequence numbers and the ordering watermark carry on from the last
    /// stored event and the stored events seed the dedup window. Admin-log
    /// lines older than both `since` and the stored tail are ignored, since
    /// the fetch window reaches back before either.
    pub fn resume(&mut self, since: Option<DateTime<Utc>>, tail: &[Event]) {
        for event in tail {
            self.dedup.record(event.kind.dedup_key(), event.timestamp);
        }
        let last = tail.last();
        if let Some(last) = last {
            self.watermark = Some((last.timestamp, last.kind.priority()));
            self.next_seq = self.next_seq.max(last.seq.saturating_add(1));
        }
        self.raw_floor = match (since, last.map(|e| e.timestamp)) {
            (Some(start), Some(stored)) => Some(start.max(stored)),
            (start, stored) => start.or(stored),
        };
        tracing::debug!(
            seeded = tail.len(),
            next_seq = self.next_seq,
            floor = ?self.raw_floor,
            "derivation resumed"
        );
    }

    /// The retained snapshot.
    pub fn current(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    /// Sequence number the next event will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Number of emitted events still remembered for dedup.
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    /// Process a new snapshot and return the events it implies, in order.
    ///
    /// The first snapshot is a baseline: its roster is retained but yields no
    /// membership events, since nobody was observed joining. Its log lines
    /// are still processed.
    pub fn ingest(&mut self, snapshot: Snapshot) -> Vec<Event> {
        if let Some(server_now) = snapshot
            .log
            .iter()
            .filter(|raw| raw.line.age_ms.is_some())
            .min_by_key(|raw| raw.line.age_ms)
            .and_then(|raw| raw.line.server_now_ms())
        {
            self.clock.observe(server_now, snapshot.taken_at);
        }

        let tolerance = span(self.config.dedup_tolerance);
        let mut candidates = merge::raw_candidates(&snapshot.log, &self.clock, &snapshot);
        if let Some(floor) = self.raw_floor {
            let cutoff = floor.checked_sub_signed(tolerance).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let before = candidates.len();
            candidates.retain(|c| c.timestamp >= cutoff);
            if candidates.len() < before {
                tracing::trace!(dropped = before - candidates.len(), "ignoring admin-log lines older than the log");
            }
        }
        if let Some(previous) = &self.previous {
            candidates.extend(diff::diff(previous, &snapshot));
        }

        candidates.sort_by_key(|c| c.source);
        let mut survivors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = candidate.kind.dedup_key();
            if self.dedup.is_duplicate(&key, candidate.timestamp, tolerance) {
                tracing::trace!(kind = candidate.kind.name(), "dropping duplicate event");
                continue;
            }
            self.dedup.record(key, candidate.timestamp);
            survivors.push(candidate);
        }

        let events = self.order(survivors);

        let cutoff = snapshot
            .taken_at
            .checked_sub_signed(span(self.config.dedup_horizon))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.dedup.prune(cutoff);
        self.previous = Some(snapshot);
        events
    }

    /// Emit a single event outside the snapshot cycle (rule notes).
    ///
    /// Bypasses dedup but goes through the same ordering clamp.
    pub fn annotate(&mut self, at: DateTime<Utc>, kind: EventKind) -> Event {
        let ts = self.watermark.map_or(at, |(floor, _)| at.max(floor));
        let priority = kind.priority();
        self.stamp(ts, priority, kind)
    }

    fn order(&mut self, candidates: Vec<Candidate>) -> Vec<Event> {
        let floor = self.watermark.map(|(ts, _)| ts);
        let mut staged: Vec<(DateTime<Utc>, u8, EventKind)> = candidates
            .into_iter()
            .map(|c| {
                let ts = floor.map_or(c.timestamp, |f| c.timestamp.max(f));
                (ts, c.kind.priority(), c.kind)
            })
            .collect();
        staged.sort_by_key(|(ts, priority, _)| (*ts, *priority));

        staged.into_iter().map(|(ts, priority, kind)| self.stamp(ts, priority, kind)).collect()
    }

    /// Assign the next sequence number, nudging `ts` so `(ts, priority)`
    /// never sorts before the previous event.
    fn stamp(&mut self, mut ts: DateTime<Utc>, priority: u8, kind: EventKind) -> Event {
        if let Some((last_ts, last_priority)) = self.watermark {
            if ts < last_ts {
                ts = last_ts;
            }
            if ts == last_ts && priority < last_priority {
                ts += TimeDelta::microseconds(1);
            }
        }
        self.watermark = Some((ts, priority));

        let seq = self.next_seq;
        self.next_seq += 1;
        Event { timestamp: ts, seq, kind }
    }
}
