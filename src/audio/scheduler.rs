//! Queue ordering: what plays next.
//!
//! The entry vector is always kept in the order the user gave it. Shuffle
//! never reorders it; it owns a permutation of entry indices plus a cursor
//! pointing at the entry that is playing now.

use std::ops::Range;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::library::Track;

use super::error::{PlayerError, Result};
use super::types::RepeatMode;

/// Identity of one queue slot. Two entries for the same file differ.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: EntryId,
    pub track: Arc<Track>,
}

#[derive(Debug, Clone)]
struct ShuffleOrder {
    order: Vec<usize>,
    /// Position in `order` of the current entry; `None` before anything played.
    cursor: Option<usize>,
}

pub struct Scheduler {
    entries: Vec<QueueEntry>,
    current: Option<usize>,
    shuffle: Option<ShuffleOrder>,
    repeat: RepeatMode,
    next_id: u64,
    rng: StdRng,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic shuffles, for tests and reproducible sessions.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            shuffle: None,
            repeat: RepeatMode::Off,
            next_id: 0,
            rng,
        }
    }

    fn make_entry(&mut self, track: Arc<Track>) -> QueueEntry {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        QueueEntry { id, track }
    }

    /// Fisher-Yates over every index, then `pin` is moved to the front by
    /// removal and insertion so the rest keep their random relative order.
    fn shuffled(&mut self, pin: Option<usize>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.shuffle(&mut self.rng);
        if let Some(p) = pin {
            if let Some(pos) = order.iter().position(|&i| i == p) {
                order.remove(pos);
                order.insert(0, p);
            }
        }
        order
    }

    fn reshuffle_pinned(&mut self) {
        let order = self.shuffled(self.current);
        self.shuffle = Some(ShuffleOrder {
            order,
            cursor: self.current.map(|_| 0),
        });
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_entry(&self) -> Option<&QueueEntry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle.is_some()
    }

    /// The shuffle permutation, when shuffle is on.
    #[cfg(test)]
    pub fn shuffle_order(&self) -> Option<&[usize]> {
        self.shuffle.as_ref().map(|s| s.order.as_slice())
    }

    /// Replace the whole queue and make `start` current. Rejected without any
    /// change when `tracks` is empty or `start` is out of range.
    pub fn set_queue(&mut self, tracks: Vec<Arc<Track>>, start: usize) -> Result<()> {
        if tracks.is_empty() {
            return Err(PlayerError::QueueEmpty);
        }
        if start >= tracks.len() {
            return Err(PlayerError::IndexOutOfRange {
                index: start,
                len: tracks.len(),
            });
        }
        let entries: Vec<QueueEntry> = tracks.into_iter().map(|t| self.make_entry(t)).collect();
        self.entries = entries;
        self.current = Some(start);
        if self.shuffle.is_some() {
            self.reshuffle_pinned();
        }
        debug!(len = self.entries.len(), start, "queue replaced");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
        if let Some(s) = self.shuffle.as_mut() {
            s.order.clear();
            s.cursor = None;
        }
    }

    /// Insert right after the current entry; it becomes the next stop in
    /// either mode. Returns the new entry's index.
    pub fn insert_next(&mut self, track: Arc<Track>) -> usize {
        let at = self.current.map_or(0, |c| c + 1);
        let entry = self.make_entry(track);
        self.entries.insert(at, entry);

        if let Some(s) = self.shuffle.as_mut() {
            for i in s.order.iter_mut() {
                if *i >= at {
                    *i += 1;
                }
            }
            let slot = s.cursor.map_or(0, |c| c + 1);
            s.order.insert(slot, at);
        }
        at
    }

    /// Add to the tail. In shuffle mode the new indices go to the tail of the
    /// permutation, after everything already scheduled.
    pub fn append(&mut self, tracks: Vec<Arc<Track>>) -> Range<usize> {
        let start = self.entries.len();
        for t in tracks {
            let entry = self.make_entry(t);
            self.entries.push(entry);
        }
        let end = self.entries.len();
        if let Some(s) = self.shuffle.as_mut() {
            s.order.extend(start..end);
        }
        start..end
    }

    /// Remove a non-current entry, keeping `current` on the same track.
    pub fn remove_at(&mut self, index: usize) -> Result<QueueEntry> {
        if index >= self.entries.len() {
            return Err(PlayerError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        if self.current == Some(index) {
            return Err(PlayerError::RemoveCurrent);
        }

        let removed = self.entries.remove(index);
        if let Some(c) = self.current.as_mut() {
            if *c > index {
                *c -= 1;
            }
        }
        if let Some(s) = self.shuffle.as_mut() {
            if let Some(pos) = s.order.iter().position(|&i| i == index) {
                s.order.remove(pos);
                if let Some(cur) = s.cursor.as_mut() {
                    if pos < *cur {
                        *cur -= 1;
                    }
                }
            }
            for i in s.order.iter_mut() {
                if *i > index {
                    *i -= 1;
                }
            }
        }
        Ok(removed)
    }

    /// Make `index` current directly. In shuffle mode it is moved to the slot
    /// after the cursor so the unvisited remainder stays as it was.
    pub fn jump_to(&mut self, index: usize) -> Result<QueueEntry> {
        let entry = self
            .entries
            .get(index)
            .cloned()
            .ok_or(PlayerError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        if self.current == Some(index) {
            return Ok(entry);
        }

        if let Some(s) = self.shuffle.as_mut() {
            if let Some(pos) = s.order.iter().position(|&i| i == index) {
                s.order.remove(pos);
                let cursor = s.cursor.map(|c| if pos < c { c - 1 } else { c });
                let slot = cursor.map_or(0, |c| c + 1);
                s.order.insert(slot, index);
                s.cursor = Some(slot);
            }
        }
        self.current = Some(index);
        Ok(entry)
    }

    /// Next entry after a natural end of playback. Repeat-one keeps the
    /// current entry.
    pub fn resolve_next(&mut self) -> Option<QueueEntry> {
        if self.repeat == RepeatMode::One {
            if let Some(entry) = self.current_entry() {
                return Some(entry.clone());
            }
        }
        self.advance(self.repeat == RepeatMode::All)
    }

    /// The entry a natural end would move to, without moving. `None` when
    /// playback would stop, or when the next lap's shuffle is not drawn yet.
    pub fn peek_next(&self) -> Option<&QueueEntry> {
        if self.repeat == RepeatMode::One {
            return self.current_entry();
        }
        let wrap = self.repeat == RepeatMode::All;
        let index = match self.shuffle.as_ref() {
            None => {
                let candidate = self.current.map_or(0, |c| c + 1);
                if candidate < self.entries.len() {
                    Some(candidate)
                } else {
                    wrap.then_some(0)
                }
            }
            Some(s) => s.order.get(s.cursor.map_or(0, |c| c + 1)).copied(),
        };
        index.and_then(|i| self.entries.get(i))
    }

    /// Next entry for an explicit skip. Repeat-one does not hold it back.
    pub fn resolve_next_manual(&mut self) -> Option<QueueEntry> {
        self.advance(self.repeat == RepeatMode::All)
    }

    fn advance(&mut self, wrap: bool) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            return None;
        }

        let next = match self.shuffle.as_ref() {
            None => {
                let candidate = self.current.map_or(0, |c| c + 1);
                if candidate < self.entries.len() {
                    candidate
                } else if wrap {
                    0
                } else {
                    return None;
                }
            }
            Some(s) => {
                let candidate = s.cursor.map_or(0, |c| c + 1);
                if candidate < s.order.len() {
                    self.set_cursor(candidate)
                } else if wrap {
                    self.start_new_cycle();
                    self.set_cursor(0)
                } else {
                    return None;
                }
            }
        };

        self.current = Some(next);
        self.entries.get(next).cloned()
    }

    fn set_cursor(&mut self, cursor: usize) -> usize {
        match self.shuffle.as_mut() {
            Some(s) => {
                s.cursor = Some(cursor);
                s.order[cursor]
            }
            None => cursor,
        }
    }

    /// Fresh permutation for another lap under repeat-all. The entry that just
    /// finished goes last so it is not heard twice in a row.
    fn start_new_cycle(&mut self) {
        let mut order = self.shuffled(None);
        if let Some(c) = self.current {
            if order.len() > 1 {
                if let Some(pos) = order.iter().position(|&i| i == c) {
                    order.remove(pos);
                    order.push(c);
                }
            }
        }
        debug!("reshuffled for a new cycle");
        self.shuffle = Some(ShuffleOrder {
            order,
            cursor: None,
        });
    }

    /// Previous entry. Never honours repeat-one; wraps only under repeat-all.
    /// `None` at the head means the caller should restart the current track.
    pub fn resolve_prev(&mut self) -> Option<QueueEntry> {
        let wrap = self.repeat == RepeatMode::All;
        let prev = match self.shuffle.as_ref() {
            None => match self.current? {
                0 if wrap => self.entries.len().checked_sub(1)?,
                0 => return None,
                c => c - 1,
            },
            Some(s) => {
                let cursor = match s.cursor? {
                    0 if wrap => s.order.len().checked_sub(1)?,
                    0 => return None,
                    c => c - 1,
                };
                self.set_cursor(cursor)
            }
        };
        self.current = Some(prev);
        self.entries.get(prev).cloned()
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = !self.shuffle_enabled();
        self.set_shuffle(enabled);
        enabled
    }

    /// Turning shuffle on pins the current entry first. Turning it off finds
    /// the current entry again by identity in the plain order.
    pub fn set_shuffle(&mut self, enabled: bool) {
        match (enabled, self.shuffle.is_some()) {
            (true, false) => self.reshuffle_pinned(),
            (false, true) => {
                let id = self.current_entry().map(|e| e.id);
                self.shuffle = None;
                self.current = id.and_then(|id| self.entries.iter().position(|e| e.id == id));
            }
            _ => {}
        }
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycled();
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }
}
