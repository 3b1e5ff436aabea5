//! Index-addressable arenas with at-most-once consumption
//!
//! Score blobs and winner labels physically belong to exactly one bracket
//! edge. Instead of removing them from lists, the pipeline marks arena slots
//! as consumed; `consume` refuses a second claim on the same slot.

use crate::pipeline::types::{ScoreEntry, WinnerEntry};
use ordered_float::OrderedFloat;

/// Items plus a consumed flag per slot
#[derive(Debug, Clone, PartialEq)]
pub struct Pool<T> {
    items: Vec<T>,
    consumed: Vec<bool>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            consumed: Vec::new(),
        }
    }
}

impl<T> Pool<T> {
    #[must_use = "pool is created but not used"]
    pub fn new(items: Vec<T>) -> Self {
        let consumed = vec![false; items.len()];
        Self { items, consumed }
    }

    #[inline]
    #[must_use = "returns the slot count"]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use = "returns whether the pool is empty"]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    #[must_use = "returns the item"]
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    #[inline]
    #[must_use = "returns whether the slot is consumed"]
    pub fn is_consumed(&self, idx: usize) -> bool {
        self.consumed.get(idx).copied().unwrap_or(true)
    }

    /// Claim a slot; `false` if it was already claimed or does not exist
    pub fn consume(&mut self, idx: usize) -> bool {
        match self.consumed.get_mut(idx) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    /// Unconsumed items with their indices, in slot order
    pub fn available(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.consumed[*idx])
    }

    #[must_use = "returns the unconsumed count"]
    pub fn remaining(&self) -> usize {
        self.consumed.iter().filter(|c| !**c).count()
    }
}

/// The two arenas every round builder draws from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPools {
    pub labels: Pool<WinnerEntry>,
    pub scores: Pool<ScoreEntry>,
}

impl TokenPools {
    #[must_use = "pools are created but not used"]
    pub fn new(labels: Vec<WinnerEntry>, scores: Vec<ScoreEntry>) -> Self {
        Self {
            labels: Pool::new(labels),
            scores: Pool::new(scores),
        }
    }

    /// Claim the nearest aligned score blob, returning its slot and margins
    pub fn take_score(
        &mut self,
        center: f64,
        tolerance: f64,
        window: Option<ScoreWindow>,
    ) -> Option<(usize, Vec<i32>)> {
        let idx = self.scores.nearest_aligned(center, tolerance, window)?;
        if !self.scores.consume(idx) {
            return None;
        }
        self.scores.get(idx).map(|s| (idx, s.margins.clone()))
    }
}

/// Horizontal window a round's score blobs must start in (inclusive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWindow {
    pub min_x: f64,
    pub max_x: f64,
}

impl ScoreWindow {
    #[inline]
    #[must_use = "window is created but not used"]
    pub const fn new(min_x: f64, max_x: f64) -> Self {
        Self { min_x, max_x }
    }

    #[inline]
    #[must_use = "returns whether x lies in the window"]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.min_x && x <= self.max_x
    }

    #[inline]
    #[must_use = "returns the window midpoint"]
    pub fn midpoint(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }
}

impl Pool<ScoreEntry> {
    /// Nearest unconsumed blob to `center` within `tolerance`
    ///
    /// Only blobs starting inside `window` qualify when one is given. Ties on
    /// vertical distance go to the blob closest to the window midpoint, then
    /// to the shorter blob, then to the lower slot index.
    #[must_use = "returns the chosen score slot"]
    pub fn nearest_aligned(
        &self,
        center: f64,
        tolerance: f64,
        window: Option<ScoreWindow>,
    ) -> Option<usize> {
        let target_x = window.map(|w| w.midpoint());
        self.available()
            .filter(|(_, s)| window.map_or(true, |w| w.contains(s.x0)))
            .filter(|(_, s)| (s.center - center).abs() <= tolerance)
            .min_by_key(|&(idx, s)| {
                let dy = OrderedFloat((s.center - center).abs());
                let dx = OrderedFloat(target_x.map_or(0.0, |t| (s.x0 - t).abs()));
                (dy, dx, s.margins.len(), idx)
            })
            .map(|(idx, _)| idx)
    }
}

impl Pool<WinnerEntry> {
    /// Nearest unconsumed label among `candidates` within `tolerance`
    ///
    /// Ties go to the right-most label, then to an emphasised one, then to
    /// the lower slot index.
    #[must_use = "returns the chosen label slot"]
    pub fn nearest_label(&self, center: f64, tolerance: f64, candidates: &[usize]) -> Option<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&idx| !self.is_consumed(idx))
            .filter_map(|idx| self.get(idx).map(|w| (idx, w)))
            .map(|(idx, w)| (idx, (w.center - center).abs(), w.x, w.emphasized))
            .filter(|(_, dy, _, _)| *dy <= tolerance)
            .min_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then(b.2.total_cmp(&a.2))
                    .then(b.3.cmp(&a.3))
                    .then(a.0.cmp(&b.0))
            })
            .map(|(idx, ..)| idx)
    }
}
