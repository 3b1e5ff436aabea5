/// Stage 3: Round Allocation
///
/// Maps winner-label columns to bracket rounds.
///
/// Algorithm:
/// 1. Tree size: the authoritative value rounded up to a power of two, or the
///    smallest power of two (capped) with `tree_size - 1 >= label count`
/// 2. Expected matches per round: tree_size/2, tree_size/4, ... 1
/// 3. Small brackets: one physical column per round
/// 4. Large brackets (tree_size >= 64): columns collapse visually, so labels are
///    consumed column by column until each round's expected count is met. A
///    column holding more labels than a round needs is split by taking, for each
///    pair of the previous round, the label nearest to the pair's midpoint.
use crate::pipeline::stage02_column_banding::ColumnBand;
use crate::pipeline::types::WinnerEntry;
use serde::{Deserialize, Serialize};

/// Configuration for Stage 3 (Round Allocation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage03Config {
    /// Upper bound for an inferred tree size
    pub max_inferred_tree_size: usize,
    /// Tree size from which collapsed columns are re-split
    pub collapse_min_tree_size: usize,
}

impl Default for Stage03Config {
    #[inline]
    fn default() -> Self {
        Self {
            max_inferred_tree_size: 512,
            collapse_min_tree_size: 64,
        }
    }
}

/// Label chunks per round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundPlan {
    pub tree_size: usize,
    /// `tree_size` was inferred from the label count
    pub inferred: bool,
    /// Label indices per round, each chunk sorted by vertical center
    pub rounds: Vec<Vec<usize>>,
}

/// tree_size/2, tree_size/4, ... 1
#[must_use = "returns the expected match counts"]
pub fn expected_match_counts(tree_size: usize) -> Vec<usize> {
    let mut counts = Vec::new();
    let mut size = tree_size;
    while size >= 2 {
        size /= 2;
        counts.push(size);
    }
    counts
}

/// Smallest power of two `>= 2` with `tree_size - 1 >= label_count`, capped
#[must_use = "returns the inferred tree size"]
pub fn infer_tree_size(label_count: usize, cap: usize) -> usize {
    let mut tree_size = 2;
    while tree_size - 1 < label_count && tree_size < cap {
        tree_size *= 2;
    }
    tree_size
}

fn sort_chunk(chunk: &mut [usize], labels: &[WinnerEntry]) {
    chunk.sort_by(|&a, &b| {
        labels[a]
            .center
            .total_cmp(&labels[b].center)
            .then(labels[a].x.total_cmp(&labels[b].x))
            .then(a.cmp(&b))
    });
}

/// Stage 3: Round Allocator
///
/// Input: winner labels, their column bands, optional tree size
/// Output: `RoundPlan`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stage03RoundAllocator {
    config: Stage03Config,
}

impl Stage03RoundAllocator {
    /// Create a new `Stage03RoundAllocator` with default configuration
    #[inline]
    #[must_use = "round allocator stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage03Config::default(),
        }
    }

    /// Create a new `Stage03RoundAllocator` with custom configuration
    #[inline]
    #[must_use = "round allocator stage is created but not used"]
    pub const fn with_config(config: Stage03Config) -> Self {
        Self { config }
    }

    /// Allocate label chunks to rounds
    #[must_use = "round plan is returned but not used"]
    pub fn process(
        &self,
        labels: &[WinnerEntry],
        bands: &[ColumnBand],
        tree_size: Option<usize>,
    ) -> RoundPlan {
        let (tree_size, inferred) = match tree_size.filter(|&t| t >= 2) {
            Some(t) => (t.next_power_of_two(), false),
            None => (
                infer_tree_size(labels.len(), self.config.max_inferred_tree_size),
                true,
            ),
        };

        let band_chunks: Vec<Vec<usize>> = bands
            .iter()
            .map(|band| {
                let mut chunk: Vec<usize> = labels
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| band.contains(l.x))
                    .map(|(idx, _)| idx)
                    .collect();
                sort_chunk(&mut chunk, labels);
                chunk
            })
            .filter(|chunk| !chunk.is_empty())
            .collect();

        let rounds = if tree_size >= self.config.collapse_min_tree_size {
            Self::allocate_collapsed(labels, band_chunks, tree_size)
        } else {
            band_chunks
        };

        log::debug!(
            "Stage 3: tree_size={} (inferred={}), {} label chunks: {:?}",
            tree_size,
            inferred,
            rounds.len(),
            rounds.iter().map(Vec::len).collect::<Vec<_>>()
        );

        RoundPlan {
            tree_size,
            inferred,
            rounds,
        }
    }

    fn allocate_collapsed(
        labels: &[WinnerEntry],
        mut band_chunks: Vec<Vec<usize>>,
        tree_size: usize,
    ) -> Vec<Vec<usize>> {
        let mut rounds: Vec<Vec<usize>> = Vec::new();
        let mut band_idx = 0;
        for expected in expected_match_counts(tree_size) {
            let mut current: Vec<usize> = Vec::new();
            while current.len() < expected && band_idx < band_chunks.len() {
                let need = expected - current.len();
                let entries = &band_chunks[band_idx];

                if current.is_empty() && entries.len() > expected {
                    if let Some(previous) = rounds.last() {
                        if let Some((chosen, rest)) =
                            Self::align_to_previous(labels, previous, entries, expected)
                        {
                            log::trace!(
                                "Stage 3: split column {band_idx} by alignment ({} of {})",
                                chosen.len(),
                                entries.len()
                            );
                            current = chosen;
                            band_chunks[band_idx] = rest;
                            continue;
                        }
                    }
                }

                if entries.len() <= need {
                    current.extend_from_slice(entries);
                    band_idx += 1;
                } else {
                    let rest = band_chunks[band_idx].split_off(need);
                    current.append(&mut band_chunks[band_idx]);
                    band_chunks[band_idx] = rest;
                }
            }
            rounds.push(current);
        }
        rounds
    }

    /// Pick, for each pair of the previous round, the entry nearest to the pair
    /// midpoint. `None` unless exactly `expected` entries were chosen.
    fn align_to_previous(
        labels: &[WinnerEntry],
        previous: &[usize],
        entries: &[usize],
        expected: usize,
    ) -> Option<(Vec<usize>, Vec<usize>)> {
        let targets: Vec<f64> = previous
            .chunks_exact(2)
            .map(|pair| (labels[pair[0]].center + labels[pair[1]].center) / 2.0)
            .take(expected)
            .collect();
        if targets.is_empty() {
            return None;
        }
        let mut candidates = entries.to_vec();
        let mut chosen = Vec::with_capacity(expected);
        for target in targets {
            let Some(pos) = candidates
                .iter()
                .enumerate()
                .min_by(|&(_, &a), &(_, &b)| {
                    (labels[a].center - target)
                        .abs()
                        .total_cmp(&(labels[b].center - target).abs())
                })
                .map(|(pos, _)| pos)
            else {
                break;
            };
            chosen.push(candidates.remove(pos));
        }
        if chosen.len() != expected {
            return None;
        }
        sort_chunk(&mut chosen, labels);
        Some((chosen, candidates))
    }
}
