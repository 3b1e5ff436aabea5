/// Stage 2: Column Banding
///
/// Groups x-positions into contiguous horizontal bands (bracket columns).
///
/// Algorithm:
/// 1. Sort the x-positions
/// 2. Start a new band whenever the gap to the previous x exceeds `max_gap`
/// 3. Return the (start, end) bands left to right
///
/// Winner-label x-positions and score-blob x-positions are banded
/// independently: a round's labels and its scores occupy two adjacent but
/// distinct bands.
use serde::{Deserialize, Serialize};

/// Configuration for Stage 2 (Column Banding)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage02Config {
    /// Largest x gap inside one band
    pub max_gap: f64,
}

impl Default for Stage02Config {
    #[inline]
    fn default() -> Self {
        Self { max_gap: 25.0 }
    }
}

/// Contiguous horizontal range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnBand {
    pub start: f64,
    pub end: f64,
}

impl ColumnBand {
    #[inline]
    #[must_use = "band is created but not used"]
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[inline]
    #[must_use = "returns whether x lies in the band"]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.start && x <= self.end
    }

    #[inline]
    #[must_use = "returns the band center"]
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    #[inline]
    #[must_use = "returns whether the bands overlap"]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Band padded by `padding` on both sides
    #[inline]
    #[must_use = "returns the padded band"]
    pub fn padded(&self, padding: f64) -> Self {
        Self::new(self.start - padding, self.end + padding)
    }
}

/// Closest score band right of a winner band
///
/// Candidates are the score bands starting right of `winner.start`; the one
/// with the smallest `start - winner.end` wins. When the next round's labels
/// sit in their own column further right, bands starting at or past that
/// column belong to a later round and are skipped. Without candidates the
/// fallback is `(winner.end, winner.end + fallback_width)`.
#[must_use = "returns the chosen score band"]
pub fn closest_score_band(
    score_bands: &[ColumnBand],
    winner: ColumnBand,
    next_winner: Option<ColumnBand>,
    fallback_width: f64,
) -> ColumnBand {
    let limit = next_winner
        .map(|next| next.start)
        .filter(|&start| start > winner.end);
    score_bands
        .iter()
        .copied()
        .filter(|sb| sb.start > winner.start)
        .filter(|sb| limit.map_or(true, |l| sb.start < l))
        .min_by(|a, b| (a.start - winner.end).total_cmp(&(b.start - winner.end)))
        .unwrap_or_else(|| ColumnBand::new(winner.end, winner.end + fallback_width))
}

/// Index of the band whose center is nearest to `x`
#[must_use = "returns the nearest band index"]
pub fn nearest_band_index(bands: &[ColumnBand], x: f64) -> Option<usize> {
    bands
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.center() - x).abs().total_cmp(&(b.center() - x).abs()))
        .map(|(idx, _)| idx)
}

/// Stage 2: Column Bander
///
/// Input: x-positions in any order
/// Output: `Vec<ColumnBand>` sorted left to right
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage02ColumnBander {
    config: Stage02Config,
}

impl Stage02ColumnBander {
    /// Create a new `Stage02ColumnBander` with default configuration
    #[inline]
    #[must_use = "column bander stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage02Config::default(),
        }
    }

    /// Create a new `Stage02ColumnBander` with custom configuration
    #[inline]
    #[must_use = "column bander stage is created but not used"]
    pub const fn with_config(config: Stage02Config) -> Self {
        Self { config }
    }

    /// Cluster x-positions into bands
    #[must_use = "bands are returned but not used"]
    pub fn process(&self, xs: &[f64]) -> Vec<ColumnBand> {
        let mut sorted: Vec<f64> = xs.iter().copied().filter(|x| x.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        let mut bands: Vec<ColumnBand> = Vec::new();
        for x in sorted {
            match bands.last_mut() {
                Some(band) if x - band.end <= self.config.max_gap => band.end = x,
                _ => bands.push(ColumnBand::new(x, x)),
            }
        }

        log::trace!(
            "Stage 2: {} positions -> {} bands (max_gap={})",
            xs.len(),
            bands.len(),
            self.config.max_gap
        );
        bands
    }
}
