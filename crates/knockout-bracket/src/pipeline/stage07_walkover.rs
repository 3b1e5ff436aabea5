/// Stage 7: Walkover Resolution
///
/// Marks matches decided without play.
///
/// Algorithm:
/// 1. Vertical tolerance: `max(min_tol, min(max_tol, median match gap × factor))`
/// 2. Each walkover marker targets the round whose score column is nearest
///    horizontally; without a hit there, any round is searched
/// 3. The nearest unscored contested match within the vertical tolerance whose
///    participant x-range lies within `horizontal_tolerance` of the marker is
///    marked. A marker code naming a participant fills the winner
/// 4. Small brackets (`tree_size <= small_bracket_max_tree_size`) with any
///    marker present: every unscored contested first-round match is a walkover
///
/// Tiny brackets with a double-walkover token (at most four entrants) are not
/// laid out like regular brackets; `build_tiny_bracket` builds them directly.
use crate::pipeline::names::resolve_label;
use crate::pipeline::pool::TokenPools;
use crate::pipeline::stage02_column_banding::{nearest_band_index, ColumnBand};
use crate::pipeline::types::{EntrantLine, LabelId, Match, Round, ScoreId, WalkoverMarker};
use serde::{Deserialize, Serialize};

/// Configuration for Stage 7 (Walkover Resolution)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage07Config {
    pub min_vertical_tolerance: f64,
    pub max_vertical_tolerance: f64,
    /// Vertical tolerance = median match gap × factor (clamped)
    pub spacing_factor: f64,
    /// Marker distance to the participants' x-range
    pub horizontal_tolerance: f64,
    pub small_bracket_max_tree_size: usize,
    pub tiny_max_entrants: usize,
    pub tiny_label_tolerance: f64,
    pub tiny_score_tolerance: f64,
    pub tiny_marker_tolerance: f64,
}

impl Default for Stage07Config {
    #[inline]
    fn default() -> Self {
        Self {
            min_vertical_tolerance: 18.0,
            max_vertical_tolerance: 28.0,
            spacing_factor: 1.2,
            horizontal_tolerance: 320.0,
            small_bracket_max_tree_size: 16,
            tiny_max_entrants: 4,
            tiny_label_tolerance: 80.0,
            tiny_score_tolerance: 80.0,
            tiny_marker_tolerance: 30.0,
        }
    }
}

/// Stage 7: Walkover Resolver
///
/// Input: rounds, walkover markers, per-round score columns, entrant arena
/// Output: number of matches marked; rounds are updated in place
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage07WalkoverResolver {
    config: Stage07Config,
}

impl Stage07WalkoverResolver {
    /// Create a new `Stage07WalkoverResolver` with default configuration
    #[inline]
    #[must_use = "walkover resolver stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage07Config::default(),
        }
    }

    /// Create a new `Stage07WalkoverResolver` with custom configuration
    #[inline]
    #[must_use = "walkover resolver stage is created but not used"]
    pub const fn with_config(config: Stage07Config) -> Self {
        Self { config }
    }

    /// Whether the tiny double-walkover builder applies
    #[must_use = "returns whether the tiny bracket builder applies"]
    pub fn is_tiny_bracket(&self, main_entrants: usize, double_walkover_present: bool) -> bool {
        double_walkover_present && (2..=self.config.tiny_max_entrants).contains(&main_entrants)
    }

    /// Attach walkover markers to the rounds
    ///
    /// `score_columns[r]` is the score column round `r` drew from.
    pub fn process(
        &self,
        rounds: &mut [Round],
        markers: &[WalkoverMarker],
        score_columns: &[ColumnBand],
        entrants: &[EntrantLine],
        tree_size: usize,
    ) -> usize {
        if markers.is_empty() || rounds.is_empty() {
            return 0;
        }
        let tolerance = self.vertical_tolerance(rounds);
        let mut marked = 0;

        for marker in markers {
            let target = nearest_band_index(score_columns, marker.center_x()).filter(|&r| r < rounds.len());
            let hit = target
                .and_then(|r| self.find_match(rounds, Some(r), marker, entrants, tolerance))
                .or_else(|| self.find_match(rounds, None, marker, entrants, tolerance));
            let Some((ridx, midx)) = hit else {
                log::trace!("Stage 7: marker at y={:.1} matches nothing", marker.center);
                continue;
            };
            let m = &mut rounds[ridx].matches[midx];
            m.mark_walkover();
            if let Some(code) = marker.code.as_deref() {
                let named = m
                    .participants()
                    .iter()
                    .copied()
                    .find(|p| entrants.get(p.0).and_then(|e| e.code.as_deref()) == Some(code));
                if let Some(winner) = named.filter(|_| m.winner().is_none()) {
                    m.set_winner(winner);
                }
            }
            marked += 1;
        }

        if tree_size <= self.config.small_bracket_max_tree_size {
            for m in &mut rounds[0].matches {
                if m.is_contested() && m.score().is_none() && !m.is_walkover() {
                    m.mark_walkover();
                    marked += 1;
                }
            }
        }

        log::debug!(
            "Stage 7: {} markers, {} walkovers (tolerance {:.1})",
            markers.len(),
            marked,
            tolerance
        );
        marked
    }

    fn vertical_tolerance(&self, rounds: &[Round]) -> f64 {
        let mut centers: Vec<f64> = rounds
            .iter()
            .flat_map(|r| r.matches.iter().map(Match::center))
            .collect();
        centers.sort_by(f64::total_cmp);
        let mut gaps: Vec<f64> = centers.windows(2).map(|w| w[1] - w[0]).filter(|g| *g > 0.0).collect();
        if gaps.is_empty() {
            return self.config.min_vertical_tolerance;
        }
        gaps.sort_by(f64::total_cmp);
        let median = gaps[gaps.len() / 2];
        self.config
            .min_vertical_tolerance
            .max(self.config.max_vertical_tolerance.min(median * self.config.spacing_factor))
    }

    fn find_match(
        &self,
        rounds: &[Round],
        target: Option<usize>,
        marker: &WalkoverMarker,
        entrants: &[EntrantLine],
        tolerance: f64,
    ) -> Option<(usize, usize)> {
        let reach = self.config.horizontal_tolerance;
        rounds
            .iter()
            .enumerate()
            .filter(|(ridx, _)| target.map_or(true, |t| t == *ridx))
            .flat_map(|(ridx, r)| r.matches.iter().enumerate().map(move |(midx, m)| (ridx, midx, m)))
            .filter(|(_, _, m)| m.is_contested() && m.score().is_none() && !m.is_walkover())
            .filter(|(_, _, m)| (m.center() - marker.center).abs() <= tolerance)
            .filter(|(_, _, m)| {
                let sides: Vec<&EntrantLine> =
                    m.participants().iter().filter_map(|p| entrants.get(p.0)).collect();
                if sides.is_empty() {
                    return true;
                }
                let left = sides.iter().map(|e| e.x0).fold(f64::INFINITY, f64::min);
                let right = sides.iter().map(|e| e.x1).fold(f64::NEG_INFINITY, f64::max);
                marker.x1 >= left - reach && marker.x0 <= right + reach
            })
            .min_by(|a, b| {
                (a.2.center() - marker.center)
                    .abs()
                    .total_cmp(&(b.2.center() - marker.center).abs())
                    .then(a.0.cmp(&b.0))
                    .then(a.1.cmp(&b.1))
            })
            .map(|(ridx, midx, _)| (ridx, midx))
    }

    /// Build the rounds of a tiny double-walkover class directly
    ///
    /// Two entrants form a single final. Otherwise the first two entrants play
    /// a semifinal, the last one has a bye, and both meet in the final. Winners
    /// come from labels only; nothing is guessed.
    #[must_use = "tiny bracket rounds are returned but not used"]
    pub fn build_tiny_bracket(
        &self,
        main_entrants: &[EntrantLine],
        markers: &[WalkoverMarker],
        pools: &mut TokenPools,
    ) -> Vec<Round> {
        let mut sorted: Vec<&EntrantLine> = main_entrants.iter().collect();
        sorted.sort_by(|a, b| a.center.total_cmp(&b.center).then(a.id.cmp(&b.id)));
        let (Some(&first), Some(&last)) = (sorted.first(), sorted.last()) else {
            return Vec::new();
        };
        if sorted.len() < 2 {
            return Vec::new();
        }
        let mut used_markers = vec![false; markers.len()];

        if sorted.len() == 2 {
            let pair = [first, last];
            let fin = self.tiny_match(&pair, pools, None);
            log::debug!("Stage 7: tiny bracket collapsed to a single final");
            return vec![Round::new(vec![fin])];
        }

        let semi_pair = [sorted[0], sorted[1]];
        let semi = self.tiny_match(&semi_pair, pools, Some((markers, &mut used_markers)));
        let mut bye = Match::new(vec![last.id], last.center);
        bye.set_winner(last.id);

        let mut final_sides: Vec<&EntrantLine> = Vec::with_capacity(2);
        if let Some(winner) = semi.winner().and_then(|w| main_entrants.iter().find(|e| e.id == w)) {
            final_sides.push(winner);
        }
        final_sides.push(last);
        let fin = self.tiny_match(&final_sides, pools, None);

        log::debug!(
            "Stage 7: tiny bracket with semifinal (walkover={}) and final",
            semi.is_walkover()
        );
        vec![Round::new(vec![semi, bye]), Round::new(vec![fin])]
    }

    fn tiny_match(
        &self,
        sides: &[&EntrantLine],
        pools: &mut TokenPools,
        markers: Option<(&[WalkoverMarker], &mut Vec<bool>)>,
    ) -> Match {
        let center = sides.iter().map(|e| e.center).sum::<f64>() / sides.len().max(1) as f64;
        let mut m = Match::new(sides.iter().map(|e| e.id).collect(), center);

        let candidates: Vec<usize> = pools
            .labels
            .available()
            .filter(|(_, l)| !l.is_blank() && !l.double_walkover)
            .map(|(idx, _)| idx)
            .collect();
        if let Some(idx) = pools
            .labels
            .nearest_label(center, self.config.tiny_label_tolerance, &candidates)
        {
            if let Some(entry) = pools.labels.get(idx).cloned() {
                pools.labels.consume(idx);
                m.set_winner_label(LabelId(idx));
                if let Some((winner, _)) = resolve_label(&entry.label, entry.code.as_deref(), entry.center, sides) {
                    m.set_winner(winner);
                }
            }
        }

        if let Some((markers, used)) = markers {
            let hit = markers
                .iter()
                .enumerate()
                .filter(|(idx, _)| !used[*idx])
                .map(|(idx, mk)| (idx, (mk.center - center).abs()))
                .filter(|(_, dy)| *dy <= self.config.tiny_marker_tolerance)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            if let Some((idx, _)) = hit {
                used[idx] = true;
                m.mark_walkover();
            }
        }

        if m.is_contested() && !m.is_walkover() {
            if let Some((score_idx, margins)) = pools.take_score(center, self.config.tiny_score_tolerance, None) {
                m.attach_score(ScoreId(score_idx), margins);
            }
        }
        m
    }
}
