/// Stage 8: Qualification Resolver
///
/// Builds the optional pre-bracket qualification round.
///
/// Algorithm:
/// 1. Qualification entrants (below the header) are grouped into x-columns
///    and paired sequentially within each column (1&2, 3&4, ...); an odd last
///    entrant of a column is reported, not paired
/// 2. A walkover marker within `marker_vertical_tolerance` and
///    `marker_horizontal_tolerance` of a pair's x-range marks it a walkover;
///    each marker goes to the closest pair (horizontal gap, then vertical)
/// 3. Other matches take the nearest unconsumed score blob within
///    `score_tolerance`, by vertical distance only
/// 4. Presence test: a winner is set only when exactly one side also plays in
///    the main bracket (same code, full name or short name). Scores never
///    decide a qualification winner
use crate::pipeline::names::normalize_name;
use crate::pipeline::pool::TokenPools;
use crate::pipeline::report::{FindingKind, RoundContext, ValidationReport};
use crate::pipeline::stage02_column_banding::{ColumnBand, Stage02ColumnBander, Stage02Config};
use crate::pipeline::types::{EntrantLine, EntrantOrigin, Match, Round, ScoreId, WalkoverMarker};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Configuration for Stage 8 (Qualification Resolver)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage08Config {
    /// Largest x gap inside one qualification column
    pub column_gap: f64,
    pub marker_vertical_tolerance: f64,
    pub marker_horizontal_tolerance: f64,
    pub score_tolerance: f64,
}

impl Default for Stage08Config {
    #[inline]
    fn default() -> Self {
        Self {
            column_gap: 40.0,
            marker_vertical_tolerance: 26.0,
            marker_horizontal_tolerance: 120.0,
            score_tolerance: 50.0,
        }
    }
}

/// Main-bracket identities used by the presence test
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Presence {
    codes: FxHashSet<String>,
    names: FxHashSet<String>,
    shorts: FxHashSet<String>,
}

impl Presence {
    fn collect<'a>(players: impl Iterator<Item = &'a EntrantLine>) -> Self {
        let mut presence = Self::default();
        for p in players {
            if let Some(code) = &p.code {
                presence.codes.insert(code.clone());
            }
            presence.names.insert(normalize_name(&p.full_name));
            presence.shorts.insert(normalize_name(&p.short_name));
        }
        presence
    }

    fn contains(&self, p: &EntrantLine) -> bool {
        p.code.as_ref().is_some_and(|c| self.codes.contains(c))
            || self.names.contains(&normalize_name(&p.full_name))
            || self.shorts.contains(&normalize_name(&p.short_name))
    }
}

/// Stage 8: Qualification Resolver
///
/// Input: the entrant arena, the main rounds, qualification-area walkover
/// markers and the shared pools
/// Output: `Option<Round>` (None without at least two qualification entrants)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage08QualificationResolver {
    config: Stage08Config,
}

impl Stage08QualificationResolver {
    /// Create a new `Stage08QualificationResolver` with default configuration
    #[inline]
    #[must_use = "qualification resolver stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage08Config::default(),
        }
    }

    /// Create a new `Stage08QualificationResolver` with custom configuration
    #[inline]
    #[must_use = "qualification resolver stage is created but not used"]
    pub const fn with_config(config: Stage08Config) -> Self {
        Self { config }
    }

    /// Build and resolve the qualification round
    #[must_use = "qualification round is returned but not used"]
    pub fn process(
        &self,
        entrants: &[EntrantLine],
        rounds: &[Round],
        markers: &[WalkoverMarker],
        pools: &mut TokenPools,
        report: &mut ValidationReport,
    ) -> Option<Round> {
        let players: Vec<&EntrantLine> = entrants
            .iter()
            .filter(|e| e.origin == EntrantOrigin::Qualification)
            .collect();
        if players.len() < 2 {
            return None;
        }

        let (pairs, unpaired) = self.pair_by_column(&players);
        for player in unpaired {
            report.push(
                FindingKind::UnpairedQualificationEntrant {
                    player: player.display_name(),
                },
                RoundContext::qualification(),
                format!("{} has no qualification opponent in its column", player.display_name()),
            );
        }
        // (x-range) per pair
        let bounds: Vec<(f64, f64)> = pairs
            .iter()
            .map(|(a, b)| (a.x0.min(b.x0), a.x1.max(b.x1)))
            .collect();
        let walkovers = self.assign_markers(&pairs, &bounds, markers);

        let in_bracket: Vec<&EntrantLine> = rounds
            .iter()
            .flat_map(Round::participants)
            .filter_map(|id| entrants.get(id.0))
            .collect();
        let presence = Presence::collect(in_bracket.into_iter());

        let mut matches = Vec::with_capacity(pairs.len());
        let mut resolved = 0;
        for (idx, (a, b)) in pairs.iter().enumerate() {
            let center = (a.center + b.center) / 2.0;
            let mut m = Match::new(vec![a.id, b.id], center);
            if walkovers[idx] {
                m.mark_walkover();
            } else if let Some((score_idx, margins)) = pools.take_score(center, self.config.score_tolerance, None) {
                m.attach_score(ScoreId(score_idx), margins);
            }

            match (presence.contains(a), presence.contains(b)) {
                (true, false) => {
                    m.set_winner(a.id);
                    resolved += 1;
                }
                (false, true) => {
                    m.set_winner(b.id);
                    resolved += 1;
                }
                (both, _) => log::trace!(
                    "Stage 8: {} vs {} left open ({} in bracket)",
                    a.display_name(),
                    b.display_name(),
                    if both { "both" } else { "neither" }
                ),
            }
            matches.push(m);
        }

        log::debug!(
            "Stage 8: {} qualification entrants, {} matches, {} winners resolved",
            players.len(),
            matches.len(),
            resolved
        );
        Some(Round::new(matches))
    }

    /// Sequential pairs per column, plus the odd entrant of each odd column
    #[allow(clippy::type_complexity)]
    fn pair_by_column<'a>(
        &self,
        players: &[&'a EntrantLine],
    ) -> (Vec<(&'a EntrantLine, &'a EntrantLine)>, Vec<&'a EntrantLine>) {
        let bander = Stage02ColumnBander::with_config(Stage02Config {
            max_gap: self.config.column_gap,
        });
        let xs: Vec<f64> = players.iter().map(|p| p.x0).collect();
        let mut bands: Vec<ColumnBand> = bander.process(&xs);
        if bands.len() <= 1 {
            bands = vec![ColumnBand::new(f64::NEG_INFINITY, f64::INFINITY)];
        }

        let mut pairs = Vec::new();
        let mut unpaired = Vec::new();
        for band in bands {
            let mut column: Vec<&EntrantLine> = players.iter().copied().filter(|p| band.contains(p.x0)).collect();
            column.sort_by(|a, b| a.center.total_cmp(&b.center).then(a.id.cmp(&b.id)));
            let chunks = column.chunks_exact(2);
            unpaired.extend(chunks.remainder().iter().copied());
            pairs.extend(chunks.map(|pair| (pair[0], pair[1])));
        }
        if !unpaired.is_empty() {
            log::warn!("Stage 8: {} qualification entrants without an opponent", unpaired.len());
        }
        (pairs, unpaired)
    }

    fn assign_markers(
        &self,
        pairs: &[(&EntrantLine, &EntrantLine)],
        bounds: &[(f64, f64)],
        markers: &[WalkoverMarker],
    ) -> Vec<bool> {
        let mut walkover = vec![false; pairs.len()];
        for marker in markers {
            let x = marker.center_x();
            let best = pairs
                .iter()
                .enumerate()
                .filter(|(idx, _)| !walkover[*idx])
                .map(|(idx, (a, b))| {
                    let center = (a.center + b.center) / 2.0;
                    let (left, right) = bounds[idx];
                    let dist = if x < left {
                        left - x
                    } else if x > right {
                        x - right
                    } else {
                        0.0
                    };
                    (idx, dist, (marker.center - center).abs())
                })
                .filter(|(_, dist, dy)| {
                    *dy <= self.config.marker_vertical_tolerance && *dist <= self.config.marker_horizontal_tolerance
                })
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.total_cmp(&b.2)).then(a.0.cmp(&b.0)));
            if let Some((idx, ..)) = best {
                walkover[idx] = true;
            }
        }
        walkover
    }
}
