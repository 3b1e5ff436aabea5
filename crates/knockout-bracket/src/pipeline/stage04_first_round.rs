/// Stage 4: First-Round Builder
///
/// Pairs left-column entrant lines into the first-round matches.
///
/// Algorithm:
/// 1. Anchors are the round-1 winner labels in vertical order. With fewer
///    labels than `tree_size / 2`, placeholder anchors are inserted at the
///    largest uncovered entrant gaps (before the first label, after the last,
///    or between two labels)
/// 2. Each anchor owns the half-open band `[mid(prev, self), mid(self, next))`
/// 3. Participants are the unused entrants inside the band, at most two
/// 4. Empty band: take the two closest unused entrants anywhere.
///    One participant: recruit one more unused entrant within
///    `recruit_tolerance`, otherwise the match is a bye
/// 5. The label is resolved against the match participants; a bye always wins
/// 6. Contested matches with a printed label take the nearest aligned score
///
/// A double-walkover label never rescues participants: the match is marked as
/// a walkover without a winner (a single participant still advances).
use crate::pipeline::names::resolve_label;
use crate::pipeline::pool::{Pool, ScoreWindow, TokenPools};
use crate::pipeline::types::{EntrantLine, LabelId, Match, Round, ScoreId, WinnerEntry};
use serde::{Deserialize, Serialize};

/// Configuration for Stage 4 (First-Round Builder)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage04Config {
    /// Vertical tolerance for the first-round score blob
    pub score_tolerance: f64,
    /// Maximum distance of a recruited second participant
    pub recruit_tolerance: f64,
    /// Insert placeholder anchors for unlabelled matches
    pub insert_placeholders: bool,
    /// Edge gaps larger than average label spacing × factor get a placeholder
    pub placeholder_edge_factor: f64,
    /// Inner gaps larger than average label spacing × factor get a placeholder
    pub placeholder_gap_factor: f64,
    /// Label spacing assumed when it cannot be measured
    pub default_spacing: f64,
}

impl Default for Stage04Config {
    #[inline]
    fn default() -> Self {
        Self {
            score_tolerance: 30.0,
            recruit_tolerance: 18.0,
            insert_placeholders: true,
            placeholder_edge_factor: 0.5,
            placeholder_gap_factor: 1.5,
            default_spacing: 20.0,
        }
    }
}

/// Vertical anchor of one first-round match
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    center: f64,
    /// `None` for a placeholder
    label: Option<usize>,
}

/// Stage 4: First-Round Builder
///
/// Input: main entrants sorted by center, the round-1 label chunk, the shared
/// label and score pools
/// Output: first `Round`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage04FirstRoundBuilder {
    config: Stage04Config,
}

impl Stage04FirstRoundBuilder {
    /// Create a new `Stage04FirstRoundBuilder` with default configuration
    #[inline]
    #[must_use = "first-round builder stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage04Config::default(),
        }
    }

    /// Create a new `Stage04FirstRoundBuilder` with custom configuration
    #[inline]
    #[must_use = "first-round builder stage is created but not used"]
    pub const fn with_config(config: Stage04Config) -> Self {
        Self { config }
    }

    /// Build the first round
    ///
    /// Consumes the chunk labels it pairs and the score blobs it attaches.
    #[must_use = "first round is returned but not used"]
    pub fn process(
        &self,
        entrants: &[EntrantLine],
        label_ids: &[usize],
        pools: &mut TokenPools,
        window: ScoreWindow,
        tree_size: usize,
    ) -> Round {
        let anchors = self.anchors(entrants, label_ids, &pools.labels, tree_size);
        let mut used = vec![false; entrants.len()];
        let mut matches = Vec::with_capacity(anchors.len());
        let mut byes = 0;

        for (idx, anchor) in anchors.iter().enumerate() {
            let lower = if idx > 0 {
                (anchors[idx - 1].center + anchor.center) / 2.0
            } else {
                f64::NEG_INFINITY
            };
            let upper = anchors
                .get(idx + 1)
                .map_or(f64::INFINITY, |next| (anchor.center + next.center) / 2.0);

            let mut participants = Self::band_participants(entrants, &mut used, lower, upper);

            let entry = anchor.label.and_then(|l| pools.labels.get(l)).cloned();
            let double_walkover = entry.as_ref().is_some_and(|e| e.double_walkover);
            if !double_walkover {
                match participants.len() {
                    0 => {
                        participants = Self::closest_unused(entrants, &mut used, anchor.center, 2);
                        log::trace!(
                            "Stage 4: empty band at y={:.1}, rescued {} entrants",
                            anchor.center,
                            participants.len()
                        );
                    }
                    1 => {
                        if let Some(extra) = self.recruit(entrants, &mut used, anchor.center) {
                            participants.push(extra);
                        }
                    }
                    _ => {}
                }
            }
            if participants.is_empty() {
                log::trace!("Stage 4: no entrants left for anchor at y={:.1}", anchor.center);
                continue;
            }

            let ids: Vec<_> = participants.iter().map(|&p| entrants[p].id).collect();
            let mut m = Match::new(ids, anchor.center);
            if let Some(label_idx) = anchor.label {
                if pools.labels.consume(label_idx) {
                    m.set_winner_label(LabelId(label_idx));
                }
            }

            if double_walkover {
                m.mark_walkover();
                if m.is_bye() {
                    m.set_winner(m.participants()[0]);
                }
                log::trace!("Stage 4: double walkover at y={:.1}", anchor.center);
                matches.push(m);
                continue;
            }

            if let Some(entry) = entry.as_ref().filter(|e| !e.is_blank()) {
                let pool: Vec<&EntrantLine> = participants.iter().map(|&p| &entrants[p]).collect();
                match resolve_label(&entry.label, entry.code.as_deref(), entry.center, &pool) {
                    Some((winner, rule)) => {
                        m.set_winner(winner);
                        log::trace!("Stage 4: {:?} -> {:?} via {:?}", entry.label, winner, rule);
                    }
                    None => log::trace!(
                        "Stage 4: label {:?} at y={:.1} matches no participant",
                        entry.label,
                        entry.center
                    ),
                }
            }
            if m.is_bye() {
                byes += 1;
                if m.winner().is_none() {
                    m.set_winner(m.participants()[0]);
                }
            }

            if m.is_contested() && entry.is_some() {
                if let Some((score_idx, margins)) =
                    pools.take_score(anchor.center, self.config.score_tolerance, Some(window))
                {
                    m.attach_score(ScoreId(score_idx), margins);
                }
            }
            matches.push(m);
        }

        log::debug!(
            "Stage 4: {} first-round matches ({} anchors, {} byes)",
            matches.len(),
            anchors.len(),
            byes
        );
        Round::new(matches)
    }

    fn anchors(
        &self,
        entrants: &[EntrantLine],
        label_ids: &[usize],
        labels: &Pool<WinnerEntry>,
        tree_size: usize,
    ) -> Vec<Anchor> {
        let mut anchors: Vec<Anchor> = label_ids
            .iter()
            .filter_map(|&idx| {
                labels.get(idx).map(|l| Anchor {
                    center: l.center,
                    label: Some(idx),
                })
            })
            .collect();
        let order = |a: &Anchor, b: &Anchor| a.center.total_cmp(&b.center).then(a.label.cmp(&b.label));
        anchors.sort_by(order);

        let expected = tree_size / 2;
        if self.config.insert_placeholders && !anchors.is_empty() && anchors.len() < expected {
            let centers = self.placeholder_centers(&anchors, entrants, expected - anchors.len());
            log::debug!("Stage 4: inserting {} placeholder anchors", centers.len());
            anchors.extend(centers.into_iter().map(|center| Anchor { center, label: None }));
            anchors.sort_by(order);
        }
        anchors
    }

    fn placeholder_centers(&self, anchors: &[Anchor], entrants: &[EntrantLine], missing: usize) -> Vec<f64> {
        let (Some(first), Some(last)) = (anchors.first(), anchors.last()) else {
            return Vec::new();
        };
        let (min_w, max_w) = (first.center, last.center);
        let min_p = entrants.first().map_or(min_w - 50.0, |e| e.center);
        let max_p = entrants.last().map_or(max_w + 50.0, |e| e.center);

        let avg_delta = if anchors.len() > 1 {
            (max_w - min_w) / (anchors.len() - 1) as f64
        } else if entrants.len() > 1 {
            (max_p - min_p) / (entrants.len() - 1) as f64
        } else {
            self.config.default_spacing
        };

        // (gap size, placeholder center)
        let mut gaps: Vec<(f64, f64)> = Vec::new();
        if min_w - min_p > avg_delta * self.config.placeholder_edge_factor {
            gaps.push((min_w - min_p, min_p));
        }
        if max_p - max_w > avg_delta * self.config.placeholder_edge_factor {
            gaps.push((max_p - max_w, max_p));
        }
        for pair in anchors.windows(2) {
            let delta = pair[1].center - pair[0].center;
            if delta > avg_delta * self.config.placeholder_gap_factor {
                gaps.push((delta, (pair[0].center + pair[1].center) / 2.0));
            }
        }
        gaps.sort_by(|a, b| b.0.total_cmp(&a.0));
        gaps.into_iter().take(missing).map(|(_, center)| center).collect()
    }

    fn band_participants(entrants: &[EntrantLine], used: &mut [bool], lower: f64, upper: f64) -> Vec<usize> {
        let mut participants = Vec::with_capacity(2);
        for (idx, entrant) in entrants.iter().enumerate() {
            if used[idx] || entrant.center < lower {
                continue;
            }
            if entrant.center >= upper {
                if participants.len() >= 2 {
                    break;
                }
                continue;
            }
            participants.push(idx);
            used[idx] = true;
            if participants.len() == 2 {
                break;
            }
        }
        participants
    }

    fn closest_unused(entrants: &[EntrantLine], used: &mut [bool], center: f64, limit: usize) -> Vec<usize> {
        let mut candidates: Vec<(f64, usize)> = entrants
            .iter()
            .enumerate()
            .filter(|(idx, _)| !used[*idx])
            .map(|(idx, e)| ((e.center - center).abs(), idx))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let picked: Vec<usize> = candidates.into_iter().take(limit).map(|(_, idx)| idx).collect();
        for &idx in &picked {
            used[idx] = true;
        }
        picked
    }

    fn recruit(&self, entrants: &[EntrantLine], used: &mut [bool], center: f64) -> Option<usize> {
        let (delta, idx) = entrants
            .iter()
            .enumerate()
            .filter(|(idx, _)| !used[*idx])
            .map(|(idx, e)| ((e.center - center).abs(), idx))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))?;
        if delta > self.config.recruit_tolerance {
            return None;
        }
        used[idx] = true;
        Some(idx)
    }
}
