/// Stage 6: Final Round
///
/// Post-processes the last rounds once the round loop has finished.
///
/// Algorithm:
/// 1. Synthesis: when the last round still holds more than one match, the
///    physical final column was merged into the semifinal column. One final is
///    built from the (at most two) semifinal winners, centered on their matches.
///    Its label is the nearest unconsumed label right of the last winner band,
///    its score the nearest unconsumed blob right of the last score band, both
///    with wider tolerances than the round loop
/// 2. Merge: a bracket of three or more rounds ending in two single-match rounds
///    keeps the stronger of the two matches and back-fills it from the other
/// 3. Residual sweep: unscored contested matches (the final first, then later
///    rounds before earlier ones) take the nearest unconsumed blob anywhere on
///    the page within `residual_score_tolerance`
/// 4. Stitch: a bracket printed as two half pages is joined round by round,
///    upper half first. The grand final is built from the two half champions;
///    its label and score come from the right-most column of the page that
///    carries one label more than its half needs
use crate::pipeline::names::resolve_label;
use crate::pipeline::pool::{ScoreWindow, TokenPools};
use crate::pipeline::report::{FindingKind, RoundContext, ValidationReport};
use crate::pipeline::stage02_column_banding::ColumnBand;
use crate::pipeline::types::{
    Bracket, EntrantId, EntrantLine, LabelId, Match, Round, ScoreEntry, ScoreId, WinnerEntry,
};
use serde::{Deserialize, Serialize};

/// Configuration for Stage 6 (Final Round)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage06Config {
    /// Preferred vertical reach of the synthesized final's label
    pub winner_tolerance: f64,
    /// Preferred vertical reach of the synthesized final's score
    pub score_tolerance: f64,
    /// Vertical reach of the residual score sweep
    pub residual_score_tolerance: f64,
    /// Slack subtracted from band edges when selecting right-most tokens
    pub band_slack: f64,
    /// Authoritative tree size from which a two-page sheet is read as two halves
    pub split_min_tree_size: usize,
    /// Main entrant lines each page needs for an unsized two-page sheet to split
    pub split_min_page_entrants: usize,
}

impl Default for Stage06Config {
    #[inline]
    fn default() -> Self {
        Self {
            winner_tolerance: 45.0,
            score_tolerance: 40.0,
            residual_score_tolerance: 80.0,
            band_slack: 1.0,
            split_min_tree_size: 128,
            split_min_page_entrants: 33,
        }
    }
}

/// Right-most bands of the page
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FinalBands {
    pub label_band: Option<ColumnBand>,
    pub score_band: Option<ColumnBand>,
}

/// Grand-final tokens held back from the half bracket of their page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchTokens {
    pub labels: Vec<WinnerEntry>,
    pub scores: Vec<ScoreEntry>,
}

impl StitchTokens {
    #[must_use = "returns whether any token was held back"]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.scores.is_empty()
    }
}

/// Stage 6: Final Round
///
/// Input: the rounds built so far, the right-most bands, the entrant arena and
/// shared pools
/// Output: rounds are updated in place
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage06FinalRound {
    config: Stage06Config,
}

impl Stage06FinalRound {
    /// Create a new `Stage06FinalRound` with default configuration
    #[inline]
    #[must_use = "final round stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage06Config::default(),
        }
    }

    /// Create a new `Stage06FinalRound` with custom configuration
    #[inline]
    #[must_use = "final round stage is created but not used"]
    pub const fn with_config(config: Stage06Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use = "returns the stage configuration"]
    pub const fn config(&self) -> &Stage06Config {
        &self.config
    }

    /// Synthesize a missing final, then merge duplicate finals
    pub fn process(
        &self,
        rounds: &mut Vec<Round>,
        bands: FinalBands,
        entrants: &[EntrantLine],
        pools: &mut TokenPools,
        report: &mut ValidationReport,
    ) {
        if self.synthesize_final(rounds, bands, entrants, pools) {
            report.push(
                FindingKind::FinalSynthesized,
                RoundContext::round(rounds.len() - 1, "Final"),
                "final synthesized from the semifinal winners",
            );
        }
        if Self::merge_duplicate_finals(rounds) {
            report.push(
                FindingKind::DuplicateFinalMerged,
                RoundContext::round(rounds.len() - 1, "Final"),
                "two single-match rounds merged into one final",
            );
        }
        log::debug!(
            "Stage 6: {} rounds, final {}",
            rounds.len(),
            rounds
                .last()
                .and_then(|r| r.matches.first())
                .and_then(Match::winner)
                .map_or_else(|| "unresolved".to_string(), |w| format!("won by {w:?}"))
        );
    }

    /// Append a synthesized final when the last round has several matches
    pub fn synthesize_final(
        &self,
        rounds: &mut Vec<Round>,
        bands: FinalBands,
        entrants: &[EntrantLine],
        pools: &mut TokenPools,
    ) -> bool {
        let Some(last) = rounds.last().filter(|r| r.len() > 1) else {
            return false;
        };
        let feeding: Vec<&Match> = last.matches.iter().filter(|m| m.winner().is_some()).collect();
        let finalists: Vec<EntrantId> = feeding.iter().filter_map(|m| m.winner()).take(2).collect();
        if finalists.is_empty() {
            log::debug!("Stage 6: last round has no winners, final not synthesized");
            return false;
        }
        let centers: Vec<f64> = feeding.iter().take(2).map(|m| m.center()).collect();
        let center = centers.iter().sum::<f64>() / centers.len() as f64;

        let mut fin = Match::new(finalists.clone(), center);

        let label_candidates: Vec<usize> = pools
            .labels
            .available()
            .filter(|(_, l)| {
                bands
                    .label_band
                    .map_or(true, |b| l.x >= b.end - self.config.band_slack)
            })
            .map(|(idx, _)| idx)
            .collect();
        let label = pools
            .labels
            .nearest_label(center, self.config.winner_tolerance, &label_candidates)
            .or_else(|| pools.labels.nearest_label(center, f64::INFINITY, &label_candidates));
        if let Some(idx) = label {
            if let Some(entry) = pools.labels.get(idx).cloned() {
                pools.labels.consume(idx);
                fin.set_winner_label(LabelId(idx));
                if entry.double_walkover {
                    fin.mark_walkover();
                } else {
                    let pool: Vec<&EntrantLine> = finalists.iter().filter_map(|id| entrants.get(id.0)).collect();
                    if let Some((winner, rule)) = resolve_label(&entry.label, entry.code.as_deref(), entry.center, &pool) {
                        fin.set_winner(winner);
                        log::trace!("Stage 6: final label {:?} -> {:?} via {:?}", entry.label, winner, rule);
                    }
                }
            }
        }
        if fin.is_bye() && fin.winner().is_none() {
            fin.set_winner(fin.participants()[0]);
        }

        if fin.is_contested() && !fin.is_walkover() {
            let window = bands
                .score_band
                .map(|b| ScoreWindow::new(b.start - self.config.band_slack, f64::INFINITY));
            let score = pools
                .take_score(center, self.config.score_tolerance, window)
                .or_else(|| pools.take_score(center, f64::INFINITY, window));
            if let Some((score_idx, margins)) = score {
                fin.attach_score(ScoreId(score_idx), margins);
            }
        }

        log::debug!(
            "Stage 6: synthesized final at y={center:.1} between {:?}",
            fin.participants()
        );
        let mut round = Round::new(vec![fin]);
        round.synthesized = true;
        rounds.push(round);
        true
    }

    /// Collapse two trailing single-match rounds into one
    pub fn merge_duplicate_finals(rounds: &mut Vec<Round>) -> bool {
        let n = rounds.len();
        if n < 3 || rounds[n - 1].len() != 1 || rounds[n - 2].len() != 1 {
            return false;
        }
        let (Some(mut later), Some(mut earlier)) = (rounds.pop(), rounds.pop()) else {
            return false;
        };
        let strength = |m: &Match| (m.is_contested(), m.score().is_some(), m.winner().is_some());
        let keep_later = strength(&later.matches[0]) >= strength(&earlier.matches[0]);
        let (mut kept, mut other) = if keep_later {
            (later.matches.remove(0), earlier.matches.remove(0))
        } else {
            (earlier.matches.remove(0), later.matches.remove(0))
        };

        if kept.winner().is_none() {
            if let Some(winner) = other.winner() {
                kept.set_winner(winner);
            }
        }
        if kept.score().is_none() {
            if let Some(score) = other.take_score() {
                kept.attach_score(score.id, score.margins);
            }
        }
        if kept.winner_label().is_none() {
            if let Some(label) = other.winner_label() {
                kept.set_winner_label(label);
            }
        }
        if other.is_walkover() {
            kept.mark_walkover();
        }

        let mut round = Round::new(vec![kept]);
        round.synthesized = if keep_later { later.synthesized } else { earlier.synthesized };
        rounds.push(round);
        log::debug!("Stage 6: merged duplicate finals (kept the {} one)", if keep_later { "later" } else { "earlier" });
        true
    }

    /// Hold back the right-most label column of a half page with a surplus label
    ///
    /// A half of `half_size` slots needs `half_size - 1` labels; one more means
    /// the page also prints the grand final. Scores right of that column's left
    /// edge go with it.
    pub fn withhold_stitch_tokens(
        &self,
        labels: &mut Vec<WinnerEntry>,
        scores: &mut Vec<ScoreEntry>,
        label_bands: &[ColumnBand],
        half_size: usize,
    ) -> StitchTokens {
        let (Some(last), true) = (label_bands.last(), label_bands.len() >= 2) else {
            return StitchTokens::default();
        };
        if labels.len() < half_size {
            return StitchTokens::default();
        }
        let edge = last.start - self.config.band_slack;
        let (held_labels, kept_labels): (Vec<WinnerEntry>, Vec<WinnerEntry>) =
            std::mem::take(labels).into_iter().partition(|l| l.x >= edge);
        let (held_scores, kept_scores): (Vec<ScoreEntry>, Vec<ScoreEntry>) =
            std::mem::take(scores).into_iter().partition(|s| s.x0 >= edge);
        *labels = kept_labels;
        *scores = kept_scores;
        log::debug!(
            "Stage 6: held back {} labels and {} scores right of x={edge:.1} for the grand final",
            held_labels.len(),
            held_scores.len()
        );
        StitchTokens {
            labels: held_labels,
            scores: held_scores,
        }
    }

    /// Join two half brackets under one grand final
    ///
    /// The lower half's entrants, scores and labels are appended after the
    /// upper half's and its matches shifted accordingly. The grand final is
    /// centered on the upper half's final, where `tokens` were printed.
    #[must_use = "stitched bracket is returned but not used"]
    pub fn stitch_halves(&self, upper: Bracket, lower: Bracket, tokens: StitchTokens, tree_size: usize) -> Bracket {
        let offsets = (upper.entrants.len(), upper.scores.len(), upper.labels.len());
        let shift = |mut round: Round| {
            for m in &mut round.matches {
                m.offset_ids(offsets.0, offsets.1, offsets.2);
            }
            round
        };
        let champions = [
            upper.final_match().and_then(Match::winner),
            lower.final_match().and_then(Match::winner).map(|id| EntrantId(id.0 + offsets.0)),
        ];
        let center = upper
            .final_match()
            .or_else(|| lower.final_match())
            .map_or(0.0, Match::center);

        let Bracket {
            rounds: upper_rounds,
            qualification: upper_qualification,
            mut entrants,
            mut scores,
            mut labels,
            ..
        } = upper;
        entrants.extend(lower.entrants.into_iter().map(|mut e| {
            e.id = EntrantId(e.id.0 + offsets.0);
            e
        }));
        scores.extend(lower.scores);
        labels.extend(lower.labels);

        let mut rounds: Vec<Round> = Vec::new();
        let mut upper_rounds = upper_rounds.into_iter();
        let mut lower_rounds = lower.rounds.into_iter().map(shift);
        loop {
            match (upper_rounds.next(), lower_rounds.next()) {
                (None, None) => break,
                (Some(round), None) | (None, Some(round)) => rounds.push(round),
                (Some(mut round), Some(other)) => {
                    // both halves are already in vertical order
                    round.matches.extend(other.matches);
                    round.synthesized |= other.synthesized;
                    rounds.push(round);
                }
            }
        }
        let qualification = match (upper_qualification, lower.qualification.map(shift)) {
            (Some(mut round), Some(other)) => {
                round.matches.extend(other.matches);
                Some(round)
            }
            (round, other) => round.or(other),
        };

        let finalists: Vec<EntrantId> = champions.into_iter().flatten().collect();
        let label_base = labels.len();
        let score_base = scores.len();
        let label = Self::stitch_label(&tokens.labels, &finalists, &entrants, center);
        let score = nearest_score(&tokens.scores, center, self.config.score_tolerance)
            .or_else(|| nearest_score(&tokens.scores, center, f64::INFINITY));
        labels.extend(tokens.labels);
        scores.extend(tokens.scores);

        if finalists.is_empty() {
            log::warn!("Stage 6: neither half produced a champion, grand final not built");
        } else {
            let mut fin = Match::new(finalists, center);
            match label {
                Some((idx, Some(winner))) => {
                    fin.set_winner_label(LabelId(label_base + idx));
                    fin.set_winner(winner);
                }
                Some((idx, None)) => {
                    fin.set_winner_label(LabelId(label_base + idx));
                    fin.mark_walkover();
                }
                None => {}
            }
            if fin.is_bye() && fin.winner().is_none() {
                fin.set_winner(fin.participants()[0]);
            }
            if fin.is_contested() && !fin.is_walkover() {
                if let Some(idx) = score {
                    fin.attach_score(ScoreId(score_base + idx), scores[score_base + idx].margins.clone());
                }
            }
            log::debug!(
                "Stage 6: stitched grand final between {:?}, won by {:?}",
                fin.participants(),
                fin.winner()
            );
            let mut round = Round::new(vec![fin]);
            round.synthesized = true;
            rounds.push(round);
        }

        Bracket {
            tree_size,
            tree_size_inferred: false,
            rounds,
            qualification,
            entrants,
            scores,
            labels,
        }
    }

    /// Held-back label naming a finalist, nearest to `center`
    ///
    /// A double-walkover label yields no winner.
    fn stitch_label(
        labels: &[WinnerEntry],
        finalists: &[EntrantId],
        entrants: &[EntrantLine],
        center: f64,
    ) -> Option<(usize, Option<EntrantId>)> {
        let pool: Vec<&EntrantLine> = finalists.iter().filter_map(|id| entrants.get(id.0)).collect();
        labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.double_walkover || !l.is_blank())
            .filter_map(|(idx, l)| {
                if l.double_walkover {
                    return Some((idx, None, l.center));
                }
                resolve_label(&l.label, l.code.as_deref(), l.center, &pool)
                    .map(|(winner, _)| (idx, Some(winner), l.center))
            })
            .min_by(|a, b| {
                (a.2 - center)
                    .abs()
                    .total_cmp(&(b.2 - center).abs())
                    .then(a.0.cmp(&b.0))
            })
            .map(|(idx, winner, _)| (idx, winner))
    }

    /// Attach left-over blobs to unscored contested matches
    ///
    /// Returns the number of scores attached.
    pub fn sweep_residual_scores(&self, rounds: &mut [Round], pools: &mut TokenPools) -> usize {
        let mut attached = 0;
        let wants_score = |m: &Match| m.is_contested() && m.score().is_none() && !m.is_walkover();

        let mut order: Vec<(usize, usize)> = Vec::new();
        if let Some((ridx, round)) = rounds.iter().enumerate().last().filter(|(_, r)| r.len() == 1) {
            if wants_score(&round.matches[0]) {
                order.push((ridx, 0));
            }
        }
        for (ridx, round) in rounds.iter().enumerate().rev() {
            for (midx, m) in round.matches.iter().enumerate() {
                if wants_score(m) && !order.contains(&(ridx, midx)) {
                    order.push((ridx, midx));
                }
            }
        }

        for (ridx, midx) in order {
            if pools.scores.remaining() == 0 {
                break;
            }
            let m = &mut rounds[ridx].matches[midx];
            if let Some((score_idx, margins)) =
                pools.take_score(m.center(), self.config.residual_score_tolerance, None)
            {
                log::trace!("Stage 6: residual score {score_idx} -> round {ridx} match {midx}");
                m.attach_score(ScoreId(score_idx), margins);
                attached += 1;
            }
        }
        if attached > 0 {
            log::debug!("Stage 6: residual sweep attached {attached} scores");
        }
        attached
    }
}

/// Index of the blob nearest to `center` within `tolerance`
fn nearest_score(scores: &[ScoreEntry], center: f64, tolerance: f64) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .map(|(idx, s)| (idx, (s.center - center).abs()))
        .filter(|(_, distance)| *distance <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(idx, _)| idx)
}
