/// Stage 5: Round Advancer
///
/// Builds round r+1 from round r by pairing consecutive matches.
///
/// Algorithm:
/// 1. Matches 1&2, 3&4, ... of the previous round form one new match each; its
///    center is the average of the two source centers
/// 2. A source contributes its winner, or its sole participant. A walkover
///    source without a winner contributes nothing
/// 3. The winner label is chosen among the round's label chunk:
///    a label resolving to one of the candidates within `matched_label_reach`,
///    else the nearest within the winner tolerance, else a label resolving to
///    one of the candidates at any distance. An unrelated label further away
///    than the tolerance is left for the match it belongs to
/// 4. A source still without winner carries the participant the label names,
///    or its first participant (reported as an inferred advancer)
/// 5. Contested matches take the nearest aligned score blob
///
/// Tolerances widen with the round index: `base + step * round_index`.
///
/// After each transition `fill_missing_winners` and `apply_label_advancers`
/// back-fill winners of the previous round.
use crate::pipeline::names::resolve_label;
use crate::pipeline::pool::{Pool, ScoreWindow, TokenPools};
use crate::pipeline::report::{FindingKind, RoundContext, ValidationReport};
use crate::pipeline::types::{
    round_display_name, EntrantId, EntrantLine, EntrantOrigin, LabelId, Match, Round, ScoreId,
    WinnerEntry,
};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Configuration for Stage 5 (Round Advancer)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage05Config {
    /// Winner label tolerance at round 0
    pub winner_tolerance_base: f64,
    /// Score tolerance at round 0
    pub score_tolerance_base: f64,
    /// Added to both tolerances per round
    pub tolerance_step: f64,
    /// Vertical reach of a label that names one of the candidates
    pub matched_label_reach: f64,
    /// Score window width when no score band lies right of the labels
    pub score_fallback_width: f64,
    /// Padding on both sides of the score window
    pub score_window_padding: f64,
    /// A round's score band is withheld from later rounds while more than
    /// this many rounds remain
    pub score_band_reserve_rounds: usize,
}

impl Default for Stage05Config {
    #[inline]
    fn default() -> Self {
        Self {
            winner_tolerance_base: 24.0,
            score_tolerance_base: 28.0,
            tolerance_step: 4.0,
            matched_label_reach: 120.0,
            score_fallback_width: 50.0,
            score_window_padding: 1.0,
            score_band_reserve_rounds: 2,
        }
    }
}

impl Stage05Config {
    #[inline]
    #[must_use = "returns the winner tolerance"]
    pub fn winner_tolerance(&self, round_index: usize) -> f64 {
        self.winner_tolerance_base + self.tolerance_step * round_index as f64
    }

    #[inline]
    #[must_use = "returns the score tolerance"]
    pub fn score_tolerance(&self, round_index: usize) -> f64 {
        self.score_tolerance_base + self.tolerance_step * round_index as f64
    }
}

/// What a previous-round match sends forward
#[derive(Debug, Clone, Copy, PartialEq)]
enum Source<'a> {
    /// Winner (or sole participant) is known
    Known(EntrantId),
    /// Two participants, no winner yet
    Open(&'a [EntrantId]),
}

impl<'a> Source<'a> {
    fn of(m: &'a Match) -> Option<Self> {
        if let Some(winner) = m.winner() {
            return Some(Self::Known(winner));
        }
        if m.is_walkover() {
            return None;
        }
        match m.participants() {
            [] => None,
            [only] => Some(Self::Known(*only)),
            all => Some(Self::Open(all)),
        }
    }

    fn candidates(self) -> impl Iterator<Item = EntrantId> + 'a {
        let (known, open): (Option<EntrantId>, &'a [EntrantId]) = match self {
            Self::Known(id) => (Some(id), &[]),
            Self::Open(ids) => (None, ids),
        };
        known.into_iter().chain(open.iter().copied())
    }
}

/// Round built by Stage 5
#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedRound {
    pub round: Round,
    /// Chunk labels this round did not consume, in chunk order
    pub leftover_labels: Vec<usize>,
}

/// Per-round input of Stage 5
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundInput<'a> {
    /// Index of the round being built
    pub round_index: usize,
    /// Label chunk allocated to this round (including carried labels)
    pub label_ids: &'a [usize],
    /// Score window of this round
    pub window: ScoreWindow,
}

/// Stage 5: Round Advancer
///
/// Input: previous `Round`, `RoundInput`, the entrant arena and shared pools
/// Output: `AdvancedRound`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage05RoundAdvancer {
    config: Stage05Config,
}

impl Stage05RoundAdvancer {
    /// Create a new `Stage05RoundAdvancer` with default configuration
    #[inline]
    #[must_use = "round advancer stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage05Config::default(),
        }
    }

    /// Create a new `Stage05RoundAdvancer` with custom configuration
    #[inline]
    #[must_use = "round advancer stage is created but not used"]
    pub const fn with_config(config: Stage05Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use = "returns the stage configuration"]
    pub const fn config(&self) -> &Stage05Config {
        &self.config
    }

    /// Build the next round from `previous`
    #[must_use = "advanced round is returned but not used"]
    pub fn process(
        &self,
        previous: &Round,
        input: RoundInput<'_>,
        entrants: &[EntrantLine],
        pools: &mut TokenPools,
        report: &mut ValidationReport,
    ) -> AdvancedRound {
        let winner_tolerance = self.config.winner_tolerance(input.round_index);
        let score_tolerance = self.config.score_tolerance(input.round_index);
        let round_name = round_display_name(previous.len().div_ceil(2));
        let mut matches = Vec::with_capacity(previous.len().div_ceil(2));

        for pair in previous.matches.chunks(2) {
            let sources: Vec<Source<'_>> = pair.iter().filter_map(Source::of).collect();
            let center = pair.iter().map(Match::center).sum::<f64>() / pair.len() as f64;
            let candidates: Vec<EntrantId> = sources.iter().flat_map(|s| s.candidates()).collect();
            if candidates.is_empty() {
                log::trace!("Stage 5: nothing advances into y={center:.1}");
                continue;
            }

            let label = self.choose_label(center, &candidates, input.label_ids, &pools.labels, entrants, winner_tolerance);
            let entry = label.and_then(|idx| pools.labels.get(idx)).filter(|e| !e.is_blank());
            let resolved = entry.and_then(|e| {
                let pool = lookup(entrants, &candidates);
                resolve_label(&e.label, e.code.as_deref(), e.center, &pool).map(|(id, _)| id)
            });

            let mut participants = Vec::with_capacity(2);
            for source in &sources {
                match *source {
                    Source::Known(id) => participants.push(id),
                    Source::Open(ids) => {
                        if let Some(id) = resolved.filter(|r| ids.contains(r)) {
                            participants.push(id);
                        } else {
                            let carried = ids[0];
                            let player = entrants.get(carried.0).map(EntrantLine::display_name).unwrap_or_default();
                            report.push(
                                FindingKind::AdvancerInferred { player: player.clone() },
                                RoundContext::round(input.round_index, round_name.clone()).in_match(matches.len()),
                                format!("no winner known, carried {player}"),
                            );
                            participants.push(carried);
                        }
                    }
                }
            }

            let mut m = Match::new(participants, center);
            if let Some(idx) = label {
                if pools.labels.consume(idx) {
                    m.set_winner_label(LabelId(idx));
                }
            }
            let double_walkover = label
                .and_then(|idx| pools.labels.get(idx))
                .is_some_and(|e| e.double_walkover);
            if double_walkover {
                m.mark_walkover();
            } else if let Some(winner) = resolved {
                m.set_winner(winner);
            }
            if m.is_bye() && m.winner().is_none() {
                m.set_winner(m.participants()[0]);
            }

            if m.is_contested() && !m.is_walkover() {
                if let Some((score_idx, margins)) = pools.take_score(center, score_tolerance, Some(input.window)) {
                    m.attach_score(ScoreId(score_idx), margins);
                }
            }
            matches.push(m);
        }

        let leftover_labels: Vec<usize> = input
            .label_ids
            .iter()
            .copied()
            .filter(|&idx| !pools.labels.is_consumed(idx))
            .collect();

        log::debug!(
            "Stage 5: round {} built {} matches from {} ({} labels left over)",
            input.round_index,
            matches.len(),
            previous.len(),
            leftover_labels.len()
        );
        AdvancedRound {
            round: Round::new(matches),
            leftover_labels,
        }
    }

    fn choose_label(
        &self,
        center: f64,
        candidates: &[EntrantId],
        label_ids: &[usize],
        labels: &Pool<WinnerEntry>,
        entrants: &[EntrantLine],
        tolerance: f64,
    ) -> Option<usize> {
        let pool = lookup(entrants, candidates);
        naming_label(center, &pool, label_ids, labels, self.config.matched_label_reach)
            .or_else(|| labels.nearest_label(center, tolerance, label_ids))
            .or_else(|| naming_label(center, &pool, label_ids, labels, f64::INFINITY))
    }
}

/// Nearest unconsumed label within `reach` that resolves to one of `pool`
fn naming_label(
    center: f64,
    pool: &[&EntrantLine],
    label_ids: &[usize],
    labels: &Pool<WinnerEntry>,
    reach: f64,
) -> Option<usize> {
    label_ids
        .iter()
        .copied()
        .filter(|&idx| !labels.is_consumed(idx))
        .filter_map(|idx| labels.get(idx).map(|l| (idx, l)))
        .filter(|(_, l)| !l.is_blank() && (l.center - center).abs() <= reach)
        .filter(|(_, l)| resolve_label(&l.label, l.code.as_deref(), l.center, pool).is_some())
        .min_by(|(a_idx, a), (b_idx, b)| {
            (a.center - center)
                .abs()
                .total_cmp(&(b.center - center).abs())
                .then(b.x.total_cmp(&a.x))
                .then(b.emphasized.cmp(&a.emphasized))
                .then(a_idx.cmp(b_idx))
        })
        .map(|(idx, _)| idx)
}

fn lookup<'a>(entrants: &'a [EntrantLine], ids: &[EntrantId]) -> Vec<&'a EntrantLine> {
    ids.iter().filter_map(|id| entrants.get(id.0)).collect()
}

/// Re-derive previous-round winners from the next round's participants
///
/// A match whose winner is missing, or does not advance, gets the participant
/// that does. Returns the number of winners set.
pub fn fill_missing_winners(previous: &mut Round, next: &Round) -> usize {
    let advancing: FxHashSet<EntrantId> = next.participants().collect();
    let mut changed = 0;
    for m in &mut previous.matches {
        if m.winner().is_some_and(|w| advancing.contains(&w)) {
            continue;
        }
        let Some(advancer) = m.participants().iter().copied().find(|p| advancing.contains(p)) else {
            continue;
        };
        if m.set_winner(advancer) {
            changed += 1;
        }
    }
    if changed > 0 {
        log::trace!("Stage 5: backward propagation set {changed} winners");
    }
    changed
}

/// Fill winners of `round` from the labels of the next round's chunk
///
/// A label naming a main entrant sets the winner of the unresolved match that
/// entrant plays in, when exactly one such match exists. Returns the number of
/// winners set.
pub fn apply_label_advancers(
    round: &mut Round,
    next_label_ids: &[usize],
    labels: &Pool<WinnerEntry>,
    entrants: &[EntrantLine],
) -> usize {
    let main: Vec<&EntrantLine> = entrants.iter().filter(|e| e.origin == EntrantOrigin::Main).collect();
    let mut changed = 0;
    for label in next_label_ids.iter().filter_map(|&idx| labels.get(idx)) {
        if label.is_blank() || label.double_walkover {
            continue;
        }
        let Some((advancer, _)) = resolve_label(&label.label, label.code.as_deref(), label.center, &main) else {
            continue;
        };
        let mut open = round
            .matches
            .iter_mut()
            .filter(|m| m.winner().is_none() && m.has_participant(advancer));
        if let (Some(m), None) = (open.next(), open.next()) {
            if m.set_winner(advancer) {
                changed += 1;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::names::{build_aliases, make_short};
    use crate::pipeline::types::ScoreEntry;

    const NAMES: &[&str] = &["Berg Anna", "Lind Karin", "Holm Erik", "Dahl Sara"];

    fn make_entrants() -> Vec<EntrantLine> {
        NAMES
            .iter()
            .enumerate()
            .map(|(idx, name)| EntrantLine {
                id: EntrantId(idx),
                full_name: (*name).to_string(),
                club: "BTK Test".to_string(),
                short_name: make_short(name),
                code: None,
                suffix: None,
                center: 100.0 + 20.0 * idx as f64,
                x0: 20.0,
                x1: 160.0,
                origin: EntrantOrigin::Main,
                aliases: build_aliases(name),
            })
            .collect()
    }

    fn make_label(label: &str, center: f64) -> WinnerEntry {
        WinnerEntry {
            label: label.to_string(),
            code: None,
            center,
            x: 320.0,
            emphasized: false,
            double_walkover: false,
        }
    }

    fn make_score(center: f64) -> ScoreEntry {
        ScoreEntry {
            margins: vec![-8, 9, 6, 7],
            center,
            x0: 380.0,
            x1: 410.0,
        }
    }

    fn create_test_round(winners: [Option<usize>; 2]) -> Round {
        let mut first = Match::new(vec![EntrantId(0), EntrantId(1)], 110.0);
        let mut second = Match::new(vec![EntrantId(2), EntrantId(3)], 150.0);
        if let Some(w) = winners[0] {
            first.set_winner(EntrantId(w));
        }
        if let Some(w) = winners[1] {
            second.set_winner(EntrantId(w));
        }
        Round::new(vec![first, second])
    }

    fn input(label_ids: &[usize]) -> RoundInput<'_> {
        RoundInput {
            round_index: 1,
            label_ids,
            window: ScoreWindow::new(379.0, 381.0),
        }
    }

    #[test]
    fn test_pairs_winners_and_resolves_label() {
        let entrants = make_entrants();
        let previous = create_test_round([Some(0), Some(3)]);
        let mut pools = TokenPools::new(vec![make_label("Dahl S", 130.0)], vec![make_score(131.0)]);
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[0]), &entrants, &mut pools, &mut report);

        assert_eq!(advanced.round.len(), 1);
        let m = &advanced.round.matches[0];
        assert_eq!(m.participants(), &[EntrantId(0), EntrantId(3)]);
        assert_eq!(m.winner(), Some(EntrantId(3)));
        assert!((m.center() - 130.0).abs() < 1e-9);
        assert_eq!(m.margins(), Some(&[-8, 9, 6, 7][..]));
        assert!(advanced.leftover_labels.is_empty());
        assert!(report.is_empty());
    }

    #[test]
    fn test_open_source_takes_named_participant() {
        let entrants = make_entrants();
        let previous = create_test_round([None, Some(2)]);
        let mut pools = TokenPools::new(vec![make_label("Lind K", 128.0)], Vec::new());
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[0]), &entrants, &mut pools, &mut report);

        let m = &advanced.round.matches[0];
        assert_eq!(m.participants(), &[EntrantId(1), EntrantId(2)]);
        assert_eq!(m.winner(), Some(EntrantId(1)));
        assert!(report.is_empty());
    }

    #[test]
    fn test_open_source_without_label_is_reported() {
        let entrants = make_entrants();
        let previous = create_test_round([None, Some(2)]);
        let mut pools = TokenPools::new(vec![make_label("Holm E", 128.0)], Vec::new());
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[0]), &entrants, &mut pools, &mut report);

        let m = &advanced.round.matches[0];
        assert_eq!(m.participants(), &[EntrantId(0), EntrantId(2)]);
        assert_eq!(m.winner(), Some(EntrantId(2)));
        assert!(report.any(|k| matches!(k, FindingKind::AdvancerInferred { .. })));
    }

    #[test]
    fn test_prefers_label_naming_a_candidate() {
        let entrants = make_entrants();
        let previous = create_test_round([Some(0), Some(3)]);
        // the nearer label names nobody in this match
        let mut pools = TokenPools::new(
            vec![make_label("Holm E", 131.0), make_label("Berg A", 150.0)],
            Vec::new(),
        );
        let mut report = ValidationReport::new();
        let advanced =
            Stage05RoundAdvancer::new().process(&previous, input(&[0, 1]), &entrants, &mut pools, &mut report);

        let m = &advanced.round.matches[0];
        assert_eq!(m.winner(), Some(EntrantId(0)));
        assert_eq!(m.winner_label(), Some(LabelId(1)));
        assert_eq!(advanced.leftover_labels, vec![0]);
    }

    #[test]
    fn test_distant_label_stays_with_its_own_match() {
        let entrants = make_entrants();
        let sources: Vec<Match> = [110.0, 150.0, 190.0, 230.0]
            .into_iter()
            .enumerate()
            .map(|(idx, center)| {
                let mut m = Match::new(vec![EntrantId(idx)], center);
                m.set_winner(EntrantId(idx));
                m
            })
            .collect();
        let previous = Round::new(sources);
        // only the lower pair has a label, far outside the upper pair's tolerance
        let mut pools = TokenPools::new(vec![make_label("Holm E", 210.0)], Vec::new());
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[0]), &entrants, &mut pools, &mut report);

        let [upper, lower] = advanced.round.matches.as_slice() else {
            panic!("expected two matches, got {}", advanced.round.len());
        };
        assert_eq!(upper.winner_label(), None);
        assert_eq!(upper.winner(), None);
        assert_eq!(lower.winner_label(), Some(LabelId(0)));
        assert_eq!(lower.winner(), Some(EntrantId(2)));
    }

    #[test]
    fn test_distant_label_naming_a_candidate_is_taken() {
        let entrants = make_entrants();
        let previous = create_test_round([Some(0), Some(3)]);
        let mut pools = TokenPools::new(vec![make_label("Dahl S", 400.0)], Vec::new());
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[0]), &entrants, &mut pools, &mut report);
        assert_eq!(advanced.round.matches[0].winner(), Some(EntrantId(3)));
    }

    #[test]
    fn test_walkover_source_without_winner_sends_nobody() {
        let entrants = make_entrants();
        let mut first = Match::new(vec![EntrantId(0), EntrantId(1)], 110.0);
        first.mark_walkover();
        let mut second = Match::new(vec![EntrantId(2), EntrantId(3)], 150.0);
        second.set_winner(EntrantId(2));
        let previous = Round::new(vec![first, second]);
        let mut pools = TokenPools::new(Vec::new(), vec![make_score(130.0)]);
        let mut report = ValidationReport::new();
        let advanced = Stage05RoundAdvancer::new().process(&previous, input(&[]), &entrants, &mut pools, &mut report);

        let m = &advanced.round.matches[0];
        assert!(m.is_bye());
        assert_eq!(m.winner(), Some(EntrantId(2)));
        assert!(m.score().is_none());
        assert_eq!(pools.scores.remaining(), 1);
    }

    #[test]
    fn test_tolerances_widen_per_round() {
        let config = Stage05Config::default();
        assert!((config.winner_tolerance(0) - 24.0).abs() < 1e-9);
        assert!((config.winner_tolerance(3) - 36.0).abs() < 1e-9);
        assert!((config.score_tolerance(2) - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_missing_winners() {
        let mut previous = create_test_round([None, Some(2)]);
        let next = Round::new(vec![Match::new(vec![EntrantId(1), EntrantId(3)], 130.0)]);
        assert_eq!(fill_missing_winners(&mut previous, &next), 2);
        assert_eq!(previous.matches[0].winner(), Some(EntrantId(1)));
        // non-advancing winner is switched to the advancing participant
        assert_eq!(previous.matches[1].winner(), Some(EntrantId(3)));
        assert_eq!(fill_missing_winners(&mut previous, &next), 0);
    }

    #[test]
    fn test_apply_label_advancers_fills_only() {
        let entrants = make_entrants();
        let mut round = create_test_round([None, Some(2)]);
        let labels = Pool::new(vec![make_label("Lind K", 130.0), make_label("Dahl S", 140.0)]);
        assert_eq!(apply_label_advancers(&mut round, &[0, 1], &labels, &entrants), 1);
        assert_eq!(round.matches[0].winner(), Some(EntrantId(1)));
        assert_eq!(round.matches[1].winner(), Some(EntrantId(2)));
    }
}
