/// Stage 9: Validation
///
/// Structural and semantic checks over the assembled bracket. Never mutates
/// the bracket, only appends findings.
///
/// Checks:
/// - No winner labels at all, tree size inferred (info)
/// - Round sizes against `tree_size / 2^(r+1)` and against halving
/// - Duplicate entrants among contested first-round matches
/// - Main entrants that appear neither in the rounds nor in qualification
/// - Per match: missing winner, missing score, walkover carrying a score
/// - Qualification matches left without a winner
/// - Best-of disagreement within a round
/// - Winners not advancing, next-round participants without a recorded win
/// - Players appearing in more matches than there are rounds
/// - Score blobs attached to no match (only while some played two-participant
///   match is still unscored)
use crate::pipeline::report::{FindingKind, RoundContext, ValidationReport};
use crate::pipeline::types::{Bracket, EntrantId, PlayerKey, Round};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Stage 9: Validator
///
/// Input: `&Bracket`
/// Output: findings appended to the `ValidationReport`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stage09Validator;

impl Stage09Validator {
    /// Create a new `Stage09Validator`
    #[inline]
    #[must_use = "validator stage is created but not used"]
    pub const fn new() -> Self {
        Self
    }

    /// Validate `bracket`, appending findings to `report`
    pub fn process(&self, bracket: &Bracket, report: &mut ValidationReport) {
        let before = report.len();

        if bracket.labels.is_empty() {
            report.push(
                FindingKind::NoWinnerLabels,
                RoundContext::bracket(),
                "no winner labels detected on the page",
            );
        }
        if bracket.tree_size_inferred {
            report.push(
                FindingKind::TreeSizeInferred {
                    tree_size: bracket.tree_size,
                },
                RoundContext::bracket(),
                format!("tree size missing, inferred {} from the winner labels", bracket.tree_size),
            );
        }

        Self::check_round_sizes(bracket, report);
        Self::check_duplicates(bracket, report);
        Self::check_coverage(bracket, report);
        Self::check_matches(bracket, report);
        Self::check_qualification(bracket, report);
        Self::check_progression(bracket, report);
        Self::check_appearances(bracket, report);
        Self::check_residual_scores(bracket, report);

        log::debug!("Stage 9: {} findings", report.len() - before);
    }

    fn name(bracket: &Bracket, id: EntrantId) -> String {
        bracket
            .entrant(id)
            .map_or_else(|| format!("entrant #{}", id.0), |e| e.display_name())
    }

    fn context(round_index: usize, round: &Round) -> RoundContext {
        RoundContext::round(round_index, round.display_name())
    }

    fn check_round_sizes(bracket: &Bracket, report: &mut ValidationReport) {
        for (ridx, round) in bracket.rounds.iter().enumerate() {
            let expected = u32::try_from(ridx + 1)
                .ok()
                .and_then(|shift| bracket.tree_size.checked_shr(shift))
                .unwrap_or(0)
                .max(1);
            if round.len() != expected {
                report.push(
                    FindingKind::RoundSizeMismatch {
                        expected,
                        actual: round.len(),
                    },
                    Self::context(ridx, round),
                    format!("expected {expected} matches, parsed {}", round.len()),
                );
            }
        }
        for (ridx, pair) in bracket.rounds.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            let halved = (current.len() / 2).max(1);
            if !next.synthesized && next.len() != halved {
                report.push(
                    FindingKind::RoundNotHalved {
                        previous: current.len(),
                        actual: next.len(),
                    },
                    Self::context(ridx + 1, next),
                    format!("{} matches after a round of {}", next.len(), current.len()),
                );
            }
        }
    }

    fn check_duplicates(bracket: &Bracket, report: &mut ValidationReport) {
        let Some(first) = bracket.rounds.first() else {
            return;
        };
        let mut seen: FxHashSet<PlayerKey> = FxHashSet::default();
        let mut duplicates: BTreeSet<String> = BTreeSet::new();
        for m in first.matches.iter().filter(|m| m.is_contested()) {
            for &id in m.participants() {
                let Some(entrant) = bracket.entrant(id) else {
                    continue;
                };
                if !seen.insert(entrant.identity_key()) {
                    duplicates.insert(entrant.display_name());
                }
            }
        }
        for player in duplicates {
            report.push(
                FindingKind::DuplicateEntrant { player: player.clone() },
                Self::context(0, first),
                format!("{player} appears more than once in the first round"),
            );
        }
    }

    fn check_coverage(bracket: &Bracket, report: &mut ValidationReport) {
        let used: FxHashSet<PlayerKey> = bracket
            .rounds
            .iter()
            .chain(bracket.qualification.iter())
            .flat_map(Round::participants)
            .filter_map(|id| bracket.entrant(id))
            .map(|e| e.identity_key())
            .collect();
        for entrant in bracket.main_entrants() {
            if !used.contains(&entrant.identity_key()) {
                let player = entrant.display_name();
                report.push(
                    FindingKind::EntrantNotInBracket { player: player.clone() },
                    RoundContext::bracket(),
                    format!("{player} never appears in the bracket"),
                );
            }
        }
    }

    fn check_matches(bracket: &Bracket, report: &mut ValidationReport) {
        for (ridx, round) in bracket.rounds.iter().enumerate() {
            let mut best_of: BTreeSet<usize> = BTreeSet::new();
            for (midx, m) in round.matches.iter().enumerate() {
                let context = Self::context(ridx, round).in_match(midx);
                let versus = || {
                    m.participants()
                        .iter()
                        .map(|&p| Self::name(bracket, p))
                        .collect::<Vec<_>>()
                        .join(" vs ")
                };
                if m.is_walkover() && m.score().is_some() {
                    report.push(FindingKind::WalkoverWithScore, context.clone(), format!("walkover {} carries a score", versus()));
                }
                if !m.is_contested() {
                    continue;
                }
                if m.score().is_none() && !m.is_walkover() {
                    report.push(FindingKind::MissingScore, context.clone(), format!("missing score for {}", versus()));
                }
                if m.winner().is_none() {
                    report.push(FindingKind::MissingWinner, context, format!("missing winner for {}", versus()));
                }
                if let Some(value) = m.best_of() {
                    best_of.insert(value);
                }
            }
            if best_of.len() > 1 {
                let values: Vec<usize> = best_of.into_iter().collect();
                report.push(
                    FindingKind::InconsistentBestOf { values: values.clone() },
                    Self::context(ridx, round),
                    format!("best-of values {values:?} within one round"),
                );
            }
        }
    }

    fn check_qualification(bracket: &Bracket, report: &mut ValidationReport) {
        let Some(qualification) = &bracket.qualification else {
            return;
        };
        for (midx, m) in qualification.matches.iter().enumerate() {
            if m.is_contested() && m.winner().is_none() {
                report.push(
                    FindingKind::MissingWinner,
                    RoundContext::qualification().in_match(midx),
                    "qualification winner left unresolved: presence in the main bracket is ambiguous",
                );
            }
        }
    }

    fn check_progression(bracket: &Bracket, report: &mut ValidationReport) {
        for (ridx, pair) in bracket.rounds.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            let winners: Vec<EntrantId> = current.winners().collect();
            let participants: Vec<EntrantId> = next.participants().collect();
            let winner_set: FxHashSet<EntrantId> = winners.iter().copied().collect();
            let participant_set: FxHashSet<EntrantId> = participants.iter().copied().collect();

            for id in winners.iter().filter(|id| !participant_set.contains(id)) {
                let player = Self::name(bracket, *id);
                report.push(
                    FindingKind::WinnerNotAdvancing { player: player.clone() },
                    Self::context(ridx, current),
                    format!("{player} won but is missing from {}", next.display_name()),
                );
            }
            for id in participants.iter().filter(|id| !winner_set.contains(id)) {
                let player = Self::name(bracket, *id);
                report.push(
                    FindingKind::ParticipantWithoutWin { player: player.clone() },
                    Self::context(ridx + 1, next),
                    format!("{player} plays without a recorded win in {}", current.display_name()),
                );
            }
        }
    }

    fn check_appearances(bracket: &Bracket, report: &mut ValidationReport) {
        let rounds = bracket.rounds.len();
        let mut counts: FxHashMap<EntrantId, usize> = FxHashMap::default();
        for id in bracket.rounds.iter().flat_map(Round::participants) {
            *counts.entry(id).or_default() += 1;
        }
        let mut over: Vec<(EntrantId, usize)> = counts.into_iter().filter(|&(_, n)| n > rounds).collect();
        over.sort_unstable();
        for (id, appearances) in over {
            let player = Self::name(bracket, id);
            report.push(
                FindingKind::TooManyAppearances {
                    player: player.clone(),
                    appearances,
                    rounds,
                },
                RoundContext::bracket(),
                format!("{player} appears in {appearances} matches over {rounds} rounds"),
            );
        }
    }

    fn check_residual_scores(bracket: &Bracket, report: &mut ValidationReport) {
        let unscored = bracket
            .rounds
            .iter()
            .flat_map(|r| r.matches.iter())
            .any(|m| m.is_contested() && !m.is_walkover() && m.score().is_none());
        if !unscored {
            return;
        }
        let attached: FxHashSet<usize> = bracket
            .rounds
            .iter()
            .chain(bracket.qualification.iter())
            .flat_map(|r| r.matches.iter())
            .filter_map(|m| m.score().map(|s| s.id.0))
            .collect();
        for (idx, entry) in bracket.scores.iter().enumerate() {
            if attached.contains(&idx) {
                continue;
            }
            report.push(
                FindingKind::UnconsumedScore {
                    margins: entry.margins.clone(),
                    center: entry.center,
                    x: entry.x0,
                },
                RoundContext::bracket(),
                format!(
                    "score {} at x={:.1} y={:.1} not attached to any match",
                    entry.to_csv(),
                    entry.x0,
                    entry.center
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::names::{build_aliases, make_short};
    use crate::pipeline::report::FindingCategory;
    use crate::pipeline::types::{EntrantLine, EntrantOrigin, Match, ScoreEntry, ScoreId, WinnerEntry};

    const NAMES: &[&str] = &["Berg Anna", "Lind Karin", "Holm Erik", "Dahl Sara"];

    fn make_entrant(idx: usize) -> EntrantLine {
        EntrantLine {
            id: EntrantId(idx),
            full_name: NAMES[idx].to_string(),
            club: "BTK Test".to_string(),
            short_name: make_short(NAMES[idx]),
            code: None,
            suffix: None,
            center: 100.0 + 20.0 * idx as f64,
            x0: 20.0,
            x1: 160.0,
            origin: EntrantOrigin::Main,
            aliases: build_aliases(NAMES[idx]),
        }
    }

    fn make_score(margins: &[i32]) -> ScoreEntry {
        ScoreEntry {
            margins: margins.to_vec(),
            center: 110.0,
            x0: 260.0,
            x1: 290.0,
        }
    }

    fn played(a: usize, b: usize, winner: usize, score: usize, center: f64) -> Match {
        let mut m = Match::new(vec![EntrantId(a), EntrantId(b)], center);
        m.set_winner(EntrantId(winner));
        m.attach_score(ScoreId(score), vec![3, 4, 5]);
        m
    }

    /// Clean four-player bracket: 0 beats 1, 3 beats 2, 0 wins the final
    fn create_test_bracket() -> Bracket {
        let semis = Round::new(vec![played(0, 1, 0, 0, 110.0), played(2, 3, 3, 1, 150.0)]);
        let fin = Round::new(vec![played(0, 3, 0, 2, 130.0)]);
        Bracket {
            tree_size: 4,
            tree_size_inferred: false,
            rounds: vec![semis, fin],
            qualification: None,
            entrants: (0..4).map(make_entrant).collect(),
            scores: vec![make_score(&[3, 4, 5]); 3],
            labels: vec![
                WinnerEntry {
                    label: "Berg A".to_string(),
                    code: None,
                    center: 110.0,
                    x: 200.0,
                    emphasized: false,
                    double_walkover: false,
                };
                3
            ],
        }
    }

    fn validate(bracket: &Bracket) -> ValidationReport {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut report = ValidationReport::new();
        Stage09Validator::new().process(bracket, &mut report);
        report
    }

    #[test]
    fn test_clean_bracket_has_no_findings() {
        let report = validate(&create_test_bracket());
        assert!(report.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn test_info_flags() {
        let mut bracket = create_test_bracket();
        bracket.labels.clear();
        bracket.tree_size_inferred = true;
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::NoWinnerLabels)));
        assert!(report.any(|k| matches!(k, FindingKind::TreeSizeInferred { tree_size: 4 })));
    }

    #[test]
    fn test_round_size_mismatch_against_tree_size() {
        let mut bracket = create_test_bracket();
        bracket.tree_size = 8;
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::RoundSizeMismatch { expected: 4, actual: 2 })));
        assert!(report.any(|k| matches!(k, FindingKind::RoundSizeMismatch { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_missing_winner_and_score() {
        let mut bracket = create_test_bracket();
        bracket.rounds[1] = Round::new(vec![Match::new(vec![EntrantId(0), EntrantId(3)], 130.0)]);
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::MissingWinner)));
        assert!(report.any(|k| matches!(k, FindingKind::MissingScore)));
        // the final's blob is now unattached and some match lacks a score
        assert_eq!(report.by_category(FindingCategory::Residual).count(), 1);
    }

    #[test]
    fn test_walkover_without_score_is_not_missing_score() {
        let mut bracket = create_test_bracket();
        let mut fin = Match::new(vec![EntrantId(0), EntrantId(3)], 130.0);
        fin.mark_walkover();
        fin.set_winner(EntrantId(0));
        bracket.rounds[1] = Round::new(vec![fin]);
        let report = validate(&bracket);
        assert!(!report.any(|k| matches!(k, FindingKind::MissingScore)));
        // every played match is scored: the left-over blob is not reported
        assert!(!report.any(|k| matches!(k, FindingKind::UnconsumedScore { .. })));
    }

    #[test]
    fn test_walkover_with_score() {
        let mut bracket = create_test_bracket();
        bracket.rounds[1].matches[0].mark_walkover();
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::WalkoverWithScore)));
    }

    #[test]
    fn test_progression_checks() {
        let mut bracket = create_test_bracket();
        bracket.rounds[1] = Round::new(vec![played(0, 2, 0, 2, 130.0)]);
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::WinnerNotAdvancing { player } if player.contains("Dahl"))));
        assert!(report.any(|k| matches!(k, FindingKind::ParticipantWithoutWin { player } if player.contains("Holm"))));
    }

    #[test]
    fn test_inconsistent_best_of() {
        let mut bracket = create_test_bracket();
        bracket.rounds[0].matches[1].attach_score(ScoreId(1), vec![3, 4, 5, 6]);
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::InconsistentBestOf { values } if values == &vec![5, 7])));
    }

    #[test]
    fn test_duplicate_and_coverage() {
        let mut bracket = create_test_bracket();
        // a fifth line duplicating Berg Anna, and Lind Karin replaced by it
        let mut dup = make_entrant(0);
        dup.id = EntrantId(4);
        bracket.entrants.push(dup);
        bracket.rounds[0].matches[0] = played(0, 4, 0, 0, 110.0);
        let report = validate(&bracket);
        assert!(report.any(|k| matches!(k, FindingKind::DuplicateEntrant { player } if player.contains("Berg"))));
        assert!(report.any(|k| matches!(k, FindingKind::EntrantNotInBracket { player } if player.contains("Lind"))));
    }

    #[test]
    fn test_qualification_counts_for_coverage() {
        let mut bracket = create_test_bracket();
        bracket.rounds[0].matches[0] = played(0, 0, 0, 0, 110.0);
        bracket.qualification = Some(Round::new(vec![Match::new(vec![EntrantId(1), EntrantId(2)], 400.0)]));
        let report = validate(&bracket);
        assert!(!report.any(|k| matches!(k, FindingKind::EntrantNotInBracket { .. })));
        let open = report
            .iter()
            .find(|f| f.round_context.qualification)
            .map(|f| f.kind.clone());
        assert_eq!(open, Some(FindingKind::MissingWinner));
    }
}
