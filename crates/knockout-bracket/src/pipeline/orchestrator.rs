/// Bracket Pipeline Orchestrator
///
/// Coordinates stages 01-09 for one result sheet.
///
/// Flow:
///   - Stage 01 scans the tokens; stages 02-03 band the columns and allocate
///     label chunks to rounds
///   - Stage 04 builds round one, Stage 05 every later round; after each
///     transition winners are back-filled from the new round
///   - A backward sweep, Stage 06 (final synthesis, duplicate-final merge) and a
///     second sweep close the main bracket
///   - Stage 07 attaches walkovers before the residual score sweep, so that
///     forfeited matches do not pick up stray blobs
///   - Stage 08 resolves the qualification round, Stage 09 validates
///   - A sheet printing its bracket as two half pages runs stages 01-08 once per
///     page; Stage 06 stitches the halves before Stage 09
use crate::config::BracketConfig;
use crate::error::{BracketError, Result};
use crate::pipeline::pool::{ScoreWindow, TokenPools};
use crate::pipeline::report::{FindingKind, RoundContext, ValidationReport};
use crate::pipeline::stage01_token_scanner::{ScannedPage, Stage01TokenScanner};
use crate::pipeline::stage02_column_banding::{closest_score_band, ColumnBand, Stage02ColumnBander};
use crate::pipeline::stage03_round_allocation::{RoundPlan, Stage03RoundAllocator};
use crate::pipeline::stage04_first_round::Stage04FirstRoundBuilder;
use crate::pipeline::stage05_round_advancer::{
    apply_label_advancers, fill_missing_winners, RoundInput, Stage05RoundAdvancer,
};
use crate::pipeline::stage06_final_round::{FinalBands, Stage06FinalRound, StitchTokens};
use crate::pipeline::stage07_walkover::Stage07WalkoverResolver;
use crate::pipeline::stage08_qualification::Stage08QualificationResolver;
use crate::pipeline::stage09_validator::Stage09Validator;
use crate::pipeline::types::{Bracket, EntrantLine, PositionedToken, Round, WalkoverMarker};
use serde::{Deserialize, Serialize};

/// Bracket plus the findings collected while building it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BracketOutput {
    pub bracket: Bracket,
    pub report: ValidationReport,
}

impl BracketOutput {
    /// Encode as pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| BracketError::SerializationError { source })
    }
}

/// Main rounds under construction plus the score column each one drew from
#[derive(Debug, Default)]
struct RoundsBuilt {
    rounds: Vec<Round>,
    score_columns: Vec<ColumnBand>,
}

/// Pipeline orchestrator that runs stages 01-09
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketPipeline {
    stage01: Stage01TokenScanner,
    stage02: Stage02ColumnBander,
    stage03: Stage03RoundAllocator,
    stage04: Stage04FirstRoundBuilder,
    stage05: Stage05RoundAdvancer,
    stage06: Stage06FinalRound,
    stage07: Stage07WalkoverResolver,
    stage08: Stage08QualificationResolver,
    stage09: Stage09Validator,
    verbose_diagnostics: bool,
}

impl BracketPipeline {
    /// Create a new pipeline with default configurations
    #[inline]
    #[must_use = "pipeline is created but not used"]
    pub fn new() -> Self {
        Self::with_config(&BracketConfig::default())
    }

    /// Create a new pipeline from a `BracketConfig`
    #[must_use = "pipeline is created but not used"]
    pub fn with_config(config: &BracketConfig) -> Self {
        Self {
            stage01: Stage01TokenScanner::with_config(config.scanner),
            stage02: Stage02ColumnBander::with_config(config.banding),
            stage03: Stage03RoundAllocator::with_config(config.allocation),
            stage04: Stage04FirstRoundBuilder::with_config(config.first_round),
            stage05: Stage05RoundAdvancer::with_config(config.advancer),
            stage06: Stage06FinalRound::with_config(config.final_round),
            stage07: Stage07WalkoverResolver::with_config(config.walkover),
            stage08: Stage08QualificationResolver::with_config(config.qualification),
            stage09: Stage09Validator::new(),
            verbose_diagnostics: config.verbose_diagnostics,
        }
    }

    /// Reconstruct the bracket of one result sheet
    ///
    /// Args:
    ///   `tokens`: positioned tokens; the lowest page is read, or the two lowest
    ///     when the sheet prints its bracket as two halves
    ///   `tree_size`: authoritative number of first-round slots, if known
    ///
    /// Never fails: sparse input yields a partial bracket plus findings.
    #[must_use = "bracket output is returned but not used"]
    pub fn process(&self, tokens: &[PositionedToken], tree_size: Option<usize>) -> BracketOutput {
        let mut report = ValidationReport::new();
        let mut pages: Vec<usize> = tokens.iter().map(|t| t.page).collect();
        pages.sort_unstable();
        pages.dedup();

        let (bracket, read) = match self.split_pages(tokens, &pages, tree_size) {
            Some((upper, lower)) => {
                let read = vec![upper.page, lower.page];
                (self.build_halves(upper, lower, tree_size, &mut report), read)
            }
            None => {
                let scanned = self.stage01.process(tokens);
                let read = vec![scanned.page];
                (self.build_page(scanned, tree_size, &mut report), read)
            }
        };

        let ignored: Vec<usize> = pages.into_iter().filter(|p| !read.contains(p)).collect();
        if !ignored.is_empty() {
            let count = tokens.iter().filter(|t| ignored.contains(&t.page)).count();
            report.push(
                FindingKind::PagesIgnored {
                    pages: ignored.clone(),
                    tokens: count,
                },
                RoundContext::bracket(),
                format!("{count} tokens on pages {ignored:?} not read"),
            );
        }

        self.stage09.process(&bracket, &mut report);
        log::debug!(
            "Stage 09: {} matches, {} findings ({} warnings)",
            bracket.match_count(),
            report.len(),
            report.warning_count()
        );
        BracketOutput { bracket, report }
    }

    /// The two lowest pages, scanned, when they print one bracket as two halves
    ///
    /// With a known tree size the halves are assumed from `split_min_tree_size`
    /// up; otherwise both pages must list `split_min_page_entrants` main entrants.
    fn split_pages(
        &self,
        tokens: &[PositionedToken],
        pages: &[usize],
        tree_size: Option<usize>,
    ) -> Option<(ScannedPage, ScannedPage)> {
        let &[first, second, ..] = pages else {
            return None;
        };
        let config = self.stage06.config();
        let known = tree_size.filter(|&t| t >= 2);
        if known.is_some_and(|t| t.next_power_of_two() < config.split_min_tree_size) {
            return None;
        }
        let scan = |page: usize| {
            let page_tokens: Vec<PositionedToken> = tokens.iter().filter(|t| t.page == page).cloned().collect();
            self.stage01.process(&page_tokens)
        };
        let (upper, lower) = (scan(first), scan(second));
        if known.is_none() {
            let enough = |p: &ScannedPage| p.main_entrants().count() >= config.split_min_page_entrants;
            if !(enough(&upper) && enough(&lower)) {
                return None;
            }
        }
        log::debug!("Reading pages {first} and {second} as two bracket halves");
        Some((upper, lower))
    }

    /// Build each page as a half bracket and stitch them under a grand final
    fn build_halves(
        &self,
        mut upper: ScannedPage,
        mut lower: ScannedPage,
        tree_size: Option<usize>,
        report: &mut ValidationReport,
    ) -> Bracket {
        let half_size = tree_size.filter(|&t| t >= 2).map_or_else(
            || {
                [&upper, &lower]
                    .iter()
                    .map(|p| p.main_entrants().count().next_power_of_two())
                    .max()
                    .unwrap_or(2)
                    .max(2)
            },
            |t| (t.next_power_of_two() / 2).max(2),
        );

        let mut stitch = StitchTokens::default();
        for page in [&mut upper, &mut lower] {
            let xs: Vec<f64> = page.labels.iter().map(|l| l.x).collect();
            let label_bands = self.stage02.process(&xs);
            stitch = self
                .stage06
                .withhold_stitch_tokens(&mut page.labels, &mut page.scores, &label_bands, half_size);
            if !stitch.is_empty() {
                break;
            }
        }

        let pages = vec![upper.page, lower.page];
        let upper = self.build_page(upper, Some(half_size), report);
        let lower = self.build_page(lower, Some(half_size), report);
        let mut bracket = self.stage06.stitch_halves(upper, lower, stitch, half_size * 2);
        bracket.tree_size_inferred = tree_size.filter(|&t| t >= 2).is_none();
        report.push(
            FindingKind::HalvesStitched { pages: pages.clone() },
            RoundContext::bracket(),
            format!("pages {pages:?} read as two halves of a {}-slot bracket", bracket.tree_size),
        );
        bracket
    }

    /// Stages 02-08 over one scanned page
    fn build_page(&self, scanned: ScannedPage, tree_size: Option<usize>, report: &mut ValidationReport) -> Bracket {
        let mut pools = TokenPools::new(scanned.labels.clone(), scanned.scores.clone());

        let label_xs: Vec<f64> = scanned.labels.iter().map(|l| l.x).collect();
        let score_xs: Vec<f64> = scanned.scores.iter().map(|s| s.x0).collect();
        let label_bands = self.stage02.process(&label_xs);
        let score_bands = self.stage02.process(&score_xs);
        let plan = self.stage03.process(&scanned.labels, &label_bands, tree_size);
        log::debug!(
            "Stage 03: tree size {}{}, {} label chunks",
            plan.tree_size,
            if plan.inferred { " (inferred)" } else { "" },
            plan.rounds.len()
        );

        let main_count = scanned.main_entrants().count();
        let main_entrants = &scanned.entrants[..main_count];
        let offset = self.stage01.config().qualification_offset;
        let (main_markers, qualification_markers) = split_markers(&scanned, offset);

        let mut built = if scanned.labels.is_empty() {
            log::warn!("No winner labels detected on page {}", scanned.page);
            RoundsBuilt::default()
        } else if self
            .stage07
            .is_tiny_bracket(main_count, scanned.double_walkover_present)
        {
            log::debug!("Stage 07: tiny double-walkover class with {main_count} entrants");
            RoundsBuilt {
                rounds: self
                    .stage07
                    .build_tiny_bracket(main_entrants, &main_markers, &mut pools),
                score_columns: Vec::new(),
            }
        } else {
            self.build_rounds(&scanned, &plan, &score_bands, &mut pools, report)
        };

        backward_sweep(&mut built.rounds);
        let bands = FinalBands {
            label_band: label_bands.last().copied(),
            score_band: score_bands.last().copied(),
        };
        self.stage06
            .process(&mut built.rounds, bands, &scanned.entrants, &mut pools, report);
        backward_sweep(&mut built.rounds);

        let walkovers = self.stage07.process(
            &mut built.rounds,
            &main_markers,
            &built.score_columns,
            &scanned.entrants,
            plan.tree_size,
        );
        let residual = self.stage06.sweep_residual_scores(&mut built.rounds, &mut pools);
        log::debug!("Stage 07: {walkovers} walkovers, {residual} residual scores attached");

        let qualification = self.stage08.process(
            &scanned.entrants,
            &built.rounds,
            &qualification_markers,
            &mut pools,
            report,
        );

        if self.verbose_diagnostics {
            Self::log_final_state(&built.rounds, qualification.as_ref(), &scanned.entrants, &pools);
        }

        Bracket {
            tree_size: plan.tree_size,
            tree_size_inferred: plan.inferred,
            rounds: built.rounds,
            qualification,
            entrants: scanned.entrants,
            scores: scanned.scores,
            labels: scanned.labels,
        }
    }

    /// Round loop over the planned label chunks
    fn build_rounds(
        &self,
        scanned: &ScannedPage,
        plan: &RoundPlan,
        score_bands: &[ColumnBand],
        pools: &mut TokenPools,
        report: &mut ValidationReport,
    ) -> RoundsBuilt {
        let advancer = self.stage05.config();
        let main_count = scanned.main_entrants().count();
        let main_entrants = &scanned.entrants[..main_count];
        let mut available_bands: Vec<ColumnBand> = score_bands.to_vec();
        let mut carried: Vec<usize> = Vec::new();
        let mut previous_columns: Option<(ColumnBand, ColumnBand)> = None;
        let mut built = RoundsBuilt::default();

        for (ridx, chunk) in plan.rounds.iter().enumerate() {
            let mut label_ids = std::mem::take(&mut carried);
            label_ids.extend(chunk.iter().copied());
            let Some(winner_band) = label_span(&label_ids, pools) else {
                continue;
            };
            if let [.., before_last, last] = built.rounds.as_slice() {
                if before_last.len() <= 1 && last.len() <= 1 {
                    log::trace!("Round loop: final already duplicated, {} chunks unused", plan.rounds.len() - ridx);
                    break;
                }
            }

            let next_chunk = plan.rounds.get(ridx + 1).map_or(&[][..], Vec::as_slice);
            // carried labels stay in their own column; locate the round by its chunk
            let column = label_span(chunk, pools).unwrap_or(winner_band);
            // a collapsed column holds two rounds' labels and their scores
            let shared = previous_columns.filter(|(labels, _)| labels.overlaps(&column));
            let score_band = match shared {
                Some((_, scores)) => scores,
                None => closest_score_band(
                    &available_bands,
                    column,
                    label_span(next_chunk, pools),
                    advancer.score_fallback_width,
                ),
            };
            let rounds_left = plan.rounds.len() - (ridx + 1);
            let reserved = match available_bands.iter().position(|b| *b == score_band) {
                Some(pos) if rounds_left > advancer.score_band_reserve_rounds => {
                    available_bands.remove(pos);
                    true
                }
                _ => false,
            };
            previous_columns = Some((column, score_band));
            let padded = score_band.padded(advancer.score_window_padding);
            let window = ScoreWindow::new(padded.start, padded.end);
            let scores_before = pools.scores.remaining();

            let current = match built.rounds.last_mut() {
                None => {
                    let mut round =
                        self.stage04
                            .process(main_entrants, &label_ids, pools, window, plan.tree_size);
                    apply_label_advancers(&mut round, next_chunk, &pools.labels, &scanned.entrants);
                    round
                }
                Some(previous) => {
                    let input = RoundInput {
                        round_index: ridx,
                        label_ids: &label_ids,
                        window,
                    };
                    let advanced = self
                        .stage05
                        .process(previous, input, &scanned.entrants, pools, report);
                    let mut round = advanced.round;
                    fill_missing_winners(previous, &round);
                    apply_label_advancers(&mut round, next_chunk, &pools.labels, &scanned.entrants);
                    carried = advanced.leftover_labels;
                    round
                }
            };

            let consumed = scores_before - pools.scores.remaining();
            if consumed == 0 && reserved {
                available_bands.insert(0, score_band);
            }
            if current.is_empty() {
                log::trace!("Round loop: chunk {ridx} produced no matches");
                continue;
            }
            if self.verbose_diagnostics {
                Self::log_round_state(ridx, &current, &scanned.entrants, score_band);
            }
            built.rounds.push(current);
            built.score_columns.push(score_band);
        }
        built
    }

    fn log_round_state(ridx: usize, round: &Round, entrants: &[EntrantLine], band: ColumnBand) {
        log::debug!(
            "=== ROUND {} ({}) score column [{:.1}, {:.1}] ===",
            ridx,
            round.display_name(),
            band.start,
            band.end
        );
        for (midx, m) in round.matches.iter().enumerate() {
            let names: Vec<String> = m
                .participants()
                .iter()
                .filter_map(|id| entrants.get(id.0))
                .map(EntrantLine::display_name)
                .collect();
            log::debug!(
                "  Match[{}] y={:.1} {:?} winner={:?} score={:?}{}",
                midx,
                m.center(),
                names,
                m.winner().and_then(|id| entrants.get(id.0)).map(EntrantLine::display_name),
                m.score_csv(),
                if m.is_walkover() { " WO" } else { "" }
            );
        }
    }

    fn log_final_state(
        rounds: &[Round],
        qualification: Option<&Round>,
        entrants: &[EntrantLine],
        pools: &TokenPools,
    ) {
        log::debug!("=== BRACKET ASSEMBLED ===");
        for (ridx, round) in rounds.iter().enumerate() {
            log::debug!(
                "  Round[{}] {} matches={} synthesized={}",
                ridx,
                round.display_name(),
                round.len(),
                round.synthesized
            );
        }
        if let Some(q) = qualification {
            log::debug!("  Qualification matches={}", q.len());
        }
        log::debug!(
            "  Entrants={} unused labels={} unused scores={}",
            entrants.len(),
            pools.labels.remaining(),
            pools.scores.remaining()
        );
    }
}

/// Horizontal span of a label chunk
fn label_span(label_ids: &[usize], pools: &TokenPools) -> Option<ColumnBand> {
    let xs: Vec<f64> = label_ids
        .iter()
        .filter_map(|&idx| pools.labels.get(idx))
        .map(|l| l.x)
        .collect();
    if xs.is_empty() {
        return None;
    }
    let start = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let end = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(ColumnBand::new(start, end))
}

/// Walkover markers of the main bracket and of the qualification section
fn split_markers(scanned: &ScannedPage, offset: f64) -> (Vec<WalkoverMarker>, Vec<WalkoverMarker>) {
    match &scanned.qualification_header {
        Some(header) => {
            let split = header.center + offset;
            scanned
                .walkover_markers
                .iter()
                .cloned()
                .partition(|m| m.center < split)
        }
        None => (scanned.walkover_markers.clone(), Vec::new()),
    }
}

/// Back-fill winners from the last round towards the first
fn backward_sweep(rounds: &mut [Round]) {
    for ridx in (0..rounds.len().saturating_sub(1)).rev() {
        let (head, tail) = rounds.split_at_mut(ridx + 1);
        fill_missing_winners(&mut head[ridx], &tail[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: &[&str] = &[
        "Berg Anna",
        "Lind Karin",
        "Holm Erik",
        "Dahl Sara",
        "Ek Johan",
        "Falk Maria",
        "Nord Olle",
        "Strand Eva",
    ];

    fn entrant_token(idx: usize) -> PositionedToken {
        let center = 100.0 + 20.0 * idx as f64;
        PositionedToken::new(format!("{}, BTK Test", NAMES[idx]), 20.0, 150.0, center - 4.0, center + 4.0)
    }

    fn label_token(text: &str, x: f64, center: f64) -> PositionedToken {
        PositionedToken::new(text, x, x + 50.0, center - 4.0, center + 4.0)
    }

    fn short(idx: usize) -> String {
        let mut parts = NAMES[idx].split_whitespace();
        let surname = parts.next().unwrap_or_default();
        let given = parts.next().unwrap_or_default();
        format!("{surname} {}", &given[..1])
    }

    /// Eight entrants, top-seeded side always wins
    fn create_test_ro8() -> Vec<PositionedToken> {
        let mut tokens: Vec<PositionedToken> = (0..8).map(entrant_token).collect();
        let mut centers: Vec<f64> = Vec::new();
        for pair in 0..4 {
            let center = 110.0 + 40.0 * pair as f64;
            centers.push(center);
            tokens.push(label_token(&short(pair * 2), 200.0, center));
            tokens.push(label_token("8, 9, 6", 260.0, center + 2.0));
        }
        for (pair, w) in [(0usize, 0usize), (1, 4)] {
            let center = (centers[pair * 2] + centers[pair * 2 + 1]) / 2.0;
            tokens.push(label_token(&short(w), 320.0, center));
            tokens.push(label_token("5, 7, 9", 380.0, center + 2.0));
        }
        tokens.push(label_token(&short(0), 440.0, 170.0));
        tokens.push(label_token("-6, 8, 9, 9", 500.0, 172.0));
        tokens
    }

    #[test]
    fn test_pipeline_builds_complete_ro8() {
        let _ = env_logger::builder().is_test(true).try_init();
        let output = BracketPipeline::new().process(&create_test_ro8(), Some(8));
        let bracket = &output.bracket;
        assert_eq!(bracket.rounds.iter().map(Round::len).collect::<Vec<_>>(), vec![4, 2, 1]);
        assert_eq!(bracket.champion().map(|e| e.full_name.as_str()), Some("Berg Anna"));
        for (_, m) in bracket.iter_matches() {
            assert!(m.winner().is_some());
            assert!(m.margins().is_some());
        }
        assert!(!output.report.any(|k| matches!(k, FindingKind::UnconsumedScore { .. })));
    }

    #[test]
    fn test_pipeline_infers_tree_size() {
        let output = BracketPipeline::new().process(&create_test_ro8(), None);
        assert_eq!(output.bracket.tree_size, 8);
        assert!(output.bracket.tree_size_inferred);
        assert!(output.report.any(|k| matches!(k, FindingKind::TreeSizeInferred { .. })));
    }

    #[test]
    fn test_pipeline_reports_ignored_pages() {
        let mut tokens = create_test_ro8();
        tokens.push(entrant_token(0).on_page(2));
        tokens.push(label_token("Berg A", 200.0, 110.0).on_page(2));
        let output = BracketPipeline::new().process(&tokens, Some(8));
        assert_eq!(output.bracket, BracketPipeline::new().process(&create_test_ro8(), Some(8)).bracket);
        assert!(output
            .report
            .any(|k| matches!(k, FindingKind::PagesIgnored { pages, tokens: 2 } if pages == &vec![2])));
        assert!(!output.report.any(|k| matches!(k, FindingKind::HalvesStitched { .. })));
    }

    #[test]
    fn test_pipeline_without_labels() {
        let tokens: Vec<PositionedToken> = (0..4).map(entrant_token).collect();
        let output = BracketPipeline::new().process(&tokens, Some(4));
        assert!(output.bracket.rounds.is_empty());
        assert_eq!(output.bracket.entrants.len(), 4);
        assert!(output.report.any(|k| matches!(k, FindingKind::NoWinnerLabels)));
    }

    #[test]
    fn test_pipeline_empty_input() {
        let output = BracketPipeline::new().process(&[], None);
        assert!(output.bracket.rounds.is_empty());
        assert!(output.bracket.entrants.is_empty());
    }

    #[test]
    fn test_output_json_contains_rounds() {
        let output = BracketPipeline::new().process(&create_test_ro8(), Some(8));
        let json = output.to_json_pretty().unwrap();
        assert!(json.contains("\"rounds\""));
        assert!(json.contains("Berg Anna"));
    }

    #[test]
    fn test_backward_sweep_fills_first_round() {
        use crate::pipeline::types::{EntrantId, Match};
        let mut rounds = vec![
            Round::new(vec![
                Match::new(vec![EntrantId(0), EntrantId(1)], 110.0),
                Match::new(vec![EntrantId(2), EntrantId(3)], 150.0),
            ]),
            Round::new(vec![Match::new(vec![EntrantId(1), EntrantId(2)], 130.0)]),
        ];
        backward_sweep(&mut rounds);
        assert_eq!(rounds[0].matches[0].winner(), Some(EntrantId(1)));
        assert_eq!(rounds[0].matches[1].winner(), Some(EntrantId(2)));
    }
}
