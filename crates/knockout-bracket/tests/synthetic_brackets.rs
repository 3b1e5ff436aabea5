//! # Synthetic Bracket Tests
//!
//! Complete sheets of 8 to 128 entrants generated by `common::synthetic`,
//! run through the whole pipeline.

mod common;

use common::init_logging;
use common::synthetic::{full_name, SyntheticSheet};
use knockout_bracket::{
    decode_tokens, reconstruct_bracket, reconstruct_bracket_with_config, reconstruct_many, BracketConfig,
    BracketPipeline, Document, EntrantId, FindingKind, Severity,
};
use rstest::rstest;

#[rstest]
#[case::ro8(8)]
#[case::ro16(16)]
#[case::ro32(32)]
#[case::ro64(64)]
#[case::ro128(128)]
fn test_complete_bracket(#[case] tree_size: usize) {
    init_logging();
    assert_reconstructed(&SyntheticSheet::complete(tree_size));
}

/// Two rounds printed in one label column and one score column
#[rstest]
#[case::ro64_quarterfinals(64, 2)]
#[case::ro128_quarterfinals(128, 3)]
#[case::ro128_last_sixteen(128, 2)]
fn test_collapsed_column_is_split(#[case] tree_size: usize, #[case] shared: usize) {
    init_logging();
    let sheet = SyntheticSheet::collapsed(tree_size, shared);
    let shared_labels = sheet.winners[shared].len() + sheet.winners[shared + 1].len();
    let column_x = common::synthetic::label_x(shared);
    let in_column = sheet
        .tokens
        .iter()
        .filter(|t| t.x0 == column_x && !t.text.contains(','))
        .count();
    assert_eq!(in_column, shared_labels);
    assert_reconstructed(&sheet);
}

fn assert_reconstructed(sheet: &SyntheticSheet) {
    let tree_size = sheet.tree_size;
    let output = reconstruct_bracket(&sheet.tokens, Some(tree_size));
    let bracket = &output.bracket;

    let sizes: Vec<usize> = bracket.rounds.iter().map(|r| r.len()).collect();
    let expected: Vec<usize> = sheet.winners.iter().map(Vec::len).collect();
    assert_eq!(sizes, expected);

    for (round, winners) in bracket.rounds.iter().zip(&sheet.winners) {
        let got: Vec<Option<EntrantId>> = round.matches.iter().map(|m| m.winner()).collect();
        let want: Vec<Option<EntrantId>> = winners.iter().map(|&w| Some(EntrantId(w))).collect();
        assert_eq!(got, want, "winners of {}", round.display_name());
        assert!(round.matches.iter().all(|m| m.score_csv().as_deref() == Some("8, 9, 6")));
    }
    assert_eq!(
        bracket.champion().map(|e| e.full_name.clone()),
        sheet.champion().map(full_name)
    );
    assert_eq!(bracket.match_count(), tree_size - 1);
    assert_eq!(output.report.warning_count(), 0, "{:#?}", output.report);
}

#[rstest]
#[case(8, 3)]
#[case(16, 4)]
#[case(32, 5)]
fn test_inferred_tree_size(#[case] tree_size: usize, #[case] rounds: usize) {
    let sheet = SyntheticSheet::complete(tree_size);
    let output = reconstruct_bracket(&sheet.tokens, None);
    assert_eq!(output.bracket.tree_size, tree_size);
    assert!(output.bracket.tree_size_inferred);
    assert_eq!(output.bracket.rounds.len(), rounds);
    assert!(output.report.iter().all(|f| f.severity == Severity::Info));
}

#[test]
fn test_round_display_names() {
    let sheet = SyntheticSheet::complete(16);
    let output = reconstruct_bracket(&sheet.tokens, Some(16));
    let names: Vec<String> = output.bracket.rounds.iter().map(|r| r.display_name()).collect();
    assert_eq!(names, vec!["RO16", "RO8/QF", "RO4/SF", "Final"]);
}

#[test]
fn test_missing_scores_are_reported() {
    init_logging();
    let mut sheet = SyntheticSheet::complete(8);
    // drop every score blob of the first round
    sheet.tokens.retain(|t| !(t.text.contains("8, 9, 6") && t.x0 < 300.0));
    let output = reconstruct_bracket(&sheet.tokens, Some(8));
    let missing: Vec<Option<usize>> = output
        .report
        .iter()
        .filter(|f| matches!(f.kind, FindingKind::MissingScore))
        .map(|f| f.round_context.round_index)
        .collect();
    assert_eq!(missing, vec![Some(0); 4]);
    assert!(output.bracket.rounds[0].matches.iter().all(|m| m.winner().is_some()));
    // the semifinal column is not borrowed by the unscored first round
    for round in &output.bracket.rounds[1..] {
        assert!(round.matches.iter().all(|m| m.score_csv().as_deref() == Some("8, 9, 6")));
    }
}

#[test]
fn test_later_pages_are_reported() {
    let sheet = SyntheticSheet::complete(8);
    let mut tokens = sheet.tokens.clone();
    let extra = SyntheticSheet::complete(16).tokens;
    let extra_count = extra.len();
    tokens.extend(extra.into_iter().map(|t| t.on_page(1)));

    for tree_size in [Some(8), None] {
        let with_noise = reconstruct_bracket(&tokens, tree_size);
        let clean = reconstruct_bracket(&sheet.tokens, tree_size);
        assert_eq!(with_noise.bracket, clean.bracket);
        let ignored: Vec<(Vec<usize>, usize)> = with_noise
            .report
            .iter()
            .filter_map(|f| match &f.kind {
                FindingKind::PagesIgnored { pages, tokens } => Some((pages.clone(), *tokens)),
                _ => None,
            })
            .collect();
        assert_eq!(ignored, vec![(vec![1], extra_count)]);
        assert_eq!(with_noise.report.warning_count(), clean.report.warning_count() + 1);
    }
}

/// Two half pages of 64, the grand final printed beside the upper half
#[rstest]
#[case::known_size(Some(128))]
#[case::inferred_size(None)]
fn test_two_page_bracket_is_stitched(#[case] tree_size: Option<usize>) {
    init_logging();
    let sheet = SyntheticSheet::two_page(128);
    let output = reconstruct_bracket(&sheet.tokens, tree_size);
    let bracket = &output.bracket;

    assert_eq!(bracket.tree_size, 128);
    assert_eq!(bracket.tree_size_inferred, tree_size.is_none());
    assert_eq!(bracket.entrants.len(), 128);
    let sizes: Vec<usize> = bracket.rounds.iter().map(|r| r.len()).collect();
    assert_eq!(sizes, vec![64, 32, 16, 8, 4, 2, 1]);
    for (round, winners) in bracket.rounds.iter().zip(&sheet.winners) {
        let got: Vec<Option<EntrantId>> = round.matches.iter().map(|m| m.winner()).collect();
        let want: Vec<Option<EntrantId>> = winners.iter().map(|&w| Some(EntrantId(w))).collect();
        assert_eq!(got, want, "winners of {}", round.display_name());
        assert!(round.matches.iter().all(|m| m.score_csv().as_deref() == Some("8, 9, 6")));
    }

    let fin = bracket.final_match().unwrap();
    assert_eq!(fin.participants(), &[EntrantId(0), EntrantId(64)]);
    assert_eq!(bracket.champion().map(|e| e.full_name.clone()), Some(full_name(0)));
    assert!(output
        .report
        .any(|k| matches!(k, FindingKind::HalvesStitched { pages } if pages == &vec![0, 1])));
    assert!(!output.report.any(|k| matches!(k, FindingKind::PagesIgnored { .. })));
    assert_eq!(output.report.warning_count(), 0, "{:#?}", output.report);
}

#[test]
fn test_two_page_bracket_without_grand_final_tokens() {
    let mut sheet = SyntheticSheet::two_page(128);
    let final_x = common::synthetic::label_x(6);
    sheet.tokens.retain(|t| t.x0 < final_x);
    let output = reconstruct_bracket(&sheet.tokens, Some(128));

    let fin = output.bracket.final_match().unwrap();
    assert_eq!(fin.participants(), &[EntrantId(0), EntrantId(64)]);
    assert_eq!(fin.winner(), None);
    assert!(output.report.any(|k| matches!(k, FindingKind::MissingWinner)));
}

#[test]
fn test_reconstruct_many_preserves_order() {
    let documents: Vec<Document> = [8, 16, 32]
        .into_iter()
        .map(|size| Document {
            tokens: SyntheticSheet::complete(size).tokens,
            tree_size: Some(size),
        })
        .collect();
    let outputs = reconstruct_many(&documents, &BracketConfig::default());
    let sizes: Vec<usize> = outputs.iter().map(|o| o.bracket.tree_size).collect();
    assert_eq!(sizes, vec![8, 16, 32]);
    for (doc, output) in documents.iter().zip(&outputs) {
        assert_eq!(*output, BracketPipeline::new().process(&doc.tokens, doc.tree_size));
    }
}

#[test]
fn test_decode_tokens_defaults_optional_fields() {
    let json = r#"[
        {"text": "Kaaa Anna, BTK Test", "x0": 20.0, "x1": 150.0, "top": 96.0, "bottom": 104.0},
        {"text": "Kaaa A", "x0": 200.0, "x1": 250.0, "top": 106.0, "bottom": 114.0, "font_name": "Arial-BoldMT", "page": 0}
    ]"#;
    let tokens = decode_tokens(json).unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].page, 0);
    assert!(tokens[0].font_name.is_empty());
    assert!(tokens[1].is_emphasized());
}

#[test]
fn test_decode_tokens_rejects_malformed_json() {
    let err = decode_tokens(r#"[{"text": "x"}"#).unwrap_err();
    assert!(err.is_token_decode_error());
}

#[test]
fn test_output_json_round_trip() {
    let sheet = SyntheticSheet::complete(8);
    let output = reconstruct_bracket(&sheet.tokens, Some(8));
    let json = output.to_json_pretty().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["bracket"]["tree_size"], 8);
    assert_eq!(value["bracket"]["rounds"].as_array().map(Vec::len), Some(3));
    assert!(value["report"]["findings"].as_array().is_some_and(Vec::is_empty));
}

#[test]
fn test_config_file_changes_behaviour() {
    let path = std::env::temp_dir().join(format!("knockout-bracket-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "[first_round]\nscore_tolerance = 0.5\n\n[final_round]\nresidual_score_tolerance = 0.5\n",
    )
    .unwrap();
    let config = BracketConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.first_round.score_tolerance, 0.5);

    // first-round blobs sit 2 units below their labels, out of reach now
    let sheet = SyntheticSheet::complete(8);
    let output = reconstruct_bracket_with_config(&sheet.tokens, Some(8), &config);
    let first = &output.bracket.rounds[0];
    assert!(first.matches.iter().all(|m| m.score().is_none()));
    assert!(first.matches.iter().all(|m| m.winner().is_some()));
    assert!(output.bracket.rounds[1].matches.iter().all(|m| m.score().is_some()));
    let missing = output
        .report
        .iter()
        .filter(|f| matches!(f.kind, FindingKind::MissingScore))
        .count();
    assert_eq!(missing, 4);
}
