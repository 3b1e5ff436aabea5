//! # Knockout Bracket - Bracket Reconstruction from Positioned Text
//!
//! Recovers single-elimination brackets from tournament result sheets that carry
//! no logical structure. The relations between players, their advancing winner
//! label and the game scores exist only as 2-D positions and light typographic
//! cues; this crate rebuilds them as typed rounds of matches.
//!
//! ## Features
//!
//! - **Column banding**: winner labels and score blobs grouped into bracket columns
//! - **Round reconstruction**: first round by vertical banding, later rounds by
//!   pairing, winners back-filled across rounds
//! - **Walkovers and byes**: `wo` markers, double walkovers, tiny classes
//! - **Qualification round**: conservative presence-based winner resolution
//! - **Validation report**: structural, coverage, consistency and residual findings
//! - **Deterministic**: identical tokens always yield an identical bracket
//!
//! ## Quick Start
//!
//! ```no_run
//! use knockout_bracket::{decode_tokens, reconstruct_bracket, Result};
//!
//! # fn main() -> Result<()> {
//! let json = std::fs::read_to_string("sheet.json")?;
//! let tokens = decode_tokens(&json)?;
//! let output = reconstruct_bracket(&tokens, Some(16));
//!
//! for (ridx, round) in output.bracket.rounds.iter().enumerate() {
//!     println!("{} ({} matches)", round.display_name(), round.len());
//!     for m in &round.matches {
//!         println!("  round {ridx}: {:?} -> {:?} {:?}", m.participants(), m.winner(), m.score_csv());
//!     }
//! }
//! for finding in output.report.iter() {
//!     println!("{:?} {:?}: {}", finding.severity, finding.kind, finding.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Every tolerance is a field of [`BracketConfig`], loadable from TOML:
//!
//! ```no_run
//! use knockout_bracket::{reconstruct_bracket_with_config, BracketConfig};
//!
//! # fn main() -> knockout_bracket::Result<()> {
//! let config = BracketConfig::load("bracket.toml")?;
//! let output = reconstruct_bracket_with_config(&[], None, &config);
//! assert!(output.bracket.rounds.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Reconstruction itself never fails. Only configuration loading, token
//! decoding and output encoding return [`Result`].

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::BracketConfig;
pub use error::{BracketError, Result};
pub use pipeline::{
    AttachedScore, Bracket, BracketOutput, BracketPipeline, EntrantId, EntrantLine, EntrantOrigin,
    Finding, FindingCategory, FindingKind, LabelId, Match, PositionedToken, Round, RoundContext,
    ScoreEntry, ScoreId, Severity, ValidationReport, WalkoverMarker, WinnerEntry,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One result sheet to reconstruct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub tokens: Vec<PositionedToken>,
    /// Authoritative number of first-round slots, if known
    #[serde(default)]
    pub tree_size: Option<usize>,
}

/// Reconstruct a bracket with the default configuration
#[must_use = "bracket output is returned but not used"]
pub fn reconstruct_bracket(tokens: &[PositionedToken], tree_size: Option<usize>) -> BracketOutput {
    BracketPipeline::new().process(tokens, tree_size)
}

/// Reconstruct a bracket with a custom configuration
#[must_use = "bracket output is returned but not used"]
pub fn reconstruct_bracket_with_config(
    tokens: &[PositionedToken],
    tree_size: Option<usize>,
    config: &BracketConfig,
) -> BracketOutput {
    BracketPipeline::with_config(config).process(tokens, tree_size)
}

/// Reconstruct independent documents in parallel
///
/// Output order matches input order.
#[must_use = "bracket outputs are returned but not used"]
pub fn reconstruct_many(documents: &[Document], config: &BracketConfig) -> Vec<BracketOutput> {
    let pipeline = BracketPipeline::with_config(config);
    documents
        .par_iter()
        .map(|doc| pipeline.process(&doc.tokens, doc.tree_size))
        .collect()
}

/// Decode a JSON array of positioned tokens
pub fn decode_tokens(json: &str) -> Result<Vec<PositionedToken>> {
    serde_json::from_str(json).map_err(|source| BracketError::TokenDecodeError { source })
}

/// Read and decode a JSON token file
pub fn read_tokens(path: impl AsRef<Path>) -> Result<Vec<PositionedToken>> {
    let json = std::fs::read_to_string(path)?;
    decode_tokens(&json)
}
