//! # Bracket Pipeline - Stages 01-09
//!
//! The pipeline turns the positioned tokens of one result sheet into a
//! [`Bracket`] plus a [`ValidationReport`]. Every stage has its own config,
//! well-defined input and output types, and unit tests of its own.
//!
//! ## Pipeline Stages
//!
//! ### Stage 01: Token Scanning ([`Stage01TokenScanner`])
//! - **Input:** Positioned tokens
//! - **Process:** Classifies tokens into entrant lines, score blobs, winner
//!   labels, walkover markers and the qualification header
//! - **Output:** `ScannedPage`
//!
//! ### Stage 02: Column Banding ([`Stage02ColumnBander`])
//! - **Input:** x-positions of labels or score blobs
//! - **Process:** Gap-threshold clustering
//! - **Output:** Column bands left to right
//!
//! ### Stage 03: Round Allocation ([`Stage03RoundAllocator`])
//! - **Input:** Winner labels, label bands, optional tree size
//! - **Process:** Maps label columns to rounds, re-splitting collapsed columns
//!   of large brackets
//! - **Output:** `RoundPlan`
//!
//! ### Stage 04: First Round ([`Stage04FirstRoundBuilder`])
//! - **Input:** Main entrants, round-one labels, score pool
//! - **Process:** Vertical banding around each label with rescue and recruit
//!   fallbacks
//! - **Output:** First `Round`
//!
//! ### Stage 05: Round Advancer ([`Stage05RoundAdvancer`])
//! - **Input:** Previous round, label chunk, score window
//! - **Process:** Pairs consecutive matches, resolves the new label against the
//!   candidates, back-fills winners
//! - **Output:** Next `Round`
//!
//! ### Stage 06: Final Round ([`Stage06FinalRound`])
//! - **Process:** Synthesizes a missing final, merges duplicate finals and
//!   sweeps residual scores
//!
//! ### Stage 07: Walkovers ([`Stage07WalkoverResolver`])
//! - **Process:** Attaches `wo` markers to unscored matches and builds the
//!   rounds of tiny double-walkover classes
//!
//! ### Stage 08: Qualification ([`Stage08QualificationResolver`])
//! - **Process:** Pairs qualification entrants per column and resolves winners
//!   by presence in the main bracket
//!
//! ### Stage 09: Validation ([`Stage09Validator`])
//! - **Process:** Structural, coverage, consistency and residual checks; never
//!   mutates the bracket
//!
//! The [`BracketPipeline`] orchestrator chains the stages.
//!
//! ## Shared Modules
//!
//! - `types`: token model, matches, rounds, bracket
//! - `names`: alias sets and label resolution
//! - `pool`: at-most-once arenas for labels and score blobs
//! - `report`: findings

pub mod names;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod stage01_token_scanner;
pub mod stage02_column_banding;
pub mod stage03_round_allocation;
pub mod stage04_first_round;
pub mod stage05_round_advancer;
pub mod stage06_final_round;
pub mod stage07_walkover;
pub mod stage08_qualification;
pub mod stage09_validator;
pub mod types;

pub use orchestrator::{BracketOutput, BracketPipeline};
pub use report::{Finding, FindingCategory, FindingKind, RoundContext, Severity, ValidationReport};
pub use stage01_token_scanner::{ScannedPage, Stage01Config, Stage01TokenScanner};
pub use stage02_column_banding::{ColumnBand, Stage02ColumnBander, Stage02Config};
pub use stage03_round_allocation::{RoundPlan, Stage03Config, Stage03RoundAllocator};
pub use stage04_first_round::{Stage04Config, Stage04FirstRoundBuilder};
pub use stage05_round_advancer::{Stage05Config, Stage05RoundAdvancer};
pub use stage06_final_round::{Stage06Config, Stage06FinalRound};
pub use stage07_walkover::{Stage07Config, Stage07WalkoverResolver};
pub use stage08_qualification::{Stage08Config, Stage08QualificationResolver};
pub use stage09_validator::Stage09Validator;
pub use types::*;
