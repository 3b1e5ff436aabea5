//! Data types shared by the bracket pipeline stages
//!
//! Coordinates follow the text-extraction convention: origin at the top-left
//! of the page, `top < bottom`, y grows downward. Every "center" in this
//! module is a vertical center `(top + bottom) / 2`.
//!
//! Entrants, score blobs and winner labels live in index arenas owned by the
//! [`Bracket`]; matches refer to them through the small `*Id` newtypes below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Positioned text token from the upstream text-extraction collaborator
///
/// Immutable input. `font_name` and `page` default when absent from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedToken {
    /// Raw token text
    pub text: String,
    /// Left edge
    pub x0: f64,
    /// Right edge
    pub x1: f64,
    /// Top edge
    pub top: f64,
    /// Bottom edge
    pub bottom: f64,
    /// Font name as reported by the extractor (e.g. "Arial-BoldMT")
    #[serde(default)]
    pub font_name: String,
    /// Zero-based page index
    #[serde(default)]
    pub page: usize,
}

impl PositionedToken {
    /// Create a token on page 0 with no font information
    #[inline]
    #[must_use = "token is created but not used"]
    pub fn new(text: impl Into<String>, x0: f64, x1: f64, top: f64, bottom: f64) -> Self {
        Self {
            text: text.into(),
            x0,
            x1,
            top,
            bottom,
            font_name: String::new(),
            page: 0,
        }
    }

    /// Set the font name
    #[inline]
    #[must_use = "token is created but not used"]
    pub fn with_font(mut self, font_name: impl Into<String>) -> Self {
        self.font_name = font_name.into();
        self
    }

    /// Set the page index
    #[inline]
    #[must_use = "token is created but not used"]
    pub fn on_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Vertical center of the token
    #[inline]
    #[must_use = "returns the vertical center"]
    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// Bold, italic or oblique fonts mark emphasised lines
    #[must_use = "returns whether the token is emphasised"]
    pub fn is_emphasized(&self) -> bool {
        let font = self.font_name.to_ascii_lowercase();
        font.contains("bold") || font.contains("italic") || font.contains("oblique")
    }
}

/// Index of an [`EntrantLine`] in [`Bracket::entrants`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrantId(pub usize);

/// Index of a [`ScoreEntry`] in [`Bracket::scores`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreId(pub usize);

/// Index of a [`WinnerEntry`] in [`Bracket::labels`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(pub usize);

/// Which region of the page an entrant line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrantOrigin {
    /// Left column of the main bracket
    Main,
    /// Below the qualification header
    Qualification,
}

/// Identity used for duplicate and coverage checks
///
/// Two lines with the same key denote the same printed player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerKey {
    pub code: Option<String>,
    pub name: String,
    pub suffix: Option<String>,
    pub club: String,
}

/// One "name, club" line of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantLine {
    pub id: EntrantId,
    pub full_name: String,
    pub club: String,
    /// First name token plus the initial of the second token ("Andersson E")
    pub short_name: String,
    /// Leading draw/licence code printed before the name
    pub code: Option<String>,
    /// Parenthesised suffix after the name, e.g. a seeding tag
    pub suffix: Option<String>,
    pub center: f64,
    pub x0: f64,
    pub x1: f64,
    pub origin: EntrantOrigin,
    /// Normalized name variants used for label resolution
    #[serde(skip)]
    pub aliases: BTreeSet<String>,
}

impl EntrantLine {
    /// Identity key (code, normalized name, suffix, normalized club)
    #[must_use = "returns the identity key"]
    pub fn identity_key(&self) -> PlayerKey {
        PlayerKey {
            code: self.code.clone(),
            name: crate::pipeline::names::normalize_name(&self.full_name),
            suffix: self.suffix.clone(),
            club: crate::pipeline::names::normalize_name(&self.club),
        }
    }

    /// Human readable form: `[code] Full Name, Club`
    #[must_use = "returns the formatted name"]
    pub fn display_name(&self) -> String {
        match &self.code {
            Some(code) => format!("[{code}] {}, {}", self.full_name, self.club),
            None => format!("{}, {}", self.full_name, self.club),
        }
    }
}

/// Signed per-game point margins of one match
///
/// Margins are printed from the winner's perspective: a non-negative value is
/// a game won by the player named as winner, a negative one a game lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub margins: Vec<i32>,
    pub center: f64,
    pub x0: f64,
    pub x1: f64,
}

impl ScoreEntry {
    /// Comma separated margins, e.g. `"8, -9, 6, 7"`
    #[must_use = "returns the formatted margins"]
    pub fn to_csv(&self) -> String {
        self.margins
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Best-of value implied by a margin list: `2 * max(wins) - 1`
#[must_use = "returns the inferred best-of value"]
pub fn infer_best_of(margins: &[i32]) -> Option<usize> {
    let won = margins.iter().filter(|&&m| m >= 0).count();
    let wins = won.max(margins.len() - won);
    (wins > 0).then(|| 2 * wins - 1)
}

/// Short label naming the advancing player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerEntry {
    pub label: String,
    pub code: Option<String>,
    pub center: f64,
    pub x: f64,
    /// Printed in a bold/italic font
    #[serde(default)]
    pub emphasized: bool,
    /// "Dubbel-WO" label: both sides withdrew
    #[serde(default)]
    pub double_walkover: bool,
}

impl WinnerEntry {
    /// Label with no text to resolve
    #[inline]
    #[must_use = "returns whether the label is blank"]
    pub fn is_blank(&self) -> bool {
        self.label.trim().is_empty()
    }
}

/// Explicit walkover token ("WO", "w0")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkoverMarker {
    pub center: f64,
    pub x0: f64,
    pub x1: f64,
    /// Code of the player the marker names, if any ("WO 123")
    pub code: Option<String>,
}

impl WalkoverMarker {
    #[inline]
    #[must_use = "returns the horizontal center"]
    pub fn center_x(&self) -> f64 {
        (self.x0 + self.x1) / 2.0
    }
}

/// Detected start of the qualification section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationHeader {
    pub text: String,
    pub center: f64,
    pub x0: f64,
}

/// Score blob attached to a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedScore {
    pub id: ScoreId,
    pub margins: Vec<i32>,
}

/// One bracket edge: one or two participants, an optional winner and score
///
/// The participant list is fixed at construction. The winner can only be set
/// to one of the participants; score, label and walkover flags are back-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    participants: Vec<EntrantId>,
    winner: Option<EntrantId>,
    score: Option<AttachedScore>,
    winner_label: Option<LabelId>,
    center: f64,
    walkover: bool,
}

impl Match {
    /// Create a match; at most the first two participants are kept
    #[must_use = "match is created but not used"]
    pub fn new(mut participants: Vec<EntrantId>, center: f64) -> Self {
        participants.truncate(2);
        Self {
            participants,
            winner: None,
            score: None,
            winner_label: None,
            center,
            walkover: false,
        }
    }

    #[inline]
    #[must_use = "returns the participants"]
    pub fn participants(&self) -> &[EntrantId] {
        &self.participants
    }

    #[inline]
    #[must_use = "returns the winner"]
    pub const fn winner(&self) -> Option<EntrantId> {
        self.winner
    }

    /// Vertical anchor used to align this match into the next round
    #[inline]
    #[must_use = "returns the vertical anchor"]
    pub const fn center(&self) -> f64 {
        self.center
    }

    #[inline]
    #[must_use = "returns whether `id` plays in this match"]
    pub fn has_participant(&self, id: EntrantId) -> bool {
        self.participants.contains(&id)
    }

    /// Set the winner; refused (returns `false`) for a non-participant
    pub fn set_winner(&mut self, id: EntrantId) -> bool {
        if self.has_participant(id) {
            self.winner = Some(id);
            true
        } else {
            false
        }
    }

    #[inline]
    #[must_use = "returns the attached score"]
    pub const fn score(&self) -> Option<&AttachedScore> {
        self.score.as_ref()
    }

    #[must_use = "returns the attached margins"]
    pub fn margins(&self) -> Option<&[i32]> {
        self.score.as_ref().map(|s| s.margins.as_slice())
    }

    pub fn attach_score(&mut self, id: ScoreId, margins: Vec<i32>) {
        self.score = Some(AttachedScore { id, margins });
    }

    /// Detach the score, returning it to the caller
    pub fn take_score(&mut self) -> Option<AttachedScore> {
        self.score.take()
    }

    #[inline]
    #[must_use = "returns the consumed winner label"]
    pub const fn winner_label(&self) -> Option<LabelId> {
        self.winner_label
    }

    pub fn set_winner_label(&mut self, id: LabelId) {
        self.winner_label = Some(id);
    }

    #[inline]
    #[must_use = "returns whether this is a bye"]
    pub fn is_bye(&self) -> bool {
        self.participants.len() == 1
    }

    #[inline]
    #[must_use = "returns whether both sides are known"]
    pub fn is_contested(&self) -> bool {
        self.participants.len() == 2
    }

    #[inline]
    #[must_use = "returns whether this match was a walkover"]
    pub const fn is_walkover(&self) -> bool {
        self.walkover
    }

    pub fn mark_walkover(&mut self) {
        self.walkover = true;
    }

    /// The participant that did not win (contested matches only)
    #[must_use = "returns the losing participant"]
    pub fn loser(&self) -> Option<EntrantId> {
        let winner = self.winner?;
        if !self.is_contested() {
            return None;
        }
        self.participants.iter().copied().find(|&p| p != winner)
    }

    /// The side that forfeited a walkover, once the winner is known
    #[must_use = "returns the forfeiting participant"]
    pub fn forfeiter(&self) -> Option<EntrantId> {
        if self.walkover {
            self.loser()
        } else {
            None
        }
    }

    /// Participants with the winner first
    #[must_use = "returns the participants in winner-first order"]
    pub fn ordered_sides(&self) -> Vec<EntrantId> {
        let mut sides = self.participants.clone();
        if let Some(winner) = self.winner {
            if let Some(pos) = sides.iter().position(|&p| p == winner) {
                sides.swap(0, pos);
            }
        }
        sides
    }

    /// Shift every arena reference, for a match moved into a larger bracket
    pub fn offset_ids(&mut self, entrants: usize, scores: usize, labels: usize) {
        for p in &mut self.participants {
            p.0 += entrants;
        }
        if let Some(w) = self.winner.as_mut() {
            w.0 += entrants;
        }
        if let Some(score) = self.score.as_mut() {
            score.id.0 += scores;
        }
        if let Some(label) = self.winner_label.as_mut() {
            label.0 += labels;
        }
    }

    /// Inferred best-of from the attached margins
    #[must_use = "returns the inferred best-of value"]
    pub fn best_of(&self) -> Option<usize> {
        self.margins().and_then(infer_best_of)
    }

    /// Margins as a comma separated string for persistence
    #[must_use = "returns the formatted margins"]
    pub fn score_csv(&self) -> Option<String> {
        let margins = self.margins()?;
        if margins.is_empty() {
            return None;
        }
        Some(
            margins
                .iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// `WO:S1` / `WO:S2` naming the forfeiting side by participant order,
    /// plain `WO` when it is unknown, `None` for played matches
    #[must_use = "returns the walkover token"]
    pub fn walkover_token(&self) -> Option<String> {
        if !self.walkover {
            return None;
        }
        let side = self
            .forfeiter()
            .and_then(|f| self.participants.iter().position(|&p| p == f));
        Some(match side {
            Some(idx) => format!("WO:S{}", idx + 1),
            None => "WO".to_string(),
        })
    }
}

/// Display name for a round of `match_count` matches
#[must_use = "returns the round name"]
pub fn round_display_name(match_count: usize) -> String {
    match match_count {
        0 => "Round".to_string(),
        1 => "Final".to_string(),
        2 => "RO4/SF".to_string(),
        4 => "RO8/QF".to_string(),
        n => format!("RO{}", n * 2),
    }
}

/// One column of matches, ordered by vertical center
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Round {
    pub matches: Vec<Match>,
    /// Built by final-round synthesis rather than from a winner column
    #[serde(default)]
    pub synthesized: bool,
}

impl Round {
    #[must_use = "round is created but not used"]
    pub fn new(mut matches: Vec<Match>) -> Self {
        matches.sort_by(|a, b| a.center().total_cmp(&b.center()));
        Self {
            matches,
            synthesized: false,
        }
    }

    #[inline]
    #[must_use = "returns the match count"]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[inline]
    #[must_use = "returns whether the round has no matches"]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    #[must_use = "returns the round name"]
    pub fn display_name(&self) -> String {
        round_display_name(self.matches.len())
    }

    /// Resolved winners in match order
    pub fn winners(&self) -> impl Iterator<Item = EntrantId> + '_ {
        self.matches.iter().filter_map(Match::winner)
    }

    /// All participants in match order
    pub fn participants(&self) -> impl Iterator<Item = EntrantId> + '_ {
        self.matches
            .iter()
            .flat_map(|m| m.participants().iter().copied())
    }
}

/// The reconstructed single-elimination bracket
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bracket {
    /// Number of first-round slots (a power of two)
    pub tree_size: usize,
    /// `tree_size` was inferred from the label count
    pub tree_size_inferred: bool,
    pub rounds: Vec<Round>,
    /// Pre-bracket qualification matches, reported separately
    pub qualification: Option<Round>,
    pub entrants: Vec<EntrantLine>,
    pub scores: Vec<ScoreEntry>,
    pub labels: Vec<WinnerEntry>,
}

impl Bracket {
    #[must_use = "returns the entrant line"]
    pub fn entrant(&self, id: EntrantId) -> Option<&EntrantLine> {
        self.entrants.get(id.0)
    }

    /// Entrant lines of the main bracket in vertical order
    pub fn main_entrants(&self) -> impl Iterator<Item = &EntrantLine> {
        self.entrants
            .iter()
            .filter(|e| e.origin == EntrantOrigin::Main)
    }

    #[must_use = "returns the final match"]
    pub fn final_match(&self) -> Option<&Match> {
        self.rounds
            .last()
            .filter(|r| r.len() == 1)
            .and_then(|r| r.matches.first())
    }

    #[must_use = "returns the tournament winner"]
    pub fn champion(&self) -> Option<&EntrantLine> {
        self.final_match()
            .and_then(Match::winner)
            .and_then(|id| self.entrant(id))
    }

    /// Total matches over all rounds, qualification excluded
    #[must_use = "returns the match count"]
    pub fn match_count(&self) -> usize {
        self.rounds.iter().map(Round::len).sum()
    }

    /// Every match of the main bracket with its round index
    pub fn iter_matches(&self) -> impl Iterator<Item = (usize, &Match)> {
        self.rounds
            .iter()
            .enumerate()
            .flat_map(|(ridx, r)| r.matches.iter().map(move |m| (ridx, m)))
    }
}
