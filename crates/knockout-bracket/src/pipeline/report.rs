//! Validation findings
//!
//! The report is purely additive: stages and the validator append findings,
//! nothing ever reads them back to change the bracket.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much a finding should worry the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// Finding taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Shape of the bracket: round sizes, unresolved winners/scores, duplicates
    Structural,
    /// Entrants missing from the bracket
    Coverage,
    /// Disagreements between rounds or within a round
    Consistency,
    /// Tokens left over after reconstruction
    Residual,
}

/// Typed finding kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    /// No winner labels were detected at all
    NoWinnerLabels,
    /// Tree size was inferred from the label count
    TreeSizeInferred { tree_size: usize },
    /// A final was synthesized from the semifinal winners
    FinalSynthesized,
    /// Two consecutive single-match rounds were merged
    DuplicateFinalMerged,
    /// A bracket printed in two page halves was joined with a stitched final
    HalvesStitched { pages: Vec<usize> },
    /// Tokens on pages that were not read
    PagesIgnored { pages: Vec<usize>, tokens: usize },
    /// An advancer was carried without a resolved winner
    AdvancerInferred { player: String },
    RoundSizeMismatch { expected: usize, actual: usize },
    RoundNotHalved { previous: usize, actual: usize },
    DuplicateEntrant { player: String },
    /// Odd qualification entrant left at the bottom of its column
    UnpairedQualificationEntrant { player: String },
    MissingWinner,
    MissingScore,
    WalkoverWithScore,
    EntrantNotInBracket { player: String },
    InconsistentBestOf { values: Vec<usize> },
    WinnerNotAdvancing { player: String },
    ParticipantWithoutWin { player: String },
    TooManyAppearances { player: String, appearances: usize, rounds: usize },
    UnconsumedScore { margins: Vec<i32>, center: f64, x: f64 },
}

impl FindingKind {
    /// Category implied by the kind
    #[must_use = "returns the finding category"]
    pub const fn category(&self) -> FindingCategory {
        match self {
            Self::NoWinnerLabels
            | Self::TreeSizeInferred { .. }
            | Self::FinalSynthesized
            | Self::DuplicateFinalMerged
            | Self::HalvesStitched { .. }
            | Self::RoundSizeMismatch { .. }
            | Self::RoundNotHalved { .. }
            | Self::DuplicateEntrant { .. }
            | Self::UnpairedQualificationEntrant { .. }
            | Self::MissingWinner
            | Self::MissingScore
            | Self::WalkoverWithScore => FindingCategory::Structural,
            Self::EntrantNotInBracket { .. } | Self::PagesIgnored { .. } => {
                FindingCategory::Coverage
            }
            Self::AdvancerInferred { .. }
            | Self::InconsistentBestOf { .. }
            | Self::WinnerNotAdvancing { .. }
            | Self::ParticipantWithoutWin { .. }
            | Self::TooManyAppearances { .. } => FindingCategory::Consistency,
            Self::UnconsumedScore { .. } => FindingCategory::Residual,
        }
    }

    /// Default severity of the kind
    #[must_use = "returns the finding severity"]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::TreeSizeInferred { .. }
            | Self::FinalSynthesized
            | Self::DuplicateFinalMerged
            | Self::HalvesStitched { .. } => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

/// Where in the bracket a finding applies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundContext {
    pub round_index: Option<usize>,
    pub round_name: Option<String>,
    pub match_index: Option<usize>,
    #[serde(default)]
    pub qualification: bool,
}

impl RoundContext {
    /// Whole-bracket context
    #[must_use = "context is created but not used"]
    pub fn bracket() -> Self {
        Self::default()
    }

    #[must_use = "context is created but not used"]
    pub fn round(round_index: usize, round_name: impl Into<String>) -> Self {
        Self {
            round_index: Some(round_index),
            round_name: Some(round_name.into()),
            ..Self::default()
        }
    }

    #[must_use = "context is created but not used"]
    pub fn in_match(mut self, match_index: usize) -> Self {
        self.match_index = Some(match_index);
        self
    }

    #[must_use = "context is created but not used"]
    pub fn qualification() -> Self {
        Self {
            round_name: Some("Qualification".to_string()),
            qualification: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for RoundContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.round_name, self.match_index) {
            (Some(name), Some(m)) => write!(f, "{name} match {}", m + 1),
            (Some(name), None) => write!(f, "{name}"),
            (None, Some(m)) => write!(f, "match {}", m + 1),
            (None, None) => write!(f, "bracket"),
        }
    }
}

/// One report entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: FindingCategory,
    #[serde(flatten)]
    pub kind: FindingKind,
    pub round_context: RoundContext,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.round_context, self.message)
    }
}

/// Ordered list of findings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    #[must_use = "report is created but not used"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding with the kind's default severity
    pub fn push(&mut self, kind: FindingKind, round_context: RoundContext, message: impl Into<String>) {
        let message = message.into();
        log::debug!("finding [{}] {}: {}", kind.severity(), round_context, message);
        self.findings.push(Finding {
            severity: kind.severity(),
            category: kind.category(),
            kind,
            round_context,
            message,
        });
    }

    #[inline]
    #[must_use = "returns the finding count"]
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    #[inline]
    #[must_use = "returns whether the report is empty"]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    /// Findings of one category
    pub fn by_category(&self, category: FindingCategory) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    #[must_use = "returns the warning count"]
    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    /// True if any finding satisfies `pred`
    pub fn any(&self, pred: impl Fn(&FindingKind) -> bool) -> bool {
        self.findings.iter().any(|f| pred(&f.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_sets_category_and_severity() {
        let mut report = ValidationReport::new();
        report.push(
            FindingKind::TreeSizeInferred { tree_size: 8 },
            RoundContext::bracket(),
            "tree size inferred as 8",
        );
        report.push(
            FindingKind::MissingScore,
            RoundContext::round(0, "RO8/QF").in_match(2),
            "match has no score",
        );
        assert_eq!(report.len(), 2);
        assert_eq!(report.findings[0].severity, Severity::Info);
        assert_eq!(report.findings[1].category, FindingCategory::Structural);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(
            report.findings[1].to_string(),
            "[warning] RO8/QF match 3: match has no score"
        );
    }

    #[test]
    fn test_page_findings() {
        let ignored = FindingKind::PagesIgnored {
            pages: vec![1],
            tokens: 40,
        };
        assert_eq!(ignored.category(), FindingCategory::Coverage);
        assert_eq!(ignored.severity(), Severity::Warning);
        let stitched = FindingKind::HalvesStitched { pages: vec![0, 1] };
        assert_eq!(stitched.severity(), Severity::Info);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            FindingKind::EntrantNotInBracket { player: String::new() }.category(),
            FindingCategory::Coverage
        );
        assert_eq!(
            FindingKind::UnconsumedScore { margins: vec![], center: 0.0, x: 0.0 }.category(),
            FindingCategory::Residual
        );
        assert_eq!(
            FindingKind::InconsistentBestOf { values: vec![3, 5] }.category(),
            FindingCategory::Consistency
        );
    }

    #[test]
    fn test_finding_serializes_flat_kind() {
        let mut report = ValidationReport::new();
        report.push(FindingKind::MissingWinner, RoundContext::qualification(), "no winner");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["findings"][0]["kind"], "missing_winner");
        assert_eq!(json["findings"][0]["severity"], "warning");
        assert_eq!(json["findings"][0]["round_context"]["qualification"], true);
    }
}
