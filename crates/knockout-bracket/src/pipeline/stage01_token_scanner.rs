/// Stage 1: Token Scanning
///
/// Classifies the positioned tokens of the bracket page into the typed inputs
/// of the later stages: entrant lines, score blobs, winner labels, walkover
/// markers and the qualification header.
///
/// Algorithm:
/// 1. Keep the tokens of the first page present in the input
/// 2. Parse every "[code] name [(suffix)], club" token into an entrant candidate
/// 3. Pick the qualification header (if any) and split the candidates into
///    main entrants (left column, above the header) and qualification entrants
/// 4. Extract score blobs (comma lists of signed integers), splitting combined
///    "scores label" tokens into a blob plus a label
/// 5. Extract winner labels, drop section titles and instruction phrases,
///    collapse near-duplicates and drop labels outside the entrant band
/// 6. Extract walkover markers
use crate::pipeline::names::{build_aliases, make_short, normalize_name};
use crate::pipeline::types::{
    EntrantId, EntrantLine, EntrantOrigin, PositionedToken, QualificationHeader, ScoreEntry,
    WalkoverMarker, WinnerEntry,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DRAW_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[>.)\-]\s*").expect("valid draw prefix regex"));

static ENTRANT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(\d{1,3})\s+)?([^,(]+?)(?:\s*\(([^)]+)\))?,\s*(.+)$")
        .expect("valid entrant regex")
});

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(?:\s*,\s*-?\d+)+$").expect("valid score regex"));

static MARGIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").expect("valid margin regex"));

static COMBINED_SCORE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:-?\d+\s*,\s*)+-?\d+)\s+(.+)$").expect("valid combined score regex")
});

static WINNER_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d{1,3})\s+)?([\w.\-]+(?:\s+[\w.\-]+)*)$").expect("valid label regex")
});

static WO_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^wo\s+(.+)$").expect("valid wo prefix regex"));

static WALKOVER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*w[o0](?:\s|$)").expect("valid walkover regex"));

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").expect("valid code regex"));

static QUAL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(kval(?:matcher|spel|ifikation|ificering|ifisering)?|återkval|qualification(?:\s*round)?|qualifying|vinderen er understreget)\b",
    )
    .expect("valid qualification header regex")
});

/// Section titles printed in label-like positions
const SECTION_KEYWORDS: &[&str] = &[
    "Slutspel",
    "Höstpool",
    "program",
    "Kvalifikation",
    "Kvalificering",
    "Qualification",
    "Qualifying",
    "Vinderen",
    "Mesterskaberne",
    "Senior Elite",
];

/// Instruction lines that are never winner labels (matched lowercase)
const INSTRUCTION_PHRASES: &[&str] = &[
    "segraren är understruken",
    "segraren ar understruken",
    "winner is underlined",
    "vinderen er understreget",
    "knock-out stage",
    "coordinated by tt coordinator",
    "software license may only be used",
];

/// Configuration for Stage 1 (Token Scanning)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage01Config {
    /// Main entrant lines start left of this x
    pub entrant_max_x: f64,
    /// Identical labels closer than this are one label
    pub label_dedupe_distance: f64,
    /// Entrant band margin = median entrant spacing × factor
    pub band_margin_factor: f64,
    pub band_margin_min: f64,
    pub band_margin_max: f64,
    /// Spacing assumed with fewer than two entrants
    pub band_default_spacing: f64,
    /// Headers in this top fraction of the page...
    pub header_upper_fraction: f64,
    /// ...and right of this width fraction are class titles
    pub header_right_fraction: f64,
    /// Entrant count from which headers must sit below the bracket body
    pub header_dense_entrants: usize,
    /// Fraction of the entrant midline a dense-page header must be below
    pub header_midline_fraction: f64,
    /// Qualification region starts this far below the header center
    pub qualification_offset: f64,
}

impl Default for Stage01Config {
    #[inline]
    fn default() -> Self {
        Self {
            entrant_max_x: 200.0,
            label_dedupe_distance: 6.0,
            band_margin_factor: 0.75,
            band_margin_min: 8.0,
            band_margin_max: 28.0,
            band_default_spacing: 18.0,
            header_upper_fraction: 0.35,
            header_right_fraction: 0.6,
            header_dense_entrants: 15,
            header_midline_fraction: 0.9,
            qualification_offset: 5.0,
        }
    }
}

/// Fields of a parsed "name, club" token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntrant {
    pub code: Option<String>,
    pub name: String,
    pub suffix: Option<String>,
    pub club: String,
}

/// Fields of a parsed winner label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLabel {
    pub code: Option<String>,
    pub label: String,
    pub double_walkover: bool,
}

/// Remove a leading draw index ("12>", "3.", "4)", "5-")
#[must_use = "returns the stripped text"]
pub fn strip_draw_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    match DRAW_PREFIX_RE.find(trimmed) {
        Some(m) => &trimmed[m.end()..],
        None => trimmed,
    }
}

fn has_letter(text: &str) -> bool {
    text.chars().any(char::is_alphabetic)
}

/// Non-breaking spaces and the Unicode minus sign normalized
fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ").replace('\u{2212}', "-")
}

/// Parse a "name, club" token
#[must_use = "returns the parsed entrant"]
pub fn parse_entrant_text(text: &str) -> Option<ParsedEntrant> {
    let cleaned = clean_text(text);
    let raw = strip_draw_prefix(&cleaned);
    let name_segment = raw.split(',').next()?;
    if !has_letter(name_segment) {
        return None;
    }
    let caps = ENTRANT_RE.captures(raw)?;
    let name = caps.get(2)?.as_str().trim().to_string();
    let club = caps.get(4)?.as_str().trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(ParsedEntrant {
        code: caps.get(1).map(|m| m.as_str().to_string()),
        name,
        suffix: caps.get(3).map(|m| m.as_str().trim().to_string()),
        club,
    })
}

/// Split `"5, 8, 6, 11 169 Augustsson A"` into scores and label
#[must_use = "returns the split parts"]
pub fn split_score_and_label(text: &str) -> (Option<String>, String) {
    let cleaned = clean_text(text);
    let stripped = strip_draw_prefix(&cleaned);
    match COMBINED_SCORE_LABEL_RE.captures(stripped) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().trim().to_string()),
            caps.get(2).map_or_else(String::new, |m| m.as_str().trim().to_string()),
        ),
        None => (None, stripped.trim().to_string()),
    }
}

/// Parse the margins of a score blob; combined tokens yield their score part
#[must_use = "returns the parsed margins"]
pub fn parse_margins(text: &str) -> Option<Vec<i32>> {
    let (score_text, _) = split_score_and_label(text);
    let combined = score_text.is_some();
    let cleaned = clean_text(text);
    let target = score_text.unwrap_or_else(|| strip_draw_prefix(&cleaned).to_string());
    if target.is_empty() || (!combined && has_letter(&target)) {
        return None;
    }
    if !SCORE_RE.is_match(&target) {
        return None;
    }
    let margins: Vec<i32> = MARGIN_RE
        .find_iter(&target)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    (!margins.is_empty()).then_some(margins)
}

/// "Dubbel-WO", "double wo", ...
#[must_use = "returns whether the label marks a double walkover"]
pub fn is_double_walkover_label(text: &str) -> bool {
    let collapsed: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    collapsed == "dubbelwo" || collapsed == "doublewo"
}

/// Parse a winner label, rejecting titles, instructions and non-names
#[must_use = "returns the parsed label"]
pub fn parse_winner_label(text: &str) -> Option<ParsedLabel> {
    let (_, mut label_text) = split_score_and_label(text);
    if label_text.is_empty() {
        return None;
    }
    if let Some(caps) = WO_PREFIX_RE.captures(&label_text) {
        let candidate = caps.get(1).map_or("", |m| m.as_str()).trim();
        if has_letter(candidate) {
            label_text = candidate.to_string();
        }
    }
    if SECTION_KEYWORDS.iter().any(|k| label_text.contains(k)) {
        return None;
    }
    let lower = label_text.to_lowercase();
    if INSTRUCTION_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }
    let caps = WINNER_LABEL_RE.captures(&label_text)?;
    let code = caps.get(1).map(|m| m.as_str().to_string());
    let label = caps.get(2)?.as_str().trim().to_string();
    if label.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let double_walkover = is_double_walkover_label(&label);
    if !label.contains(' ') && code.is_none() && !double_walkover {
        return None;
    }
    Some(ParsedLabel {
        code,
        label,
        double_walkover,
    })
}

/// A walkover marker and the player code it names, if any
#[must_use = "returns the parsed marker"]
pub fn parse_walkover_marker(text: &str) -> Option<Option<String>> {
    if !WALKOVER_RE.is_match(text) {
        return None;
    }
    Some(
        CODE_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
    )
}

fn contains_double_walkover(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["dubbel-wo", "double-wo", "dubbel wo", "double wo"]
        .iter()
        .any(|p| lower.contains(p))
}

fn median(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        None
    } else {
        Some(sorted[sorted.len() / 2])
    }
}

/// Output of Stage 1
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScannedPage {
    /// Page index that was scanned
    pub page: usize,
    /// Largest token right edge
    pub page_width: f64,
    /// Largest token bottom edge
    pub page_height: f64,
    /// Main entrants first (by center), then qualification entrants
    pub entrants: Vec<EntrantLine>,
    /// Sorted by (x0, center)
    pub scores: Vec<ScoreEntry>,
    /// Sorted by (x, center)
    pub labels: Vec<WinnerEntry>,
    pub walkover_markers: Vec<WalkoverMarker>,
    pub qualification_header: Option<QualificationHeader>,
    /// Some token mentions a double walkover
    pub double_walkover_present: bool,
    /// Tokens on other pages
    pub ignored_tokens: usize,
}

impl ScannedPage {
    pub fn main_entrants(&self) -> impl Iterator<Item = &EntrantLine> {
        self.entrants
            .iter()
            .filter(|e| e.origin == EntrantOrigin::Main)
    }

    pub fn qualification_entrants(&self) -> impl Iterator<Item = &EntrantLine> {
        self.entrants
            .iter()
            .filter(|e| e.origin == EntrantOrigin::Qualification)
    }
}

/// Entrant candidate before id assignment
#[derive(Debug, Clone)]
struct Candidate {
    parsed: ParsedEntrant,
    center: f64,
    x0: f64,
    x1: f64,
}

/// Stage 1: Token Scanner
///
/// Input: `&[PositionedToken]` (any page order)
/// Output: `ScannedPage`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stage01TokenScanner {
    config: Stage01Config,
}

impl Stage01TokenScanner {
    /// Create a new `Stage01TokenScanner` with default configuration
    #[inline]
    #[must_use = "token scanner stage is created but not used"]
    pub fn new() -> Self {
        Self {
            config: Stage01Config::default(),
        }
    }

    /// Create a new `Stage01TokenScanner` with custom configuration
    #[inline]
    #[must_use = "token scanner stage is created but not used"]
    pub const fn with_config(config: Stage01Config) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use = "returns the stage configuration"]
    pub const fn config(&self) -> &Stage01Config {
        &self.config
    }

    /// Scan the bracket page
    #[must_use = "scanned page is returned but not used"]
    pub fn process(&self, tokens: &[PositionedToken]) -> ScannedPage {
        let Some(page) = tokens.iter().map(|t| t.page).min() else {
            return ScannedPage::default();
        };
        let page_tokens: Vec<&PositionedToken> = tokens.iter().filter(|t| t.page == page).collect();
        let ignored_tokens = tokens.len() - page_tokens.len();
        if ignored_tokens > 0 {
            log::debug!("Stage 1: ignoring {ignored_tokens} tokens outside page {page}");
        }

        let page_width = page_tokens.iter().map(|t| t.x1).fold(0.0_f64, f64::max);
        let page_height = page_tokens.iter().map(|t| t.bottom).fold(0.0_f64, f64::max);

        let candidates: Vec<Candidate> = page_tokens
            .iter()
            .filter(|t| t.text.contains(','))
            .filter_map(|t| {
                parse_entrant_text(&t.text).map(|parsed| Candidate {
                    parsed,
                    center: t.center_y(),
                    x0: t.x0,
                    x1: t.x1,
                })
            })
            .collect();

        let qualification_header =
            self.find_qualification_header(&page_tokens, &candidates, page_width, page_height);
        let entrants = self.split_entrants(candidates, qualification_header.as_ref(), page_height);

        let scores = Self::extract_scores(&page_tokens);
        let labels = self.extract_labels(&page_tokens, &entrants);
        let walkover_markers = Self::extract_walkover_markers(&page_tokens);
        let double_walkover_present = page_tokens.iter().any(|t| contains_double_walkover(&t.text));

        let scanned = ScannedPage {
            page,
            page_width,
            page_height,
            entrants,
            scores,
            labels,
            walkover_markers,
            qualification_header,
            double_walkover_present,
            ignored_tokens,
        };
        log::debug!(
            "Stage 1: {} main entrants, {} qualification entrants, {} scores, {} labels, {} WO markers",
            scanned.main_entrants().count(),
            scanned.qualification_entrants().count(),
            scanned.scores.len(),
            scanned.labels.len(),
            scanned.walkover_markers.len()
        );
        scanned
    }

    fn find_qualification_header(
        &self,
        tokens: &[&PositionedToken],
        candidates: &[Candidate],
        page_width: f64,
        page_height: f64,
    ) -> Option<QualificationHeader> {
        let upper_exclusion = page_height * self.config.header_upper_fraction;
        let right_exclusion = page_width * self.config.header_right_fraction;
        let first_entrant = candidates
            .iter()
            .map(|c| c.center)
            .fold(f64::INFINITY, f64::min);
        let midline = if candidates.is_empty() {
            upper_exclusion
        } else {
            candidates.iter().map(|c| c.center).sum::<f64>() / candidates.len() as f64
        };
        let dense = candidates.len() >= self.config.header_dense_entrants;

        tokens
            .iter()
            .filter_map(|t| {
                let text = clean_text(&t.text).trim().to_string();
                if text.is_empty() || !QUAL_HEADER_RE.is_match(&text) {
                    return None;
                }
                let center = t.center_y();
                if center < upper_exclusion && t.x0 > right_exclusion {
                    log::trace!("Stage 1: header {text:?} skipped (title area)");
                    return None;
                }
                if dense
                    && center < midline * self.config.header_midline_fraction
                    && !text.to_lowercase().contains("qual")
                {
                    log::trace!("Stage 1: header {text:?} skipped (above bracket body)");
                    return None;
                }
                if center <= first_entrant {
                    return None;
                }
                Some(QualificationHeader {
                    text,
                    center,
                    x0: t.x0,
                })
            })
            .max_by(|a, b| a.center.total_cmp(&b.center).then(b.x0.total_cmp(&a.x0)))
    }

    fn split_entrants(
        &self,
        candidates: Vec<Candidate>,
        header: Option<&QualificationHeader>,
        page_height: f64,
    ) -> Vec<EntrantLine> {
        let split_at = header.map(|h| h.center + self.config.qualification_offset);
        let mut main = Vec::new();
        let mut qualification = Vec::new();
        for c in candidates {
            match split_at {
                Some(split) if c.center >= split => {
                    if !c.parsed.name.contains(':') && c.center <= page_height {
                        qualification.push(c);
                    }
                }
                _ => {
                    if c.x0 < self.config.entrant_max_x {
                        main.push(c);
                    }
                }
            }
        }
        let order = |a: &Candidate, b: &Candidate| {
            a.center
                .total_cmp(&b.center)
                .then(a.x0.total_cmp(&b.x0))
                .then_with(|| a.parsed.code.cmp(&b.parsed.code))
                .then_with(|| a.parsed.name.cmp(&b.parsed.name))
        };
        main.sort_by(order);
        qualification.sort_by(order);

        main.into_iter()
            .map(|c| (c, EntrantOrigin::Main))
            .chain(qualification.into_iter().map(|c| (c, EntrantOrigin::Qualification)))
            .enumerate()
            .map(|(idx, (c, origin))| EntrantLine {
                id: EntrantId(idx),
                short_name: make_short(&c.parsed.name),
                aliases: build_aliases(&c.parsed.name),
                full_name: c.parsed.name,
                club: c.parsed.club,
                code: c.parsed.code,
                suffix: c.parsed.suffix,
                center: c.center,
                x0: c.x0,
                x1: c.x1,
                origin,
            })
            .collect()
    }

    fn extract_scores(tokens: &[&PositionedToken]) -> Vec<ScoreEntry> {
        let mut scores: Vec<ScoreEntry> = tokens
            .iter()
            .filter_map(|t| {
                parse_margins(&t.text).map(|margins| ScoreEntry {
                    margins,
                    center: t.center_y(),
                    x0: t.x0,
                    x1: t.x1,
                })
            })
            .collect();
        scores.sort_by(|a, b| a.x0.total_cmp(&b.x0).then(a.center.total_cmp(&b.center)));
        scores
    }

    fn extract_labels(&self, tokens: &[&PositionedToken], entrants: &[EntrantLine]) -> Vec<WinnerEntry> {
        let mut labels: Vec<WinnerEntry> = tokens
            .iter()
            .filter(|t| !t.text.contains(','))
            .filter_map(|t| {
                parse_winner_label(&t.text).map(|parsed| WinnerEntry {
                    label: parsed.label,
                    code: parsed.code,
                    center: t.center_y(),
                    x: t.x0,
                    emphasized: t.is_emphasized(),
                    double_walkover: parsed.double_walkover,
                })
            })
            .chain(tokens.iter().filter_map(|t| {
                // combined "scores label" blobs contain commas
                let (score, label) = split_score_and_label(&t.text);
                if score.is_none() {
                    return None;
                }
                parse_winner_label(&label).map(|parsed| WinnerEntry {
                    label: parsed.label,
                    code: parsed.code,
                    center: t.center_y(),
                    x: t.x0,
                    emphasized: t.is_emphasized(),
                    double_walkover: parsed.double_walkover,
                })
            }))
            .collect();

        labels.sort_by(|a, b| a.center.total_cmp(&b.center).then(a.x.total_cmp(&b.x)));
        let labels = self.dedupe_labels(labels);
        let mut labels = self.filter_to_entrant_band(labels, entrants);
        labels.sort_by(|a, b| {
            a.x.total_cmp(&b.x)
                .then(a.center.total_cmp(&b.center))
                .then_with(|| a.label.cmp(&b.label))
        });
        labels
    }

    fn dedupe_labels(&self, labels: Vec<WinnerEntry>) -> Vec<WinnerEntry> {
        let mut kept: Vec<WinnerEntry> = Vec::with_capacity(labels.len());
        for label in labels {
            let key = normalize_name(&label.label);
            let duplicate = kept.iter().any(|k| {
                normalize_name(&k.label) == key
                    && (k.center - label.center).abs() < self.config.label_dedupe_distance
            });
            if duplicate {
                log::trace!("Stage 1: duplicate label {:?} at y={:.1}", label.label, label.center);
            } else {
                kept.push(label);
            }
        }
        kept
    }

    fn filter_to_entrant_band(&self, labels: Vec<WinnerEntry>, entrants: &[EntrantLine]) -> Vec<WinnerEntry> {
        let mut centers: Vec<f64> = entrants
            .iter()
            .filter(|e| e.origin == EntrantOrigin::Main)
            .map(|e| e.center)
            .collect();
        if centers.is_empty() || labels.is_empty() {
            return labels;
        }
        centers.sort_by(f64::total_cmp);
        let mut gaps: Vec<f64> = centers
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|g| *g > 0.0)
            .collect();
        gaps.sort_by(f64::total_cmp);
        let spacing = median(&gaps).unwrap_or(self.config.band_default_spacing);
        let margin = (spacing * self.config.band_margin_factor)
            .clamp(self.config.band_margin_min, self.config.band_margin_max);
        let lower = centers[0] - margin;
        let upper = centers[centers.len() - 1] + margin;
        labels
            .into_iter()
            .filter(|l| {
                let inside = l.center >= lower && l.center <= upper;
                if !inside {
                    log::trace!("Stage 1: label {:?} outside entrant band", l.label);
                }
                inside
            })
            .collect()
    }

    fn extract_walkover_markers(tokens: &[&PositionedToken]) -> Vec<WalkoverMarker> {
        let mut markers: Vec<WalkoverMarker> = tokens
            .iter()
            .filter_map(|t| {
                parse_walkover_marker(&t.text).map(|code| WalkoverMarker {
                    center: t.center_y(),
                    x0: t.x0,
                    x1: t.x1,
                    code,
                })
            })
            .collect();
        markers.sort_by(|a, b| a.center.total_cmp(&b.center).then(a.x0.total_cmp(&b.x0)));
        markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str, x0: f64, center: f64) -> PositionedToken {
        PositionedToken::new(text, x0, x0 + 60.0, center - 5.0, center + 5.0)
    }

    #[test]
    fn test_strip_draw_prefix() {
        assert_eq!(strip_draw_prefix("12> Berg Anna, BTK"), "Berg Anna, BTK");
        assert_eq!(strip_draw_prefix("3. Berg Anna, BTK"), "Berg Anna, BTK");
        assert_eq!(strip_draw_prefix("  4) x"), "x");
        assert_eq!(strip_draw_prefix("Berg Anna, BTK"), "Berg Anna, BTK");
    }

    #[test]
    fn test_parse_entrant_text() {
        let parsed = parse_entrant_text("7> 123 Berg Anna (2), BTK Safir").unwrap();
        assert_eq!(parsed.code.as_deref(), Some("123"));
        assert_eq!(parsed.name, "Berg Anna");
        assert_eq!(parsed.suffix.as_deref(), Some("2"));
        assert_eq!(parsed.club, "BTK Safir");

        let plain = parse_entrant_text("Lind Karin, Spårvägen").unwrap();
        assert_eq!(plain.code, None);
        assert_eq!(plain.name, "Lind Karin");

        assert!(parse_entrant_text("8, 9, 6").is_none());
        assert!(parse_entrant_text("no comma here").is_none());
    }

    #[test]
    fn test_parse_margins() {
        assert_eq!(parse_margins("8, -9, 6, 7"), Some(vec![8, -9, 6, 7]));
        assert_eq!(parse_margins("8, \u{2212}9, 6"), Some(vec![8, -9, 6]));
        assert_eq!(parse_margins("5, 8, 6, 11 169 Augustsson A"), Some(vec![5, 8, 6, 11]));
        assert_eq!(parse_margins("11"), None);
        assert_eq!(parse_margins("Berg A"), None);
        assert_eq!(parse_margins("Berg Anna, BTK"), None);
    }

    #[test]
    fn test_parse_winner_label() {
        let parsed = parse_winner_label("Berg A").unwrap();
        assert_eq!(parsed.label, "Berg A");
        assert_eq!(parsed.code, None);

        let coded = parse_winner_label("5, 8, 6, 11 169 Augustsson A").unwrap();
        assert_eq!(coded.code.as_deref(), Some("169"));
        assert_eq!(coded.label, "Augustsson A");

        let single = parse_winner_label("42 Berg").unwrap();
        assert_eq!(single.code.as_deref(), Some("42"));

        let wo = parse_winner_label("wo Lind K").unwrap();
        assert_eq!(wo.label, "Lind K");

        assert!(parse_winner_label("Dubbel-WO").unwrap().double_walkover);
        assert!(parse_winner_label("Berg").is_none());
        assert!(parse_winner_label("Slutspel A").is_none());
        assert!(parse_winner_label("Winner is underlined").is_none());
        assert!(parse_winner_label("Berg A2").is_none());
        assert!(parse_winner_label("wo").is_none());
    }

    #[test]
    fn test_parse_walkover_marker() {
        assert_eq!(parse_walkover_marker("WO"), Some(None));
        assert_eq!(parse_walkover_marker("w0"), Some(None));
        assert_eq!(parse_walkover_marker("wo 123"), Some(Some("123".to_string())));
        assert_eq!(parse_walkover_marker("Wolf A"), None);
        assert_eq!(parse_walkover_marker("Harwood B"), None);
    }

    #[test]
    fn test_scanner_classifies_tokens() {
        let tokens = vec![
            tok("Berg Anna, BTK", 20.0, 100.0),
            tok("Lind Karin, IFK", 20.0, 120.0),
            tok("Berg A", 200.0, 110.0).with_font("Arial-Bold"),
            tok("8, 9, 6", 260.0, 110.0),
            tok("WO", 320.0, 118.0),
            tok("Knock-Out Stage", 200.0, 20.0),
            tok("Other page, X", 20.0, 100.0).on_page(1),
        ];
        let scanned = Stage01TokenScanner::new().process(&tokens);
        assert_eq!(scanned.page, 0);
        assert_eq!(scanned.ignored_tokens, 1);
        assert_eq!(scanned.main_entrants().count(), 2);
        assert_eq!(scanned.entrants[0].short_name, "Berg A");
        assert_eq!(scanned.scores.len(), 1);
        assert_eq!(scanned.labels.len(), 1);
        assert!(scanned.labels[0].emphasized);
        assert_eq!(scanned.walkover_markers.len(), 1);
        assert!(scanned.qualification_header.is_none());
    }

    #[test]
    fn test_label_dedupe_and_band_filter() {
        let tokens = vec![
            tok("Berg Anna, BTK", 20.0, 100.0),
            tok("Lind Karin, IFK", 20.0, 120.0),
            tok("Berg A", 200.0, 110.0),
            tok("Berg A", 230.0, 113.0),
            tok("Herrar Elit", 200.0, 300.0),
        ];
        let scanned = Stage01TokenScanner::new().process(&tokens);
        assert_eq!(scanned.labels.len(), 1);
        assert!((scanned.labels[0].x - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_qualification_header_splits_entrants() {
        let tokens = vec![
            tok("Berg Anna, BTK", 20.0, 100.0),
            tok("Lind Karin, IFK", 20.0, 120.0),
            tok("Kvalificering", 20.0, 200.0),
            tok("Ek Sara, BTK", 20.0, 220.0),
            tok("Al Lisa, IFK", 20.0, 240.0),
            // the class title in the top-right corner is not a header
            tok("Kval Damer", 500.0, 10.0),
            tok("Filler", 560.0, 700.0),
        ];
        let scanned = Stage01TokenScanner::new().process(&tokens);
        let header = scanned.qualification_header.clone().unwrap();
        assert_eq!(header.text, "Kvalificering");
        assert_eq!(scanned.main_entrants().count(), 2);
        let qual: Vec<_> = scanned.qualification_entrants().map(|e| e.full_name.clone()).collect();
        assert_eq!(qual, vec!["Ek Sara".to_string(), "Al Lisa".to_string()]);
        assert_eq!(scanned.entrants[2].id, EntrantId(2));
    }

    #[test]
    fn test_empty_input() {
        let scanned = Stage01TokenScanner::new().process(&[]);
        assert!(scanned.entrants.is_empty());
        assert!(scanned.labels.is_empty());
    }
}
