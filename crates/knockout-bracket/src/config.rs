//! Tolerance configuration for the bracket pipeline
//!
//! Every geometric threshold the stages use is tuned to one family of result
//! sheets. `BracketConfig` gathers the per-stage configs so a differently scaled
//! document family can be re-tuned from a TOML file without touching code.
//!
//! ```toml
//! verbose_diagnostics = true
//!
//! [first_round]
//! score_tolerance = 34.0
//!
//! [walkover]
//! horizontal_tolerance = 280.0
//! ```
//!
//! Missing tables and fields keep their defaults.

use crate::error::{BracketError, Result};
use crate::pipeline::stage01_token_scanner::Stage01Config;
use crate::pipeline::stage02_column_banding::Stage02Config;
use crate::pipeline::stage03_round_allocation::Stage03Config;
use crate::pipeline::stage04_first_round::Stage04Config;
use crate::pipeline::stage05_round_advancer::Stage05Config;
use crate::pipeline::stage06_final_round::Stage06Config;
use crate::pipeline::stage07_walkover::Stage07Config;
use crate::pipeline::stage08_qualification::Stage08Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of the whole pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketConfig {
    /// Dump per-round state at debug level
    pub verbose_diagnostics: bool,
    pub scanner: Stage01Config,
    pub banding: Stage02Config,
    pub allocation: Stage03Config,
    pub first_round: Stage04Config,
    pub advancer: Stage05Config,
    pub final_round: Stage06Config,
    pub walkover: Stage07Config,
    pub qualification: Stage08Config,
}

impl BracketConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| BracketError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or the defaults if the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BracketError::config(e.to_string()))
    }

    /// Reject tolerances that are negative or not finite
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.tolerances() {
            if !value.is_finite() {
                return Err(BracketError::config(format!("{name} must be finite, got {value}")));
            }
            if value < 0.0 {
                return Err(BracketError::config(format!("{name} must not be negative, got {value}")));
            }
        }
        if self.scanner.band_margin_min > self.scanner.band_margin_max {
            return Err(BracketError::config(format!(
                "scanner.band_margin_min ({}) exceeds scanner.band_margin_max ({})",
                self.scanner.band_margin_min, self.scanner.band_margin_max
            )));
        }
        if self.walkover.min_vertical_tolerance > self.walkover.max_vertical_tolerance {
            return Err(BracketError::config(format!(
                "walkover.min_vertical_tolerance ({}) exceeds walkover.max_vertical_tolerance ({})",
                self.walkover.min_vertical_tolerance, self.walkover.max_vertical_tolerance
            )));
        }
        Ok(())
    }

    fn tolerances(&self) -> [(&'static str, f64); 37] {
        let s = &self.scanner;
        let f = &self.first_round;
        let a = &self.advancer;
        let fin = &self.final_round;
        let w = &self.walkover;
        let q = &self.qualification;
        [
            ("scanner.entrant_max_x", s.entrant_max_x),
            ("scanner.label_dedupe_distance", s.label_dedupe_distance),
            ("scanner.band_margin_factor", s.band_margin_factor),
            ("scanner.band_margin_min", s.band_margin_min),
            ("scanner.band_margin_max", s.band_margin_max),
            ("scanner.band_default_spacing", s.band_default_spacing),
            ("scanner.header_upper_fraction", s.header_upper_fraction),
            ("scanner.header_right_fraction", s.header_right_fraction),
            ("scanner.header_midline_fraction", s.header_midline_fraction),
            ("scanner.qualification_offset", s.qualification_offset),
            ("banding.max_gap", self.banding.max_gap),
            ("first_round.score_tolerance", f.score_tolerance),
            ("first_round.recruit_tolerance", f.recruit_tolerance),
            ("first_round.placeholder_edge_factor", f.placeholder_edge_factor),
            ("first_round.placeholder_gap_factor", f.placeholder_gap_factor),
            ("first_round.default_spacing", f.default_spacing),
            ("advancer.winner_tolerance_base", a.winner_tolerance_base),
            ("advancer.score_tolerance_base", a.score_tolerance_base),
            ("advancer.tolerance_step", a.tolerance_step),
            ("advancer.matched_label_reach", a.matched_label_reach),
            ("advancer.score_fallback_width", a.score_fallback_width),
            ("advancer.score_window_padding", a.score_window_padding),
            ("final_round.winner_tolerance", fin.winner_tolerance),
            ("final_round.score_tolerance", fin.score_tolerance),
            ("final_round.residual_score_tolerance", fin.residual_score_tolerance),
            ("final_round.band_slack", fin.band_slack),
            ("walkover.min_vertical_tolerance", w.min_vertical_tolerance),
            ("walkover.max_vertical_tolerance", w.max_vertical_tolerance),
            ("walkover.spacing_factor", w.spacing_factor),
            ("walkover.horizontal_tolerance", w.horizontal_tolerance),
            ("walkover.tiny_label_tolerance", w.tiny_label_tolerance),
            ("walkover.tiny_score_tolerance", w.tiny_score_tolerance),
            ("walkover.tiny_marker_tolerance", w.tiny_marker_tolerance),
            ("qualification.column_gap", q.column_gap),
            ("qualification.marker_vertical_tolerance", q.marker_vertical_tolerance),
            ("qualification.marker_horizontal_tolerance", q.marker_horizontal_tolerance),
            ("qualification.score_tolerance", q.score_tolerance),
        ]
    }
}
