//! Name normalization, alias sets and winner-label resolution
//!
//! Winner labels are abbreviated ("Andersson E", "E Andersson", "Andersson")
//! and must be mapped back to a specific entrant line. Every entrant carries a
//! precomputed alias set; resolution is an ordered list of exact lookups with
//! a vertical-proximity tie-break, so every decision can be traced to one rule.

use crate::pipeline::types::{EntrantId, EntrantLine};
use std::collections::BTreeSet;

/// Lowercase, drop `.`/`,`, collapse whitespace
#[must_use = "returns the normalized name"]
pub fn normalize_name(text: &str) -> String {
    text.to_lowercase()
        .replace(['.', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First token plus the initial of the second token
///
/// `"Andersson Erik"` → `"Andersson E"`; single tokens are returned as-is.
#[must_use = "returns the short name"]
pub fn make_short(name: &str) -> String {
    let mut parts = name.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => match second.chars().next() {
            Some(initial) => format!("{first} {initial}"),
            None => first.to_string(),
        },
        (Some(first), None) => first.to_string(),
        _ => String::new(),
    }
}

fn initial(token: &str) -> String {
    token.chars().next().map(String::from).unwrap_or_default()
}

fn add_splits(tokens: &[&str], aliases: &mut BTreeSet<String>) {
    for i in 1..tokens.len() {
        let prefix = tokens[..i].join(" ");
        let suffix = tokens[i..].join(" ");
        aliases.insert(format!("{prefix} {suffix}"));
        aliases.insert(format!("{suffix} {prefix}"));
    }
}

/// Alias set for a full name as printed ("Surname Given ...")
///
/// Contains the normalized full name, every two-part split in both orders,
/// first initial + remainder (spaced and joined), and for every surname
/// group length: the surname alone, surname + initials (both orders),
/// surname + joined single-letter given names, and given initials + last
/// given name + surname.
/// Hyphenated names additionally get the splits of their hyphen-split form.
#[must_use = "returns the alias set"]
pub fn build_aliases(full_name: &str) -> BTreeSet<String> {
    let normalized = normalize_name(full_name);
    let mut aliases = BTreeSet::new();
    if normalized.is_empty() {
        return aliases;
    }
    let tokens: Vec<&str> = normalized.split(' ').collect();
    aliases.insert(normalized.clone());
    if tokens.len() < 2 {
        return aliases;
    }

    add_splits(&tokens, &mut aliases);

    let first_initial = initial(tokens[0]);
    let rest = tokens[1..].join(" ");
    aliases.insert(format!("{first_initial} {rest}"));
    aliases.insert(format!("{first_initial}{rest}"));

    for split in 1..tokens.len() {
        let surname = tokens[..split].join(" ");
        let given = &tokens[split..];
        aliases.insert(surname.clone());

        let initials: Vec<String> = given.iter().map(|t| initial(t)).collect();
        aliases.insert(format!("{surname} {}", initials.join(" ")));
        aliases.insert(format!("{} {surname}", initials.join(" ")));
        if given.iter().all(|t| t.chars().count() == 1) {
            aliases.insert(format!("{surname} {}", given.concat()));
        }

        if given.len() > 1 {
            let leading = given[..given.len() - 1]
                .iter()
                .map(|t| initial(t))
                .collect::<Vec<_>>()
                .join(" ");
            aliases.insert(format!("{leading} {} {surname}", given[given.len() - 1]));
        }
    }

    let hyphen_tokens: Vec<&str> = normalized
        .split(|c: char| c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if hyphen_tokens.len() > tokens.len() {
        add_splits(&hyphen_tokens, &mut aliases);
    }

    aliases
}

fn nearest<'a, I>(center: f64, candidates: I) -> Option<&'a EntrantLine>
where
    I: Iterator<Item = &'a EntrantLine>,
{
    // min_by keeps the first of equal elements: pool order breaks ties
    candidates.min_by(|a, b| (a.center - center).abs().total_cmp(&(b.center - center).abs()))
}

/// Rule that resolved a label (reported in trace logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Code,
    ShortName,
    LabelShortName,
    FullNamePrefix,
    Alias,
}

/// Resolve a winner label to one entrant of `pool`
///
/// Rules in order, each choosing the candidate nearest to `center`:
/// 1. external code equality
/// 2. label equals the entrant short name
/// 3. short form of the label equals the entrant short name
/// 4. entrant full name starts with the label
/// 5. label is in the entrant alias set
#[must_use = "returns the resolved entrant"]
pub fn resolve_label(
    label: &str,
    code: Option<&str>,
    center: f64,
    pool: &[&EntrantLine],
) -> Option<(EntrantId, Resolution)> {
    let normalized = normalize_name(label);

    if let Some(code) = code {
        if let Some(hit) = nearest(
            center,
            pool.iter().copied().filter(|e| e.code.as_deref() == Some(code)),
        ) {
            return Some((hit.id, Resolution::Code));
        }
    }
    if normalized.is_empty() {
        return None;
    }

    if let Some(hit) = nearest(
        center,
        pool.iter()
            .copied()
            .filter(|e| normalize_name(&e.short_name) == normalized),
    ) {
        return Some((hit.id, Resolution::ShortName));
    }

    let alt_short = normalize_name(&make_short(label));
    if alt_short != normalized {
        if let Some(hit) = nearest(
            center,
            pool.iter()
                .copied()
                .filter(|e| normalize_name(&e.short_name) == alt_short),
        ) {
            return Some((hit.id, Resolution::LabelShortName));
        }
    }

    if let Some(hit) = nearest(
        center,
        pool.iter()
            .copied()
            .filter(|e| starts_with_words(&normalize_name(&e.full_name), &normalized)),
    ) {
        return Some((hit.id, Resolution::FullNamePrefix));
    }

    nearest(
        center,
        pool.iter().copied().filter(|e| e.aliases.contains(&normalized)),
    )
    .map(|hit| (hit.id, Resolution::Alias))
}

/// `text` begins with `prefix` and the prefix ends on a word boundary
fn starts_with_words(text: &str, prefix: &str) -> bool {
    text.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '-']))
}
