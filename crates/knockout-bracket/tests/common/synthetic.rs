use knockout_bracket::PositionedToken;

pub const ENTRANT_X0: f64 = 20.0;
pub const FIRST_CENTER: f64 = 100.0;
pub const ENTRANT_SPACING: f64 = 20.0;
pub const FIRST_LABEL_X: f64 = 200.0;
pub const COLUMN_STEP: f64 = 120.0;
pub const SCORE_OFFSET: f64 = 60.0;
pub const CLUB: &str = "BTK Test";

const GIVEN: &[&str] = &["Anna", "Erik", "Sara", "Olle", "Karin", "Johan", "Maria", "Per"];

/// Alphabetic surname unique per index ("Kaaa", "Kaab", ...)
pub fn surname(idx: usize) -> String {
    let letter = |n: usize| char::from(b'a' + (n % 26) as u8);
    format!("K{}{}{}", letter(idx / 676), letter(idx / 26), letter(idx))
}

pub fn full_name(idx: usize) -> String {
    format!("{} {}", surname(idx), GIVEN[idx % GIVEN.len()])
}

/// Label text naming entrant `idx` ("Kaab E")
pub fn short_name(idx: usize) -> String {
    format!("{} {}", surname(idx), &GIVEN[idx % GIVEN.len()][..1])
}

pub fn entrant_center(idx: usize) -> f64 {
    FIRST_CENTER + ENTRANT_SPACING * idx as f64
}

pub fn token(text: impl Into<String>, x0: f64, center: f64) -> PositionedToken {
    PositionedToken::new(text, x0, x0 + 50.0, center - 4.0, center + 4.0)
}

pub fn entrant_token(idx: usize, center: f64) -> PositionedToken {
    PositionedToken::new(
        format!("{}, {CLUB}", full_name(idx)),
        ENTRANT_X0,
        ENTRANT_X0 + 130.0,
        center - 4.0,
        center + 4.0,
    )
}

/// x of the label column of round `round` (0-based)
pub fn label_x(round: usize) -> f64 {
    FIRST_LABEL_X + COLUMN_STEP * round as f64
}

pub fn score_x(round: usize) -> f64 {
    label_x(round) + SCORE_OFFSET
}

/// Match centers per round of a complete bracket
pub fn match_centers(tree_size: usize) -> Vec<Vec<f64>> {
    let mut rounds: Vec<Vec<f64>> = Vec::new();
    let mut current: Vec<f64> = (0..tree_size).map(entrant_center).collect();
    while current.len() >= 2 {
        current = current.chunks(2).map(|p| (p[0] + p[1]) / 2.0).collect();
        rounds.push(current.clone());
    }
    rounds
}

/// Winner of every match per round when the upper side always wins
pub fn upper_winners(tree_size: usize) -> Vec<Vec<usize>> {
    let mut rounds: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..tree_size).collect();
    while current.len() >= 2 {
        current = current.chunks(2).map(|p| p[0]).collect();
        rounds.push(current.clone());
    }
    rounds
}

/// Complete synthetic sheet of `tree_size` entrants
#[derive(Debug, Clone)]
pub struct SyntheticSheet {
    pub tokens: Vec<PositionedToken>,
    pub tree_size: usize,
    pub winners: Vec<Vec<usize>>,
}

impl SyntheticSheet {
    /// Every match decided in three straight games won by the upper side
    pub fn complete(tree_size: usize) -> Self {
        Self::with_columns(tree_size, |round| round)
    }

    /// Complete sheet whose rounds `shared` and `shared + 1` print their labels
    /// and scores in one physical column; later rounds move one column left
    pub fn collapsed(tree_size: usize, shared: usize) -> Self {
        Self::with_columns(tree_size, |round| if round > shared { round - 1 } else { round })
    }

    /// Complete sheet with round `r` printed in column `column(r)`
    pub fn with_columns(tree_size: usize, column: impl Fn(usize) -> usize) -> Self {
        Self::build(tree_size, 0, column)
    }

    /// Sheet printed as two half pages, the grand final in an extra column
    /// right of the upper half's final on page 0
    pub fn two_page(tree_size: usize) -> Self {
        let half = tree_size / 2;
        let upper = Self::build(half, 0, |round| round);
        let lower = Self::build(half, half, |round| round);
        let final_column = upper.winners.len();
        let final_center = match_centers(half).last().map_or(FIRST_CENTER, |r| r[0]);

        let mut tokens = upper.tokens;
        tokens.push(token(short_name(0), label_x(final_column), final_center));
        tokens.push(token("8, 9, 6", score_x(final_column), final_center + 2.0));
        tokens.extend(lower.tokens.into_iter().map(|t| t.on_page(1)));

        let mut winners: Vec<Vec<usize>> = upper
            .winners
            .into_iter()
            .zip(lower.winners)
            .map(|(mut upper_round, lower_round)| {
                upper_round.extend(lower_round);
                upper_round
            })
            .collect();
        winners.push(vec![0]);
        Self {
            tokens,
            tree_size,
            winners,
        }
    }

    /// Entrants `first..first + tree_size`, listed from the top of the page
    fn build(tree_size: usize, first: usize, column: impl Fn(usize) -> usize) -> Self {
        let mut tokens: Vec<PositionedToken> = (0..tree_size)
            .map(|slot| entrant_token(first + slot, entrant_center(slot)))
            .collect();
        let centers = match_centers(tree_size);
        let winners: Vec<Vec<usize>> = upper_winners(tree_size)
            .into_iter()
            .map(|round| round.into_iter().map(|w| first + w).collect())
            .collect();
        for (round, (round_centers, round_winners)) in centers.iter().zip(&winners).enumerate() {
            let col = column(round);
            for (&center, &winner) in round_centers.iter().zip(round_winners) {
                tokens.push(token(short_name(winner), label_x(col), center));
                tokens.push(token("8, 9, 6", score_x(col), center + 2.0));
            }
        }
        Self {
            tokens,
            tree_size,
            winners,
        }
    }

    pub fn champion(&self) -> Option<usize> {
        self.winners.last().and_then(|r| r.first()).copied()
    }
}
