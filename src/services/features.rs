use ndarray::Array2;
use std::collections::BTreeSet;

use crate::models::{JoinedRow, PLAYER_STAT_COLUMNS, TEAM_STAT_COLUMNS};

/// Categorical attributes expanded into indicator columns, in the order the
/// joined table carries them.
const CATEGORICAL_ATTRS: &[&str] = &["class_year", "position", "team_abbreviation", "conference"];

/// Model-ready view of the joined player+team table. Identifier and target
/// columns ride alongside the matrix; they are never part of it.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub x: Array2<f64>,
    pub player_ids: Vec<String>,
    pub team_ids: Vec<String>,
    pub seasons: Vec<i64>,
    pub votes: Vec<f64>,
    pub got_votes: Vec<usize>,
}

fn categorical_value<'a>(row: &'a JoinedRow, attr: &str) -> &'a str {
    match attr {
        "class_year" => &row.player.class_year,
        "position" => &row.player.position,
        "team_abbreviation" => &row.player.team_abbreviation,
        "conference" => &row.conference,
        _ => unreachable!("unknown categorical attribute {attr}"),
    }
}

impl FeatureTable {
    /// Build the feature table. Numeric statistics pass through; each
    /// categorical value becomes an `<attr>_<value>` indicator column.
    /// Category sets are collected sorted, so the column set is a pure
    /// function of the input rows.
    pub fn from_rows(rows: &[JoinedRow]) -> Self {
        let mut columns: Vec<String> = PLAYER_STAT_COLUMNS
            .iter()
            .chain(TEAM_STAT_COLUMNS.iter())
            .map(|c| c.to_string())
            .collect();

        for attr in CATEGORICAL_ATTRS {
            let values: BTreeSet<&str> =
                rows.iter().map(|r| categorical_value(r, attr)).collect();
            for value in values {
                columns.push(format!("{attr}_{value}"));
            }
        }

        let mut x = Array2::zeros((rows.len(), columns.len()));
        let numeric_len = PLAYER_STAT_COLUMNS.len() + TEAM_STAT_COLUMNS.len();
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row
                .player
                .stat_values()
                .into_iter()
                .chain(row.team_stat_values())
                .enumerate()
            {
                x[(i, j)] = value;
            }
            for attr in CATEGORICAL_ATTRS {
                let name = format!("{attr}_{}", categorical_value(row, attr));
                // indicator columns sit after the numeric block
                if let Some(j) = columns[numeric_len..].iter().position(|c| *c == name) {
                    x[(i, numeric_len + j)] = 1.0;
                }
            }
        }

        let votes: Vec<f64> = rows.iter().map(|r| r.player.votes.max(0) as f64).collect();
        let got_votes = votes.iter().map(|&v| usize::from(v > 0.0)).collect();

        Self {
            columns,
            x,
            player_ids: rows.iter().map(|r| r.player.player_id.clone()).collect(),
            team_ids: rows.iter().map(|r| r.player.team_abbreviation.clone()).collect(),
            seasons: rows.iter().map(|r| r.player.season).collect(),
            votes,
            got_votes,
        }
    }

    pub fn len(&self) -> usize {
        self.seasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seasons.is_empty()
    }

    /// Row indices split into (train, test) for one evaluation year:
    /// train is strictly before the year, test is exactly the year.
    pub fn season_partition(&self, year: i64) -> (Vec<usize>, Vec<usize>) {
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (i, &season) in self.seasons.iter().enumerate() {
            if season < year {
                train.push(i);
            } else if season == year {
                test.push(i);
            }
        }
        (train, test)
    }

    /// Re-express this table's matrix in another schema's column order,
    /// filling columns this table lacks with zeros and dropping columns the
    /// target schema never had.
    pub fn aligned_to(&self, columns: &[String]) -> Array2<f64> {
        let mut out = Array2::zeros((self.len(), columns.len()));
        for (j_out, column) in columns.iter().enumerate() {
            if let Some(j_in) = self.columns.iter().position(|c| c == column) {
                for i in 0..self.len() {
                    out[(i, j_out)] = self.x[(i, j_in)];
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlayerSeason;

    fn joined(player_id: &str, season: i64, position: &str, conference: &str, votes: i64) -> JoinedRow {
        let mut player = PlayerSeason::zeroed(player_id, season);
        player.team_abbreviation = "ALABAMA".to_string();
        player.position = position.to_string();
        player.class_year = "JR".to_string();
        player.votes = votes;
        player.set_stat("passing_yards", 300.0 * season as f64);
        JoinedRow {
            player,
            conference: conference.to_string(),
            win_percentage: 0.9,
            points_per_game: 40.0,
            points_against_per_game: 17.0,
            strength_of_schedule: 5.0,
            simple_rating_system: 20.0,
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let rows = vec![
            joined("a", 2004, "QB", "SEC", 100),
            joined("b", 2004, "RB", "BIG-10", 0),
            joined("c", 2005, "QB", "SEC", 0),
        ];
        let first = FeatureTable::from_rows(&rows);
        let second = FeatureTable::from_rows(&rows);
        assert_eq!(first.columns, second.columns);
        assert_eq!(first.x, second.x);
        assert_eq!(first.player_ids, second.player_ids);
    }

    #[test]
    fn test_indicator_columns_and_labels() {
        let rows = vec![
            joined("a", 2004, "QB", "SEC", 100),
            joined("b", 2004, "RB", "BIG-10", 0),
        ];
        let table = FeatureTable::from_rows(&rows);

        let qb = table.columns.iter().position(|c| c == "position_QB").unwrap();
        let rb = table.columns.iter().position(|c| c == "position_RB").unwrap();
        assert_eq!(table.x[(0, qb)], 1.0);
        assert_eq!(table.x[(0, rb)], 0.0);
        assert_eq!(table.x[(1, rb)], 1.0);

        assert_eq!(table.got_votes, vec![1, 0]);
        assert_eq!(table.votes, vec![100.0, 0.0]);
        // identifiers and targets never leak into the matrix
        assert!(table.columns.iter().all(|c| c != "votes" && c != "got_votes" && c != "season"));
    }

    #[test]
    fn test_season_partition_is_disjoint_and_complete() {
        let rows = vec![
            joined("a", 2004, "QB", "SEC", 0),
            joined("b", 2005, "QB", "SEC", 0),
            joined("c", 2006, "QB", "SEC", 0),
            joined("d", 2006, "RB", "SEC", 0),
            joined("e", 2007, "RB", "SEC", 0),
        ];
        let table = FeatureTable::from_rows(&rows);
        let (train, test) = table.season_partition(2006);

        assert_eq!(train, vec![0, 1]);
        assert_eq!(test, vec![2, 3]);
        for i in &train {
            assert!(table.seasons[*i] < 2006);
        }
        // train ∪ test covers exactly the rows with season ≤ 2006
        let mut union: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        union.sort_unstable();
        let expected: Vec<usize> = (0..table.len()).filter(|&i| table.seasons[i] <= 2006).collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_aligned_to_fills_missing_and_drops_unknown() {
        let train_rows = vec![
            joined("a", 2004, "QB", "SEC", 0),
            joined("b", 2004, "RB", "SEC", 0),
        ];
        let train = FeatureTable::from_rows(&train_rows);

        // new data has a position the training schema never saw, and lacks RB
        let new_rows = vec![joined("z", 2008, "WR", "SEC", 0)];
        let new = FeatureTable::from_rows(&new_rows);
        let aligned = new.aligned_to(&train.columns);

        assert_eq!(aligned.ncols(), train.columns.len());
        let rb = train.columns.iter().position(|c| c == "position_RB").unwrap();
        assert_eq!(aligned[(0, rb)], 0.0);
        assert!(train.columns.iter().all(|c| c != "position_WR"));

        let passing = train.columns.iter().position(|c| c == "passing_yards").unwrap();
        assert_eq!(aligned[(0, passing)], 300.0 * 2008.0);
    }
}
