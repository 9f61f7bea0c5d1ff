use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Defines `PlayerSeason` together with the statistic column list and the
/// accessors keyed on it, so the schema, the upserts and the feature matrix
/// can never disagree about which columns exist or in which order.
macro_rules! player_season_stats {
    ($($stat:ident),+ $(,)?) => {
        /// One row per (player, season). Statistic fields are always
        /// present; sources that omit one report it as zero.
        #[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
        pub struct PlayerSeason {
            pub player_id: String,
            pub season: i64,
            pub team_abbreviation: String,
            pub position: String,
            /// Academic class: FR, SO, JR, SR.
            pub class_year: String,
            $(pub $stat: f64,)+
            pub votes: i64,
        }

        /// Numeric statistic columns in schema order.
        pub const PLAYER_STAT_COLUMNS: &[&str] = &[$(stringify!($stat)),+];

        impl PlayerSeason {
            pub fn zeroed(player_id: &str, season: i64) -> Self {
                Self {
                    player_id: player_id.to_string(),
                    season,
                    team_abbreviation: String::new(),
                    position: String::new(),
                    class_year: String::new(),
                    $($stat: 0.0,)+
                    votes: 0,
                }
            }

            /// Statistic values in `PLAYER_STAT_COLUMNS` order.
            pub fn stat_values(&self) -> Vec<f64> {
                vec![$(self.$stat),+]
            }

            /// Set a statistic by column name. Returns false when the name
            /// is not a statistic column.
            pub fn set_stat(&mut self, name: &str, value: f64) -> bool {
                match name {
                    $(stringify!($stat) => { self.$stat = value; true })+
                    _ => false,
                }
            }
        }
    };
}

player_season_stats! {
    height,
    weight,
    games,
    completed_passes,
    pass_attempts,
    passing_completion,
    passing_yards,
    passing_touchdowns,
    interceptions_thrown,
    passing_yards_per_attempt,
    adjusted_yards_per_attempt,
    quarterback_rating,
    rush_attempts,
    rush_yards,
    rush_yards_per_attempt,
    rush_touchdowns,
    receptions,
    receiving_yards,
    receiving_yards_per_reception,
    receiving_touchdowns,
    plays_from_scrimmage,
    yards_from_scrimmage,
    yards_from_scrimmage_per_play,
    rushing_and_receiving_touchdowns,
    solo_tackles,
    assists_on_tackles,
    total_tackles,
    tackles_for_loss,
    sacks,
    interceptions,
    yards_returned_from_interceptions,
    yards_returned_per_interception,
    interceptions_returned_for_touchdown,
    passes_defended,
    fumbles_recovered,
    yards_recovered_from_fumble,
    fumbles_recovered_for_touchdown,
    fumbles_forced,
    punt_return_touchdowns,
    kickoff_return_touchdowns,
    other_touchdowns,
    total_touchdowns,
    extra_points_made,
    field_goals_made,
    extra_points_attempted,
    extra_point_percentage,
    field_goals_attempted,
    field_goal_percentage,
    two_point_conversions,
    safeties,
    points,
    usage_overall,
    usage_pass,
    usage_rush,
    usage_first_down,
    usage_second_down,
    usage_third_down,
    usage_standard_downs,
    usage_passing_downs,
    avg_ppa_all,
    avg_ppa_pass,
    avg_ppa_rush,
    avg_ppa_first_down,
    avg_ppa_second_down,
    avg_ppa_third_down,
    avg_ppa_standard_downs,
    avg_ppa_passing_downs,
}

/// One row per (team, season).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamSeason {
    pub team_id: String,
    pub season: i64,
    pub conference: String,
    pub win_percentage: f64,
    pub points_per_game: f64,
    pub points_against_per_game: f64,
    pub strength_of_schedule: f64,
    pub simple_rating_system: f64,
}

/// Numeric team columns in schema order.
pub const TEAM_STAT_COLUMNS: &[&str] = &[
    "win_percentage",
    "points_per_game",
    "points_against_per_game",
    "strength_of_schedule",
    "simple_rating_system",
];

impl TeamSeason {
    pub fn stat_values(&self) -> Vec<f64> {
        vec![
            self.win_percentage,
            self.points_per_game,
            self.points_against_per_game,
            self.strength_of_schedule,
            self.simple_rating_system,
        ]
    }
}

/// A player row joined with its team-season row.
#[derive(Debug, Clone, FromRow)]
pub struct JoinedRow {
    #[sqlx(flatten)]
    pub player: PlayerSeason,
    pub conference: String,
    pub win_percentage: f64,
    pub points_per_game: f64,
    pub points_against_per_game: f64,
    pub strength_of_schedule: f64,
    pub simple_rating_system: f64,
}

impl JoinedRow {
    pub fn team_stat_values(&self) -> Vec<f64> {
        vec![
            self.win_percentage,
            self.points_per_game,
            self.points_against_per_game,
            self.strength_of_schedule,
            self.simple_rating_system,
        ]
    }
}

/// Projected vote count for one player in one season.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PredictionRow {
    pub player_id: String,
    pub team_id: String,
    pub season: i64,
    pub projected_votes: f64,
    pub model_id: String,
    pub created_at: String,
}

/// One trained (classifier, regressor) pair with its backtest metrics.
/// Per-year metrics live in `metrics` as a JSON document; the averages are
/// real columns so SQL can rank candidates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelRecord {
    pub model_id: String,
    pub clf_kind: String,
    pub reg_kind: String,
    pub clf_params: String,
    pub reg_params: String,
    pub clf_artifact: String,
    pub reg_artifact: String,
    pub metrics: String,
    pub precision_avg: f64,
    pub recall_avg: f64,
    pub fscore_avg: f64,
    pub rmse_avg: f64,
    pub created_at: String,
}

/// Leaderboard view: top projected vote-getters, display-formatted.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player: String,
    pub team: String,
    pub season: i64,
    pub projected_votes: f64,
}

// API Response envelope (used by endpoints that are not bare lists)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stat_columns_unique() {
        let set: HashSet<_> = PLAYER_STAT_COLUMNS.iter().collect();
        assert_eq!(set.len(), PLAYER_STAT_COLUMNS.len());
    }

    #[test]
    fn test_stat_values_match_column_order() {
        let mut p = PlayerSeason::zeroed("joe-burrow-1", 2019);
        assert!(p.set_stat("passing_yards", 5671.0));
        assert!(p.set_stat("passing_touchdowns", 60.0));
        assert!(!p.set_stat("not_a_column", 1.0));

        let values = p.stat_values();
        assert_eq!(values.len(), PLAYER_STAT_COLUMNS.len());
        let idx = PLAYER_STAT_COLUMNS
            .iter()
            .position(|&c| c == "passing_yards")
            .unwrap();
        assert_eq!(values[idx], 5671.0);
    }
}
