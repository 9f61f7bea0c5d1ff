use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::PlayerSeason;
use crate::services::collector::{import_players_csv, import_teams_csv, IngestReport, StatsCollector};
use crate::services::features::FeatureTable;
use crate::services::grid::{run_grid, SearchSpace};
use crate::services::predictor::predict_season;
use crate::utils::{display_player_name, display_team_name};

pub async fn fetch_data(config: &Config, from: i64, to: i64) -> Result<()> {
    let pool = db::init_database(config).await?;
    let collector = StatsCollector::new(config);

    println!("🏈 Collecting seasons {from}..{to}…");

    let mut total = IngestReport::default();
    for season in from..=to {
        println!("📥 Season {season}…");
        total.absorb(collector.collect_season(&pool, season).await?);
    }

    println!(
        "✅ Done: {} teams, {} players, {} vote totals ({} skipped)",
        total.teams_upserted,
        total.players_upserted,
        total.votes_applied,
        total.skipped.len()
    );
    Ok(())
}

pub async fn import_csv(
    config: &Config,
    teams: Option<&Path>,
    players: Option<&Path>,
) -> Result<()> {
    let pool = db::init_database(config).await?;

    if let Some(path) = teams {
        println!("📥 Importing teams from {}…", path.display());
        let report = import_teams_csv(&pool, path).await?;
        println!("   {} team rows ({} skipped)", report.teams_upserted, report.skipped.len());
    }
    if let Some(path) = players {
        println!("📥 Importing players from {}…", path.display());
        let report = import_players_csv(&pool, path).await?;
        println!("   {} player rows ({} skipped)", report.players_upserted, report.skipped.len());
    }

    println!("✅ Import complete");
    Ok(())
}

pub async fn train_models(config: &Config) -> Result<()> {
    let pool = db::init_database(config).await?;

    println!("📊 Loading joined player/team table…");
    let rows = db::fetch_joined_rows(&pool).await?;
    if rows.is_empty() {
        println!("📭 No joined rows found. Fetch or import data first: heisman fetch");
        return Ok(());
    }
    let table = FeatureTable::from_rows(&rows);
    println!("   {} rows, {} feature columns", table.len(), table.columns.len());

    let space = SearchSpace::standard();
    println!("🔬 Sweeping {} model combinations…", space.combination_count());
    let summary = run_grid(&pool, &table, &space).await?;

    println!(
        "✅ Trained {} models ({} combinations failed); {} candidates stored in total",
        summary.trained,
        summary.failed,
        db::count_models(&pool).await?
    );

    if let Some(best) = db::get_best_model(&pool).await? {
        println!("\n🏆 Best pair so far:");
        println!("   classifier: {} {}", best.clf_kind, best.clf_params);
        println!("   regressor:  {} {}", best.reg_kind, best.reg_params);
        println!(
            "   precision {:.3} | recall {:.3} | F-score {:.3} | RMSE {:.1}",
            best.precision_avg, best.recall_avg, best.fscore_avg, best.rmse_avg
        );
    }
    Ok(())
}

pub async fn run_prediction(config: &Config, season: i64) -> Result<()> {
    let pool = db::init_database(config).await?;

    println!("🔮 Projecting {season} vote totals…");
    let report = predict_season(&pool, season).await?;
    println!(
        "✅ Stored {} projections for {} (model {})",
        report.stored, report.season, report.model_id
    );
    if let Some(model) = db::get_model_by_id(&pool, &report.model_id).await? {
        println!(
            "   pair: {} + {} | backtest F-score {:.3}, RMSE {:.1}",
            model.clf_kind, model.reg_kind, model.fscore_avg, model.rmse_avg
        );
    }

    show_leaderboard(config, Some(season)).await
}

pub async fn show_leaderboard(config: &Config, season: Option<i64>) -> Result<()> {
    let pool = db::init_database(config).await?;

    let rows = match season {
        Some(season) => db::get_predictions_for_season(&pool, season).await?,
        None => db::get_all_predictions(&pool).await?,
    };

    if rows.is_empty() {
        println!("📭 No predictions stored. Run: heisman predict --season <year>");
        return Ok(());
    }

    println!("\n🏆 Projected leaderboard:");
    for (i, row) in rows.iter().take(15).enumerate() {
        println!(
            "{:>2}. {:<24} {:<20} {:>6.0} votes",
            i + 1,
            display_player_name(&row.player_id),
            display_team_name(&row.team_id),
            row.projected_votes
        );
    }
    Ok(())
}

pub async fn query_player(config: &Config, name: &str) -> Result<()> {
    let pool = db::init_database(config).await?;

    println!("🔍 Searching for player: {name}");
    let slug = name.trim().to_lowercase().replace(' ', "-");
    let rows = db::search_players(&pool, &slug).await?;

    if rows.is_empty() {
        println!("❌ No players found matching '{name}'");
        suggest_closest(&pool, &slug).await?;
        return Ok(());
    }

    let mut current = String::new();
    for row in &rows {
        if row.player_id != current {
            println!("\n📊 {} ({})", display_player_name(&row.player_id), row.player_id);
            current = row.player_id.clone();
        }
        print_season_line(row);
    }
    Ok(())
}

fn print_season_line(row: &PlayerSeason) {
    let headline = match row.position.as_str() {
        "QB" => format!("{:.0} pass yds, {:.0} pass TD", row.passing_yards, row.passing_touchdowns),
        "RB" => format!("{:.0} rush yds, {:.0} rush TD", row.rush_yards, row.rush_touchdowns),
        "WR" | "TE" => format!("{:.0} rec yds, {:.0} rec TD", row.receiving_yards, row.receiving_touchdowns),
        _ => format!("{:.0} tackles, {:.1} sacks", row.total_tackles, row.sacks),
    };
    let votes = if row.votes > 0 {
        format!(" | {} Heisman votes", row.votes)
    } else {
        String::new()
    };
    println!(
        "   {} {:<4} {:<3} {} ({}){votes}",
        row.season,
        row.position,
        row.class_year,
        headline,
        display_team_name(&row.team_abbreviation),
    );
}

async fn suggest_closest(pool: &sqlx::SqlitePool, slug: &str) -> Result<()> {
    let ids = db::all_player_ids(pool).await?;
    if ids.is_empty() {
        return Ok(());
    }

    let mut scored: Vec<(f64, &String)> = ids
        .iter()
        .map(|id| (strsim::jaro_winkler(slug, id), id))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    println!("\n💡 Closest names:");
    for (score, id) in scored.iter().take(5) {
        if *score > 0.6 {
            println!("   • {} ({})", display_player_name(id), id);
        }
    }
    Ok(())
}
