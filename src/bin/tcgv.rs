use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use card_variations::cli::refresh_loop::{self, RefreshLoopConfig};
use card_variations::cli::report;
use card_variations::database_ops::catalog::{GameId, SetId};
use card_variations::database_ops::db::Db;
use card_variations::database_ops::overrides::{NewOverride, OverrideScope};
use card_variations::database_ops::predicate::{Field, Predicate};
use card_variations::logging::init_tracing;
use card_variations::util::env::{self, EngineConfig};
use card_variations::{normalize, Dimension, RawPrintingAttributes, VariationEngine, VariationMatcher};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tcgv", version, about = "Card variation admin CLI")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    /// Optional override for max pool connections
    #[arg(long, global = true)]
    max_connections: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

/// One value per dimension. Omitted dimensions are absent (keys) or wildcards (matchers).
#[derive(Args, Debug, Clone, Default)]
struct DimensionArgs {
    #[arg(long)]
    treatment: Option<String>,
    #[arg(long)]
    finish: Option<String>,
    #[arg(long)]
    border_color: Option<String>,
    #[arg(long)]
    frame_effect: Option<String>,
    #[arg(long)]
    promo_type: Option<String>,
}

impl DimensionArgs {
    fn pairs(&self) -> [(Dimension, Option<&String>); 5] {
        [
            (Dimension::Treatment, self.treatment.as_ref()),
            (Dimension::Finish, self.finish.as_ref()),
            (Dimension::BorderColor, self.border_color.as_ref()),
            (Dimension::FrameEffect, self.frame_effect.as_ref()),
            (Dimension::PromoType, self.promo_type.as_ref()),
        ]
    }

    fn raw(&self) -> RawPrintingAttributes {
        self.pairs()
            .into_iter()
            .fold(RawPrintingAttributes::default(), |acc, (dim, v)| match v {
                Some(v) => acc.with(dim, v.as_str()),
                None => acc,
            })
    }

    fn matcher(&self) -> VariationMatcher {
        self.pairs()
            .into_iter()
            .fold(VariationMatcher::any(), |acc, (dim, v)| match v {
                Some(v) => acc.with(dim, v.as_str()),
                None => acc,
            })
    }
}

fn scope_of(game: Option<GameId>) -> OverrideScope {
    OverrideScope::from_column(game)
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// List distinct variation combinations of one set
    DiscoverSet { set_id: SetId },
    /// List distinct variation combinations across a game
    DiscoverGame { game_id: GameId },
    /// Resolve the display text for one printing
    Resolve {
        /// Game scope (omit for global)
        #[arg(long)]
        game: Option<GameId>,
        #[command(flatten)]
        dims: DimensionArgs,
    },
    /// Create a display override; omitted dimensions are wildcards
    OverrideAdd {
        #[arg(long)]
        game: Option<GameId>,
        #[arg(long)]
        text: String,
        #[arg(long)]
        notes: Option<String>,
        #[command(flatten)]
        dims: DimensionArgs,
    },
    /// List overrides of one scope
    OverrideList {
        #[arg(long)]
        game: Option<GameId>,
    },
    /// Change display text and notes of an override
    OverrideEdit {
        id: i64,
        #[arg(long)]
        text: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove an override
    OverrideDelete { id: i64 },
    /// Rebuild and store the variation summary of one set
    MetadataSet { set_id: SetId },
    /// Rebuild and store the variation summary of one game
    MetadataGame { game_id: GameId },
    /// Regenerate and publish the filter index once
    Refresh,
    /// Regenerate the filter index periodically (skips ticks while a refresh runs)
    RefreshLoop {
        /// Defaults to VARIATION_REFRESH_INTERVAL_SECS
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        max_runs: Option<u64>,
    },
    /// Print entries of the published filter index
    Index {
        #[arg(long)]
        game: Option<GameId>,
        #[arg(long)]
        set: Option<SetId>,
        /// Only game-level entries
        #[arg(long, default_value_t = false)]
        game_level: bool,
    },
    /// Report overrides that match no current combination
    Orphans,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info")?;

    let cli = Cli::parse();
    let cfg = EngineConfig::from_env();
    let database_url = match cli.db_url {
        Some(url) => url,
        None => env::db_url()?,
    };
    env::preflight_check(
        "tcgv",
        &[],
        &[
            "DATABASE_URL",
            "DB_URL",
            "DB_MAX_CONNECTIONS",
            "AUTO_MIGRATE",
            "USE_PREPARED",
            "VARIATION_REFRESH_INTERVAL_SECS",
        ],
    )?;
    let max_connections = cli.max_connections.unwrap_or(cfg.max_connections);
    let db = Db::connect(&database_url, max_connections)
        .await
        .context("connecting to database")?;
    let engine = Arc::new(VariationEngine::postgres(&db));

    match cli.command {
        Commands::DiscoverSet { set_id } => {
            let combos = engine.discover_for_set(set_id).await?;
            print!("{}", report::render_combinations(&format!("set {set_id}"), &combos));
        }
        Commands::DiscoverGame { game_id } => {
            let combos = engine.discover_for_game(game_id).await?;
            print!("{}", report::render_combinations(&format!("game {game_id}"), &combos));
        }
        Commands::Resolve { game, dims } => {
            let key = normalize(&dims.raw());
            match engine.resolve(&key, scope_of(game)).await? {
                Some(text) => println!("{key} => {text}"),
                None => println!("{key} => (no override; default rendering)"),
            }
        }
        Commands::OverrideAdd {
            game,
            text,
            notes,
            dims,
        } => {
            let mut new = NewOverride::new(scope_of(game), dims.matcher(), text);
            if let Some(notes) = notes {
                new = new.with_notes(notes);
            }
            let created = engine.upsert_override(new).await?;
            info!(id = created.id, scope = %created.scope, "override created");
            print!("{}", report::render_overrides("created", &[created]));
        }
        Commands::OverrideList { game } => {
            let scope = scope_of(game);
            let overrides = engine.find_overrides(scope).await?;
            print!("{}", report::render_overrides(&format!("scope {scope}"), &overrides));
        }
        Commands::OverrideEdit { id, text, notes } => {
            let updated = engine.update_override(id, &text, notes).await?;
            print!("{}", report::render_overrides("updated", &[updated]));
        }
        Commands::OverrideDelete { id } => {
            engine.delete_override(id).await?;
            println!("override {id} deleted");
        }
        Commands::MetadataSet { set_id } => {
            let meta = engine.build_set_metadata(set_id).await?;
            print!("{}", report::render_set_metadata(&meta));
        }
        Commands::MetadataGame { game_id } => {
            let meta = engine.build_game_metadata(game_id).await?;
            print!("{}", report::render_game_metadata(&meta));
        }
        Commands::Refresh => {
            let refreshed = engine.refresh().await?;
            print!("{}", report::render_refresh(&refreshed));
            // Best effort: the published index stands regardless of this check.
            match engine.find_orphaned_overrides().await {
                Ok(orphans) if orphans.is_empty() => {}
                Ok(orphans) => print!("{}", report::render_overrides("orphaned", &orphans)),
                Err(e) => warn!(error = %e, "orphan check after refresh failed"),
            }
        }
        Commands::RefreshLoop {
            interval_secs,
            max_runs,
        } => {
            let mut loop_cfg = RefreshLoopConfig::from_env();
            if let Some(secs) = interval_secs {
                loop_cfg.interval = Duration::from_secs(secs.max(1));
            }
            loop_cfg.max_runs = max_runs;

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received; stopping refresh loop");
                    let _ = shutdown_tx.send(());
                }
            });
            let stats = refresh_loop::run(engine.clone(), loop_cfg, shutdown_rx).await;
            println!(
                "refresh loop: {} run(s), {} published, {} skipped, {} failed",
                stats.runs, stats.published, stats.skipped, stats.failures
            );
        }
        Commands::Index {
            game,
            set,
            game_level,
        } => {
            let Some(published) = engine.published_index().await? else {
                println!("no filter index published yet");
                return Ok(());
            };
            let mut predicate = Predicate::new();
            if let Some(game) = game {
                predicate = predicate.eq(Field::GameId, game);
            }
            if let Some(set) = set {
                predicate = predicate.eq(Field::SetId, set);
            }
            if game_level {
                predicate = predicate.is_null(Field::SetId);
            }
            let entries = engine.filter_entries(&predicate).await?;
            println!(
                "filter index version {} ({}), {} matching entries",
                published.version,
                published.digest,
                entries.len()
            );
            print!("{}", report::render_entries(&entries));
        }
        Commands::Orphans => {
            let orphans = engine.find_orphaned_overrides().await?;
            print!("{}", report::render_overrides("orphaned", &orphans));
        }
    }
    Ok(())
}
