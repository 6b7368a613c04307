//! Hit Duel Server
//!
//! Hosts real-time two-player duels over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hit_duel::{
    VERSION,
    network::{AuthConfig, DuelServer, JwtCredentialCheck, ServerConfig, SessionCoordinator},
    services::{InMemoryRecordStore, MatchRecordStore, StaticAchievementCatalog, records::DEFAULT_RANKED_LIMIT},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("loading server configuration")?;

    info!("Hit Duel Server v{}", VERSION);
    info!("Match duration: {:?}", config.duel.match_duration);
    info!("Min hit interval: {:?}", config.duel.min_hit_interval);
    info!(
        "Room codes: {} chars, max {} rooms",
        config.registry.code_length, config.registry.max_rooms
    );

    let records = Arc::new(InMemoryRecordStore::new());
    let achievements = Arc::new(StaticAchievementCatalog::new(records.clone()));
    let coordinator = SessionCoordinator::new(config.registry.clone(), config.duel.clone())
        .with_services(records.clone(), achievements);

    let mut server = DuelServer::with_coordinator(config, Arc::new(coordinator));
    let auth = AuthConfig::from_env().context("loading auth configuration")?;
    match JwtCredentialCheck::from_config(&auth).context("building credential check")? {
        Some(check) => {
            info!("Credential check enabled");
            server = server.with_credentials(Arc::new(check));
        }
        None => info!("No auth key configured, all players are anonymous"),
    }
    let server = Arc::new(server);

    let mut runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let outcome = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
            runner.await
        }
        result = &mut runner => result,
    };
    outcome.context("server task panicked")??;

    match records.ranked(DEFAULT_RANKED_LIMIT).await {
        Ok(ranked) if !ranked.is_empty() => {
            info!("=== Leaderboard ===");
            for (place, entry) in ranked.iter().enumerate() {
                info!(
                    "#{}: {} - total {}, best {}, {} game(s)",
                    place + 1, entry.display_name, entry.total_score, entry.best_score, entry.games_played
                );
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read leaderboard: {}", e),
    }

    Ok(())
}
