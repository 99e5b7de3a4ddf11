use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use threadcast_core::{Guardian, MessageBus, Publisher};
use threadcast_db::{channels, memberships, messages, threads, users, DbPool};
use threadcast_models::user::MessageAuthor;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("threadcast=info")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    let pool =
        threadcast_db::create_pool(&config.database.url, config.database.max_connections).await?;
    threadcast_db::run_migrations(&pool).await?;

    let bus = MessageBus::default();
    let publisher = Publisher::new(pool.clone(), bus.clone());

    // Tap every envelope onto the log so operators can watch the flow.
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let kind = envelope
                        .payload
                        .get("type")
                        .and_then(|value| value.as_str())
                        .unwrap_or("-")
                        .to_string();
                    tracing::info!(
                        topic = %envelope.topic,
                        sequence = envelope.sequence,
                        kind = %kind,
                        "bus publish"
                    );
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "bus tap lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::info!(server = %config.server.server_name, "threadcast ready");

    if args.demo {
        run_demo(&publisher, &pool).await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

/// Seeds a small channel and runs one publish cycle so the bus tap has
/// something to show. Intended for fresh (in-memory) databases.
async fn run_demo(publisher: &Publisher, pool: &DbPool) -> Result<()> {
    let now = Utc::now();
    users::create_user(pool, 1, "alice", now).await?;
    users::create_user(pool, 2, "bob", now).await?;
    channels::create_channel(pool, 1, Some("general"), 0, true, &[], &[], now).await?;
    memberships::join_channel(pool, 1, 1, now).await?;
    memberships::join_channel(pool, 2, 1, now).await?;
    let channel = channels::get_channel(pool, 1)
        .await?
        .ok_or_else(|| anyhow::anyhow!("demo channel missing"))?
        .into_channel()?;

    let alice = MessageAuthor {
        id: 1,
        username: "alice".to_string(),
    };
    let first = messages::create_message(pool, 1, 1, 1, "welcome to threadcast", None, now)
        .await?
        .into_message();
    publisher
        .publish_new(&channel, &first, &alice, None, None)
        .await?;

    threads::create_thread(pool, 1, 1, first.id, Some("introductions"), now).await?;
    memberships::join_thread(pool, 2, 1, now).await?;
    let reply = messages::create_message(pool, 2, 1, 1, "threads work too", Some(1), now)
        .await?
        .into_message();
    publisher
        .publish_new(&channel, &reply, &alice, None, None)
        .await?;

    memberships::set_channel_last_read(pool, 2, 1, first.id).await?;
    publisher
        .publish_user_tracking_state(&Guardian::new(2, vec![]), &channel, &reply)
        .await?;

    tracing::info!("demo publish cycle complete");
    Ok(())
}
