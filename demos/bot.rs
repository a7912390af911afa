//! Minimal bot: connects, logs guilds as they become available and logs `!ping` messages.
//!
//! Run with tracing enabled:
//! ```sh
//! TOKEN=... RUST_LOG=info,democord=debug cargo run --example bot
//! ```

use democord::gateway::{self, EventKind, Phase};
use democord::models::Intents;
use democord::{BoxError, Client, Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::builder()
        .gateway(
            gateway::Config::builder()
                .intents(Intents::GUILDS | Intents::MESSAGES | Intents::MESSAGE_CONTENT)
                .build(),
        )
        .build();
    let client = Client::from_env(config)?;

    client.on(EventKind::Ready, |ctx| async move {
        if let Some(user) = &ctx.user {
            info!(user = %user.display_name(), id = %user.id, "logged in");
        }
        Ok::<(), BoxError>(())
    });

    client.on(EventKind::GuildCreate, |ctx| async move {
        if let Some(guild) = &ctx.guild {
            info!(
                guild = %guild.name,
                members = ?guild.member_count,
                total = ctx.cache.guild_count(),
                "guild available"
            );
        }
        Ok::<(), BoxError>(())
    });

    client.on(EventKind::MessageCreate, |ctx| async move {
        if ctx.data["content"] == "!ping" {
            info!(channel = %ctx.data["channel_id"], "ping");
        }
        Ok::<(), BoxError>(())
    });

    client.connect().await?;

    if let Some(mut state) = client.state_receiver().await {
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let phase = *state.borrow();
                if phase == Phase::Reconnecting {
                    warn!("gateway connection lost, reconnecting");
                } else {
                    info!(%phase, "gateway phase");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    client.shutdown().await;

    Ok(())
}
