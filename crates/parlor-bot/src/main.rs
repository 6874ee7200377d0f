//! Minimal example bot: replies to `!ping`, greets new members in the log.
//!
//! Configuration comes from the environment (`PARLOR_HOST`, `PARLOR_TOKEN`,
//! and the optional overrides documented on `ClientConfig::from_env`).

use std::sync::Arc;

use parlor::{Client, ClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parlor::logging::init("parlor_bot")?;

    let cfg = ClientConfig::from_env()?;
    let client = Arc::new(Client::connect(cfg).await?);

    if let Some(server) = client.server() {
        tracing::info!(server = %server.name, members = server.member_count, "bot connected");
    }

    client.on_ready(|| async {
        tracing::info!("event stream ready");
    });

    let replies = client.clone();
    client.on_message(move |msg| {
        let replies = replies.clone();
        async move {
            if msg.content.trim() == "!ping" {
                if let Err(err) = replies.send_message(msg.channel_id, "pong").await {
                    tracing::warn!(error = %err, "failed to reply");
                }
            }
        }
    });

    client.on_member_join(|member| async move {
        tracing::info!(user = %member.user.display_name(), "member joined");
    });

    client.on_channel_create(|channel| async move {
        tracing::info!(channel = %channel.name, "channel created");
    });

    client.run().await?;
    Ok(())
}
