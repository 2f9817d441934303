use anyhow::Result;
use backend_api::RestBackend;
use chat_core::MarketplaceBackend;
use clap::{Parser, Subcommand};
use shared::domain::ChannelId;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Operator tool for the marketplace chat backend")]
struct Cli {
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    access_token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List chat channels, one page per call.
    Channels {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Set the notification preference for a channel (true/false).
    Alarm { channel_id: String, enabled: bool },
    /// Leave a channel.
    Leave { channel_id: String },
    /// List blocked users with their block timestamps.
    Blocked,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }
    if let Some(token) = cli.access_token {
        settings.access_token = Some(token);
    }

    let mut backend = RestBackend::new(&settings.base_url)?;
    if let Some(token) = settings.access_token {
        backend = backend.with_access_token(token);
    }

    match cli.command {
        Command::Channels { cursor } => {
            let cursor = cursor.map(ChannelId::new);
            let page = backend.list_channels(cursor.as_ref()).await?;
            for channel in &page.channels {
                let peer = channel
                    .origin_members
                    .iter()
                    .map(|m| m.nickname.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{}  unread={}  members=[{}]",
                    channel.channel_id, channel.unread_count, peer
                );
            }
            if page.has_next {
                if let Some(last) = page.channels.last() {
                    println!("-- more: --cursor {}", last.channel_id);
                }
            }
        }
        Command::Alarm {
            channel_id,
            enabled,
        } => {
            let channel_id = ChannelId::new(channel_id);
            backend.set_channel_notifications(&channel_id, enabled).await?;
            println!(
                "notifications for {channel_id} {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Command::Leave { channel_id } => {
            let channel_id = ChannelId::new(channel_id);
            backend.leave_channel(&channel_id).await?;
            println!("left {channel_id}");
        }
        Command::Blocked => {
            for row in backend.blocked_users().await? {
                println!("{}  blocked_at={}", row.user_id, row.blocked_at);
            }
        }
    }

    Ok(())
}
