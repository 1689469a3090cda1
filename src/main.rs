use anyhow::Result;
use dialoguer::{Input, Select};
use std::path::Path;
use std::sync::Arc;

use tube_relay::auth::{
    AuthNegotiator, AuthTier, Handle, InteractionCallback, InteractionChoice, PromptReason,
};
use tube_relay::channel::ChannelClient;
use tube_relay::config::{CliArgs, Config};
use tube_relay::error::{Error, Remediation};
use tube_relay::upload::{Privacy, UploadSession, UploadTask, VideoMetadata};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, args) = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    print_startup_banner(&config);

    let negotiator = AuthNegotiator::new(config.clone())?;

    if args.logout {
        negotiator.logout()?;
        println!("Stored token removed: {}", config.token_file.display());
        return Ok(());
    }

    let preferred: AuthTier = args.tier.parse()?;
    let callback = Arc::new(TerminalPrompt {
        preset_key: config.api_key.clone(),
        launch_browser: |url| open::that(url),
    });

    let (tier, handle) = match negotiator.negotiate(preferred, callback).await {
        Ok(granted) => granted,
        Err(e) => {
            report_failure(&e, &config);
            anyhow::bail!("Authentication failed: {}", e);
        }
    };
    println!("  Access tier: {}", tier);

    let outcome = match args.upload {
        Some(ref path) => upload(handle, &config, &args, path).await,
        None => describe_channel(handle, &config, args.channel_id.as_deref()).await,
    };

    if let Err(e) = outcome {
        report_failure(&e, &config);
        anyhow::bail!(e);
    }

    Ok(())
}

/// Three-way terminal prompt backing the negotiator's interaction callback
struct TerminalPrompt {
    /// Key from config/env offered before asking
    preset_key: Option<String>,

    /// Hands a URL to the system browser
    launch_browser: fn(&str) -> std::io::Result<()>,
}

impl TerminalPrompt {
    fn ask_for_key(&self) -> Option<String> {
        Input::<String>::new()
            .with_prompt("YouTube Data API key (or \"demo\")")
            .interact_text()
            .map_err(|e| tracing::warn!("Failed to read API key: {}", e))
            .ok()
    }
}

impl InteractionCallback for TerminalPrompt {
    fn choose(&self, reason: &PromptReason) -> InteractionChoice {
        println!();
        match reason {
            PromptReason::NoCredential => {
                println!("No saved sign-in was found for this machine.");
            }
            PromptReason::KeyRequired => {
                if let Some(ref key) = self.preset_key {
                    return InteractionChoice::AlternateKey(key.clone());
                }
                println!("Read-only access needs an API key.");
                return match self.ask_for_key() {
                    Some(key) => InteractionChoice::AlternateKey(key),
                    None => InteractionChoice::Decline,
                };
            }
            PromptReason::ConsentFailed(why) => {
                println!("⚠️  Sign-in did not complete: {}", why);
            }
        }

        let options = [
            "Sign in with Google (upload access)",
            "Use an API key (read-only)",
            "Continue in demo mode",
        ];
        let selection = Select::new()
            .with_prompt("How do you want to continue?")
            .items(&options)
            .default(0)
            .interact();

        match selection {
            Ok(0) => InteractionChoice::Accept,
            Ok(1) => match self.preset_key.clone().or_else(|| self.ask_for_key()) {
                Some(key) => InteractionChoice::AlternateKey(key),
                None => InteractionChoice::Decline,
            },
            Ok(_) => InteractionChoice::Decline,
            Err(e) => {
                tracing::warn!("Prompt unavailable ({}), falling back to demo mode", e);
                InteractionChoice::Decline
            }
        }
    }

    fn open_consent_page(&self, url: &str) -> anyhow::Result<()> {
        println!();
        match (self.launch_browser)(url) {
            Ok(()) => println!("Opened the consent page in your browser. If it did not appear, visit:"),
            Err(e) => {
                // Headless sessions still work by copying the URL by hand
                tracing::warn!("Failed to open browser: {}", e);
                println!("Open this page in your browser to grant access:");
            }
        }
        println!();
        println!("  {}", url);
        println!();
        println!("Waiting for the browser to redirect back...");
        Ok(())
    }
}

async fn upload(
    handle: Handle,
    config: &Config,
    args: &CliArgs,
    path: &Path,
) -> tube_relay::error::Result<()> {
    let title = match args.title {
        Some(ref title) => title.clone(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let privacy: Privacy = args.privacy.parse()?;
    let mut metadata = VideoMetadata::new(title)?
        .with_description(args.description.clone())
        .with_tags(args.tags.iter().cloned())
        .with_privacy(privacy);
    if args.shorts {
        metadata = metadata.optimize_for_shorts();
    }

    let mut task = UploadTask::new(path, metadata);
    let session = UploadSession::from_config(handle.clone(), config)?.on_progress(|p| {
        println!(
            "  ⬆️  {:>5.1}% ({} / {} bytes)",
            p.percent(),
            p.bytes_sent,
            p.total_bytes
        );
    });

    // Ctrl+C cancels between chunks
    let controller = session.controller();
    let cancel_on_signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(e) = controller.cancel() {
                tracing::debug!("Nothing to cancel: {}", e);
            }
        }
    });

    let result = session.start(&mut task).await;
    cancel_on_signal.abort();
    let video_id = result?;

    println!();
    println!("✅ Uploaded \"{}\"", task.metadata().title);
    if let Some(url) = task.watch_url() {
        println!("  Watch: {}", url);
    }

    let channel = ChannelClient::from_config(handle, config)?;
    match channel.video_status(&video_id).await {
        Ok(Some(status)) => println!(
            "  Status: upload={} processing={}",
            status.upload_status.as_deref().unwrap_or("unknown"),
            status.processing_status.as_deref().unwrap_or("unknown")
        ),
        Ok(None) => println!("  Status: not visible yet"),
        Err(e) => tracing::warn!("Could not fetch video status: {}", e),
    }

    Ok(())
}

async fn describe_channel(
    handle: Handle,
    config: &Config,
    channel_id: Option<&str>,
) -> tube_relay::error::Result<()> {
    let channel = ChannelClient::from_config(handle, config)?;

    if channel.tier() == AuthTier::ReadOnly && channel_id.is_none() {
        println!("  Pass --channel-id to look up a channel with an API key.");
        return Ok(());
    }

    let Some(info) = channel.channel_info(channel_id).await? else {
        println!("  No channel found.");
        return Ok(());
    };

    println!();
    println!("📺 {} ({})", info.title, info.id);
    if let Some(subscribers) = info.subscriber_count {
        println!("  Subscribers: {}", subscribers);
    }
    if let Some(videos) = info.video_count {
        println!("  Videos:      {}", videos);
    }

    let recent = channel.recent_uploads(channel_id, 5).await?;
    if !recent.is_empty() {
        println!();
        println!("  Recent uploads:");
        for video in recent {
            let published = video
                .published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("    {}  {}  {}", published, video.id, video.title);
        }
    }

    Ok(())
}

/// Troubleshooting hint for the remediation the error calls for
fn report_failure(error: &Error, config: &Config) {
    tracing::error!("❌ {}", error);
    match error.remediation() {
        Remediation::ReLogin => {
            tracing::error!("🔧 Sign in again: run with --logout, then retry");
        }
        Remediation::CheckNetwork => {
            tracing::error!("🔧 Check your network connection and retry");
        }
        Remediation::FixInput => {
            tracing::error!("🔧 Check the video file and metadata");
        }
        Remediation::FixConfiguration => {
            tracing::error!(
                "🔧 Check the client secrets file at {}",
                config.identity_file.display()
            );
        }
        Remediation::None => {}
    }
}

fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                     📼 Tube Relay                         ║
║                                                           ║
║        Resumable YouTube uploads from the terminal        ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("  Secrets:     {}", config.identity_file.display());
    println!("  Token:       {}", config.token_file.display());
    println!("  Chunk size:  {} KiB", config.upload_chunk_size / 1024);
    println!();
}
