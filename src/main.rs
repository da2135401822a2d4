mod browser;
mod config;
mod flow;
mod inspector;
mod intent;
mod planner;
mod resolver;
mod types;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use tokio::task::spawn_blocking;

use browser::BrowserSession;
use config::Config;
use flow::{FlowRunner, INTER_VIDEO_DELAY, run_batch};
use planner::Planner;
use resolver::Resolver;
use types::ShareRequest;

/// Shares private YouTube videos with specific email addresses by driving
/// YouTube Studio in a signed-in Chrome profile.
#[derive(Debug, Parser)]
#[command(name = "yt-private-share", version, about)]
struct Cli {
    /// Free-form command, e.g. "Chia sẻ video abc123 cho email test@gmail.com"
    command: Option<String>,

    /// Video IDs to share, comma separated
    #[arg(long, value_delimiter = ',')]
    video_ids: Vec<String>,

    /// Recipient email addresses, comma separated
    #[arg(long, value_delimiter = ',')]
    emails: Vec<String>,

    /// Run Chrome headless regardless of the HEADLESS env var
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if cli.headless {
        config.headless = true;
    }

    let planner = Planner::from_config(&config)?;
    let request = build_request(&cli, planner.as_ref()).await?;
    info!(
        "sharing {} video(s) with {}",
        request.video_ids.len(),
        request.emails.join(", ")
    );

    let session = {
        let config = config.clone();
        spawn_blocking(move || BrowserSession::launch(&config))
            .await
            .context("browser launch task panicked")??
    };

    let runner = FlowRunner::new(&session, Resolver::default(), planner);
    let summary = run_batch(&runner, &request, INTER_VIDEO_DELAY).await;

    info!(
        "batch finished: {} shared, {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    for (video_id, reason) in &summary.failed {
        warn!("  {video_id}: {reason}");
    }

    if summary.completed.is_empty() && !summary.failed.is_empty() {
        bail!("no video was shared");
    }
    Ok(())
}

/// Build the share request from flags when given, otherwise from the
/// free-form command, preferring the planner and falling back to the
/// offline parser.
async fn build_request(cli: &Cli, planner: Option<&Planner>) -> Result<ShareRequest> {
    if !cli.video_ids.is_empty() || !cli.emails.is_empty() {
        if cli.video_ids.is_empty() {
            bail!("--emails given without --video-ids");
        }
        if cli.emails.is_empty() {
            bail!("--video-ids given without --emails");
        }
        return Ok(ShareRequest {
            video_ids: cli.video_ids.clone(),
            emails: cli.emails.clone(),
        });
    }

    let Some(command) = cli.command.as_deref() else {
        bail!("nothing to do: pass a command or --video-ids/--emails");
    };

    match planner {
        Some(p) => intent::extract_share_info(p, command).await,
        None => intent::parse_command_offline(command),
    }
}
