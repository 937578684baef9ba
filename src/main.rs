use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use feedforge::agents::progress::{self, Phase, ProgressEvent, ProgressSink};
use feedforge::agents::{OpenRouterClient, SynthesisController};
use feedforge::config::{AppConfig, ConfigManager, FileConfigManager, LoggingConfig, DEFAULT_CONFIG_FILE};
use feedforge::fetch::{HttpFetcher, PageFetcher};
use feedforge::parser::schema::SnapshotRecord;
use feedforge::parser::{detect_existing_feeds, extract, normalize_url, ExtractionConfig, SynthesisResult};
use feedforge::selector::SelectorTester;
use feedforge::snapshot::{ChangeDetector, SnapshotConfig};

#[derive(Parser, Debug)]
#[command(name = "feedforge")]
#[command(version, about = "Synthesize CSS extraction recipes for web pages and replay them as feeds", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize an extraction recipe for a page
    Generate {
        url: String,

        /// Write the accepted recipe to this file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// Replay a stored recipe against the live page
    Extract {
        url: String,

        /// Recipe JSON produced by `generate`
        #[arg(short, long)]
        recipe: PathBuf,

        /// Re-synthesize the recipe when it yields no items
        #[arg(long)]
        regenerate: bool,
    },
    /// Check a page for content changes since the last run
    Watch {
        url: String,

        /// CSS selector of the monitored content
        #[arg(short, long)]
        selector: String,

        /// Snapshot state file
        #[arg(long, default_value = "snapshot.json")]
        state: PathBuf,

        /// Feed title for the monitored page
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = FileConfigManager::new(cli.config.clone());
    init_logging(&config_manager.logging_settings().await);
    tracing::info!("Starting feedforge");

    let config = config_manager
        .load_config()
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Generate { url, save } => generate(&config, &url, save.as_deref()).await,
        Command::Extract {
            url,
            recipe,
            regenerate,
        } => run_extract(&config, &url, &recipe, regenerate).await,
        Command::Watch {
            url,
            selector,
            state,
            title,
        } => watch(&config, &url, &selector, &state, title.as_deref()).await,
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_controller(config: &AppConfig, sink: Arc<dyn ProgressSink>) -> anyhow::Result<SynthesisController> {
    let model = OpenRouterClient::from_env(&config.model)?
        .with_declared_tools(vec![SelectorTester::default().definition()]);
    Ok(SynthesisController::new(Arc::new(model), config.synthesis.clone()).with_sink(sink))
}

async fn generate(config: &AppConfig, url: &str, save: Option<&Path>) -> anyhow::Result<()> {
    let url = normalize_url(url)?;

    // progress goes to stderr as SSE frames
    let (sink, mut events) = progress::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            eprint!("{}", event.to_sse());
        }
    });
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);

    let controller = build_controller(config, sink.clone())?;
    let fetcher = HttpFetcher::new(&config.fetch)?;

    sink.emit(ProgressEvent::Status(Phase::Fetch));
    let markup = fetcher.fetch(&url).await?;

    let existing_feeds = detect_existing_feeds(&markup, &url);
    if !existing_feeds.is_empty() {
        tracing::info!(count = existing_feeds.len(), "Page already advertises feeds");
    }

    let result = controller.synthesize(&markup, &url).await;
    drop(controller);
    drop(sink);
    let _ = printer.await;
    let result = result?;

    if let (Some(path), SynthesisResult::Suitable { config: recipe, .. }) = (save, &result) {
        tokio::fs::write(path, serde_json::to_string_pretty(recipe)?)
            .await
            .with_context(|| format!("Failed to write recipe to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Saved recipe");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "url": url,
            "existingFeeds": existing_feeds,
            "result": result,
        }))?
    );
    Ok(())
}

async fn run_extract(config: &AppConfig, url: &str, recipe_path: &Path, regenerate: bool) -> anyhow::Result<()> {
    let url = normalize_url(url)?;
    let recipe_text = tokio::fs::read_to_string(recipe_path)
        .await
        .with_context(|| format!("Failed to read recipe {}", recipe_path.display()))?;
    let recipe: ExtractionConfig = serde_json::from_str(&recipe_text).context("Recipe is not a valid extraction config")?;

    let fetcher = HttpFetcher::new(&config.fetch)?;
    let markup = fetcher.fetch(&url).await?;

    let mut feed = extract(&markup, &recipe, &url)?;
    if feed.items.is_empty() && regenerate {
        tracing::warn!(url = %url, "Recipe produced no items, regenerating");
        let controller = build_controller(config, Arc::new(progress::NoopSink))?;
        match controller.regenerate(&markup, &url).await {
            Some((new_recipe, new_feed)) => {
                tokio::fs::write(recipe_path, serde_json::to_string_pretty(&new_recipe)?)
                    .await
                    .with_context(|| format!("Failed to update recipe {}", recipe_path.display()))?;
                feed = new_feed;
            }
            None => bail!("Recipe produced no items and regeneration failed"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&feed)?);
    Ok(())
}

async fn watch(
    config: &AppConfig,
    url: &str,
    selector: &str,
    state_path: &Path,
    title: Option<&str>,
) -> anyhow::Result<()> {
    let url = normalize_url(url)?;
    let snapshot_config = SnapshotConfig::for_page(&url, selector, title);

    let previous: Option<SnapshotRecord> = match tokio::fs::read_to_string(state_path).await {
        Ok(text) => Some(serde_json::from_str(&text).context("Snapshot state file is corrupt")?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", state_path.display())),
    };

    let fetcher = HttpFetcher::new(&config.fetch)?;
    let markup = fetcher.fetch(&url).await?;

    let result = ChangeDetector::default().detect(
        &markup,
        &snapshot_config,
        previous.as_ref().map(|r| r.normalized_text.as_str()),
        previous.as_ref().map(|r| r.content_hash.as_str()),
    )?;

    let item = match &previous {
        None => Some(feedforge::snapshot::initial_item(&result.to_record(), &url)),
        Some(_) => feedforge::snapshot::update_item(&result, &url, chrono::Utc::now()),
    };

    if previous.is_none() || result.changed {
        tokio::fs::write(state_path, serde_json::to_string_pretty(&result.to_record())?)
            .await
            .with_context(|| format!("Failed to write {}", state_path.display()))?;
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "feedTitle": snapshot_config.feed_title,
            "result": result,
            "item": item,
        }))?
    );
    Ok(())
}
