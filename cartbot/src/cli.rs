///
/// This module implements the full CLI interface for cartbot: command
/// parsing, argument validation and the user-visible entrypoints.
///
/// All core business logic (reconciliation, ranking, coordination) lives in
/// the `cartbot-core` crate. This module is strictly CLI glue: it builds a
/// [`cartbot_core::service::ShoppingService`] from the loaded config, wires
/// in whichever provider clients are configured, routes subcommands and
/// prints results.
///
/// ## How To Use
/// - For command-line users: use the installed `cartbot` binary with
///   `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed
///   [`Cli`].
///
/// ## Extending
/// When adding subcommands, update [`Commands`] below and keep all
/// non-trivial business logic inside `cartbot-core`.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cartbot_core::model::{LineOutcome, RawMention, ShoppingItem};
use cartbot_core::service::ShoppingService;
use clap::{Parser, Subcommand};

use crate::load_config::load_config;
use crate::providers::{HttpOcrClient, OpenAiSuggestClient};
use crate::storage::JsonFileStore;

/// CLI for cartbot: a reconciling shopping list fed by manual entries,
/// receipt scans and suggestion picks.
#[derive(Parser)]
#[clap(
    name = "cartbot",
    version,
    about = "Maintain a reconciling shopping list with receipt scanning and re-purchase suggestions"
)]
pub struct Cli {
    /// Path to the YAML config file; defaults apply when omitted
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Acting user id
    #[clap(long, default_value_t = 1)]
    pub user: i64,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add an item mention to the list, e.g. `add 2 milk`
    Add {
        /// Raw item text; quantity and price tokens are recognized
        text: Vec<String>,
        /// Explicit quantity, overrides whatever the text carries
        #[clap(long)]
        qty: Option<f64>,
    },
    /// Show the current list in insertion order
    List,
    /// Mark an item as bought
    Done {
        /// Item name; sloppy spellings are resolved against the list
        name: Vec<String>,
    },
    /// Remove all items from the list (price history is kept)
    Clear,
    /// Show ranked re-purchase suggestions
    Suggest {
        /// Maximum number of suggestions
        #[clap(long)]
        k: Option<usize>,
    },
    /// Reconcile a receipt: an image when an OCR provider is configured,
    /// otherwise a text file with one pre-extracted line per row
    Scan {
        /// Path to the receipt file
        file: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main().
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config = load_config(cli.config.as_deref())?;
    let user_id = cli.user;

    let mut service = ShoppingService::new(config.core.clone())?
        .with_persistence(Arc::new(JsonFileStore::new(config.data_dir.clone())));

    match config.providers.ai.as_str() {
        "openai" => match OpenAiSuggestClient::new_from_env() {
            Ok(client) => service = service.with_ai(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "AI provider configured but unavailable, continuing without enrichment")
            }
        },
        "none" => {}
        other => {
            tracing::warn!(kind = other, "Unknown AI provider kind, continuing without enrichment")
        }
    }

    let mut ocr_configured = false;
    match config.providers.ocr.as_str() {
        "http" => match HttpOcrClient::new_from_env() {
            Ok(client) => {
                service = service.with_ocr(Arc::new(client));
                ocr_configured = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "OCR provider configured but unavailable, scans will read text files")
            }
        },
        "none" => {}
        other => {
            tracing::warn!(kind = other, "Unknown OCR provider kind, scans will read text files")
        }
    }

    match cli.command {
        Commands::Add { text, qty } => {
            let raw_text = text.join(" ");
            tracing::info!(command = "add", user_id, raw = %raw_text, "Adding item");
            let item = service.add_item(user_id, &raw_text, qty).await?;
            println!("Added: {}", format_item(&item));
        }
        Commands::List => {
            tracing::info!(command = "list", user_id, "Listing items");
            let items = service.list_items(user_id).await;
            if items.is_empty() {
                println!("The list is empty.");
            }
            for item in &items {
                println!("{}", format_item(item));
            }
        }
        Commands::Done { name } => {
            let name = name.join(" ");
            tracing::info!(command = "done", user_id, name = %name, "Marking item bought");
            let item = service.mark_bought(user_id, &name).await?;
            println!("Bought: {}", format_item(&item));
        }
        Commands::Clear => {
            tracing::info!(command = "clear", user_id, "Clearing list");
            service.clear(user_id).await?;
            println!("List cleared.");
        }
        Commands::Suggest { k } => {
            tracing::info!(command = "suggest", user_id, "Ranking suggestions");
            let suggestions = service.suggestions(user_id, k).await;
            if suggestions.is_empty() {
                println!("No suggestions yet. Buy a few things first.");
            }
            for (rank, name) in suggestions.iter().enumerate() {
                println!("{}. {}", rank + 1, name);
            }
        }
        Commands::Scan { file } => {
            tracing::info!(command = "scan", user_id, file = %file.display(), "Scanning receipt");
            let result = if ocr_configured {
                let bytes = std::fs::read(&file)?;
                service.scan_receipt(user_id, bytes).await?
            } else {
                let content = std::fs::read_to_string(&file)?;
                let lines: Vec<RawMention> = content
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(RawMention::ocr)
                    .collect();
                service.reconcile_batch(user_id, lines).await?
            };
            if result.replayed {
                println!("Receipt was already applied; nothing changed.");
            }
            for outcome in &result.outcomes {
                match outcome {
                    LineOutcome::MatchedExisting {
                        canonical_name,
                        quantity,
                    } => println!("merged  {canonical_name} (now x{quantity})"),
                    LineOutcome::CreatedNew {
                        canonical_name,
                        quantity,
                    } => println!("added   {canonical_name} (x{quantity})"),
                    LineOutcome::Failed { reason } => println!("skipped line: {reason}"),
                }
            }
        }
    }

    Ok(())
}

fn format_item(item: &ShoppingItem) -> String {
    let mark = if item.bought { "[x]" } else { "[ ]" };
    let unit = item
        .unit
        .as_deref()
        .map(|u| format!(" {u}"))
        .unwrap_or_default();
    let price = match (item.last_price, item.currency) {
        (Some(price), Some(currency)) => format!(" (last {price:.2} {})", currency.code()),
        (Some(price), None) => format!(" (last {price:.2})"),
        _ => String::new(),
    };
    format!(
        "{mark} {} x{}{unit}{price}",
        item.canonical_name, item.quantity
    )
}
