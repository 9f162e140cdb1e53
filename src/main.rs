mod logging;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use sfc_loader::{CachePolicy, Loader, LoaderConfig};

#[derive(Parser)]
#[command(
    name = "sfc-loader",
    version,
    about = "Load a single-file component and print its definition"
)]
struct Cli {
    /// Component reference (`ui/card`, `ui/card.sfc`, `https://...`)
    reference: String,

    /// Directory non-HTTP references are read from
    #[arg(long)]
    root: Option<PathBuf>,

    /// JSON loader configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep fetched documents for the rest of the run
    #[arg(long)]
    cache: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    if cli.cache {
        config = config.with_cache(CachePolicy::PerUrl);
    }

    let loader = Loader::new(config);
    let definition = loader
        .component(&cli.reference, None)
        .load()
        .await
        .with_context(|| format!("failed to load component '{}'", cli.reference))?;

    let styles: Vec<_> = loader
        .head()
        .styles()
        .iter()
        .map(|style| {
            json!({
                "owner": style.owner(),
                "attributes": style
                    .attributes()
                    .iter()
                    .map(|(name, value)| (name.to_string(), json!(value)))
                    .collect::<serde_json::Map<_, _>>(),
                "css": style.css_text(),
            })
        })
        .collect();

    let output = json!({
        "definition": definition,
        "styles": styles,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
