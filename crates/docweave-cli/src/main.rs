use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docweave_config::Config;
use docweave_engine::api::memory::InMemoryApi;
use docweave_engine::{ConversionRequest, Converter, ImageRehoster, RehostPolicy};
use docweave_notion::{HttpImageFetcher, NotionClient};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "docweave", version, about = "Convert HTML documents into Notion pages")]
struct Cli {
    /// Log debug output, including tree outlines
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.config/docweave/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert an HTML file (or a JSON conversion request) into a page
    Convert(ConvertArgs),
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// HTML fragment, or a `.json` conversion request
    file: PathBuf,

    /// Page title; defaults to the file name
    #[arg(short, long)]
    title: Option<String>,

    /// Target database; defaults to `default_database_id` from the config
    #[arg(long)]
    database_id: Option<String>,

    /// Source URL recorded on the page
    #[arg(long)]
    url: Option<String>,

    /// Print the blocks that would be written without calling the API
    #[arg(long)]
    dry_run: bool,

    /// Upload images to Notion instead of linking to their source
    #[arg(long)]
    rehost_images: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    config.pipeline.debug |= cli.verbose;

    match cli.command {
        Command::Convert(args) => convert(&config, args).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let loaded = match path {
        Some(path) => {
            log::info!("Config path: {}", path.display());
            Config::load_from_path(path)?
                .with_context(|| format!("config file {} does not exist", path.display()))?
                .into()
        }
        None => {
            log::debug!("Config path: {}", Config::config_path().display());
            Config::load()?
        }
    };
    Ok(loaded.unwrap_or_else(|| {
        log::debug!("no config file found, using defaults");
        Config::default()
    }))
}

/// Builds the request from `file` and the command-line overrides.
fn build_request(config: &Config, args: &ConvertArgs) -> Result<ConversionRequest> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let mut request = if args.file.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a conversion request", args.file.display()))?
    } else {
        ConversionRequest {
            content_html: content,
            ..ConversionRequest::default()
        }
    };

    if let Some(title) = &args.title {
        request.title = title.clone();
    } else if request.title.is_empty() {
        request.title = args
            .file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if let Some(url) = &args.url {
        request.url = Some(url.clone());
    }
    request.database_id = args
        .database_id
        .clone()
        .or(request.database_id)
        .or_else(|| config.default_database_id.clone());
    request.dry_run |= args.dry_run;
    Ok(request)
}

async fn convert(config: &Config, args: ConvertArgs) -> Result<()> {
    let request = build_request(config, &args)?;

    let outcome = if request.dry_run {
        let api = InMemoryApi::new();
        Converter::new(&api, &config.pipeline)
            .with_properties(config.property_names())
            .convert(&request)
            .await?
    } else {
        let Some(token) = config.token() else {
            bail!("no API token configured; set NOTION_TOKEN or api_token in the config file");
        };
        let client = NotionClient::new(token, &config.notion_version)?;
        let fetcher = HttpImageFetcher::new()?;

        let mut converter =
            Converter::new(&client, &config.pipeline).with_properties(config.property_names());
        if args.rehost_images || config.rehost_images {
            converter = converter.with_rehoster(ImageRehoster::new(
                &fetcher,
                &client,
                RehostPolicy::FallbackToExternal,
            ));
        }
        converter.convert(&request).await?
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(file: PathBuf) -> ConvertArgs {
        ConvertArgs {
            file,
            title: None,
            database_id: None,
            url: None,
            dry_run: false,
            rehost_images: false,
        }
    }

    #[test]
    fn html_file_title_defaults_to_file_stem() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("getting-started.html");
        std::fs::write(&file, "<p>Hi</p>").unwrap();
        let config = Config {
            default_database_id: Some("db-default".into()),
            ..Config::default()
        };

        let request = build_request(&config, &args(file)).unwrap();
        assert_eq!(request.title, "getting-started");
        assert_eq!(request.content_html, "<p>Hi</p>");
        assert_eq!(request.database_id.as_deref(), Some("db-default"));
    }

    #[test]
    fn json_request_is_overridden_by_flags() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("request.json");
        std::fs::write(
            &file,
            r#"{"title": "From JSON", "contentHtml": "<p>x</p>", "databaseId": "db-json"}"#,
        )
        .unwrap();
        let mut args = args(file);
        args.title = Some("From flag".into());
        args.dry_run = true;

        let request = build_request(&Config::default(), &args).unwrap();
        assert_eq!(request.title, "From flag");
        assert_eq!(request.database_id.as_deref(), Some("db-json"));
        assert!(request.dry_run);
    }

    #[test]
    fn cli_parses_convert_flags() {
        let cli = Cli::try_parse_from([
            "docweave",
            "convert",
            "page.html",
            "--title",
            "T",
            "--dry-run",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Convert(args) = cli.command;
        assert!(args.dry_run);
        assert_eq!(args.title.as_deref(), Some("T"));
    }
}
