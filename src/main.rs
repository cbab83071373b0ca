use clap::{Parser, Subcommand};
use image_splitter::config;
use image_splitter::imaging::{Strategy, Toolkit, create_backend};
use image_splitter::logging::{self, LogFormat};
use image_splitter::output;
use image_splitter::process::{self, RunConfig, SplitRequest};
use image_splitter::server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "image-splitter")]
#[command(about = "Split tall images into bounded-height chunks")]
#[command(long_about = "\
Split tall images into bounded-height chunks

Downloads an image, cuts it top to bottom into chunks no taller than
max_height (optionally narrowed to a maximum width, keeping the left edge),
and optionally bundles the chunks into a zip archive.

Each run writes into its own directory under the storage root:

  <storage root>/
  └── 1700000000/                  # run start, unix seconds
      ├── original_image.png       # the download
      ├── chapter_01.jpg           # chunks, top to bottom
      ├── chapter_02.jpg
      └── chapter.zip              # with --zip / create_zip

Configuration layers (later wins): built-in defaults, config.toml, flags.
Run 'image-splitter gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory receiving one subdirectory per run
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    /// Trusted base URL that request URLs are appended to
    #[arg(long, global = true)]
    url_host: Option<String>,

    /// Maximum chunk height in pixels
    #[arg(long, global = true)]
    max_height: Option<u32>,

    /// Use external tools (curl, vips or ImageMagick, zip) instead of in-process codecs
    #[arg(long, global = true)]
    use_cli: bool,

    /// Toolkit for --use-cli
    #[arg(long, global = true, value_enum)]
    toolkit: Option<Toolkit>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Basic auth username
    #[arg(long)]
    username: Option<String>,

    /// Basic auth password
    #[arg(long)]
    password: Option<String>,
}

#[derive(clap::Args)]
struct SplitArgs {
    /// Image path, appended to the url host
    url: String,

    /// Chunk file-name prefix (letters, digits, underscore)
    #[arg(long)]
    prefix: String,

    /// Maximum output width, 0 = keep
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Keep only the first N chunks, 0 = all
    #[arg(long, default_value_t = 0)]
    max_images: u32,

    /// Also write a zip archive of the chunks
    #[arg(long)]
    zip: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Split one image and print where the chunks went
    Split(SplitArgs),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

/// Table of the flags that were actually given, shaped like `config.toml`.
fn cli_overlay(cli: &Cli) -> Result<toml::Value, toml::ser::Error> {
    let mut server = toml::Table::new();
    let mut storage = toml::Table::new();
    let mut processing = toml::Table::new();

    if let Some(root) = &cli.storage_root {
        storage.insert("root".into(), toml::Value::try_from(root)?);
    }
    if let Some(host) = &cli.url_host {
        storage.insert("url_host".into(), toml::Value::String(host.clone()));
    }
    if let Some(h) = cli.max_height {
        processing.insert("max_height".into(), toml::Value::Integer(h.into()));
    }
    if cli.use_cli {
        processing.insert("strategy".into(), toml::Value::try_from(Strategy::Cli)?);
    }
    if let Some(toolkit) = cli.toolkit {
        processing.insert("toolkit".into(), toml::Value::try_from(toolkit)?);
    }
    if let Command::Serve(args) = &cli.command {
        if let Some(port) = args.port {
            server.insert("port".into(), toml::Value::Integer(port.into()));
        }
        if let Some(bind) = &args.bind {
            server.insert("bind".into(), toml::Value::String(bind.clone()));
        }
        if let Some(user) = &args.username {
            server.insert("username".into(), toml::Value::String(user.clone()));
        }
        if let Some(pass) = &args.password {
            server.insert("password".into(), toml::Value::String(pass.clone()));
        }
    }

    let mut table = toml::Table::new();
    for (name, section) in [
        ("server", server),
        ("storage", storage),
        ("processing", processing),
    ] {
        if !section.is_empty() {
            table.insert(name.into(), toml::Value::Table(section));
        }
    }
    Ok(toml::Value::Table(table))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    logging::init_logging(cli.verbose, cli.log_format)?;
    let app_config = config::load_config(cli.config.as_deref(), Some(cli_overlay(&cli)?))?;
    let processing = &app_config.processing;
    let backend = create_backend(
        processing.strategy,
        processing.toolkit,
        processing.fetch_timeout(),
    );

    match cli.command {
        Command::Serve(_) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(server::serve(&app_config, Arc::from(backend)))?;
        }
        Command::Split(args) => {
            let request = SplitRequest {
                url: process::source_url(&app_config.storage.url_host, &args.url),
                prefix: args.prefix,
                max_width: args.width,
                max_chunks: args.max_images,
                create_archive: args.zip,
            };
            let run_config = RunConfig::from_app_config(&app_config);
            let result = process::run(backend.as_ref(), &run_config, &request)?;
            info!(chunks = result.chunks.len(), "split complete");
            output::print_split_result(&request.url, &result);
        }
        Command::GenConfig => {}
    }

    Ok(())
}
