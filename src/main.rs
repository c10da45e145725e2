mod cache;
mod config;
mod net;
mod shell;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cache::{Method, Served};

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "An offline-first shell for the Arbor habit service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/arbor/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend origin URL, overriding the configured one
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a resource through the offline cache
  Fetch {
    /// Root-relative resource path, e.g. "/index.html"
    path: String,

    /// HTTP method
    #[arg(short, long, default_value = "get")]
    method: String,

    /// Print the response body
    #[arg(long)]
    body: bool,
  },
  /// Show stored cache generations
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  // Register the offline cache; failures degrade to plain network access
  let shell = shell::ShellClient::register(&config).await?;

  match args.command {
    Command::Fetch { path, method, body } => {
      let method: Method = method.parse()?;
      let served = shell.fetch(method, &path).await?;
      print_served(&path, &served, body);
      if served.is_unavailable() {
        std::process::exit(1);
      }
    }
    Command::Status => {
      let title = config.title.as_deref().unwrap_or(&config.origin);
      println!("{}", title);

      if !shell.offline_ready() {
        println!("offline support: unavailable");
        return Ok(());
      }

      let generations = shell.status()?;
      if generations.is_empty() {
        println!("no cache generations stored");
      }
      for generation in generations {
        let marker = if generation.current { "  (current)" } else { "" };
        println!("{}  {} entries{}", generation.name, generation.entries, marker);
      }
    }
  }

  Ok(())
}

fn print_served(path: &str, served: &Served, print_body: bool) {
  match served {
    Served::Cache {
      response,
      cached_at,
    } => println!(
      "{}  {}  via cache (stored {})",
      path,
      response.status,
      cached_at.format("%Y-%m-%d %H:%M:%S")
    ),
    Served::Network(response) => println!("{}  {}  via network", path, response.status),
    Served::Passthrough(response) => println!("{}  {}  passed through", path, response.status),
    Served::Unavailable => println!("{}  unavailable (network failed, no cached copy)", path),
  }

  if print_body {
    if let Some(response) = served.response() {
      let text_like = response
        .header("content-type")
        .map(|ct| ct.starts_with("text/") || ct.contains("json") || ct.contains("javascript"))
        .unwrap_or(true);
      match std::str::from_utf8(&response.body) {
        Ok(text) if text_like => println!("{}", text),
        _ => println!("<{} bytes of binary data>", response.body.len()),
      }
    }
  }
}
