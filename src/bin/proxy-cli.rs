use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the config proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:19091")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the proxy and show statistics
    Status,
    /// Show the mode, or switch to NAME (default | memorycache)
    Mode { name: Option<String> },
    /// Show the config sources, or replace them (flushes the cache)
    Sources { sources: Vec<String> },
    /// List cached configs
    Cache {
        /// Include payloads
        #[arg(long)]
        full: bool,
    },
    /// Clear the config cache
    Invalidate,
    /// Write the config cache to PATH on the proxy host
    Dump { path: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Mode { name: None } => client.get(format!("{}/admin/mode", base)),
        Commands::Mode { name: Some(name) } => client
            .put(format!("{}/admin/mode", base))
            .json(&json!({ "mode": name })),
        Commands::Sources { sources } if sources.is_empty() => {
            client.get(format!("{}/admin/sources", base))
        }
        Commands::Sources { sources } => client
            .put(format!("{}/admin/sources", base))
            .json(&json!({ "sources": sources })),
        Commands::Cache { full } => client
            .get(format!("{}/admin/cache", base))
            .query(&[("full", full)]),
        Commands::Invalidate => client.post(format!("{}/admin/cache/invalidate", base)),
        Commands::Dump { path } => client
            .post(format!("{}/admin/cache/dump", base))
            .json(&json!({ "path": path })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
