use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Management CLI for the traffic dispatcher", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "DISPATCH_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall dispatcher status
    Status,
    /// Per-endpoint health, load and statistics
    Endpoints,
    /// Dispatch counters, circuits and sessions
    Stats,
    /// Ask the dispatcher for the next endpoint
    Next {
        /// Client key for sticky sessions and ip-hash
        #[arg(short, long)]
        client: Option<String>,
    },
    /// Override an endpoint's health flag
    SetHealth {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        healthy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Endpoints => client.get(format!("{}/admin/endpoints", base)),
        Commands::Stats => client.get(format!("{}/admin/stats", base)),
        Commands::Next { client: key } => {
            let request = client.get(format!("{}/dispatch/next", base));
            match key {
                Some(key) => request.query(&[("client", key)]),
                None => request,
            }
        }
        Commands::SetHealth { id, healthy } => client
            .post(format!("{}/admin/endpoints/{}/health", base, id))
            .json(&serde_json::json!({ "healthy": healthy })),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: dispatcher returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
