use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use checkout_guard::clock::{Clock, SystemClock};
use checkout_guard::security::replay::{generate_nonce, NONCE_HEADER, TIMESTAMP_HEADER};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for Checkout Guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "CHECKOUT_GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show overall guard status
    Status,
    /// List circuit breakers and their state
    Circuits,
    /// Force a circuit breaker back to closed
    ResetCircuit { name: String },
    /// Show fallback cache state
    Fallbacks,
    /// Show the active rate-limit rules
    RateLimits,
    /// List locked accounts and blocked IPs
    Lockouts,
    /// Unlock a locked account
    Unlock { identifier: String },
    /// Lift an IP block
    Unblock { ip: String },
    /// Inspect the webhook retry queue
    RetryQueue,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);

    let get = |path: &str| client.get(format!("{}{}", cli.url, path)).headers(headers.clone());

    let res = match cli.command {
        Commands::Status => get("/admin/status").send().await?,
        Commands::Circuits => get("/admin/circuits").send().await?,
        Commands::Fallbacks => get("/admin/fallbacks").send().await?,
        Commands::RateLimits => get("/admin/rate-limits").send().await?,
        Commands::Lockouts => get("/admin/lockouts").send().await?,
        Commands::RetryQueue => get("/admin/webhooks/retry-queue").send().await?,
        Commands::ResetCircuit { name } => {
            post(&client, &cli.url, &format!("/admin/circuits/{name}/reset"), &headers).await?
        }
        Commands::Unlock { identifier } => {
            post(&client, &cli.url, &format!("/admin/accounts/{identifier}/unlock"), &headers).await?
        }
        Commands::Unblock { ip } => post(&client, &cli.url, &format!("/admin/ips/{ip}/unblock"), &headers).await?,
    };
    print_response(res).await?;

    Ok(())
}

/// Mutating routes are replay-protected: each call carries a fresh nonce.
async fn post(
    client: &reqwest::Client,
    base: &str,
    path: &str,
    headers: &HeaderMap,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .post(format!("{base}{path}"))
        .headers(headers.clone())
        .header(NONCE_HEADER, generate_nonce())
        .header(TIMESTAMP_HEADER, SystemClock.now_ms().to_string())
        .send()
        .await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
