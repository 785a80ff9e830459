//! A small command-line client against the frontend, for manual testing and
//! load generation. Grounded on the teacher's clap-based `client.rs`/
//! `stress_test.rs` (`Parser`/`Subcommand`, `-n`/`-t` style flags), adapted
//! from raw TCP framing to `reqwest` JSON calls against the frontend's HTTP
//! surface.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use toy_store::domain::BuyRequest;

#[derive(Parser)]
#[command(version, about = "Command-line client for the toy store frontend", long_about = None)]
struct Cli {
    /// Frontend base URL
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    frontend: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a product's detail
    Product {
        /// Product name, e.g. Tux
        name: String,
    },
    /// Fetch an order by number
    Order {
        /// Order number
        number: u64,
    },
    /// Place a buy order
    Buy {
        /// Product name
        name: String,
        /// Quantity to buy
        #[arg(default_value = "1")]
        quantity: u64,
    },
    /// Fan out concurrent buy requests for load testing
    Stress {
        /// Product name to buy repeatedly
        #[arg(short = 'p', long, default_value = "Tux")]
        product: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "100")]
        num_requests: usize,

        /// Number of concurrent tasks
        #[arg(short = 't', long, default_value = "10")]
        num_tasks: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Product { name } => {
            let url = format!("{}/products/{}/", cli.frontend, name);
            let body: serde_json::Value = client.get(url).send().await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Order { number } => {
            let url = format!("{}/orders/{}/", cli.frontend, number);
            let body: serde_json::Value = client.get(url).send().await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Buy { name, quantity } => {
            let url = format!("{}/orders/", cli.frontend);
            let response = client
                .post(url)
                .json(&BuyRequest { name, quantity })
                .send()
                .await?;
            let status = response.status();
            let body: serde_json::Value = response.json().await?;
            if !status.is_success() {
                bail!("buy failed ({status}): {body}");
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Stress {
            product,
            num_requests,
            num_tasks,
        } => run_stress(&cli.frontend, &product, num_requests, num_tasks).await?,
    }

    Ok(())
}

async fn run_stress(frontend: &str, product: &str, num_requests: usize, num_tasks: usize) -> Result<()> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let succeeded = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let chunk = num_requests.div_ceil(num_tasks.max(1));
    let mut tasks = Vec::new();
    for _ in 0..num_tasks {
        let client = client.clone();
        let frontend = frontend.to_string();
        let product = product.to_string();
        let succeeded = Arc::clone(&succeeded);
        let failed = Arc::clone(&failed);
        tasks.push(tokio::spawn(async move {
            for _ in 0..chunk {
                let url = format!("{frontend}/orders/");
                let result = client
                    .post(&url)
                    .json(&BuyRequest {
                        name: product.clone(),
                        quantity: 1,
                    })
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for task in tasks {
        task.await?;
    }

    println!(
        "stress complete: {} succeeded, {} failed",
        succeeded.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed)
    );
    Ok(())
}
