//! Grid Trader Binary
//!
//! Runs the Binance futures grid trader against a configuration file.
//!
//! ## Setup
//!
//! 1. Copy `config.example.toml` to `config.toml` and fill in the grid.
//!
//! 2. Keep credentials out of the file, in `.env` or the environment:
//!    ```
//!    APP__NETWORK__API_KEY=...
//!    APP__NETWORK__API_SECRET=...
//!    ```
//!
//! 3. Run the trader:
//!    ```bash
//!    cargo run --bin grid_trader -- config.toml
//!    ```

use binance_grid_trader::runner::TraderRunner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before settings so APP__* overrides are visible
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let default_config = "config.toml".to_string();
    let config_path = args.get(1).unwrap_or(&default_config);
    if !std::path::Path::new(config_path).exists() {
        eprintln!(
            "Config file '{}' not found. Copy config.example.toml to get started.",
            config_path
        );
        std::process::exit(1);
    }

    let runner = TraderRunner::new(config_path)?;

    if let Err(e) = dotenv {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    if let Err(e) = runner.run().await {
        eprintln!("Grid trader error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
