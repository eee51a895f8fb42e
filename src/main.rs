use std::io::{self, BufRead};
use std::sync::Arc;

use riskwatch::application::command_router;
use riskwatch::application::risk_poller;
use riskwatch::application::watcher::Watcher;
use riskwatch::config::Config;
use riskwatch::infrastructure::alpaca_broker::AlpacaBroker;
use riskwatch::infrastructure::console_chat::ConsoleChat;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("starting riskwatch, polling every {} minute(s)", config.poll_interval_minutes);

    let broker = Arc::new(AlpacaBroker::new(
        config.alpaca_api_key.clone(),
        config.alpaca_secret_key.clone(),
        config.alpaca_base_url.clone(),
        config.alpaca_data_url.clone(),
    ));
    let chat = Arc::new(ConsoleChat);

    let watcher = Watcher::new(config, broker, chat, None).await?;

    let poll_watcher = watcher.clone();
    let poll_interval = poll_watcher.config.poll_interval_minutes.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval * 60));
        loop {
            interval.tick().await;
            if let Err(err) = risk_poller::tick(&poll_watcher).await {
                error!("risk poller tick failed: {err}");
            }
            if let Err(err) = riskwatch::application::eod_reporter::maybe_run(&poll_watcher).await {
                error!("eod reporter failed: {err}");
            }
        }
    });

    info!("operator console ready, type /help for commands");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = command_router::handle_command(&watcher, &line).await;
        println!("{response}");
    }

    Ok(())
}
