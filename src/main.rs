mod bot;

use anyhow::Result;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use breakout_reversal_bot::backtesting::data_loader;
use breakout_reversal_bot::config::Config;

use crate::bot::ReversalBot;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;

    // Each symbol gets its own paced feed over the cached candles
    let mut feeds = Vec::new();
    for symbol in &cfg.symbols {
        let mut feed = data_loader::load_exchange(
            &cfg.data_dir,
            std::slice::from_ref(symbol),
            cfg.range_tf,
            cfg.signal_tf,
        )?;
        if let Some(start) = feed.earliest_time() {
            feed.set_time(start + cfg.range_tf.as_chrono());
        }
        feed.set_step(cfg.signal_tf);
        feed.set_pace(Duration::from_secs(cfg.poll_interval_secs));
        info!("{}: feed ready from {}", symbol, feed.current_time());
        feeds.push((symbol.clone(), feed));
    }

    let shared_config = cfg.shared();

    let bot = ReversalBot::new(shared_config, feeds).await?;
    bot.run().await?;

    Ok(())
}
