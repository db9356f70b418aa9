use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use breakout_reversal_bot::backtesting::data_loader;
use breakout_reversal_bot::backtesting::{BacktestReport, BacktestRunner};
use breakout_reversal_bot::config::Config;
use breakout_reversal_bot::models::Timeframe;

#[derive(Parser, Debug)]
#[command(name = "backtest")]
#[command(about = "Replay breakout/reversal signals over cached candle files", long_about = None)]
struct Args {
    /// Directory holding {symbol}_{tf}.json files and symbols.json
    #[arg(long)]
    data_dir: Option<String>,

    /// Comma-separated symbols (defaults to SYMBOLS from the environment)
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), inclusive
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Clock step between cycles (e.g. 5m); defaults to the signal timeframe
    #[arg(long)]
    step: Option<String>,

    /// Write the report as JSON to this path
    #[arg(long)]
    report: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }
    if !args.symbols.is_empty() {
        cfg.symbols = args
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    cfg.validate()?;

    let step = match args.step.as_deref() {
        Some(s) => Timeframe::from_str_loose(s).with_context(|| format!("unknown step {}", s))?,
        None => cfg.signal_tf,
    };

    let mut exchange =
        data_loader::load_exchange(&cfg.data_dir, &cfg.symbols, cfg.range_tf, cfg.signal_tf)?;

    let (Some(data_start), Some(data_end)) = (exchange.earliest_time(), exchange.latest_time())
    else {
        bail!("no candles found under {}", cfg.data_dir);
    };

    // Start once the first range candle has closed
    let start = match args.from {
        Some(d) => day_start(d)?,
        None => data_start + cfg.range_tf.as_chrono(),
    };
    let end = match args.to {
        Some(d) => day_start(d)? + Duration::days(1),
        None => data_end,
    }
    .min(data_end);

    if start >= end {
        bail!(
            "empty backtest period {} to {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }

    println!("{}", "=".repeat(70));
    println!("  BREAKOUT REVERSAL BACKTESTER");
    println!("{}", "=".repeat(70));
    println!("  Symbols:   {}", cfg.symbols.join(", "));
    println!(
        "  Period:    {} to {}",
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );
    println!("  Range:     {} | Signal: {} | Step: {}", cfg.range_tf, cfg.signal_tf, step);
    println!("  Balance:   {:.2} {}", cfg.initial_balance, cfg.account_currency);
    println!("{}", "=".repeat(70));

    exchange.set_step(step);
    exchange.set_time(start);
    exchange.set_end(end);

    let mut runner = BacktestRunner::new(exchange, cfg)?;
    let report = runner.run().await?;

    report.print_summary();

    if let Some(path) = args.report {
        save_report(&report, &path)?;
        println!("\nReport saved to: {}", path);
    }

    Ok(())
}

fn day_start(d: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = d.and_hms_opt(0, 0, 0).context("invalid date")?;
    Ok(Utc.from_utc_datetime(&midnight))
}

fn save_report(report: &BacktestReport, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path))?;
    Ok(())
}
