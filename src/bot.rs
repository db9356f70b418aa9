use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use breakout_reversal_bot::config::SharedConfig;
use breakout_reversal_bot::exchange::{Exchange, HistoricalExchange, SerializedGateway};
use breakout_reversal_bot::strategies::{CycleReport, ReversalEngine, SymbolContext};
use breakout_reversal_bot::trading::PaperTrader;

/// Polling front-end: one task per symbol, all sharing one paper account.
pub struct ReversalBot {
    config: SharedConfig,
    engine: Arc<ReversalEngine>,
    gateway: SerializedGateway<PaperTrader>,
    feeds: Vec<(SymbolContext, HistoricalExchange)>,
}

impl ReversalBot {
    pub async fn new(config: SharedConfig, feeds: Vec<(String, HistoricalExchange)>) -> Result<Self> {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("Breakout reversal bot starting up");
        info!(
            "Mode: {}",
            if cfg.paper_trade {
                "PAPER TRADING"
            } else {
                "LIVE TRADING"
            }
        );
        if !cfg.paper_trade {
            warn!("No live gateway is wired in; orders go to the paper account");
        }
        info!(
            "Range: {} (hours {:?}) | Signal: {} | Risk: {}% x{}",
            cfg.range_tf, cfg.range_hours, cfg.signal_tf, cfg.risk_percent, cfg.risk_tolerance_multiplier
        );

        let engine = Arc::new(ReversalEngine::new(&cfg)?);
        let mut trader = PaperTrader::new(&cfg);

        let mut contexts = Vec::new();
        for (symbol, feed) in feeds {
            match feed.profile(&symbol) {
                Some(profile) => trader.register_profile(profile.clone()),
                None => anyhow::bail!("no risk profile for {}", symbol),
            }
            let ctx = engine
                .new_context(&cfg, &symbol)
                .persist_adaptive_state(&cfg.log_dir);
            info!(
                "  {}: {} | filters {}",
                symbol,
                ctx.category,
                ctx.filter_mode()
            );
            contexts.push((ctx, feed));
        }
        info!("{}", "=".repeat(60));

        drop(cfg);

        Ok(Self {
            config,
            engine,
            gateway: SerializedGateway::new(trader),
            feeds: contexts,
        })
    }

    pub async fn run(self) -> Result<()> {
        info!("Bot is now running. Press Ctrl+C to stop.");
        self.print_status().await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for (ctx, feed) in self.feeds {
            tasks.spawn(run_symbol(
                self.engine.clone(),
                ctx,
                feed,
                self.gateway.clone(),
                stop_rx.clone(),
            ));
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                let _ = stop_tx.send(true);
            }
            _ = wait_all(&mut tasks) => {
                info!("All feeds exhausted");
            }
        }
        wait_all(&mut tasks).await;

        let cfg = self.config.read().await;
        let stats = self.gateway.lock().await.get_stats();
        info!("Balance: {:.2} {}", stats.balance, cfg.account_currency);
        info!("Trades: {} | Win Rate: {}%", stats.total_trades, stats.win_rate);
        info!("PnL: {:+.2} | Open: {}", stats.total_pnl, stats.open_positions);
        info!("Bot stopped.");
        Ok(())
    }

    async fn print_status(&self) {
        let stats = self.gateway.lock().await.get_stats();
        info!("Balance: {:.2}", stats.balance);
        info!(
            "Trades: {} | Win Rate: {}% | Avg win {:+.2} | Avg loss {:+.2}",
            stats.total_trades, stats.win_rate, stats.avg_win, stats.avg_loss
        );
        info!("Open: {}", stats.open_positions);
    }
}

async fn wait_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("Symbol task ended abnormally: {}", e);
        }
    }
}

/// Drives one symbol until its feed is exhausted or shutdown is signalled.
async fn run_symbol(
    engine: Arc<ReversalEngine>,
    mut ctx: SymbolContext,
    mut feed: HistoricalExchange,
    mut gateway: SerializedGateway<PaperTrader>,
    mut stop: watch::Receiver<bool>,
) {
    let symbol = ctx.symbol.clone();
    let tf = engine.signal_tf();
    let mut marked: Option<DateTime<Utc>> = None;

    loop {
        let now = tokio::select! {
            _ = stop.changed() => break,
            next = feed.next_cycle() => match next {
                Some(t) => t,
                None => {
                    info!("{}: feed exhausted", symbol);
                    break;
                }
            },
        };

        {
            let mut trader = gateway.lock().await;
            trader.advance_clock(&symbol, now);
            let candles = feed.closed_since(&symbol, tf, marked);
            if let Some(last) = candles.last() {
                marked = Some(last.timestamp);
            }
            for candle in candles {
                trader.on_candle(&symbol, candle);
            }
        }

        let report = engine.run_cycle(&mut ctx, &mut feed, &mut gateway).await;
        log_report(&symbol, now, &report);
    }
}

fn log_report(symbol: &str, now: DateTime<Utc>, report: &CycleReport) {
    for placed in &report.placed {
        info!(
            "{} #{} {} {:.2} lots @ {:.5} sl={:.5} tp={:.5} RR {:.2}",
            symbol,
            placed.ticket,
            placed.signal.direction,
            placed.signal.lot_size,
            placed.signal.entry_price,
            placed.signal.stop_loss,
            placed.signal.take_profit,
            placed.signal.risk_reward()
        );
    }
    for change in &report.mode_changes {
        info!("{}: filters {} -> {}", symbol, change.from, change.to);
    }
    if report.new_candle {
        debug!(
            "{} [{}] transitions={} aborts={}",
            symbol,
            now.format("%m-%d %H:%M"),
            report.transitions.len(),
            report.aborts.len()
        );
    }
}
