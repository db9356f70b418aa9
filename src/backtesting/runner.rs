use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::Config;
use crate::exchange::{Exchange, HistoricalExchange};
use crate::strategies::{ReversalEngine, SymbolContext};
use crate::trading::paper_trader::PaperTrader;

use super::report::{BacktestReport, SignalCounters};

/// Walks the historical feed cycle by cycle, running the reversal engine for
/// every symbol against a paper trader.
pub struct BacktestRunner {
    pub exchange: HistoricalExchange,
    pub config: Config,
    pub paper_trader: PaperTrader,
    engine: ReversalEngine,
    contexts: Vec<SymbolContext>,
    marked: HashMap<String, DateTime<Utc>>,
    counters: SignalCounters,
}

impl BacktestRunner {
    pub fn new(exchange: HistoricalExchange, config: Config) -> Result<Self> {
        let engine = ReversalEngine::new(&config)?;
        let mut paper_trader = PaperTrader::new_fresh(&config);

        let mut contexts = Vec::new();
        for symbol in &config.symbols {
            let Some(profile) = exchange.profile(symbol) else {
                bail!("no risk profile loaded for {}", symbol);
            };
            paper_trader.register_profile(profile.clone());
            contexts.push(engine.new_context(&config, symbol));
        }

        Ok(Self {
            exchange,
            config,
            paper_trader,
            engine,
            contexts,
            marked: HashMap::new(),
            counters: SignalCounters::default(),
        })
    }

    pub fn contexts(&self) -> &[SymbolContext] {
        &self.contexts
    }

    /// Run until the feed is exhausted. Returns a report.
    pub async fn run(&mut self) -> Result<BacktestReport> {
        let start = self.exchange.current_time();
        let mut end = start;
        let initial_balance = self.config.initial_balance;

        info!("=== BACKTEST START ===");
        info!(
            "Symbols: {} | from {} | initial balance {:.2} {}",
            self.config.symbols.join(","),
            start.format("%Y-%m-%d %H:%M"),
            initial_balance,
            self.config.account_currency
        );

        // Equity curve tracking
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::new();
        let mut max_equity = initial_balance;
        let mut max_drawdown = 0.0f64;
        let mut max_drawdown_pct = 0.0f64;

        while let Some(now) = self.exchange.next_cycle().await {
            end = now;
            self.paper_trader.sim_time = Some(now);
            self.counters.cycles += 1;

            self.mark_to_market();

            for ctx in self.contexts.iter_mut() {
                let report = self
                    .engine
                    .run_cycle(ctx, &mut self.exchange, &mut self.paper_trader)
                    .await;
                self.counters.record(now, &ctx.symbol, &report);
            }

            if self.counters.cycles % 1000 == 0 {
                info!(
                    "  Progress: {} | Balance: {:.2} | Trades: {} | Orders: {}",
                    now.format("%Y-%m-%d %H:%M"),
                    self.paper_trader.balance,
                    self.paper_trader.trade_history().len(),
                    self.counters.signals_placed,
                );
            }

            // Track equity
            let equity = self.paper_trader.balance + self.paper_trader.unrealized_pnl(&self.last_prices());
            equity_curve.push((now, equity));
            if equity > max_equity {
                max_equity = equity;
            }
            let dd = max_equity - equity;
            if dd > max_drawdown {
                max_drawdown = dd;
                max_drawdown_pct = if max_equity > 0.0 {
                    dd / max_equity * 100.0
                } else {
                    0.0
                };
            }
        }

        self.close_remaining();

        info!("=== BACKTEST COMPLETE ===");

        Ok(BacktestReport::from_backtest(
            &self.paper_trader,
            &self.config,
            start,
            end,
            equity_curve,
            max_drawdown,
            max_drawdown_pct,
            self.counters.clone(),
        ))
    }

    /// Settles open positions against every signal candle closed since the
    /// previous cycle.
    fn mark_to_market(&mut self) {
        let tf = self.engine.signal_tf();
        for symbol in &self.config.symbols {
            let after = self.marked.get(symbol).copied();
            let candles = self.exchange.closed_since(symbol, tf, after);
            let Some(last) = candles.last() else {
                continue;
            };
            self.marked.insert(symbol.clone(), last.timestamp);
            for candle in candles {
                for record in self.paper_trader.on_candle(symbol, candle) {
                    debug!(
                        "[BT {}] {} #{} {:+.2}",
                        candle.close_time().format("%m-%d %H:%M"),
                        record.symbol,
                        record.position_id,
                        record.pnl
                    );
                }
            }
        }
    }

    fn last_prices(&self) -> HashMap<String, f64> {
        self.config
            .symbols
            .iter()
            .filter_map(|s| self.exchange.last_close(s).map(|p| (s.clone(), p)))
            .collect()
    }

    /// Close any remaining open positions at the last known price.
    fn close_remaining(&mut self) {
        let prices = self.last_prices();
        let open: Vec<(u64, String)> = self
            .paper_trader
            .positions()
            .map(|p| (p.ticket, p.symbol.clone()))
            .collect();
        for (ticket, symbol) in open {
            if let Some(price) = prices.get(&symbol) {
                self.paper_trader.close_ticket(ticket, *price);
            }
        }
    }
}
