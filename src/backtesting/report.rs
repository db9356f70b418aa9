use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::core::breakout::Transition;
use crate::models::FilterMode;
use crate::strategies::CycleReport;
use crate::trading::paper_trader::PaperTrader;

/// Pipeline counters gathered by the runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalCounters {
    pub cycles: usize,
    pub breakouts: usize,
    pub breakouts_rejected: usize,
    pub reversals: usize,
    pub reversals_rejected: usize,
    pub signals_placed: usize,
    pub outside_window: usize,
    pub break_even_moves: usize,
    pub aborts: BTreeMap<String, usize>,
    pub mode_changes: Vec<ModeChangeEvent>,
}

impl SignalCounters {
    /// Folds one symbol's cycle outcome into the totals.
    pub fn record(&mut self, time: DateTime<Utc>, symbol: &str, report: &CycleReport) {
        for (_, transition) in &report.transitions {
            match transition {
                Transition::BreakoutConfirmed => self.breakouts += 1,
                Transition::BreakoutRejected => self.breakouts_rejected += 1,
                Transition::ReversalConfirmed => self.reversals += 1,
                Transition::ReversalRejected => self.reversals_rejected += 1,
                Transition::None => {}
            }
        }
        self.signals_placed += report.placed.len();
        if report.outside_window {
            self.outside_window += 1;
        }
        self.break_even_moves += report.break_even_moves;
        for abort in &report.aborts {
            *self.aborts.entry(abort.kind().to_string()).or_default() += 1;
        }
        for change in &report.mode_changes {
            self.mode_changes.push(ModeChangeEvent {
                time,
                symbol: symbol.to_string(),
                from: change.from,
                to: change.to,
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeChangeEvent {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub from: FilterMode,
    pub to: FilterMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    // Period
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: f64,

    // Performance
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,

    // Trades
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_trade: f64,
    pub avg_r_multiple: f64,
    pub avg_hold_minutes: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    pub counters: SignalCounters,
    pub symbol_stats: HashMap<String, SymbolStats>,

    // Equity curve
    #[serde(skip)]
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
}

impl BacktestReport {
    pub fn from_backtest(
        trader: &PaperTrader,
        cfg: &Config,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        equity_curve: Vec<(DateTime<Utc>, f64)>,
        max_drawdown: f64,
        max_drawdown_pct: f64,
        counters: SignalCounters,
    ) -> Self {
        let initial = cfg.initial_balance;
        let final_balance = trader.balance;
        let total_pnl = final_balance - initial;
        let days = (end - start).num_hours() as f64 / 24.0;

        let history = trader.trade_history();
        let total_trades = history.len();

        let wins: Vec<f64> = history.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = history.iter().filter(|t| t.pnl <= 0.0).map(|t| t.pnl).collect();

        let winning = wins.len();
        let losing = losses.len();
        let win_rate = if total_trades > 0 {
            winning as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let avg_win = if !wins.is_empty() {
            wins.iter().sum::<f64>() / wins.len() as f64
        } else {
            0.0
        };
        let avg_loss = if !losses.is_empty() {
            losses.iter().sum::<f64>() / losses.len() as f64
        } else {
            0.0
        };

        let gross_loss = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            wins.iter().sum::<f64>() / gross_loss
        } else if !wins.is_empty() {
            f64::INFINITY
        } else {
            0.0
        };

        let best_trade = history
            .iter()
            .map(|t| t.pnl)
            .fold(f64::NEG_INFINITY, f64::max);
        let worst_trade = history
            .iter()
            .map(|t| t.pnl)
            .fold(f64::INFINITY, f64::min);
        let avg_trade = if total_trades > 0 {
            history.iter().map(|t| t.pnl).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };
        let r_multiples: Vec<f64> = history.iter().filter_map(|t| t.r_multiple()).collect();
        let avg_r_multiple = if r_multiples.is_empty() {
            0.0
        } else {
            r_multiples.iter().sum::<f64>() / r_multiples.len() as f64
        };

        let avg_hold_minutes = if total_trades > 0 {
            history
                .iter()
                .map(|t| t.hold_duration_seconds() as f64 / 60.0)
                .sum::<f64>()
                / total_trades as f64
        } else {
            0.0
        };

        // Sharpe ratio (annualized, using daily returns from equity curve)
        let sharpe_ratio = compute_sharpe(&equity_curve);

        let mut symbol_stats: HashMap<String, SymbolStats> = HashMap::new();
        for record in history {
            let entry = symbol_stats.entry(record.symbol.clone()).or_default();
            entry.trades += 1;
            entry.total_pnl += record.pnl;
            if record.pnl > 0.0 {
                entry.wins += 1;
            } else {
                entry.losses += 1;
            }
        }
        for stats in symbol_stats.values_mut() {
            stats.win_rate = stats.wins as f64 / stats.trades as f64 * 100.0;
            stats.avg_pnl = stats.total_pnl / stats.trades as f64;
        }

        BacktestReport {
            start,
            end,
            days,
            initial_balance: initial,
            final_balance,
            total_pnl,
            total_return_pct: if initial > 0.0 {
                total_pnl / initial * 100.0
            } else {
                0.0
            },
            total_trades,
            winning_trades: winning,
            losing_trades: losing,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            best_trade: if total_trades > 0 { best_trade } else { 0.0 },
            worst_trade: if total_trades > 0 { worst_trade } else { 0.0 },
            avg_trade,
            avg_r_multiple,
            avg_hold_minutes,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            counters,
            symbol_stats,
            equity_curve,
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  BACKTEST REPORT");
        println!("{}", "=".repeat(70));
        println!(
            "  Period:      {} to {} ({:.0} days)",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
            self.days
        );
        println!();
        println!("  PERFORMANCE");
        println!("  ───────────────────────────────────");
        println!("  Initial:     {:.2}", self.initial_balance);
        println!("  Final:       {:.2}", self.final_balance);
        println!("  PnL:         {:+.2}", self.total_pnl);
        println!("  Return:      {:+.1}%", self.total_return_pct);
        println!();
        println!("  TRADES");
        println!("  ───────────────────────────────────");
        println!("  Total:       {}", self.total_trades);
        println!(
            "  Win/Loss:    {} / {}",
            self.winning_trades, self.losing_trades
        );
        println!("  Win Rate:    {:.1}%", self.win_rate);
        println!("  Avg Win:     {:+.2}", self.avg_win);
        println!("  Avg Loss:    {:+.2}", self.avg_loss);
        println!("  Best:        {:+.2}", self.best_trade);
        println!("  Worst:       {:+.2}", self.worst_trade);
        println!("  Avg Trade:   {:+.2}", self.avg_trade);
        println!("  Avg R:       {:+.2}", self.avg_r_multiple);
        println!("  Avg Hold:    {:.0} min", self.avg_hold_minutes);
        println!("  Profit Factor: {:.2}", self.profit_factor);
        println!();
        println!("  RISK");
        println!("  ───────────────────────────────────");
        println!("  Max DD:      {:.2} ({:.1}%)", self.max_drawdown, self.max_drawdown_pct);
        println!("  Sharpe:      {:.2}", self.sharpe_ratio);
        println!();
        println!("  PIPELINE");
        println!("  ───────────────────────────────────");
        let c = &self.counters;
        println!("  Cycles:      {}", c.cycles);
        println!(
            "  Breakouts:   {} confirmed / {} filtered",
            c.breakouts, c.breakouts_rejected
        );
        println!(
            "  Reversals:   {} confirmed / {} filtered",
            c.reversals, c.reversals_rejected
        );
        println!("  Orders:      {}", c.signals_placed);
        println!("  Break-even:  {}", c.break_even_moves);
        for (kind, count) in &c.aborts {
            println!("  Abort {:<22} {}", format!("{}:", kind), count);
        }

        if !c.mode_changes.is_empty() {
            println!();
            println!("  ADAPTIVE FILTERS");
            println!("  ───────────────────────────────────");
            for ev in &c.mode_changes {
                println!(
                    "  {} {:>8}: {} -> {}",
                    ev.time.format("%Y-%m-%d %H:%M"),
                    ev.symbol,
                    ev.from,
                    ev.to
                );
            }
        }

        if !self.symbol_stats.is_empty() {
            println!();
            println!("  BY SYMBOL");
            println!("  ───────────────────────────────────");
            let mut symbols: Vec<_> = self.symbol_stats.iter().collect();
            symbols.sort_by(|a, b| b.1.total_pnl.total_cmp(&a.1.total_pnl));
            for (symbol, stats) in symbols {
                println!(
                    "  {:>8}: {} trades | WR {:.0}% | PnL {:+.2} | Avg {:+.2}",
                    symbol, stats.trades, stats.win_rate, stats.total_pnl, stats.avg_pnl
                );
            }
        }

        println!("{}", "=".repeat(70));
    }
}

fn compute_sharpe(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    // Compute daily returns (sample once per day)
    let mut daily_values: Vec<f64> = Vec::new();
    let mut last_day = None;
    for (ts, val) in equity_curve {
        let day = ts.date_naive();
        if last_day != Some(day) {
            daily_values.push(*val);
            last_day = Some(day);
        }
    }

    if daily_values.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = daily_values
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }

    // Annualized over ~252 trading days
    mean / std_dev * 252.0_f64.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn sharpe_of_flat_curve_is_zero() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let curve: Vec<_> = (0..5).map(|d| (t0 + Duration::days(d), 1000.0)).collect();
        assert_eq!(compute_sharpe(&curve), 0.0);
    }

    #[test]
    fn sharpe_positive_for_rising_curve() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let curve: Vec<_> = (0..6)
            .map(|d| (t0 + Duration::days(d), 1000.0 + (d * d) as f64))
            .collect();
        assert!(compute_sharpe(&curve) > 0.0);
    }
}
