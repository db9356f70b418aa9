use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::{BreakEvenConfig, Config};
use crate::core::adaptive::{AdaptiveController, ModeChange, TradeOutcomeListener};
use crate::core::breakout::{BreakoutState, Transition};
use crate::core::currency::{candidate_pairs, same_currency, TickConversion};
use crate::core::extremum::{Extremum, ExtremumFinder, ExtremumWindow};
use crate::core::filters::{ConfirmationFilters, FilterToggles};
use crate::core::position_sizer::{PositionSizer, SizingRequest};
use crate::core::range::{RangeTracker, RangeUpdate, ReferenceRange};
use crate::core::sessions::SessionWindow;
use crate::core::stop_loss::compute_levels;
use crate::error::SignalAbort;
use crate::exchange::{Exchange, ExecutionGateway, OpenPosition, OrderOutcome};
use crate::models::{Direction, FilterMode, SymbolCategory, SymbolRiskProfile, Timeframe};
use crate::strategies::signals::TradeSignal;

/// Everything mutable that belongs to one symbol.
pub struct SymbolContext {
    pub symbol: String,
    pub category: SymbolCategory,
    pub stop_buffer_ratio: f64,
    range: RangeTracker,
    long: BreakoutState,
    short: BreakoutState,
    adaptive: AdaptiveController,
    last_candle: Option<DateTime<Utc>>,
    outcome_cursor: Option<DateTime<Utc>>,
    risk_profile: Option<SymbolRiskProfile>,
    break_even_done: HashSet<u64>,
}

impl SymbolContext {
    pub fn range(&self) -> Option<&ReferenceRange> {
        self.range.current()
    }

    pub fn state(&self, side: Direction) -> &BreakoutState {
        match side {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    fn state_mut(&mut self, side: Direction) -> &mut BreakoutState {
        match side {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }

    pub fn adaptive(&self) -> &AdaptiveController {
        &self.adaptive
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.adaptive.mode()
    }

    pub fn risk_profile(&self) -> Option<&SymbolRiskProfile> {
        self.risk_profile.as_ref()
    }

    pub fn last_candle(&self) -> Option<DateTime<Utc>> {
        self.last_candle
    }

    /// Saves adaptive streaks under `dir` and restores any previous ones.
    /// Outcome polling resumes from the restored watermark.
    pub fn persist_adaptive_state(mut self, dir: &str) -> Self {
        self.adaptive = self.adaptive.with_persistence(dir);
        self.outcome_cursor = self.adaptive.watermark();
        self
    }

    fn reset_sides(&mut self) {
        self.long.reset();
        self.short.reset();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedSignal {
    pub ticket: u64,
    pub signal: TradeSignal,
}

/// What happened during one pass of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub new_candle: bool,
    pub range_rotated: bool,
    pub outside_window: bool,
    pub transitions: Vec<(Direction, Transition)>,
    pub placed: Vec<PlacedSignal>,
    pub aborts: Vec<SignalAbort>,
    pub mode_changes: Vec<ModeChange>,
    pub break_even_moves: usize,
}

/// The breakout/reversal pipeline, shared by every front-end.
pub struct ReversalEngine {
    range_tf: Timeframe,
    signal_tf: Timeframe,
    range_hours: Vec<u32>,
    range_history: usize,
    session: SessionWindow,
    filters: ConfirmationFilters,
    baseline: FilterToggles,
    extremum_lookback: usize,
    extremum_fetch_margin: usize,
    extremum_max_fetch: usize,
    reward_ratio: f64,
    epsilon_points: f64,
    max_spread_points: f64,
    sizer: PositionSizer,
    break_even: BreakEvenConfig,
}

impl ReversalEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            range_tf: cfg.range_tf,
            signal_tf: cfg.signal_tf,
            range_hours: cfg.range_hours.clone(),
            range_history: cfg.range_history.max(1),
            session: SessionWindow::new(&cfg.trading_window)?,
            filters: ConfirmationFilters::new(cfg),
            baseline: FilterToggles::from_config(cfg),
            extremum_lookback: cfg.extremum_lookback,
            extremum_fetch_margin: cfg.extremum_fetch_margin,
            extremum_max_fetch: cfg.extremum_max_fetch,
            reward_ratio: cfg.reward_ratio,
            epsilon_points: cfg.boundary_epsilon_points.max(0.0),
            max_spread_points: cfg.max_spread_points,
            sizer: PositionSizer::new(cfg),
            break_even: cfg.break_even.clone(),
        })
    }

    pub fn signal_tf(&self) -> Timeframe {
        self.signal_tf
    }

    pub fn new_context(&self, cfg: &Config, symbol: &str) -> SymbolContext {
        let category = cfg.category_for(symbol);
        let profile = cfg.category_profile(symbol);
        SymbolContext {
            symbol: symbol.to_string(),
            category,
            stop_buffer_ratio: profile.stop_buffer_ratio,
            range: RangeTracker::new(self.range_hours.clone(), self.session.timezone),
            long: BreakoutState::new(Direction::Long),
            short: BreakoutState::new(Direction::Short),
            adaptive: AdaptiveController::new(symbol, &profile, self.baseline),
            last_candle: None,
            outcome_cursor: None,
            risk_profile: None,
            break_even_done: HashSet::new(),
        }
    }

    /// One evaluation pass for one symbol. Every failure is recorded in the
    /// report and ends the pass; nothing here is fatal.
    pub async fn run_cycle(
        &self,
        ctx: &mut SymbolContext,
        market: &mut dyn Exchange,
        gateway: &mut dyn ExecutionGateway,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        if let Err(abort) = self.cycle(ctx, market, gateway, &mut report).await {
            match &abort {
                SignalAbort::DataUnavailable(msg) => {
                    warn!("{}: cycle aborted, data unavailable: {}", ctx.symbol, msg)
                }
                other => info!("{}: cycle aborted: {}", ctx.symbol, other),
            }
            report.aborts.push(abort);
        }
        report
    }

    async fn cycle(
        &self,
        ctx: &mut SymbolContext,
        market: &mut dyn Exchange,
        gateway: &mut dyn ExecutionGateway,
        report: &mut CycleReport,
    ) -> Result<(), SignalAbort> {
        self.dispatch_outcomes(ctx, gateway, report).await;

        let long_candles = market
            .fetch_candles(&ctx.symbol, self.range_tf, self.range_history)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("{} candles: {:#}", self.range_tf, e)))?;
        match ctx.range.update(&long_candles) {
            RangeUpdate::Rotated(range) => {
                info!(
                    "{}: range rotated to {:.5}-{:.5} ({})",
                    ctx.symbol, range.low, range.high, range.source_timestamp
                );
                ctx.reset_sides();
                report.range_rotated = true;
            }
            RangeUpdate::Unchanged => {}
            RangeUpdate::Unavailable => {
                debug!("{}: no qualifying {} candle yet", ctx.symbol, self.range_tf);
                return Ok(());
            }
        }
        let Some(range) = ctx.range.current().copied() else {
            return Ok(());
        };

        let profile = market
            .risk_profile(&ctx.symbol)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("risk profile: {:#}", e)))?;
        ctx.risk_profile = Some(profile.clone());

        let positions = gateway
            .open_positions(&ctx.symbol)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("open positions: {:#}", e)))?;
        self.manage_break_even(ctx, &profile, &positions, market, gateway, report)
            .await;

        let history = self.filters.required_history() + 1;
        let candles = market
            .fetch_candles(&ctx.symbol, self.signal_tf, history)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("{} candles: {:#}", self.signal_tf, e)))?;
        let Some(newest) = candles.last().cloned() else {
            return Ok(());
        };
        if ctx.last_candle.is_some_and(|t| newest.timestamp <= t) {
            return Ok(());
        }
        if let Some(prev) = ctx.last_candle {
            let skipped = (newest.timestamp - prev).num_seconds() / self.signal_tf.as_seconds() as i64 - 1;
            if skipped > 0 {
                debug!("{}: {} candles closed since last cycle, evaluating newest only", ctx.symbol, skipped);
            }
        }
        ctx.last_candle = Some(newest.timestamp);
        report.new_candle = true;

        if !self.session.contains(newest.close_time()) {
            report.outside_window = true;
            return Ok(());
        }

        let epsilon = self.epsilon_points * profile.point_size;
        let gate = self.filters.for_cycle(&candles, ctx.adaptive.active_toggles());
        if let Some(avg) = gate.average_volume() {
            debug!("{}: average volume {:.1}", ctx.symbol, avg);
        }

        let mut confirmed = Vec::new();
        for side in Direction::BOTH {
            if positions.iter().any(|p| p.side == side) {
                continue;
            }
            let transition = ctx.state_mut(side).on_candle(&newest, &range, &gate, epsilon);
            if transition != Transition::None {
                debug!("{} {}: {:?}", ctx.symbol, side, transition);
                report.transitions.push((side, transition));
            }
            if transition == Transition::ReversalConfirmed {
                confirmed.push(side);
            }
        }

        for side in confirmed {
            let state = ctx.state(side).clone();
            let result = self
                .execute_signal(ctx, &profile, &state, &range, market, gateway)
                .await;
            ctx.state_mut(side).reset();
            match result {
                Ok(placed) => report.placed.push(placed),
                Err(abort) => {
                    info!("{} {}: signal aborted: {}", ctx.symbol, side, abort);
                    report.aborts.push(abort);
                }
            }
        }
        Ok(())
    }

    async fn dispatch_outcomes(
        &self,
        ctx: &mut SymbolContext,
        gateway: &mut dyn ExecutionGateway,
        report: &mut CycleReport,
    ) {
        let since = ctx.outcome_cursor.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut outcomes = match gateway.closed_trade_outcomes(&ctx.symbol, since).await {
            Ok(o) => o,
            Err(e) => {
                warn!("{}: closed trade history unavailable: {:#}", ctx.symbol, e);
                return;
            }
        };
        outcomes.sort_by(|a, b| {
            a.closed_at
                .cmp(&b.closed_at)
                .then(a.position_id.cmp(&b.position_id))
        });
        for outcome in &outcomes {
            if let Some(change) = ctx.adaptive.on_trade_closed(outcome) {
                report.mode_changes.push(change);
            }
            ctx.outcome_cursor = Some(
                ctx.outcome_cursor
                    .map_or(outcome.closed_at, |c| c.max(outcome.closed_at)),
            );
        }
    }

    async fn execute_signal(
        &self,
        ctx: &SymbolContext,
        profile: &SymbolRiskProfile,
        state: &BreakoutState,
        range: &ReferenceRange,
        market: &mut dyn Exchange,
        gateway: &mut dyn ExecutionGateway,
    ) -> Result<PlacedSignal, SignalAbort> {
        let side = state.side;
        let (Some(breakout_time), Some(reversal_time)) =
            (state.breakout_timestamp, state.reversal_timestamp)
        else {
            return Err(SignalAbort::InvalidLevels("incomplete breakout state".into()));
        };

        let window = ExtremumWindow::new(
            breakout_time,
            reversal_time,
            self.extremum_lookback,
            self.signal_tf,
        );
        let fetch = window.fetch_size(
            self.signal_tf,
            self.extremum_fetch_margin,
            self.extremum_max_fetch,
        );
        let candles = market
            .fetch_candles(&ctx.symbol, self.signal_tf, fetch)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("extremum candles: {:#}", e)))?;

        let epsilon = self.epsilon_points * profile.point_size;
        let extremum = ExtremumFinder::new(epsilon).find(&candles, &window, side, range);
        let Extremum::Found(hit) = extremum else {
            return Err(SignalAbort::UndefinedExtremum);
        };
        debug!(
            "{} {}: extremum {:.5} at {} ({:?} pass)",
            ctx.symbol, side, hit.price, hit.timestamp, hit.pass
        );

        let quote = market
            .quote(&ctx.symbol)
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("quote: {:#}", e)))?;
        let spread_points = profile.price_to_points(quote.spread());
        if self.max_spread_points > 0.0 && spread_points > self.max_spread_points {
            return Err(SignalAbort::SpreadTooWide {
                spread_points,
                limit: self.max_spread_points,
            });
        }
        let entry = match side {
            Direction::Long => quote.ask,
            Direction::Short => quote.bid,
        };

        let levels = compute_levels(
            side,
            &extremum,
            entry,
            ctx.stop_buffer_ratio,
            self.reward_ratio,
        )?
        .rounded(profile, entry);
        levels.validate(side, entry)?;

        let account = gateway
            .account_snapshot()
            .await
            .map_err(|e| SignalAbort::DataUnavailable(format!("account: {:#}", e)))?;
        let conversion = resolve_conversion(market, &profile.profit_currency, &account.currency).await;
        let broker_loss_per_lot = match market
            .loss_per_lot(&ctx.symbol, side, entry, levels.stop_loss)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                debug!("{}: broker loss check unavailable: {:#}", ctx.symbol, e);
                None
            }
        };

        let size = self.sizer.size(&SizingRequest {
            balance: account.balance,
            entry,
            stop_loss: levels.stop_loss,
            profile,
            conversion: &conversion,
            broker_loss_per_lot,
        })?;

        let signal = TradeSignal {
            symbol: ctx.symbol.clone(),
            direction: side,
            entry_price: entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            lot_size: size.lots,
            breakout_time,
            reversal_time,
            extremum: hit,
            sizing_confidence: size.confidence,
            reason: format!(
                "{} reversal {:.5} (extreme {:.5})",
                side,
                range.boundary(side),
                hit.price
            ),
        };
        info!(
            "{} {} signal: entry={:.5} sl={:.5} tp={:.5} lots={:.2} risk={:.2}%{}",
            ctx.symbol,
            side,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit,
            signal.lot_size,
            size.actual_risk_percent,
            if size.reduced { " (reduced)" } else { "" }
        );

        let order = signal.clone().into_order();
        match gateway.place_order(order).await {
            Ok(OrderOutcome::Placed { ticket }) => {
                info!("{} {}: order placed, ticket #{}", ctx.symbol, side, ticket);
                Ok(PlacedSignal { ticket, signal })
            }
            Ok(OrderOutcome::Rejected { reason }) => {
                warn!("{} {}: order rejected: {}", ctx.symbol, side, reason);
                Err(SignalAbort::GatewayRejection(reason))
            }
            Err(e) => {
                warn!("{} {}: order submission failed: {:#}", ctx.symbol, side, e);
                Err(SignalAbort::GatewayRejection(format!("{:#}", e)))
            }
        }
    }

    async fn manage_break_even(
        &self,
        ctx: &mut SymbolContext,
        profile: &SymbolRiskProfile,
        positions: &[OpenPosition],
        market: &mut dyn Exchange,
        gateway: &mut dyn ExecutionGateway,
        report: &mut CycleReport,
    ) {
        ctx.break_even_done
            .retain(|ticket| positions.iter().any(|p| p.ticket == *ticket));
        if !self.break_even.enabled || positions.is_empty() {
            return;
        }
        let quote = match market.quote(&ctx.symbol).await {
            Ok(q) => q,
            Err(e) => {
                debug!("{}: no quote for break-even check: {:#}", ctx.symbol, e);
                return;
            }
        };

        for pos in positions {
            if ctx.break_even_done.contains(&pos.ticket) {
                continue;
            }
            let risk = pos.initial_risk();
            if risk <= 0.0 {
                continue;
            }
            let sign = pos.side.sign();
            let price = match pos.side {
                Direction::Long => quote.bid,
                Direction::Short => quote.ask,
            };
            if (price - pos.entry_price) * sign < self.break_even.trigger_r * risk {
                continue;
            }

            let target = profile.round_price(
                pos.entry_price + sign * self.break_even.offset_points * profile.point_size,
            );
            if (pos.stop_loss - target) * sign >= 0.0 {
                ctx.break_even_done.insert(pos.ticket);
                continue;
            }
            match gateway.modify_order(pos.ticket, target, pos.take_profit).await {
                Ok(()) => {
                    info!(
                        "{}: ticket #{} stop moved to break-even {:.5}",
                        ctx.symbol, pos.ticket, target
                    );
                    ctx.break_even_done.insert(pos.ticket);
                    report.break_even_moves += 1;
                }
                Err(e) => warn!("{}: break-even modify failed for #{}: {:#}", ctx.symbol, pos.ticket, e),
            }
        }
    }
}

/// Looks for a quotable pair linking the two currencies.
async fn resolve_conversion(
    market: &mut dyn Exchange,
    profit_currency: &str,
    account_currency: &str,
) -> TickConversion {
    if same_currency(profit_currency, account_currency) {
        return TickConversion::Native;
    }
    for candidate in candidate_pairs(profit_currency, account_currency) {
        let Ok(quote) = market.quote(&candidate.symbol).await else {
            continue;
        };
        if let Some(rate) = candidate.rate_from(&quote) {
            debug!(
                "{} -> {} via {} at {:.6}",
                profit_currency, account_currency, candidate.symbol, rate
            );
            return TickConversion::Rate {
                pair: candidate.symbol,
                rate,
            };
        }
    }
    TickConversion::Unavailable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderRequest;
    use crate::models::{AccountSnapshot, Candle, CandleSeries, Quote};
    use crate::test_helpers::{base_time, default_test_config, eurusd_profile};
    use crate::trading::trade_record::ClosedTradeOutcome;
    use async_trait::async_trait;
    use chrono::Duration;

    /// Feed whose candles are set directly by the test.
    struct ScriptedMarket {
        h4: Vec<Candle>,
        m5: Vec<Candle>,
        quote: Quote,
        extra_quotes: Vec<(String, Quote)>,
        profile: SymbolRiskProfile,
        m5_fetches: usize,
        /// 1-based index of the 5m fetch that fails.
        fail_m5_fetch: Option<usize>,
    }

    #[async_trait]
    impl Exchange for ScriptedMarket {
        async fn fetch_candles(
            &mut self,
            _symbol: &str,
            tf: Timeframe,
            limit: usize,
        ) -> Result<CandleSeries> {
            if tf != Timeframe::H4 {
                self.m5_fetches += 1;
                if self.fail_m5_fetch == Some(self.m5_fetches) {
                    anyhow::bail!("feed timed out");
                }
            }
            let all = if tf == Timeframe::H4 { &self.h4 } else { &self.m5 };
            let start = all.len().saturating_sub(limit);
            Ok(CandleSeries::new(all[start..].to_vec()))
        }
        async fn quote(&mut self, symbol: &str) -> Result<Quote> {
            if symbol == self.profile.symbol {
                return Ok(self.quote);
            }
            self.extra_quotes
                .iter()
                .find(|(s, _)| s == symbol)
                .map(|(_, q)| *q)
                .ok_or_else(|| anyhow::anyhow!("unknown symbol {}", symbol))
        }
        async fn risk_profile(&mut self, _symbol: &str) -> Result<SymbolRiskProfile> {
            Ok(self.profile.clone())
        }
        async fn next_cycle(&mut self) -> Option<DateTime<Utc>> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        orders: Vec<OrderRequest>,
        reject: bool,
        positions: Vec<OpenPosition>,
        outcomes: Vec<ClosedTradeOutcome>,
        modified: Vec<(u64, f64)>,
    }

    #[async_trait]
    impl ExecutionGateway for RecordingGateway {
        async fn place_order(&mut self, req: OrderRequest) -> Result<OrderOutcome> {
            if self.reject {
                return Ok(OrderOutcome::Rejected {
                    reason: "market closed".into(),
                });
            }
            self.orders.push(req);
            Ok(OrderOutcome::Placed {
                ticket: self.orders.len() as u64,
            })
        }
        async fn modify_order(&mut self, ticket: u64, stop_loss: f64, _tp: f64) -> Result<()> {
            self.modified.push((ticket, stop_loss));
            Ok(())
        }
        async fn open_positions(&mut self, _symbol: &str) -> Result<Vec<OpenPosition>> {
            Ok(self.positions.clone())
        }
        async fn closed_trade_outcomes(
            &mut self,
            _symbol: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ClosedTradeOutcome>> {
            Ok(self
                .outcomes
                .iter()
                .filter(|o| o.closed_at >= since)
                .cloned()
                .collect())
        }
        async fn account_snapshot(&mut self) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot {
                balance: 10_000.0,
                currency: "USD".into(),
            })
        }
    }

    fn h4_range() -> Candle {
        Candle {
            timestamp: base_time() - Duration::hours(4),
            open: 1.10300,
            high: 1.10450,
            low: 1.10200,
            close: 1.10400,
            volume: 5000.0,
            timeframe: Timeframe::H4,
        }
    }

    fn m5(index: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            timestamp: base_time() + Duration::minutes(5 * index),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
            timeframe: Timeframe::M5,
        }
    }

    fn market() -> ScriptedMarket {
        ScriptedMarket {
            h4: vec![h4_range()],
            m5: vec![m5(0, 1.10300, 1.10320, 1.10280, 1.10310)],
            quote: Quote {
                bid: 1.10259,
                ask: 1.10260,
            },
            extra_quotes: Vec::new(),
            profile: eurusd_profile(),
            m5_fetches: 0,
            fail_m5_fetch: None,
        }
    }

    fn engine_and_context() -> (ReversalEngine, SymbolContext) {
        let cfg = default_test_config();
        let engine = ReversalEngine::new(&cfg).unwrap();
        let ctx = engine.new_context(&cfg, "EURUSD");
        (engine, ctx)
    }

    /// Breakout, a bullish breaching candle, then the reversal close.
    fn scenario_candles() -> Vec<Candle> {
        vec![
            m5(1, 1.10250, 1.10260, 1.10140, 1.10150),
            m5(2, 1.10130, 1.10180, 1.10120, 1.10170),
            m5(3, 1.10170, 1.10270, 1.10160, 1.10260),
        ]
    }

    async fn run_scenario(
        engine: &ReversalEngine,
        ctx: &mut SymbolContext,
        mkt: &mut ScriptedMarket,
        gw: &mut RecordingGateway,
    ) -> CycleReport {
        let mut last = engine.run_cycle(ctx, mkt, gw).await;
        for c in scenario_candles() {
            mkt.m5.push(c);
            last = engine.run_cycle(ctx, mkt, gw).await;
        }
        last
    }

    #[tokio::test]
    async fn full_long_reversal_places_order() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let mut gw = RecordingGateway::default();

        let report = run_scenario(&engine, &mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(report.placed.len(), 1, "aborts: {:?}", report.aborts);
        let order = &gw.orders[0];
        assert_eq!(order.side, Direction::Long);
        assert!((order.entry_hint - 1.10260).abs() < 1e-9);
        assert!((order.stop_loss - 1.10098).abs() < 1e-9);
        assert!((order.take_profit - 1.10584).abs() < 1e-9);
        assert!(order.volume > 0.0);
        assert!(ctx.state(Direction::Long).is_idle());
    }

    #[tokio::test]
    async fn rejection_resets_without_retry() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let mut gw = RecordingGateway {
            reject: true,
            ..Default::default()
        };
        let report = run_scenario(&engine, &mut ctx, &mut mkt, &mut gw).await;
        assert!(report.placed.is_empty());
        assert_eq!(report.aborts[0].kind(), "gateway_rejection");
        assert!(ctx.state(Direction::Long).is_idle());

        // The same candle set again yields no new attempt
        let again = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(!again.new_candle);
        assert!(again.aborts.is_empty());
    }

    #[tokio::test]
    async fn failed_signal_fetch_retries_same_candle() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let mut gw = RecordingGateway::default();
        engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(ctx.last_candle(), Some(base_time()));

        mkt.m5.push(scenario_candles()[0].clone());
        mkt.fail_m5_fetch = Some(2);
        let failed = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(failed.aborts.len(), 1);
        assert_eq!(failed.aborts[0].kind(), "data_unavailable");
        assert!(!failed.new_candle);
        assert_eq!(ctx.last_candle(), Some(base_time()));
        assert!(ctx.state(Direction::Long).is_idle());

        // Next cycle evaluates the breakout candle that was missed
        let retried = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(retried.new_candle);
        assert!(retried.aborts.is_empty());
        assert!(retried
            .transitions
            .contains(&(Direction::Long, Transition::BreakoutConfirmed)));
        assert_eq!(ctx.last_candle(), Some(base_time() + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn failed_extremum_fetch_resets_side_without_order() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        // Four signal fetches, then the extremum fetch of the reversal cycle
        mkt.fail_m5_fetch = Some(5);
        let mut gw = RecordingGateway::default();

        let report = run_scenario(&engine, &mut ctx, &mut mkt, &mut gw).await;
        assert!(report
            .transitions
            .contains(&(Direction::Long, Transition::ReversalConfirmed)));
        assert!(report.placed.is_empty());
        assert_eq!(report.aborts.len(), 1);
        assert_eq!(report.aborts[0].kind(), "data_unavailable");
        assert!(gw.orders.is_empty());
        assert!(ctx.state(Direction::Long).is_idle());

        let again = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(!again.new_candle);
        assert!(gw.orders.is_empty());
    }

    #[tokio::test]
    async fn open_position_blocks_its_side() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let mut gw = RecordingGateway {
            positions: vec![OpenPosition {
                ticket: 9,
                symbol: "EURUSD".into(),
                side: Direction::Long,
                volume: 0.1,
                entry_price: 1.1030,
                stop_loss: 1.1010,
                take_profit: 1.1070,
                initial_stop: 1.1010,
                opened_at: base_time(),
            }],
            ..Default::default()
        };
        run_scenario(&engine, &mut ctx, &mut mkt, &mut gw).await;
        assert!(gw.orders.is_empty());
        assert!(ctx.state(Direction::Long).is_idle());
    }

    #[tokio::test]
    async fn wide_spread_aborts_signal() {
        let mut cfg = default_test_config();
        cfg.max_spread_points = 5.0;
        let engine = ReversalEngine::new(&cfg).unwrap();
        let mut ctx = engine.new_context(&cfg, "EURUSD");
        let mut mkt = market();
        mkt.quote = Quote {
            bid: 1.10250,
            ask: 1.10260,
        };
        let mut gw = RecordingGateway::default();
        let report = run_scenario(&engine, &mut ctx, &mut mkt, &mut gw).await;
        assert!(gw.orders.is_empty());
        assert_eq!(report.aborts[0].kind(), "spread_too_wide");
    }

    #[tokio::test]
    async fn range_rotation_resets_pending_breakout() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let mut gw = RecordingGateway::default();
        engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        mkt.m5.push(scenario_candles()[0].clone());
        engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(!ctx.state(Direction::Long).is_idle());

        mkt.h4.push(Candle {
            timestamp: base_time(),
            ..h4_range()
        });
        // Would complete the stale reversal if the state had survived
        mkt.m5.push(m5(2, 1.10250, 1.10300, 1.10240, 1.10280));
        let report = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(report.range_rotated);
        assert!(ctx.state(Direction::Long).is_idle());
        assert!(gw.orders.is_empty());
    }

    #[tokio::test]
    async fn losing_outcomes_tighten_filters() {
        let (engine, mut ctx) = engine_and_context();
        let mut mkt = market();
        let outcomes = (1..=3)
            .map(|i| ClosedTradeOutcome {
                position_id: i,
                symbol: "EURUSD".into(),
                net_pnl: -50.0,
                closed_at: base_time() + Duration::minutes(i as i64),
            })
            .collect();
        let mut gw = RecordingGateway {
            outcomes,
            ..Default::default()
        };
        let report = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(report.mode_changes.len(), 1);
        assert_eq!(ctx.filter_mode(), FilterMode::Tightened);
        assert_eq!(ctx.adaptive().active_toggles(), FilterToggles::ALL_ON);

        // Re-reading the same history changes nothing
        let again = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert!(again.mode_changes.is_empty());
        assert_eq!(ctx.adaptive().state().consecutive_losses, 3);
    }

    #[tokio::test]
    async fn break_even_moves_stop_once() {
        let mut cfg = default_test_config();
        cfg.break_even.enabled = true;
        cfg.break_even.trigger_r = 1.0;
        cfg.break_even.offset_points = 10.0;
        let engine = ReversalEngine::new(&cfg).unwrap();
        let mut ctx = engine.new_context(&cfg, "EURUSD");
        let mut mkt = market();
        mkt.quote = Quote {
            bid: 1.10450,
            ask: 1.10451,
        };
        let mut gw = RecordingGateway {
            positions: vec![OpenPosition {
                ticket: 4,
                symbol: "EURUSD".into(),
                side: Direction::Long,
                volume: 0.1,
                entry_price: 1.10300,
                stop_loss: 1.10200,
                take_profit: 1.10600,
                initial_stop: 1.10200,
                opened_at: base_time(),
            }],
            ..Default::default()
        };
        let report = engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(report.break_even_moves, 1);
        assert_eq!(gw.modified.len(), 1);
        assert!((gw.modified[0].1 - 1.10310).abs() < 1e-9);

        engine.run_cycle(&mut ctx, &mut mkt, &mut gw).await;
        assert_eq!(gw.modified.len(), 1);
    }

    #[tokio::test]
    async fn conversion_uses_inverse_pair() {
        let mut mkt = market();
        mkt.extra_quotes.push((
            "USDJPY".into(),
            Quote {
                bid: 150.0,
                ask: 150.0,
            },
        ));
        let conv = resolve_conversion(&mut mkt, "JPY", "USD").await;
        match conv {
            TickConversion::Rate { pair, rate } => {
                assert_eq!(pair, "USDJPY");
                assert!((rate - 1.0 / 150.0).abs() < 1e-12);
            }
            other => panic!("expected rate, got {:?}", other),
        }
        let missing = resolve_conversion(&mut mkt, "CHF", "USD").await;
        assert!(missing.is_degraded());
        assert_eq!(
            resolve_conversion(&mut mkt, "usd", "USD").await,
            TickConversion::Native
        );
    }
}
