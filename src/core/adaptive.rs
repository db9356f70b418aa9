use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::CategoryProfile;
use crate::core::filters::FilterToggles;
use crate::models::FilterMode;
use crate::trading::trade_record::ClosedTradeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub from: FilterMode,
    pub to: FilterMode,
}

/// Receives each closed trade exactly once.
pub trait TradeOutcomeListener {
    fn on_trade_closed(&mut self, outcome: &ClosedTradeOutcome) -> Option<ModeChange>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveState {
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub mode: FilterMode,
    pub baseline: FilterToggles,
}

impl AdaptiveState {
    pub fn new(baseline: FilterToggles) -> Self {
        Self {
            consecutive_wins: 0,
            consecutive_losses: 0,
            mode: FilterMode::Relaxed,
            baseline,
        }
    }
}

/// Streak-driven switch between the baseline filters and a tightened
/// mode with every filter on.
pub struct AdaptiveController {
    pub symbol: String,
    pub loss_threshold: u32,
    pub win_recovery_threshold: u32,
    state: AdaptiveState,
    /// Close time of the newest processed trade. Outcomes must arrive in
    /// close-time order; anything closed earlier counts as seen.
    watermark: Option<DateTime<Utc>>,
    /// Ids processed at exactly `watermark`.
    processed: HashSet<u64>,
    state_file: Option<PathBuf>,
}

impl AdaptiveController {
    pub fn new(symbol: &str, profile: &CategoryProfile, baseline: FilterToggles) -> Self {
        Self {
            symbol: symbol.to_string(),
            loss_threshold: profile.loss_threshold.max(1),
            win_recovery_threshold: profile.win_recovery_threshold.max(1),
            state: AdaptiveState::new(baseline),
            watermark: None,
            processed: HashSet::new(),
            state_file: None,
        }
    }

    /// Persists to `{dir}/adaptive_{symbol}.json`, restoring any saved
    /// streaks. The configured baseline always wins over a saved one.
    pub fn with_persistence(mut self, dir: &str) -> Self {
        let path = Path::new(dir).join(format!("adaptive_{}.json", self.symbol));
        self.state_file = Some(path);
        self.load_state();
        self
    }

    pub fn state(&self) -> &AdaptiveState {
        &self.state
    }

    pub fn mode(&self) -> FilterMode {
        self.state.mode
    }

    pub fn active_toggles(&self) -> FilterToggles {
        match self.state.mode {
            FilterMode::Tightened => FilterToggles::ALL_ON,
            FilterMode::Relaxed => self.state.baseline,
        }
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub fn is_processed(&self, outcome: &ClosedTradeOutcome) -> bool {
        self.watermark.is_some_and(|w| outcome.closed_at < w)
            || self.processed.contains(&outcome.position_id)
    }

    fn mark_processed(&mut self, outcome: &ClosedTradeOutcome) {
        if self.watermark != Some(outcome.closed_at) {
            self.watermark = Some(outcome.closed_at);
            self.processed.clear();
        }
        self.processed.insert(outcome.position_id);
    }

    fn record(&mut self, outcome: &ClosedTradeOutcome) -> Option<ModeChange> {
        let st = &mut self.state;
        if outcome.is_win() {
            st.consecutive_wins += 1;
            st.consecutive_losses = 0;
        } else {
            st.consecutive_losses += 1;
            st.consecutive_wins = 0;
        }

        let from = st.mode;
        match st.mode {
            FilterMode::Relaxed if st.consecutive_losses >= self.loss_threshold => {
                st.mode = FilterMode::Tightened;
            }
            FilterMode::Tightened if st.consecutive_wins >= self.win_recovery_threshold => {
                st.mode = FilterMode::Relaxed;
            }
            _ => {}
        }

        debug!(
            "{} adaptive: trade #{} pnl={:.2} wins={} losses={}",
            self.symbol, outcome.position_id, outcome.net_pnl, st.consecutive_wins, st.consecutive_losses
        );

        (st.mode != from).then(|| {
            info!(
                "{} filters {} -> {} after {} consecutive {}",
                self.symbol,
                from,
                st.mode,
                st.consecutive_losses.max(st.consecutive_wins),
                if outcome.is_win() { "wins" } else { "losses" }
            );
            ModeChange { from, to: st.mode }
        })
    }

    fn save_state(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let mut processed: Vec<u64> = self.processed.iter().copied().collect();
        processed.sort_unstable();
        let state = serde_json::json!({
            "consecutive_wins": self.state.consecutive_wins,
            "consecutive_losses": self.state.consecutive_losses,
            "mode": self.state.mode,
            "watermark": self.watermark,
            "processed": processed,
        });

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&state) {
            let _ = fs::write(path, json);
        }
    }

    fn load_state(&mut self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let Ok(content) = fs::read_to_string(path) else {
            return;
        };
        let Ok(state) = serde_json::from_str::<serde_json::Value>(&content) else {
            return;
        };
        self.state.consecutive_wins = state["consecutive_wins"].as_u64().unwrap_or(0) as u32;
        self.state.consecutive_losses = state["consecutive_losses"].as_u64().unwrap_or(0) as u32;
        if let Ok(mode) = serde_json::from_value::<FilterMode>(state["mode"].clone()) {
            self.state.mode = mode;
        }
        if let Ok(watermark) = serde_json::from_value(state["watermark"].clone()) {
            self.watermark = watermark;
        }
        if let Some(ids) = state["processed"].as_array() {
            self.processed = ids.iter().filter_map(|v| v.as_u64()).collect();
        }
        info!(
            "{} adaptive state restored: mode={} wins={} losses={}",
            self.symbol, self.state.mode, self.state.consecutive_wins, self.state.consecutive_losses
        );
    }
}

impl TradeOutcomeListener for AdaptiveController {
    fn on_trade_closed(&mut self, outcome: &ClosedTradeOutcome) -> Option<ModeChange> {
        if self.is_processed(outcome) {
            return None;
        }
        self.mark_processed(outcome);
        let change = self.record(outcome);
        self.save_state();
        change
    }
}
