//! Offline replay of recorded ticks through a prediction-market strategy.
//!
//! Each market's ticks become a bucketed snapshot series (one 5-minute
//! window per market). Snapshots feed the strategy; entries are sized with
//! fractional Kelly against a paper portfolio; whatever is still open at
//! the window end resolves at 1 or 0 based on the final YES price.

use crate::bot::kelly::{estimated_probability, kelly_fraction};
use crate::bot::models::{MarketSnapshot, Outcome, PaperTrade, PaperTradingResult};
use crate::bot::portfolio::PaperPortfolio;
use crate::bot::PredictionMarketStrategy;
use crate::collector::repository::TickRepository;
use crate::collector::snapshot_builder::SnapshotBuilder;
use crate::models::{Side, Signal};
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

const HALF: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const MS_PER_SECOND: i64 = 1000;

pub struct TickReplay {
    initial_capital: Decimal,
    max_position_pct: Decimal,
    kelly_fraction: Decimal,
    bucket_seconds: i64,
}

impl TickReplay {
    pub fn new(
        initial_capital: Decimal,
        max_position_pct: Decimal,
        kelly_fraction: Decimal,
        bucket_seconds: i64,
    ) -> Self {
        Self {
            initial_capital,
            max_position_pct,
            kelly_fraction,
            bucket_seconds,
        }
    }

    /// Replay every market with ticks in `[start_ms, end_ms]`.
    pub fn run(
        &self,
        repository: &TickRepository,
        strategy: &mut dyn PredictionMarketStrategy,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<PaperTradingResult> {
        let builder = SnapshotBuilder::new(self.bucket_seconds)?;
        let mut portfolio = PaperPortfolio::new(self.initial_capital, self.max_position_pct);
        let mut position_outcomes: HashMap<String, Outcome> = HashMap::new();
        let mut snapshots_processed: u64 = 0;
        let mut windows_processed: u64 = 0;
        let mut wins = 0u64;
        let mut losses = 0u64;

        let condition_ids = repository.get_distinct_condition_ids(start_ms, end_ms)?;
        info!(markets = condition_ids.len(), "replaying recorded windows");

        for condition_id in condition_ids {
            let ticks = repository.get_ticks_by_condition(&condition_id, start_ms, end_ms)?;
            if ticks.is_empty() {
                continue;
            }
            let window = builder.detect_window(&condition_id, &ticks)?;
            let snapshots = builder.build_snapshots(&ticks, &window)?;

            let mut history: Vec<MarketSnapshot> = Vec::with_capacity(snapshots.len());
            for snapshot in &snapshots {
                snapshots_processed += 1;
                feed_snapshot_to_strategy(
                    snapshot,
                    &history,
                    strategy,
                    &mut portfolio,
                    self.kelly_fraction,
                    &mut position_outcomes,
                );
                history.push(snapshot.clone());
            }

            let final_yes = snapshots
                .last()
                .map(|s| s.yes_price)
                .unwrap_or(HALF);
            let mut final_prices = HashMap::new();
            final_prices.insert(condition_id.clone(), final_yes);
            let (window_wins, window_losses) = resolve_positions(
                &mut portfolio,
                &mut position_outcomes,
                &final_prices,
                window.end_ms / MS_PER_SECOND,
            );
            wins += window_wins;
            losses += window_losses;
            windows_processed += 1;
        }

        Ok(build_replay_result(
            strategy.name(),
            self.initial_capital,
            &portfolio,
            snapshots_processed,
            windows_processed,
            wins,
            losses,
        ))
    }
}

/// Feed one snapshot to the strategy and open a Kelly-sized position on a
/// signal. Markets with an open position are left alone.
pub fn feed_snapshot_to_strategy(
    snapshot: &MarketSnapshot,
    history: &[MarketSnapshot],
    strategy: &mut dyn PredictionMarketStrategy,
    portfolio: &mut PaperPortfolio,
    kelly_frac: Decimal,
    position_outcomes: &mut HashMap<String, Outcome>,
) -> Option<PaperTrade> {
    let signal: Signal = strategy.on_snapshot(snapshot, history)?;
    let condition_id = &snapshot.condition_id;
    if portfolio.positions().contains_key(condition_id) {
        return None;
    }

    let (buy_price, outcome) = match signal.side {
        Side::Buy => (snapshot.yes_price, Outcome::Yes),
        Side::Sell => (snapshot.no_price, Outcome::No),
    };

    let estimate = estimated_probability(buy_price, signal.strength);
    let fraction = kelly_fraction(estimate, buy_price, kelly_frac);
    if fraction <= Decimal::ZERO {
        return None;
    }
    let max_quantity = portfolio.max_quantity_for(buy_price);
    let quantity = (max_quantity * fraction).floor().max(Decimal::ONE);
    let edge = estimate - buy_price;

    let trade = portfolio.open_position(
        condition_id,
        outcome,
        Side::Buy,
        buy_price,
        quantity,
        snapshot.timestamp,
        &signal.reason,
        edge,
    );
    if trade.is_some() {
        position_outcomes.insert(condition_id.clone(), outcome);
        debug!(
            condition_id = %condition_id,
            outcome = %outcome,
            quantity = %quantity,
            price = %buy_price,
            "replay trade opened"
        );
    }
    trade
}

/// Close all open positions at resolution.
///
/// A final YES price above 0.5 means YES won: YES tokens resolve at 1 and
/// NO tokens at 0, and vice versa. Returns `(wins, losses)`.
pub fn resolve_positions(
    portfolio: &mut PaperPortfolio,
    position_outcomes: &mut HashMap<String, Outcome>,
    final_prices: &HashMap<String, Decimal>,
    resolve_ts: i64,
) -> (u64, u64) {
    let mut wins = 0u64;
    let mut losses = 0u64;

    let open: Vec<String> = portfolio.positions().keys().cloned().collect();
    for condition_id in open {
        let final_yes = final_prices.get(&condition_id).copied().unwrap_or(HALF);
        let yes_won = final_yes > HALF;
        let outcome = position_outcomes
            .remove(&condition_id)
            .unwrap_or(Outcome::Yes);
        let resolve_price = match (outcome, yes_won) {
            (Outcome::Yes, true) | (Outcome::No, false) => Decimal::ONE,
            _ => Decimal::ZERO,
        };

        let entry_price = portfolio.positions()[&condition_id].entry_price;
        if resolve_price > entry_price {
            wins += 1;
        } else if resolve_price < entry_price {
            losses += 1;
        }

        if portfolio
            .close_position(&condition_id, resolve_price, resolve_ts)
            .is_some()
        {
            debug!(
                condition_id = %condition_id,
                outcome = %outcome,
                resolve_price = %resolve_price,
                "resolved position"
            );
        }
    }
    (wins, losses)
}

fn build_replay_result(
    strategy_name: String,
    initial_capital: Decimal,
    portfolio: &PaperPortfolio,
    snapshots_processed: u64,
    windows_processed: u64,
    wins: u64,
    losses: u64,
) -> PaperTradingResult {
    let trades = portfolio.trades().to_vec();
    let final_capital = portfolio.total_equity();
    let entries = trades.iter().filter(|t| t.side == Side::Buy).count();

    let mut metrics = BTreeMap::new();
    metrics.insert("windows_processed".to_string(), Decimal::from(windows_processed));
    metrics.insert("total_trades".to_string(), Decimal::from(entries));
    metrics.insert("wins".to_string(), Decimal::from(wins));
    metrics.insert("losses".to_string(), Decimal::from(losses));
    if wins + losses > 0 {
        metrics.insert(
            "win_rate".to_string(),
            Decimal::from(wins) / Decimal::from(wins + losses),
        );
    }
    if entries > 0 {
        metrics.insert("total_return".to_string(), final_capital - initial_capital);
    }

    PaperTradingResult {
        strategy_name,
        initial_capital,
        final_capital,
        trades,
        snapshots_processed,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::models::Tick;
    use crate::strategies::LateSnipeStrategy;
    use rust_decimal_macros::dec;

    const WINDOW_START_MS: i64 = 1_771_761_600_000;

    fn tick(asset_id: &str, condition_id: &str, timestamp: i64, price: Decimal) -> Tick {
        Tick {
            asset_id: asset_id.to_string(),
            condition_id: condition_id.to_string(),
            price,
            size: dec!(1),
            side: "BUY".to_string(),
            fee_rate_bps: 0,
            timestamp,
            received_at: timestamp,
        }
    }

    fn replay() -> TickReplay {
        TickReplay::new(dec!(1000), dec!(0.1), dec!(0.25), 1)
    }

    #[test]
    fn test_replay_snipes_one_sided_window_and_wins() {
        let repository = TickRepository::open_memory().unwrap();
        // YES trades at 0.95 in the final minute and stays there, so the
        // snipe entry resolves as a win at 1.0.
        repository
            .save_ticks(&[
                tick("asset_a", "cond_a", WINDOW_START_MS + 10_000, dec!(0.60)),
                tick("asset_a", "cond_a", WINDOW_START_MS + 250_000, dec!(0.95)),
            ])
            .unwrap();

        let mut strategy = LateSnipeStrategy::new(dec!(0.90), 60).unwrap();
        let result = replay()
            .run(
                &repository,
                &mut strategy,
                WINDOW_START_MS,
                WINDOW_START_MS + 300_000,
            )
            .unwrap();

        assert_eq!(result.metrics["windows_processed"], dec!(1));
        assert_eq!(result.metrics["total_trades"], dec!(1));
        assert_eq!(result.metrics["wins"], dec!(1));
        assert!(result.final_capital > result.initial_capital);
    }

    #[test]
    fn test_replay_without_signal_leaves_capital_untouched() {
        let repository = TickRepository::open_memory().unwrap();
        // Balanced prices never cross the snipe threshold.
        repository
            .save_ticks(&[
                tick("asset_a", "cond_a", WINDOW_START_MS + 10_000, dec!(0.55)),
                tick("asset_a", "cond_a", WINDOW_START_MS + 290_000, dec!(0.52)),
            ])
            .unwrap();

        let mut strategy = LateSnipeStrategy::new(dec!(0.90), 60).unwrap();
        let result = replay()
            .run(
                &repository,
                &mut strategy,
                WINDOW_START_MS,
                WINDOW_START_MS + 300_000,
            )
            .unwrap();

        assert_eq!(result.metrics["total_trades"], dec!(0));
        assert_eq!(result.final_capital, result.initial_capital);
    }

    #[test]
    fn test_resolution_prices_follow_final_yes() {
        let mut portfolio = PaperPortfolio::new(dec!(1000), dec!(1));
        let mut outcomes = HashMap::new();

        portfolio
            .open_position(
                "cond_win",
                Outcome::Yes,
                Side::Buy,
                dec!(0.9),
                dec!(100),
                1000,
                "test",
                dec!(0.05),
            )
            .unwrap();
        outcomes.insert("cond_win".to_string(), Outcome::Yes);

        let mut final_prices = HashMap::new();
        final_prices.insert("cond_win".to_string(), dec!(0.97));
        let (wins, losses) = resolve_positions(&mut portfolio, &mut outcomes, &final_prices, 2000);

        assert_eq!((wins, losses), (1, 0));
        // 1000 - 90 entry cost + 100 at resolution
        assert_eq!(portfolio.capital(), dec!(1010.0));
    }

    #[test]
    fn test_no_side_position_loses_when_yes_wins() {
        let mut portfolio = PaperPortfolio::new(dec!(1000), dec!(1));
        let mut outcomes = HashMap::new();

        portfolio
            .open_position(
                "cond_lose",
                Outcome::No,
                Side::Buy,
                dec!(0.9),
                dec!(100),
                1000,
                "test",
                dec!(0.05),
            )
            .unwrap();
        outcomes.insert("cond_lose".to_string(), Outcome::No);

        let mut final_prices = HashMap::new();
        final_prices.insert("cond_lose".to_string(), dec!(0.97));
        let (wins, losses) = resolve_positions(&mut portfolio, &mut outcomes, &final_prices, 2000);

        assert_eq!((wins, losses), (0, 1));
        // The NO tokens expire worthless.
        assert_eq!(portfolio.capital(), dec!(910.0));
    }
}
