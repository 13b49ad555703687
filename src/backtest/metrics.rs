//! Performance metrics for completed backtest runs.

use crate::models::Trade;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::BTreeMap;

/// Compute summary metrics from the trade log.
///
/// Always includes `total_trades`, `total_return`, and `total_fees`. With at
/// least one trade also includes `win_rate`, `profit_factor` (zero when
/// there are no losing trades), `max_drawdown` over the trade-sequence
/// equity curve, and `sharpe_ratio` over per-trade returns (zero below two
/// trades or with zero dispersion).
pub fn calculate_metrics(
    trades: &[Trade],
    initial_capital: Decimal,
    final_capital: Decimal,
) -> BTreeMap<String, Decimal> {
    let mut metrics = BTreeMap::new();

    let total_return = if initial_capital > Decimal::ZERO {
        (final_capital - initial_capital) / initial_capital
    } else {
        Decimal::ZERO
    };
    metrics.insert("total_trades".to_string(), Decimal::from(trades.len()));
    metrics.insert("total_return".to_string(), total_return);
    metrics.insert(
        "total_fees".to_string(),
        trades.iter().map(|t| t.entry_fee + t.exit_fee).sum(),
    );

    if trades.is_empty() {
        return metrics;
    }

    let pnls: Vec<Decimal> = trades.iter().map(Trade::pnl).collect();
    let wins = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
    metrics.insert(
        "win_rate".to_string(),
        Decimal::from(wins) / Decimal::from(trades.len()),
    );

    let gross_profit: Decimal = pnls.iter().filter(|p| **p > Decimal::ZERO).sum();
    let gross_loss: Decimal = -pnls.iter().filter(|p| **p < Decimal::ZERO).sum::<Decimal>();
    let profit_factor = if gross_loss > Decimal::ZERO {
        gross_profit / gross_loss
    } else {
        Decimal::ZERO
    };
    metrics.insert("profit_factor".to_string(), profit_factor);

    metrics.insert(
        "max_drawdown".to_string(),
        max_drawdown(&pnls, initial_capital),
    );
    metrics.insert("sharpe_ratio".to_string(), sharpe_ratio(trades));

    metrics
}

/// Largest peak-to-trough equity decline, as a fraction of the peak.
fn max_drawdown(pnls: &[Decimal], initial_capital: Decimal) -> Decimal {
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut worst = Decimal::ZERO;
    for pnl in pnls {
        equity += *pnl;
        if equity > peak {
            peak = equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - equity) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Mean over standard deviation of per-trade returns.
fn sharpe_ratio(trades: &[Trade]) -> Decimal {
    if trades.len() < 2 {
        return Decimal::ZERO;
    }
    let returns: Vec<Decimal> = trades.iter().map(Trade::pnl_pct).collect();
    let n = Decimal::from(returns.len());
    let mean: Decimal = returns.iter().sum::<Decimal>() / n;
    let variance: Decimal = returns
        .iter()
        .map(|r| (*r - mean) * (*r - mean))
        .sum::<Decimal>()
        / n;
    match variance.sqrt() {
        Some(std) if std > Decimal::ZERO => mean / std,
        _ => Decimal::ZERO,
    }
}
