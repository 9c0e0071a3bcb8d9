use serde::{Deserialize, Serialize};

use crate::execution::PerformanceSummary;
use crate::models::{OrderResult, OrderSide};

/// Record of a single round-trip for analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub holding_period_minutes: i64,
    pub commission: f64, // Entry + exit fees
    pub net_pnl: f64,
}

impl TradeRecord {
    /// Pair each filled sell with the buy before it
    pub fn from_orders(orders: &[OrderResult]) -> Vec<Self> {
        let mut trades = Vec::new();
        let mut entry: Option<&OrderResult> = None;

        for order in orders.iter().filter(|o| o.success) {
            match order.side {
                OrderSide::Buy => entry = Some(order),
                OrderSide::Sell => {
                    let Some(buy) = entry.take() else { continue };
                    let pnl = order.quantity * (order.price - buy.price);
                    let commission = buy.commission + order.commission;
                    trades.push(Self {
                        entry_time: buy.timestamp,
                        exit_time: order.timestamp,
                        entry_price: buy.price,
                        exit_price: order.price,
                        quantity: order.quantity,
                        pnl,
                        pnl_pct: (order.price - buy.price) / buy.price * 100.0,
                        holding_period_minutes: (order.timestamp - buy.timestamp) / 60_000,
                        commission,
                        net_pnl: pnl - commission,
                    });
                }
            }
        }

        trades
    }
}

/// Equity after one bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
}

/// Complete backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L
    pub total_pnl: f64, // Realized, before commission
    pub total_return_pct: f64,
    pub initial_portfolio_value: f64,
    pub final_portfolio_value: f64,

    // Trade statistics
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,

    // P&L distribution
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / Total losses

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    // Costs
    pub total_commission: f64,
    pub net_pnl: f64,

    /// Orders refused by the local ledger
    pub rejected_orders: usize,

    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestMetrics {
    pub fn from_run(
        summary: &PerformanceSummary,
        orders: &[OrderResult],
        equity_curve: Vec<EquityPoint>,
        rejected_orders: usize,
    ) -> Self {
        let trades = TradeRecord::from_orders(orders);

        let wins: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p <= 0.0).collect();

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|p| p.abs()).sum();

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            total_wins / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            total_losses / losses.len() as f64
        };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) =
            Self::calculate_drawdown(&equity_curve, summary.initial_capital);

        let stats = &summary.trades;
        Self {
            total_pnl: stats.realized_pnl,
            total_return_pct: summary.total_return * 100.0,
            initial_portfolio_value: summary.initial_capital,
            final_portfolio_value: summary.equity,
            total_trades: stats.total_trades,
            winning_trades: stats.winning_trades,
            losing_trades: stats.losing_trades,
            win_rate: summary.win_rate * 100.0,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            total_commission: stats.total_commission,
            net_pnl: stats.realized_pnl - stats.total_commission,
            rejected_orders,
            trades,
            equity_curve,
        }
    }

    /// Largest peak-to-trough fall of the equity curve, absolute and in %
    fn calculate_drawdown(curve: &[EquityPoint], initial_value: f64) -> (f64, f64) {
        let mut peak = initial_value;
        let mut max_dd = 0.0;
        let mut max_dd_pct = 0.0;

        for point in curve {
            if point.equity > peak {
                peak = point.equity;
            }

            let drawdown = peak - point.equity;
            if drawdown > max_dd {
                max_dd = drawdown;
                max_dd_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };
            }
        }

        (max_dd, max_dd_pct)
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n==================== BACKTEST REPORT ====================\n");

        println!("P&L SUMMARY");
        println!("  Initial Portfolio:     ${:.2}", self.initial_portfolio_value);
        println!("  Final Portfolio:       ${:.2}", self.final_portfolio_value);
        println!(
            "  Total Return:          {:+.2}%",
            self.total_return_pct
        );
        println!("  Realized P&L:          ${:.2}", self.total_pnl);
        println!("  Commission:            ${:.2}", self.total_commission);
        println!("  Net P&L:               ${:.2}", self.net_pnl);

        println!("\nTRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);
        println!("  Rejected Orders:       {}", self.rejected_orders);

        if self.total_trades > 0 {
            println!("\nWIN/LOSS ANALYSIS");
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Largest Win:           ${:.2}", self.largest_win);
            println!("  Largest Loss:          ${:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);
        }

        println!("\nRISK");
        println!(
            "  Max Drawdown:          ${:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );

        println!("\n=========================================================\n");
    }
}
