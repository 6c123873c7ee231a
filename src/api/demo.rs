//! Demo payloads served by the dashboard endpoints
//!
//! Literal baselines, optionally with bounded random jitter. Nothing here is
//! computed from real market data.

use chrono::{Duration, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

/// `baseline` moved by a uniform offset in `[-bound, bound]`
pub fn jittered<R: Rng + ?Sized>(rng: &mut R, baseline: f64, bound: f64) -> f64 {
    if bound <= 0.0 {
        return baseline;
    }
    baseline + rng.gen_range(-bound..=bound)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStats {
    pub portfolio_value: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub total_return_pct: f64,
    pub active_positions: u32,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub ai_confidence: f64,
    pub market_regime: &'static str,
}

pub fn dashboard_stats(baseline: f64) -> DashboardStats {
    DashboardStats {
        portfolio_value: baseline,
        daily_pnl: 1_250.50,
        daily_pnl_pct: 1.01,
        total_return_pct: 25.0,
        active_positions: 8,
        win_rate: 0.68,
        sharpe_ratio: 1.85,
        max_drawdown: -8.2,
        ai_confidence: 0.78,
        market_regime: "bullish",
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefreshPayload {
    pub success: bool,
    pub portfolio_value: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

pub fn refresh<R: Rng + ?Sized>(rng: &mut R, baseline: f64, bound: f64) -> RefreshPayload {
    RefreshPayload {
        success: true,
        portfolio_value: jittered(rng, baseline, bound),
        timestamp: Utc::now(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Allocation {
    pub symbol: &'static str,
    pub name: &'static str,
    pub weight: f64,
    pub target_weight: f64,
    pub value: f64,
}

pub fn allocations(baseline: f64) -> Vec<Allocation> {
    const HOLDINGS: &[(&str, &str, f64, f64)] = &[
        ("SPY", "SPDR S&P 500 ETF", 0.30, 0.30),
        ("QQQ", "Invesco QQQ Trust", 0.20, 0.20),
        ("VTI", "Vanguard Total Stock Market ETF", 0.15, 0.15),
        ("IWM", "iShares Russell 2000 ETF", 0.10, 0.10),
        ("GLD", "SPDR Gold Shares", 0.10, 0.10),
        ("TLT", "iShares 20+ Year Treasury Bond ETF", 0.10, 0.10),
        ("CASH", "Cash", 0.05, 0.05),
    ];

    HOLDINGS
        .iter()
        .map(|&(symbol, name, weight, target_weight)| Allocation {
            symbol,
            name,
            weight,
            target_weight,
            value: round2(baseline * weight),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformancePoint {
    pub date: NaiveDate,
    pub portfolio_value: f64,
}

/// One point per day ending today, oldest first
pub fn performance<R: Rng + ?Sized>(
    rng: &mut R,
    days: u32,
    baseline: f64,
    bound: f64,
) -> Vec<PerformancePoint> {
    let today = Utc::now().date_naive();

    (0..days)
        .rev()
        .map(|days_ago| PerformancePoint {
            date: today - Duration::days(i64::from(days_ago)),
            portfolio_value: round2(jittered(rng, baseline, bound)).clamp(baseline - bound, baseline + bound),
        })
        .collect()
}

pub fn ai_insights() -> Value {
    json!([
        {
            "id": "insight-1",
            "category": "market",
            "title": "Broad market momentum remains positive",
            "description": "Large-cap ETFs continue to trade above their 50-day averages.",
            "confidence": 0.78,
            "impact": "medium",
        },
        {
            "id": "insight-2",
            "category": "risk",
            "title": "Small-cap volatility elevated",
            "description": "IWM realized volatility is above its 3-month median.",
            "confidence": 0.65,
            "impact": "low",
        },
        {
            "id": "insight-3",
            "category": "allocation",
            "title": "Portfolio within target weights",
            "description": "No holding deviates more than 2% from its target weight.",
            "confidence": 0.9,
            "impact": "low",
        },
    ])
}

pub fn etf_universe() -> Value {
    json!([
        { "symbol": "SPY", "name": "SPDR S&P 500 ETF", "category": "US Large Cap", "expense_ratio": 0.0945 },
        { "symbol": "QQQ", "name": "Invesco QQQ Trust", "category": "US Large Cap Growth", "expense_ratio": 0.20 },
        { "symbol": "VTI", "name": "Vanguard Total Stock Market ETF", "category": "US Total Market", "expense_ratio": 0.03 },
        { "symbol": "IWM", "name": "iShares Russell 2000 ETF", "category": "US Small Cap", "expense_ratio": 0.19 },
        { "symbol": "EFA", "name": "iShares MSCI EAFE ETF", "category": "International Developed", "expense_ratio": 0.33 },
        { "symbol": "EEM", "name": "iShares MSCI Emerging Markets ETF", "category": "Emerging Markets", "expense_ratio": 0.70 },
        { "symbol": "GLD", "name": "SPDR Gold Shares", "category": "Commodities", "expense_ratio": 0.40 },
        { "symbol": "TLT", "name": "iShares 20+ Year Treasury Bond ETF", "category": "US Treasuries", "expense_ratio": 0.15 },
    ])
}

pub fn etf_opportunities() -> Value {
    json!([
        {
            "symbol": "EFA",
            "action": "BUY",
            "score": 0.72,
            "reason": "Valuation discount to US large caps",
        },
        {
            "symbol": "TLT",
            "action": "HOLD",
            "score": 0.55,
            "reason": "Rate outlook unclear",
        },
        {
            "symbol": "EEM",
            "action": "WATCH",
            "score": 0.48,
            "reason": "Momentum improving from a low base",
        },
    ])
}

pub fn etf_analysis(symbol: &str) -> Value {
    let symbol = symbol.to_uppercase();

    json!({
        "symbol": symbol,
        "recommendation": "HOLD",
        "score": 0.6,
        "trend": "sideways",
        "volatility": "moderate",
        "support": null,
        "resistance": null,
        "summary": format!("No model-backed analysis is available for {}.", symbol),
    })
}
