//! Portfolio construction
//!
//! Deterministic: "110 minus age" equity rule with a risk shift, then a
//! fixed ETF split. The profile is read from the incoming context.

use super::market::QuoteProvider;
use super::Stage;
use crate::error::Result;
use crate::models::{Allocation, Context, EtfPosition, Intent, PortfolioRecommendation, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Positions at or below this weight are dropped
const MIN_WEIGHT: f64 = 0.01;

pub struct PortfolioBuilder {
    quotes: Option<Arc<dyn QuoteProvider>>,
}

impl PortfolioBuilder {
    pub fn new(quotes: Option<Arc<dyn QuoteProvider>>) -> Self {
        Self { quotes }
    }

    async fn price_of(&self, ticker: &str) -> f64 {
        let Some(quotes) = &self.quotes else {
            return 0.0;
        };
        match quotes.snapshot(ticker).await {
            Ok(snapshot) => snapshot.price,
            Err(e) => {
                warn!(ticker = ticker, error = %e, "Quote unavailable, reporting 0.0");
                0.0
            }
        }
    }
}

fn age_from_range(age_range: &str) -> u32 {
    match age_range {
        "young" => 30,
        "middle-aged" => 45,
        "senior" => 65,
        _ => 40,
    }
}

fn risk_shift(risk: &str) -> f64 {
    match risk {
        "aggressive" => 0.10,
        "conservative" => -0.10,
        _ => 0.0,
    }
}

pub fn equity_allocation(age: u32, risk: &str) -> f64 {
    let base = ((110.0 - age as f64) / 100.0).clamp(0.1, 0.9);
    (base + risk_shift(risk)).clamp(0.1, 0.9)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Target weights before pricing
pub fn select_etfs(equity: f64, bonds: f64) -> Vec<(&'static str, f64)> {
    [
        ("SPY", equity * 0.60),
        ("IEFA", equity * 0.20),
        ("VWO", equity * 0.20),
        ("AGG", bonds * 0.70),
        ("SHY", bonds * 0.30),
    ]
    .into_iter()
    .filter(|(_, weight)| *weight > MIN_WEIGHT)
    .collect()
}

#[async_trait]
impl Stage for PortfolioBuilder {
    fn name(&self) -> &'static str {
        "portfolio_builder"
    }

    fn intent(&self) -> Intent {
        Intent::PortfolioCreation
    }

    async fn apply(&self, context: &Context) -> Result<StageOutput> {
        let age_range = context.get_str("age_range").unwrap_or("middle-aged");
        let risk = context.get_str("risk_tolerance").unwrap_or("moderate");
        let horizon = context.get_str("investment_horizon").unwrap_or("medium");
        let age = age_from_range(age_range);

        let equity = equity_allocation(age, risk);
        let bonds = 1.0 - equity;
        let allocation = Allocation {
            equity: round_to(equity, 3),
            bonds: round_to(bonds, 3),
        };

        let mut etf_selection = Vec::new();
        for (ticker, weight) in select_etfs(equity, bonds) {
            etf_selection.push(EtfPosition {
                ticker: ticker.to_string(),
                weight: round_to(weight, 4),
                price: self.price_of(ticker).await,
            });
        }

        let builder_reasoning = format!(
            "Applied the 110-age rule for a {} risk investor aged ~{} with {}-term horizon. \
             Target allocation: {:.0}% equity / {:.0}% bonds, implemented via {} diversified low-cost ETFs.",
            risk,
            age,
            horizon,
            allocation.equity * 100.0,
            allocation.bonds * 100.0,
            etf_selection.len()
        );

        Ok(StageOutput::Portfolio(PortfolioRecommendation {
            recommended_allocation: allocation,
            etf_selection,
            builder_reasoning,
        }))
    }
}
