//! Market research for a single ticker

use super::Stage;
use crate::error::{OrchestrationError, Result};
use crate::llm::TextGenerator;
use crate::models::{Context, Intent, MarketResearch, Recommendation, StageOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Latest price and indicator readings for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub price: f64,
    pub change_pct: f64,
    pub rsi: f64,
    pub macd_signal: String,
}

/// Market data source
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

/// In-memory quotes for development and tests
#[derive(Default)]
pub struct StaticQuoteProvider {
    snapshots: HashMap<String, MarketSnapshot>,
}

impl StaticQuoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, symbol: &str, snapshot: MarketSnapshot) -> Self {
        self.snapshots.insert(symbol.to_uppercase(), snapshot);
        self
    }

    /// Fixed snapshots for offline runs; not market data
    pub fn with_sample_data() -> Self {
        let rows: &[(&str, f64, f64, f64, &str)] = &[
            ("AAPL", 189.40, 0.8, 58.2, "bullish"),
            ("MSFT", 415.10, 0.3, 61.0, "bullish"),
            ("TSLA", 242.10, -1.3, 27.5, "bearish"),
            ("NVDA", 875.30, 2.1, 72.4, "bullish"),
            ("SPY", 512.30, 0.4, 55.0, "neutral"),
            ("IEFA", 74.80, 0.2, 52.1, "neutral"),
            ("VWO", 42.60, -0.1, 48.7, "neutral"),
            ("AGG", 97.90, 0.0, 50.3, "neutral"),
            ("SHY", 81.70, 0.0, 49.9, "neutral"),
        ];

        rows.iter()
            .fold(Self::new(), |provider, (symbol, price, change, rsi, macd)| {
                provider.with_snapshot(
                    symbol,
                    MarketSnapshot {
                        price: *price,
                        change_pct: *change,
                        rsi: *rsi,
                        macd_signal: macd.to_string(),
                    },
                )
            })
    }
}

#[async_trait]
impl QuoteProvider for StaticQuoteProvider {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        self.snapshots
            .get(&symbol.to_uppercase())
            .cloned()
            .ok_or_else(|| OrchestrationError::Stage(format!("no market data for {}", symbol)))
    }
}

const MARKET_ANALYSIS_PROMPT: &str = r#"You are a senior equity research analyst. Analyze the following stock data and provide investment insights.

Stock: {symbol}
Current Price: ${price}
Price Change: {change}%
RSI (14-day): {rsi} ({rsi_signal})
MACD: {macd}

Format your response as:
THESIS: [investment thesis]
RISKS: [key risks]
OPPORTUNITIES: [key opportunities]
RECOMMENDATION: [BUY/HOLD/SELL]
CONFIDENCE: [0-100]%
"#;

const COMPANY_SYMBOLS: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("google", "GOOGL"),
    ("amazon", "AMZN"),
    ("tesla", "TSLA"),
    ("facebook", "META"),
    ("netflix", "NFLX"),
    ("nvidia", "NVDA"),
    ("amd", "AMD"),
];

/// Uppercase words that are not tickers
const NOT_TICKERS: &[&str] = &["I", "A", "ETF", "CEO", "IPO", "USA", "US", "PE"];

/// Company names first, then the first all-caps 1–5 letter word
pub fn extract_stock_symbol(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if let Some((_, symbol)) = COMPANY_SYMBOLS
        .iter()
        .find(|(name, _)| lowered.contains(*name))
    {
        return Some(symbol.to_string());
    }

    text.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|word| {
            (1..=5).contains(&word.len())
                && word.chars().all(|c| c.is_ascii_uppercase())
                && !NOT_TICKERS.contains(word)
        })
        .map(str::to_string)
}

pub fn interpret_rsi(rsi: f64) -> &'static str {
    if rsi < 30.0 {
        "oversold"
    } else if rsi > 70.0 {
        "overbought"
    } else {
        "neutral"
    }
}

/// `RECOMMENDATION:` and `CONFIDENCE: NN%`, defaulting to HOLD at 0.5
pub fn parse_recommendation(content: &str) -> (Recommendation, f64) {
    let mut recommendation = Recommendation::Hold;
    let mut confidence = 0.5;
    let mut seen_recommendation = false;
    let mut seen_confidence = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_uppercase().as_str() {
            "RECOMMENDATION" if !seen_recommendation => {
                let word = value
                    .trim_start_matches('[')
                    .split(|c: char| !c.is_ascii_alphabetic())
                    .next()
                    .unwrap_or("");
                recommendation = match word {
                    "BUY" => Recommendation::Buy,
                    "SELL" => Recommendation::Sell,
                    _ => Recommendation::Hold,
                };
                seen_recommendation = true;
            }
            "CONFIDENCE" if !seen_confidence => {
                if let Some(pct) = value
                    .split('%')
                    .next()
                    .and_then(|n| n.trim().parse::<f64>().ok())
                {
                    confidence = (pct / 100.0).clamp(0.0, 1.0);
                }
                seen_confidence = true;
            }
            _ => {}
        }
    }

    (recommendation, confidence)
}

pub struct MarketResearcher {
    generator: Arc<dyn TextGenerator>,
    quotes: Arc<dyn QuoteProvider>,
}

impl MarketResearcher {
    pub fn new(generator: Arc<dyn TextGenerator>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { generator, quotes }
    }
}

#[async_trait]
impl Stage for MarketResearcher {
    fn name(&self) -> &'static str {
        "market_researcher"
    }

    fn intent(&self) -> Intent {
        Intent::MarketResearch
    }

    async fn apply(&self, context: &Context) -> Result<StageOutput> {
        let Some(symbol) = extract_stock_symbol(&context.user_message) else {
            return Ok(StageOutput::MarketResearch(MarketResearch {
                stock_symbol: None,
                current_price: 0.0,
                price_change_pct: 0.0,
                technical_signals: BTreeMap::new(),
                market_analysis: "Could not identify a valid stock symbol in your request. \
                    Please specify a stock ticker (e.g., AAPL, TSLA, MSFT)."
                    .to_string(),
                recommendation: Recommendation::Hold,
                confidence_score: 0.0,
            }));
        };

        let snapshot = self.quotes.snapshot(&symbol).await?;
        let rsi_signal = interpret_rsi(snapshot.rsi);

        let prompt = MARKET_ANALYSIS_PROMPT
            .replace("{symbol}", &symbol)
            .replace("{price}", &format!("{:.2}", snapshot.price))
            .replace("{change}", &format!("{:+.2}", snapshot.change_pct))
            .replace("{rsi}", &format!("{:.1}", snapshot.rsi))
            .replace("{rsi_signal}", rsi_signal)
            .replace("{macd}", &snapshot.macd_signal);

        let market_analysis = self.generator.generate(&prompt).await?;
        let (recommendation, confidence_score) = parse_recommendation(&market_analysis);

        debug!(symbol = %symbol, ?recommendation, "Market analysis complete");

        let mut technical_signals = BTreeMap::new();
        technical_signals.insert("RSI".to_string(), rsi_signal.to_string());
        technical_signals.insert("MACD".to_string(), snapshot.macd_signal.clone());

        Ok(StageOutput::MarketResearch(MarketResearch {
            stock_symbol: Some(symbol),
            current_price: snapshot.price,
            price_change_pct: snapshot.change_pct,
            technical_signals,
            market_analysis,
            recommendation,
            confidence_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedGenerator;

    fn tesla() -> StaticQuoteProvider {
        StaticQuoteProvider::new().with_snapshot(
            "TSLA",
            MarketSnapshot {
                price: 242.1,
                change_pct: -1.3,
                rsi: 27.5,
                macd_signal: "bearish".to_string(),
            },
        )
    }

    #[test]
    fn test_extract_symbol() {
        assert_eq!(extract_stock_symbol("How is Tesla performing?"), Some("TSLA".into()));
        assert_eq!(extract_stock_symbol("Thoughts on NFLX vs the market"), Some("NFLX".into()));
        assert_eq!(extract_stock_symbol("Should I buy an ETF or KO?"), Some("KO".into()));
        assert_eq!(extract_stock_symbol("how are markets doing"), None);
    }

    #[test]
    fn test_rsi_bands() {
        assert_eq!(interpret_rsi(25.0), "oversold");
        assert_eq!(interpret_rsi(50.0), "neutral");
        assert_eq!(interpret_rsi(80.0), "overbought");
    }

    #[test]
    fn test_parse_recommendation() {
        let (rec, conf) = parse_recommendation("THESIS: ok\nRECOMMENDATION: BUY\nCONFIDENCE: 80%");
        assert_eq!(rec, Recommendation::Buy);
        assert!((conf - 0.8).abs() < 1e-9);

        let (rec, conf) = parse_recommendation("no structure here");
        assert_eq!(rec, Recommendation::Hold);
        assert_eq!(conf, 0.5);
    }

    #[tokio::test]
    async fn test_research_with_quote() {
        let generator = Arc::new(CannedGenerator::new(
            "THESIS: Oversold.\nRECOMMENDATION: SELL\nCONFIDENCE: 65%",
        ));
        let stage = MarketResearcher::new(generator, Arc::new(tesla()));
        let ctx = Context::new("How is Tesla performing?", vec![]);

        let StageOutput::MarketResearch(m) = stage.apply(&ctx).await.unwrap() else {
            panic!("expected market research output");
        };
        assert_eq!(m.stock_symbol.as_deref(), Some("TSLA"));
        assert_eq!(m.recommendation, Recommendation::Sell);
        assert_eq!(m.technical_signals["RSI"], "oversold");
        assert!((m.confidence_score - 0.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_symbol_holds() {
        let stage = MarketResearcher::new(
            Arc::new(CannedGenerator::new("unused")),
            Arc::new(tesla()),
        );
        let ctx = Context::new("how are markets doing", vec![]);

        let StageOutput::MarketResearch(m) = stage.apply(&ctx).await.unwrap() else {
            panic!("expected market research output");
        };
        assert!(m.stock_symbol.is_none());
        assert_eq!(m.confidence_score, 0.0);
    }

    #[tokio::test]
    async fn test_missing_quote_propagates() {
        let stage = MarketResearcher::new(
            Arc::new(CannedGenerator::new("unused")),
            Arc::new(StaticQuoteProvider::new()),
        );
        let ctx = Context::new("What about AAPL?", vec![]);
        assert!(stage.apply(&ctx).await.is_err());
    }
}
