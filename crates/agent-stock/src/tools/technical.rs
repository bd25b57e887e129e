//! Tools for technical indicators and the composite score

use agent_tools::{Result, Tool, parse_params};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{stock_query_schema, to_value};
use crate::service::{StockQuery, StockService};

/// Indicator snapshot with trend, MACD and volume labels
pub struct TechnicalAnalysisTool {
    service: Arc<StockService>,
}

impl TechnicalAnalysisTool {
    pub const NAME: &'static str = "get_technical_analysis";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for TechnicalAnalysisTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query: StockQuery = parse_params(Self::NAME, params)?;
        let summary = self
            .service
            .technical(&query)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &summary)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Compute technical indicators for a stock or fund: moving averages, RSI, MACD, \
         Bollinger Bands, volume ratio, ATR and volatility, plus derived trend labels. \
         Indicators needing more history than available are null."
    }

    fn input_schema(&self) -> Value {
        stock_query_schema()
    }
}

/// Composite 0-100 score and recommendation
pub struct StockScoreTool {
    service: Arc<StockService>,
}

impl StockScoreTool {
    pub const NAME: &'static str = "get_stock_score";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for StockScoreTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query: StockQuery = parse_params(Self::NAME, params)?;
        let score = self
            .service
            .score(&query)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &score)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Score a stock or fund from 0 to 100 by weighting trend, momentum, MACD, \
         Bollinger position and volume, with a recommendation from strong sell to strong buy."
    }

    fn input_schema(&self) -> Value {
        stock_query_schema()
    }
}
