//! Tool for fetching the latest quote

use agent_tools::{Result, Tool, parse_params};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{stock_query_schema, to_value};
use crate::service::{StockQuery, StockService};

/// Latest price and daily change of one instrument
pub struct StockPriceTool {
    service: Arc<StockService>,
}

impl StockPriceTool {
    pub const NAME: &'static str = "get_stock_price";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query: StockQuery = parse_params(Self::NAME, params)?;
        let quote = self
            .service
            .price(&query)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &quote)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Get the latest daily quote for a stock or fund: price, open, high, low, volume \
         and change versus the previous close."
    }

    fn input_schema(&self) -> Value {
        let mut schema = stock_query_schema();
        if let Some(properties) = schema["properties"].as_object_mut() {
            properties.retain(|k, _| k == "stock_code" || k == "market_type");
        }
        schema
    }
}
