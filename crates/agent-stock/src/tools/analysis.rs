//! Tools that run the full pipeline: AI narrative, single analysis, batch scan

use agent_tools::{Result, Tool, parse_params};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{stock_query_schema, to_value};
use crate::service::{MAX_SCAN_INSTRUMENTS, ScanQuery, StockQuery, StockService};

/// Narrative, risk, target price and stance from the language model
pub struct AiAnalysisTool {
    service: Arc<StockService>,
}

impl AiAnalysisTool {
    pub const NAME: &'static str = "get_ai_analysis";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for AiAnalysisTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query: StockQuery = parse_params(Self::NAME, params)?;
        let analysis = self
            .service
            .ai_analysis(&query)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &analysis)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Ask the language model for a written analysis of a stock or fund based on its \
         indicators and score. Returns trend, risk, target price, confidence and a stance."
    }

    fn input_schema(&self) -> Value {
        stock_query_schema()
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    #[serde(flatten)]
    query: StockQuery,
    #[serde(default = "default_with_ai")]
    with_ai: bool,
}

fn default_with_ai() -> bool {
    true
}

/// Full analysis of one instrument; an AI failure degrades instead of failing
pub struct AnalyzeStockTool {
    service: Arc<StockService>,
}

impl AnalyzeStockTool {
    pub const NAME: &'static str = "analyze_stock";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for AnalyzeStockTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let params: AnalyzeParams = parse_params(Self::NAME, params)?;
        let result = self
            .service
            .analyze(&params.query, params.with_ai)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &result)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run the complete analysis of a stock or fund: quote, indicators, score and, when \
         enabled, the AI narrative. If the AI step fails the result is marked degraded \
         and still carries the technical part."
    }

    fn input_schema(&self) -> Value {
        let mut schema = stock_query_schema();
        schema["properties"]["with_ai"] = json!({
            "type": "boolean",
            "description": "Include the AI narrative",
            "default": true
        });
        schema
    }
}

/// Batch scan filtered by minimum score
pub struct ScanStocksTool {
    service: Arc<StockService>,
}

impl ScanStocksTool {
    pub const NAME: &'static str = "scan_stocks";

    pub fn new(service: Arc<StockService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for ScanStocksTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query: ScanQuery = parse_params(Self::NAME, params)?;
        let report = self
            .service
            .scan(query)
            .await
            .map_err(|e| e.into_tool_error(Self::NAME))?;
        to_value(Self::NAME, &report)
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Analyze a list of stocks or funds concurrently and return those scoring at least \
         min_score, best first. Instruments that fail are listed separately and do not \
         abort the scan."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "stock_codes": {
                    "type": "array",
                    "items": {"type": "string"},
                    "maxItems": MAX_SCAN_INSTRUMENTS,
                    "description": "Codes to scan, all in the same market"
                },
                "market_type": super::market_type_schema(),
                "min_score": {
                    "type": "number",
                    "description": "Minimum composite score from 0 to 100",
                    "default": 0
                },
                "with_ai": {
                    "type": "boolean",
                    "description": "Run the AI narrative for instruments that pass the filter",
                    "default": true
                },
                "report_failures": {
                    "type": "boolean",
                    "description": "List failed instruments in the report",
                    "default": true
                }
            },
            "required": ["stock_codes"]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::service;

    #[tokio::test]
    async fn test_ai_tool_without_endpoint() {
        let tool = AiAnalysisTool::new(service());
        let err = tool.execute(json!({"stock_code": "600519"})).await.unwrap_err();
        assert_eq!(err.kind(), "ai_analysis_failed");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_analyze_without_ai() {
        let tool = AnalyzeStockTool::new(service());
        let value = tool
            .execute(json!({"stock_code": "600519", "with_ai": false}))
            .await
            .unwrap();

        assert_eq!(value["state"], "complete");
        assert_eq!(value["stages"]["ai"]["status"], "skipped");
        assert!(value["score"]["value"].is_number());
        assert!(value["ai"].is_null());
    }

    #[test]
    fn test_analyze_schema_has_with_ai() {
        let schema = AnalyzeStockTool::new(service()).input_schema();
        assert_eq!(schema["properties"]["with_ai"]["type"], "boolean");
        assert_eq!(schema["required"], json!(["stock_code"]));
    }

    #[tokio::test]
    async fn test_scan_reports_failures() {
        let tool = ScanStocksTool::new(service());
        let value = tool
            .execute(json!({"stock_codes": ["600519", "000001"], "with_ai": false}))
            .await
            .unwrap();

        assert_eq!(value["scanned"], 2);
        assert_eq!(value["matched"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["results"][0]["instrument"]["code"], "600519");
        assert_eq!(value["failures"][0]["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_scan_rejects_bad_code() {
        let tool = ScanStocksTool::new(service());
        let err = tool
            .execute(json!({"stock_codes": ["600519", "??"]}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
