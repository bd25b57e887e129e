//! Stock analysis tools for LLM agents
//!
//! Every tool is a thin adapter over [`StockService`], so tool callers and
//! HTTP clients see the same payloads.

pub mod analysis;
pub mod stock_data;
pub mod technical;

pub use analysis::{AiAnalysisTool, AnalyzeStockTool, ScanStocksTool};
pub use stock_data::StockPriceTool;
pub use technical::{StockScoreTool, TechnicalAnalysisTool};

use agent_tools::{Tool, ToolError, ToolRegistry};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::service::StockService;

/// Registry with every stock tool bound to `service`
pub fn tool_registry(service: Arc<StockService>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let tools: [Arc<dyn Tool>; 6] = [
        Arc::new(StockPriceTool::new(Arc::clone(&service))),
        Arc::new(TechnicalAnalysisTool::new(Arc::clone(&service))),
        Arc::new(StockScoreTool::new(Arc::clone(&service))),
        Arc::new(AiAnalysisTool::new(Arc::clone(&service))),
        Arc::new(AnalyzeStockTool::new(Arc::clone(&service))),
        Arc::new(ScanStocksTool::new(service)),
    ];
    for tool in tools {
        registry.register(tool);
    }
    registry
}

pub(crate) fn market_type_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["A", "HK", "US", "ETF", "LOF", "FUND"],
        "description": "Market of the code, A-share when omitted",
        "default": "A"
    })
}

/// Input schema shared by the single-instrument tools
pub(crate) fn stock_query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "stock_code": {
                "type": "string",
                "description": "Stock or fund code, e.g. 600519, 00700, AAPL"
            },
            "market_type": market_type_schema(),
            "start_date": {
                "type": "string",
                "description": "First day of history, YYYYMMDD or YYYY-MM-DD"
            },
            "end_date": {
                "type": "string",
                "description": "Last day of history, YYYYMMDD or YYYY-MM-DD"
            }
        },
        "required": ["stock_code"]
    })
}

pub(crate) fn to_value<T: Serialize>(tool: &str, output: &T) -> agent_tools::Result<Value> {
    serde_json::to_value(output).map_err(|e| ToolError::ExecutionFailed {
        tool: tool.to_string(),
        kind: "internal".to_string(),
        message: e.to_string(),
        retryable: false,
    })
}
