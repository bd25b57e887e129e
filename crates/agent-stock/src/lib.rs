//! Stock analysis service
//!
//! Fetches daily price history for A-share, Hong Kong, US and fund
//! instruments, computes technical indicators, folds them into a 0-100
//! composite score and optionally asks a language model for a narrative.
//! Results are served over HTTP (single JSON or NDJSON streams), as agent
//! tools, and over a minimal MCP endpoint.
//!
//! # Architecture
//!
//! - [`provider`]: cached, market-routed history through [`api`] sources
//! - [`indicators`]: pure indicator computation over a [`series::PriceSeries`]
//! - [`scoring`]: weighted composite score and recommendation
//! - [`ai`]: prompt rendering, LLM call and reply parsing
//! - [`engine`]: per-instrument pipeline and the concurrent batch scan
//! - [`service`]: operations shared by [`server`] routes and [`tools`]
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_stock::config::ServiceConfig;
//! use agent_stock::service::{StockQuery, StockService};
//! use agent_stock::market::MarketType;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = StockService::from_config(&ServiceConfig::from_env()?)?;
//!     let result = service
//!         .analyze(&StockQuery::new("600519", MarketType::AShare), true)
//!         .await?;
//!     println!("{:?} {:?}", result.state, result.score_value());
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market;
pub mod prompts;
pub mod provider;
pub mod scoring;
pub mod series;
pub mod server;
pub mod service;
pub mod tools;

pub use config::{AiConfig, ServiceConfig};
pub use engine::{AnalysisCoordinator, AnalysisEvent, AnalysisResult, ScanCoordinator, ScanEvent, ScanReport};
pub use error::{Result, StockError};
pub use market::{Instrument, MarketType};
pub use provider::{DataProvider, MarketDataProvider};
pub use scoring::{Recommendation, Score, Scorer};
pub use service::StockService;
