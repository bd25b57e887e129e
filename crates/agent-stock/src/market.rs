//! Markets, instrument codes and source routing

use crate::error::{Result, StockError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market an instrument trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    /// Shanghai, Shenzhen and Beijing listed equities
    #[serde(rename = "A")]
    AShare,
    /// Hong Kong listed equities
    #[serde(rename = "HK")]
    HongKong,
    /// US listed equities
    #[serde(rename = "US")]
    Us,
    /// Exchange traded and listed open-ended funds (ETF / LOF)
    #[serde(rename = "FUND", alias = "ETF", alias = "LOF")]
    Fund,
}

/// Upstream a market's history is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Eastmoney,
    Yahoo,
}

impl MarketType {
    /// Wire name, as accepted by `market_type` query parameters
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AShare => "A",
            Self::HongKong => "HK",
            Self::Us => "US",
            Self::Fund => "FUND",
        }
    }

    /// Which upstream serves this market
    pub fn source(self) -> SourceKind {
        match self {
            Self::AShare | Self::Fund => SourceKind::Eastmoney,
            Self::HongKong | Self::Us => SourceKind::Yahoo,
        }
    }

    /// Currency prices are quoted in
    pub fn currency(self) -> &'static str {
        match self {
            Self::AShare | Self::Fund => "CNY",
            Self::HongKong => "HKD",
            Self::Us => "USD",
        }
    }

    /// Normalise a raw user supplied code for this market
    pub fn normalize(self, raw: &str) -> Result<String> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(StockError::InvalidInput("stock code is empty".to_string()));
        }

        match self {
            Self::AShare | Self::Fund => {
                let lower = code.to_ascii_lowercase();
                let stripped = strip_affixes(&lower, &["sh", "sz", "bj"]);
                if stripped.len() == 6 && stripped.bytes().all(|b| b.is_ascii_digit()) {
                    Ok(stripped.to_string())
                } else {
                    Err(StockError::InvalidInput(format!(
                        "{} code must be six digits: {raw}",
                        self.as_str()
                    )))
                }
            }
            Self::HongKong => {
                let lower = code.to_ascii_lowercase();
                let digits = strip_affixes(&lower, &["hk"]);
                if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(StockError::InvalidInput(format!(
                        "HK code must be 1-5 digits: {raw}"
                    )));
                }
                let trimmed = digits.trim_start_matches('0');
                Ok(format!("{trimmed:0>4}"))
            }
            Self::Us => {
                let upper = code.to_ascii_uppercase();
                let symbol = upper.strip_suffix(".US").unwrap_or(&upper);
                let valid = !symbol.is_empty()
                    && symbol.len() <= 10
                    && symbol
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
                    && symbol.bytes().any(|b| b.is_ascii_alphabetic());
                if valid {
                    Ok(symbol.to_string())
                } else {
                    Err(StockError::InvalidInput(format!("invalid US ticker: {raw}")))
                }
            }
        }
    }
}

/// Strip one `xx` prefix or `.xx` suffix from a lower-cased code
fn strip_affixes<'a>(code: &'a str, exchanges: &[&str]) -> &'a str {
    for ex in exchanges {
        let suffix = format!(".{ex}");
        if let Some(rest) = code.strip_suffix(suffix.as_str()) {
            return rest;
        }
    }
    for ex in exchanges {
        if let Some(rest) = code.strip_prefix(ex) {
            if rest.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
                return rest;
            }
        }
    }
    code
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `A`, `HK`, `US`, `ETF`, `LOF` and `FUND`, case-insensitively
impl FromStr for MarketType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::AShare),
            "HK" => Ok(Self::HongKong),
            "US" => Ok(Self::Us),
            "ETF" | "LOF" | "FUND" => Ok(Self::Fund),
            other => Err(StockError::InvalidInput(format!("unsupported market type: {other}"))),
        }
    }
}

/// A tradable instrument with a normalised code
///
/// Construct with [`Instrument::parse`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    code: String,
    market: MarketType,
}

impl Instrument {
    /// Normalise `raw` for `market`
    pub fn parse(raw: &str, market: MarketType) -> Result<Self> {
        Ok(Self {
            code: market.normalize(raw)?,
            market,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    /// Symbol in the form the routed upstream expects
    pub fn source_symbol(&self) -> String {
        match self.market {
            MarketType::HongKong => format!("{}.HK", self.code),
            MarketType::AShare | MarketType::Fund | MarketType::Us => self.code.clone(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market, self.code)
    }
}
