//! Extraction of structured fields from a model reply

use super::{AiAnalysis, Stance};
use regex::Regex;

/// Compiled patterns for reading model replies
///
/// Labelled lines look like `TREND: upward` and may carry markdown bullets
/// or bold markers. Full-width colons are accepted.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    field: Regex,
    number: Regex,
    buy: Regex,
    sell: Regex,
    hold: Regex,
    advice_section: Regex,
}

impl ReplyParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            field: Regex::new(
                r"(?mi)^[\s>#*\-]*(TREND|RISK|TARGET_PRICE|CONFIDENCE|RECOMMENDATION)[*\s]*[:：][*\s]*(.+?)\s*$",
            )?,
            number: Regex::new(r"[-+]?\d+(?:\.\d+)?")?,
            buy: Regex::new(r"(?i)\b(?:strong\s+buy|buy|accumulate|overweight)\b|买入|增持")?,
            sell: Regex::new(r"(?i)\b(?:strong\s+sell|sell|reduce|underweight)\b|卖出|减持")?,
            hold: Regex::new(r"(?i)\bhold\b|持有")?,
            advice_section: Regex::new(r"(?s)##\s*(?:Investment advice|Recommendation|投资建议)\s*\n(.*?)(?:\n##|\z)")?,
        })
    }

    /// Parse `reply` into an analysis attributed to `model`
    pub fn parse(&self, reply: &str, model: &str) -> AiAnalysis {
        let mut analysis = AiAnalysis {
            trend: None,
            risk: None,
            target_price: None,
            confidence: None,
            stance: Stance::Watch,
            narrative: reply.trim().to_string(),
            model: model.to_string(),
        };
        let mut stated_stance = None;

        for caps in self.field.captures_iter(reply) {
            let value = caps[2].trim().trim_end_matches("**").trim();
            if value.is_empty() {
                continue;
            }
            // first occurrence of each label wins
            match caps[1].to_ascii_uppercase().as_str() {
                "TREND" if analysis.trend.is_none() => analysis.trend = Some(value.to_string()),
                "RISK" if analysis.risk.is_none() => analysis.risk = Some(value.to_string()),
                "TARGET_PRICE" if analysis.target_price.is_none() => {
                    analysis.target_price = self.first_number(value);
                }
                "CONFIDENCE" if analysis.confidence.is_none() => {
                    analysis.confidence = self.first_number(value).map(normalize_confidence);
                }
                "RECOMMENDATION" if stated_stance.is_none() => {
                    stated_stance = self.detect_stance(value);
                }
                _ => {}
            }
        }

        analysis.stance = stated_stance
            .or_else(|| {
                self.advice_section
                    .captures(reply)
                    .and_then(|caps| self.detect_stance(&caps[1]))
            })
            .or_else(|| self.detect_stance(reply))
            .unwrap_or_default();
        analysis
    }

    /// First stance keyword found, buy before sell before hold
    pub fn detect_stance(&self, text: &str) -> Option<Stance> {
        if self.buy.is_match(text) {
            Some(Stance::Buy)
        } else if self.sell.is_match(text) {
            Some(Stance::Sell)
        } else if self.hold.is_match(text) {
            Some(Stance::Hold)
        } else {
            None
        }
    }

    fn first_number(&self, text: &str) -> Option<f64> {
        let text = text.replace(',', "");
        self.number
            .find(&text)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

/// Confidence as a percentage; fractions are scaled up
fn normalize_confidence(value: f64) -> f64 {
    let pct = if value > 0.0 && value <= 1.0 { value * 100.0 } else { value };
    pct.clamp(0.0, 100.0)
}
