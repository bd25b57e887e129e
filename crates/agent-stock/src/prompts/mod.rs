//! Prompt templates for narrative analysis
//!
//! Templates are minijinja sources compiled once into a [`PromptSet`]. Each
//! market has its own analysis template; all of them include the shared
//! indicator summary and the reply format block.

use crate::ai::AiRequest;
use crate::market::MarketType;
use minijinja::{Environment, context};

const SYSTEM: &str = "\
You are a disciplined equity analyst. You read technical indicators and give \
concise, concrete assessments with specific price levels. You never invent \
data that is not in the summary you are given.";

const SUMMARY: &str = r#"Technical summary for {{ code }}:
- Last close: {{ quote.price | round(3) }} {{ currency }} on {{ quote.date }} ({{ quote.change_pct | round(2) }}% on the day)
{%- if returns.five_day is not none %}
- 5-day return: {{ returns.five_day | round(2) }}%
{%- endif %}
{%- if returns.twenty_day is not none %}
- 20-day return: {{ returns.twenty_day | round(2) }}%
{%- endif %}
{%- if ma_trend %}
- Moving average trend: {{ ma_trend }}
{%- endif %}
{%- if indicators.moving_averages.short is not none %}
- MA short / medium{% if indicators.moving_averages.long is not none %} / long{% endif %}: {{ indicators.moving_averages.short | round(3) }}{% if indicators.moving_averages.medium is not none %} / {{ indicators.moving_averages.medium | round(3) }}{% endif %}{% if indicators.moving_averages.long is not none %} / {{ indicators.moving_averages.long | round(3) }}{% endif %}
{%- endif %}
{%- if indicators.rsi is not none %}
- RSI: {{ indicators.rsi | round(2) }}
{%- endif %}
{%- if indicators.macd is not none %}
- MACD: {{ indicators.macd.macd | round(4) }}, signal {{ indicators.macd.signal | round(4) }} ({{ macd_signal }})
{%- endif %}
{%- if indicators.bollinger is not none %}
- Bollinger bands: {{ indicators.bollinger.lower | round(3) }} / {{ indicators.bollinger.middle | round(3) }} / {{ indicators.bollinger.upper | round(3) }}
{%- endif %}
{%- if indicators.volume is not none %}
- Volume ratio: {{ indicators.volume.ratio | round(2) }} ({{ volume_status }})
{%- endif %}
{%- if indicators.volatility is not none %}
- Volatility: {{ indicators.volatility | round(2) }}%
{%- endif %}
{%- if score_value is not none %}
- Composite score: {{ score_value | round(1) }} / 100 ({{ recommendation }})
{%- else %}
- Composite score: not enough data
{%- endif %}"#;

const REPLY_FORMAT: &str = "\
Finish your answer with exactly these lines:
TREND: <one phrase>
RISK: <low, moderate or high, with the main reason>
TARGET_PRICE: <a single number in {{ currency }}>
CONFIDENCE: <0-100>
RECOMMENDATION: <buy, sell, hold or watch>";

const A_SHARE: &str = r#"Analyse the A-share {{ code }}.

{% include "summary" %}

Please cover:
1. Trend, with support and resistance levels
2. Volume and what it implies
3. Risk, including volatility
4. Short and medium term price targets
5. Key technical levels
6. A concrete trading plan with a stop loss

Base the analysis on the indicators above and the character of the A-share market.

{% include "reply_format" %}"#;

const HONG_KONG: &str = r#"Analyse the Hong Kong listed stock {{ code }}.

{% include "summary" %}

Please cover:
1. Trend, with support and resistance levels in HKD
2. Volume and what it implies
3. Risk, including volatility and risks specific to the Hong Kong market
4. Short and medium term price targets in HKD
5. Key technical levels
6. A concrete trading plan with a stop loss

{% include "reply_format" %}"#;

const US: &str = r#"Analyse the US listed stock {{ code }}.

{% include "summary" %}

Please cover:
1. Trend, with support and resistance levels in USD
2. Volume and what it implies
3. Risk, including volatility and risks specific to US equities
4. Short and medium term price targets in USD
5. Key technical levels
6. A concrete trading plan with a stop loss

{% include "reply_format" %}"#;

const FUND: &str = r#"Analyse the fund {{ code }}.

{% include "summary" %}

Please cover:
1. Net value trend, with support and resistance levels
2. Volume and its effect on price
3. Risk, including volatility and premium or discount to net value
4. Short and medium term outlook
5. Key price levels
6. Subscription or redemption advice with a stop loss

{% include "reply_format" %}"#;

/// Compiled prompt templates
#[derive(Debug)]
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM)?;
        env.add_template("summary", SUMMARY)?;
        env.add_template("reply_format", REPLY_FORMAT)?;
        env.add_template(template_name(MarketType::AShare), A_SHARE)?;
        env.add_template(template_name(MarketType::HongKong), HONG_KONG)?;
        env.add_template(template_name(MarketType::Us), US)?;
        env.add_template(template_name(MarketType::Fund), FUND)?;
        Ok(Self { env })
    }

    pub fn system(&self) -> Result<String, minijinja::Error> {
        self.env.get_template("system")?.render(context! {})
    }

    /// User message for `request`, using its market's template
    pub fn analysis(&self, request: &AiRequest) -> Result<String, minijinja::Error> {
        let market = request.instrument.market();
        let indicators = &request.indicators;
        let template = self.env.get_template(template_name(market))?;

        template.render(context! {
            code => request.instrument.code(),
            market => market.as_str(),
            currency => market.currency(),
            quote => &request.quote,
            returns => &request.returns,
            indicators => indicators,
            ma_trend => indicators.ma_trend(),
            macd_signal => indicators.macd_signal(),
            volume_status => indicators.volume_status(),
            score_value => request.score.value(),
            recommendation => request.score.recommendation().map(|r| r.label()),
        })
    }
}

fn template_name(market: MarketType) -> &'static str {
    match market {
        MarketType::AShare => "analysis_a_share",
        MarketType::HongKong => "analysis_hk",
        MarketType::Us => "analysis_us",
        MarketType::Fund => "analysis_fund",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fixtures::request;
    use crate::indicators::IndicatorSet;
    use crate::market::Instrument;
    use crate::scoring::Score;

    #[test]
    fn test_templates_compile() {
        let prompts = PromptSet::new().unwrap();
        assert!(prompts.system().unwrap().contains("analyst"));
    }

    #[test]
    fn test_render_a_share() {
        let prompts = PromptSet::new().unwrap();
        let text = prompts.analysis(&request()).unwrap();

        assert!(text.contains("A-share 600519"));
        assert!(text.contains("RSI: 100"));
        assert!(text.contains("Moving average trend: UP"));
        assert!(text.contains("Composite score:"));
        assert!(text.contains("TARGET_PRICE: <a single number in CNY>"));
    }

    #[test]
    fn test_render_per_market() {
        let prompts = PromptSet::new().unwrap();
        let mut req = request();
        req.instrument = Instrument::parse("00700", MarketType::HongKong).unwrap();
        let text = prompts.analysis(&req).unwrap();
        assert!(text.contains("Hong Kong listed stock 0700"));
        assert!(text.contains("HKD"));

        req.instrument = Instrument::parse("510300", MarketType::Fund).unwrap();
        assert!(prompts.analysis(&req).unwrap().contains("fund 510300"));
    }

    #[test]
    fn test_render_with_missing_indicators() {
        let prompts = PromptSet::new().unwrap();
        let mut req = request();
        req.indicators = IndicatorSet::empty(3);
        req.score = Score::InsufficientData;

        let text = prompts.analysis(&req).unwrap();
        assert!(!text.contains("RSI"));
        assert!(text.contains("not enough data"));
    }
}
