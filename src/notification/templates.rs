use crate::config::TemplateConfig;
use crate::models::Signal;
use crate::strategy::LevelCrossing;

/// Renders alert text from the configured templates
#[derive(Debug, Clone)]
pub struct AlertTemplates {
    config: TemplateConfig,
}

impl AlertTemplates {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }

    pub fn periodic_enabled(&self) -> bool {
        self.config.send_periodic
    }

    pub fn periodic(&self, price: f64, rsi: f64) -> String {
        render(
            &self.config.periodic,
            &[("price", format_price(price)), ("rsi", format!("{:.2}", rsi))],
        )
    }

    pub fn price_change(&self, change_pct: f64, price: f64) -> String {
        render(
            &self.config.price_change,
            &[
                ("change", format!("{:+.2}", change_pct)),
                ("price", format_price(price)),
            ],
        )
    }

    pub fn crossing(&self, crossing: LevelCrossing, price: f64, rsi: f64) -> String {
        let template = match crossing {
            LevelCrossing::BelowOverbought => &self.config.rsi_cross_down,
            LevelCrossing::AboveOversold => &self.config.rsi_cross_up,
        };
        render(
            template,
            &[("price", format_price(price)), ("rsi", format!("{:.2}", rsi))],
        )
    }

    pub fn classic_signal(&self, signal: &Signal) -> String {
        render(
            &self.config.classic_signal,
            &[
                ("signal", signal.kind.label().to_string()),
                ("price", format_price(signal.price)),
                ("rsi", format!("{:.2}", signal.indicator_value)),
            ],
        )
    }

    pub fn cycle_failure(&self, error: &str) -> String {
        render(&self.config.cycle_failure, &[("error", error.to_string())])
    }
}

/// Replace every `{key}` with its value; unknown placeholders are left as-is
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{}}}", key), value)
        })
}

/// Whole units with thousands separators, e.g. `50,123`
pub fn format_price(price: f64) -> String {
    let rounded = price.round();
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if rounded < 0.0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
