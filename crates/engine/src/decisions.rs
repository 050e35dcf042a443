use cryptobot_core::{Decision, Forecast, SymbolRules, Trend};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::streams::Target;

/// Decides what to hold next. The bot holds at most one asset besides
/// the quote asset.
pub struct DecisionsManager {
    quote_asset: String,
}

impl DecisionsManager {
    pub fn new(quote_asset: impl Into<String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
        }
    }

    fn symbol(&self, asset: &str) -> String {
        format!("{}{}", asset, self.quote_asset)
    }

    /// The non-quote asset currently held in a tradable amount.
    pub fn current_asset(
        &self,
        balances: &BTreeMap<String, Decimal>,
        rules: &HashMap<String, SymbolRules>,
    ) -> Option<String> {
        balances
            .iter()
            .filter(|(asset, _)| **asset != self.quote_asset)
            .find(|(asset, balance)| {
                rules
                    .get(&self.symbol(asset))
                    .is_some_and(|rule| **balance > rule.min_qty)
            })
            .map(|(asset, _)| asset.clone())
    }

    /// The best-growing target other than `exclude` whose forecast says
    /// it will rise, as a base asset.
    pub fn find_next_best(
        &self,
        targets: &[Target],
        forecasts: &HashMap<String, Forecast>,
        exclude: Option<&str>,
    ) -> Option<String> {
        let excluded = exclude.map(|asset| self.symbol(asset));
        let mut ranked: Vec<&Target> = targets.iter().collect();
        ranked.sort_by(|a, b| b.change_pct.cmp(&a.change_pct));

        ranked
            .into_iter()
            .filter(|t| excluded.as_deref() != Some(t.symbol.as_str()))
            .filter(|t| forecasts.get(&t.symbol).is_some_and(|f| f.trend == Trend::Increase))
            .find_map(|t| t.symbol.strip_suffix(self.quote_asset.as_str()).map(str::to_string))
    }

    pub fn decide(
        &self,
        balances: &BTreeMap<String, Decimal>,
        rules: &HashMap<String, SymbolRules>,
        targets: &[Target],
        forecasts: &HashMap<String, Forecast>,
    ) -> Vec<Decision> {
        let mut decisions = Vec::new();

        match self.current_asset(balances, rules) {
            Some(asset) => {
                info!(asset = %asset, "Determining what to do with current holdings");
                let Some(forecast) = forecasts.get(&self.symbol(&asset)) else {
                    warn!(asset = %asset, "No forecast for current holdings, holding");
                    return decisions;
                };
                if forecast.trend == Trend::Increase {
                    info!(asset = %asset, "Current asset predicted to increase, holding");
                    return decisions;
                }
                info!(asset = %asset, trend = %forecast.trend, "Current asset not predicted to increase, selling");
                decisions.push(Decision::sell(asset.as_str()));
                match self.find_next_best(targets, forecasts, Some(&asset)) {
                    Some(next) => {
                        info!(asset = %next, "Found next best asset, buying");
                        decisions.push(Decision::buy(next));
                    }
                    None => warn!("Unable to find a next best asset"),
                }
            }
            None => {
                info!(quote = %self.quote_asset, "Only the quote asset is held");
                match self.find_next_best(targets, forecasts, None) {
                    Some(next) => {
                        info!(asset = %next, "Found promising asset, buying");
                        decisions.push(Decision::buy(next));
                    }
                    None => warn!("Unable to find a promising asset"),
                }
            }
        }

        info!(decisions = ?decisions, "Decided");
        decisions
    }
}
