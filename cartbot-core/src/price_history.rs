//! Append-only ledger of price observations per canonical item name.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Currency, PriceObservation, Source};

/// Aggregated view over the observations inside a lookback window. An empty
/// window yields count 0 and no average rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTrend {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    observations: Vec<PriceObservation>,
}

impl PriceHistory {
    pub fn new() -> Self {
        PriceHistory::default()
    }

    pub fn from_observations(observations: Vec<PriceObservation>) -> Self {
        PriceHistory { observations }
    }

    /// Appends an observation. There is no update or delete; the ledger only
    /// grows. Observations arrive through the per-user single-writer path,
    /// so `observed_at` stamps are non-decreasing.
    pub fn record(
        &mut self,
        canonical_name: &str,
        price: f64,
        currency: Currency,
        source: Source,
        now: DateTime<Utc>,
    ) {
        self.observations.push(PriceObservation {
            canonical_name: canonical_name.to_owned(),
            price,
            currency,
            observed_at: now,
            source,
        });
    }

    pub fn observations(&self) -> &[PriceObservation] {
        &self.observations
    }

    pub fn for_name<'a>(
        &'a self,
        canonical_name: &'a str,
    ) -> impl Iterator<Item = &'a PriceObservation> {
        self.observations
            .iter()
            .filter(move |o| o.canonical_name == canonical_name)
    }

    pub fn last_observed<'a>(
        &'a self,
        canonical_name: &'a str,
    ) -> Option<&'a PriceObservation> {
        self.for_name(canonical_name).last()
    }

    /// Price statistics for one name over `window` looking back from `now`.
    pub fn trend(&self, canonical_name: &str, window: Duration, now: DateTime<Utc>) -> PriceTrend {
        let cutoff = now - window;
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for observation in self
            .for_name(canonical_name)
            .filter(|o| o.observed_at >= cutoff && o.observed_at <= now)
        {
            count += 1;
            sum += observation.price;
            min = min.min(observation.price);
            max = max.max(observation.price);
        }
        if count == 0 {
            return PriceTrend {
                average: None,
                min: None,
                max: None,
                count: 0,
            };
        }
        PriceTrend {
            average: Some(sum / count as f64),
            min: Some(min),
            max: Some(max),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn record_appends_in_order() {
        let mut history = PriceHistory::new();
        history.record("milk", 2.10, Currency::Usd, Source::Ocr, at("2026-01-01T10:00:00Z"));
        history.record("milk", 2.30, Currency::Usd, Source::Ocr, at("2026-01-03T10:00:00Z"));
        history.record("bread", 3.00, Currency::Usd, Source::Manual, at("2026-01-04T10:00:00Z"));

        let stamps: Vec<_> = history.observations().iter().map(|o| o.observed_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(history.for_name("milk").count(), 2);
    }

    #[test]
    fn trend_over_window() {
        let mut history = PriceHistory::new();
        history.record("milk", 2.00, Currency::Usd, Source::Ocr, at("2026-01-01T00:00:00Z"));
        history.record("milk", 3.00, Currency::Usd, Source::Ocr, at("2026-01-10T00:00:00Z"));
        history.record("milk", 4.00, Currency::Usd, Source::Ocr, at("2026-01-20T00:00:00Z"));

        let trend = history.trend("milk", Duration::days(15), at("2026-01-21T00:00:00Z"));
        assert_eq!(trend.count, 2);
        assert_eq!(trend.average, Some(3.5));
        assert_eq!(trend.min, Some(3.00));
        assert_eq!(trend.max, Some(4.00));
    }

    #[test]
    fn empty_window_is_well_defined() {
        let history = PriceHistory::new();
        let trend = history.trend("milk", Duration::days(30), Utc::now());
        assert_eq!(trend.count, 0);
        assert_eq!(trend.average, None);
        assert_eq!(trend.min, None);
        assert_eq!(trend.max, None);
    }
}
