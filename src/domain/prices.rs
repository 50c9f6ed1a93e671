// Day-ahead electricity prices
use serde::Deserialize;
use serde_json::Value;

use super::error::FeedError;
use super::series::RollingSeries;
use super::units::{minutes_to_s, thousandths_to_unit};

/// `day_ahead_prices/prices` as pushed by the device.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DayAheadPrices {
    /// Start of the first slot, minutes since the unix epoch.
    pub first_date: i64,
    /// 0 = 15 minute slots, 1 = 60 minute slots.
    pub resolution: u8,
    /// Prices in thousandths of the display unit.
    #[serde(default)]
    pub prices: Vec<i64>,
}

/// Surcharges from `day_ahead_prices/config`, in thousandths.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct PriceSurcharges {
    #[serde(default)]
    pub grid_costs_and_taxes: i64,
    #[serde(default)]
    pub supplier_markup: i64,
}

impl PriceSurcharges {
    pub fn from_payload(payload: &Value) -> Result<Self, FeedError> {
        Ok(Self::deserialize(payload)?)
    }

    fn total(&self) -> f64 {
        thousandths_to_unit(self.grid_costs_and_taxes as f64) + thousandths_to_unit(self.supplier_markup as f64)
    }
}

impl DayAheadPrices {
    pub fn from_payload(payload: &Value) -> Result<Self, FeedError> {
        let prices = Self::deserialize(payload)?;
        prices.slot_minutes()?;
        Ok(prices)
    }

    pub fn slot_minutes(&self) -> Result<i64, FeedError> {
        match self.resolution {
            0 => Ok(15),
            1 => Ok(60),
            other => Err(FeedError::MalformedPayload(format!("unknown price resolution {other}"))),
        }
    }

    /// One-channel series of end-user prices.
    pub fn to_series(&self, surcharges: &PriceSurcharges) -> Result<RollingSeries, FeedError> {
        let slot_s = minutes_to_s(self.slot_minutes()? as f64);
        let first_s = minutes_to_s(self.first_date as f64);
        let extra = surcharges.total();

        let timestamps = (0..self.prices.len()).map(|i| first_s + i as f64 * slot_s).collect();
        let values = self
            .prices
            .iter()
            .map(|&p| Some(thousandths_to_unit(p as f64) + extra))
            .collect();

        Ok(RollingSeries::new(timestamps, vec![values]))
    }
}
