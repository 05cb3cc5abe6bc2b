//! Fee rate lookups against the mempool.space API.

use bro_core::fees::DEFAULT_FEE_RATE;
use bro_core::{FeeError, Network};
use log::warn;
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

use crate::state::value_to_js;

/// Fee rate client for the recommended-fees endpoint.
#[wasm_bindgen]
pub struct FeeRateApi {
    network: Network,
}

#[wasm_bindgen]
impl FeeRateApi {
    /// Create a new API client for the specified network.
    #[wasm_bindgen(constructor)]
    pub fn new(network: &str) -> Result<FeeRateApi, JsValue> {
        let network = Network::from_str(network).ok_or_else(|| JsValue::from_str("Invalid network"))?;
        Ok(FeeRateApi { network })
    }

    /// Get all recommended fee rates in sat/vB.
    pub async fn get_recommended(&self) -> Result<JsValue, JsValue> {
        let fees = self.fetch_recommended().await?;
        value_to_js(&fees)
    }

    /// Get the rate for a confirmation target ("fastest", "half_hour",
    /// "hour", "economy" or "minimum").
    ///
    /// Falls back to the default rate when the API cannot be reached.
    pub async fn get_fee_rate(&self, target: &str) -> Result<f64, JsValue> {
        let target = FeeTarget::from_str(target)
            .ok_or_else(|| JsValue::from_str(&format!("Invalid fee target: {}", target)))?;
        match self.fetch_recommended().await {
            Ok(fees) => Ok(fees.rate_for(target)),
            Err(e) => {
                warn!(
                    "fee rate lookup failed, using {} sat/vB: {:?}",
                    DEFAULT_FEE_RATE, e
                );
                Ok(DEFAULT_FEE_RATE)
            }
        }
    }

    /// Get the network name.
    #[wasm_bindgen(getter)]
    pub fn network(&self) -> String {
        self.network.name().to_string()
    }

    /// Get the base URL.
    #[wasm_bindgen(getter)]
    pub fn base_url(&self) -> String {
        self.network.mempool_api_url().to_string()
    }

    async fn fetch_recommended(&self) -> Result<RecommendedFees, JsValue> {
        let json = self.fetch_json(&self.network.fee_rates_url()).await?;
        let fees = parse_recommended_fees(&json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(fees)
    }

    /// Fetch JSON from a URL.
    async fn fetch_json(&self, url: &str) -> Result<JsValue, JsValue> {
        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::Cors);

        let request = Request::new_with_str_and_init(url, &opts)?;

        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let resp_value = JsFuture::from(window.fetch_with_request(&request)).await?;
        let resp: Response = resp_value.dyn_into()?;

        if !resp.ok() {
            return Err(JsValue::from_str(&format!("HTTP error: {}", resp.status())));
        }

        JsFuture::from(resp.json()?).await
    }
}

/// Confirmation target of a fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeTarget {
    Fastest,
    HalfHour,
    Hour,
    Economy,
    Minimum,
}

impl FeeTarget {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fastest" | "fast" => Some(FeeTarget::Fastest),
            "half_hour" | "halfhour" | "medium" => Some(FeeTarget::HalfHour),
            "hour" | "slow" => Some(FeeTarget::Hour),
            "economy" => Some(FeeTarget::Economy),
            "minimum" | "min" => Some(FeeTarget::Minimum),
            _ => None,
        }
    }
}

/// Response of `/v1/fees/recommended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    #[serde(default)]
    pub economy_fee: f64,
    #[serde(default)]
    pub minimum_fee: f64,
}

impl RecommendedFees {
    /// Rate for a target; a missing economy or minimum rate falls back to
    /// the hourly rate.
    pub fn rate_for(&self, target: FeeTarget) -> f64 {
        let rate = match target {
            FeeTarget::Fastest => self.fastest_fee,
            FeeTarget::HalfHour => self.half_hour_fee,
            FeeTarget::Hour => self.hour_fee,
            FeeTarget::Economy => self.economy_fee,
            FeeTarget::Minimum => self.minimum_fee,
        };
        if rate > 0.0 {
            rate
        } else {
            self.hour_fee
        }
    }
}

/// Parse recommended fees from JS value.
pub fn parse_recommended_fees(js_value: &JsValue) -> Result<RecommendedFees, FeeError> {
    let fees: RecommendedFees = serde_wasm_bindgen::from_value(js_value.clone())
        .map_err(|e| FeeError::Unavailable(format!("Failed to parse fee data: {:?}", e)))?;
    if !fees.hour_fee.is_finite() || fees.hour_fee <= 0.0 {
        return Err(FeeError::InvalidRate(format!("hourFee {}", fees.hour_fee)));
    }
    Ok(fees)
}
