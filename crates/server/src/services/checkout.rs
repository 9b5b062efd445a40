// Stripe Checkout relay; sessions are not persisted

use serde::{Deserialize, Serialize};

use crate::{
    config::StripeConfig,
    error::{AppError, Result},
};

pub const ALLOWED_CURRENCIES: [&str; 3] = ["ron", "eur", "usd"];

/// Largest amount Stripe accepts for a single line, in minor units.
pub const MAX_AMOUNT_MINOR: i64 = 99_999_999;

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub amount: f64,
    pub currency: String,
    pub name: String,
}

/// A payment line in the provider's units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub amount_minor: i64,
    pub currency: &'static str,
    pub name: String,
}

impl CheckoutRequest {
    pub fn validate(&self) -> Result<CheckoutLine> {
        let currency = self.currency.trim().to_ascii_lowercase();
        let currency = ALLOWED_CURRENCIES
            .into_iter()
            .find(|c| *c == currency)
            .ok_or_else(|| {
                AppError::Validation(format!("Unsupported currency {:?}", self.currency))
            })?;

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::Validation(
                "Amount must be a positive number".to_string(),
            ));
        }
        // Bounded before the cast, which would otherwise saturate.
        let scaled = (self.amount * 100.0).round();
        if scaled < 1.0 {
            return Err(AppError::Validation(
                "Amount is below the smallest chargeable unit".to_string(),
            ));
        }
        if scaled > MAX_AMOUNT_MINOR as f64 {
            return Err(AppError::Validation(format!(
                "Amount exceeds the maximum of {}.{:02}",
                MAX_AMOUNT_MINOR / 100,
                MAX_AMOUNT_MINOR % 100
            )));
        }
        let amount_minor = scaled as i64;

        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Product name is required".to_string()));
        }

        Ok(CheckoutLine {
            amount_minor,
            currency,
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutMarkers {
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeCheckout {
    client: reqwest::Client,
    config: StripeConfig,
}

impl StripeCheckout {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn markers(&self) -> CheckoutMarkers {
        CheckoutMarkers {
            success_url: self.config.success_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
        }
    }

    pub async fn create_session(&self, line: &CheckoutLine) -> Result<String> {
        if self.config.secret_key.is_empty() {
            return Err(AppError::Upstream(
                "Payment provider is not configured".to_string(),
            ));
        }

        let amount = line.amount_minor.to_string();
        let form = [
            ("mode", "payment"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", line.currency),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            (
                "line_items[0][price_data][product_data][name]",
                line.name.as_str(),
            ),
            ("success_url", self.config.success_url.as_str()),
            ("cancel_url", self.config.cancel_url.as_str()),
        ];

        let response = self
            .client
            .post(format!(
                "{}/v1/checkout/sessions",
                self.config.api_base.trim_end_matches('/')
            ))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| format!("checkout session request failed with {status}"));
            tracing::warn!(%status, %message, "checkout session rejected");
            return Err(AppError::Upstream(message));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Unreadable checkout session: {e}")))?;

        session
            .url
            .ok_or_else(|| AppError::Upstream("Checkout session has no URL".to_string()))
    }
}
