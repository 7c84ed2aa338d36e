//! Error types shared by gateways and pipeline stages

use rust_decimal::Decimal;

/// Failures raised by the venue-facing market gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("exchange credentials missing")]
    CredentialsMissing,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("no market data for {0}")]
    NoData(String),
}

/// Failures raised by the reasoning gateway
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning request failed: {0}")]
    Request(String),

    #[error("reasoning response could not be parsed: {0}")]
    Parse(String),
}

/// Failure of a single stage's success path.
///
/// Never crosses the stage boundary: the orchestrator turns it into the
/// stage's fallback output.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid quantity calculated: {quantity} for size {size} USD at price {price}")]
    InvalidQuantity {
        quantity: Decimal,
        size: Decimal,
        price: Decimal,
    },

    #[error("invalid mark price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: Decimal },
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
