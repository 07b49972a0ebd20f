use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    /// The exchange understood the request and refused it (insufficient
    /// margin, filter violation, unknown order, ...).
    #[error("order rejected by exchange: {0}")]
    Rejected(String),

    /// The request may have been delivered but no response arrived. The
    /// caller must reconcile against exchange state before retrying.
    #[error("response lost after request was sent: {0}")]
    Ambiguous(String),

    /// The request never left, or failed before it could have had an
    /// effect. Safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success API response outside the order-rejection taxonomy.
    #[error("exchange api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("malformed exchange payload: {0}")]
    Payload(String),
}

#[derive(Error, Debug)]
pub enum MarketError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] cadence_store::StoreError),

    /// The minimum data needed for a snapshot is unavailable; the cycle
    /// aborts before DECIDE.
    #[error("market data unavailable: {0}")]
    MissingData(String),
}
