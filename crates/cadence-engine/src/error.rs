use thiserror::Error;

use cadence_market::MarketError;

/// Failure taxonomy of a decision cycle. Every variant is caught at the
/// cycle boundary and converted into a logged, queryable record; nothing
/// here ever propagates into the scheduler's tick loop.
#[derive(Error, Debug)]
pub enum CycleError {
    /// The market snapshot could not be assembled; the cycle aborts before
    /// DECIDE with no order side effects.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// The reasoning service never produced a structured action within the
    /// retry budget; the cycle aborts after DECIDE with no order placed.
    #[error("no structured decision after {attempts} attempts: {detail}")]
    MalformedDecision { attempts: u32, detail: String },

    /// Reasoning service transport/protocol failure (distinct from a
    /// well-formed reply without an action call).
    #[error("reasoning service error: {0}")]
    Reasoning(String),

    /// An exchange write could not be confirmed even after reconciliation.
    #[error("execution unconfirmed: {0}")]
    ExecutionAmbiguous(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] cadence_store::StoreError),

    #[error("exchange error: {0}")]
    Exchange(#[from] cadence_market::ExchangeError),
}

impl From<MarketError> for CycleError {
    fn from(e: MarketError) -> Self {
        match e {
            MarketError::MissingData(detail) => CycleError::DataUnavailable(detail),
            MarketError::Exchange(inner) => CycleError::Exchange(inner),
            MarketError::Store(inner) => CycleError::Persistence(inner),
        }
    }
}
