pub mod agent;
pub mod audit;
pub mod decision;
pub mod market;
pub mod order;
pub mod settings;

pub use agent::{AgentConfig, AgentMode, ExchangeCredentials, SummarizerConfig};
pub use audit::{AgentSummary, AnalysisLog, CycleStatus, TokenUsage};
pub use decision::{CancelParams, CloseParams, Decision, EntryParams, TradeAction};
pub use market::{
    BollingerValue, Candle, IndicatorFrame, MacdValue, MarketSnapshot, Position, PositionSide,
    Timeframe,
};
pub use order::{Order, OrderSide, OrderStatus};
pub use settings::{
    CadenceConfig, EngineSettings, ExchangeSettings, SchedulerSettings, StoreSettings,
    SummarizerSettings,
};
