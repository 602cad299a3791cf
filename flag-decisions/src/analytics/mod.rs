pub mod forecast;
pub mod recommendations;
pub mod recorder;
pub mod usage;

pub use forecast::{LoadForecast, SeasonalPattern, Trend};
pub use recommendations::{Priority, Recommendation, RecommendationType};
pub use recorder::{process_usage_events, ChannelUsageSink, UsageEvent, UsageSink};
pub use usage::{
    FlagMetrics, FlagUsageSummary, StatsSummary, SystemHealth, UsageAnalyticsEngine,
    UsagePattern, UsageRecord, MAX_HISTORY_PER_FLAG,
};
