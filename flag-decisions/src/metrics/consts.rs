// Decision cache
pub const DECISION_CACHE_HIT_COUNTER: &str = "flags_decision_cache_hit_total";
pub const DECISION_CACHE_MISS_COUNTER: &str = "flags_decision_cache_miss_total";

// Evaluation
pub const FLAG_EVALUATIONS_COUNTER: &str = "flags_evaluations_total";
pub const KILL_SWITCH_BLOCKED_COUNTER: &str = "flags_kill_switch_blocked_total";
pub const STORE_ERRORS_COUNTER: &str = "flags_store_errors_total";
pub const FLAG_EVALUATION_TIME: &str = "flags_evaluation_time";

// Experiments
pub const CONVERSIONS_RECORDED_COUNTER: &str = "flags_conversions_recorded_total";
pub const CONVERSIONS_REJECTED_COUNTER: &str = "flags_conversions_rejected_total";

// Usage analytics
pub const USAGE_EVENTS_DROPPED_COUNTER: &str = "flags_usage_events_dropped_total";
pub const USAGE_EVENTS_PROCESSED_COUNTER: &str = "flags_usage_events_processed_total";
