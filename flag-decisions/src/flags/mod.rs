pub mod evaluation_context;
pub mod flag_models;

pub use evaluation_context::EvaluationContext;
pub use flag_models::{EmergencyOverride, FlagDefinition, KillSwitchScope, TenantOverride};
