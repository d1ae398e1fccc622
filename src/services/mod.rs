pub mod rule_config;
pub mod statistics;

pub use rule_config::{DeleteOutcome, RuleConfigService, RuleInput, RuleUpdate};
pub use statistics::StatisticsService;
