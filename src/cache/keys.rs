use std::time::Duration;

use crate::approval::types::RuleFilter;

pub const RULE_LIST_TTL: Duration = Duration::from_secs(5 * 60);
pub const CHAPTER_STATS_TTL: Duration = Duration::from_secs(60);

pub const RULES_GROUP: &str = "approval:rules";
pub const CHAPTER_STATS_GROUP: &str = "approval:chapter-stats";

pub fn rule_list_key(filter: &RuleFilter) -> String {
    let chapter = filter.chapter_id.as_deref().unwrap_or("*");
    let active = match filter.is_active {
        Some(true) => "active",
        Some(false) => "inactive",
        None => "*",
    };
    let scope = if filter.global_only { "global" } else { "all" };
    format!("approval:rules:{}:{}:{}", scope, chapter, active)
}

pub fn chapter_stats_key(chapter_id: &str) -> String {
    format!("approval:chapter:{}:stats", chapter_id)
}
