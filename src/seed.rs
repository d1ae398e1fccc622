use crate::config::Config;
use crate::services::RuleInput;
use crate::state::AppState;

pub const DEFAULT_RULE_THRESHOLD: f64 = 80.0;
pub const DEFAULT_RULE_MAX_ATTEMPTS: u32 = 3;

pub async fn seed_from_config(state: &AppState, config: &Config) {
    seed_users(state, &config.seed_user_ids).await;
    if config.seed_default_rule {
        seed_default_rule(state).await;
    }
}

pub async fn seed_users(state: &AppState, user_ids: &[String]) {
    for user_id in user_ids {
        match state.stores().users.register(user_id).await {
            Ok(true) => tracing::info!(user_id = %user_id, "seeded user"),
            Ok(false) => tracing::debug!(user_id = %user_id, "user already exists"),
            Err(err) => tracing::warn!(user_id = %user_id, error = %err, "failed to seed user"),
        }
    }
}

/// Inserts the global fallback rule unless an active one already exists.
pub async fn seed_default_rule(state: &AppState) {
    match state.stores().rules.find_active_global().await {
        Ok(existing) if !existing.is_empty() => {
            tracing::debug!("global approval rule already exists");
            return;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "failed to look up global approval rule");
            return;
        }
    }

    let input = RuleInput {
        chapter_id: None,
        min_score_threshold: DEFAULT_RULE_THRESHOLD,
        max_attempts: DEFAULT_RULE_MAX_ATTEMPTS,
        allow_error_carryover: true,
        metadata: None,
        description: Some("default global rule".to_string()),
    };

    match state.rule_config().configure_rule(input).await {
        Ok(rule) => tracing::info!(rule_id = %rule.id, "seeded default global approval rule"),
        Err(err) => tracing::warn!(error = %err, "failed to seed default global approval rule"),
    }
}
