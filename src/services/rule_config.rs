use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::approval::error::ApprovalError;
use crate::approval::rules::CriticalChapters;
use crate::approval::types::{ExtensionData, NewRule, Rule, RuleFilter};
use crate::approval::validation::{require_id, validate_rule_settings};
use crate::cache::ApprovalCache;
use crate::store::{EvaluationStore, RuleStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    #[serde(default)]
    pub chapter_id: Option<String>,
    pub min_score_threshold: f64,
    pub max_attempts: u32,
    #[serde(default)]
    pub allow_error_carryover: bool,
    #[serde(default)]
    pub metadata: Option<ExtensionData>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub min_score_threshold: Option<f64>,
    pub max_attempts: Option<u32>,
    pub allow_error_carryover: Option<bool>,
    pub is_active: Option<bool>,
    pub metadata: Option<ExtensionData>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteOutcome {
    /// Removed; nothing referenced the rule.
    Deleted,
    /// Kept for evaluations that reference it, but no longer applied.
    Deactivated,
}

/// Administrative CRUD over rules. Every mutation fires the cache
/// invalidation hook before returning.
pub struct RuleConfigService {
    rules: Arc<dyn RuleStore>,
    evaluations: Arc<dyn EvaluationStore>,
    critical: CriticalChapters,
    cache: Option<Arc<ApprovalCache>>,
}

impl RuleConfigService {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        evaluations: Arc<dyn EvaluationStore>,
        critical: CriticalChapters,
    ) -> Self {
        Self {
            rules,
            evaluations,
            critical,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ApprovalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Creates a rule for the input's scope, or updates the active rule that
    /// already governs that scope.
    pub async fn configure_rule(&self, input: RuleInput) -> Result<Rule, ApprovalError> {
        let chapter_id = normalize_chapter(input.chapter_id);
        validate_rule_settings(
            chapter_id.as_deref(),
            input.min_score_threshold,
            input.max_attempts,
            &self.critical,
        )?;

        let existing = match chapter_id.as_deref() {
            Some(chapter) => self.rules.find_active_for_chapter(chapter).await?,
            None => self.rules.find_active_global().await?,
        };

        let rule = match existing.into_iter().max_by_key(|r| r.updated_at) {
            Some(mut current) => {
                current.min_score_threshold = input.min_score_threshold;
                current.max_attempts = input.max_attempts;
                current.allow_error_carryover = input.allow_error_carryover;
                if let Some(metadata) = input.metadata {
                    current.metadata = metadata;
                }
                if input.description.is_some() {
                    current.description = input.description;
                }
                let updated = self.rules.update(&current).await?;
                info!(rule_id = %updated.id, chapter_id = ?updated.chapter_id, "approval rule updated in place");
                updated
            }
            None => {
                let created = self
                    .rules
                    .create(NewRule {
                        chapter_id,
                        min_score_threshold: input.min_score_threshold,
                        max_attempts: input.max_attempts,
                        allow_error_carryover: input.allow_error_carryover,
                        is_active: true,
                        metadata: input.metadata.unwrap_or_default(),
                        description: input.description,
                    })
                    .await?;
                info!(rule_id = %created.id, chapter_id = ?created.chapter_id, "approval rule created");
                created
            }
        };

        self.invalidate().await;
        Ok(rule)
    }

    /// Applies `update` to the rule. Reactivating a rule deactivates whatever
    /// other rule is active in the same scope, so a scope keeps one active rule.
    pub async fn update_rule(&self, id: &str, update: RuleUpdate) -> Result<Rule, ApprovalError> {
        let mut rule = self.get_rule(id).await?;
        let was_active = rule.is_active;

        if let Some(threshold) = update.min_score_threshold {
            rule.min_score_threshold = threshold;
        }
        if let Some(max_attempts) = update.max_attempts {
            rule.max_attempts = max_attempts;
        }
        if let Some(carryover) = update.allow_error_carryover {
            rule.allow_error_carryover = carryover;
        }
        if let Some(active) = update.is_active {
            rule.is_active = active;
        }
        if let Some(metadata) = update.metadata {
            rule.metadata = metadata;
        }
        if update.description.is_some() {
            rule.description = update.description;
        }

        validate_rule_settings(
            rule.chapter_id.as_deref(),
            rule.min_score_threshold,
            rule.max_attempts,
            &self.critical,
        )?;

        if rule.is_active && !was_active {
            self.deactivate_scope_peers(&rule).await?;
        }

        let updated = self.rules.update(&rule).await?;
        info!(rule_id = %updated.id, "approval rule updated");
        self.invalidate().await;
        Ok(updated)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<Rule, ApprovalError> {
        self.update_rule(
            id,
            RuleUpdate {
                is_active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Hard-deletes unreferenced rules; rules that evaluations point at are
    /// deactivated instead.
    ///
    /// The rule is deactivated before references are counted, so no new
    /// evaluation can resolve it. An evaluation that resolved it earlier may
    /// still be writing: the SQLite store rejects the delete through the
    /// `ruleId` foreign key, which leaves the rule deactivated.
    pub async fn delete_rule(&self, id: &str) -> Result<DeleteOutcome, ApprovalError> {
        let mut rule = self.get_rule(id).await?;
        if rule.is_active {
            rule.is_active = false;
            self.rules.update(&rule).await?;
            self.invalidate().await;
        }

        let references = self.evaluations.count_for_rule(id).await?;
        let outcome = if references > 0 {
            DeleteOutcome::Deactivated
        } else {
            match self.rules.delete(id).await {
                Ok(true) => DeleteOutcome::Deleted,
                Ok(false) => return Err(ApprovalError::NotFound(format!("rule {id}"))),
                Err(err) if err.is_conflict() => DeleteOutcome::Deactivated,
                Err(err) => return Err(err.into()),
            }
        };

        info!(rule_id = id, references, outcome = ?outcome, "approval rule removed");
        self.invalidate().await;
        Ok(outcome)
    }

    pub async fn get_rule(&self, id: &str) -> Result<Rule, ApprovalError> {
        require_id("id", id)?;
        self.rules
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(format!("rule {id}")))
    }

    pub async fn list_rules(&self, filter: RuleFilter) -> Result<Vec<Rule>, ApprovalError> {
        let filter = RuleFilter {
            chapter_id: normalize_chapter(filter.chapter_id),
            ..filter
        };

        if let Some(ref cache) = self.cache {
            if let Some(rules) = cache.rule_list(&filter).await {
                return Ok(rules);
            }
        }

        let rules = self.rules.list(&filter).await?;

        if let Some(ref cache) = self.cache {
            cache.put_rule_list(&filter, &rules).await;
        }
        Ok(rules)
    }

    async fn deactivate_scope_peers(&self, rule: &Rule) -> Result<(), ApprovalError> {
        let peers = match rule.chapter_id.as_deref() {
            Some(chapter) => self.rules.find_active_for_chapter(chapter).await?,
            None => self.rules.find_active_global().await?,
        };

        for mut peer in peers.into_iter().filter(|p| p.id != rule.id) {
            peer.is_active = false;
            self.rules.update(&peer).await?;
            info!(rule_id = %peer.id, replaced_by = %rule.id, "approval rule superseded");
        }
        Ok(())
    }

    async fn invalidate(&self) {
        if let Some(ref cache) = self.cache {
            cache.invalidate_rules().await;
        }
    }
}

fn normalize_chapter(chapter_id: Option<String>) -> Option<String> {
    chapter_id
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEvaluationStore, MemoryRuleStore};

    fn service() -> RuleConfigService {
        RuleConfigService::new(
            Arc::new(MemoryRuleStore::new()),
            Arc::new(MemoryEvaluationStore::new()),
            CriticalChapters::default(),
        )
        .with_cache(Arc::new(ApprovalCache::in_memory()))
    }

    fn input(chapter: Option<&str>, threshold: f64) -> RuleInput {
        RuleInput {
            chapter_id: chapter.map(str::to_string),
            min_score_threshold: threshold,
            max_attempts: 3,
            allow_error_carryover: true,
            metadata: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_configure_updates_existing_scope() {
        let svc = service();
        let first = svc.configure_rule(input(Some("2"), 70.0)).await.unwrap();
        let second = svc.configure_rule(input(Some("2"), 75.0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.min_score_threshold, 75.0);

        let rules = svc.list_rules(RuleFilter::default()).await.unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[tokio::test]
    async fn test_global_and_chapter_scopes_are_separate() {
        let svc = service();
        svc.configure_rule(input(None, 80.0)).await.unwrap();
        svc.configure_rule(input(Some("2"), 70.0)).await.unwrap();
        svc.configure_rule(input(Some("  "), 85.0)).await.unwrap();

        let all = svc.list_rules(RuleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let global = svc
            .list_rules(RuleFilter {
                global_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].min_score_threshold, 85.0);
    }

    #[tokio::test]
    async fn test_critical_chapter_requires_full_threshold() {
        let svc = service();
        let err = svc.configure_rule(input(Some("4"), 90.0)).await.unwrap_err();
        assert!(err.is_validation());

        let rule = svc.configure_rule(input(Some("4"), 100.0)).await.unwrap();
        let err = svc
            .update_rule(
                &rule.id,
                RuleUpdate {
                    min_score_threshold: Some(95.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_listing_cache_invalidated_on_mutation() {
        let svc = service();
        let rule = svc.configure_rule(input(Some("2"), 70.0)).await.unwrap();

        let active = RuleFilter {
            is_active: Some(true),
            ..Default::default()
        };
        assert_eq!(svc.list_rules(active.clone()).await.unwrap().len(), 1);

        svc.set_active(&rule.id, false).await.unwrap();
        assert!(svc.list_rules(active.clone()).await.unwrap().is_empty());

        svc.set_active(&rule.id, true).await.unwrap();
        assert_eq!(svc.list_rules(active).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unreferenced_rule() {
        let svc = service();
        let rule = svc.configure_rule(input(Some("2"), 70.0)).await.unwrap();
        assert_eq!(svc.delete_rule(&rule.id).await.unwrap(), DeleteOutcome::Deleted);
        assert!(svc.get_rule(&rule.id).await.unwrap_err().is_not_found());
        assert!(svc.delete_rule(&rule.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_validates_bounds() {
        let svc = service();
        let rule = svc.configure_rule(input(None, 80.0)).await.unwrap();
        let err = svc
            .update_rule(
                &rule.id,
                RuleUpdate {
                    max_attempts: Some(11),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let updated = svc
            .update_rule(
                &rule.id,
                RuleUpdate {
                    max_attempts: Some(10),
                    description: Some("final exam".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.max_attempts, 10);
        assert_eq!(updated.description.as_deref(), Some("final exam"));
    }

    #[tokio::test]
    async fn test_reactivation_keeps_one_active_rule_per_scope() {
        let svc = service();
        let original = svc.configure_rule(input(Some("2"), 70.0)).await.unwrap();
        svc.set_active(&original.id, false).await.unwrap();

        let replacement = svc.configure_rule(input(Some("2"), 75.0)).await.unwrap();
        assert_ne!(replacement.id, original.id);

        svc.set_active(&original.id, true).await.unwrap();

        let active = svc
            .list_rules(RuleFilter {
                chapter_id: Some("2".to_string()),
                is_active: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, original.id);
        assert!(!svc.get_rule(&replacement.id).await.unwrap().is_active);
    }
}
