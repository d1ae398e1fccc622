use std::collections::HashSet;
use std::sync::Arc;

use super::error::ApprovalError;
use super::types::Rule;
use crate::store::RuleStore;

pub const CRITICAL_THRESHOLD: f64 = 100.0;
pub const DEFAULT_THRESHOLD: f64 = 80.0;

const DEFAULT_CRITICAL_CHAPTERS: &[&str] = &["4", "5"];

/// Chapters that only pass with a perfect score, whatever their rule says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalChapters(HashSet<String>);

impl CriticalChapters {
    pub fn new<I, S>(chapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(chapters.into_iter().map(Into::into).collect())
    }

    /// Parses a comma separated list, ignoring blank entries.
    pub fn parse(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn contains(&self, chapter_id: &str) -> bool {
        self.0.contains(chapter_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CriticalChapters {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_CHAPTERS.iter().copied())
    }
}

/// Threshold actually applied to an attempt.
///
/// Critical chapters always require 100. Otherwise the stored threshold is
/// used, except that a stored 0 falls back to `default_threshold`; an unset
/// threshold and one configured as 0 are indistinguishable here.
pub fn effective_threshold(
    rule: &Rule,
    chapter_id: &str,
    critical: &CriticalChapters,
    default_threshold: f64,
) -> f64 {
    if critical.contains(chapter_id) {
        return CRITICAL_THRESHOLD;
    }
    if rule.min_score_threshold == 0.0 {
        return default_threshold;
    }
    rule.min_score_threshold
}

/// Picks the single governing rule out of an applicable set. Chapter rules win
/// outright over global ones; within a scope the most recently updated wins.
pub fn select_rule(chapter_id: &str, candidates: Vec<Rule>) -> Option<Rule> {
    let (chapter_rules, global_rules): (Vec<Rule>, Vec<Rule>) = candidates
        .into_iter()
        .filter(|r| r.is_active)
        .partition(|r| r.applies_to(chapter_id));

    let pool = if chapter_rules.is_empty() {
        global_rules
            .into_iter()
            .filter(Rule::is_global)
            .collect::<Vec<_>>()
    } else {
        chapter_rules
    };

    pool.into_iter().max_by_key(|r| r.updated_at)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub rule: Rule,
    pub effective_threshold: f64,
    pub critical: bool,
}

#[derive(Clone)]
pub struct RuleResolver {
    rules: Arc<dyn RuleStore>,
    critical: CriticalChapters,
    default_threshold: f64,
}

impl RuleResolver {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        critical: CriticalChapters,
        default_threshold: f64,
    ) -> Self {
        Self {
            rules,
            critical,
            default_threshold,
        }
    }

    pub fn critical_chapters(&self) -> &CriticalChapters {
        &self.critical
    }

    pub async fn resolve(&self, chapter_id: &str) -> Result<ResolvedRule, ApprovalError> {
        let candidates = self.rules.find_applicable(chapter_id).await?;
        let rule = select_rule(chapter_id, candidates)
            .ok_or_else(|| ApprovalError::rule_not_found(chapter_id))?;

        let critical = self.critical.contains(chapter_id);
        let threshold =
            effective_threshold(&rule, chapter_id, &self.critical, self.default_threshold);

        if critical && rule.min_score_threshold != CRITICAL_THRESHOLD {
            tracing::debug!(
                chapter_id,
                rule_id = %rule.id,
                stored = rule.min_score_threshold,
                "critical chapter threshold overridden"
            );
        }

        Ok(ResolvedRule {
            rule,
            effective_threshold: threshold,
            critical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn rule(id: &str, chapter: Option<&str>, threshold: f64) -> Rule {
        let now = Utc::now();
        Rule {
            id: id.to_string(),
            chapter_id: chapter.map(str::to_string),
            min_score_threshold: threshold,
            max_attempts: 3,
            allow_error_carryover: true,
            is_active: true,
            metadata: Default::default(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_critical_chapters_override() {
        let critical = CriticalChapters::default();
        let r = rule("r1", Some("4"), 60.0);
        assert_eq!(effective_threshold(&r, "4", &critical, DEFAULT_THRESHOLD), 100.0);
        assert_eq!(effective_threshold(&r, "5", &critical, DEFAULT_THRESHOLD), 100.0);
        assert_eq!(effective_threshold(&r, "3", &critical, DEFAULT_THRESHOLD), 60.0);
    }

    #[test]
    fn test_zero_threshold_falls_back_to_default() {
        let critical = CriticalChapters::default();
        let r = rule("r1", None, 0.0);
        assert_eq!(effective_threshold(&r, "1", &critical, DEFAULT_THRESHOLD), 80.0);
        assert_eq!(effective_threshold(&r, "1", &critical, 70.0), 70.0);
    }

    #[test]
    fn test_parse_critical_list() {
        let critical = CriticalChapters::parse(" 4, 5 ,,9 ");
        assert_eq!(critical.len(), 3);
        assert!(critical.contains("9"));
        assert!(!critical.contains("1"));
        assert!(CriticalChapters::parse("").is_empty());
    }

    #[test]
    fn test_chapter_rule_beats_global() {
        let selected = select_rule(
            "2",
            vec![rule("global", None, 70.0), rule("chapter", Some("2"), 90.0)],
        )
        .unwrap();
        assert_eq!(selected.id, "chapter");
    }

    #[test]
    fn test_global_rule_used_when_no_chapter_rule() {
        let selected = select_rule(
            "2",
            vec![rule("other", Some("3"), 90.0), rule("global", None, 70.0)],
        )
        .unwrap();
        assert_eq!(selected.id, "global");
        assert!(select_rule("2", vec![rule("other", Some("3"), 90.0)]).is_none());
    }

    #[test]
    fn test_most_recent_rule_wins_within_scope() {
        let mut older = rule("older", Some("2"), 70.0);
        older.updated_at = Utc::now() - Duration::hours(1);
        let newer = rule("newer", Some("2"), 75.0);
        let selected = select_rule("2", vec![older, newer]).unwrap();
        assert_eq!(selected.id, "newer");
    }

    #[test]
    fn test_inactive_rules_ignored() {
        let mut inactive = rule("inactive", Some("2"), 70.0);
        inactive.is_active = false;
        let selected = select_rule("2", vec![inactive, rule("global", None, 60.0)]).unwrap();
        assert_eq!(selected.id, "global");
    }
}
