use std::sync::Arc;

use crate::approval::error::ApprovalError;
use crate::approval::types::ChapterStats;
use crate::approval::validation::require_id;
use crate::cache::ApprovalCache;
use crate::store::EvaluationStore;

/// Per-chapter aggregates, served through the stats cache when one is wired.
pub struct StatisticsService {
    evaluations: Arc<dyn EvaluationStore>,
    cache: Option<Arc<ApprovalCache>>,
}

impl StatisticsService {
    pub fn new(evaluations: Arc<dyn EvaluationStore>) -> Self {
        Self {
            evaluations,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ApprovalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn chapter_stats(&self, chapter_id: &str) -> Result<ChapterStats, ApprovalError> {
        require_id("chapterId", chapter_id)?;

        if let Some(ref cache) = self.cache {
            if let Some(stats) = cache.chapter_stats(chapter_id).await {
                return Ok(stats);
            }
        }

        let stats = self.evaluations.chapter_stats(chapter_id).await?;
        if let Some(ref cache) = self.cache {
            cache.put_chapter_stats(&stats).await;
        }
        Ok(stats)
    }
}
