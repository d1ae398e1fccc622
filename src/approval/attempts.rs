use std::sync::Arc;

use super::types::Evaluation;
use crate::store::{EvaluationStore, StoreError};

/// Numbers attempts per (user, chapter).
///
/// The next number is `count + 1`, which relies on evaluation records being
/// append-only: deleting a record out of order would make the count collide
/// with an existing attempt number.
#[derive(Clone)]
pub struct AttemptTracker {
    evaluations: Arc<dyn EvaluationStore>,
}

impl AttemptTracker {
    pub fn new(evaluations: Arc<dyn EvaluationStore>) -> Self {
        Self { evaluations }
    }

    pub async fn next_attempt_number(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<u32, StoreError> {
        let count = self
            .evaluations
            .count_for_user_chapter(user_id, chapter_id)
            .await?;
        Ok(count.saturating_add(1))
    }

    pub async fn previous_attempts(
        &self,
        user_id: &str,
        chapter_id: &str,
        attempt_number: u32,
    ) -> Result<Vec<Evaluation>, StoreError> {
        if attempt_number <= 1 {
            return Ok(Vec::new());
        }
        self.evaluations
            .find_previous_attempts(user_id, chapter_id, attempt_number)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::types::{EvaluationStatus, NewEvaluation};
    use crate::store::MemoryEvaluationStore;

    #[tokio::test]
    async fn test_numbering_follows_record_count() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let tracker = AttemptTracker::new(store.clone());

        assert_eq!(tracker.next_attempt_number("u1", "1").await.unwrap(), 1);
        assert!(tracker.previous_attempts("u1", "1", 1).await.unwrap().is_empty());

        store
            .create(NewEvaluation {
                user_id: "u1".to_string(),
                rule_id: "r".to_string(),
                chapter_id: "1".to_string(),
                score: 50.0,
                threshold: 80.0,
                status: EvaluationStatus::Rejected,
                attempt_number: 1,
                errors_from_previous_attempts: 0,
                evaluation_data: Default::default(),
                evaluated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(tracker.next_attempt_number("u1", "1").await.unwrap(), 2);
        assert_eq!(tracker.next_attempt_number("u1", "2").await.unwrap(), 1);
        assert_eq!(tracker.previous_attempts("u1", "1", 2).await.unwrap().len(), 1);
    }
}
