//! Temporal facts - point-in-time queries over (subject, predicate, object)
//!
//! Inserting a fact closes the previously-current row for the same triple
//! key: its unbounded `valid_to` becomes the new row's `valid_from`.
//! Timeline and pattern search are read-only projections.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{EngineError, Result};
use crate::memory::TemporalFact;
use crate::store::MetadataStore;

/// Input for inserting a temporal fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FactInput {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Defaults to now
    #[serde(default)]
    pub valid_from: Option<i64>,
    #[serde(default)]
    pub valid_to: Option<i64>,
    /// Defaults to 1.0
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Temporal-fact operations over a metadata store.
pub struct TemporalFacts {
    store: Arc<dyn MetadataStore>,
}

impl TemporalFacts {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Insert a fact, closing the currently-valid row for the same
    /// (subject, predicate, namespace) if its `valid_to` is unbounded.
    pub async fn insert(&self, input: FactInput) -> Result<TemporalFact> {
        if input.subject.trim().is_empty()
            || input.predicate.trim().is_empty()
            || input.object.trim().is_empty()
        {
            return Err(EngineError::Validation(
                "subject, predicate, and object are required".to_string(),
            ));
        }
        let confidence = input.confidence.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::Validation(
                "confidence must be in [0, 1]".to_string(),
            ));
        }
        let valid_from = input.valid_from.unwrap_or_else(|| chrono::Utc::now().timestamp());
        if let Some(valid_to) = input.valid_to {
            if valid_to < valid_from {
                return Err(EngineError::Validation(
                    "valid_from must not exceed valid_to".to_string(),
                ));
            }
        }
        let namespace = input
            .namespace
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| crate::memory::DEFAULT_NAMESPACE.to_string());

        if let Some(previous) = self
            .store
            .current_fact(&input.subject, &input.predicate, &namespace)
            .await?
        {
            if previous.valid_from <= valid_from {
                self.store.close_fact(&previous.id, valid_from).await?;
            }
        }

        let fact = TemporalFact {
            id: Uuid::new_v4().to_string(),
            subject: input.subject,
            predicate: input.predicate,
            object: input.object,
            namespace,
            valid_from,
            valid_to: input.valid_to,
            confidence,
        };
        self.store.insert_fact(&fact).await?;
        Ok(fact)
    }

    /// Facts valid at an instant (`valid_from <= at < valid_to`), ordered
    /// by confidence then recency of validity.
    pub async fn query_at(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        at: Option<i64>,
        namespace: &str,
    ) -> Result<Vec<TemporalFact>> {
        let at = at.unwrap_or_else(|| chrono::Utc::now().timestamp());
        Ok(self.store.facts_at(subject, predicate, at, namespace).await?)
    }

    /// Full history of a subject, oldest first.
    pub async fn timeline(&self, subject: &str, namespace: &str) -> Result<Vec<TemporalFact>> {
        Ok(self.store.fact_timeline(subject, namespace, 256).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete_fact(id).await?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn facts() -> (TemporalFacts, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("facts.db")).unwrap();
        (TemporalFacts::new(Arc::new(store)), dir)
    }

    fn ceo_fact(object: &str, valid_from: i64) -> FactInput {
        FactInput {
            subject: "OpenAI".to_string(),
            predicate: "has_CEO".to_string(),
            object: object.to_string(),
            namespace: None,
            valid_from: Some(valid_from),
            valid_to: None,
            confidence: Some(1.0),
        }
    }

    #[tokio::test]
    async fn test_insert_closes_previous_row() {
        let (facts, _dir) = facts();
        facts.insert(ceo_fact("Sam", 100)).await.unwrap();
        facts.insert(ceo_fact("Mira", 200)).await.unwrap();

        // Before the change: old object
        let before = facts
            .query_at(Some("OpenAI"), Some("has_CEO"), Some(150), "global")
            .await
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].object, "Sam");
        assert_eq!(before[0].valid_to, Some(200));

        // At the boundary: new object only
        let at_change = facts
            .query_at(Some("OpenAI"), Some("has_CEO"), Some(200), "global")
            .await
            .unwrap();
        assert_eq!(at_change.len(), 1);
        assert_eq!(at_change[0].object, "Mira");
    }

    #[tokio::test]
    async fn test_timeline_is_chronological() {
        let (facts, _dir) = facts();
        facts.insert(ceo_fact("Sam", 100)).await.unwrap();
        facts.insert(ceo_fact("Mira", 200)).await.unwrap();
        facts.insert(ceo_fact("Sam", 300)).await.unwrap();

        let timeline = facts.timeline("OpenAI", "global").await.unwrap();
        assert_eq!(timeline.len(), 3);
        assert!(timeline.windows(2).all(|w| w[0].valid_from <= w[1].valid_from));
    }

    #[tokio::test]
    async fn test_validation() {
        let (facts, _dir) = facts();
        let mut bad = ceo_fact("Sam", 100);
        bad.subject = " ".to_string();
        assert!(matches!(
            facts.insert(bad).await,
            Err(EngineError::Validation(_))
        ));

        let mut bad_interval = ceo_fact("Sam", 100);
        bad_interval.valid_to = Some(50);
        assert!(facts.insert(bad_interval).await.is_err());

        let mut bad_confidence = ceo_fact("Sam", 100);
        bad_confidence.confidence = Some(1.5);
        assert!(facts.insert(bad_confidence).await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_scoping() {
        let (facts, _dir) = facts();
        let mut scoped = ceo_fact("Sam", 100);
        scoped.namespace = Some("acme".to_string());
        facts.insert(scoped).await.unwrap();

        assert!(facts
            .query_at(Some("OpenAI"), None, Some(150), "global")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            facts
                .query_at(Some("OpenAI"), None, Some(150), "acme")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_fact() {
        let (facts, _dir) = facts();
        let inserted = facts.insert(ceo_fact("Sam", 100)).await.unwrap();
        assert!(facts.delete(&inserted.id).await.unwrap());
        assert!(!facts.delete(&inserted.id).await.unwrap());
    }
}
