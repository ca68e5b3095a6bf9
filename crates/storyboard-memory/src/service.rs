use std::sync::Arc;

use storyboard_core::capability::{EmbedInput, Embedder};
use storyboard_core::ledger::BudgetLedger;
use storyboard_core::model::{BudgetCategory, Candidate, MemoryEntry, Shot};

use crate::error::MemoryError;
use crate::store::{ScoredEntry, VisualMemory};

/// Result of [`MemoryService::recall`].
#[derive(Debug, Default)]
pub struct Recalled {
    pub hits: Vec<ScoredEntry>,
    /// Whether an embedding call was made and succeeded.
    pub embedded: bool,
}

/// Result of [`MemoryService::remember`]. The frame is always indexed; a
/// failed embedding leaves it with an empty vector.
#[derive(Debug)]
pub struct Remembered {
    pub seq: u64,
    pub embed_error: Option<MemoryError>,
}

impl Remembered {
    pub fn embedded(&self) -> bool {
        self.embed_error.is_none()
    }
}

/// Visual memory plus the embedder and ledger it spends through.
pub struct MemoryService {
    store: Arc<VisualMemory>,
    embedder: Arc<dyn Embedder>,
    ledger: Arc<BudgetLedger>,
}

impl MemoryService {
    pub fn new(
        store: Arc<VisualMemory>,
        embedder: Arc<dyn Embedder>,
        ledger: Arc<BudgetLedger>,
    ) -> Self {
        Self {
            store,
            embedder,
            ledger,
        }
    }

    pub fn store(&self) -> &Arc<VisualMemory> {
        &self.store
    }

    /// Top-`k` prior frames for a description, restricted to `entities`.
    ///
    /// Nothing is embedded (and nothing spent) when no stored entry could
    /// match. Budget and embedding failures are returned to the caller, who
    /// decides whether to continue without context.
    pub async fn recall(
        &self,
        description: &str,
        entities: &[String],
        k: usize,
    ) -> Result<Recalled, MemoryError> {
        if k == 0 || !self.store.has_match(entities) {
            return Ok(Recalled::default());
        }
        let vector = self.embed(EmbedInput::Text(description.to_string())).await?;
        let hits = self.store.query(&vector, k, entities);
        tracing::debug!(
            hits = hits.len(),
            entities = ?entities,
            "Memory recall"
        );
        Ok(Recalled {
            hits,
            embedded: true,
        })
    }

    /// Index an accepted candidate of `shot`.
    pub async fn remember(&self, shot: &Shot, candidate: &Candidate) -> Remembered {
        let description = shot.description();
        let input = match &candidate.image {
            Some(image) => EmbedInput::Frame {
                image: image.clone(),
                description: description.clone(),
            },
            None => EmbedInput::Text(description.clone()),
        };
        let (embedding, embed_error) = match self.embed(input).await {
            Ok(vector) => (vector, None),
            Err(e) => {
                tracing::warn!(
                    shot = %shot.id,
                    error = %e,
                    "Embedding accepted frame failed, indexing without vector"
                );
                (Vec::new(), Some(e))
            }
        };
        let mut entry = MemoryEntry::new(
            shot.id,
            candidate.id.clone(),
            embedding,
            shot.entities.clone(),
            description,
        );
        if let Some(image) = &candidate.image {
            entry = entry.with_image(image.clone());
        }
        let seq = self.store.index(entry);
        Remembered { seq, embed_error }
    }

    async fn embed(&self, input: EmbedInput) -> Result<Vec<f32>, MemoryError> {
        let estimate = self.embedder.estimate_cost(&input);
        let auth = self.ledger.reserve(BudgetCategory::Embedding, estimate)?;
        match self.embedder.embed(input).await {
            Ok(embedding) => {
                self.ledger.settle(auth, embedding.cost);
                Ok(embedding.vector)
            }
            Err(e) => {
                self.ledger.settle(auth, 0.0);
                Err(MemoryError::Embedding(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use storyboard_core::capability::{CapabilityError, Embedding};
    use storyboard_core::config::BudgetLimits;
    use storyboard_core::model::{Camera, ImagePayload, RenderParams, ShotId};

    /// Embeds by keyword: one dimension per known entity name.
    struct KeywordEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn estimate_cost(&self, _input: &EmbedInput) -> f64 {
            0.01
        }

        async fn embed(&self, input: EmbedInput) -> Result<Embedding, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CapabilityError::Unavailable("embedder offline".into()));
            }
            let text = input.text().to_lowercase();
            let vector = ["mara", "tomas", "lighthouse"]
                .iter()
                .map(|k| if text.contains(k) { 1.0 } else { 0.0 })
                .collect();
            Ok(Embedding { vector, cost: 0.01 })
        }
    }

    fn shot(index: u32, action: &str, entities: &[&str]) -> Shot {
        let mut shot = Shot::new(ShotId::new(1, index), action, Camera::new("eye-level", "medium"));
        shot.entities = entities.iter().map(|e| e.to_string()).collect();
        shot
    }

    fn accepted(shot: &Shot) -> Candidate {
        Candidate::rendered(
            shot.id,
            0,
            0,
            ImagePayload::new(vec![shot.id.index as u8; 4]),
            RenderParams::default(),
        )
    }

    fn service(embedder: Arc<KeywordEmbedder>, budget: f64) -> MemoryService {
        MemoryService::new(
            Arc::new(VisualMemory::new()),
            embedder,
            Arc::new(BudgetLedger::new(&BudgetLimits::uniform(budget))),
        )
    }

    #[tokio::test]
    async fn test_recall_on_empty_memory_spends_nothing() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let service = service(embedder.clone(), 1.0);
        let recalled = service.recall("Mara waits", &["mara".into()], 3).await.unwrap();
        assert!(recalled.hits.is_empty());
        assert!(!recalled.embedded);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shared_entity_recalls_prior_frame_first() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let service = service(embedder.clone(), 1.0);

        let first = shot(1, "Mara lights the lighthouse lamp", &["mara"]);
        let other = shot(2, "Tomas rows ashore", &["tomas"]);
        let remembered = service.remember(&first, &accepted(&first)).await;
        assert!(remembered.embedded());
        service.remember(&other, &accepted(&other)).await;

        let second = shot(3, "Mara descends the stairs", &["mara"]);
        let recalled = service
            .recall(&second.description(), &second.entities, 3)
            .await
            .unwrap();
        assert!(recalled.embedded);
        let hits = recalled.hits;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.shot_id, first.id);
        assert_eq!(hits[0].entry.seq, remembered.seq);
        assert!(hits[0].entry.image.is_some());
    }

    #[tokio::test]
    async fn test_remember_indexes_even_when_embedding_fails() {
        let embedder = Arc::new(KeywordEmbedder {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let service = service(embedder, 1.0);
        let s = shot(1, "Mara", &["mara"]);
        let remembered = service.remember(&s, &accepted(&s)).await;
        assert!(!remembered.embedded());
        assert!(matches!(
            remembered.embed_error,
            Some(MemoryError::Embedding(CapabilityError::Unavailable(_)))
        ));
        assert_eq!(service.store().len(), 1);
        assert!(service.store().get(remembered.seq).unwrap().embedding.is_empty());
    }

    #[tokio::test]
    async fn test_recall_budget_denied() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let service = service(embedder.clone(), 0.015);
        let s = shot(1, "Mara", &["mara"]);
        service.remember(&s, &accepted(&s)).await;

        let err = service.recall("Mara", &[], 3).await.unwrap_err();
        assert!(matches!(err, MemoryError::Budget(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
