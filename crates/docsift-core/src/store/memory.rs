//! In-memory store implementation for tests.
//!
//! `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is a
//! brute-force metric scan over all rows of the requested model; keyword
//! search is naive term containment (no FTS index). Behavior mirrors the
//! SQLite store closely enough for pipeline and ranking tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{SiftError, SiftResult};
use crate::models::{Document, EmbeddingRecord, EmbeddingType};
use crate::query::{document_matches, KeywordSearchRequest, VectorSearchRequest};
use crate::vector::ModelRegistry;

use super::{
    ConflictPolicy, DocumentStore, DocumentSummary, EmbeddingInfo, EmbeddingStore, SearchCandidate,
};

/// In-memory store for tests and experiments.
pub struct InMemoryStore {
    registry: ModelRegistry,
    docs: RwLock<HashMap<String, Document>>,
    embeddings: RwLock<Vec<EmbeddingRecord>>,
}

impl InMemoryStore {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            docs: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(Vec::new()),
        }
    }

    fn matching_docs(&self, filters: &[crate::query::MetadataFilter]) -> Vec<String> {
        let docs = self.docs.read().unwrap();
        docs.values()
            .filter(|d| document_matches(d, filters))
            .map(|d| d.id.clone())
            .collect()
    }
}

fn type_allowed(types: &Option<Vec<EmbeddingType>>, et: EmbeddingType) -> bool {
    match types {
        Some(list) => list.contains(&et),
        None => true,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn add(&self, doc: &Document, policy: ConflictPolicy) -> SiftResult<String> {
        let mut docs = self.docs.write().unwrap();

        if let Some(source_id) = &doc.source_id {
            let existing = docs
                .values()
                .find(|d| d.source_id.as_deref() == Some(source_id.as_str()))
                .map(|d| d.id.clone());
            if let Some(existing_id) = existing {
                match policy {
                    ConflictPolicy::Reject => {
                        return Err(SiftError::Conflict {
                            source_id: source_id.clone(),
                            existing_id,
                        });
                    }
                    ConflictPolicy::Update => {
                        let entry = docs.get_mut(&existing_id).expect("looked up above");
                        entry.source_uri = doc.source_uri.clone();
                        entry.title = doc.title.clone();
                        entry.created_at = doc.created_at;
                        entry.metadata = doc.metadata.clone();
                        return Ok(existing_id);
                    }
                }
            }
        }

        docs.insert(doc.id.clone(), doc.clone());
        Ok(doc.id.clone())
    }

    async fn get(&self, id: &str) -> SiftResult<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn find_by_source_id(&self, source_id: &str) -> SiftResult<Option<Document>> {
        Ok(self
            .docs
            .read()
            .unwrap()
            .values()
            .find(|d| d.source_id.as_deref() == Some(source_id))
            .cloned())
    }

    async fn delete(&self, id: &str) -> SiftResult<bool> {
        let removed = self.docs.write().unwrap().remove(id).is_some();
        if removed {
            self.embeddings
                .write()
                .unwrap()
                .retain(|e| e.document_id != id);
        }
        Ok(removed)
    }

    async fn summary(&self, id: &str) -> SiftResult<Option<DocumentSummary>> {
        Ok(self.docs.read().unwrap().get(id).map(|d| DocumentSummary {
            id: d.id.clone(),
            title: d.title.clone(),
            source_type: d.source_type,
            created_at: d.created_at,
        }))
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryStore {
    async fn upsert(&self, record: &EmbeddingRecord) -> SiftResult<()> {
        self.registry
            .check_vector(&record.embedding_model, &record.vector)?;
        let mut rows = self.embeddings.write().unwrap();
        rows.retain(|e| {
            !(e.document_id == record.document_id
                && e.chunk_index == record.chunk_index
                && e.embedding_type == record.embedding_type)
        });
        rows.push(record.clone());
        Ok(())
    }

    async fn content_hashes(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> SiftResult<HashMap<(i64, EmbeddingType), Option<String>>> {
        Ok(self
            .embeddings
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.document_id == document_id && e.embedding_model == embedding_model)
            .map(|e| ((e.chunk_index, e.embedding_type), e.content_hash.clone()))
            .collect())
    }

    async fn remove_chunks_above(&self, document_id: &str, max_index: i64) -> SiftResult<u64> {
        let mut rows = self.embeddings.write().unwrap();
        let before = rows.len();
        rows.retain(|e| {
            !(e.document_id == document_id
                && e.embedding_type == EmbeddingType::ContentChunk
                && e.chunk_index > max_index)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn count_for_document(&self, document_id: &str) -> SiftResult<u64> {
        Ok(self
            .embeddings
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.document_id == document_id)
            .count() as u64)
    }

    async fn list_for_document(&self, document_id: &str) -> SiftResult<Vec<EmbeddingInfo>> {
        let mut infos: Vec<EmbeddingInfo> = self
            .embeddings
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.document_id == document_id)
            .map(|e| EmbeddingInfo {
                chunk_index: e.chunk_index,
                embedding_type: e.embedding_type,
                embedding_model: e.embedding_model.clone(),
                content_hash: e.content_hash.clone(),
            })
            .collect();
        infos.sort_by_key(|i| (i.chunk_index, i.embedding_type));
        Ok(infos)
    }

    async fn vector_search(
        &self,
        req: &VectorSearchRequest,
        query_vector: &[f32],
    ) -> SiftResult<Vec<SearchCandidate>> {
        let spec = self.registry.check_vector(&req.embedding_model, query_vector)?;
        let allowed_docs = self.matching_docs(&req.filters);

        let rows = self.embeddings.read().unwrap();
        let mut candidates: Vec<SearchCandidate> = rows
            .iter()
            .filter(|e| e.embedding_model == req.embedding_model)
            .filter(|e| type_allowed(&req.target_embedding_types, e.embedding_type))
            .filter(|e| allowed_docs.contains(&e.document_id))
            .map(|e| SearchCandidate {
                embedding_id: e.id.clone(),
                document_id: e.document_id.clone(),
                embedding_type: e.embedding_type,
                chunk_index: e.chunk_index,
                content: e.content.clone(),
                raw_score: spec.metric.similarity(query_vector, &e.vector) as f64,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(req.candidate_window);
        Ok(candidates)
    }

    async fn keyword_search(
        &self,
        req: &KeywordSearchRequest,
    ) -> SiftResult<Vec<SearchCandidate>> {
        let query_lower = req.query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let allowed_docs = self.matching_docs(&req.filters);

        let rows = self.embeddings.read().unwrap();
        let mut candidates: Vec<SearchCandidate> = rows
            .iter()
            .filter(|e| type_allowed(&req.target_embedding_types, e.embedding_type))
            .filter(|e| allowed_docs.contains(&e.document_id))
            .filter_map(|e| {
                let content = e.content.as_deref()?;
                let text_lower = content.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if matches == 0 {
                    return None;
                }
                Some(SearchCandidate {
                    embedding_id: e.id.clone(),
                    document_id: e.document_id.clone(),
                    embedding_type: e.embedding_type,
                    chunk_index: e.chunk_index,
                    content: e.content.clone(),
                    raw_score: matches as f64,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(req.candidate_window);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DocumentMetadata;
    use crate::models::SourceType;
    use crate::vector::DistanceMetric;
    use chrono::Utc;

    fn registry() -> ModelRegistry {
        let mut reg = ModelRegistry::new();
        reg.register("m3", 3, DistanceMetric::Cosine).unwrap();
        reg
    }

    fn doc(id: &str, source_id: Option<&str>) -> Document {
        Document {
            id: id.to_string(),
            source_type: SourceType::Note,
            source_id: source_id.map(str::to_string),
            source_uri: None,
            title: Some(format!("doc {}", id)),
            created_at: Utc::now(),
            added_at: Utc::now(),
            metadata: DocumentMetadata::default(),
        }
    }

    fn embedding(id: &str, doc_id: &str, idx: i64, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: idx,
            embedding_type: EmbeddingType::ContentChunk,
            content: Some(format!("chunk {}", idx)),
            vector,
            embedding_model: "m3".to_string(),
            content_hash: None,
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_conflict_policies() {
        let store = InMemoryStore::new(registry());
        let d1 = doc("d1", Some("src-1"));
        store.add(&d1, ConflictPolicy::Reject).await.unwrap();

        let mut d2 = doc("d2", Some("src-1"));
        d2.title = Some("updated".into());

        let err = store.add(&d2, ConflictPolicy::Reject).await.unwrap_err();
        assert!(matches!(err, SiftError::Conflict { .. }));

        let id = store.add(&d2, ConflictPolicy::Update).await.unwrap();
        assert_eq!(id, "d1");
        let stored = store.get("d1").await.unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn test_null_source_ids_never_conflict() {
        let store = InMemoryStore::new(registry());
        store
            .add(&doc("d1", None), ConflictPolicy::Reject)
            .await
            .unwrap();
        store
            .add(&doc("d2", None), ConflictPolicy::Reject)
            .await
            .unwrap();
        assert!(store.get("d1").await.unwrap().is_some());
        assert!(store.get("d2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_aspect() {
        let store = InMemoryStore::new(registry());
        store
            .add(&doc("d1", None), ConflictPolicy::Reject)
            .await
            .unwrap();

        store
            .upsert(&embedding("e1", "d1", 1, vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(&embedding("e2", "d1", 1, vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(store.count_for_document("d1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryStore::new(registry());
        store
            .add(&doc("d1", None), ConflictPolicy::Reject)
            .await
            .unwrap();
        store
            .upsert(&embedding("e1", "d1", 1, vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();

        assert!(store.delete("d1").await.unwrap());
        assert_eq!(store.count_for_document("d1").await.unwrap(), 0);
        assert!(!store.delete("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_vector_search_scoped_to_model_and_ordered() {
        let store = InMemoryStore::new(registry());
        store
            .add(&doc("d1", None), ConflictPolicy::Reject)
            .await
            .unwrap();
        store
            .upsert(&embedding("e1", "d1", 1, vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(&embedding("e2", "d1", 2, vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();

        let req = VectorSearchRequest {
            text: String::new(),
            embedding_model: "m3".into(),
            filters: Vec::new(),
            target_embedding_types: None,
            candidate_window: 10,
        };
        let hits = store.vector_search(&req, &[1.0, 0.1, 0.0]).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].embedding_id, "e1");

        // Wrong-length query vector is rejected by the registry.
        assert!(store.vector_search(&req, &[1.0]).await.is_err());
    }
}
