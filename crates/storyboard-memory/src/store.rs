use std::fs;
use std::io::{Read as _, Write as _};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use storyboard_core::model::MemoryEntry;

use crate::error::MemoryError;
use crate::similarity::cosine;

const SNAPSHOT_VERSION: u32 = 1;

/// A memory entry together with its similarity to the query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<MemoryEntry>,
}

/// Append-only index of accepted frames.
///
/// Entries are numbered from 1 in insertion order and never change once
/// inserted. Queries never fail.
#[derive(Debug, Default)]
pub struct VisualMemory {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl VisualMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, assigning the next sequence number. Returns that number.
    pub fn index(&self, mut entry: MemoryEntry) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        entry.seq = seq;
        tracing::debug!(
            seq,
            shot = %entry.shot_id,
            candidate = %entry.candidate_id.short(),
            dims = entry.embedding.len(),
            "Memory entry indexed"
        );
        entries.push(entry);
        seq
    }

    /// At most `k` entries whose tags intersect `entity_filter`, most similar
    /// first. Equal similarities rank the most recently inserted first.
    pub fn query(&self, descriptor: &[f32], k: usize, entity_filter: &[String]) -> Vec<ScoredEntry> {
        if k == 0 {
            return Vec::new();
        }
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<ScoredEntry> = entries
            .iter()
            .filter(|e| e.matches_entities(entity_filter))
            .map(|e| ScoredEntry {
                similarity: cosine(descriptor, &e.embedding),
                entry: e.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.entry.seq.cmp(&a.entry.seq))
        });
        scored.truncate(k);
        scored
    }

    /// Whether any entry would pass `entity_filter`.
    pub fn has_match(&self, entity_filter: &[String]) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.matches_entities(entity_filter))
    }

    pub fn get(&self, seq: u64) -> Option<MemoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.seq == seq)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write metadata and vectors (no image bytes) as JSON under an exclusive lock.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), MemoryError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: self.entries(),
        };
        let json = serde_json::to_string(&snapshot)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        (&file).write_all(json.as_bytes())?;
        fs2::FileExt::unlock(&file)?;
        Ok(())
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, MemoryError> {
        let file = fs::OpenOptions::new().read(true).open(path)?;
        fs2::FileExt::lock_shared(&file)?;
        let mut data = String::new();
        let read = (&file).read_to_string(&mut data);
        fs2::FileExt::unlock(&file)?;
        read?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MemoryError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let mut entries = snapshot.entries;
        entries.sort_by_key(|e| e.seq);
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyboard_core::model::{CandidateId, ShotId};
    use tempfile::TempDir;

    fn entry(index: u32, vector: Vec<f32>, tags: &[&str]) -> MemoryEntry {
        MemoryEntry::new(
            ShotId::new(1, index),
            CandidateId::from(format!("c{index}").as_str()),
            vector,
            tags.iter().map(|t| t.to_string()).collect(),
            format!("shot {index}"),
        )
    }

    #[test]
    fn test_empty_memory_query() {
        let memory = VisualMemory::new();
        assert!(memory.query(&[1.0, 0.0], 3, &[]).is_empty());
        assert!(memory.query(&[], 3, &["mara".into()]).is_empty());
        assert!(!memory.has_match(&[]));
    }

    #[test]
    fn test_index_assigns_sequence() {
        let memory = VisualMemory::new();
        assert_eq!(memory.index(entry(1, vec![1.0], &[])), 1);
        assert_eq!(memory.index(entry(2, vec![1.0], &[])), 2);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.get(2).unwrap().shot_id, ShotId::new(1, 2));
    }

    #[test]
    fn test_query_ranks_and_filters() {
        let memory = VisualMemory::new();
        memory.index(entry(1, vec![1.0, 0.0], &["mara"]));
        memory.index(entry(2, vec![0.0, 1.0], &["tomas"]));
        memory.index(entry(3, vec![0.7, 0.7], &["mara", "tomas"]));

        let hits = memory.query(&[1.0, 0.1], 2, &["mara".into()]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.seq, 1);
        assert_eq!(hits[1].entry.seq, 3);

        let all = memory.query(&[1.0, 0.1], 10, &[]);
        assert_eq!(all.len(), 3);
        assert!(memory.query(&[1.0, 0.0], 3, &["ghost".into()]).is_empty());
        assert!(memory.query(&[1.0, 0.0], 0, &[]).is_empty());
    }

    #[test]
    fn test_ties_prefer_newest() {
        let memory = VisualMemory::new();
        memory.index(entry(1, vec![1.0, 0.0], &["mara"]));
        memory.index(entry(2, vec![2.0, 0.0], &["mara"]));
        memory.index(entry(3, vec![], &["mara"]));

        let hits = memory.query(&[1.0, 0.0], 3, &[]);
        assert_eq!(hits[0].entry.seq, 2);
        assert_eq!(hits[1].entry.seq, 1);
        assert_eq!(hits[2].entry.seq, 3);
        assert_eq!(hits[2].similarity, 0.0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory").join("snapshot.json");
        let memory = VisualMemory::new();
        memory.index(entry(1, vec![0.5, 0.5], &["mara"]));
        memory.index(entry(2, vec![0.1, 0.9], &[]));
        memory.save_snapshot(&path).unwrap();

        let restored = VisualMemory::load_snapshot(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.entries(), memory.entries());
        assert_eq!(restored.index(entry(3, vec![1.0], &[])), 3);
    }
}
