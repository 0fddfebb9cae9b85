//! Single-process backend.

use super::Backend;
use crate::error::QueueResult;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
    values: HashMap<String, String>,
}

/// In-memory backend.
///
/// Every primitive runs under one lock, which makes each of them atomic with
/// respect to the others. Emptied lists and sets disappear like Redis keys.
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys of any type currently stored.
    pub async fn key_count(&self) -> usize {
        let state = self.state.read().await;
        state.lists.len() + state.sets.len() + state.zsets.len() + state.values.len()
    }
}

fn sorted_by_score(members: &HashMap<String, i64>, max: Option<i64>) -> Vec<String> {
    let mut entries: Vec<(&String, i64)> = members
        .iter()
        .filter(|(_, score)| max.is_none_or(|max| **score <= max))
        .map(|(member, score)| (member, *score))
        .collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(member, _)| member.clone()).collect()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn push_tail(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.write().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let head = list.pop_front();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(head)
    }

    async fn list_len(&self, key: &str) -> QueueResult<u64> {
        let state = self.state.read().await;
        Ok(state.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn list_all(&self, key: &str) -> QueueResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> QueueResult<()> {
        let mut state = self.state.write().await;
        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        if let Some(zset) = state.zsets.get_mut(key) {
            zset.remove(member);
            if zset.is_empty() {
                state.zsets.remove(key);
            }
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, max: i64) -> QueueResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .zsets
            .get(key)
            .map(|zset| sorted_by_score(zset, Some(max)))
            .unwrap_or_default())
    }

    async fn zmembers(&self, key: &str) -> QueueResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .zsets
            .get(key)
            .map(|zset| sorted_by_score(zset, None))
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let state = self.state.read().await;
        Ok(state.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.write().await;
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn take(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.write().await;
        Ok(state.values.remove(key))
    }

    async fn incr(&self, key: &str) -> QueueResult<i64> {
        let mut state = self.state.write().await;
        let entry = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());
        let next = entry.parse::<i64>().unwrap_or(0) + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn delete(&self, keys: &[String]) -> QueueResult<()> {
        let mut state = self.state.write().await;
        for key in keys {
            state.lists.remove(key);
            state.sets.remove(key);
            state.zsets.remove(key);
            state.values.remove(key);
        }
        Ok(())
    }
}
