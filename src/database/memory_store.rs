use crate::database::kv::KvStore;
use crate::error::app_error::AppError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) {
        if let Some(score) = self.scores.remove(member) {
            self.ordered.remove(&(score, member.to_string()));
        }
    }
}

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    sorted: HashMap<String, SortedSet>,
    lists: HashMap<String, VecDeque<String>>,
}

impl State {
    fn remove_key(&mut self, key: &str) {
        self.strings.remove(key);
        self.sets.remove(key);
        self.sorted.remove(key);
        self.lists.remove(key);
    }
}

/// Process-local store for development and tests. Every operation holds one lock,
/// so each call is atomic just like a single Redis command.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.state.lock().await.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.strings.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.strings.get_mut(key) {
            Some(current) if current == expected => {
                *current = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().await.strings.remove(key))
    }

    async fn del(&self, key: &str) -> Result<(), AppError> {
        self.state.lock().await.remove_key(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), AppError> {
        self.state.lock().await.sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        let mut members: Vec<String> = state.sets.get(key).map(|set| set.iter().cloned().collect()).unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        Ok(self.state.lock().await.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), AppError> {
        self.state.lock().await.sorted.entry(key.to_string()).or_default().insert(member, score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sorted.get_mut(key) {
            set.remove(member);
            if set.scores.is_empty() {
                state.sorted.remove(key);
            }
        }
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, AppError> {
        Ok(self.state.lock().await.sorted.get(key).and_then(|set| set.scores.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> Result<usize, AppError> {
        Ok(self.state.lock().await.sorted.get(key).map_or(0, |set| set.scores.len()))
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError> {
        if stop < start {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .sorted
            .get(key)
            .map(|set| {
                set.ordered
                    .iter()
                    .rev()
                    .skip(start)
                    .take(stop - start + 1)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrevrange_before(&self, key: &str, before: i64, limit: usize) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted
            .get(key)
            .map(|set| {
                set.ordered
                    .iter()
                    .rev()
                    .filter(|(score, _)| *score < before)
                    .take(limit)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted
            .get(key)
            .map(|set| set.ordered.iter().map(|(_, member)| member.clone()).collect())
            .unwrap_or_default())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.state.lock().await.lists.entry(key.to_string()).or_default().push_front(value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: usize, stop: usize) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(list) = state.lists.get_mut(key) {
            let kept: VecDeque<String> = if stop < start {
                VecDeque::new()
            } else {
                list.iter().skip(start).take(stop - start + 1).cloned().collect()
            };
            *list = kept;
            if list.is_empty() {
                state.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>, AppError> {
        if stop < start {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().skip(start).take(stop - start + 1).cloned().collect())
            .unwrap_or_default())
    }
}
