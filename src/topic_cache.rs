//! Pull-on-demand topic cache (§3, §4.1, §9). Each topic is a bounded,
//! single-consumer queue: a destructive read drains everything received on
//! that topic since the last call. Two consumers of one topic must fan out
//! at subscription time into two independent queues rather than sharing one.
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Matches the spec's default per-topic buffer bound (§4.1).
pub const DEFAULT_BUFFER_SIZE: usize = 500;

pub struct TopicCache<T> {
    buffers: Mutex<HashMap<String, VecDeque<T>>>,
    capacity: usize,
}

impl<T> Default for TopicCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl<T> TopicCache<T> {
    pub fn new(capacity: usize) -> Self {
        TopicCache {
            buffers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Appends a payload to `topic`'s buffer, evicting the oldest entry if
    /// the bound is exceeded (the caller loses floor data if it doesn't
    /// poll often enough, per §4.1).
    pub fn push(&self, topic: &str, payload: T) {
        let mut buffers = self.buffers.lock();
        let queue = buffers.entry(topic.to_string()).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(payload);
    }

    /// Drains and returns everything queued for `topic` since the last
    /// fetch, in arrival order. Empty if nothing has arrived.
    pub fn fetch(&self, topic: &str) -> Vec<T> {
        let mut buffers = self.buffers.lock();
        buffers
            .get_mut(topic)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.buffers
            .lock()
            .get(topic)
            .map(VecDeque::is_empty)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_drains_in_arrival_order() {
        let cache = TopicCache::new(10);
        cache.push("order", 1);
        cache.push("order", 2);
        cache.push("order", 3);
        assert_eq!(cache.fetch("order"), vec![1, 2, 3]);
        assert!(cache.fetch("order").is_empty());
    }

    #[test]
    fn bounded_buffer_evicts_oldest() {
        let cache = TopicCache::new(2);
        cache.push("t", 1);
        cache.push("t", 2);
        cache.push("t", 3);
        assert_eq!(cache.fetch("t"), vec![2, 3]);
    }

    #[test]
    fn separate_topics_do_not_interfere() {
        let cache = TopicCache::new(10);
        cache.push("a", 1);
        cache.push("b", 2);
        assert_eq!(cache.fetch("a"), vec![1]);
        assert_eq!(cache.fetch("b"), vec![2]);
    }
}
