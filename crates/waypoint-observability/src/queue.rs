use std::collections::VecDeque;
use std::sync::Mutex;

/// A fixed-capacity ring buffer. Pushing past capacity evicts the oldest
/// entry -- a top-N-of-arrivals approximation rather than a true top-N by
/// some scoring function, simpler to reason about under concurrent writers.
pub struct FixedCapacityQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T> FixedCapacityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        FixedCapacityQueue {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every currently queued item.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let queue = FixedCapacityQueue::new(3);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = FixedCapacityQueue::new(3);
        queue.push(1);
        assert_eq!(queue.drain(), vec![1]);
        assert!(queue.is_empty());
    }
}
