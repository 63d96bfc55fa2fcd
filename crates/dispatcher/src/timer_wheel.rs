use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

use periodic_core::WorkerId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    fire_at: DateTime<Utc>,
    worker_id: WorkerId,
    generation: u64,
}

// BinaryHeap 是最大堆，这里反转比较得到最早到期的条目；同一时刻按 worker id 升序
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.worker_id.cmp(&self.worker_id))
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 定时器集合
///
/// 每个 worker 至多一个有效定时器。重新装填时旧条目只做失效标记，
/// 在到达堆顶时惰性丢弃，插入和删除都是 O(log n)。
#[derive(Debug, Default)]
pub struct TimerWheel {
    heap: BinaryHeap<TimerEntry>,
    armed: HashMap<WorkerId, (u64, DateTime<Utc>)>,
    next_generation: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 装填定时器，已存在的定时器被替换
    pub fn arm(&mut self, worker_id: WorkerId, fire_at: DateTime<Utc>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.armed.insert(worker_id, (generation, fire_at));
        self.heap.push(TimerEntry {
            fire_at,
            worker_id,
            generation,
        });
        self.compact_if_needed();
    }

    pub fn disarm(&mut self, worker_id: WorkerId) -> bool {
        self.armed.remove(&worker_id).is_some()
    }

    pub fn is_armed(&self, worker_id: WorkerId) -> bool {
        self.armed.contains_key(&worker_id)
    }

    pub fn fire_at(&self, worker_id: WorkerId) -> Option<DateTime<Utc>> {
        self.armed.get(&worker_id).map(|(_, fire_at)| *fire_at)
    }

    /// 最早的到期时间
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.remove_stale_head();
        self.heap.peek().map(|entry| entry.fire_at)
    }

    /// 取出一个已到期的定时器，同时将其解除
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<WorkerId> {
        self.remove_stale_head();
        if self.heap.peek()?.fire_at > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.armed.remove(&entry.worker_id);
        Some(entry.worker_id)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.armed.clear();
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    fn is_live(&self, entry: &TimerEntry) -> bool {
        self.armed
            .get(&entry.worker_id)
            .is_some_and(|(generation, _)| *generation == entry.generation)
    }

    fn remove_stale_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.is_live(head) {
                break;
            }
            self.heap.pop();
        }
    }

    /// 失效条目过多时重建堆
    fn compact_if_needed(&mut self) {
        if self.heap.len() <= 2 * self.armed.len() + 64 {
            return;
        }
        let armed = &self.armed;
        self.heap.retain(|entry| {
            armed
                .get(&entry.worker_id)
                .is_some_and(|(generation, _)| *generation == entry.generation)
        });
    }
}
