//! 延迟发生队列：按截止时间排序、可取消的定时器。
//!
//! 队列本身从不执行任何东西。引擎的所有者读取 [`DelayScheduler::next_deadline`]，
//! 等到该时刻后通过 `Engine::run_due` 取出到期项，延迟发生因此与直接发生共用同一修改路径。
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

/// 已到期的延迟发生。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFire {
    pub timer: TimerId,
    pub transition: String,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct DelayScheduler {
    pending: BTreeMap<(Instant, TimerId), String>,
    next_timer: u64,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `now + delay` 时重新尝试发生 `transition`。同一截止时间按登记顺序出队。
    pub fn schedule(&mut self, transition: impl Into<String>, delay: Duration, now: Instant) -> TimerId {
        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        self.pending.insert((now + delay, timer), transition.into());
        timer
    }

    pub fn cancel(&mut self, timer: TimerId) -> bool {
        let key = self.pending.keys().find(|(_, id)| *id == timer).copied();
        key.and_then(|key| self.pending.remove(&key)).is_some()
    }

    /// 丢弃全部待执行项，返回取消的数量。
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// 取出截止时间 `<= now` 的最早一项。
    pub fn pop_due(&mut self, now: Instant) -> Option<DueFire> {
        let entry = self.pending.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let ((deadline, timer), transition) = entry.remove_entry();
        Some(DueFire {
            timer,
            transition,
            deadline,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = (Instant, &str)> {
        self.pending
            .iter()
            .map(|((deadline, _), transition)| (*deadline, transition.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_come_out_in_deadline_order() {
        let now = Instant::now();
        let mut scheduler = DelayScheduler::new();
        scheduler.schedule("late", Duration::from_secs(10), now);
        scheduler.schedule("early", Duration::from_secs(1), now);
        scheduler.schedule("early_too", Duration::from_secs(1), now);

        assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(scheduler.pop_due(now).is_none());

        let later = now + Duration::from_secs(5);
        assert_eq!(scheduler.pop_due(later).unwrap().transition, "early");
        assert_eq!(scheduler.pop_due(later).unwrap().transition, "early_too");
        assert!(scheduler.pop_due(later).is_none());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn cancellation_removes_entries() {
        let now = Instant::now();
        let mut scheduler = DelayScheduler::new();
        let a = scheduler.schedule("a", Duration::ZERO, now);
        scheduler.schedule("b", Duration::ZERO, now);
        scheduler.schedule("c", Duration::ZERO, now);

        assert!(scheduler.cancel(a));
        assert!(!scheduler.cancel(a));
        assert_eq!(scheduler.cancel_all(), 2);
        assert!(scheduler.is_empty());
        assert!(scheduler.pop_due(now + Duration::from_secs(60)).is_none());
        assert_eq!(scheduler.next_deadline(), None);
    }
}
