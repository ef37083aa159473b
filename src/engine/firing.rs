//! 单次发生与按阶段优先级的批量发生。
use itertools::Itertools;
use tokio::time::Instant;

use super::{Engine, EngineEvent};
use crate::irrigation;
use crate::net::{Stage, TransitionId};

impl Engine {
    /// 按当前标识判断，`transition` 可发生时就发生它。
    ///
    /// 成功后替换标识、刷新 enabled 缓存、把镜像库所写回外部状态，
    /// 并登记该分区级联的下一阶段。被拒绝时什么都不变。
    /// 定时阶段没有门控 token，只能由 [`Engine::run_due`] 发生。
    pub fn fire(&mut self, transition: &str) -> bool {
        let Some(t) = self.net.transition_id(transition) else {
            log::debug!("fire: unknown transition `{}`", transition);
            return false;
        };
        self.fire_transition(t, false)
    }

    pub(super) fn fire_transition(&mut self, t: TransitionId, delayed: bool) -> bool {
        let next = match self.net.fire_transition(&self.marking, t) {
            Ok(next) => next,
            Err(err) => {
                log::trace!("fire refused: {}", err);
                return false;
            }
        };
        let before = std::mem::replace(&mut self.marking, next);
        self.refresh_enabled();
        self.write_back(&before);
        self.revision += 1;

        if let Some(transition) = self.net.transition(t) {
            log::debug!("fired `{}` (delayed: {})", transition.id, delayed);
            self.events.push(EngineEvent::Fired {
                transition: transition.id.clone(),
                delayed,
            });
        }
        self.schedule_follow_up(t);
        true
    }

    fn schedule_follow_up(&mut self, t: TransitionId) {
        let Some(transition) = self.net.transition(t) else {
            return;
        };
        let (Some(next_stage), Some(zone)) = (transition.stage.follow_up(), transition.zone) else {
            return;
        };
        let Some(delay) = self.config.timing.delay_after(transition.stage) else {
            return;
        };
        let Some(next) = irrigation::stage_transition(next_stage, zone) else {
            return;
        };
        if self.net.transition_id(&next).is_none() {
            return;
        }

        log::debug!("scheduling `{}` in {:?}", next, delay);
        self.scheduler.schedule(next.clone(), delay, Instant::now());
        self.events.push(EngineEvent::Scheduled {
            transition: next,
            after_ms: delay.as_millis() as u64,
        });
    }

    /// 按 Active、Stop、Drying、Start、Other 排序的可发生变迁，同级保持网中顺序。
    pub fn priority_order(&self) -> Vec<TransitionId> {
        self.enabled
            .iter_enumerated()
            .filter(|(_, enabled)| **enabled)
            .map(|(t, _)| t)
            .sorted_by_key(|&t| self.net.transition(t).map_or(Stage::Other, |t| t.stage))
            .collect()
    }

    /// 按阶段优先级反复发生，直到没有可发生的变迁或达到轮数上限。
    ///
    /// 每轮重新取可发生集合，只尝试前 `candidate_window` 个候选，
    /// 第一次成功的发生结束本轮。返回总发生次数。
    pub fn fire_all_enabled(&mut self) -> usize {
        let max_iterations = self.config.batch.max_iterations;
        let window = self.config.batch.candidate_window.max(1);

        let mut fired = 0;
        for _ in 0..max_iterations {
            let candidates = self.priority_order();
            let progressed = candidates
                .into_iter()
                .take(window)
                .any(|t| self.fire_transition(t, false));
            if !progressed {
                return fired;
            }
            fired += 1;
        }

        if !self.priority_order().is_empty() {
            log::warn!(
                "batch firing stopped at the iteration cap ({}), the net may not be quiescent",
                max_iterations
            );
        }
        fired
    }
}
