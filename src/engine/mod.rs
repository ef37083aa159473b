//! 灌溉网执行引擎：持有网、标识、enabled 缓存、外部状态与延迟队列。
//!
//! `Engine` 是普通的同步值，所有修改都经过 `&mut self`。
//! 定时后续发生登记在 [`DelayScheduler`] 中，只有所有者调用 [`Engine::run_due`]
//! 时才会执行；[`crate::session::Session`] 借此让延迟发生与直接发生走同一条路径。

pub mod event;
mod firing;
pub mod scheduler;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::irrigation::{self, IrrigationState, StateUpdate};
use crate::net::io::pnml;
use crate::net::{IndexVec, Marking, Net, NetError, TransitionId, Weight};

pub use event::{EngineEvent, EngineSnapshot, MarkingSnapshot};
pub use scheduler::{DelayScheduler, DueFire, TimerId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("an irrigation net needs at least one zone")]
    NoZones,
    #[error(transparent)]
    Net(#[from] NetError),
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    net: Net,
    marking: Marking,
    enabled: IndexVec<TransitionId, bool>,
    state: IrrigationState,
    scheduler: DelayScheduler,
    events: Vec<EngineEvent>,
    revision: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let state = IrrigationState::new(config.zones, config.reservoir_level);
        Self::with_state(config, state)
    }

    pub fn with_state(config: EngineConfig, state: IrrigationState) -> Result<Self, EngineError> {
        if state.zones == 0 {
            return Err(EngineError::NoZones);
        }
        let net = irrigation::build_net(&state, config.pump_draw)?;
        Ok(Self::from_net(config, state, net))
    }

    /// 运行任意网。外部状态只镜像以灌溉 id 命名且存在的库所。
    pub fn from_net(config: EngineConfig, state: IrrigationState, net: Net) -> Self {
        let marking = net.initial_marking();
        let mut engine = Self {
            config,
            enabled: IndexVec::from_elem(false, net.transitions_len()),
            net,
            marking,
            state,
            scheduler: DelayScheduler::new(),
            events: Vec::new(),
            revision: 0,
        };
        engine.refresh_enabled();
        engine
    }

    /// 以新的分区数重建网。先取消全部定时器，旧网上的延迟发生不会再执行。
    pub fn reset(&mut self, zones: usize) -> Result<(), EngineError> {
        self.cancel_timers();
        if zones == 0 {
            return Err(EngineError::NoZones);
        }
        let mut state = IrrigationState::new(zones, self.state.reservoir_level);
        state.emergency = self.state.emergency;
        state.auto_mode = self.state.auto_mode;

        let net = irrigation::build_net(&state, self.config.pump_draw)?;
        self.marking = net.initial_marking();
        self.enabled = IndexVec::from_elem(false, net.transitions_len());
        self.net = net;
        self.state = state;
        self.refresh_enabled();
        self.revision += 1;
        log::info!("engine reset to {} zones", zones);
        self.events.push(EngineEvent::Reset { zones });
        Ok(())
    }

    /// 取消全部待执行的延迟发生，返回取消的数量。
    pub fn shutdown(&mut self) -> usize {
        let cancelled = self.cancel_timers();
        log::info!("engine shut down, {} pending fires cancelled", cancelled);
        cancelled
    }

    fn cancel_timers(&mut self) -> usize {
        let count = self.scheduler.cancel_all();
        if count > 0 {
            self.events.push(EngineEvent::TimersCancelled { count });
        }
        count
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn marking(&self) -> &Marking {
        &self.marking
    }

    pub fn state(&self) -> &IrrigationState {
        &self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn tokens(&self, place: &str) -> Option<Weight> {
        self.net.place_id(place).map(|p| self.marking.tokens(p))
    }

    /// 直接按当前标识判断能否发生，不读缓存。
    pub fn can_fire(&self, transition: &str) -> bool {
        self.net
            .transition_id(transition)
            .is_some_and(|t| self.net.can_fire(&self.marking, t))
    }

    /// 缓存中的 enabled 标志；未知 id 返回 `None`。
    pub fn is_enabled(&self, transition: &str) -> Option<bool> {
        let t = self.net.transition_id(transition)?;
        self.enabled.get(t).copied()
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.enabled
            .iter_enumerated()
            .filter(|(_, enabled)| **enabled)
            .filter_map(|(t, _)| self.net.transition(t).map(|t| t.id.clone()))
            .collect()
    }

    pub fn marking_snapshot(&self) -> MarkingSnapshot {
        self.net
            .places()
            .map(|(p, place)| (place.id.clone(), self.marking.tokens(p)))
            .collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            revision: self.revision,
            marking: self.marking_snapshot(),
            enabled: self.enabled_ids(),
            state: self.state.clone(),
            pending_timers: self.scheduler.len(),
        }
    }

    pub fn export_document(&self) -> String {
        pnml::export_pnml(&self.net, &self.marking)
    }

    /// 合并外部状态并把镜像字段写回对应库所。
    pub fn update_state(&mut self, update: StateUpdate) {
        let changed = self.state.merge(update);
        self.sync_places_from_state();
        self.refresh_enabled();
        if changed {
            self.revision += 1;
            self.events.push(EngineEvent::StateChanged);
        }
    }

    /// 逐个分区：土壤不干时先置为干，再发生其启动变迁。返回实际启动的水泵数。
    pub fn start_all_pumps(&mut self) -> usize {
        let mut forced = false;
        let mut started = 0;
        for zone in 0..self.state.zones {
            if let Some(place) = self.net.place_id(&irrigation::soil_dry(zone)) {
                if self.marking.tokens(place) == 0 {
                    self.marking.set(place, 1);
                    if let Some(flag) = self.state.soil_dry.get_mut(zone) {
                        *flag = true;
                    }
                    forced = true;
                    self.refresh_enabled();
                }
            }
            if self.fire(&irrigation::start_pump(zone)) {
                started += 1;
            }
        }
        if forced {
            self.revision += 1;
            self.events.push(EngineEvent::StateChanged);
        }
        started
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    pub fn scheduler(&self) -> &DelayScheduler {
        &self.scheduler
    }

    /// 执行截止时间不晚于 `now` 的全部延迟发生。
    ///
    /// 守卫在此刻求值，而非登记时；未能发生的变迁使该分区的级联停止。
    /// 本轮发生所登记的后续项留待下一次调用。
    pub fn run_due(&mut self, now: Instant) -> usize {
        let due: Vec<DueFire> = std::iter::from_fn(|| self.scheduler.pop_due(now)).collect();
        let mut fired = 0;
        for due in due {
            if self.fire_due(&due.transition) {
                fired += 1;
            } else {
                log::warn!("delayed fire of `{}` stalled", due.transition);
                self.events.push(EngineEvent::Stalled {
                    transition: due.transition,
                });
            }
        }
        fired
    }

    /// 在门控库所放入一个 token 后发生；失败时收回该 token，标识不变。
    fn fire_due(&mut self, transition: &str) -> bool {
        let Some(t) = self.net.transition_id(transition) else {
            return false;
        };
        let gate = self.net.place_id(&irrigation::armed(transition));
        if let Some(gate) = gate {
            self.marking.set(gate, self.marking.tokens(gate) + 1);
        }
        if self.fire_transition(t, true) {
            return true;
        }
        if let Some(gate) = gate {
            self.marking
                .set(gate, self.marking.tokens(gate).saturating_sub(1));
        }
        false
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn refresh_enabled(&mut self) {
        for t in self.enabled.indices() {
            self.enabled[t] = self.net.can_fire(&self.marking, t);
        }
    }

    fn sync_places_from_state(&mut self) {
        let mut mirrored = vec![
            (irrigation::RESERVOIR.to_string(), self.state.reservoir_level),
            (
                irrigation::EMERGENCY.to_string(),
                self.state.emergency as Weight,
            ),
        ];
        for zone in 0..self.state.zones {
            mirrored.push((
                irrigation::soil_dry(zone),
                self.state.is_soil_dry(zone) as Weight,
            ));
        }
        for (id, tokens) in mirrored {
            if let Some(place) = self.net.place_id(&id) {
                self.marking.set(place, tokens);
            }
        }
    }

    /// 发生改变了镜像库所时，把新 token 数写回外部状态。
    fn write_back(&mut self, before: &Marking) {
        let changed = |engine: &Self, id: &str| {
            engine
                .net
                .place_id(id)
                .map(|p| (before.tokens(p), engine.marking.tokens(p)))
                .filter(|(old, new)| old != new)
                .map(|(_, new)| new)
        };
        if let Some(level) = changed(self, irrigation::RESERVOIR) {
            self.state.reservoir_level = level;
        }
        if let Some(tokens) = changed(self, irrigation::EMERGENCY) {
            self.state.emergency = tokens > 0;
        }
        for zone in 0..self.state.zones {
            if let Some(tokens) = changed(self, &irrigation::soil_dry(zone)) {
                if let Some(flag) = self.state.soil_dry.get_mut(zone) {
                    *flag = tokens > 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::net::{Arc, Place, Transition};

    fn dry_engine(zones: usize) -> Engine {
        let config = EngineConfig {
            zones,
            ..EngineConfig::default()
        };
        let mut state = IrrigationState::new(zones, 50);
        state.soil_dry = vec![true; zones];
        Engine::with_state(config, state).unwrap()
    }

    fn assert_cache_matches(engine: &Engine) {
        for (t, transition) in engine.net().transitions() {
            assert_eq!(
                engine.is_enabled(&transition.id),
                Some(engine.net().can_fire(engine.marking(), t)),
                "stale cache for {}",
                transition.id
            );
        }
    }

    #[test]
    fn zero_zones_is_rejected() {
        let config = EngineConfig {
            zones: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(Engine::new(config), Err(EngineError::NoZones)));
    }

    #[test]
    fn firing_start_moves_tokens_and_writes_back_reservoir() {
        let mut engine = dry_engine(1);
        assert!(engine.fire(&irrigation::start_pump(0)));

        assert_eq!(engine.tokens(irrigation::RESERVOIR), Some(40));
        assert_eq!(engine.state().reservoir_level, 40);
        assert_eq!(engine.tokens(&irrigation::pump_on(0)), Some(1));
        assert_eq!(engine.tokens(&irrigation::soil_dry(0)), Some(0));
        assert!(!engine.state().soil_dry[0]);
        assert_eq!(engine.revision(), 1);
        assert_cache_matches(&engine);
    }

    #[test]
    fn refused_fire_changes_nothing() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let before = engine.marking().clone();
        assert!(!engine.fire(&irrigation::start_pump(0)));
        assert!(!engine.fire("no_such_transition"));
        assert_eq!(engine.marking(), &before);
        assert_eq!(engine.revision(), 0);
        assert_eq!(engine.pending_timers(), 0);
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn state_update_resyncs_places_and_cache() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.is_enabled(&irrigation::start_pump(0)), Some(false));

        engine.update_state(StateUpdate {
            soil_dry: Some(vec![true]),
            reservoir_level: Some(12),
            ..StateUpdate::default()
        });
        assert_eq!(engine.tokens(irrigation::RESERVOIR), Some(12));
        assert_eq!(engine.is_enabled(&irrigation::start_pump(0)), Some(true));

        engine.update_state(StateUpdate::emergency(true));
        assert_eq!(engine.tokens(irrigation::EMERGENCY), Some(1));
        assert_eq!(engine.is_enabled(&irrigation::start_pump(0)), Some(false));
        assert_cache_matches(&engine);
        assert_eq!(
            engine.drain_events(),
            vec![EngineEvent::StateChanged, EngineEvent::StateChanged]
        );
    }

    #[test]
    fn start_all_pumps_forces_dry_soil() {
        let config = EngineConfig {
            zones: 3,
            reservoir_level: 25,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config).unwrap();
        // 25 个 token 只够两次各 10 的抽水
        assert_eq!(engine.start_all_pumps(), 2);
        assert_eq!(engine.tokens(irrigation::RESERVOIR), Some(5));
        assert_eq!(engine.tokens(&irrigation::soil_dry(2)), Some(1));
        assert_eq!(engine.state().soil_dry, vec![false, false, true]);
        assert_eq!(engine.pending_timers(), 2);
        assert_cache_matches(&engine);
    }

    #[test]
    fn start_schedules_one_active_fire_after_delay() {
        let mut engine = dry_engine(1);
        let delay = engine
            .config()
            .timing
            .delay_after(crate::net::Stage::Start)
            .unwrap();
        let t0 = Instant::now();
        assert!(engine.fire(&irrigation::start_pump(0)));
        assert_eq!(engine.pending_timers(), 1);
        assert_eq!(
            engine.scheduler().pending().next().map(|(_, id)| id.to_string()),
            Some(irrigation::irrigate(0))
        );

        assert_eq!(engine.run_due(t0 + delay - Duration::from_millis(1)), 0);
        assert_eq!(engine.tokens(&irrigation::watering(0)), Some(0));

        assert_eq!(engine.run_due(Instant::now() + delay), 1);
        assert_eq!(engine.tokens(&irrigation::watering(0)), Some(1));
        // irrigate 之后登记 stop
        assert_eq!(engine.pending_timers(), 1);
    }

    #[test]
    fn full_cycle_returns_soil_to_dry() {
        let mut engine = dry_engine(1);
        assert!(engine.fire(&irrigation::start_pump(0)));
        let far = Instant::now() + Duration::from_secs(3600);
        for _ in 0..3 {
            assert_eq!(engine.run_due(far), 1);
        }
        assert_eq!(engine.run_due(far), 0);
        assert_eq!(engine.tokens(&irrigation::soil_dry(0)), Some(1));
        assert!(engine.state().soil_dry[0]);
        assert_eq!(engine.pending_timers(), 0);

        let fired: Vec<_> = engine
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Fired { transition, .. } => Some(transition),
                _ => None,
            })
            .collect();
        assert_eq!(
            fired,
            vec![
                irrigation::start_pump(0),
                irrigation::irrigate(0),
                irrigation::stop_pump(0),
                irrigation::drying(0)
            ]
        );
    }

    #[test]
    fn emergency_stalls_a_pending_chain() {
        let mut engine = dry_engine(1);
        assert!(engine.fire(&irrigation::start_pump(0)));
        engine.update_state(StateUpdate::emergency(true));

        assert_eq!(engine.run_due(Instant::now() + Duration::from_secs(3600)), 0);
        assert_eq!(engine.tokens(&irrigation::pump_on(0)), Some(1));
        assert_eq!(engine.tokens(&irrigation::watering(0)), Some(0));
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(
            engine.tokens(&irrigation::armed(&irrigation::irrigate(0))),
            Some(0)
        );
        assert_cache_matches(&engine);
        assert!(engine.drain_events().contains(&EngineEvent::Stalled {
            transition: irrigation::irrigate(0)
        }));
    }

    #[test]
    fn timed_stage_is_refused_until_its_timer_runs() {
        let mut engine = dry_engine(1);
        assert!(engine.fire(&irrigation::start_pump(0)));
        assert!(!engine.can_fire(&irrigation::irrigate(0)));
        assert!(!engine.fire(&irrigation::irrigate(0)));
        assert_eq!(engine.tokens(&irrigation::pump_on(0)), Some(1));

        assert_eq!(engine.run_due(Instant::now() + Duration::from_secs(3600)), 1);
        assert_eq!(engine.tokens(&irrigation::watering(0)), Some(1));
        // 门控 token 随发生被消耗
        assert_eq!(
            engine.tokens(&irrigation::armed(&irrigation::irrigate(0))),
            Some(0)
        );
        assert!(!engine.can_fire(&irrigation::stop_pump(0)));
        assert_cache_matches(&engine);
    }

    #[test]
    fn reset_cancels_timers_before_rebuilding() {
        let mut engine = dry_engine(1);
        assert!(engine.fire(&irrigation::start_pump(0)));
        engine.reset(2).unwrap();

        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(engine.state().zones, 2);
        assert_eq!(engine.tokens(&irrigation::pump_on(0)), Some(0));
        assert_eq!(engine.run_due(Instant::now() + Duration::from_secs(3600)), 0);
        assert!(engine.drain_events().contains(&EngineEvent::Reset { zones: 2 }));
    }

    #[test]
    fn export_reflects_live_marking() {
        let mut engine = dry_engine(1);
        engine.fire(&irrigation::start_pump(0));
        let doc = engine.export_document();
        assert!(doc.contains(r#"<net id="irrigation_net" type="P/T net">"#));
        assert!(doc.contains(
            "<place id=\"reservoir\">\n      <name>\n        <text>Reservoir</text>\n      </name>\n      <initialMarking>\n        <text>40</text>"
        ));
    }

    #[test]
    fn custom_net_without_mirrored_places_runs() {
        let mut net = Net::new("plain", "Plain");
        net.add_place(Place::new("a", "A", 1)).unwrap();
        net.add_place(Place::new("b", "B", 0)).unwrap();
        net.add_transition(Transition::new("move", "Move")).unwrap();
        net.add_arc(Arc::normal("in", "a", "move", 1)).unwrap();
        net.add_arc(Arc::normal("out", "move", "b", 1)).unwrap();

        let mut engine = Engine::from_net(EngineConfig::default(), IrrigationState::new(1, 0), net);
        assert!(engine.fire("move"));
        assert_eq!(engine.tokens("b"), Some(1));
        assert_eq!(engine.pending_timers(), 0);
    }
}
