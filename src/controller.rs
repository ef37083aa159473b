//! 双分区泵站控制器：固定词汇表的领域变迁，前置条件失败时给出具名错误。
//!
//! The controller is a small Petri net of its own. Every guarded input arc is
//! registered with the [`GuardError`] it stands for, so a refused fire is
//! reported by naming the first blocking arc. Fires are computed on a copy of
//! the marking and committed only when the whole domain transition succeeded.
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::io::pnml;
use crate::net::{Arc, ArcId, FireError, Marking, Net, NetError, Place, Transition, Weight};

const AT_REST: &str = "p_atRest";
const PUMP_BUSY: &str = "p_pumpBusy";
const ZONE1: &str = "p_zone1";
const ZONE2: &str = "p_zone2";
const RESERVOIR: &str = "p_reservoir";
const EMERGENCY: &str = "p_emergency";
const TURN_ZONE1: &str = "turnZone1";
const TURN_ZONE2: &str = "turnZone2";
const RESERVOIR_OK: &str = "reservoirOk";

const T_START_PUMP: &str = "t_startPump";
const T_IRRIGATE1: &str = "t_irrig1";
const T_IRRIGATE2: &str = "t_irrig2";
const T_REST1: &str = "t_toRest1";
const T_REST2: &str = "t_toRest2";
const T_INC_TANK: &str = "t_incTank";
const T_DEC_TANK: &str = "t_decTank";
const T_RAISE_EMERGENCY: &str = "t_raiseEmergency";
const T_CLEAR_EMERGENCY: &str = "t_clearEmergency";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("unknown transition name `{0}`")]
    UnknownTransition(String),
    #[error("emergency active")]
    EmergencyActive,
    #[error("system not at rest")]
    NotAtRest,
    #[error("reservoir empty")]
    ReservoirEmpty,
    #[error("not zone {0}'s turn")]
    NotZoneTurn(u8),
    #[error("pump is not running")]
    PumpIdle,
    #[error("no watered zone to return to rest")]
    NothingToRest,
    #[error("transition `{0}` is not enabled")]
    NotEnabled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTransition {
    IncTank,
    DecTank,
    ToggleEmergency,
    StartPump,
    IrrigateZone1,
    IrrigateZone2,
    ToRest,
}

impl DomainTransition {
    pub const ALL: [DomainTransition; 7] = [
        DomainTransition::IncTank,
        DomainTransition::DecTank,
        DomainTransition::ToggleEmergency,
        DomainTransition::StartPump,
        DomainTransition::IrrigateZone1,
        DomainTransition::IrrigateZone2,
        DomainTransition::ToRest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DomainTransition::IncTank => "inc_tank",
            DomainTransition::DecTank => "dec_tank",
            DomainTransition::ToggleEmergency => "toggle_emergency",
            DomainTransition::StartPump => "start_pump",
            DomainTransition::IrrigateZone1 => "irrigate_zone1",
            DomainTransition::IrrigateZone2 => "irrigate_zone2",
            DomainTransition::ToRest => "to_rest",
        }
    }
}

impl fmt::Display for DomainTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainTransition {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let transition = match s {
            "inc_tank" | "t_incTank" => DomainTransition::IncTank,
            "dec_tank" | "t_decTank" => DomainTransition::DecTank,
            "toggle_emergency" | "toggleEmergency" => DomainTransition::ToggleEmergency,
            "start_pump" | "t_startPump" => DomainTransition::StartPump,
            "irrigate_zone1" | "t_irrig1" => DomainTransition::IrrigateZone1,
            "irrigate_zone2" | "t_irrig2" => DomainTransition::IrrigateZone2,
            "to_rest" | "t_toRest" | "return_to_rest" => DomainTransition::ToRest,
            other => return Err(GuardError::UnknownTransition(other.to_string())),
        };
        Ok(transition)
    }
}

/// Controller marking as observers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerMarking {
    pub at_rest: Weight,
    pub pump_busy: Weight,
    pub zone1_watered: Weight,
    pub zone2_watered: Weight,
    pub tank_level: Weight,
    pub reservoir_ok: Weight,
    pub emergency: Weight,
    pub turn_zone1: Weight,
    pub turn_zone2: Weight,
}

#[derive(Debug, Clone)]
pub struct Controller {
    net: Net,
    marking: Marking,
    guards: IndexMap<ArcId, GuardError>,
}

impl Controller {
    /// At rest, zone 1's turn, no emergency, `tank` tokens in the reservoir.
    pub fn new(tank: Weight) -> Result<Self, NetError> {
        let mut builder = Builder {
            net: Net::new("irrigation_controller", "Irrigation Controller"),
            guards: IndexMap::new(),
        };
        builder.build(tank)?;
        let marking = builder.net.initial_marking();
        Ok(Self {
            net: builder.net,
            marking,
            guards: builder.guards,
        })
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn marking(&self) -> ControllerMarking {
        let tokens = |id: &str| {
            self.net
                .place_id(id)
                .map(|p| self.marking.tokens(p))
                .unwrap_or(0)
        };
        ControllerMarking {
            at_rest: tokens(AT_REST),
            pump_busy: tokens(PUMP_BUSY),
            zone1_watered: tokens(ZONE1),
            zone2_watered: tokens(ZONE2),
            tank_level: tokens(RESERVOIR),
            reservoir_ok: tokens(RESERVOIR_OK),
            emergency: tokens(EMERGENCY),
            turn_zone1: tokens(TURN_ZONE1),
            turn_zone2: tokens(TURN_ZONE2),
        }
    }

    pub fn export_document(&self) -> String {
        pnml::export_pnml(&self.net, &self.marking)
    }

    pub fn apply_transition(&mut self, name: &str) -> Result<ControllerMarking, GuardError> {
        let transition: DomainTransition = name.parse()?;
        self.apply(transition)
    }

    pub fn apply(&mut self, transition: DomainTransition) -> Result<ControllerMarking, GuardError> {
        let mut candidate = self.marking.clone();
        match transition {
            DomainTransition::ToggleEmergency => {
                if self.fire_on(&mut candidate, T_RAISE_EMERGENCY).is_err() {
                    self.fire_on(&mut candidate, T_CLEAR_EMERGENCY)?;
                }
            }
            DomainTransition::ToRest => {
                let moved = [T_REST1, T_REST2]
                    .into_iter()
                    .filter(|id| self.fire_on(&mut candidate, id).is_ok())
                    .count();
                if moved == 0 {
                    return Err(GuardError::NothingToRest);
                }
            }
            DomainTransition::IncTank => self.fire_on(&mut candidate, T_INC_TANK)?,
            DomainTransition::DecTank => self.fire_on(&mut candidate, T_DEC_TANK)?,
            DomainTransition::StartPump => self.fire_on(&mut candidate, T_START_PUMP)?,
            DomainTransition::IrrigateZone1 => self.fire_on(&mut candidate, T_IRRIGATE1)?,
            DomainTransition::IrrigateZone2 => self.fire_on(&mut candidate, T_IRRIGATE2)?,
        }
        self.sync_reservoir_ok(&mut candidate);
        self.marking = candidate;
        log::debug!("controller applied `{}`", transition);
        Ok(self.marking())
    }

    /// The transition the operator's "next" action fires: start the pump when
    /// at rest, water the zone whose turn it is while the pump runs, otherwise
    /// return watered zones to rest.
    pub fn next_step(&self) -> Option<DomainTransition> {
        let m = self.marking();
        if m.at_rest > 0 {
            Some(DomainTransition::StartPump)
        } else if m.pump_busy > 0 {
            if m.turn_zone1 > 0 {
                Some(DomainTransition::IrrigateZone1)
            } else {
                Some(DomainTransition::IrrigateZone2)
            }
        } else if m.zone1_watered > 0 || m.zone2_watered > 0 {
            Some(DomainTransition::ToRest)
        } else {
            None
        }
    }

    /// Applies [`Controller::next_step`]. `Ok(None)` when there is nothing to do.
    pub fn step(&mut self) -> Result<Option<(DomainTransition, ControllerMarking)>, GuardError> {
        match self.next_step() {
            Some(transition) => Ok(Some((transition, self.apply(transition)?))),
            None => Ok(None),
        }
    }

    fn fire_on(&self, marking: &mut Marking, id: &str) -> Result<(), GuardError> {
        let t = self
            .net
            .transition_id(id)
            .ok_or_else(|| GuardError::UnknownTransition(id.to_string()))?;
        match self.net.fire_transition(marking, t) {
            Ok(next) => {
                *marking = next;
                Ok(())
            }
            Err(FireError::NotEnabled { arc, .. }) => Err(self
                .guards
                .get(&arc)
                .cloned()
                .unwrap_or_else(|| GuardError::NotEnabled(id.to_string()))),
            Err(FireError::OutOfBounds(_)) => Err(GuardError::UnknownTransition(id.to_string())),
        }
    }

    fn sync_reservoir_ok(&self, marking: &mut Marking) {
        let (Some(reservoir), Some(ok)) = (self.net.place_id(RESERVOIR), self.net.place_id(RESERVOIR_OK))
        else {
            return;
        };
        let level = marking.tokens(reservoir);
        marking.set(ok, (level > 0) as Weight);
    }
}

struct Builder {
    net: Net,
    guards: IndexMap<ArcId, GuardError>,
}

impl Builder {
    fn build(&mut self, tank: Weight) -> Result<(), NetError> {
        let places = [
            (AT_REST, "At Rest", 1, (100, 200)),
            (PUMP_BUSY, "Pump Busy", 0, (300, 200)),
            (ZONE1, "Zone 1 Watered", 0, (500, 120)),
            (ZONE2, "Zone 2 Watered", 0, (500, 280)),
            (RESERVOIR, "Tank", tank, (100, 60)),
            (EMERGENCY, "Emergency", 0, (300, 40)),
            (TURN_ZONE1, "Turn Zone 1", 1, (400, 60)),
            (TURN_ZONE2, "Turn Zone 2", 0, (400, 340)),
            (RESERVOIR_OK, "Reservoir OK", (tank > 0) as Weight, (200, 60)),
        ];
        for (id, name, tokens, (x, y)) in places {
            self.net.add_place(Place::new(id, name, tokens).at(x, y))?;
        }

        let transitions = [
            (T_START_PUMP, "Start Pump", (200, 200)),
            (T_IRRIGATE1, "Irrigate Zone 1", (400, 120)),
            (T_IRRIGATE2, "Irrigate Zone 2", (400, 280)),
            (T_REST1, "Zone 1 To Rest", (600, 120)),
            (T_REST2, "Zone 2 To Rest", (600, 280)),
            (T_INC_TANK, "Fill Tank", (40, 20)),
            (T_DEC_TANK, "Drain Tank", (160, 20)),
            (T_RAISE_EMERGENCY, "Raise Emergency", (260, 0)),
            (T_CLEAR_EMERGENCY, "Clear Emergency", (340, 0)),
        ];
        for (id, name, (x, y)) in transitions {
            self.net.add_transition(Transition::new(id, name).at(x, y))?;
        }

        // guard order is reporting order
        self.guard(Arc::inhibitor("a_emergency_start", EMERGENCY, T_START_PUMP), GuardError::EmergencyActive)?;
        self.guard(Arc::normal("a_rest_start", AT_REST, T_START_PUMP, 1), GuardError::NotAtRest)?;
        self.guard(Arc::normal("a_ok_start", RESERVOIR_OK, T_START_PUMP, 1), GuardError::ReservoirEmpty)?;
        self.guard(Arc::normal("a_tank_start", RESERVOIR, T_START_PUMP, 1), GuardError::ReservoirEmpty)?;
        self.output(Arc::normal("a_start_ok", T_START_PUMP, RESERVOIR_OK, 1))?;
        self.output(Arc::normal("a_start_busy", T_START_PUMP, PUMP_BUSY, 1))?;

        self.guard(Arc::normal("a_turn1_irrig1", TURN_ZONE1, T_IRRIGATE1, 1), GuardError::NotZoneTurn(1))?;
        self.guard(Arc::normal("a_busy_irrig1", PUMP_BUSY, T_IRRIGATE1, 1), GuardError::PumpIdle)?;
        self.output(Arc::normal("a_irrig1_zone1", T_IRRIGATE1, ZONE1, 1))?;
        self.output(Arc::normal("a_irrig1_turn2", T_IRRIGATE1, TURN_ZONE2, 1))?;

        self.guard(Arc::normal("a_turn2_irrig2", TURN_ZONE2, T_IRRIGATE2, 1), GuardError::NotZoneTurn(2))?;
        self.guard(Arc::normal("a_busy_irrig2", PUMP_BUSY, T_IRRIGATE2, 1), GuardError::PumpIdle)?;
        self.output(Arc::normal("a_irrig2_zone2", T_IRRIGATE2, ZONE2, 1))?;
        self.output(Arc::normal("a_irrig2_turn1", T_IRRIGATE2, TURN_ZONE1, 1))?;

        self.guard(Arc::normal("a_zone1_rest", ZONE1, T_REST1, 1), GuardError::NothingToRest)?;
        self.output(Arc::normal("a_rest1_at_rest", T_REST1, AT_REST, 1))?;
        self.guard(Arc::normal("a_zone2_rest", ZONE2, T_REST2, 1), GuardError::NothingToRest)?;
        self.output(Arc::normal("a_rest2_at_rest", T_REST2, AT_REST, 1))?;

        self.output(Arc::normal("a_inc_tank", T_INC_TANK, RESERVOIR, 1))?;
        self.guard(Arc::normal("a_tank_dec", RESERVOIR, T_DEC_TANK, 1), GuardError::ReservoirEmpty)?;

        self.guard(
            Arc::inhibitor("a_emergency_raise", EMERGENCY, T_RAISE_EMERGENCY),
            GuardError::EmergencyActive,
        )?;
        self.output(Arc::normal("a_raise_emergency", T_RAISE_EMERGENCY, EMERGENCY, 1))?;
        self.guard(
            Arc::normal("a_emergency_clear", EMERGENCY, T_CLEAR_EMERGENCY, 1),
            GuardError::NotEnabled(T_CLEAR_EMERGENCY.to_string()),
        )?;
        Ok(())
    }

    fn guard(&mut self, arc: Arc, error: GuardError) -> Result<(), NetError> {
        let id = self.net.add_arc(arc)?;
        self.guards.insert(id, error);
        Ok(())
    }

    fn output(&mut self, arc: Arc) -> Result<(), NetError> {
        self.net.add_arc(arc).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_pump_from_rest() {
        let mut controller = Controller::new(5).unwrap();
        let m = controller.apply_transition("start_pump").unwrap();
        assert_eq!(m.pump_busy, 1);
        assert_eq!(m.at_rest, 0);
        assert_eq!(m.tank_level, 4);
        assert_eq!(m.reservoir_ok, 1);
    }

    #[test]
    fn start_pump_with_last_unit_clears_reservoir_ok() {
        let mut controller = Controller::new(1).unwrap();
        let m = controller.apply(DomainTransition::StartPump).unwrap();
        assert_eq!(m.tank_level, 0);
        assert_eq!(m.reservoir_ok, 0);
    }

    #[test]
    fn wrong_turn_is_refused_without_effects() {
        let mut controller = Controller::new(2).unwrap();
        controller.apply(DomainTransition::StartPump).unwrap();
        controller.apply(DomainTransition::IrrigateZone1).unwrap();
        assert_eq!(controller.marking().turn_zone2, 1);

        let before = controller.marking.clone();
        assert_eq!(
            controller.apply_transition("irrigate_zone1"),
            Err(GuardError::NotZoneTurn(1))
        );
        assert_eq!(controller.marking, before);
    }

    #[test]
    fn emergency_blocks_start_pump() {
        let mut controller = Controller::new(2).unwrap();
        assert_eq!(
            controller
                .apply_transition("toggleEmergency")
                .unwrap()
                .emergency,
            1
        );
        assert_eq!(
            controller.apply(DomainTransition::StartPump),
            Err(GuardError::EmergencyActive)
        );
        assert_eq!(
            controller.apply(DomainTransition::ToggleEmergency).unwrap().emergency,
            0
        );
        assert!(controller.apply(DomainTransition::StartPump).is_ok());
    }

    #[test]
    fn drained_tank_reports_reservoir_empty() {
        let mut controller = Controller::new(2).unwrap();
        controller.apply_transition("t_decTank").unwrap();
        let m = controller.apply_transition("dec_tank").unwrap();
        assert_eq!((m.tank_level, m.reservoir_ok), (0, 0));
        assert_eq!(
            controller.apply(DomainTransition::StartPump),
            Err(GuardError::ReservoirEmpty)
        );
        assert_eq!(
            controller.apply(DomainTransition::DecTank),
            Err(GuardError::ReservoirEmpty)
        );

        let m = controller.apply(DomainTransition::IncTank).unwrap();
        assert_eq!((m.tank_level, m.reservoir_ok), (1, 1));
    }

    #[test]
    fn busy_pump_is_not_at_rest() {
        let mut controller = Controller::new(2).unwrap();
        controller.apply(DomainTransition::StartPump).unwrap();
        assert_eq!(
            controller.apply(DomainTransition::StartPump),
            Err(GuardError::NotAtRest)
        );
        assert_eq!(
            controller.apply(DomainTransition::ToRest),
            Err(GuardError::NothingToRest)
        );
    }

    #[test]
    fn idle_pump_cannot_irrigate() {
        let mut controller = Controller::new(2).unwrap();
        assert_eq!(
            controller.apply(DomainTransition::IrrigateZone1),
            Err(GuardError::PumpIdle)
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut controller = Controller::new(2).unwrap();
        assert_eq!(
            controller.apply_transition("open_valve"),
            Err(GuardError::UnknownTransition("open_valve".into()))
        );
        for transition in DomainTransition::ALL {
            assert_eq!(transition.as_str().parse::<DomainTransition>(), Ok(transition));
        }
    }

    #[test]
    fn next_step_walks_the_watering_cycle() {
        let mut controller = Controller::new(2).unwrap();
        let mut fired = Vec::new();
        for _ in 0..6 {
            let (transition, _) = controller.step().unwrap().unwrap();
            fired.push(transition);
        }
        assert_eq!(
            fired,
            vec![
                DomainTransition::StartPump,
                DomainTransition::IrrigateZone1,
                DomainTransition::ToRest,
                DomainTransition::StartPump,
                DomainTransition::IrrigateZone2,
                DomainTransition::ToRest,
            ]
        );
        let m = controller.marking();
        assert_eq!((m.at_rest, m.tank_level, m.reservoir_ok), (1, 0, 0));
        assert_eq!(controller.step(), Err(GuardError::ReservoirEmpty));
    }

    #[test]
    fn marking_serializes_in_camel_case() {
        let controller = Controller::new(2).unwrap();
        let json = serde_json::to_value(controller.marking()).unwrap();
        assert_eq!(json["atRest"], 1);
        assert_eq!(json["zone1Watered"], 0);
        assert_eq!(json["turnZone1"], 1);
        assert_eq!(json["tankLevel"], 2);
    }
}
