//! 灌溉网：按分区数构建的四阶段定时 Petri 网。
//!
//! Per zone `i`:
//!
//! ```text
//! reservoir ─(draw)─┐
//! soil_dry_i ───────┼─> start_pump_i ─> pump_on_i ─> irrigate_i ─> watering_i
//! emergency ──o─────┘                               ^   (o = inhibitor)
//! emergency ──o─────────────────────────────────────┘
//! watering_i ─> stop_pump_i ─> soil_wet_i ─> drying_i ─> soil_dry_i
//!
//! armed_irrigate_i ─> irrigate_i
//! armed_stop_pump_i ─> stop_pump_i
//! armed_drying_i ─> drying_i
//! ```
//!
//! `start_pump_i`, `irrigate_i`, `stop_pump_i` and `drying_i` are the Start,
//! Active, Stop and Drying stages; their ids carry the stage keyword and zone
//! suffix that [`Transition::new`] classifies.
//!
//! The three timed stages also consume an `armed_*` token. Only the engine's
//! delayed fire puts one there, so neither a direct fire nor a batch can run a
//! stage before its delay has elapsed.

pub mod state;

use crate::net::{Arc, Net, NetError, Place, Stage, Transition, Weight};

pub use state::{IrrigationState, StateUpdate};

pub const NET_ID: &str = "irrigation_net";
pub const NET_NAME: &str = "Irrigation Petri Net";

pub const RESERVOIR: &str = "reservoir";
pub const EMERGENCY: &str = "emergency";

pub fn soil_dry(zone: usize) -> String {
    format!("soil_dry_{zone}")
}

pub fn pump_on(zone: usize) -> String {
    format!("pump_on_{zone}")
}

pub fn watering(zone: usize) -> String {
    format!("watering_{zone}")
}

pub fn soil_wet(zone: usize) -> String {
    format!("soil_wet_{zone}")
}

pub fn start_pump(zone: usize) -> String {
    format!("start_pump_{zone}")
}

pub fn irrigate(zone: usize) -> String {
    format!("irrigate_{zone}")
}

pub fn stop_pump(zone: usize) -> String {
    format!("stop_pump_{zone}")
}

pub fn drying(zone: usize) -> String {
    format!("drying_{zone}")
}

/// Gate place of a timed stage transition.
pub fn armed(transition: &str) -> String {
    format!("armed_{transition}")
}

/// Id of `zone`'s transition for `stage`.
pub fn stage_transition(stage: Stage, zone: usize) -> Option<String> {
    match stage {
        Stage::Start => Some(start_pump(zone)),
        Stage::Active => Some(irrigate(zone)),
        Stage::Stop => Some(stop_pump(zone)),
        Stage::Drying => Some(drying(zone)),
        Stage::Other => None,
    }
}

const ROW_HEIGHT: i32 = 120;
const GATE_OFFSET: i32 = 45;

/// Builds the irrigation net with its initial marking taken from `state`.
pub fn build_net(state: &IrrigationState, pump_draw: Weight) -> Result<Net, NetError> {
    let mut net = Net::new(NET_ID, NET_NAME);

    net.add_place(Place::new(RESERVOIR, "Reservoir", state.reservoir_level).at(100, 100))?;
    net.add_place(Place::new(EMERGENCY, "Emergency", state.emergency as Weight).at(300, 30))?;

    for zone in 0..state.zones {
        let y = 150 + zone as i32 * ROW_HEIGHT;
        let label = zone + 1;

        let dry = state.is_soil_dry(zone) as Weight;
        net.add_place(Place::new(soil_dry(zone), format!("Soil Dry {label}"), dry).at(200, y))?;
        net.add_place(Place::new(pump_on(zone), format!("Pump On {label}"), 0).at(400, y))?;
        net.add_place(Place::new(watering(zone), format!("Watering {label}"), 0).at(600, y))?;
        net.add_place(Place::new(soil_wet(zone), format!("Soil Wet {label}"), 0).at(800, y))?;

        net.add_transition(
            Transition::new(start_pump(zone), format!("Start Pump {label}")).at(300, y),
        )?;
        net.add_transition(Transition::new(irrigate(zone), format!("Irrigate {label}")).at(500, y))?;
        net.add_transition(
            Transition::new(stop_pump(zone), format!("Stop Pump {label}")).at(700, y),
        )?;
        net.add_transition(
            Transition::new(drying(zone), format!("Soil Drying {label}")).at(500, y + ROW_HEIGHT / 2),
        )?;

        for (transition, name, x, gate_y) in [
            (irrigate(zone), "Irrigate", 500, y - GATE_OFFSET),
            (stop_pump(zone), "Stop", 700, y - GATE_OFFSET),
            (drying(zone), "Drying", 500, y + ROW_HEIGHT / 2 + GATE_OFFSET),
        ] {
            let gate = armed(&transition);
            net.add_place(Place::new(gate.clone(), format!("{name} Armed {label}"), 0).at(x, gate_y))?;
            net.add_arc(Arc::normal(format!("arc_{gate}"), gate, transition, 1))?;
        }

        // start
        net.add_arc(Arc::inhibitor(
            format!("arc_emergency_start_{zone}"),
            EMERGENCY,
            start_pump(zone),
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_reservoir_start_{zone}"),
            RESERVOIR,
            start_pump(zone),
            pump_draw,
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_soil_dry_start_{zone}"),
            soil_dry(zone),
            start_pump(zone),
            1,
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_start_pump_on_{zone}"),
            start_pump(zone),
            pump_on(zone),
            1,
        ))?;

        // active
        net.add_arc(Arc::inhibitor(
            format!("arc_emergency_irrigate_{zone}"),
            EMERGENCY,
            irrigate(zone),
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_pump_on_irrigate_{zone}"),
            pump_on(zone),
            irrigate(zone),
            1,
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_irrigate_watering_{zone}"),
            irrigate(zone),
            watering(zone),
            1,
        ))?;

        // stop
        net.add_arc(Arc::normal(
            format!("arc_watering_stop_{zone}"),
            watering(zone),
            stop_pump(zone),
            1,
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_stop_wet_{zone}"),
            stop_pump(zone),
            soil_wet(zone),
            1,
        ))?;

        // drying
        net.add_arc(Arc::normal(
            format!("arc_wet_drying_{zone}"),
            soil_wet(zone),
            drying(zone),
            1,
        ))?;
        net.add_arc(Arc::normal(
            format!("arc_drying_dry_{zone}"),
            drying(zone),
            soil_dry(zone),
            1,
        ))?;
    }

    log::debug!(
        "built irrigation net: {} zones, {} places, {} transitions",
        state.zones,
        net.places_len(),
        net.transitions_len()
    );
    Ok(net)
}
