//! 引擎外部状态：与库所 token 互为镜像的领域字段。
use serde::{Deserialize, Serialize};

use crate::net::Weight;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrrigationState {
    pub zones: usize,
    pub reservoir_level: Weight,
    pub emergency: bool,
    pub soil_dry: Vec<bool>,
    pub auto_mode: bool,
}

impl IrrigationState {
    pub fn new(zones: usize, reservoir_level: Weight) -> Self {
        Self {
            zones,
            reservoir_level,
            emergency: false,
            soil_dry: vec![false; zones],
            auto_mode: false,
        }
    }

    pub fn is_soil_dry(&self, zone: usize) -> bool {
        self.soil_dry.get(zone).copied().unwrap_or(false)
    }

    /// Merges the fields present in `update`. Returns `true` if anything changed.
    pub fn merge(&mut self, update: StateUpdate) -> bool {
        let before = self.clone();
        if let Some(level) = update.reservoir_level {
            self.reservoir_level = level;
        }
        if let Some(emergency) = update.emergency {
            self.emergency = emergency;
        }
        if let Some(mut soil_dry) = update.soil_dry {
            soil_dry.resize(self.zones, false);
            self.soil_dry = soil_dry;
        }
        if let Some(auto_mode) = update.auto_mode {
            self.auto_mode = auto_mode;
        }
        *self != before
    }
}

/// Partial update of [`IrrigationState`]; absent fields are left untouched.
///
/// The zone count is not part of it: changing zones rebuilds the net.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateUpdate {
    pub reservoir_level: Option<Weight>,
    pub emergency: Option<bool>,
    pub soil_dry: Option<Vec<bool>>,
    pub auto_mode: Option<bool>,
}

impl StateUpdate {
    pub fn reservoir_level(level: Weight) -> Self {
        Self {
            reservoir_level: Some(level),
            ..Self::default()
        }
    }

    pub fn emergency(on: bool) -> Self {
        Self {
            emergency: Some(on),
            ..Self::default()
        }
    }

    pub fn auto_mode(on: bool) -> Self {
        Self {
            auto_mode: Some(on),
            ..Self::default()
        }
    }
}
