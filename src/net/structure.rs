//! P/T 网静态结构元素：库所、迁移、弧与标识。
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::net::ids::PlaceId;
use crate::net::index_vec::IndexVec;

pub type Weight = u64;

/// Layout coordinates. Carried for export only, never read by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Place {
    pub id: String,
    pub name: String,
    /// 初始标识；运行时的 token 数保存在 [`Marking`] 中。
    pub tokens: Weight,
    pub position: Position,
}

impl Place {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tokens: Weight) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tokens,
            position: Position::default(),
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = Position::new(x, y);
        self
    }
}

/// Stage of a timed irrigation process a transition belongs to.
///
/// The declaration order is the batch-firing priority: in-flight work is
/// drained (`Active`, then `Stop`, then `Drying`) before new cycles `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Active,
    Stop,
    Drying,
    Start,
    Other,
}

impl Stage {
    /// 根据迁移 id 中的关键字推断阶段。
    pub fn classify(id: &str) -> Self {
        let id = id.to_ascii_lowercase();
        if id.contains("irrigat") || id.contains("active") {
            Stage::Active
        } else if id.contains("stop") {
            Stage::Stop
        } else if id.contains("dry") {
            Stage::Drying
        } else if id.contains("start") {
            Stage::Start
        } else {
            Stage::Other
        }
    }

    /// The stage a successful fire of `self` hands over to after its delay.
    pub fn follow_up(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::Active),
            Stage::Active => Some(Stage::Stop),
            Stage::Stop => Some(Stage::Drying),
            Stage::Drying | Stage::Other => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Transition {
    pub id: String,
    pub name: String,
    pub stage: Stage,
    /// Zone index parsed from a trailing `_<n>` in the id.
    pub zone: Option<usize>,
    pub position: Position,
}

impl Transition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            stage: Stage::classify(&id),
            zone: zone_suffix(&id),
            name: name.into(),
            id,
            position: Position::default(),
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = Position::new(x, y);
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition")
            .field(&self.id)
            .field(&self.stage)
            .finish()
    }
}

fn zone_suffix(id: &str) -> Option<usize> {
    let (_, digits) = id.rsplit_once('_')?;
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcKind {
    Normal,
    /// 抑制弧：源库所有任意 token 即阻止发生，忽略权重。
    Inhibitor,
}

impl fmt::Display for ArcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArcKind::Normal => "normal",
            ArcKind::Inhibitor => "inhibitor",
        })
    }
}

/// A directed edge between a place and a transition, referenced by node id.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Arc {
    pub id: String,
    pub source: String,
    pub target: String,
    pub weight: Weight,
    pub kind: ArcKind,
}

impl Arc {
    pub fn normal(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        weight: Weight,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            weight,
            kind: ArcKind::Normal,
        }
    }

    pub fn inhibitor(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            weight: 1,
            kind: ArcKind::Inhibitor,
        }
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Arc({}: {} -[{} {}]-> {})",
            self.id, self.source, self.kind, self.weight, self.target
        )
    }
}

/// Token count of every place, indexed by [`PlaceId`].
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marking(pub IndexVec<PlaceId, Weight>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Weight>) -> Self {
        Self(initial)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Weight)> {
        self.0.iter_enumerated()
    }

    /// 越界的库所按 0 个 token 处理。
    pub fn tokens(&self, place: PlaceId) -> Weight {
        self.0.get(place).copied().unwrap_or(0)
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> Option<&mut Weight> {
        self.0.get_mut(place)
    }

    pub fn set(&mut self, place: PlaceId, tokens: Weight) {
        if let Some(slot) = self.0.get_mut(place) {
            *slot = tokens;
        }
    }

    pub fn total(&self) -> Weight {
        self.0.iter().sum()
    }
}

impl Hash for Marking {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in self.0.iter() {
            value.hash(state);
        }
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}
