//! 运行时: 网定义、可发生判定与发生语义.
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::net::ids::{ArcId, PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{Arc, ArcKind, Marking, Place, Transition, Weight};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("node id `{0}` is already used by another place or transition")]
    DuplicateNode(String),
    #[error("arc id `{0}` is already used")]
    DuplicateArc(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FireError {
    #[error("transition {0:?} is out of bounds")]
    OutOfBounds(TransitionId),
    #[error("transition {transition:?} is blocked by arc {arc:?}")]
    NotEnabled {
        transition: TransitionId,
        arc: ArcId,
    },
}

/// A node id resolved to its typed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Place(PlaceId),
    Transition(TransitionId),
}

type ArcList = SmallVec<[ArcId; 4]>;

/// Incoming and outgoing arcs of one transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Adjacency {
    pub inputs: ArcList,
    pub outputs: ArcList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    pub id: String,
    pub name: String,
    places: IndexVec<PlaceId, Place>,
    transitions: IndexVec<TransitionId, Transition>,
    arcs: IndexVec<ArcId, Arc>,
    nodes: IndexMap<String, Node>,
    arc_ids: IndexMap<String, ArcId>,
    adjacency: IndexVec<TransitionId, Adjacency>,
    /// 端点无法解析的弧：保留以便导出，但不参与判定与发生。
    skipped: Vec<ArcId>,
}

impl Net {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            places: IndexVec::new(),
            transitions: IndexVec::new(),
            arcs: IndexVec::new(),
            nodes: IndexMap::new(),
            arc_ids: IndexMap::new(),
            adjacency: IndexVec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new("net", "")
    }

    pub fn add_place(&mut self, place: Place) -> Result<PlaceId, NetError> {
        let next = PlaceId::from_usize(self.places.len());
        match self.nodes.entry(place.id.clone()) {
            Entry::Occupied(_) => return Err(NetError::DuplicateNode(place.id)),
            Entry::Vacant(slot) => {
                slot.insert(Node::Place(next));
            }
        }
        Ok(self.places.push(place))
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<TransitionId, NetError> {
        let next = TransitionId::from_usize(self.transitions.len());
        match self.nodes.entry(transition.id.clone()) {
            Entry::Occupied(_) => return Err(NetError::DuplicateNode(transition.id)),
            Entry::Vacant(slot) => {
                slot.insert(Node::Transition(next));
            }
        }
        self.adjacency.push(Adjacency::default());
        Ok(self.transitions.push(transition))
    }

    /// 添加弧并建立迁移的输入/输出索引。
    ///
    /// Arcs whose endpoints are missing, whose orientation is not
    /// place→transition or transition→place, or whose normal weight is zero
    /// are stored but skipped by enabling and firing.
    pub fn add_arc(&mut self, arc: Arc) -> Result<ArcId, NetError> {
        if self.arc_ids.contains_key(&arc.id) {
            return Err(NetError::DuplicateArc(arc.id));
        }
        let source = self.nodes.get(&arc.source).copied();
        let target = self.nodes.get(&arc.target).copied();
        let zero_weight = arc.kind == ArcKind::Normal && arc.weight == 0;
        let arc_key = arc.id.clone();
        let arc_id = self.arcs.push(arc);
        self.arc_ids.insert(arc_key, arc_id);

        match (source, target) {
            _ if zero_weight => self.skip(arc_id, "zero weight"),
            (Some(Node::Place(_)), Some(Node::Transition(t))) => {
                self.adjacency[t].inputs.push(arc_id)
            }
            (Some(Node::Transition(t)), Some(Node::Place(_))) => {
                self.adjacency[t].outputs.push(arc_id)
            }
            (None, _) | (_, None) => self.skip(arc_id, "unknown endpoint"),
            _ => self.skip(arc_id, "not bipartite"),
        }
        Ok(arc_id)
    }

    fn skip(&mut self, arc_id: ArcId, reason: &str) {
        log::warn!("skipping arc {:?}: {}", self.arcs[arc_id], reason);
        self.skipped.push(arc_id);
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).copied()
    }

    pub fn place_id(&self, id: &str) -> Option<PlaceId> {
        match self.node(id)? {
            Node::Place(place) => Some(place),
            Node::Transition(_) => None,
        }
    }

    pub fn transition_id(&self, id: &str) -> Option<TransitionId> {
        match self.node(id)? {
            Node::Transition(transition) => Some(transition),
            Node::Place(_) => None,
        }
    }

    pub fn place(&self, place: PlaceId) -> Option<&Place> {
        self.places.get(place)
    }

    pub fn transition(&self, transition: TransitionId) -> Option<&Transition> {
        self.transitions.get(transition)
    }

    pub fn arc(&self, arc: ArcId) -> Option<&Arc> {
        self.arcs.get(arc)
    }

    pub fn places(&self) -> impl Iterator<Item = (PlaceId, &Place)> {
        self.places.iter_enumerated()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transitions.iter_enumerated()
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs.iter_enumerated()
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    pub fn skipped_arcs(&self) -> &[ArcId] {
        &self.skipped
    }

    pub fn inputs(&self, transition: TransitionId) -> &[ArcId] {
        self.adjacency
            .get(transition)
            .map(|adj| adj.inputs.as_slice())
            .unwrap_or_default()
    }

    pub fn outputs(&self, transition: TransitionId) -> &[ArcId] {
        self.adjacency
            .get(transition)
            .map(|adj| adj.outputs.as_slice())
            .unwrap_or_default()
    }

    pub fn initial_marking(&self) -> Marking {
        Marking::new(self.places.iter().map(|p| p.tokens).collect())
    }

    /// Sets a place's initial token count.
    pub fn set_initial_tokens(&mut self, place: PlaceId, tokens: Weight) {
        if let Some(place) = self.places.get_mut(place) {
            place.tokens = tokens;
        }
    }

    /// 返回第一条阻止 `transition` 发生的输入弧（按添加顺序）。
    ///
    /// * 抑制弧：源库所 token 数 > 0 时阻止，权重不参与判断；
    /// * 普通弧：源库所 token 数 < 权重时阻止。
    pub fn blocking_arc(&self, marking: &Marking, transition: TransitionId) -> Option<ArcId> {
        self.inputs(transition).iter().copied().find(|&arc_id| {
            let arc = &self.arcs[arc_id];
            let Some(place) = self.place_id(&arc.source) else {
                return false;
            };
            let tokens = marking.tokens(place);
            match arc.kind {
                ArcKind::Inhibitor => tokens > 0,
                ArcKind::Normal => tokens < arc.weight,
            }
        })
    }

    pub fn can_fire(&self, marking: &Marking, transition: TransitionId) -> bool {
        transition.index() < self.transitions_len()
            && self.blocking_arc(marking, transition).is_none()
    }

    pub fn enabled_transitions(&self, marking: &Marking) -> Vec<TransitionId> {
        self.transitions
            .indices()
            .filter(|&t| self.can_fire(marking, t))
            .collect()
    }

    /// 计算发生后的新标识；不修改传入的标识。
    ///
    /// Normal input arcs consume (floored at zero), every output arc produces.
    pub fn fire_transition(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if transition.index() >= self.transitions_len() {
            return Err(FireError::OutOfBounds(transition));
        }
        if let Some(arc) = self.blocking_arc(marking, transition) {
            return Err(FireError::NotEnabled { transition, arc });
        }

        let mut next = marking.clone();
        for &arc_id in self.inputs(transition) {
            let arc = &self.arcs[arc_id];
            if arc.kind == ArcKind::Inhibitor {
                continue;
            }
            let Some(place) = self.place_id(&arc.source) else {
                continue;
            };
            if let Some(tokens) = next.tokens_mut(place) {
                *tokens = tokens.saturating_sub(arc.weight);
            }
        }
        for &arc_id in self.outputs(transition) {
            let arc = &self.arcs[arc_id];
            let Some(place) = self.place_id(&arc.target) else {
                continue;
            };
            if let Some(tokens) = next.tokens_mut(place) {
                *tokens = tokens.saturating_add(arc.weight);
            }
        }
        Ok(next)
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}
