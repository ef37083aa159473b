//! # Petri 网核心定义（带抑制弧的 P/T 网）
//!
//! 库所集合 `P`、迁移集合 `T` 与弧集合 `A`；每条弧连接一个库所与一个迁移，
//! 带权重 `w ≥ 1` 与类型（普通 / 抑制）。对任意标识 `M ∈ ℕ^{|P|}`：
//!
//! * 迁移 `t` **可发生** 当且仅当对每条输入弧 `(p, t)`：
//!   1. 普通弧：`M[p] ≥ w`；
//!   2. 抑制弧：`M[p] = 0`（权重不参与判断）；
//! * 发生后：普通输入弧消耗 `w`（下限截断为 0），所有输出弧产生 `w`。
//!
//! 弧通过节点 id 引用端点；无法解析的弧保留在网中用于导出，但在判定与发生时跳过。
//!
//! ## 示例
//!
//! ```rust
//! use irrigation_pn::net::*;
//!
//! let mut net = Net::empty();
//! let p0 = net.add_place(Place::new("p0", "P0", 1)).unwrap();
//! let p1 = net.add_place(Place::new("p1", "P1", 0)).unwrap();
//! let t0 = net.add_transition(Transition::new("t0", "T0")).unwrap();
//! net.add_arc(Arc::normal("a0", "p0", "t0", 1)).unwrap();
//! net.add_arc(Arc::normal("a1", "t0", "p1", 1)).unwrap();
//!
//! let marking = net.initial_marking();
//! assert_eq!(net.enabled_transitions(&marking), vec![t0]);
//! let next = net.fire_transition(&marking, t0).unwrap();
//! assert_eq!(next.tokens(p0), 0);
//! assert_eq!(next.tokens(p1), 1);
//! ```

pub mod core;
pub mod ids;
pub mod index_vec;
pub mod io;
pub mod structure;

pub use self::core::{Adjacency, FireError, Net, NetError, Node};
pub use ids::{ArcId, PlaceId, TransitionId};
pub use index_vec::{Idx, IndexVec};
pub use structure::{Arc, ArcKind, Marking, Place, Position, Stage, Transition, Weight};
