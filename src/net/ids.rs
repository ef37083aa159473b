//! 强类型标识符：库所、迁移与弧在各自存储中的位置。
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::index_vec::Idx;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }

        impl Idx for $name {
            fn index(self) -> usize {
                self.0 as usize
            }

            fn from_usize(idx: usize) -> Self {
                Self(u32::try_from(idx).expect(concat!(stringify!($name), " index exceeds u32::MAX")))
            }
        }
    };
}

define_id!(
    /// 库所在 [`Net`](crate::net::Net) 与 [`Marking`](crate::net::Marking) 中的位置。
    PlaceId,
    "p"
);
define_id!(
    /// 迁移在 [`Net`](crate::net::Net) 中的位置。
    TransitionId,
    "t"
);
define_id!(ArcId, "a");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_with_kind_prefix() {
        assert_eq!(format!("{:?}", PlaceId::new(3)), "p3");
        assert_eq!(TransitionId::from_usize(7).to_string(), "t7");
        assert_eq!(ArcId::new(0).index(), 0);
    }

    #[test]
    fn largest_raw_index_round_trips() {
        let id = PlaceId::from_usize(u32::MAX as usize);
        assert_eq!(id.raw(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    #[should_panic(expected = "PlaceId index exceeds u32::MAX")]
    fn oversized_index_is_rejected() {
        let _ = PlaceId::from_usize(u32::MAX as usize + 1);
    }
}
