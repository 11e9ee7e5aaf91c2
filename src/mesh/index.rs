//! Index types for mesh elements.
//!
//! Meshes are stored as flat arrays (arena-indexed); elements are referred to
//! by type-safe index wrappers rather than references. Directed edges follow
//! the face-corner convention: edge `3f + k` runs from corner `k` of face `f`
//! to corner `(k + 1) % 3`.

use std::fmt::{self, Debug};

/// Sentinel for "no element" in raw index tables.
pub const INVALID: usize = usize::MAX;

/// A type-safe vertex index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VertexId(u32);

/// A type-safe face index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct FaceId(u32);

/// A type-safe directed edge index (`3 * face + corner`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct EdgeId(u32);

macro_rules! impl_index_type {
    ($name:ident, $display:literal) => {
        impl $name {
            /// Create a new index from a raw value.
            #[inline]
            pub fn new(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize, "index {} too large", index);
                Self(index as u32)
            }

            /// Create an invalid/null index.
            #[inline]
            pub fn invalid() -> Self {
                Self(u32::MAX)
            }

            /// Get the raw index value.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// Check if this is a valid (non-null) index.
            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", $display, self.index())
                } else {
                    write!(f, "{}(INVALID)", $display)
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self::new(v)
            }
        }
    };
}

impl_index_type!(VertexId, "V");
impl_index_type!(FaceId, "F");
impl_index_type!(EdgeId, "E");

impl EdgeId {
    /// The directed edge leaving corner `corner` of face `face`.
    #[inline]
    pub fn from_corner(face: FaceId, corner: usize) -> Self {
        Self::new(face.index() * 3 + corner)
    }

    /// The face this directed edge belongs to.
    #[inline]
    pub fn face(self) -> FaceId {
        FaceId::new(self.index() / 3)
    }

    /// The corner of the face the edge starts from.
    #[inline]
    pub fn corner(self) -> usize {
        self.index() % 3
    }

    /// The next directed edge around the same face.
    #[inline]
    pub fn next(self) -> Self {
        Self::new(dedge_next(self.index()))
    }

    /// The previous directed edge around the same face.
    #[inline]
    pub fn prev(self) -> Self {
        Self::new(dedge_prev(self.index()))
    }
}

/// Next directed edge around the face of raw edge `e`.
#[inline]
pub(crate) fn dedge_next(e: usize) -> usize {
    if e % 3 == 2 {
        e - 2
    } else {
        e + 1
    }
}

/// Previous directed edge around the face of raw edge `e`.
#[inline]
pub(crate) fn dedge_prev(e: usize) -> usize {
    if e % 3 == 0 {
        e + 2
    } else {
        e - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_id() {
        let v = VertexId::new(42);
        assert_eq!(v.index(), 42);
        assert!(v.is_valid());
        assert!(!VertexId::invalid().is_valid());
    }

    #[test]
    fn test_edge_face_corner() {
        let e = EdgeId::from_corner(FaceId::new(5), 2);
        assert_eq!(e.index(), 17);
        assert_eq!(e.face(), FaceId::new(5));
        assert_eq!(e.corner(), 2);
        assert_eq!(e.next().index(), 15);
        assert_eq!(e.prev().index(), 16);
        assert_eq!(e.next().prev(), e);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", FaceId::new(3)), "F(3)");
        assert_eq!(format!("{:?}", EdgeId::invalid()), "E(INVALID)");
    }
}
