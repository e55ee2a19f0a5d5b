//! Shared domain vocabulary for the roadworks coordination core.
//!
//! Kept free of storage and runtime concerns so request layers and tools can
//! depend on it without pulling in the engine.

pub mod geometry;
pub mod status;

pub use geometry::{Coordinate, GeometryValidator, PlanarGeometry, Polygon};
pub use status::{ActivityStatus, NeedStatus, RelationType, UnknownValue};
