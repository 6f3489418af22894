//! # Overview
//!
//! Crate for turning a single dense, generated mesh into a compact asset that can be used in a
//! real-time engine while keeping its look.
//!
//! Two kinds of assets are supported, selected by [`PipelineMode`]:
//!
//! * **Static props** keep their appearance as per-corner vertex colors. The mesh is decimated
//!   and the colors are resampled from a hidden copy of the original.
//! * **Animatable characters** are rebuilt from a voxel grid, remeshed into a quad-dominant
//!   mesh (falling back to decimation when that fails), unwrapped and get their appearance
//!   baked into a diffuse and a normal map.
//!
//! ```text
//! import ─► duplicate ─► simplify ─► [unwrap] ─► transfer appearance ─► delete source ─► export
//! ```
//!
//! # Components
//!
//! * [`Scene`]: arena of objects and images, addressed by [`ObjectHandle`] and [`ImageHandle`].
//! * [`simplify`]: decimation, voxel remeshing and the quad remesh state machine.
//! * [`uv`]: angle-based UV projection.
//! * [`appearance`]: vertex color transfer and texture baking.
//! * [`Pipeline`]: the orchestrator that owns the source/target pair.

mod common;

pub mod appearance;
pub mod bvh;
pub mod config;
pub mod generator;
pub mod io;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod primitives;
pub mod scene;
pub mod simplify;
pub mod texture;
pub mod uv;

pub use common::{extract_extension_from_path, Error, Result};
pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineMode, PipelineReport};
pub use scene::{ImageHandle, Object, ObjectHandle, Scene};
