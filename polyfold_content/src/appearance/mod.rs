//! Carries the look of the source object over to the simplified target.
//!
//! | Strategy | Used for | Result on the target |
//! |---|---|---|
//! | [`AppearanceStrategy::VertexColors`] | static props | corner color attribute and a material that reads it |
//! | [`AppearanceStrategy::Bake`] | animatable characters | diffuse and normal map on the UV layout and a material that samples them |
//!
//! Both strategies find the source surface by casting rays from the target surface.

pub mod bake;
pub mod vertex_color;

use polyfold_shared::{log::info, thiserror, Verbosity};

use crate::{config::BakeSettings, texture, ImageHandle, ObjectHandle, Scene};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The source object doesn't exist or has no polygons")]
    MissingSource,
    #[error("The target object doesn't exist or has no polygons")]
    MissingTarget,
    #[error("The target has no UV layout to bake into")]
    MissingUvs,
    #[error("The target has zero surface area")]
    ZeroArea,
    #[error("Image error: {0}")]
    Texture(#[from] texture::Error),
}

/// How the appearance is transferred.
#[derive(Debug, Clone, PartialEq)]
pub enum AppearanceStrategy {
    VertexColors,
    Bake(BakeSettings),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppearanceReport {
    /// Images created for the target
    pub images: Vec<ImageHandle>,
    pub warnings: Vec<String>,
}

/// Transfers the appearance of `source` to `target` and replaces the material of `target`.
pub fn transfer(
    scene: &mut Scene,
    source: ObjectHandle,
    target: ObjectHandle,
    strategy: &AppearanceStrategy,
    verbosity: Verbosity,
) -> Result<AppearanceReport> {
    match strategy {
        AppearanceStrategy::VertexColors => {
            info!("Transferring vertex colors");
            let source_mesh = scene.mesh(source).map_err(|_| Error::MissingSource)?.clone();
            let target_mesh = scene.mesh_mut(target).map_err(|_| Error::MissingTarget)?;
            let summary = vertex_color::transfer_vertex_colors(&source_mesh, target_mesh, verbosity)?;
            Ok(AppearanceReport {
                images: Vec::new(),
                warnings: summary.warnings,
            })
        }
        AppearanceStrategy::Bake(settings) => {
            info!("Baking textures with {} samples per texel", settings.samples);
            let report = bake::bake(scene, source, target, settings, verbosity)?;
            Ok(AppearanceReport {
                images: vec![report.diffuse, report.normal],
                warnings: report.warnings,
            })
        }
    }
}
