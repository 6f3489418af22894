//! Reading and writing mesh files.
//!
//! | format | import | export |
//! |---|---|---|
//! | OBJ | positions, polygons, UVs, per-vertex colors | debug output |
//! | PLY | ASCII and binary, positions, polygons, colors | - |
//! | GLB | triangles, UVs, colors, base color and normal textures | everything |

pub mod glb;
pub mod obj;
pub mod ply;

use std::path::{Path, PathBuf};

use polyfold_shared::{log::warn, serde_json, thiserror};

use crate::{extract_extension_from_path, mesh::Mesh, texture, texture::Image};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to load OBJ file '{path}': {error_message}")]
    FailedLoadingObj { path: PathBuf, error_message: String },
    #[error("Failed to load glTF file '{path}': {error_message}")]
    FailedLoadingGltf { path: PathBuf, error_message: String },
    #[error("Failed to parse PLY file: {0}")]
    InvalidPly(String),
    #[error("Index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: usize, vertex_count: usize },
    #[error("Failed to serialize the glTF document: {0}")]
    FailedSerialization(#[from] serde_json::Error),
    #[error("Failed to write the GLB container: {0}")]
    FailedWritingGlb(#[from] gltf::Error),
    #[error("Texture error: {0}")]
    Texture(#[from] texture::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of reading a mesh file.
#[derive(Debug)]
pub struct ImportedMesh {
    pub name: String,
    pub mesh: Mesh,
    pub base_color_image: Option<Image>,
    pub normal_image: Option<Image>,
}

impl ImportedMesh {
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            name: name.into(),
            mesh,
            base_color_image: None,
            normal_image: None,
        }
    }
}

/// Options for [`crate::Scene::export`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Write the color attribute as `COLOR_0`.
    pub colors: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { colors: true }
    }
}

/// Reads the mesh file at `path` based on its extension. Returns `None` when the extension
/// isn't supported or the file contains no vertices.
pub fn import(path: &Path) -> Result<Option<ImportedMesh>> {
    let Ok(extension) = extract_extension_from_path(path) else {
        warn!("File {} has no extension and can't be imported", path.display());
        return Ok(None);
    };
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mesh".to_owned());
    let imported = match extension.as_str() {
        "obj" => obj::import(path, &name)?,
        "ply" => ply::import(path, &name)?,
        "glb" | "gltf" => glb::import(path, &name)?,
        _ => {
            warn!("Unsupported mesh format '{extension}' of {}", path.display());
            None
        }
    };
    Ok(imported.filter(|imported| imported.mesh.vertex_count() > 0))
}

/// Checks that all corners reference existing vertices.
fn validate_indices(mesh: &Mesh) -> Result<()> {
    match mesh
        .corner_vertices
        .iter()
        .find(|vertex| **vertex as usize >= mesh.vertex_count())
    {
        Some(index) => Err(Error::IndexOutOfRange {
            index: *index as usize,
            vertex_count: mesh.vertex_count(),
        }),
        None => Ok(()),
    }
}
