use std::{
    io,
    path::{Path, PathBuf},
    result,
};

use polyfold_shared::{serde_yaml, thiserror};

use crate::{appearance, generator, io as mesh_io, simplify, uv, ImageHandle, ObjectHandle};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Nothing was imported from {0}")]
    NothingImported(PathBuf),
    #[error("Object '{0}' has empty geometry (no polygons)")]
    EmptyGeometry(String),
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("Object handle {0:?} doesn't point to an object")]
    StaleObject(ObjectHandle),
    #[error("Image handle {0:?} doesn't point to an image")]
    StaleImage(ImageHandle),
    #[error("Expected exactly one object in the scene before export but found {0}")]
    UnexpectedObjectCount(usize),
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("Failed to read the configuration: {0}")]
    InvalidConfiguration(#[from] serde_yaml::Error),
    #[error("Mesh file error: {0}")]
    MeshFile(#[from] mesh_io::Error),
    #[error("Simplification failed: {0}")]
    Simplify(#[from] simplify::Error),
    #[error("UV unwrap failed: {0}")]
    Uv(#[from] uv::Error),
    #[error("Appearance transfer failed: {0}")]
    Appearance(#[from] appearance::Error),
    #[error("Generator failed: {0}")]
    Generator(#[from] generator::Error),
}

/// Returns the lowercase extension of the `path`.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use polyfold_content::extract_extension_from_path;
/// let extension = extract_extension_from_path(Path::new("models/Character.OBJ")).unwrap();
/// assert_eq!(extension, "obj");
/// ```
pub fn extract_extension_from_path(path: &Path) -> Result<String> {
    Ok(path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_lowercase())
        .ok_or(Error::InvalidPath(path.to_owned()))?
        .to_owned())
}
