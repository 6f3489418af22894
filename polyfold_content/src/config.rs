use std::{
    fs,
    path::{Path, PathBuf},
};

use polyfold_shared::{log::info, serde_yaml, Verbosity};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Configuration of a pipeline run. Every stage receives the part it needs explicitly.
///
/// Missing fields in a YAML file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decimate: DecimateSettings,
    pub remesh: RemeshSettings,
    pub uv: UvSettings,
    pub bake: BakeSettings,
    pub generator: GeneratorSettings,
    /// Name of the texture that is expected next to the input mesh in animatable mode.
    pub texture_file_name: String,
    pub verbosity: Verbosity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decimate: DecimateSettings::default(),
            remesh: RemeshSettings::default(),
            uv: UvSettings::default(),
            bake: BakeSettings::default(),
            generator: GeneratorSettings::default(),
            texture_file_name: "texture.png".to_owned(),
            verbosity: Verbosity::Quiet,
        }
    }
}

impl PipelineConfig {
    /// Reads the configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config = Self::from_yaml_str(&content)?;
        info!("Read pipeline configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimateSettings {
    /// Fraction of the polygons that remain after decimation.
    pub ratio: f32,
    /// Vertices closer than this distance are merged.
    pub weld_distance: f32,
    /// Faces whose edges are shorter than this are considered degenerate. The area threshold is its square.
    pub degenerate_threshold: f32,
}

impl Default for DecimateSettings {
    fn default() -> Self {
        Self {
            ratio: 0.1,
            weld_distance: 0.001,
            degenerate_threshold: 0.0001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshSettings {
    pub voxel_size: f32,
    /// Number of faces the quad remesher aims for.
    pub target_faces: usize,
    /// Ratio used by the decimate fallback when the quad remesh doesn't succeed.
    pub fallback_ratio: f32,
    /// Upper bound for the number of voxels along one axis.
    pub max_resolution: usize,
}

impl Default for RemeshSettings {
    fn default() -> Self {
        Self {
            voxel_size: 0.005,
            target_faces: 10_000,
            fallback_ratio: 0.1,
            max_resolution: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UvSettings {
    /// Faces whose normals differ less than this angle (in degrees) share a projection.
    pub angle_limit: f32,
    /// Space between islands in UV units.
    pub island_margin: f32,
}

impl Default for UvSettings {
    fn default() -> Self {
        Self {
            angle_limit: 66.0,
            island_margin: 0.03,
        }
    }
}

/// Device on which rays are traced during baking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    /// Thread pool with one worker per core, falls back to `Software` when it can't be created.
    #[default]
    Accelerated,
    Software,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    /// Width and height of the baked images.
    pub resolution: u32,
    /// Samples per texel. Rounded down to a square number.
    pub samples: u32,
    pub cage_extrusion: f32,
    /// Number of pixels by which the baked islands are grown.
    pub margin: u32,
    pub device: DevicePreference,
    pub roughness: f32,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            samples: 16,
            cage_extrusion: 0.03,
            margin: 16,
            device: DevicePreference::Accelerated,
            roughness: 0.7,
        }
    }
}

/// Describes how the external image-to-mesh generator is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub program: String,
    /// Arguments that come before the input image.
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// Arguments appended in animatable mode so that the generator bakes a texture.
    pub texture_arguments: Vec<String>,
    /// Location of the generated mesh relative to the output directory.
    pub generated_mesh: PathBuf,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            program: "python".to_owned(),
            arguments: vec!["run.py".to_owned()],
            working_directory: Some(PathBuf::from("TripoSR")),
            texture_arguments: vec![
                "--bake-texture".to_owned(),
                "--texture-resolution".to_owned(),
                "1024".to_owned(),
            ],
            generated_mesh: Path::new("0").join("mesh.obj"),
        }
    }
}

#[cfg(test)]
mod tests {
    use polyfold_shared::float_cmp::assert_approx_eq;

    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_approx_eq!(f32, config.decimate.ratio, 0.1);
        assert_approx_eq!(f32, config.remesh.voxel_size, 0.005);
        assert_eq!(config.remesh.target_faces, 10_000);
        assert_approx_eq!(f32, config.uv.angle_limit, 66.0);
        assert_eq!(config.bake.resolution, 1024);
        assert_eq!(config.bake.samples, 16);
        assert_eq!(config.texture_file_name, "texture.png");
        assert_eq!(config.verbosity, Verbosity::Quiet);
    }

    #[test]
    fn partial_yaml() {
        let yaml = "
decimate:
  ratio: 0.25
bake:
  resolution: 256
  device: software
verbosity: verbose
";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_approx_eq!(f32, config.decimate.ratio, 0.25);
        assert_approx_eq!(f32, config.decimate.weld_distance, 0.001);
        assert_eq!(config.bake.resolution, 256);
        assert_eq!(config.bake.device, DevicePreference::Software);
        assert_eq!(config.bake.samples, 16);
        assert_eq!(config.verbosity, Verbosity::Verbose);
    }

    #[test]
    fn invalid_yaml() {
        let result = PipelineConfig::from_yaml_str("decimate: [1, 2]");
        assert!(matches!(result, Err(crate::Error::InvalidConfiguration(_))));
    }

    #[test]
    fn yaml_file() {
        let directory = tempdir::TempDir::new("polyfold_config").unwrap();
        let path = directory.path().join("pipeline.yaml");
        fs::write(&path, "texture_file_name: albedo.png\n").unwrap();
        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.texture_file_name, "albedo.png");
    }
}
