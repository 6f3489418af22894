use std::{fmt, path::Path};

use polyfold_shared::{
    detail,
    log::{error, info, warn},
    ColorSpace, Verbosity,
};
use serde::{Deserialize, Serialize};

use crate::{
    appearance::{self, AppearanceStrategy},
    config::PipelineConfig,
    io::ExportOptions,
    material::{BaseColor, Material},
    simplify::{self, QuadRemesher, RemeshPath, VoxelQuadRemesher},
    texture::Image,
    uv, Error, ObjectHandle, Result, Scene,
};

/// Kind of asset that a run produces. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Decimated prop with vertex colors
    Static,
    /// Remeshed character with baked textures
    Animatable,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Static => write!(f, "static"),
            PipelineMode::Animatable => write!(f, "animatable"),
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub mode: PipelineMode,
    pub input_polygons: usize,
    pub output_polygons: usize,
    pub output_vertices: usize,
    /// State that terminated the remesh strategy. `None` in static mode.
    pub remesh_path: Option<RemeshPath>,
    pub warnings: Vec<String>,
    /// Objects in the scene when the run finished
    pub remaining_objects: usize,
}

/// Turns one generated mesh file into a game-ready GLB file.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use polyfold_content::{Pipeline, PipelineConfig, PipelineMode};
///
/// let pipeline = Pipeline::new(PipelineConfig::default());
/// let report = pipeline
///     .run(Path::new("generated/0/mesh.obj"), Path::new("asset_static.glb"), PipelineMode::Static)
///     .unwrap();
/// println!("{} -> {} polygons", report.input_polygons, report.output_polygons);
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    quad_remesher: Box<dyn QuadRemesher>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let quad_remesher = VoxelQuadRemesher {
            max_resolution: config.remesh.max_resolution,
            ..Default::default()
        };
        Self {
            config,
            quad_remesher: Box::new(quad_remesher),
        }
    }

    /// Replaces the remesher that is used in animatable mode.
    pub fn with_quad_remesher(mut self, quad_remesher: Box<dyn QuadRemesher>) -> Self {
        self.quad_remesher = quad_remesher;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn verbosity(&self) -> Verbosity {
        self.config.verbosity
    }

    /// Processes `input` and writes the result to `output`. Nothing is written when the run fails.
    pub fn run(&self, input: &Path, output: &Path, mode: PipelineMode) -> Result<PipelineReport> {
        let mut scene = Scene::new();
        let (target, report) = self.process(&mut scene, input, mode)?;
        let options = ExportOptions {
            colors: mode == PipelineMode::Static,
        };
        scene.export(target, output, &options).map_err(|err| {
            error!("Export to {} failed: {err}", output.display());
            err
        })?;
        info!(
            "Finished {mode} run: {} -> {} polygons, written to {}",
            report.input_polygons,
            report.output_polygons,
            output.display()
        );
        Ok(report)
    }

    /// Imports `input` into `scene` and runs all stages up to the export. Returns the handle of
    /// the only object that is left in the scene.
    pub fn process(&self, scene: &mut Scene, input: &Path, mode: PipelineMode) -> Result<(ObjectHandle, PipelineReport)> {
        info!("Starting {mode} run for {}", input.display());
        if !input.exists() {
            error!("Input file {} doesn't exist", input.display());
            return Err(Error::InputNotFound(input.to_owned()));
        }
        let Some(imported) = scene.import(input)? else {
            error!("Nothing was imported from {}", input.display());
            return Err(Error::NothingImported(input.to_owned()));
        };
        let imported_object = scene.object(imported)?;
        let input_polygons = imported_object.mesh().polygon_count();
        if input_polygons == 0 {
            let name = imported_object.name.clone();
            error!("Object '{name}' has no polygons");
            return Err(Error::EmptyGeometry(name));
        }

        let mut warnings = Vec::new();
        let (target, remesh_path) = match mode {
            PipelineMode::Static => self.run_static(scene, imported, &mut warnings)?,
            PipelineMode::Animatable => self.run_animatable(scene, imported, input, &mut warnings)?,
        };

        let remaining_objects = scene.object_count();
        if remaining_objects != 1 {
            return Err(Error::UnexpectedObjectCount(remaining_objects));
        }
        let mesh = scene.mesh(target)?;
        let report = PipelineReport {
            mode,
            input_polygons,
            output_polygons: mesh.polygon_count(),
            output_vertices: mesh.vertex_count(),
            remesh_path,
            warnings,
            remaining_objects,
        };
        Ok((target, report))
    }

    /// The imported object becomes the target. A hidden copy keeps the original colors.
    fn run_static(
        &self,
        scene: &mut Scene,
        imported: ObjectHandle,
        warnings: &mut Vec<String>,
    ) -> Result<(ObjectHandle, Option<RemeshPath>)> {
        let name = scene.object(imported)?.name.clone();
        let source = scene.duplicate(imported, format!("{name}_source"))?;
        scene.object_mut(source)?.hidden = true;
        let target = imported;

        info!("Simplifying '{name}' by decimation");
        let simplified = simplify::decimate_strategy(scene.mesh_mut(target)?, &self.config.decimate, self.verbosity())?;
        detail!(
            self.verbosity(),
            "Decimated {} -> {} polygons",
            simplified.polygons_before,
            simplified.polygons_after
        );
        warnings.extend(simplified.warnings);

        let transferred = appearance::transfer(
            scene,
            source,
            target,
            &AppearanceStrategy::VertexColors,
            self.verbosity(),
        )?;
        warnings.extend(transferred.warnings);

        scene.delete(source)?;
        Ok((target, None))
    }

    /// The imported object stays the source. Its duplicate is remeshed, unwrapped and baked.
    fn run_animatable(
        &self,
        scene: &mut Scene,
        imported: ObjectHandle,
        input: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<(ObjectHandle, Option<RemeshPath>)> {
        let source = imported;
        let name = scene.object(source)?.name.clone();
        let texture_path = input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.config.texture_file_name);
        attach_source_texture(scene, source, &texture_path, warnings)?;

        let target = scene.duplicate(source, format!("{name}_lowpoly"))?;
        scene.object_mut(source)?.hidden = true;

        info!("Simplifying '{name}' by remeshing");
        let simplified = simplify::remesh_strategy(
            scene.mesh_mut(target)?,
            &self.config.remesh,
            &self.config.decimate,
            self.quad_remesher.as_ref(),
            self.verbosity(),
        )?;
        warnings.extend(simplified.warnings);

        info!("Unwrapping UVs");
        match uv::smart_project(scene.mesh_mut(target)?, &self.config.uv, self.verbosity()) {
            Ok(unwrapped) => detail!(
                self.verbosity(),
                "{} islands from {} directions",
                unwrapped.islands,
                unwrapped.directions
            ),
            Err(err) => error!("Skipping the UV unwrap: {err}"),
        }

        let baked = appearance::transfer(
            scene,
            source,
            target,
            &AppearanceStrategy::Bake(self.config.bake.clone()),
            self.verbosity(),
        )?;
        warnings.extend(baked.warnings);

        scene.delete(source)?;
        Ok((target, simplified.remesh_path))
    }
}

/// Makes the texture next to the input the base color of the source. Missing or unreadable
/// textures only produce a warning.
fn attach_source_texture(scene: &mut Scene, source: ObjectHandle, path: &Path, warnings: &mut Vec<String>) -> Result<()> {
    if !path.exists() {
        let message = format!("Source texture {} not found", path.display());
        warn!("{message}");
        warnings.push(message);
        return Ok(());
    }

    let existing_image = scene
        .mesh(source)?
        .material
        .as_ref()
        .and_then(Material::base_color_image);
    if let Some(handle) = existing_image {
        if scene.image(handle)?.source_path.as_deref() == Some(path) {
            info!("Texture {} is already linked", path.display());
            return Ok(());
        }
    }

    let image = match Image::load(path, ColorSpace::Srgb) {
        Ok(image) => image,
        Err(err) => {
            let message = format!("Source texture can't be used: {err}");
            warn!("{message}");
            warnings.push(message);
            return Ok(());
        }
    };
    info!("Linking source texture {}", path.display());
    let handle = scene.add_image(image);
    let mesh = scene.mesh_mut(source)?;
    let material = mesh.material.take().unwrap_or_else(|| Material::new("Source_Mat"));
    mesh.material = Some(material.with_base_color(BaseColor::Image(handle)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use polyfold_shared::{
        function_name,
        nalgebra::{Vector2, Vector4},
        ByteColor4,
    };
    use polyfold_test::{create_test_result_folder_for_function, setup_logger};
    use tempdir::TempDir;

    use super::*;
    use crate::{
        config::{BakeSettings, DevicePreference, RemeshSettings},
        io::obj::write_obj,
        mesh::{AttributeDomain, ColorAttribute, Mesh},
        primitives,
        simplify::{cleanup::assert_clean, RemeshOutcome},
    };

    fn write_input(directory: &Path, mesh: &Mesh) -> std::path::PathBuf {
        let path = directory.join("mesh.obj");
        write_obj(mesh, File::create(&path).unwrap()).unwrap();
        path
    }

    fn colored_sphere() -> Mesh {
        let mut sphere = primitives::uv_sphere(1.0, 48, 24);
        let values = sphere
            .positions
            .iter()
            .map(|position| {
                if position.x >= 0.0 {
                    ByteColor4::new(200, 30, 30, 255)
                } else {
                    ByteColor4::new(30, 30, 200, 255)
                }
            })
            .collect();
        sphere.color_attribute = Some(ColorAttribute {
            name: "Col".to_owned(),
            domain: AttributeDomain::Point,
            values,
        });
        sphere
    }

    fn animatable_config() -> PipelineConfig {
        PipelineConfig {
            remesh: RemeshSettings {
                voxel_size: 0.1,
                target_faces: 300,
                ..Default::default()
            },
            bake: BakeSettings {
                resolution: 64,
                samples: 4,
                margin: 4,
                device: DevicePreference::Software,
                ..Default::default()
            },
            ..Default::default()
        }
        .with_verbosity(Verbosity::Verbose)
    }

    struct FailingRemesher;

    impl QuadRemesher for FailingRemesher {
        fn name(&self) -> &str {
            "failing"
        }

        fn remesh(&self, _mesh: &Mesh, _target_faces: usize, _verbosity: Verbosity) -> RemeshOutcome {
            RemeshOutcome::Failed("injected failure".to_owned())
        }
    }

    #[test]
    fn static_colored_input() {
        setup_logger();
        let directory = create_test_result_folder_for_function(function_name!());
        let input = write_input(&directory, &colored_sphere());
        let output = directory.join("asset_static.glb");

        let report = Pipeline::new(PipelineConfig::default())
            .run(&input, &output, PipelineMode::Static)
            .unwrap();
        assert_eq!(report.mode, PipelineMode::Static);
        assert_eq!(report.remesh_path, None);
        assert_eq!(report.remaining_objects, 1);
        assert!(report.output_polygons <= report.input_polygons / 10 + 1);
        assert!(report.warnings.is_empty());

        let mut scene = Scene::new();
        let exported = scene.import(&output).unwrap().unwrap();
        let mesh = scene.mesh(exported).unwrap();
        assert_eq!(mesh.polygon_count(), report.output_polygons);
        assert_eq!(mesh.vertex_count(), report.output_vertices);
        assert!(mesh.color_attribute.is_some());
        assert_eq!(scene.image_count(), 0);
    }

    #[test]
    fn static_round_trip_keeps_corner_colors() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let input = write_input(directory.path(), &colored_sphere());
        let pipeline = Pipeline::new(PipelineConfig::default());
        let mut scene = Scene::new();
        let (target, _) = pipeline.process(&mut scene, &input, PipelineMode::Static).unwrap();
        let output = directory.path().join("round_trip.glb");
        scene.export(target, &output, &ExportOptions { colors: true }).unwrap();

        let mut imported_scene = Scene::new();
        let imported = imported_scene.import(&output).unwrap().unwrap();
        let original = scene.mesh(target).unwrap();
        assert_clean(original, &pipeline.config().decimate);
        let imported = imported_scene.mesh(imported).unwrap();
        assert_eq!(imported.vertex_count(), original.vertex_count());
        assert_eq!(imported.triangles().len(), original.triangles().len());
        for corner in 0..original.corner_count() {
            assert_eq!(imported.corner_color(corner), original.corner_color(corner));
        }
    }

    #[test]
    fn animatable_input_with_texture() {
        setup_logger();
        let directory = create_test_result_folder_for_function(function_name!());
        let mut sphere = primitives::uv_sphere(1.0, 32, 16);
        sphere.corner_uvs = Some(
            (0..sphere.corner_count())
                .map(|corner| {
                    let position = sphere.corner_position(corner);
                    Vector2::new(position.x + 1.0, position.y + 1.0) * 0.5
                })
                .collect(),
        );
        let input = write_input(&directory, &sphere);
        let mut texture = Image::new("texture", 8, 8, ColorSpace::Srgb);
        texture.pixels.fill(Vector4::new(0.2, 0.6, 0.1, 1.0));
        fs::write(directory.join("texture.png"), texture.encode_png().unwrap()).unwrap();
        let output = directory.join("asset_animatable.glb");

        let report = Pipeline::new(animatable_config())
            .run(&input, &output, PipelineMode::Animatable)
            .unwrap();
        assert_eq!(report.mode, PipelineMode::Animatable);
        assert!(report.remesh_path.is_some());
        assert_eq!(report.remaining_objects, 1);
        assert!(report.warnings.iter().all(|warning| !warning.contains("texture")));

        let mut scene = Scene::new();
        let exported = scene.import(&output).unwrap().unwrap();
        let mesh = scene.mesh(exported).unwrap();
        assert!(mesh.has_uvs());
        assert_eq!(scene.image_count(), 2);
        let material = mesh.material.as_ref().unwrap();
        let diffuse = scene.image(material.base_color_image().unwrap()).unwrap();
        assert_eq!(diffuse.width, 64);
        assert!(material.normal_map.is_some());
    }

    #[test]
    fn missing_texture_is_a_warning() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let input = write_input(directory.path(), &primitives::uv_sphere(1.0, 16, 8));
        let output = directory.path().join("asset.glb");
        let report = Pipeline::new(animatable_config())
            .run(&input, &output, PipelineMode::Animatable)
            .unwrap();
        assert!(report.warnings.iter().any(|warning| warning.contains("texture.png")));
        assert!(output.exists());
    }

    #[test]
    fn failing_quad_remesh_uses_the_fallback() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let input = write_input(directory.path(), &primitives::uv_sphere(1.0, 24, 12));
        let output = directory.path().join("asset.glb");
        let report = Pipeline::new(animatable_config())
            .with_quad_remesher(Box::new(FailingRemesher))
            .run(&input, &output, PipelineMode::Animatable)
            .unwrap();
        assert_eq!(report.remesh_path, Some(RemeshPath::DecimateFallback));
        assert!(report.warnings.iter().any(|warning| warning.contains("injected failure")));
        assert!(report.output_polygons > 0);
        assert!(output.exists());
    }

    #[test]
    fn animatable_output_is_clean() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let input = write_input(directory.path(), &primitives::uv_sphere(1.0, 24, 12));
        // Whichever state the built-in remesher ends in, the output has to be clean
        let remeshers: [(Box<dyn QuadRemesher>, Option<RemeshPath>); 2] = [
            (Box::new(VoxelQuadRemesher::default()), None),
            (Box::new(FailingRemesher), Some(RemeshPath::DecimateFallback)),
        ];
        for (remesher, expected_path) in remeshers {
            let pipeline = Pipeline::new(animatable_config()).with_quad_remesher(remesher);
            let mut scene = Scene::new();
            let (target, report) = pipeline.process(&mut scene, &input, PipelineMode::Animatable).unwrap();
            assert!(report.remesh_path.is_some());
            if expected_path.is_some() {
                assert_eq!(report.remesh_path, expected_path);
            }
            let mesh = scene.mesh(target).unwrap();
            assert!(mesh.has_uvs());
            assert_clean(mesh, &pipeline.config().decimate);
        }
    }

    #[test]
    fn zero_polygon_input_fails_before_simplification() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let input = directory.path().join("points.ply");
        fs::write(
            &input,
            "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 0\nproperty list uchar int vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n",
        )
        .unwrap();
        let output = directory.path().join("asset.glb");
        for mode in [PipelineMode::Static, PipelineMode::Animatable] {
            let result = Pipeline::new(PipelineConfig::default()).run(&input, &output, mode);
            assert!(matches!(result, Err(Error::EmptyGeometry(_))));
            assert!(!output.exists());
        }
    }

    #[test]
    fn missing_and_unsupported_input() {
        let directory = TempDir::new("polyfold_pipeline").unwrap();
        let output = directory.path().join("asset.glb");
        let pipeline = Pipeline::new(PipelineConfig::default());

        let result = pipeline.run(&directory.path().join("missing.obj"), &output, PipelineMode::Static);
        assert!(matches!(result, Err(Error::InputNotFound(_))));

        let unsupported = directory.path().join("mesh.stl");
        fs::write(&unsupported, "solid mesh\nendsolid mesh\n").unwrap();
        let result = pipeline.run(&unsupported, &output, PipelineMode::Static);
        assert!(matches!(result, Err(Error::NothingImported(_))));
        assert!(!output.exists());
    }

    #[test]
    fn mode_display() {
        assert_eq!(PipelineMode::Static.to_string(), "static");
        assert_eq!(PipelineMode::Animatable.to_string(), "animatable");
    }
}
