//! Ray-traced baking of the source appearance into images on the UV layout of the target.
//!
//! For every texel, sample points are distributed on a regular sub-texel grid. Each sample that
//! falls into a target triangle is lifted onto the cage (the target surface pushed outwards
//! along its interpolated normal) and a ray is cast back inwards. The first source triangle
//! that is hit provides the albedo in the diffuse pass and the shading normal in the normal
//! pass. Texels that no sample covers are filled by dilation afterwards.

use polyfold_shared::{
    detail,
    log::{info, trace, warn},
    nalgebra::{Vector2, Vector3, Vector4},
    num_cpus,
    rayon::{
        iter::{IndexedParallelIterator, ParallelIterator},
        slice::ParallelSliceMut,
        ThreadPool, ThreadPoolBuilder,
    },
    ColorSpace, Verbosity,
};

use super::{Error, Result};
use crate::{
    bvh::{Bvh, Hit},
    config::{BakeSettings, DevicePreference},
    material::{BaseColor, Material},
    mesh::Mesh,
    texture::Image,
    ImageHandle, ObjectHandle, Scene,
};

pub const DIFFUSE_IMAGE_NAME: &str = "Final_Texture";
pub const NORMAL_IMAGE_NAME: &str = "Final_Normal";
pub const MATERIAL_NAME: &str = "Final_Game_Mat";

/// Value of texels that the normal pass doesn't cover: the unperturbed tangent space normal.
const FLAT_NORMAL: Vector4<f32> = Vector4::new(0.5, 0.5, 1.0, 1.0);

/// Executes the per-row work of a bake pass.
pub enum RenderDevice {
    /// Rows are distributed over a thread pool
    Accelerated(ThreadPool),
    /// Rows are processed one after the other on the calling thread
    Software,
}

impl RenderDevice {
    /// Creates the preferred device. When the thread pool can't be started, the software device
    /// is returned together with a warning.
    pub fn create(preference: DevicePreference) -> (Self, Option<String>) {
        match preference {
            DevicePreference::Software => (RenderDevice::Software, None),
            DevicePreference::Accelerated => {
                let num_threads = num_cpus::get();
                info!("Create thread pool with {num_threads} threads for baking");
                match ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|index| format!("bake-{index}"))
                    .build()
                {
                    Ok(thread_pool) => (RenderDevice::Accelerated(thread_pool), None),
                    Err(err) => {
                        let message = format!("Accelerated bake device unavailable ({err}), using the software device");
                        warn!("{message}");
                        (RenderDevice::Software, Some(message))
                    }
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderDevice::Accelerated(_) => "accelerated",
            RenderDevice::Software => "software",
        }
    }

    /// Calls `texel` for every pixel and stores the result where it returns a value.
    fn render<F>(&self, image: &mut Image, covered: &mut [bool], texel: F)
    where
        F: Fn(u32, u32) -> Option<Vector4<f32>> + Sync,
    {
        let width = image.width as usize;
        let render_row = |(y, (pixels, covered)): (usize, (&mut [Vector4<f32>], &mut [bool]))| {
            for (x, (pixel, covered)) in pixels.iter_mut().zip(covered.iter_mut()).enumerate() {
                if let Some(value) = texel(x as u32, y as u32) {
                    *pixel = value;
                    *covered = true;
                }
            }
        };
        match self {
            RenderDevice::Accelerated(thread_pool) => thread_pool.install(|| {
                image
                    .pixels
                    .par_chunks_mut(width)
                    .zip(covered.par_chunks_mut(width))
                    .enumerate()
                    .for_each(render_row)
            }),
            RenderDevice::Software => image
                .pixels
                .chunks_mut(width)
                .zip(covered.chunks_mut(width))
                .enumerate()
                .for_each(render_row),
        }
    }
}

/// Where the diffuse pass reads the albedo of the source.
pub enum Albedo<'a> {
    /// Base color texture sampled with the UVs of the source
    Image { image: &'a Image, uvs: &'a [Vector2<f32>] },
    /// Color attribute of the source
    Attribute,
    Constant(Vector4<f32>),
}

impl<'a> Albedo<'a> {
    /// Picks the texture if the source has one and UVs to sample it, then the color attribute, then the constant.
    pub fn of(source: &'a Mesh, image: Option<&'a Image>) -> Self {
        if let (Some(image), Some(uvs)) = (image, source.corner_uvs.as_deref()) {
            return Albedo::Image { image, uvs };
        }
        if source.color_attribute.is_some() {
            return Albedo::Attribute;
        }
        match source.material.as_ref().map(|material| &material.base_color) {
            Some(BaseColor::Constant(color)) => Albedo::Constant(*color),
            _ => Albedo::Constant(Material::DEFAULT_BASE_COLOR),
        }
    }

    fn at(&self, source: &Mesh, hit: &Hit) -> Vector4<f32> {
        let color = match self {
            Albedo::Image { image, uvs } => image.sample(&hit.interpolate(|corner| uvs[corner])),
            Albedo::Attribute => hit.interpolate(|corner| {
                source
                    .corner_color(corner)
                    .map_or(Vector4::repeat(1.0), |color| color.to_linear())
            }),
            Albedo::Constant(color) => *color,
        };
        Vector4::new(color.x, color.y, color.z, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakePass {
    Diffuse,
    Normal,
}

/// Target triangle with everything a sample needs.
struct TargetTriangle {
    uvs: [Vector2<f32>; 3],
    positions: [Vector3<f32>; 3],
    normals: [Vector3<f32>; 3],
    tangent: Vector3<f32>,
    bitangent: Vector3<f32>,
    uv_min: Vector2<f32>,
    uv_max: Vector2<f32>,
}

impl TargetTriangle {
    /// Barycentric coordinates of `uv` if it lies inside the triangle.
    fn barycentric(&self, uv: &Vector2<f32>) -> Option<Vector3<f32>> {
        if uv.x < self.uv_min.x || uv.y < self.uv_min.y || uv.x > self.uv_max.x || uv.y > self.uv_max.y {
            return None;
        }
        let [a, b, c] = self.uvs;
        let (v0, v1, v2) = (b - a, c - a, uv - a);
        let denominator = v0.x * v1.y - v1.x * v0.y;
        if denominator.abs() < 1e-12 {
            return None;
        }
        let v = (v2.x * v1.y - v1.x * v2.y) / denominator;
        let w = (v0.x * v2.y - v2.x * v0.y) / denominator;
        let u = 1.0 - v - w;
        const EPSILON: f32 = -1e-5;
        (u >= EPSILON && v >= EPSILON && w >= EPSILON).then(|| Vector3::new(u, v, w))
    }
}

/// UV layout of the target split into rows of texels.
struct TargetSurface {
    triangles: Vec<TargetTriangle>,
    /// Triangles whose UV bounds overlap a texel row
    rows: Vec<Vec<u32>>,
}

impl TargetSurface {
    fn new(target: &Mesh, uvs: &[Vector2<f32>], height: u32) -> Self {
        let vertex_normals = target.vertex_normals();
        let face_normals = target.face_normals();
        let mut triangles = Vec::new();
        let mut rows = vec![Vec::new(); height as usize];
        for triangle in target.triangles() {
            let corners = triangle.corners.map(|corner| corner as usize);
            let uv = corners.map(|corner| uvs[corner]);
            let positions = target.triangle_positions(&triangle);
            let normals = if target.smooth_shading {
                corners.map(|corner| vertex_normals[target.corner_vertices[corner] as usize])
            } else {
                [face_normals[triangle.polygon as usize]; 3]
            };

            let (e1, e2) = (positions[1] - positions[0], positions[2] - positions[0]);
            let (d1, d2) = (uv[1] - uv[0], uv[2] - uv[0]);
            let determinant = d1.x * d2.y - d2.x * d1.y;
            if determinant.abs() < 1e-12 {
                continue;
            }
            let tangent = (e1 * d2.y - e2 * d1.y) / determinant;
            let bitangent = (e2 * d1.x - e1 * d2.x) / determinant;

            let uv_min = uv[0].inf(&uv[1]).inf(&uv[2]);
            let uv_max = uv[0].sup(&uv[1]).sup(&uv[2]);
            // Image rows run from the top, UVs from the bottom
            let to_row = |v: f32| ((1.0 - v) * height as f32).floor().clamp(0.0, height as f32 - 1.0) as usize;
            let index = triangles.len() as u32;
            for row in to_row(uv_max.y)..=to_row(uv_min.y) {
                rows[row].push(index);
            }
            triangles.push(TargetTriangle {
                uvs: uv,
                positions,
                normals,
                tangent,
                bitangent,
                uv_min,
                uv_max,
            });
        }
        Self { triangles, rows }
    }

    /// Finds the triangle under `uv` among the ones overlapping `row`.
    fn locate(&self, row: u32, uv: &Vector2<f32>) -> Option<(&TargetTriangle, Vector3<f32>)> {
        self.rows[row as usize].iter().find_map(|index| {
            let triangle = &self.triangles[*index as usize];
            triangle.barycentric(uv).map(|barycentric| (triangle, barycentric))
        })
    }
}

/// Source mesh prepared for ray queries.
struct SourceSurface<'a> {
    mesh: &'a Mesh,
    bvh: Bvh,
    albedo: Albedo<'a>,
    vertex_normals: Vec<Vector3<f32>>,
    face_normals: Vec<Vector3<f32>>,
}

impl<'a> SourceSurface<'a> {
    fn shading_normal(&self, hit: &Hit) -> Vector3<f32> {
        if self.mesh.smooth_shading {
            hit.interpolate(|corner| self.vertex_normals[self.mesh.corner_vertices[corner] as usize])
                .try_normalize(f32::EPSILON)
                .unwrap_or_else(|| self.face_normals[hit.triangle.polygon as usize])
        } else {
            self.face_normals[hit.triangle.polygon as usize]
        }
    }
}

/// Baked images before they are added to a scene.
#[derive(Debug, Clone)]
pub struct BakedMaps {
    pub diffuse: Image,
    pub normal: Image,
    /// Texels hit by at least one sample
    pub covered_texels: usize,
    pub device: &'static str,
    pub warnings: Vec<String>,
}

/// Bakes the diffuse and normal map of `source` onto the UV layout of `target`.
pub fn bake_maps(
    source: &Mesh,
    source_image: Option<&Image>,
    target: &Mesh,
    settings: &BakeSettings,
    verbosity: Verbosity,
) -> Result<BakedMaps> {
    if source.is_empty() {
        return Err(Error::MissingSource);
    }
    let Some(uvs) = target.corner_uvs.as_deref().filter(|uvs| !uvs.is_empty()) else {
        return Err(Error::MissingUvs);
    };
    if target.surface_area() <= f32::EPSILON {
        return Err(Error::ZeroArea);
    }

    let resolution = settings.resolution.max(1);
    let surface = TargetSurface::new(target, uvs, resolution);
    if surface.triangles.is_empty() {
        return Err(Error::MissingUvs);
    }
    let source = SourceSurface {
        mesh: source,
        bvh: Bvh::new(source),
        albedo: Albedo::of(source, source_image),
        vertex_normals: source.vertex_normals(),
        face_normals: source.face_normals(),
    };

    let (device, device_warning) = RenderDevice::create(settings.device);
    let mut warnings = device_warning.into_iter().collect::<Vec<_>>();
    info!("Baking {resolution}x{resolution} texels on the {} device", device.name());

    let mut diffuse = Image::new(DIFFUSE_IMAGE_NAME, resolution, resolution, ColorSpace::Srgb);
    let covered_texels = run_pass(&device, &mut diffuse, BakePass::Diffuse, &surface, &source, settings, verbosity);
    let mut normal = Image::new(NORMAL_IMAGE_NAME, resolution, resolution, ColorSpace::NonColor);
    normal.pixels.fill(FLAT_NORMAL);
    run_pass(&device, &mut normal, BakePass::Normal, &surface, &source, settings, verbosity);

    if covered_texels == 0 {
        let message = "No texel of the UV layout was covered by the bake".to_owned();
        warn!("{message}");
        warnings.push(message);
    }
    Ok(BakedMaps {
        diffuse,
        normal,
        covered_texels,
        device: device.name(),
        warnings,
    })
}

/// Renders one pass into `image`, dilates it and returns the number of covered texels.
fn run_pass(
    device: &RenderDevice,
    image: &mut Image,
    pass: BakePass,
    surface: &TargetSurface,
    source: &SourceSurface,
    settings: &BakeSettings,
    verbosity: Verbosity,
) -> usize {
    let (width, height) = (image.width, image.height);
    let grid = (settings.samples.max(1) as f32).sqrt().floor().max(1.0) as u32;
    let cage = settings.cage_extrusion;
    let max_distance = 2.0 * cage.max(f32::EPSILON);

    let texel = |x: u32, y: u32| -> Option<Vector4<f32>> {
        let mut sum = Vector4::zeros();
        let mut count = 0;
        for sy in 0..grid {
            for sx in 0..grid {
                let uv = Vector2::new(
                    (x as f32 + (sx as f32 + 0.5) / grid as f32) / width as f32,
                    1.0 - (y as f32 + (sy as f32 + 0.5) / grid as f32) / height as f32,
                );
                let Some((triangle, barycentric)) = surface.locate(y, &uv) else {
                    continue;
                };
                let interpolate = |values: &[Vector3<f32>; 3]| {
                    values[0] * barycentric.x + values[1] * barycentric.y + values[2] * barycentric.z
                };
                let point = interpolate(&triangle.positions);
                let Some(normal) = interpolate(&triangle.normals).try_normalize(f32::EPSILON) else {
                    continue;
                };
                let hit = source
                    .bvh
                    .cast_ray(&(point + normal * cage), &-normal, max_distance)
                    .or_else(|| source.bvh.closest_point(&point));
                let Some(hit) = hit else {
                    continue;
                };
                sum += match pass {
                    BakePass::Diffuse => source.albedo.at(source.mesh, &hit),
                    BakePass::Normal => {
                        let encoded = to_tangent_space(&source.shading_normal(&hit), &normal, triangle) * 0.5
                            + Vector3::repeat(0.5);
                        Vector4::new(encoded.x, encoded.y, encoded.z, 1.0)
                    }
                };
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f32)
    };

    let mut covered = vec![false; image.pixels.len()];
    device.render(image, &mut covered, texel);
    let covered_texels = covered.iter().filter(|covered| **covered).count();
    detail!(verbosity, "{pass:?} pass covered {covered_texels} texels");
    image.dilate(&mut covered, settings.margin);
    trace!("Dilated {pass:?} pass by {} pixels", settings.margin);
    covered_texels
}

/// Expresses `normal` in the tangent frame of the target at a point with the shading normal `frame_normal`.
fn to_tangent_space(normal: &Vector3<f32>, frame_normal: &Vector3<f32>, triangle: &TargetTriangle) -> Vector3<f32> {
    let tangent = (triangle.tangent - frame_normal * frame_normal.dot(&triangle.tangent))
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(|| perpendicular(frame_normal));
    let handedness = if frame_normal.cross(&tangent).dot(&triangle.bitangent) < 0.0 {
        -1.0
    } else {
        1.0
    };
    let bitangent = frame_normal.cross(&tangent) * handedness;
    Vector3::new(normal.dot(&tangent), normal.dot(&bitangent), normal.dot(frame_normal))
}

fn perpendicular(normal: &Vector3<f32>) -> Vector3<f32> {
    let helper = if normal.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    helper.cross(normal).normalize()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BakeReport {
    pub diffuse: ImageHandle,
    pub normal: ImageHandle,
    pub covered_texels: usize,
    pub warnings: Vec<String>,
}

/// Bakes `source` onto `target`, adds the images to the scene and gives `target` a material that uses them.
pub fn bake(
    scene: &mut Scene,
    source: ObjectHandle,
    target: ObjectHandle,
    settings: &BakeSettings,
    verbosity: Verbosity,
) -> Result<BakeReport> {
    let source_mesh = scene.mesh(source).map_err(|_| Error::MissingSource)?;
    let target_mesh = scene.mesh(target).map_err(|_| Error::MissingTarget)?;
    let source_image = source_mesh
        .material
        .as_ref()
        .and_then(Material::base_color_image)
        .and_then(|handle| scene.image(handle).ok());
    let maps = bake_maps(source_mesh, source_image, target_mesh, settings, verbosity)?;

    let diffuse = scene.add_image(maps.diffuse);
    let normal = scene.add_image(maps.normal);
    let material = Material::new(MATERIAL_NAME)
        .with_base_color(BaseColor::Image(diffuse))
        .with_normal_map(normal)
        .with_roughness(settings.roughness);
    scene.mesh_mut(target).map_err(|_| Error::MissingTarget)?.material = Some(material);
    info!("Baked {} texels on the {} device", maps.covered_texels, maps.device);

    Ok(BakeReport {
        diffuse,
        normal,
        covered_texels: maps.covered_texels,
        warnings: maps.warnings,
    })
}
