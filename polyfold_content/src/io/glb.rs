use std::{borrow::Cow, collections::BTreeMap, fs, io, path::Path};

use gltf::{
    binary::{Glb, Header},
    json::{
        self,
        accessor::{ComponentType, GenericComponentType, Type},
        buffer::Target,
        image::MimeType,
        material::{NormalTexture, PbrBaseColorFactor, PbrMetallicRoughness, StrengthFactor},
        mesh::{Primitive, Semantic},
        texture::{Info, MagFilter, MinFilter, Sampler, WrappingMode},
        validation::{Checked, USize64},
        Index,
    },
    mesh::Mode,
};
use polyfold_shared::{
    ahash::{HashMap, HashMapExt},
    log::{trace, warn},
    nalgebra::{Vector2, Vector3, Vector4},
    serde_json, ByteColor4, ColorSpace,
};

use super::{obj::COLOR_ATTRIBUTE_NAME, validate_indices, Error, ExportOptions, ImportedMesh, Result};
use crate::{
    material::{BaseColor, Material},
    mesh::{AttributeDomain, ColorAttribute, Mesh},
    texture::Image,
    Object, Scene,
};

/// Vertex as it is written to the file. GLB vertices are split wherever a corner attribute differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VertexKey {
    vertex: u32,
    normal: [u32; 3],
    uv: [u32; 2],
    color: [u8; 4],
}

#[derive(Default)]
struct VertexStreams {
    positions: Vec<Vector3<f32>>,
    normals: Vec<Vector3<f32>>,
    uvs: Vec<Vector2<f32>>,
    colors: Vec<Vector4<f32>>,
    indices: Vec<u32>,
}

impl VertexStreams {
    fn build(mesh: &Mesh, with_uvs: bool, with_colors: bool) -> Self {
        let vertex_normals = mesh.smooth_shading.then(|| mesh.vertex_normals());
        let face_normals = mesh.face_normals();
        let mut streams = Self::default();
        let mut lookup = HashMap::with_capacity(mesh.corner_count());

        for triangle in mesh.triangles() {
            for corner in triangle.corners {
                let corner = corner as usize;
                let vertex = mesh.corner_vertices[corner];
                let normal = match &vertex_normals {
                    Some(normals) => normals[vertex as usize],
                    None => face_normals[triangle.polygon as usize],
                };
                // glTF has its UV origin in the top-left corner
                let uv = mesh
                    .corner_uvs
                    .as_ref()
                    .filter(|_| with_uvs)
                    .map(|uvs| Vector2::new(uvs[corner].x, 1.0 - uvs[corner].y))
                    .unwrap_or_else(Vector2::zeros);
                let color = if with_colors {
                    mesh.corner_color(corner).unwrap_or(ByteColor4::WHITE)
                } else {
                    ByteColor4::WHITE
                };
                let key = VertexKey {
                    vertex,
                    normal: normal.map(f32::to_bits).into(),
                    uv: uv.map(f32::to_bits).into(),
                    color: color.into(),
                };
                let index = *lookup.entry(key).or_insert_with(|| {
                    streams.positions.push(mesh.positions[vertex as usize]);
                    streams.normals.push(normal);
                    streams.uvs.push(uv);
                    streams.colors.push(color.to_linear());
                    streams.positions.len() as u32 - 1
                });
                streams.indices.push(index);
            }
        }
        streams
    }
}

/// Collects the binary chunk together with the buffer views and accessors that describe it.
#[derive(Default)]
struct BinaryBuilder {
    data: Vec<u8>,
    buffer_views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BinaryBuilder {
    fn push_view(&mut self, bytes: &[u8], target: Option<Target>) -> Index<json::buffer::View> {
        // Accessors need their data aligned to the component size
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.buffer_views.push(json::buffer::View {
            buffer: Index::new(0),
            byte_length: USize64(bytes.len() as u64),
            byte_offset: Some(USize64(self.data.len() as u64)),
            byte_stride: None,
            name: None,
            target: target.map(Checked::Valid),
            extensions: None,
            extras: Default::default(),
        });
        self.data.extend_from_slice(bytes);
        Index::new(self.buffer_views.len() as u32 - 1)
    }

    fn push_accessor(
        &mut self,
        view: Index<json::buffer::View>,
        component_type: ComponentType,
        type_: Type,
        count: usize,
        bounds: Option<(json::Value, json::Value)>,
    ) -> Index<json::Accessor> {
        let (min, max) = bounds.unzip();
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: None,
            count: USize64(count as u64),
            component_type: Checked::Valid(GenericComponentType(component_type)),
            type_: Checked::Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
            extensions: None,
            extras: Default::default(),
        });
        Index::new(self.accessors.len() as u32 - 1)
    }

    fn push_floats<const N: usize>(
        &mut self,
        values: impl Iterator<Item = [f32; N]>,
        type_: Type,
        with_bounds: bool,
    ) -> Index<json::Accessor> {
        let mut bytes = Vec::new();
        let mut count = 0;
        let mut min = [f32::MAX; N];
        let mut max = [f32::MIN; N];
        for value in values {
            for (component, v) in value.iter().enumerate() {
                bytes.extend_from_slice(&v.to_le_bytes());
                min[component] = min[component].min(*v);
                max[component] = max[component].max(*v);
            }
            count += 1;
        }
        let view = self.push_view(&bytes, Some(Target::ArrayBuffer));
        let bounds = with_bounds.then(|| (json::Value::from(min.to_vec()), json::Value::from(max.to_vec())));
        self.push_accessor(view, ComponentType::F32, type_, count, bounds)
    }

    fn push_indices(&mut self, indices: &[u32]) -> Index<json::Accessor> {
        let bytes = indices.iter().flat_map(|index| index.to_le_bytes()).collect::<Vec<_>>();
        let view = self.push_view(&bytes, Some(Target::ElementArrayBuffer));
        self.push_accessor(view, ComponentType::U32, Type::Scalar, indices.len(), None)
    }
}

/// Writes the object into a GLB file. The file is first written next to `path` and then moved
/// into place so that a failed export leaves nothing behind.
pub fn export(scene: &Scene, object: &Object, path: &Path, options: &ExportOptions) -> Result<()> {
    let glb = to_glb(scene, object, options)?;
    write_atomically(path, &glb)?;
    trace!("Wrote {} bytes to {}", glb.len(), path.display());
    Ok(())
}

/// Encodes the object as GLB.
pub fn to_glb(scene: &Scene, object: &Object, options: &ExportOptions) -> Result<Vec<u8>> {
    let mesh = object.mesh();
    let with_uvs = mesh.has_uvs();
    let with_colors = options.colors && mesh.color_attribute.is_some();
    let streams = VertexStreams::build(mesh, with_uvs, with_colors);

    let mut binary = BinaryBuilder::default();
    let mut attributes = BTreeMap::new();
    attributes.insert(
        Checked::Valid(Semantic::Positions),
        binary.push_floats(streams.positions.iter().map(|p| [p.x, p.y, p.z]), Type::Vec3, true),
    );
    attributes.insert(
        Checked::Valid(Semantic::Normals),
        binary.push_floats(streams.normals.iter().map(|n| [n.x, n.y, n.z]), Type::Vec3, false),
    );
    if with_uvs {
        attributes.insert(
            Checked::Valid(Semantic::TexCoords(0)),
            binary.push_floats(streams.uvs.iter().map(|uv| [uv.x, uv.y]), Type::Vec2, false),
        );
    }
    if with_colors {
        attributes.insert(
            Checked::Valid(Semantic::Colors(0)),
            binary.push_floats(streams.colors.iter().map(|c| [c.x, c.y, c.z, c.w]), Type::Vec4, false),
        );
    }
    let indices = binary.push_indices(&streams.indices);

    let mut root = json::Root {
        asset: json::Asset {
            version: "2.0".to_owned(),
            generator: Some("polyfold".to_owned()),
            ..Default::default()
        },
        ..Default::default()
    };
    let material = mesh
        .material
        .as_ref()
        .map(|material| push_material(&mut root, &mut binary, scene, material, with_colors))
        .transpose()?;

    root.meshes.push(json::Mesh {
        name: Some(object.name.clone()),
        primitives: vec![Primitive {
            attributes,
            indices: Some(indices),
            material,
            mode: Checked::Valid(Mode::Triangles),
            targets: None,
            extensions: None,
            extras: Default::default(),
        }],
        weights: None,
        extensions: None,
        extras: Default::default(),
    });
    root.nodes.push(json::Node {
        name: Some(object.name.clone()),
        mesh: Some(Index::new(0)),
        ..Default::default()
    });
    root.scenes.push(json::Scene {
        nodes: vec![Index::new(0)],
        name: None,
        extensions: None,
        extras: Default::default(),
    });
    root.scene = Some(Index::new(0));
    root.buffers.push(json::Buffer {
        byte_length: USize64(binary.data.len() as u64),
        name: None,
        uri: None,
        extensions: None,
        extras: Default::default(),
    });
    root.accessors = binary.accessors;
    root.buffer_views = binary.buffer_views;

    let glb = Glb {
        // The length is recomputed from the padded chunks when writing
        header: Header {
            magic: *b"glTF",
            version: 2,
            length: 0,
        },
        json: Cow::Owned(serde_json::to_vec(&root)?),
        bin: Some(Cow::Owned(binary.data)),
    };
    Ok(glb.to_vec()?)
}

/// Adds the material with its textures to the document.
fn push_material(
    root: &mut json::Root,
    binary: &mut BinaryBuilder,
    scene: &Scene,
    material: &Material,
    with_colors: bool,
) -> Result<Index<json::Material>> {
    let mut pbr = PbrMetallicRoughness {
        metallic_factor: StrengthFactor(material.metallic),
        roughness_factor: StrengthFactor(material.roughness),
        ..Default::default()
    };
    match &material.base_color {
        BaseColor::Constant(color) => pbr.base_color_factor = PbrBaseColorFactor([color.x, color.y, color.z, color.w]),
        BaseColor::Attribute(name) => {
            if !with_colors {
                warn!("Material '{}' reads the attribute '{name}' which is not exported", material.name);
            }
        }
        BaseColor::Image(handle) => match scene.image(*handle) {
            Ok(image) => {
                pbr.base_color_texture = Some(Info {
                    index: push_texture(root, binary, image)?,
                    tex_coord: 0,
                    extensions: None,
                    extras: Default::default(),
                })
            }
            Err(_) => warn!("Material '{}' references a missing base color image", material.name),
        },
    }

    let normal_texture = match material.normal_map.map(|handle| scene.image(handle)) {
        Some(Ok(image)) => Some(NormalTexture {
            index: push_texture(root, binary, image)?,
            scale: 1.0,
            tex_coord: 0,
            extensions: None,
            extras: Default::default(),
        }),
        Some(Err(_)) => {
            warn!("Material '{}' references a missing normal image", material.name);
            None
        }
        None => None,
    };

    root.materials.push(json::Material {
        name: Some(material.name.clone()),
        pbr_metallic_roughness: pbr,
        normal_texture,
        ..Default::default()
    });
    Ok(Index::new(root.materials.len() as u32 - 1))
}

/// Embeds the image as PNG into the binary chunk. All textures share one repeating sampler.
fn push_texture(root: &mut json::Root, binary: &mut BinaryBuilder, image: &Image) -> Result<Index<json::Texture>> {
    let png = image.encode_png()?;
    let view = binary.push_view(&png, None);
    if root.samplers.is_empty() {
        root.samplers.push(Sampler {
            mag_filter: Some(Checked::Valid(MagFilter::Linear)),
            min_filter: Some(Checked::Valid(MinFilter::LinearMipmapLinear)),
            wrap_s: Checked::Valid(WrappingMode::Repeat),
            wrap_t: Checked::Valid(WrappingMode::Repeat),
            ..Default::default()
        });
    }
    root.images.push(json::Image {
        buffer_view: Some(view),
        mime_type: Some(MimeType("image/png".to_owned())),
        name: Some(image.name.clone()),
        uri: None,
        extensions: None,
        extras: Default::default(),
    });
    root.textures.push(json::Texture {
        name: None,
        sampler: Some(Index::new(0)),
        source: Index::new(root.images.len() as u32 - 1),
        extensions: None,
        extras: Default::default(),
    });
    Ok(Index::new(root.textures.len() as u32 - 1))
}

fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{} is not a file path", path.display())))?;
    let temporary = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
    let result = fs::write(&temporary, data).and_then(|_| fs::rename(&temporary, path));
    if result.is_err() {
        // Nothing useful can be done if the temporary file can't be removed either
        let _ = fs::remove_file(&temporary);
    }
    result
}

/// Imports a glTF or GLB file. Vertices with identical positions are merged so that a mesh that
/// was split for export gets its original topology back.
pub fn import(path: &Path, name: &str) -> Result<Option<ImportedMesh>> {
    let (document, buffers, images) = gltf::import(path).map_err(|err| Error::FailedLoadingGltf {
        path: path.to_owned(),
        error_message: err.to_string(),
    })?;

    let mut mesh = Mesh::new();
    let mut uvs = Vec::new();
    let mut colors = Vec::new();
    let mut has_uvs = false;
    let mut has_colors = false;
    let mut merged = HashMap::new();
    let mut gltf_material = None;

    for gltf_mesh in document.meshes() {
        for primitive in gltf_mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                warn!("Skipping primitive with mode {:?} in {}", primitive.mode(), path.display());
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions = positions.collect::<Vec<_>>();
            let indices = reader
                .read_indices()
                .map(|indices| indices.into_u32().collect::<Vec<_>>())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            let primitive_uvs = reader.read_tex_coords(0).map(|uvs| uvs.into_f32().collect::<Vec<_>>());
            let primitive_colors = reader.read_colors(0).map(|colors| colors.into_rgba_f32().collect::<Vec<_>>());
            has_uvs |= primitive_uvs.is_some();
            has_colors |= primitive_colors.is_some();
            if primitive.material().index().is_some() {
                gltf_material = gltf_material.or(Some(primitive.material()));
            }

            let vertices = positions
                .iter()
                .map(|position| {
                    *merged.entry(position.map(f32::to_bits)).or_insert_with(|| {
                        mesh.positions.push(Vector3::from(*position));
                        mesh.positions.len() as u32 - 1
                    })
                })
                .collect::<Vec<_>>();

            for triangle in indices.chunks_exact(3) {
                let first_corner = mesh.corner_vertices.len() as u32;
                for index in triangle {
                    let index = *index as usize;
                    let vertex = vertices
                        .get(index)
                        .copied()
                        .ok_or(Error::IndexOutOfRange {
                            index,
                            vertex_count: vertices.len(),
                        })?;
                    mesh.corner_vertices.push(vertex);
                    let uv = primitive_uvs.as_ref().and_then(|uvs| uvs.get(index)).copied().unwrap_or([0.0, 0.0]);
                    uvs.push(Vector2::new(uv[0], 1.0 - uv[1]));
                    let color = primitive_colors
                        .as_ref()
                        .and_then(|colors| colors.get(index))
                        .map(|color| ByteColor4::from_linear(&Vector4::from(*color)))
                        .unwrap_or(ByteColor4::WHITE);
                    colors.push(color);
                }
                mesh.polygons.push(crate::mesh::Polygon {
                    first_corner,
                    corner_count: 3,
                });
            }
        }
    }

    if mesh.positions.is_empty() {
        return Ok(None);
    }
    if has_uvs {
        mesh.corner_uvs = Some(uvs);
    }
    if has_colors {
        mesh.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Corner,
            values: colors,
        });
    }
    validate_indices(&mesh)?;

    let mut imported = ImportedMesh::new(name, Mesh::new());
    if let Some(gltf_material) = gltf_material {
        let pbr = gltf_material.pbr_metallic_roughness();
        let mut material = Material::new(gltf_material.name().unwrap_or(name)).with_roughness(pbr.roughness_factor());
        material.metallic = pbr.metallic_factor();
        material.base_color = if has_colors {
            BaseColor::Attribute(COLOR_ATTRIBUTE_NAME.to_owned())
        } else {
            BaseColor::Constant(Vector4::from(pbr.base_color_factor()))
        };
        imported.base_color_image = pbr
            .base_color_texture()
            .map(|info| convert_image(&images, info.texture().source(), ColorSpace::Srgb))
            .transpose()?
            .flatten();
        imported.normal_image = gltf_material
            .normal_texture()
            .map(|normal| convert_image(&images, normal.texture().source(), ColorSpace::NonColor))
            .transpose()?
            .flatten();
        mesh.material = Some(material);
    }
    imported.mesh = mesh;
    Ok(Some(imported))
}

fn convert_image(images: &[gltf::image::Data], image: gltf::Image, color_space: ColorSpace) -> Result<Option<Image>> {
    let Some(data) = images.get(image.index()) else {
        return Ok(None);
    };
    let rgba = match data.format {
        gltf::image::Format::R8G8B8A8 => data.pixels.clone(),
        gltf::image::Format::R8G8B8 => data
            .pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        format => {
            warn!("Skipping image with unsupported format {format:?}");
            return Ok(None);
        }
    };
    let name = image.name().unwrap_or("image");
    Ok(Some(Image::from_rgba8(name, data.width, data.height, color_space, &rgba)?))
}

#[cfg(test)]
mod tests {
    use polyfold_shared::function_name;
    use polyfold_test::{create_test_result_folder_for_function, setup_logger};

    use super::*;
    use crate::primitives;

    #[test]
    fn document_layout() {
        let mut scene = Scene::new();
        let mut grid = primitives::grid(1.0, 2);
        let normal = scene.add_image(Image::new("normal", 2, 2, ColorSpace::NonColor));
        let diffuse = scene.add_image(Image::new("diffuse", 2, 2, ColorSpace::Srgb));
        grid.material = Some(
            Material::new("mat")
                .with_base_color(BaseColor::Image(diffuse))
                .with_normal_map(normal),
        );
        let handle = scene.add_object(Object::new("grid", grid));
        let glb = to_glb(&scene, scene.object(handle).unwrap(), &ExportOptions::default()).unwrap();

        let container = Glb::from_slice(&glb).unwrap();
        assert_eq!(&container.header.magic, b"glTF");
        assert_eq!(container.header.version, 2);
        assert_eq!(container.header.length as usize, glb.len());
        assert_eq!(glb.len() % 4, 0);

        let document = gltf::Gltf::from_slice(&glb).unwrap();
        assert_eq!(document.meshes().count(), 1);
        assert_eq!(document.nodes().next().unwrap().name(), Some("grid"));
        let primitive = document.meshes().next().unwrap().primitives().next().unwrap();
        assert_eq!(primitive.mode(), Mode::Triangles);
        assert!(primitive.get(&gltf::Semantic::TexCoords(0)).is_some());
        assert!(primitive.get(&gltf::Semantic::Colors(0)).is_none());
        let positions = primitive.get(&gltf::Semantic::Positions).unwrap();
        assert!(positions.min().is_some() && positions.max().is_some());
        assert_eq!(document.images().count(), 2);
        assert_eq!(document.samplers().count(), 1);
        let material = primitive.material();
        assert_eq!(material.name(), Some("mat"));
        assert!(material.normal_texture().is_some());
        assert!(material.pbr_metallic_roughness().base_color_texture().is_some());
    }

    #[test]
    fn round_trip_with_colors_and_texture() {
        setup_logger();
        let folder = create_test_result_folder_for_function(function_name!());
        let path = folder.join("cube.glb");

        let mut scene = Scene::new();
        let mut cube = primitives::cube(2.0);
        cube.corner_uvs = Some(
            (0..cube.corner_count())
                .map(|corner| Vector2::new((corner % 4) as f32 * 0.25, 0.2))
                .collect(),
        );
        cube.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Corner,
            values: (0..cube.corner_count())
                .map(|corner| ByteColor4::new(corner as u8 * 10, 7, 200, 255))
                .collect(),
        });
        let mut diffuse = Image::new("diffuse", 4, 4, ColorSpace::Srgb);
        diffuse.set_pixel(1, 2, Vector4::new(1.0, 0.0, 0.0, 1.0));
        let diffuse = scene.add_image(diffuse);
        cube.material = Some(Material::new("mat").with_base_color(BaseColor::Image(diffuse)).with_roughness(0.7));
        let handle = scene.add_object(Object::new("cube", cube.clone()));
        scene.export(handle, &path, &ExportOptions::default()).unwrap();
        assert!(!folder.join(".cube.glb.tmp").exists());

        let imported = import(&path, "cube").unwrap().unwrap();
        let mesh = &imported.mesh;
        assert_eq!(mesh.vertex_count(), cube.vertex_count());
        assert_eq!(mesh.polygon_count(), cube.triangles().len());

        // Every imported corner maps back to a triangle corner of the original
        let triangles = cube.triangles();
        for (triangle_index, triangle) in triangles.iter().enumerate() {
            for (offset, corner) in triangle.corners.iter().enumerate() {
                let imported_corner = triangle_index * 3 + offset;
                assert_eq!(mesh.corner_position(imported_corner), cube.corner_position(*corner as usize));
                assert_eq!(mesh.corner_color(imported_corner), cube.corner_color(*corner as usize));
                let uv = mesh.corner_uvs.as_ref().unwrap()[imported_corner];
                let expected = cube.corner_uvs.as_ref().unwrap()[*corner as usize];
                assert!((uv - expected).norm() < 1e-6);
            }
        }

        let material = mesh.material.as_ref().unwrap();
        assert!((material.roughness - 0.7).abs() < 1e-6);
        let image = imported.base_color_image.unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        assert_eq!(image.to_rgba8()[(2 * 4 + 1) * 4..(2 * 4 + 1) * 4 + 4], [255, 0, 0, 255]);
        assert!(imported.normal_image.is_none());
    }

    #[test]
    fn export_without_colors() {
        let folder = create_test_result_folder_for_function(function_name!());
        let path = folder.join("plain.glb");
        let mut scene = Scene::new();
        let mut sphere = primitives::uv_sphere(1.0, 12, 8);
        sphere.smooth_shading = true;
        sphere.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Point,
            values: vec![ByteColor4::BLACK; sphere.vertex_count()],
        });
        let handle = scene.add_object(Object::new("sphere", sphere.clone()));
        scene.export(handle, &path, &ExportOptions { colors: false }).unwrap();

        let imported = import(&path, "sphere").unwrap().unwrap();
        assert!(imported.mesh.color_attribute.is_none());
        assert!(imported.mesh.material.is_none());
        assert_eq!(imported.mesh.polygon_count(), sphere.triangles().len());
    }

    #[test]
    fn failed_export_leaves_no_file() {
        let directory = tempdir::TempDir::new("polyfold_glb").unwrap();
        let path = directory.path().join("missing_folder").join("out.glb");
        let mut scene = Scene::new();
        let handle = scene.add_object(Object::new("cube", primitives::cube(1.0)));
        assert!(scene.export(handle, &path, &ExportOptions::default()).is_err());
        assert!(!path.exists());
    }
}
