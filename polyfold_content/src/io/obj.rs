use std::{io::Write, path::Path};

use polyfold_shared::{
    log::{trace, warn},
    nalgebra::{Vector2, Vector3},
    ByteColor4,
};

use super::{validate_indices, Error, ImportedMesh, Result};
use crate::mesh::{AttributeDomain, ColorAttribute, Mesh};

/// Name of the color attribute that is created for OBJ files with vertex colors.
pub const COLOR_ATTRIBUTE_NAME: &str = "Col";

/// Imports an OBJ file. All models in the file are merged into one mesh and polygons are kept as they are.
pub fn import(path: &Path, name: &str) -> Result<Option<ImportedMesh>> {
    let load_options = tobj::LoadOptions {
        single_index: false,
        triangulate: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj(path, &load_options).map_err(|err| Error::FailedLoadingObj {
        path: path.to_owned(),
        error_message: err.to_string(),
    })?;
    if models.is_empty() {
        warn!("OBJ file {} contains no models", path.display());
        return Ok(None);
    }
    if models.len() > 1 {
        trace!("Merging {} models of {}", models.len(), path.display());
    }

    let has_colors = models.iter().any(|model| !model.mesh.vertex_color.is_empty());
    let has_uvs = models.iter().any(|model| !model.mesh.texcoord_indices.is_empty());

    let mut mesh = Mesh::new();
    let mut colors = Vec::new();
    let mut uvs = Vec::new();
    for model in &models {
        let obj_mesh = &model.mesh;
        let base = mesh.vertex_count() as u32;
        mesh.positions
            .extend(obj_mesh.positions.chunks_exact(3).map(|p| Vector3::new(p[0], p[1], p[2])));
        if has_colors {
            let vertex_count = obj_mesh.positions.len() / 3;
            if obj_mesh.vertex_color.len() == obj_mesh.positions.len() {
                colors.extend(
                    obj_mesh
                        .vertex_color
                        .chunks_exact(3)
                        .map(|c| ByteColor4::from_unit_floats([c[0], c[1], c[2], 1.0])),
                );
            } else {
                colors.extend(std::iter::repeat(ByteColor4::WHITE).take(vertex_count));
            }
        }

        let texcoords = obj_mesh
            .texcoords
            .chunks_exact(2)
            .map(|t| Vector2::new(t[0], t[1]))
            .collect::<Vec<_>>();
        let mut next_index = 0;
        let arities = face_arities(obj_mesh);
        for arity in arities {
            let range = next_index..next_index + arity;
            next_index += arity;
            let vertices = obj_mesh.indices[range.clone()]
                .iter()
                .map(|index| base + index)
                .collect::<Vec<_>>();
            mesh.corner_vertices.extend_from_slice(&vertices);
            mesh.polygons.push(crate::mesh::Polygon {
                first_corner: (mesh.corner_vertices.len() - vertices.len()) as u32,
                corner_count: vertices.len() as u32,
            });
            if has_uvs {
                for corner in range {
                    let uv = obj_mesh
                        .texcoord_indices
                        .get(corner)
                        .and_then(|index| texcoords.get(*index as usize))
                        .copied()
                        .unwrap_or_else(Vector2::zeros);
                    uvs.push(uv);
                }
            }
        }
    }

    if has_uvs {
        mesh.corner_uvs = Some(uvs);
    }
    if has_colors {
        mesh.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Point,
            values: colors,
        });
    }
    validate_indices(&mesh)?;

    trace!(
        "OBJ {}: {} vertices, {} polygons, colors: {has_colors}, uvs: {has_uvs}",
        path.display(),
        mesh.vertex_count(),
        mesh.polygon_count()
    );
    Ok(Some(ImportedMesh::new(name, mesh)))
}

/// Returns the number of corners of every face. An empty arity list means that all faces are triangles.
fn face_arities(mesh: &tobj::Mesh) -> Vec<usize> {
    if mesh.face_arities.is_empty() {
        vec![3; mesh.indices.len() / 3]
    } else {
        mesh.face_arities.iter().map(|arity| *arity as usize).collect()
    }
}

/// Writes the mesh as OBJ. Point colors are written as vertex colors and UVs as one `vt` per corner.
pub fn write_obj(mesh: &Mesh, mut obj_writer: impl Write) -> Result<()> {
    let point_colors = mesh
        .color_attribute
        .as_ref()
        .filter(|attribute| attribute.domain == AttributeDomain::Point);
    writeln!(obj_writer, "o mesh")?;
    for (index, position) in mesh.positions.iter().enumerate() {
        match point_colors.and_then(|attribute| attribute.values.get(index)) {
            Some(color) => {
                let [r, g, b, _] = color.to_unit_floats();
                writeln!(obj_writer, "v {} {} {} {r} {g} {b}", position.x, position.y, position.z)?
            }
            None => writeln!(obj_writer, "v {} {} {}", position.x, position.y, position.z)?,
        }
    }
    if let Some(uvs) = &mesh.corner_uvs {
        for uv in uvs {
            writeln!(obj_writer, "vt {} {}", uv.x, uv.y)?;
        }
    }
    for polygon in &mesh.polygons {
        write!(obj_writer, "f")?;
        for corner in polygon.corners() {
            let vertex = mesh.corner_vertices[corner] + 1;
            if mesh.corner_uvs.is_some() {
                write!(obj_writer, " {vertex}/{}", corner + 1)?;
            } else {
                write!(obj_writer, " {vertex}")?;
            }
        }
        writeln!(obj_writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use polyfold_shared::{float_cmp::assert_approx_eq, function_name};
    use polyfold_test::{create_test_result_folder_for_function, setup_logger};

    use super::*;
    use crate::primitives;

    #[test]
    fn polygons_and_colors() {
        setup_logger();
        let directory = tempdir::TempDir::new("polyfold_obj").unwrap();
        let path = directory.path().join("quad.obj");
        fs::write(
            &path,
            "o quad
v 0 0 0 1 0 0
v 1 0 0 0 1 0
v 1 1 0 0 0 1
v 0 1 0 1 1 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
",
        )
        .unwrap();
        let imported = import(&path, "quad").unwrap().unwrap();
        let mesh = imported.mesh;
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0), &[0, 1, 2, 3]);
        assert_eq!(mesh.corner_uvs.as_ref().unwrap()[2], Vector2::new(1.0, 1.0));
        let attribute = mesh.color_attribute.as_ref().unwrap();
        assert_eq!(attribute.domain, AttributeDomain::Point);
        assert_eq!(attribute.name, COLOR_ATTRIBUTE_NAME);
        assert_eq!(attribute.values[1], ByteColor4::new(0, 255, 0, 255));
    }

    #[test]
    fn multiple_models_are_merged() {
        let directory = tempdir::TempDir::new("polyfold_obj").unwrap();
        let path = directory.path().join("two.obj");
        fs::write(
            &path,
            "o a
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o b
v 0 0 1
v 1 0 1
v 0 1 1
f 4 5 6
",
        )
        .unwrap();
        let mesh = import(&path, "two").unwrap().unwrap().mesh;
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.polygon_count(), 2);
        let second = mesh.polygon_vertices(1);
        for vertex in second {
            assert_approx_eq!(f32, mesh.positions[*vertex as usize].z, 1.0);
        }
        assert!(mesh.color_attribute.is_none());
        assert!(mesh.corner_uvs.is_none());
    }

    #[test]
    fn written_obj_can_be_imported() {
        let folder = create_test_result_folder_for_function(function_name!());
        let path = folder.join("sphere.obj");
        let mut sphere = primitives::uv_sphere(1.0, 8, 6);
        sphere.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Point,
            values: vec![ByteColor4::new(255, 0, 0, 255); sphere.vertex_count()],
        });
        write_obj(&sphere, File::create(&path).unwrap()).unwrap();

        let mesh = import(&path, "sphere").unwrap().unwrap().mesh;
        assert_eq!(mesh.vertex_count(), sphere.vertex_count());
        assert_eq!(mesh.polygon_count(), sphere.polygon_count());
        // The importer numbers vertices by first use, so compare corner by corner
        for corner in 0..sphere.corner_count() {
            assert_eq!(mesh.corner_position(corner), sphere.corner_position(corner));
            assert_eq!(mesh.corner_color(corner), sphere.corner_color(corner));
        }
    }
}
