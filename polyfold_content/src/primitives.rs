//! Procedural meshes. All of them are wound counter-clockwise when seen from the outside.

use std::f32::consts::PI;

use polyfold_shared::nalgebra::{Vector2, Vector3};

use crate::mesh::Mesh;

/// Axis aligned cube with the given edge length centered at the origin. Made of 6 quads.
pub fn cube(size: f32) -> Mesh {
    let half = size * 0.5;
    let positions = (0..8)
        .map(|index| {
            let coordinate = |bit: u32| if index & (1 << bit) != 0 { half } else { -half };
            Vector3::new(coordinate(0), coordinate(1), coordinate(2))
        })
        .collect();
    Mesh::from_polygons(
        positions,
        [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 4, 6, 2],
            [1, 3, 7, 5],
        ],
    )
}

/// Sphere around the origin with the poles on the Z axis. The caps are triangles, the rest are quads.
pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Mesh {
    let segments = segments.max(3);
    let rings = rings.max(2);

    let mut positions = vec![Vector3::new(0.0, 0.0, radius)];
    for ring in 1..rings {
        let theta = PI * ring as f32 / rings as f32;
        for segment in 0..segments {
            let phi = 2.0 * PI * segment as f32 / segments as f32;
            positions.push(Vector3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    positions.push(Vector3::new(0.0, 0.0, -radius));
    let bottom = positions.len() as u32 - 1;
    let ring_vertex = |ring: u32, segment: u32| 1 + (ring - 1) * segments + segment % segments;

    let mut mesh = Mesh {
        positions,
        ..Default::default()
    };
    for segment in 0..segments {
        mesh.push_polygon(&[0, ring_vertex(1, segment), ring_vertex(1, segment + 1)]);
    }
    for ring in 1..rings - 1 {
        for segment in 0..segments {
            mesh.push_polygon(&[
                ring_vertex(ring, segment),
                ring_vertex(ring + 1, segment),
                ring_vertex(ring + 1, segment + 1),
                ring_vertex(ring, segment + 1),
            ]);
        }
    }
    for segment in 0..segments {
        mesh.push_polygon(&[bottom, ring_vertex(rings - 1, segment + 1), ring_vertex(rings - 1, segment)]);
    }
    mesh
}

/// Square in the XY plane facing +Z made of `subdivisions`² quads. Has UVs spanning the unit square.
pub fn grid(size: f32, subdivisions: u32) -> Mesh {
    let subdivisions = subdivisions.max(1);
    let row = subdivisions + 1;
    let step = size / subdivisions as f32;
    let positions = (0..row * row)
        .map(|index| {
            let (x, y) = (index % row, index / row);
            Vector3::new(x as f32 * step - size * 0.5, y as f32 * step - size * 0.5, 0.0)
        })
        .collect::<Vec<_>>();

    let mut mesh = Mesh {
        positions,
        corner_uvs: Some(Vec::new()),
        ..Default::default()
    };
    for y in 0..subdivisions {
        for x in 0..subdivisions {
            let first = y * row + x;
            mesh.push_polygon(&[first, first + 1, first + row + 1, first + row]);
        }
    }
    let uvs = mesh
        .corner_vertices
        .iter()
        .map(|vertex| {
            let position = mesh.positions[*vertex as usize];
            Vector2::new(position.x / size + 0.5, position.y / size + 0.5)
        })
        .collect();
    mesh.corner_uvs = Some(uvs);
    mesh
}
