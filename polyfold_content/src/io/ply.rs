use std::{
    fs,
    io::{Cursor, Read},
    path::Path,
    str::SplitAsciiWhitespace,
};

use polyfold_shared::{
    byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt},
    log::trace,
    nalgebra::Vector3,
    ByteColor4,
};

use super::{obj::COLOR_ATTRIBUTE_NAME, validate_indices, Error, ImportedMesh, Result};
use crate::mesh::{AttributeDomain, ColorAttribute, Mesh};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return Err(Error::InvalidPly(format!("Unknown property type '{name}'"))),
        })
    }

    fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PropertyType {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone, PartialEq)]
struct Property {
    name: String,
    ty: PropertyType,
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug, PartialEq)]
struct Header {
    format: Format,
    elements: Vec<Element>,
}

/// Imports a PLY file with `vertex` and `face` elements. Vertex colors become a point color attribute.
pub fn import(path: &Path, name: &str) -> Result<Option<ImportedMesh>> {
    let data = fs::read(path)?;
    let mesh = parse(&data)?;
    trace!(
        "PLY {}: {} vertices, {} polygons",
        path.display(),
        mesh.vertex_count(),
        mesh.polygon_count()
    );
    Ok(Some(ImportedMesh::new(name, mesh)))
}

fn parse(data: &[u8]) -> Result<Mesh> {
    let (header, body_start) = parse_header(data)?;
    let body = &data[body_start..];
    let mut reader = match header.format {
        Format::Ascii => {
            let text = std::str::from_utf8(body).map_err(|_| Error::InvalidPly("ASCII body is not valid UTF-8".to_owned()))?;
            ValueReader::Ascii(text.split_ascii_whitespace())
        }
        Format::BinaryLittleEndian => ValueReader::LittleEndian(Cursor::new(body)),
        Format::BinaryBigEndian => ValueReader::BigEndian(Cursor::new(body)),
    };

    let mut mesh = Mesh::new();
    let mut colors = Vec::new();
    let mut has_colors = false;
    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => {
                has_colors = element.properties.iter().any(|property| property.name == "red");
                read_vertices(&mut reader, element, &mut mesh, &mut colors)?;
            }
            "face" => read_faces(&mut reader, element, &mut mesh)?,
            _ => skip_element(&mut reader, element)?,
        }
    }

    if has_colors {
        mesh.color_attribute = Some(ColorAttribute {
            name: COLOR_ATTRIBUTE_NAME.to_owned(),
            domain: AttributeDomain::Point,
            values: colors,
        });
    }
    validate_indices(&mesh)?;
    Ok(mesh)
}

fn parse_header(data: &[u8]) -> Result<(Header, usize)> {
    const END_HEADER: &[u8] = b"end_header";
    let end = data
        .windows(END_HEADER.len())
        .position(|window| window == END_HEADER)
        .ok_or_else(|| Error::InvalidPly("Missing 'end_header'".to_owned()))?;
    let mut body_start = end + END_HEADER.len();
    // The body starts after the line break which is either "\n" or "\r\n"
    if data.get(body_start) == Some(&b'\r') {
        body_start += 1;
    }
    if data.get(body_start) == Some(&b'\n') {
        body_start += 1;
    }

    let text = std::str::from_utf8(&data[..end]).map_err(|_| Error::InvalidPly("Header is not valid UTF-8".to_owned()))?;
    let mut lines = text.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err(Error::InvalidPly("Missing magic number 'ply'".to_owned()));
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let tokens = line.split_ascii_whitespace().collect::<Vec<_>>();
        match tokens.as_slice() {
            [] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", name, _version] => {
                format = Some(match *name {
                    "ascii" => Format::Ascii,
                    "binary_little_endian" => Format::BinaryLittleEndian,
                    "binary_big_endian" => Format::BinaryBigEndian,
                    _ => return Err(Error::InvalidPly(format!("Unknown format '{name}'"))),
                });
            }
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| Error::InvalidPly(format!("Invalid element count '{count}'")))?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::InvalidPly("Property before element".to_owned()))?;
                element.properties.push(Property {
                    name: name.to_string(),
                    ty: PropertyType::List {
                        count: ScalarType::parse(count)?,
                        item: ScalarType::parse(item)?,
                    },
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::InvalidPly("Property before element".to_owned()))?;
                element.properties.push(Property {
                    name: name.to_string(),
                    ty: PropertyType::Scalar(ScalarType::parse(ty)?),
                });
            }
            _ => return Err(Error::InvalidPly(format!("Unexpected header line '{line}'"))),
        }
    }

    let format = format.ok_or_else(|| Error::InvalidPly("Missing format".to_owned()))?;
    Ok((Header { format, elements }, body_start))
}

enum ValueReader<'a> {
    Ascii(SplitAsciiWhitespace<'a>),
    LittleEndian(Cursor<&'a [u8]>),
    BigEndian(Cursor<&'a [u8]>),
}

impl<'a> ValueReader<'a> {
    fn read(&mut self, ty: ScalarType) -> Result<f64> {
        match self {
            ValueReader::Ascii(tokens) => {
                let token = tokens
                    .next()
                    .ok_or_else(|| Error::InvalidPly("Unexpected end of data".to_owned()))?;
                token
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidPly(format!("Invalid number '{token}'")))
            }
            ValueReader::LittleEndian(cursor) => read_binary::<LittleEndian>(cursor, ty),
            ValueReader::BigEndian(cursor) => read_binary::<BigEndian>(cursor, ty),
        }
    }

    fn read_property(&mut self, ty: &PropertyType, list: &mut Vec<f64>) -> Result<f64> {
        match ty {
            PropertyType::Scalar(scalar) => self.read(*scalar),
            PropertyType::List { count, item } => {
                let count = self.read(*count)? as usize;
                list.clear();
                for _ in 0..count {
                    list.push(self.read(*item)?);
                }
                Ok(count as f64)
            }
        }
    }
}

fn read_binary<B: ByteOrder>(cursor: &mut impl Read, ty: ScalarType) -> Result<f64> {
    let value = match ty {
        ScalarType::I8 => cursor.read_i8()? as f64,
        ScalarType::U8 => cursor.read_u8()? as f64,
        ScalarType::I16 => cursor.read_i16::<B>()? as f64,
        ScalarType::U16 => cursor.read_u16::<B>()? as f64,
        ScalarType::I32 => cursor.read_i32::<B>()? as f64,
        ScalarType::U32 => cursor.read_u32::<B>()? as f64,
        ScalarType::F32 => cursor.read_f32::<B>()? as f64,
        ScalarType::F64 => cursor.read_f64::<B>()?,
    };
    Ok(value)
}

fn read_vertices(reader: &mut ValueReader, element: &Element, mesh: &mut Mesh, colors: &mut Vec<ByteColor4>) -> Result<()> {
    let mut list = Vec::new();
    mesh.positions.reserve(element.count);
    for _ in 0..element.count {
        let mut position = Vector3::zeros();
        let mut color = [1.0f32; 4];
        for property in &element.properties {
            let value = reader.read_property(&property.ty, &mut list)?;
            // Integer color channels are stored in [0, 255] and floats in [0, 1]
            let unit = match property.ty {
                PropertyType::Scalar(scalar) if scalar.is_integer() => value as f32 / 255.0,
                _ => value as f32,
            };
            match property.name.as_str() {
                "x" => position.x = value as f32,
                "y" => position.y = value as f32,
                "z" => position.z = value as f32,
                "red" => color[0] = unit,
                "green" => color[1] = unit,
                "blue" => color[2] = unit,
                "alpha" => color[3] = unit,
                _ => {}
            }
        }
        mesh.positions.push(position);
        colors.push(ByteColor4::from_unit_floats(color));
    }
    Ok(())
}

fn read_faces(reader: &mut ValueReader, element: &Element, mesh: &mut Mesh) -> Result<()> {
    let mut list = Vec::new();
    let mut vertices = Vec::new();
    for _ in 0..element.count {
        vertices.clear();
        for property in &element.properties {
            reader.read_property(&property.ty, &mut list)?;
            if matches!(property.name.as_str(), "vertex_indices" | "vertex_index") {
                vertices.extend(list.iter().map(|index| *index as u32));
            }
        }
        if vertices.len() >= 3 {
            mesh.push_polygon(&vertices);
        }
    }
    Ok(())
}

fn skip_element(reader: &mut ValueReader, element: &Element) -> Result<()> {
    let mut list = Vec::new();
    for _ in 0..element.count {
        for property in &element.properties {
            reader.read_property(&property.ty, &mut list)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use polyfold_shared::byteorder::WriteBytesExt;

    use super::*;

    const ASCII_QUAD: &str = "ply
format ascii 1.0
comment made by hand
element vertex 4
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 1
property list uchar int vertex_indices
end_header
0 0 0 255 0 0
1 0 0 0 255 0
1 1 0 0 0 255
0 1 0 255 255 255
4 0 1 2 3
";

    #[test]
    fn ascii() {
        let mesh = parse(ASCII_QUAD.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0), &[0, 1, 2, 3]);
        assert_eq!(mesh.positions[2], Vector3::new(1.0, 1.0, 0.0));
        let colors = &mesh.color_attribute.as_ref().unwrap().values;
        assert_eq!(colors[1], ByteColor4::new(0, 255, 0, 255));
    }

    #[test]
    fn binary_big_endian_with_extra_element() {
        let mut data = b"ply\r\nformat binary_big_endian 1.0\r\nelement vertex 3\r\nproperty float x\r\nproperty float y\r\nproperty float z\r\nelement edge 1\r\nproperty int vertex1\r\nproperty int vertex2\r\nelement face 1\r\nproperty list uchar uint vertex_index\r\nend_header\r\n".to_vec();
        for position in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for value in position {
                data.write_f32::<BigEndian>(value).unwrap();
            }
        }
        data.write_i32::<BigEndian>(0).unwrap();
        data.write_i32::<BigEndian>(1).unwrap();
        data.write_u8(3).unwrap();
        for index in [0u32, 1, 2] {
            data.write_u32::<BigEndian>(index).unwrap();
        }

        let mesh = parse(&data).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.polygon_vertices(0), &[0, 1, 2]);
        assert_eq!(mesh.positions[1], Vector3::new(1.0, 0.0, 0.0));
        assert!(mesh.color_attribute.is_none());
    }

    #[test]
    fn binary_little_endian_float_colors() {
        let mut data = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty double x\nproperty double y\nproperty double z\nproperty float red\nproperty float green\nproperty float blue\nend_header\n".to_vec();
        for value in [0.5f64, 1.5, 2.5] {
            data.write_f64::<LittleEndian>(value).unwrap();
        }
        for value in [1.0f32, 0.0, 0.0] {
            data.write_f32::<LittleEndian>(value).unwrap();
        }
        let mesh = parse(&data).unwrap();
        assert_eq!(mesh.positions, vec![Vector3::new(0.5, 1.5, 2.5)]);
        assert_eq!(mesh.polygon_count(), 0);
        assert_eq!(mesh.color_attribute.unwrap().values, vec![ByteColor4::new(255, 0, 0, 255)]);
    }

    #[test]
    fn truncated_body() {
        let truncated = &ASCII_QUAD[..ASCII_QUAD.len() - 6];
        assert!(matches!(parse(truncated.as_bytes()), Err(Error::InvalidPly(_))));
    }

    #[test]
    fn invalid_index() {
        let data = ASCII_QUAD.replace("4 0 1 2 3", "3 0 1 9");
        assert!(matches!(parse(data.as_bytes()), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn missing_magic() {
        assert!(matches!(parse(b"format ascii 1.0\nend_header\n"), Err(Error::InvalidPly(_))));
    }
}
