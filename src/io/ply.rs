//! Minimal PLY point cloud reader/writer.
//!
//! Reads `ascii` and `binary_little_endian` files and keeps only the vertex
//! positions and, if present, their `red`/`green`/`blue` colors. Every other
//! element and property is skipped. Writes `binary_little_endian` with double
//! positions and optional uchar colors.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use nalgebra::Vector3;

use crate::reconstruction::PointCloud;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Self::I8,
            "uchar" | "uint8" => Self::U8,
            "short" | "int16" => Self::I16,
            "ushort" | "uint16" => Self::U16,
            "int" | "int32" => Self::I32,
            "uint" | "uint32" => Self::U32,
            "float" | "float32" => Self::F32,
            "double" | "float64" => Self::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Decode one little-endian value. `bytes` must hold at least `size()` bytes.
    fn read_le(self, bytes: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        buf[..self.size()].copy_from_slice(&bytes[..self.size()]);
        match self {
            Self::I8 => buf[0] as i8 as f64,
            Self::U8 => buf[0] as f64,
            Self::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            Self::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            Self::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Self::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Self::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            Self::F64 => f64::from_le_bytes(buf),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { count: Scalar, item: Scalar },
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug)]
struct Header {
    format: Format,
    elements: Vec<Element>,
}

/// Column of each vertex attribute we keep.
struct VertexLayout {
    xyz: [usize; 3],
    rgb: Option<[usize; 3]>,
    types: Vec<Scalar>,
}

impl VertexLayout {
    fn new(element: &Element) -> Result<Self> {
        let mut types = Vec::with_capacity(element.properties.len());
        let find = |wanted: &str| {
            element.properties.iter().position(
                |p| matches!(p, Property::Scalar { name, .. } if name == wanted),
            )
        };

        for p in &element.properties {
            match p {
                Property::Scalar { ty, .. } => types.push(*ty),
                Property::List { .. } => bail!("List properties on vertices are not supported"),
            }
        }

        let (Some(x), Some(y), Some(z)) = (find("x"), find("y"), find("z")) else {
            bail!("Vertex element has no x/y/z properties");
        };
        let rgb = match (find("red"), find("green"), find("blue")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };

        Ok(Self {
            xyz: [x, y, z],
            rgb,
            types,
        })
    }

    fn color(&self, values: &[f64]) -> Option<[u8; 3]> {
        self.rgb.map(|cols| {
            cols.map(|c| {
                let v = if self.types[c].is_float() {
                    values[c] * 255.0
                } else {
                    values[c]
                };
                v.round().clamp(0.0, 255.0) as u8
            })
        })
    }
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<Header> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        bail!("Not a PLY file (missing magic)");
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            bail!("Unexpected end of file in PLY header");
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => format = Some(Format::Ascii),
            ["format", "binary_little_endian", _] => format = Some(Format::BinaryLittleEndian),
            ["format", other, _] => bail!("Unsupported PLY format {}", other),
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .with_context(|| format!("Invalid element count '{}'", count))?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, _name] => {
                let element = elements.last_mut().context("Property before any element")?;
                element.properties.push(Property::List {
                    count: Scalar::parse(count).with_context(|| format!("Unknown type {}", count))?,
                    item: Scalar::parse(item).with_context(|| format!("Unknown type {}", item))?,
                });
            }
            ["property", ty, name] => {
                let element = elements.last_mut().context("Property before any element")?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: Scalar::parse(ty).with_context(|| format!("Unknown type {}", ty))?,
                });
            }
            _ => bail!("Malformed PLY header line '{}'", line.trim()),
        }
    }

    Ok(Header {
        format: format.context("PLY header has no format line")?,
        elements,
    })
}

/// Read the vertices of a PLY file as a point cloud.
pub fn read_ply(path: &Path) -> Result<PointCloud> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader).with_context(|| format!("Failed to parse {:?}", path))?;

    let cloud = match header.format {
        Format::Ascii => read_ascii_body(&mut reader, &header),
        Format::BinaryLittleEndian => {
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            read_binary_body(&body, &header)
        }
    };
    cloud.with_context(|| format!("Failed to read vertices of {:?}", path))
}

/// Upper bound on vertices reserved up front for a text body.
const MAX_ASCII_PREALLOC: usize = 1 << 20;

fn read_ascii_body<R: BufRead>(reader: &mut R, header: &Header) -> Result<PointCloud> {
    let mut lines = reader.lines();
    for element in &header.elements {
        if element.name != "vertex" {
            for _ in 0..element.count {
                lines.next().context("Truncated PLY body")??;
            }
            continue;
        }

        let layout = VertexLayout::new(element)?;
        let mut cloud = empty_cloud(element.count.min(MAX_ASCII_PREALLOC), layout.rgb.is_some());
        for _ in 0..element.count {
            let line = lines.next().context("Truncated PLY body")??;
            let values = line
                .split_whitespace()
                .map(|t| t.parse::<f64>().with_context(|| format!("Invalid value '{}'", t)))
                .collect::<Result<Vec<_>>>()?;
            if values.len() < layout.types.len() {
                bail!("Vertex line has {} values, expected {}", values.len(), layout.types.len());
            }
            push_vertex(&mut cloud, &layout, &values);
        }
        return Ok(cloud);
    }
    bail!("PLY file has no vertex element")
}

fn read_binary_body(body: &[u8], header: &Header) -> Result<PointCloud> {
    let mut offset = 0;
    let mut take = |ty: Scalar| -> Result<f64> {
        let bytes = body.get(offset..offset + ty.size()).context("Truncated PLY body")?;
        offset += ty.size();
        Ok(ty.read_le(bytes))
    };

    for element in &header.elements {
        if element.name != "vertex" {
            for _ in 0..element.count {
                for property in &element.properties {
                    match property {
                        Property::Scalar { ty, .. } => {
                            take(*ty)?;
                        }
                        Property::List { count, item } => {
                            let n = take(*count)? as usize;
                            for _ in 0..n {
                                take(*item)?;
                            }
                        }
                    }
                }
            }
            continue;
        }

        let layout = VertexLayout::new(element)?;
        let stride = layout.types.iter().map(|ty| ty.size()).sum::<usize>().max(1);
        let mut cloud = empty_cloud(element.count.min(body.len() / stride), layout.rgb.is_some());
        let mut values = vec![0.0; layout.types.len()];
        for _ in 0..element.count {
            for (value, ty) in values.iter_mut().zip(&layout.types) {
                *value = take(*ty)?;
            }
            push_vertex(&mut cloud, &layout, &values);
        }
        return Ok(cloud);
    }
    bail!("PLY file has no vertex element")
}

fn empty_cloud(capacity: usize, colored: bool) -> PointCloud {
    PointCloud {
        points: Vec::with_capacity(capacity),
        colors: colored.then(|| Vec::with_capacity(capacity)),
    }
}

fn push_vertex(cloud: &mut PointCloud, layout: &VertexLayout, values: &[f64]) {
    let [x, y, z] = layout.xyz;
    cloud.points.push(Vector3::new(values[x], values[y], values[z]));
    if let (Some(colors), Some(rgb)) = (cloud.colors.as_mut(), layout.color(values)) {
        colors.push(rgb);
    }
}

/// Write `cloud` as binary little-endian PLY.
pub fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    let colors = cloud
        .colors
        .as_ref()
        .filter(|c| c.len() == cloud.points.len());
    if cloud.colors.is_some() && colors.is_none() {
        bail!("Point cloud has a color count different from its point count");
    }

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    writeln!(w, "ply")?;
    writeln!(w, "format binary_little_endian 1.0")?;
    writeln!(w, "element vertex {}", cloud.points.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(w, "property double {}", axis)?;
    }
    if colors.is_some() {
        for channel in ["red", "green", "blue"] {
            writeln!(w, "property uchar {}", channel)?;
        }
    }
    writeln!(w, "end_header")?;

    for (i, p) in cloud.points.iter().enumerate() {
        for v in p.iter() {
            w.write_all(&v.to_le_bytes())?;
        }
        if let Some(colors) = colors {
            w.write_all(&colors[i])?;
        }
    }
    w.flush()?;
    Ok(())
}
