//! Well-Known Binary reading and writing
//!
//! The reader understands plain OGC WKB, EWKB flag bits (Z, M, SRID) and the
//! ISO dimension offsets (1000 = Z, 2000 = M, 3000 = ZM). Multi-geometries and
//! collections are flattened into their point, line and polygon members. M
//! values are read and dropped.

use crate::{DataError, Element, Geometry, GeometryType, MapPos, Result};
use std::io::{Cursor, Read};

/// WKB byte order: big endian
const WKB_BE: u8 = 0;
/// WKB byte order: little endian
const WKB_LE: u8 = 1;

const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_M_FLAG: u32 = 0x4000_0000;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_FLAGS: u32 = EWKB_Z_FLAG | EWKB_M_FLAG | EWKB_SRID_FLAG;

/// Bytes per coordinate value
const COORD_BYTES: usize = 8;

/// Deepest accepted nesting of multi-geometries and collections
pub const MAX_NESTING_DEPTH: usize = 32;

struct WkbReader<'a> {
    cursor: Cursor<&'a [u8]>,
    little_endian: bool,
}

#[derive(Clone, Copy, Debug)]
struct Dimensions {
    z: bool,
    m: bool,
}

impl Dimensions {
    fn values_per_coord(self) -> usize {
        2 + self.z as usize + self.m as usize
    }
}

impl<'a> WkbReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            little_endian: true,
        }
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn read_array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| DataError::Truncated { context })?;
        Ok(buf)
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        let bytes = self.read_array::<4>(context)?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self, context: &'static str) -> Result<f64> {
        let bytes = self.read_array::<8>(context)?;
        Ok(if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn read_pos(&mut self, dims: Dimensions) -> Result<MapPos> {
        let x = self.read_f64("x coordinate")?;
        let y = self.read_f64("y coordinate")?;
        let z = if dims.z {
            self.read_f64("z coordinate")?
        } else {
            0.0
        };
        if dims.m {
            self.read_f64("m coordinate")?;
        }
        Ok(MapPos::new_3d(x, y, z))
    }

    /// Read a vertex count followed by that many positions
    fn read_positions(&mut self, dims: Dimensions) -> Result<Vec<MapPos>> {
        let count = self.read_u32("vertex count")? as usize;
        // Never trust the count for allocation beyond what the stream can hold
        let max_possible = self.remaining() / (COORD_BYTES * dims.values_per_coord());
        let mut positions = Vec::with_capacity(count.min(max_possible));
        for _ in 0..count {
            positions.push(self.read_pos(dims)?);
        }
        Ok(positions)
    }

    fn read_header(&mut self) -> Result<(GeometryType, Dimensions)> {
        let order = self.read_array::<1>("byte order")?[0];
        self.little_endian = match order {
            WKB_LE => true,
            WKB_BE => false,
            other => {
                return Err(DataError::InvalidGeometry(format!(
                    "Invalid WKB byte order marker: {other}"
                )));
            }
        };

        let word = self.read_u32("geometry type")?;
        let mut dims = Dimensions {
            z: word & EWKB_Z_FLAG != 0,
            m: word & EWKB_M_FLAG != 0,
        };
        if word & EWKB_SRID_FLAG != 0 {
            let srid = self.read_u32("SRID")?;
            tracing::debug!(srid, "Ignoring SRID in EWKB header");
        }

        let base = word & !EWKB_FLAGS;
        match base / 1000 {
            0 => {}
            1 => dims.z = true,
            2 => dims.m = true,
            3 => {
                dims.z = true;
                dims.m = true;
            }
            _ => return Err(DataError::UnsupportedGeometryType(word)),
        }
        let kind =
            GeometryType::from_code(base % 1000).ok_or(DataError::UnsupportedGeometryType(word))?;
        Ok((kind, dims))
    }

    /// Read one geometry (recursively), appending flattened members to `out`
    ///
    /// Members are pushed as soon as they are complete, so on error `out`
    /// still holds everything read before the failure.
    fn read_geometry(&mut self, out: &mut Vec<Geometry>, depth: usize) -> Result<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(DataError::InvalidGeometry(
                "WKB nesting too deep".to_string(),
            ));
        }
        let (kind, dims) = self.read_header()?;
        match kind {
            GeometryType::Point => {
                let pos = self.read_pos(dims)?;
                out.push(Geometry::Point(pos));
            }
            GeometryType::LineString => {
                let vertices = self.read_positions(dims)?;
                out.push(Geometry::Line(vertices));
            }
            GeometryType::Polygon => {
                let ring_count = self.read_u32("ring count")?;
                if ring_count == 0 {
                    tracing::debug!("Skipping empty WKB polygon");
                    return Ok(());
                }
                let exterior = self.read_positions(dims)?;
                let mut interiors = Vec::with_capacity((ring_count - 1).min(64) as usize);
                for _ in 1..ring_count {
                    interiors.push(self.read_positions(dims)?);
                }
                out.push(Geometry::Polygon {
                    exterior,
                    interiors,
                });
            }
            GeometryType::MultiPoint
            | GeometryType::MultiLineString
            | GeometryType::MultiPolygon
            | GeometryType::GeometryCollection => {
                let count = self.read_u32("member count")?;
                for _ in 0..count {
                    self.read_geometry(out, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

/// Decode a WKB stream into its point, line and polygon members
pub fn read_wkb(bytes: &[u8]) -> Result<Vec<Geometry>> {
    match read_wkb_partial(bytes) {
        (geometries, None) => Ok(geometries),
        (_, Some(err)) => Err(err),
    }
}

/// Decode as much of a WKB stream as possible
///
/// Returns the members read before the first error together with that error.
/// Reading stops at the failing member since the stream position after it is
/// unknown.
pub fn read_wkb_partial(bytes: &[u8]) -> (Vec<Geometry>, Option<DataError>) {
    let mut reader = WkbReader::new(bytes);
    let mut geometries = Vec::new();
    if let Err(err) = reader.read_geometry(&mut geometries, 0) {
        return (geometries, Some(err));
    }
    if reader.remaining() > 0 {
        tracing::debug!(
            trailing = reader.remaining(),
            "Trailing bytes after WKB geometry"
        );
    }
    (geometries, None)
}

/// Decode a WKB stream into elements that all carry a copy of `attributes`
///
/// Malformed input is logged instead of returned as an error. Members of a
/// collection decoded before the malformed one are kept.
pub fn decode_elements<A: Clone>(bytes: &[u8], attributes: &A) -> Vec<Element<A>> {
    let (geometries, err) = read_wkb_partial(bytes);
    if let Some(err) = err {
        tracing::warn!(kept = geometries.len(), "Skipping malformed WKB geometry: {}", err);
    }
    geometries
        .into_iter()
        .map(|geometry| Element::new(geometry, attributes.clone()))
        .collect()
}

/// Decode a batch of independent WKB entries
///
/// One result per entry; a malformed entry produces an empty list and the
/// rest of the batch is still decoded.
pub fn decode_batch<'a, A, I>(entries: I, attributes: &A) -> Vec<Vec<Element<A>>>
where
    A: Clone,
    I: IntoIterator<Item = &'a [u8]>,
{
    entries
        .into_iter()
        .map(|bytes| decode_elements(bytes, attributes))
        .collect()
}

struct WkbWriter {
    out: Vec<u8>,
    little_endian: bool,
}

impl WkbWriter {
    fn u32(&mut self, value: u32) {
        if self.little_endian {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            self.out.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn f64(&mut self, value: f64) {
        if self.little_endian {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            self.out.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn header(&mut self, kind: GeometryType, has_z: bool) {
        self.out.push(if self.little_endian { WKB_LE } else { WKB_BE });
        let flags = if has_z { EWKB_Z_FLAG } else { 0 };
        self.u32(kind.code() | flags);
    }

    fn positions(&mut self, positions: &[MapPos], has_z: bool) {
        self.u32(positions.len() as u32);
        for pos in positions {
            self.pos(pos, has_z);
        }
    }

    fn pos(&mut self, pos: &MapPos, has_z: bool) {
        self.f64(pos.x);
        self.f64(pos.y);
        if has_z {
            self.f64(pos.z);
        }
    }

    fn geometry(&mut self, geometry: &Geometry) {
        let has_z = geometry.has_z();
        self.header(geometry.kind(), has_z);
        match geometry {
            Geometry::Point(pos) => self.pos(pos, has_z),
            Geometry::Line(vertices) => self.positions(vertices, has_z),
            Geometry::Polygon {
                exterior,
                interiors,
            } => {
                self.u32(1 + interiors.len() as u32);
                self.positions(exterior, has_z);
                for ring in interiors {
                    self.positions(ring, has_z);
                }
            }
        }
    }
}

/// Encode a geometry as WKB
///
/// The EWKB Z flag is set when any vertex has a non-zero z. Rings are written
/// exactly as stored.
pub fn write_wkb(geometry: &Geometry, little_endian: bool) -> Vec<u8> {
    let mut writer = WkbWriter {
        out: Vec::with_capacity(9 + geometry.vertex_count() * 2 * COORD_BYTES),
        little_endian,
    };
    writer.geometry(geometry);
    writer.out
}

/// Encode several geometries as one WKB geometry collection
pub fn write_wkb_collection(geometries: &[Geometry], little_endian: bool) -> Vec<u8> {
    let mut writer = WkbWriter {
        out: Vec::new(),
        little_endian,
    };
    writer.header(GeometryType::GeometryCollection, false);
    writer.u32(geometries.len() as u32);
    for geometry in geometries {
        writer.geometry(geometry);
    }
    writer.out
}
