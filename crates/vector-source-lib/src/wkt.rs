//! Well-Known Text output

use crate::{Element, Geometry, GeometryType, MapPos};
use std::fmt::Write;

/// Serialize a geometry as WKT
///
/// `hint` lets callers ask for a multi-geometry (or collection) wrapper around
/// a single member, e.g. `MULTIPOINT((1 2))`. A hint that does not fit the
/// geometry is ignored. Polygon rings are always written closed; vertex order
/// and ring winding are kept as stored.
pub fn write_wkt(geometry: &Geometry, hint: Option<GeometryType>) -> String {
    let kind = geometry.kind();
    let has_z = geometry.has_z();
    let mut body = String::new();
    write_body(&mut body, geometry, has_z);

    let dims = if has_z { " Z" } else { "" };
    match hint {
        Some(multi) if kind.multi() == Some(multi) => {
            if body == "EMPTY" {
                format!("{multi}{dims} EMPTY")
            } else {
                format!("{multi}{dims}({body})")
            }
        }
        Some(GeometryType::GeometryCollection) => {
            format!("GEOMETRYCOLLECTION({})", single(kind, dims, &body))
        }
        Some(other) if other != kind => {
            tracing::debug!(%kind, hint = %other, "Ignoring WKT type hint that does not fit");
            single(kind, dims, &body)
        }
        _ => single(kind, dims, &body),
    }
}

/// Serialize an element's geometry as WKT
pub fn element_to_wkt<A>(element: &Element<A>, hint: Option<GeometryType>) -> String {
    write_wkt(&element.geometry, hint)
}

fn single(kind: GeometryType, dims: &str, body: &str) -> String {
    if body == "EMPTY" {
        format!("{kind}{dims} EMPTY")
    } else {
        format!("{kind}{dims}{body}")
    }
}

/// Parenthesised coordinate body, or `EMPTY`
fn write_body(out: &mut String, geometry: &Geometry, has_z: bool) {
    match geometry {
        Geometry::Point(pos) => {
            out.push('(');
            write_pos(out, pos, has_z);
            out.push(')');
        }
        Geometry::Line(vertices) if vertices.is_empty() => out.push_str("EMPTY"),
        Geometry::Line(vertices) => write_sequence(out, vertices, has_z, false),
        Geometry::Polygon { exterior, .. } if exterior.is_empty() => out.push_str("EMPTY"),
        Geometry::Polygon {
            exterior,
            interiors,
        } => {
            out.push('(');
            write_sequence(out, exterior, has_z, true);
            for ring in interiors.iter().filter(|ring| !ring.is_empty()) {
                out.push(',');
                write_sequence(out, ring, has_z, true);
            }
            out.push(')');
        }
    }
}

fn write_sequence(out: &mut String, vertices: &[MapPos], has_z: bool, close: bool) {
    out.push('(');
    for (i, pos) in vertices.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_pos(out, pos, has_z);
    }
    if close {
        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            if first != last {
                out.push(',');
                write_pos(out, first, has_z);
            }
        }
    }
    out.push(')');
}

fn write_pos(out: &mut String, pos: &MapPos, has_z: bool) {
    // Writing into a String cannot fail
    let _ = if has_z {
        write!(out, "{} {} {}", pos.x, pos.y, pos.z)
    } else {
        write!(out, "{} {}", pos.x, pos.y)
    };
}
