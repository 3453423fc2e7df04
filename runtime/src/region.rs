//! Region of interest used to select facilities.
//!
//! A region is a lon/lat bounding box, inline WKT polygons, or the polygons
//! of a GeoJSON file. Coordinates are `x = lon`, `y = lat` throughout.

use crate::geo::GeoPoint;
use anyhow::{anyhow, bail, Context, Result};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Region as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionSpec {
    /// `[min_lon, min_lat, max_lon, max_lat]`
    Bounds([f64; 4]),
    /// A `.geojson` path or inline WKT.
    Text(String),
}

/// Inclusive lon/lat box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn contains(&self, p: GeoPoint) -> bool {
        (self.min_x..=self.max_x).contains(&p.lon) && (self.min_y..=self.max_y).contains(&p.lat)
    }

    fn of_points<'a>(points: impl IntoIterator<Item = &'a (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |acc, &(x, y)| {
            Some(match acc {
                None => Bounds {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(b) => Bounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            })
        })
    }

    fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Outer ring followed by optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<(f64, f64)>>,
}

impl Polygon {
    fn contains(&self, p: GeoPoint) -> bool {
        let mut rings = self.rings.iter();
        match rings.next() {
            Some(outer) if ring_contains(outer, p.lon, p.lat) => {
                !rings.any(|hole| ring_contains(hole, p.lon, p.lat))
            }
            _ => false,
        }
    }
}

/// Even-odd ray casting.
fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Bounds(Bounds),
    Polygons(Vec<Polygon>),
}

impl Region {
    pub fn from_spec(spec: &RegionSpec) -> Result<Self> {
        match spec {
            RegionSpec::Bounds([min_x, min_y, max_x, max_y]) => {
                if !(min_x <= max_x && min_y <= max_y) {
                    bail!("region bounds are inverted: {:?}", [min_x, min_y, max_x, max_y]);
                }
                Ok(Region::Bounds(Bounds {
                    min_x: *min_x,
                    min_y: *min_y,
                    max_x: *max_x,
                    max_y: *max_y,
                }))
            }
            RegionSpec::Text(text) => {
                let trimmed = text.trim();
                let lower = trimmed.to_ascii_lowercase();
                if lower.ends_with(".geojson") || lower.ends_with(".json") {
                    Self::from_geojson_file(Path::new(trimmed))
                } else {
                    Self::from_wkt(trimmed)
                }
            }
        }
    }

    pub fn from_wkt(text: &str) -> Result<Self> {
        let polygons = parse_wkt(text)?;
        Ok(Region::Polygons(polygons))
    }

    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read region file: {}", path.display()))?;
        Self::from_geojson(&text).with_context(|| format!("invalid region file: {}", path.display()))
    }

    /// Every Polygon and MultiPolygon in the document.
    pub fn from_geojson(text: &str) -> Result<Self> {
        let doc: GeoJson = text.parse()?;
        let geometries: Vec<geojson::Geometry> = match doc {
            GeoJson::FeatureCollection(fc) => fc.features.into_iter().filter_map(|f| f.geometry).collect(),
            GeoJson::Feature(f) => f.geometry.into_iter().collect(),
            GeoJson::Geometry(g) => vec![g],
        };

        let mut polygons = Vec::new();
        for geometry in geometries {
            match geometry.value {
                geojson::Value::Polygon(rings) => polygons.push(polygon_from_positions(&rings)?),
                geojson::Value::MultiPolygon(parts) => {
                    for rings in &parts {
                        polygons.push(polygon_from_positions(rings)?);
                    }
                }
                _ => {}
            }
        }
        if polygons.is_empty() {
            bail!("no Polygon or MultiPolygon geometry found");
        }
        Ok(Region::Polygons(polygons))
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        match self {
            Region::Bounds(b) => b.contains(p),
            Region::Polygons(polys) => polys.iter().any(|poly| poly.contains(p)),
        }
    }

    /// Combined bounding box of every shape.
    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Region::Bounds(b) => Some(*b),
            Region::Polygons(polys) => polys
                .iter()
                .filter_map(|p| p.rings.first().and_then(|outer| Bounds::of_points(outer)))
                .reduce(Bounds::union),
        }
    }
}

fn polygon_from_positions(rings: &[Vec<Vec<f64>>]) -> Result<Polygon> {
    let rings = rings
        .iter()
        .map(|ring| {
            ring.iter()
                .map(|pos| match pos.as_slice() {
                    [x, y, ..] => Ok((*x, *y)),
                    _ => Err(anyhow!("position with fewer than two coordinates")),
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    validate_rings(&rings)?;
    Ok(Polygon { rings })
}

fn validate_rings(rings: &[Vec<(f64, f64)>]) -> Result<()> {
    match rings.first() {
        Some(outer) if outer.len() >= 3 => Ok(()),
        _ => bail!("polygon needs an outer ring of at least three points"),
    }
}

/// Nested parenthesized lists of coordinate pairs.
enum Node {
    List(Vec<Node>),
    Coords(Vec<(f64, f64)>),
}

/// `POLYGON((x y, ...), (hole))`, the single-paren `POLYGON(x y, ...)`
/// shorthand, and `MULTIPOLYGON(((...)), ((...)))`.
fn parse_wkt(text: &str) -> Result<Vec<Polygon>> {
    let text = text.trim();
    let open = text.find('(').ok_or_else(|| anyhow!("WKT has no coordinate list"))?;
    let kind = text[..open].trim().to_ascii_uppercase();
    let (node, rest) = parse_node(&text[open..])?;
    if !rest.trim().is_empty() {
        bail!("trailing characters after WKT: {:?}", rest.trim());
    }

    let polygons = match kind.as_str() {
        "POLYGON" => vec![polygon_from_node(node)?],
        "MULTIPOLYGON" => match node {
            Node::List(parts) => parts.into_iter().map(polygon_from_node).collect::<Result<_>>()?,
            Node::Coords(_) => bail!("MULTIPOLYGON needs nested polygons"),
        },
        other => bail!("unsupported WKT geometry: {other}"),
    };
    Ok(polygons)
}

fn polygon_from_node(node: Node) -> Result<Polygon> {
    let rings = match node {
        Node::Coords(ring) => vec![ring],
        Node::List(children) => children
            .into_iter()
            .map(|child| match child {
                Node::Coords(ring) => Ok(ring),
                Node::List(_) => Err(anyhow!("polygon rings nested too deeply")),
            })
            .collect::<Result<Vec<_>>>()?,
    };
    validate_rings(&rings)?;
    Ok(Polygon { rings })
}

/// Parse one parenthesized group starting at `s[0] == '('`.
fn parse_node(s: &str) -> Result<(Node, &str)> {
    let body = s
        .strip_prefix('(')
        .ok_or_else(|| anyhow!("expected '(' in WKT"))?
        .trim_start();

    if body.starts_with('(') {
        let mut children = Vec::new();
        let mut rest = body;
        loop {
            let (child, after) = parse_node(rest)?;
            children.push(child);
            let after = after.trim_start();
            if let Some(next) = after.strip_prefix(',') {
                rest = next.trim_start();
            } else if let Some(done) = after.strip_prefix(')') {
                return Ok((Node::List(children), done));
            } else {
                bail!("unbalanced parentheses in WKT");
            }
        }
    }

    let close = body.find(')').ok_or_else(|| anyhow!("unbalanced parentheses in WKT"))?;
    let coords = body[..close]
        .split(',')
        .map(|pair| {
            let mut it = pair.split_whitespace().map(str::parse::<f64>);
            match (it.next(), it.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok((x, y)),
                _ => Err(anyhow!("invalid WKT coordinate pair: {:?}", pair.trim())),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((Node::Coords(coords), &body[close + 1..]))
}
