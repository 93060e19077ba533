//! User-defined regions of the frame.
//!
//! A region is an implicitly closed polygon in frame coordinates. Membership
//! is an exact ray-casting test with no tolerance band.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

/// Ray-casting point-in-polygon test.
///
/// An edge only participates when `min(y1, y2) < py <= max(y1, y2)` and the
/// point is not right of both endpoints, so horizontal edges never toggle.
/// Polygons with fewer than three vertices contain nothing.
pub fn contains(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut p1 = polygon[polygon.len() - 1];
    for &p2 in polygon {
        if point.y > p1.y.min(p2.y) && point.y <= p1.y.max(p2.y) && point.x <= p1.x.max(p2.x) {
            let vertical = p1.x == p2.x;
            let crosses = vertical || {
                let x_cross = (point.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                point.x <= x_cross
            };
            if crosses {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}

/// Named polygon, validated on construction and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Region {
    name: String,
    vertices: Vec<Point>,
}

impl Region {
    pub fn new(name: impl Into<String>, vertices: Vec<Point>) -> Result<Self, InputError> {
        let name = name.into();
        if vertices.len() < 3 {
            return Err(InputError::RegionTooSmall {
                region: name,
                got: vertices.len(),
            });
        }
        if vertices.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(InputError::RegionNotFinite(name));
        }
        Ok(Self { name, vertices })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn contains(&self, point: Point) -> bool {
        contains(point, &self.vertices)
    }
}

/// Region as submitted by a caller, before validation.
///
/// Accepts either a bare vertex list `[[x, y], ...]` or
/// `{"name": "...", "points": [[x, y], ...]}`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RegionSpec {
    Points(Vec<[f32; 2]>),
    Named {
        #[serde(default)]
        name: Option<String>,
        points: Vec<[f32; 2]>,
    },
}

impl RegionSpec {
    fn into_parts(self) -> (Option<String>, Vec<[f32; 2]>) {
        match self {
            RegionSpec::Points(points) => (None, points),
            RegionSpec::Named { name, points } => (name, points),
        }
    }
}

/// Parses the CLI form `name=x1,y1;x2,y2;x3,y3` (the `name=` prefix is optional).
impl FromStr for RegionSpec {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, coords) = match s.split_once('=') {
            Some((name, coords)) => (Some(name.trim().to_string()), coords),
            None => (None, s),
        };
        let mut points = Vec::new();
        for pair in coords.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| InputError::Malformed(format!("vertex '{pair}' is not x,y")))?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|_| InputError::Malformed(format!("invalid coordinate '{v}'")))
            };
            points.push([parse(x)?, parse(y)?]);
        }
        Ok(match name {
            Some(name) if !name.is_empty() => RegionSpec::Named {
                name: Some(name),
                points,
            },
            _ => RegionSpec::Points(points),
        })
    }
}

/// Validates submitted regions. Unnamed regions become `region_<index>`.
pub fn build_regions(specs: Vec<RegionSpec>) -> Result<Vec<Region>, InputError> {
    let mut seen = HashSet::new();
    let mut regions = Vec::with_capacity(specs.len());
    for (index, spec) in specs.into_iter().enumerate() {
        let (name, points) = spec.into_parts();
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("region_{index}"));
        if !seen.insert(name.clone()) {
            return Err(InputError::DuplicateRegion(name));
        }
        regions.push(Region::new(
            name,
            points.into_iter().map(Point::from).collect(),
        )?);
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn enclosed_point_is_inside_convex_polygon() {
        assert!(contains(Point::new(5.0, 5.0), &square()));
        assert!(contains(Point::new(0.5, 9.5), &square()));
    }

    #[test]
    fn far_point_is_outside() {
        assert!(!contains(Point::new(500.0, 500.0), &square()));
        assert!(!contains(Point::new(-3.0, 5.0), &square()));
        assert!(!contains(Point::new(5.0, -0.1), &square()));
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {
        let line = vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)];
        assert!(!contains(Point::new(5.0, 5.0), &line));
        assert!(!contains(Point::new(0.0, 0.0), &[]));
    }

    #[test]
    fn concave_notch_is_outside() {
        // U shape: notch between x=4..6 above y=4
        let u = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(6.0, 10.0),
            Point::new(6.0, 4.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!contains(Point::new(5.0, 8.0), &u));
        assert!(contains(Point::new(2.0, 8.0), &u));
        assert!(contains(Point::new(5.0, 2.0), &u));
    }

    #[test]
    fn boundary_follows_half_open_rule() {
        // bottom edge y=0 is excluded (py must exceed min y), top edge y=10 included
        assert!(!contains(Point::new(5.0, 0.0), &square()));
        assert!(contains(Point::new(5.0, 10.0), &square()));
        // a point on a vertical edge toggles every vertical edge at or right of it
        assert!(contains(Point::new(10.0, 5.0), &square()));
        assert!(!contains(Point::new(0.0, 5.0), &square()));
    }

    #[test]
    fn triangle_membership() {
        let tri = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 10.0),
        ];
        assert!(contains(Point::new(5.0, 5.0), &tri));
        assert!(!contains(Point::new(1.0, 9.0), &tri));
    }

    #[test]
    fn region_requires_three_vertices() {
        let err = Region::new("lane", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)])
            .unwrap_err();
        assert_eq!(
            err,
            InputError::RegionTooSmall {
                region: "lane".into(),
                got: 2
            }
        );
        assert!(Region::new("nan", vec![Point::new(f32::NAN, 0.0); 3]).is_err());
    }

    #[test]
    fn build_regions_names_unnamed_by_index() {
        let specs: Vec<RegionSpec> = serde_json::from_str(
            r#"[
                [[0,0],[10,0],[10,10]],
                {"name": "exit", "points": [[0,0],[5,0],[5,5]]},
                {"points": [[1,1],[2,1],[2,2]]}
            ]"#,
        )
        .unwrap();
        let regions = build_regions(specs).unwrap();
        let names: Vec<_> = regions.iter().map(Region::name).collect();
        assert_eq!(names, vec!["region_0", "exit", "region_2"]);
    }

    #[test]
    fn build_regions_rejects_duplicates() {
        let specs = vec![
            "gate=0,0;1,0;1,1".parse::<RegionSpec>().unwrap(),
            "gate=0,0;2,0;2,2".parse::<RegionSpec>().unwrap(),
        ];
        assert_eq!(
            build_regions(specs).unwrap_err(),
            InputError::DuplicateRegion("gate".into())
        );
    }

    #[test]
    fn parses_cli_region_syntax() {
        let spec: RegionSpec = "north = 0,0; 100,0; 100,50".parse().unwrap();
        assert_eq!(
            spec,
            RegionSpec::Named {
                name: Some("north".into()),
                points: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 50.0]],
            }
        );
        assert!("0,0;1".parse::<RegionSpec>().is_err());
        assert!("0,0;x,1".parse::<RegionSpec>().is_err());
    }
}
