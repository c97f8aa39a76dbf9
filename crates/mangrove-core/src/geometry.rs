//! Planar vector geometry in geographic (lon, lat) degrees.
//! All coordinate math uses f64.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single position. `x` is longitude, `y` is latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Bounding box of a coordinate sequence; `None` when it is empty.
    pub fn of<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Self> {
        coords.into_iter().fold(None, |acc, c| {
            Some(match acc {
                None => BBox::new(c.x, c.y, c.x, c.y),
                Some(b) => BBox::new(b.min_x.min(c.x), b.min_y.min(c.y), b.max_x.max(c.x), b.max_y.max(c.y)),
            })
        })
    }

    pub fn union(self, other: BBox) -> BBox {
        BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains(&self, c: Coord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    /// Closed rectangle polygon covering the box, counter-clockwise.
    pub fn to_polygon(self) -> Polygon {
        Polygon::new(
            vec![
                Coord::new(self.min_x, self.min_y),
                Coord::new(self.max_x, self.min_y),
                Coord::new(self.max_x, self.max_y),
                Coord::new(self.min_x, self.max_y),
                Coord::new(self.min_x, self.min_y),
            ],
            Vec::new(),
        )
    }
}

/// A polygon with one exterior ring and zero or more holes.
/// Rings are stored closed (first coordinate repeated at the end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    pub interiors: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>, interiors: Vec<Vec<Coord>>) -> Self {
        Self { exterior, interiors }
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::of(&self.exterior)
    }

    /// Crossing-number containment. Half-open on edges: a point lying on an
    /// edge shared by two adjacent polygons is inside exactly one of them.
    pub fn contains(&self, p: Coord) -> bool {
        ring_contains(&self.exterior, p) && !self.interiors.iter().any(|h| ring_contains(h, p))
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Coord>> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }

    fn edges(&self) -> impl Iterator<Item = (Coord, Coord)> + '_ {
        self.rings().flat_map(|r| r.windows(2).map(|w| (w[0], w[1])))
    }

    pub fn intersects_polygon(&self, other: &Polygon) -> bool {
        match (self.bbox(), other.bbox()) {
            (Some(a), Some(b)) if a.intersects(&b) => {}
            _ => return false,
        }
        for (a1, a2) in self.edges() {
            for (b1, b2) in other.edges() {
                if segments_intersect(a1, a2, b1, b2) {
                    return true;
                }
            }
        }
        // No edge crossings: either disjoint or one lies wholly inside the other.
        other.exterior.first().is_some_and(|&c| self.contains(c))
            || self.exterior.first().is_some_and(|&c| other.contains(c))
    }

    /// Structural validity: every ring closed, at least three distinct
    /// vertices, finite coordinates, and no self-intersection.
    pub fn validate(&self) -> Result<(), String> {
        for (i, ring) in self.rings().enumerate() {
            if ring.len() < 4 {
                return Err(format!("ring {i} has {} coordinates, need at least 4", ring.len()));
            }
            if ring.first() != ring.last() {
                return Err(format!("ring {i} is not closed"));
            }
            if ring.iter().any(|c| !c.is_finite()) {
                return Err(format!("ring {i} has non-finite coordinates"));
            }
            if let Some((a, b)) = first_self_intersection(ring) {
                return Err(format!("ring {i} self-intersects between edges {a} and {b}"));
            }
        }
        Ok(())
    }

    /// Zero-width repair pass: closes open rings, drops repeated vertices and
    /// degenerate rings, and normalises orientation (exterior counter-clockwise,
    /// holes clockwise). Returns `None` when the exterior ring collapses.
    /// Self-intersections are not resolved; callers re-validate afterwards.
    pub fn repaired(&self) -> Option<Polygon> {
        let exterior = repair_ring(&self.exterior, true)?;
        let interiors = self.interiors.iter().filter_map(|r| repair_ring(r, false)).collect();
        Some(Polygon::new(exterior, interiors))
    }
}

/// Supported geometry kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Point(_) => false,
            Geometry::MultiPoint(pts) => pts.is_empty(),
            Geometry::Polygon(p) => p.exterior.is_empty(),
            Geometry::MultiPolygon(ps) => ps.iter().all(|p| p.exterior.is_empty()),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        match self {
            Geometry::Point(c) => BBox::of(std::iter::once(c)),
            Geometry::MultiPoint(pts) => BBox::of(pts),
            Geometry::Polygon(p) => p.bbox(),
            Geometry::MultiPolygon(ps) => ps.iter().filter_map(Polygon::bbox).reduce(BBox::union),
        }
    }

    pub fn points(&self) -> &[Coord] {
        match self {
            Geometry::Point(c) => std::slice::from_ref(c),
            Geometry::MultiPoint(pts) => pts,
            _ => &[],
        }
    }

    pub fn polygons(&self) -> &[Polygon] {
        match self {
            Geometry::Polygon(p) => std::slice::from_ref(p),
            Geometry::MultiPolygon(ps) => ps,
            _ => &[],
        }
    }

    /// Representative position: the first point, or the first exterior
    /// vertex of the first polygon.
    pub fn anchor(&self) -> Option<Coord> {
        self.points()
            .first()
            .copied()
            .or_else(|| self.polygons().iter().find_map(|p| p.exterior.first().copied()))
    }

    /// Does any part of `self` touch `area`? Points use half-open containment.
    pub fn meets(&self, area: &Polygon) -> bool {
        self.points().iter().any(|&p| area.contains(p))
            || self.polygons().iter().any(|poly| area.intersects_polygon(poly))
    }

    pub fn validate(&self) -> Result<(), String> {
        for c in self.points() {
            if !c.is_finite() {
                return Err("non-finite point coordinate".into());
            }
        }
        for (i, p) in self.polygons().iter().enumerate() {
            p.validate().map_err(|e| format!("polygon {i}: {e}"))?;
        }
        Ok(())
    }

    pub fn repaired(&self) -> Option<Geometry> {
        match self {
            Geometry::Polygon(p) => p.repaired().map(Geometry::Polygon),
            Geometry::MultiPolygon(ps) => {
                let fixed: Vec<Polygon> = ps.iter().filter_map(Polygon::repaired).collect();
                (!fixed.is_empty()).then_some(Geometry::MultiPolygon(fixed))
            }
            other => Some(other.clone()),
        }
    }
}

// ── Region index ─────────────────────────────────────────────────────────────

/// Side of an index cell, in degrees.
const CELL_DEG: f64 = 1.0;
/// Boxes spanning more cells than this are not gridded.
const MAX_CELLS: i64 = 4096;

/// Inclusive cell range covered by `b`, or `None` when it is too wide to grid.
fn cell_range(b: &BBox) -> Option<(i64, i64, i64, i64)> {
    let cell = |v: f64| (v / CELL_DEG).floor() as i64;
    let (x0, y0, x1, y1) = (cell(b.min_x), cell(b.min_y), cell(b.max_x), cell(b.max_y));
    let nx = x1.checked_sub(x0)?.checked_add(1)?;
    let ny = y1.checked_sub(y0)?.checked_add(1)?;
    (nx.checked_mul(ny)? <= MAX_CELLS).then_some((x0, y0, x1, y1))
}

/// Grid over the polygons of an ordered list of regions. Every lookup
/// answers with the first matching region, so each geometry has at most
/// one owner.
pub struct RegionIndex<'a> {
    /// (region, polygon box, polygon), in region order.
    parts: Vec<(usize, BBox, &'a Polygon)>,
    cells: HashMap<(i64, i64), Vec<usize>>,
    /// Parts too large for the grid; checked on every lookup.
    wide: Vec<usize>,
}

impl<'a> RegionIndex<'a> {
    pub fn new(regions: impl IntoIterator<Item = &'a Geometry>) -> Self {
        let mut index = Self { parts: Vec::new(), cells: HashMap::new(), wide: Vec::new() };
        for (region, geometry) in regions.into_iter().enumerate() {
            for poly in geometry.polygons() {
                let Some(bbox) = poly.bbox() else { continue };
                let part = index.parts.len();
                index.parts.push((region, bbox, poly));
                match cell_range(&bbox) {
                    Some((x0, y0, x1, y1)) => {
                        for cx in x0..=x1 {
                            for cy in y0..=y1 {
                                index.cells.entry((cx, cy)).or_default().push(part);
                            }
                        }
                    }
                    None => index.wide.push(part),
                }
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Parts whose box meets `bbox`, in region order.
    fn candidates(&self, bbox: &BBox) -> Vec<usize> {
        let mut out = self.wide.clone();
        match cell_range(bbox) {
            Some((x0, y0, x1, y1)) => {
                for cx in x0..=x1 {
                    for cy in y0..=y1 {
                        if let Some(parts) = self.cells.get(&(cx, cy)) {
                            out.extend_from_slice(parts);
                        }
                    }
                }
            }
            None => out.extend(0..self.parts.len()),
        }
        out.sort_unstable();
        out.dedup();
        out.retain(|&i| self.parts[i].1.intersects(bbox));
        out
    }

    /// First region whose area holds `p`.
    pub fn locate_point(&self, p: Coord) -> Option<usize> {
        self.candidates(&BBox::new(p.x, p.y, p.x, p.y))
            .into_iter()
            .map(|i| &self.parts[i])
            .find(|(_, _, poly)| poly.contains(p))
            .map(|(region, _, _)| *region)
    }

    /// Owner of `g`: the region holding its anchor, otherwise the first
    /// region it touches at all.
    pub fn locate(&self, g: &Geometry) -> Option<usize> {
        if let Some(region) = g.anchor().and_then(|a| self.locate_point(a)) {
            return Some(region);
        }
        let bbox = g.bbox()?;
        self.candidates(&bbox)
            .into_iter()
            .map(|i| &self.parts[i])
            .find(|(_, _, poly)| g.meets(poly))
            .map(|(region, _, _)| *region)
    }
}

// ── Ring helpers ─────────────────────────────────────────────────────────────

fn ring_contains(ring: &[Coord], p: Coord) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Twice the signed area; positive for counter-clockwise rings.
fn signed_area2(ring: &[Coord]) -> f64 {
    ring.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum()
}

fn repair_ring(ring: &[Coord], counter_clockwise: bool) -> Option<Vec<Coord>> {
    let mut out: Vec<Coord> = Vec::with_capacity(ring.len() + 1);
    for &c in ring.iter().filter(|c| c.is_finite()) {
        if out.last() != Some(&c) {
            out.push(c);
        }
    }
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    if out.len() < 3 {
        return None;
    }
    out.push(out[0]);
    let area = signed_area2(&out);
    if area == 0.0 {
        return None;
    }
    if (area > 0.0) != counter_clockwise {
        out.reverse();
    }
    Some(out)
}

fn first_self_intersection(ring: &[Coord]) -> Option<(usize, usize)> {
    let n_edges = ring.len() - 1;
    for i in 0..n_edges {
        for j in (i + 1)..n_edges {
            let adjacent = j == i + 1 || (i == 0 && j == n_edges - 1);
            if adjacent {
                continue;
            }
            if segments_intersect(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return Some((i, j));
            }
        }
    }
    None
}

fn orient(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord, b: Coord, c: Coord) -> bool {
    c.x >= a.x.min(b.x) && c.x <= a.x.max(b.x) && c.y >= a.y.min(b.y) && c.y <= a.y.max(b.y)
}

/// Closed-segment intersection test, touching endpoints included.
pub fn segments_intersect(p1: Coord, p2: Coord, q1: Coord, q2: Coord) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0)) {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        BBox::new(x0, y0, x0 + size, y0 + size).to_polygon()
    }

    #[test]
    fn shared_edge_points_belong_to_one_square() {
        let left = square(0.0, 0.0, 1.0);
        let right = square(1.0, 0.0, 1.0);
        let above = square(0.0, 1.0, 1.0);
        for p in [Coord::new(1.0, 0.5), Coord::new(1.0, 0.0), Coord::new(0.5, 1.0)] {
            let hits = [&left, &right, &above].iter().filter(|s| s.contains(p)).count();
            assert!(hits <= 1, "{p:?} matched {hits} squares");
        }
        assert!(left.contains(Coord::new(0.5, 0.5)));
        assert!(!left.contains(Coord::new(1.5, 0.5)));
    }

    #[test]
    fn hole_excludes_points() {
        let mut poly = square(0.0, 0.0, 10.0);
        poly.interiors.push(vec![
            Coord::new(4.0, 4.0),
            Coord::new(4.0, 6.0),
            Coord::new(6.0, 6.0),
            Coord::new(6.0, 4.0),
            Coord::new(4.0, 4.0),
        ]);
        assert!(!poly.contains(Coord::new(5.0, 5.0)));
        assert!(poly.contains(Coord::new(1.0, 1.0)));
    }

    #[test]
    fn polygon_intersection_covers_crossing_and_containment() {
        let big = square(0.0, 0.0, 10.0);
        let inner = square(2.0, 2.0, 1.0);
        let crossing = square(9.0, 9.0, 2.0);
        let far = square(20.0, 20.0, 1.0);
        assert!(big.intersects_polygon(&inner));
        assert!(inner.intersects_polygon(&big));
        assert!(big.intersects_polygon(&crossing));
        assert!(!big.intersects_polygon(&far));
    }

    #[test]
    fn bowtie_is_invalid_and_survives_repair_as_invalid() {
        let bowtie = Polygon::new(
            vec![
                Coord::new(0.0, 0.0),
                Coord::new(2.0, 2.0),
                Coord::new(2.0, 0.0),
                Coord::new(0.0, 2.0),
                Coord::new(0.0, 0.0),
            ],
            Vec::new(),
        );
        assert!(bowtie.validate().is_err());
        // Opposite lobes cancel, so the signed area is zero and the ring collapses.
        assert!(bowtie.repaired().is_none());
    }

    #[test]
    fn repair_closes_and_reorients() {
        let open_cw = Polygon::new(
            vec![
                Coord::new(0.0, 0.0),
                Coord::new(0.0, 1.0),
                Coord::new(0.0, 1.0),
                Coord::new(1.0, 1.0),
                Coord::new(1.0, 0.0),
            ],
            Vec::new(),
        );
        assert!(open_cw.validate().is_err());
        let fixed = open_cw.repaired().unwrap();
        assert!(fixed.validate().is_ok());
        assert_eq!(fixed.exterior.len(), 5);
        assert!(signed_area2(&fixed.exterior) > 0.0);
    }

    #[test]
    fn anchor_and_meets() {
        let area = square(0.0, 0.0, 1.0);
        let pts = Geometry::MultiPoint(vec![Coord::new(3.0, 3.0), Coord::new(0.5, 0.5)]);
        assert_eq!(pts.anchor(), Some(Coord::new(3.0, 3.0)));
        assert!(pts.meets(&area));
        assert!(!Geometry::Point(Coord::new(3.0, 3.0)).meets(&area));
        let crossing = Geometry::Polygon(square(0.5, 0.5, 1.0));
        assert_eq!(crossing.anchor(), Some(Coord::new(0.5, 0.5)));
        assert!(crossing.meets(&area));
    }

    #[test]
    fn index_gives_each_geometry_one_owner() {
        let regions = [
            Geometry::MultiPolygon(vec![square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0)]),
            Geometry::Polygon(square(2.0, 0.0, 1.0)),
        ];
        let index = RegionIndex::new(&regions);
        assert_eq!(index.len(), 3);
        assert_eq!(index.locate_point(Coord::new(0.5, 0.5)), Some(0));
        assert_eq!(index.locate_point(Coord::new(2.5, 0.5)), Some(1));
        assert_eq!(index.locate_point(Coord::new(9.0, 9.0)), None);
        // Straddles the border at x = 2: owned by the region holding its first vertex.
        let straddle = Geometry::Polygon(square(1.8, 0.2, 0.4));
        assert_eq!(index.locate(&straddle), Some(0));
        let straddle = Geometry::Polygon(Polygon::new(
            vec![Coord::new(2.2, 0.2), Coord::new(2.2, 0.6), Coord::new(1.8, 0.6), Coord::new(1.8, 0.2), Coord::new(2.2, 0.2)],
            Vec::new(),
        ));
        assert_eq!(index.locate(&straddle), Some(1));
        // First vertex outside every region: the first region touched owns it.
        let overhang = Geometry::Polygon(square(2.5, -0.5, 1.0));
        assert_eq!(index.locate(&overhang), Some(1));
    }

    #[test]
    fn oversized_parts_are_still_found() {
        let regions = [Geometry::Polygon(BBox::new(-180.0, -90.0, 180.0, 90.0).to_polygon())];
        let index = RegionIndex::new(&regions);
        assert_eq!(index.locate_point(Coord::new(120.5, -33.2)), Some(0));
        let wide_sample = Geometry::Polygon(BBox::new(-170.0, -80.0, 170.0, 80.0).to_polygon());
        assert_eq!(index.locate(&wide_sample), Some(0));
    }

    #[test]
    fn bbox_of_multipolygon() {
        let g = Geometry::MultiPolygon(vec![square(0.0, 0.0, 1.0), square(5.0, -2.0, 1.0)]);
        let b = g.bbox().unwrap();
        approx::assert_abs_diff_eq!(b.min_y, -2.0);
        approx::assert_abs_diff_eq!(b.max_x, 6.0);
    }
}
