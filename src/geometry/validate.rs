use geo::{Area, Geometry, Intersects, Line, LineString, Polygon, RemoveRepeatedPoints};

/// Whether a raw shape may take part in a merge: areal, finite, closed
/// rings of at least four positions, non-zero area, no ring crossing itself.
pub fn is_usable_areal(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Polygon(p) => polygon_is_usable(p),
        Geometry::MultiPolygon(mp) => !mp.0.is_empty() && mp.0.iter().all(polygon_is_usable),
        Geometry::Rect(r) => {
            let (min, max) = (r.min(), r.max());
            [min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite()) && r.unsigned_area() > 0.0
        }
        _ => false,
    }
}

fn polygon_is_usable(p: &Polygon<f64>) -> bool {
    std::iter::once(p.exterior())
        .chain(p.interiors().iter())
        .all(ring_is_usable)
        && p.unsigned_area() > 0.0
}

fn ring_is_usable(ring: &LineString<f64>) -> bool {
    // 边界数据常有连续重复顶点，先去重再检查
    let ring = ring.remove_repeated_points();
    ring.0.len() >= 4
        && ring.is_closed()
        && ring.0.iter().all(|c| c.x.is_finite() && c.y.is_finite())
        && !ring_self_intersects(&ring)
}

/// Sweep over segments sorted by their left edge; only segments whose x
/// extents overlap are compared. Neighbouring segments share a vertex and
/// are skipped, including the pair joined by the closing vertex.
/// Zero-length segments are dropped first so a repeated vertex does not
/// separate two neighbours.
pub(crate) fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();
    if n < 3 {
        return false;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        min_x(&segments[a])
            .partial_cmp(&min_x(&segments[b]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut active: Vec<usize> = Vec::new();
    for &i in &order {
        let seg = &segments[i];
        let left = min_x(seg);
        active.retain(|&j| max_x(&segments[j]) >= left);
        for &j in &active {
            if adjacent(i, j, n) {
                continue;
            }
            if seg.intersects(&segments[j]) {
                return true;
            }
        }
        active.push(i);
    }
    false
}

fn adjacent(i: usize, j: usize, n: usize) -> bool {
    let d = i.abs_diff(j);
    d <= 1 || d == n - 1
}

fn min_x(l: &Line<f64>) -> f64 {
    l.start.x.min(l.end.x)
}

fn max_x(l: &Line<f64>) -> f64 {
    l.start.x.max(l.end.x)
}
