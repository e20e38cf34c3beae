use super::validate::is_usable_areal;
use super::Coordinate;
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, Geometry, Intersects, MultiPolygon, Rect,
    RemoveRepeatedPoints,
};
use log::{debug, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Union of a set of areal shapes.
///
/// - empty input (or nothing usable after filtering) gives `None`
/// - a single usable shape is returned as-is
/// - otherwise the union, collapsed to a `Polygon` when it is one piece
///
/// Shapes failing [`is_usable_areal`] are discarded. A union step that
/// panics inside the boolean engine drops the right-hand operand and keeps
/// going, so one bad part never sinks the whole region.
pub fn merge_polygons(shapes: Vec<Geometry<f64>>) -> Option<Geometry<f64>> {
    let total = shapes.len();
    let mut usable: Vec<Geometry<f64>> = shapes.into_iter().filter(is_usable_areal).collect();
    if usable.len() < total {
        debug!("merge: discarded {} unusable shape(s)", total - usable.len());
    }

    match usable.len() {
        0 => None,
        1 => usable.pop(),
        _ => {
            let parts: Vec<MultiPolygon<f64>> =
                usable.into_iter().filter_map(into_multi_polygon).collect();
            let merged = reduce_union(parts, |a, b| a.union(b))?;
            if merged.0.is_empty() || !(merged.unsigned_area() > 0.0) {
                warn!("merge: union produced an empty result");
                return None;
            }
            Some(collapse(merged))
        }
    }
}

/// Pairwise reduction keeps operands similar in size.
fn reduce_union<F>(mut parts: Vec<MultiPolygon<f64>>, op: F) -> Option<MultiPolygon<f64>>
where
    F: Fn(&MultiPolygon<f64>, &MultiPolygon<f64>) -> MultiPolygon<f64>,
{
    while parts.len() > 1 {
        let mut next = Vec::with_capacity(parts.len() / 2 + 1);
        let mut it = parts.into_iter();
        while let Some(left) = it.next() {
            match it.next() {
                Some(right) => next.push(union_step(left, &right, &op)),
                None => next.push(left),
            }
        }
        parts = next;
    }
    parts.pop()
}

fn union_step<F>(left: MultiPolygon<f64>, right: &MultiPolygon<f64>, op: &F) -> MultiPolygon<f64>
where
    F: Fn(&MultiPolygon<f64>, &MultiPolygon<f64>) -> MultiPolygon<f64>,
{
    match catch_unwind(AssertUnwindSafe(|| op(&left, right))) {
        Ok(u) if !u.0.is_empty() => u,
        Ok(_) => {
            warn!("merge: empty union step, keeping left operand");
            left
        }
        Err(_) => {
            warn!("merge: boolean union failed, dropping one operand");
            left
        }
    }
}

fn into_multi_polygon(g: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match g {
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p.remove_repeated_points()])),
        Geometry::MultiPolygon(mp) => Some(mp.remove_repeated_points()),
        Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
        _ => None,
    }
}

fn collapse(mut mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        if let Some(p) = mp.0.pop() {
            return Geometry::Polygon(p);
        }
    }
    Geometry::MultiPolygon(mp)
}

/// Closed containment: a point on an edge or vertex counts as inside.
pub fn point_in_polygon(point: Coordinate, geometry: &Geometry<f64>) -> bool {
    geometry.intersects(&point.to_point())
}

pub fn bounding_box(geometry: &Geometry<f64>) -> Option<Rect<f64>> {
    geometry.bounding_rect()
}

/// Centroid of the shape, used as the default `center_point`.
pub fn representative_point(geometry: &Geometry<f64>) -> Option<Coordinate> {
    geometry
        .centroid()
        .filter(|p| p.x().is_finite() && p.y().is_finite())
        .map(Coordinate::from_point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};
    use proptest::prelude::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1)
        ])
    }

    fn area(g: &Geometry<f64>) -> f64 {
        g.unsigned_area()
    }

    #[test]
    fn empty_input_is_none() {
        assert!(merge_polygons(vec![]).is_none());
    }

    #[test]
    fn singleton_is_returned_unchanged() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        assert_eq!(merge_polygons(vec![a.clone()]), Some(a));
    }

    #[test]
    fn overlapping_shapes_merge_into_one_polygon() {
        let merged = merge_polygons(vec![rect(0.0, 0.0, 2.0, 2.0), rect(1.0, 1.0, 3.0, 3.0)])
            .expect("merged");
        assert!(matches!(merged, Geometry::Polygon(_)));
        assert!((area(&merged) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_shapes_stay_multi() {
        let merged = merge_polygons(vec![rect(0.0, 0.0, 1.0, 1.0), rect(5.0, 5.0, 6.0, 6.0)])
            .expect("merged");
        match merged {
            Geometry::MultiPolygon(mp) => assert_eq!(mp.0.len(), 2),
            other => panic!("expected multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn degenerate_inputs_are_discarded_not_fatal() {
        let bow = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0)
        ]);
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 9.0, y: 9.0)]);
        let good = rect(10.0, 10.0, 11.0, 11.0);
        let merged = merge_polygons(vec![bow, line, good.clone()]).expect("merged");
        assert_eq!(merged, good);

        let only_bad = rect(0.0, 0.0, 0.0, 0.0);
        assert!(merge_polygons(vec![only_bad]).is_none());
    }

    #[test]
    fn repeated_vertices_merge_like_a_plain_square() {
        let dup = Geometry::Polygon(geo::Polygon::new(
            geo::LineString::from(vec![
                (0.0, 0.0),
                (1.0, 0.0),
                (1.0, 0.0),
                (1.0, 1.0),
                (0.0, 1.0),
                (0.0, 0.0),
            ]),
            vec![],
        ));
        assert_eq!(merge_polygons(vec![dup.clone()]), Some(dup.clone()));

        let merged = merge_polygons(vec![dup, rect(1.0, 0.0, 2.0, 1.0)]).expect("merged");
        assert!((area(&merged) - 2.0).abs() < 1e-9);
        assert!(point_in_polygon(Coordinate::new(0.5, 0.5), &merged));
    }

    fn multi(g: Geometry<f64>) -> MultiPolygon<f64> {
        into_multi_polygon(g).unwrap()
    }

    fn far_right(mp: &MultiPolygon<f64>) -> bool {
        mp.bounding_rect().is_some_and(|r| r.min().x >= 100.0)
    }

    #[test]
    fn panicking_union_step_keeps_the_rest_of_the_batch() {
        let parts = vec![
            multi(rect(0.0, 0.0, 2.0, 2.0)),
            multi(rect(100.0, 0.0, 101.0, 1.0)),
            multi(rect(1.0, 1.0, 3.0, 3.0)),
            multi(rect(2.5, 0.5, 4.0, 1.5)),
        ];
        let merged = reduce_union(parts, |a, b| {
            if far_right(b) {
                panic!("boolean engine rejected operand");
            }
            a.union(b)
        })
        .expect("merged");

        // 出错的 rect(100..) 被丢弃
        assert!(merged.bounding_rect().unwrap().max().x < 100.0);
        let g = Geometry::MultiPolygon(merged);
        assert!(point_in_polygon(Coordinate::new(2.9, 2.9), &g));
        assert!(point_in_polygon(Coordinate::new(1.0, 3.5), &g));
    }

    #[test]
    fn empty_union_step_keeps_left_operand() {
        let left = multi(rect(0.0, 0.0, 1.0, 1.0));
        let right = multi(rect(5.0, 5.0, 6.0, 6.0));
        let kept = union_step(left.clone(), &right, &|_: &MultiPolygon<f64>, _: &MultiPolygon<f64>| {
            MultiPolygon(vec![])
        });
        assert_eq!(kept, left);

        let merged = reduce_union(vec![left.clone(), right], |_, _| MultiPolygon(vec![]));
        assert_eq!(merged, Some(left));
    }

    #[test]
    fn union_grouping_does_not_matter() {
        let a = rect(0.0, 0.0, 2.0, 2.0);
        let b = rect(1.0, 1.0, 3.0, 3.0);
        let c = rect(2.5, 0.5, 4.0, 1.5);

        let ab = merge_polygons(vec![a.clone(), b.clone()]).unwrap();
        let ab_c = merge_polygons(vec![ab, c.clone()]).unwrap();
        let abc = merge_polygons(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let cba = merge_polygons(vec![c, b, a]).unwrap();

        assert!((area(&ab_c) - area(&abc)).abs() < 1e-9);
        assert!((area(&cba) - area(&abc)).abs() < 1e-9);
        for probe in [(0.5, 0.5), (2.9, 2.9), (3.5, 1.0)] {
            let p = Coordinate::new(probe.1, probe.0);
            assert!(point_in_polygon(p, &abc));
            assert!(point_in_polygon(p, &ab_c));
        }
    }

    #[test]
    fn boundary_points_are_contained() {
        let sq = rect(0.0, 0.0, 1.0, 1.0);
        assert!(point_in_polygon(Coordinate::new(0.5, 0.5), &sq));
        assert!(point_in_polygon(Coordinate::new(0.0, 0.5), &sq));
        assert!(point_in_polygon(Coordinate::new(1.0, 1.0), &sq));
        assert!(!point_in_polygon(Coordinate::new(1.5, 0.5), &sq));
    }

    #[test]
    fn hole_excludes_points() {
        let donut = Geometry::Polygon(geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![geo::LineString::from(vec![
                (1.0, 1.0),
                (1.0, 3.0),
                (3.0, 3.0),
                (3.0, 1.0),
                (1.0, 1.0),
            ])],
        ));
        assert!(!point_in_polygon(Coordinate::new(2.0, 2.0), &donut));
        assert!(point_in_polygon(Coordinate::new(0.5, 0.5), &donut));
    }

    #[test]
    fn representative_point_is_centroid() {
        let c = representative_point(&rect(0.0, 0.0, 2.0, 4.0)).unwrap();
        assert!((c.lon - 1.0).abs() < 1e-12);
        assert!((c.lat - 2.0).abs() < 1e-12);
    }

    proptest! {
        // integer grid corners keep the boolean engine away from
        // near-coincident floating edges
        #[test]
        fn union_area_is_order_independent(
            boxes in prop::collection::vec((0i32..20, 0i32..20, 1i32..6, 1i32..6), 2..5)
        ) {
            let shapes: Vec<Geometry<f64>> = boxes
                .iter()
                .map(|&(x, y, w, h)| rect(x as f64, y as f64, (x + w) as f64, (y + h) as f64))
                .collect();
            let mut reversed = shapes.clone();
            reversed.reverse();

            let forward = merge_polygons(shapes.clone()).unwrap();
            let backward = merge_polygons(reversed).unwrap();
            prop_assert!((area(&forward) - area(&backward)).abs() < 1e-6);

            let largest = shapes.iter().map(area).fold(0.0, f64::max);
            let sum: f64 = shapes.iter().map(area).sum();
            prop_assert!(area(&forward) + 1e-6 >= largest);
            prop_assert!(area(&forward) <= sum + 1e-6);
        }
    }
}
