use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use imageproc::rect::Rect;

/// Fraction of a contour's perimeter used as the polygon approximation
/// tolerance when testing for quadrilaterals.
pub const QUAD_APPROXIMATION_TOLERANCE: f64 = 0.02;

pub fn distance_from_point_to_point(p1: &Point<f32>, p2: &Point<f32>) -> f32 {
    ((p1.x - p2.x).powf(2.0) + (p1.y - p2.y).powf(2.0)).sqrt()
}

pub fn center_of_rect(rect: &Rect) -> Point<f32> {
    Point::new(
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

/// Gets the smallest axis-aligned rect containing every point, counting
/// pixels inclusively.
pub fn get_contour_bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

/// Smallest rect containing both rects.
pub fn union_of_rects(a: &Rect, b: &Rect) -> Rect {
    let left = a.left().min(b.left());
    let top = a.top().min(b.top());
    let right = a.right().max(b.right());
    let bottom = a.bottom().max(b.bottom());
    Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32)
}

/// Area of a simple polygon using the shoelace formula. The polygon is
/// treated as closed; the first point need not be repeated.
pub fn polygon_area(points: &[Point<i32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum::<i64>();
    twice_area.abs() as f32 / 2.0
}

/// Approximates a closed contour with a polygon and collapses vertices that
/// lie within `epsilon` of their predecessor, including the wrap-around
/// from the last vertex back to the first. Vertices within `epsilon` of the
/// segment joining their neighbours are then dropped, so the result does not
/// depend on where the contour trace started.
pub fn simplify_closed_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }

    let approx = approximate_polygon_dp(points, epsilon, true);
    let mut simplified: Vec<Point<i32>> = Vec::with_capacity(approx.len());
    for point in approx {
        let is_close = simplified
            .last()
            .map_or(false, |last| point_distance(last, &point) <= epsilon);
        if !is_close {
            simplified.push(point);
        }
    }

    while simplified.len() > 1 {
        let first = simplified[0];
        let last = simplified[simplified.len() - 1];
        if point_distance(&first, &last) <= epsilon {
            simplified.pop();
        } else {
            break;
        }
    }

    drop_collinear_vertices(&mut simplified, epsilon);
    simplified
}

/// Repeatedly removes the vertex closest to the segment joining its
/// neighbours while that distance is within `epsilon`.
fn drop_collinear_vertices(polygon: &mut Vec<Point<i32>>, epsilon: f64) {
    while polygon.len() > 3 {
        let n = polygon.len();
        let flattest = (0..n)
            .map(|i| {
                let prev = &polygon[(i + n - 1) % n];
                let next = &polygon[(i + 1) % n];
                (i, distance_to_segment(&polygon[i], prev, next))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match flattest {
            Some((i, distance)) if distance <= epsilon => {
                polygon.remove(i);
            }
            _ => break,
        }
    }
}

/// Returns the four vertices of the contour if it approximates a
/// quadrilateral.
pub fn approximate_quadrilateral(points: &[Point<i32>]) -> Option<[Point<i32>; 4]> {
    if points.len() < 4 {
        return None;
    }
    let perimeter = arc_length(points, true);
    let polygon = simplify_closed_polygon(points, QUAD_APPROXIMATION_TOLERANCE * perimeter);
    match polygon.as_slice() {
        [a, b, c, d] => Some([*a, *b, *c, *d]),
        _ => None,
    }
}

/// Orders quadrilateral corners as top-left, top-right, bottom-right,
/// bottom-left.
pub fn order_corners(corners: &[Point<i32>; 4]) -> [Point<f32>; 4] {
    let as_f32 = |p: &Point<i32>| Point::new(p.x as f32, p.y as f32);
    let by_key = |key: fn(&Point<i32>) -> i32, largest: bool| {
        let iter = corners.iter();
        let chosen = if largest {
            iter.max_by_key(|p| key(p))
        } else {
            iter.min_by_key(|p| key(p))
        };
        chosen.map(as_f32).unwrap_or_else(|| as_f32(&corners[0]))
    };

    let top_left = by_key(|p| p.x + p.y, false);
    let bottom_right = by_key(|p| p.x + p.y, true);
    let top_right = by_key(|p| p.y - p.x, false);
    let bottom_left = by_key(|p| p.y - p.x, true);
    [top_left, top_right, bottom_right, bottom_left]
}

fn point_distance(a: &Point<i32>, b: &Point<i32>) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    (dx * dx + dy * dy).sqrt()
}

fn distance_to_segment(p: &Point<i32>, a: &Point<i32>, b: &Point<i32>) -> f64 {
    let (abx, aby) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let (apx, apy) = ((p.x - a.x) as f64, (p.y - a.y) as f64);
    let length_squared = abx * abx + aby * aby;
    if length_squared == 0.0 {
        return point_distance(p, a);
    }
    let t = ((apx * abx + apy * aby) / length_squared).clamp(0.0, 1.0);
    let (dx, dy) = (apx - t * abx, apy - t * aby);
    (dx * dx + dy * dy).sqrt()
}

/// Determines whether two rects are close enough in position and size to be
/// the same physical rectangle.
fn rects_are_similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps * (a.width().min(b.width()) + a.height().min(b.height())) as f32 * 0.5;
    let close = |p: i32, q: i32| ((p - q).abs() as f32) <= delta;
    close(a.left(), b.left())
        && close(a.top(), b.top())
        && close(a.left() + a.width() as i32, b.left() + b.width() as i32)
        && close(a.top() + a.height() as i32, b.top() + b.height() as i32)
}

fn find_root(parents: &mut [usize], mut i: usize) -> usize {
    while parents[i] != i {
        parents[i] = parents[parents[i]];
        i = parents[i];
    }
    i
}

/// Clusters near-duplicate rects and replaces each cluster with its mean.
///
/// Clusters with `group_threshold` or fewer members are discarded, and a
/// cluster lying inside a heavier one is dropped. A non-positive
/// `group_threshold` returns the input unchanged.
pub fn group_rectangles(rects: &[Rect], group_threshold: i32, eps: f32) -> Vec<Rect> {
    if group_threshold <= 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let mut parents = (0..rects.len()).collect::<Vec<usize>>();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects_are_similar(&rects[i], &rects[j], eps) {
                let root_i = find_root(&mut parents, i);
                let root_j = find_root(&mut parents, j);
                if root_i != root_j {
                    parents[root_j] = root_i;
                }
            }
        }
    }

    // (sum of left, top, width, height, member count) per cluster, in order
    // of first appearance
    let mut clusters: Vec<(usize, [i64; 4], i32)> = Vec::new();
    for (i, rect) in rects.iter().enumerate() {
        let root = find_root(&mut parents, i);
        let sums = [
            rect.left() as i64,
            rect.top() as i64,
            rect.width() as i64,
            rect.height() as i64,
        ];
        match clusters.iter_mut().find(|(r, _, _)| *r == root) {
            Some((_, totals, count)) => {
                for (total, value) in totals.iter_mut().zip(sums) {
                    *total += value;
                }
                *count += 1;
            }
            None => clusters.push((root, sums, 1)),
        }
    }

    let averaged = clusters
        .iter()
        .map(|(_, totals, count)| {
            let mean = |total: i64| (total as f64 / *count as f64).round() as i64;
            let rect = Rect::at(mean(totals[0]) as i32, mean(totals[1]) as i32)
                .of_size(mean(totals[2]).max(1) as u32, mean(totals[3]).max(1) as u32);
            (rect, *count)
        })
        .collect::<Vec<(Rect, i32)>>();

    averaged
        .iter()
        .enumerate()
        .filter(|(i, (rect, count))| {
            if *count <= group_threshold {
                return false;
            }
            !averaged.iter().enumerate().any(|(j, (other, other_count))| {
                if *i == j || *other_count <= group_threshold {
                    return false;
                }
                let dx = (other.width() as f32 * eps).round() as i32;
                let dy = (other.height() as f32 * eps).round() as i32;
                let inside = rect.left() >= other.left() - dx
                    && rect.top() >= other.top() - dy
                    && rect.left() + rect.width() as i32
                        <= other.left() + other.width() as i32 + dx
                    && rect.top() + rect.height() as i32
                        <= other.top() + other.height() as i32 + dy;
                inside && (*other_count > (*count).max(3) || *count < 3)
            })
        })
        .map(|(_, (rect, _))| *rect)
        .collect()
}
