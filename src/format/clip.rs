//! Rectangle clipping in tile space.
//!
//! Vector tile geometries are cut to the tile plus a buffer before they are
//! quantised, so the integer grid only ever sees coordinates near the tile.

use geo::{Coord, Rect};

/// The clip rectangle for a tile of `extent` units with `buffer` units on each side.
pub fn buffered_tile(extent: f64, buffer: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: -buffer,
            y: -buffer,
        },
        Coord {
            x: extent + buffer,
            y: extent + buffer,
        },
    )
}

fn contains(rect: &Rect<f64>, c: &Coord<f64>) -> bool {
    c.x >= rect.min().x && c.x <= rect.max().x && c.y >= rect.min().y && c.y <= rect.max().y
}

/// Points inside the rectangle, boundary included.
pub fn clip_points(coords: &[Coord<f64>], rect: &Rect<f64>) -> Vec<Coord<f64>> {
    coords.iter().copied().filter(|c| contains(rect, c)).collect()
}

/// Liang-Barsky clip of the segment `a`-`b`.
fn clip_segment(a: Coord<f64>, b: Coord<f64>, rect: &Rect<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
    let d = b - a;
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;
    let edges = [
        (-d.x, a.x - rect.min().x),
        (d.x, rect.max().x - a.x),
        (-d.y, a.y - rect.min().y),
        (d.y, rect.max().y - a.y),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let start = if t0 > 0.0 { a + d * t0 } else { a };
    let end = if t1 < 1.0 { a + d * t1 } else { b };
    Some((start, end))
}

/// Clip a line string, splitting it wherever it leaves the rectangle.
///
/// Parts with fewer than two vertices are dropped.
pub fn clip_line(coords: &[Coord<f64>], rect: &Rect<f64>) -> Vec<Vec<Coord<f64>>> {
    let mut parts = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();

    for pair in coords.windows(2) {
        let Some((start, end)) = clip_segment(pair[0], pair[1], rect) else {
            flush(&mut parts, &mut current);
            continue;
        };
        if current.last() != Some(&start) {
            flush(&mut parts, &mut current);
            current.push(start);
        }
        current.push(end);
        if end != pair[1] {
            flush(&mut parts, &mut current);
        }
    }
    flush(&mut parts, &mut current);
    parts
}

fn flush(parts: &mut Vec<Vec<Coord<f64>>>, current: &mut Vec<Coord<f64>>) {
    if current.len() > 1 {
        parts.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Sutherland-Hodgman clip of a polygon ring. The result is not closed.
pub fn clip_ring(coords: &[Coord<f64>], rect: &Rect<f64>) -> Vec<Coord<f64>> {
    let mut ring: Vec<Coord<f64>> = coords.to_vec();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    let (min, max) = (rect.min(), rect.max());

    ring = clip_against_edge(&ring, |c| c.x >= min.x, |a, b| at_x(a, b, min.x));
    ring = clip_against_edge(&ring, |c| c.x <= max.x, |a, b| at_x(a, b, max.x));
    ring = clip_against_edge(&ring, |c| c.y >= min.y, |a, b| at_y(a, b, min.y));
    clip_against_edge(&ring, |c| c.y <= max.y, |a, b| at_y(a, b, max.y))
}

fn at_x(a: &Coord<f64>, b: &Coord<f64>, x: f64) -> Coord<f64> {
    let t = (x - a.x) / (b.x - a.x);
    Coord {
        x,
        y: a.y + t * (b.y - a.y),
    }
}

fn at_y(a: &Coord<f64>, b: &Coord<f64>, y: f64) -> Coord<f64> {
    let t = (y - a.y) / (b.y - a.y);
    Coord {
        x: a.x + t * (b.x - a.x),
        y,
    }
}

fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    let mut output = Vec::with_capacity(vertices.len());
    for (i, current) in vertices.iter().enumerate() {
        let next = &vertices[(i + 1) % vertices.len()];
        match (inside(current), inside(next)) {
            (true, true) => output.push(*current),
            (true, false) => {
                output.push(*current);
                output.push(intersect(current, next));
            }
            (false, true) => output.push(intersect(current, next)),
            (false, false) => {}
        }
    }
    output
}
