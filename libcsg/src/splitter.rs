use bsp::poly::{PlaneSide, PolyFlags, Polygon};

use crate::config::Optimization;

/// Split penalty for cutting through a zone portal.
const PORTAL_SPLIT_COST: i32 = 16;

fn is_deferred(poly: &Polygon) -> bool {
    poly.flags.intersects(PolyFlags::ADD_LAST) && !poly.flags.contains(PolyFlags::PORTAL)
}

/// Picks the splitter for `pool`, returning its index.
///
/// Candidates are sampled with the stride of `optimization`. Each one is scored as
/// `(100 - balance) * splits + balance * |front - back|` over the sampled polygons,
/// and portal candidates get `portal_bias` percent of their split cost back. The
/// lowest score wins; the earliest candidate wins ties.
pub fn find_best_split(
    pool: &[Polygon],
    optimization: Optimization,
    balance: u8,
    portal_bias: u8,
) -> Option<usize> {
    match pool.len() {
        0 => return None,
        1 => return (!pool[0].is_degenerate()).then_some(0),
        _ => {}
    }

    let stride = optimization.stride(pool.len());
    let balance = balance as f64;
    let portal_bias = portal_bias as f64 / 100.0;
    let all_deferred = pool
        .iter()
        .all(|p| p.flags.intersects(PolyFlags::ADD_LAST));

    let mut best: Option<(usize, f64)> = None;
    for window in (0..pool.len()).step_by(stride) {
        let window_end = (window + stride).min(pool.len());
        let candidate = (window..window_end)
            .find(|&i| !pool[i].is_degenerate() && (all_deferred || !is_deferred(&pool[i])));
        let Some(index) = candidate else {
            continue;
        };

        let splitter = &pool[index];
        let (mut front, mut back, mut splits) = (0i32, 0i32, 0i32);
        for (j, other) in pool.iter().enumerate().step_by(stride) {
            if j == index || other.vertices.is_empty() {
                continue;
            }
            match other.classify(&splitter.vertices[0], &splitter.normal, false) {
                PlaneSide::Coplanar => {}
                PlaneSide::Front => front += 1,
                PlaneSide::Back => back += 1,
                PlaneSide::Split => {
                    splits += if other.flags.contains(PolyFlags::PORTAL) {
                        PORTAL_SPLIT_COST
                    } else {
                        1
                    }
                }
            }
        }

        let mut score = (100.0 - balance) * splits as f64 + balance * (front - back).abs() as f64;
        if splitter.flags.contains(PolyFlags::PORTAL) {
            score -= (100.0 - balance) * splits as f64 * portal_bias;
        }

        if best.map_or(true, |(_, best_score)| score < best_score) {
            best = Some((index, score));
        }
    }

    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsp::types::Real;
    use cgmath::vec3;

    fn quad_z(x: Real, y: Real, z: Real) -> Polygon {
        Polygon::from_vertices(vec![
            vec3(x, y, z),
            vec3(x + 1.0, y, z),
            vec3(x + 1.0, y + 1.0, z),
            vec3(x, y + 1.0, z),
        ])
    }

    #[test]
    fn orthogonal_splitter_beats_coplanars() {
        // Four quads on z = 0 spread along x, plus a wall at x = 10 that touches none.
        let mut pool: Vec<Polygon> = (0..4).map(|i| quad_z(i as Real * 2.0, 0.0, 0.0)).collect();
        pool.push(Polygon::from_vertices(vec![
            vec3(10.0, 0.0, -1.0),
            vec3(10.0, 1.0, -1.0),
            vec3(10.0, 1.0, 1.0),
            vec3(10.0, 0.0, 1.0),
        ]));

        // Each quad as a splitter sees three coplanars and cuts the wall.
        for _ in 0..3 {
            assert_eq!(find_best_split(&pool, Optimization::Optimal, 15, 70), Some(4));
        }
    }

    #[test]
    fn deferred_polygons_are_skipped() {
        let mut first = quad_z(0.0, 0.0, 0.0);
        first.flags |= PolyFlags::SEMISOLID;
        let second = quad_z(0.0, 0.0, 1.0);
        assert_eq!(find_best_split(&[first.clone(), second], Optimization::Optimal, 0, 0), Some(1));

        let mut also_deferred = quad_z(0.0, 0.0, 1.0);
        also_deferred.flags |= PolyFlags::NOT_SOLID;
        assert_eq!(find_best_split(&[first, also_deferred], Optimization::Optimal, 0, 0), Some(0));
    }

    #[test]
    fn single_and_empty_pools() {
        assert_eq!(find_best_split(&[], Optimization::Lame, 0, 0), None);
        assert_eq!(find_best_split(&[quad_z(0.0, 0.0, 0.0)], Optimization::Lame, 0, 0), Some(0));
    }

    #[test]
    fn degenerate_polygons_never_split() {
        let collapsed = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)]);
        let line = Polygon::from_vertices(vec![vec3(0.0, 0.0, 0.0), vec3(0.1, 0.0, 0.0), vec3(0.2, 0.0, 0.0)]);
        let pool = [collapsed.clone(), line.clone(), quad_z(0.0, 0.0, 0.0)];
        assert_eq!(find_best_split(&pool, Optimization::Optimal, 15, 70), Some(2));
        assert_eq!(find_best_split(&[collapsed.clone()], Optimization::Optimal, 15, 70), None);
        assert_eq!(find_best_split(&[collapsed, line], Optimization::Optimal, 15, 70), None);
    }
}
