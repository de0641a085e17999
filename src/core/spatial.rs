use nalgebra::Point3;
use crate::core::domain::{Lattice, Structure};
use crate::core::chemistry::InteractionGrid;

/// Squared distance between two points under the Minimum Image Convention.
#[inline]
pub fn distance_sq(p1: &Point3<f64>, p2: &Point3<f64>, lattice: &Lattice) -> f64 {
    // Convert delta to fractional coordinates
    let d_cart = p2 - p1;
    let mut d_frac = lattice.inverse * d_cart;

    // Apply MIC: Wrap fractional coordinates to [-0.5, 0.5]
    d_frac.x -= d_frac.x.round();
    d_frac.y -= d_frac.y.round();
    d_frac.z -= d_frac.z.round();

    // Back to Cartesian to get the real distance
    let d_mic = lattice.vectors * d_frac;
    d_mic.norm_squared()
}

/// Returns `true` if no two atoms sit closer than the grid allows.
pub fn check_overlap(structure: &Structure, grid: &InteractionGrid) -> bool {
    let atoms = &structure.atoms;
    let n = atoms.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let a_i = &atoms[i];
            let a_j = &atoms[j];

            let threshold_sq = grid.get_collision_sq(a_i.element_id, a_j.element_id);
            let dist_sq = distance_sq(&a_i.position, &a_j.position, &structure.lattice);

            if dist_sq < threshold_sq {
                return false; // Collision detected
            }
        }
    }
    true
}

/// Shortest interatomic separation under MIC, `None` for fewer than two atoms.
pub fn min_separation(structure: &Structure) -> Option<f64> {
    let atoms = &structure.atoms;
    let mut best: Option<f64> = None;
    for i in 0..atoms.len() {
        for j in (i + 1)..atoms.len() {
            let d = distance_sq(&atoms[i].position, &atoms[j].position, &structure.lattice);
            best = Some(best.map_or(d, |b| b.min(d)));
        }
    }
    best.map(f64::sqrt)
}
