use serde::{Deserialize, Serialize};

/// A flattened 2D matrix storing pre-computed minimum separations.
/// Access is O(1) via `index = i * N + j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionGrid {
    num_species: usize,
    /// Stores the squared closest-approach distance for each species pair.
    /// We store squared values to avoid sqrt() calls during packing.
    collision_matrix_sq: Vec<f64>,
}

impl InteractionGrid {
    /// Every pair shares the same tolerance `tol` (Å).
    pub fn uniform(num_species: usize, tol: f64) -> Self {
        Self {
            num_species,
            collision_matrix_sq: vec![tol * tol; num_species * num_species],
        }
    }

    /// Returns the squared distance limit below which two atoms are considered colliding.
    #[inline(always)]
    pub fn get_collision_sq(&self, id_a: usize, id_b: usize) -> f64 {
        // IDs are validated when the structure is assembled.
        self.collision_matrix_sq[id_a * self.num_species + id_b]
    }
}

/// Standard atomic weights (amu) for the elements commonly found in
/// amorphous oxide/glass/electrolyte simulations.
pub fn atomic_mass(symbol: &str) -> Option<f64> {
    let m = match symbol {
        "H" => 1.008,
        "He" => 4.0026,
        "Li" => 6.94,
        "Be" => 9.0122,
        "B" => 10.81,
        "C" => 12.011,
        "N" => 14.007,
        "O" => 15.999,
        "F" => 18.998,
        "Ne" => 20.180,
        "Na" => 22.990,
        "Mg" => 24.305,
        "Al" => 26.982,
        "Si" => 28.085,
        "P" => 30.974,
        "S" => 32.06,
        "Cl" => 35.45,
        "Ar" => 39.948,
        "K" => 39.098,
        "Ca" => 40.078,
        "Sc" => 44.956,
        "Ti" => 47.867,
        "V" => 50.942,
        "Cr" => 51.996,
        "Mn" => 54.938,
        "Fe" => 55.845,
        "Co" => 58.933,
        "Ni" => 58.693,
        "Cu" => 63.546,
        "Zn" => 65.38,
        "Ga" => 69.723,
        "Ge" => 72.630,
        "As" => 74.922,
        "Se" => 78.971,
        "Br" => 79.904,
        "Rb" => 85.468,
        "Sr" => 87.62,
        "Y" => 88.906,
        "Zr" => 91.224,
        "Nb" => 92.906,
        "Mo" => 95.95,
        "Ag" => 107.87,
        "Cd" => 112.41,
        "In" => 114.82,
        "Sn" => 118.71,
        "Sb" => 121.76,
        "Te" => 127.60,
        "I" => 126.90,
        "Cs" => 132.91,
        "Ba" => 137.33,
        "La" => 138.91,
        "Hf" => 178.49,
        "Ta" => 180.95,
        "W" => 183.84,
        "Pt" => 195.08,
        "Au" => 196.97,
        "Pb" => 207.2,
        "Bi" => 208.98,
        _ => return None,
    };
    Some(m)
}
