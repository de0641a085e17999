use anyhow::{bail, Result};
use nalgebra::Point3;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::core::chemistry::InteractionGrid;
use crate::core::domain::{Atom, Composition, Lattice, Structure};
use crate::core::spatial;

pub const DEFAULT_TOL: f64 = 2.0;

/// Parameters of a random dense packing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmorphousParams {
    /// Edge length of the cubic simulation box (Å).
    pub box_scale: f64,
    /// Closest allowed approach between any two atoms (Å).
    #[serde(default = "default_tol")]
    pub tol: f64,
    /// Seed for reproducible packings; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tol() -> f64 {
    DEFAULT_TOL
}

impl AmorphousParams {
    pub fn new(box_scale: f64) -> Self {
        Self { box_scale, tol: DEFAULT_TOL, seed: None }
    }
}

/// Builds an initial structure for a target composition.
pub trait StructureGenerator: Send + Sync {
    fn generate(&self, composition: &Composition, params: &AmorphousParams) -> Result<Structure>;
}

/// Random sequential placement in a periodic cubic cell.
///
/// Each atom gets up to `attempts_per_atom` uniformly random trial positions;
/// a trial is accepted when it keeps at least `tol` from every placed atom
/// under the minimum image convention.
pub struct RandomPacker {
    pub attempts_per_atom: usize,
}

impl Default for RandomPacker {
    fn default() -> Self {
        Self { attempts_per_atom: 1000 }
    }
}

impl StructureGenerator for RandomPacker {
    fn generate(&self, composition: &Composition, params: &AmorphousParams) -> Result<Structure> {
        if composition.is_empty() || composition.values().all(|&n| n == 0) {
            bail!("Composition is empty");
        }
        if !(params.box_scale > 0.0) {
            bail!("box_scale must be positive, got {}", params.box_scale);
        }
        if !(params.tol >= 0.0) {
            bail!("tol must be non-negative, got {}", params.tol);
        }

        let mut rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let lattice = Lattice::cubic(params.box_scale)
            .ok_or_else(|| anyhow::anyhow!("Degenerate box"))?;
        let species: Vec<String> = composition.keys().cloned().collect();
        let grid = InteractionGrid::uniform(species.len(), params.tol);
        let mut s = Structure::new("amorphous", species, lattice);

        // 1. Build the exact multiset of element IDs required.
        let mut elements_to_place = Vec::new();
        for (id, &count) in composition.values().enumerate() {
            elements_to_place.extend(std::iter::repeat(id).take(count));
        }

        // 2. Shuffle to randomize the initial topology.
        elements_to_place.shuffle(&mut rng);

        // 3. Random Sequential Adsorption
        for (placed_count, &elem_id) in elements_to_place.iter().enumerate() {
            let mut placed = false;
            for _ in 0..self.attempts_per_atom {
                let frac = Point3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
                let pos = s.lattice.to_cartesian(&frac);

                let clash = s.atoms.iter().any(|existing| {
                    let limit_sq = grid.get_collision_sq(elem_id, existing.element_id);
                    spatial::distance_sq(&pos, &existing.position, &s.lattice) < limit_sq
                });

                if !clash {
                    s.atoms.push(Atom { element_id: elem_id, position: pos });
                    placed = true;
                    break;
                }
            }
            if !placed {
                bail!(
                    "Could not place atom {} of {} with tol {:.2} Å in a {:.2} Å box",
                    placed_count + 1,
                    elements_to_place.len(),
                    params.tol,
                    params.box_scale
                );
            }
        }

        // POSCAR groups atoms by species.
        s.atoms.sort_by_key(|a| a.element_id);
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn li2o(n: usize) -> Composition {
        let mut c = Composition::new();
        c.insert("Li".into(), 2 * n);
        c.insert("O".into(), n);
        c
    }

    #[test]
    fn packing_respects_composition_and_tolerance() {
        let params = AmorphousParams { box_scale: 10.0, tol: 1.5, seed: Some(7) };
        let s = RandomPacker::default().generate(&li2o(4), &params).unwrap();
        assert_eq!(s.composition(), li2o(4));
        assert!(spatial::min_separation(&s).unwrap() >= 1.5);
        assert!(spatial::check_overlap(&s, &InteractionGrid::uniform(2, 1.5)));
        assert!((s.volume() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn seeded_packings_are_reproducible() {
        let params = AmorphousParams { box_scale: 8.0, tol: 1.0, seed: Some(42) };
        let a = RandomPacker::default().generate(&li2o(3), &params).unwrap();
        let b = RandomPacker::default().generate(&li2o(3), &params).unwrap();
        assert_eq!(a.atoms, b.atoms);
    }

    #[test]
    fn impossible_packing_fails() {
        let params = AmorphousParams { box_scale: 2.0, tol: 2.0, seed: Some(1) };
        let packer = RandomPacker { attempts_per_atom: 50 };
        assert!(packer.generate(&li2o(10), &params).is_err());
    }
}
