use std::collections::BTreeMap;

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::chemistry;

/// Element symbol -> integer atom count, e.g. `{"Li": 10, "O": 75}`.
pub type Composition = BTreeMap<String, usize>;

/// amu/Å^3 -> g/cm^3
const AMU_PER_A3_TO_G_PER_CM3: f64 = 1.660_539_066_60;

/// A single atom instance in a periodic cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub element_id: usize, // Index into Structure.species
    pub position: Point3<f64>, // Cartesian, Å
}

/// Periodic cell. Columns of `vectors` are a, b, c.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub vectors: Matrix3<f64>,
    pub inverse: Matrix3<f64>, // Precomputed for fractional conversion
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let vectors = Matrix3::from_columns(&[a, b, c]);
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }

    pub fn cubic(edge: f64) -> Option<Self> {
        Self::new(
            Vector3::new(edge, 0.0, 0.0),
            Vector3::new(0.0, edge, 0.0),
            Vector3::new(0.0, 0.0, edge),
        )
    }

    /// Signed cell volume (triple product a·(b×c)), Å^3.
    pub fn volume(&self) -> f64 {
        self.vectors.determinant()
    }

    pub fn to_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        let v = self.inverse * p.coords;
        Point3::from(v)
    }

    pub fn to_cartesian(&self, p: &Point3<f64>) -> Point3<f64> {
        let v = self.vectors * p.coords;
        Point3::from(v)
    }

    /// Uniform dilation of all three vectors by `factor`.
    pub fn scaled(&self, factor: f64) -> Option<Self> {
        let vectors = self.vectors * factor;
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }
}

/// A periodic atomic structure: the unit carried between simulation cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    pub id: Uuid,
    pub label: String,
    /// Ordered element symbols; `Atom::element_id` indexes into this list.
    pub species: Vec<String>,
    pub atoms: Vec<Atom>,
    pub lattice: Lattice,
}

impl Structure {
    pub fn new(label: &str, species: Vec<String>, lattice: Lattice) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            species,
            atoms: Vec::new(),
            lattice,
        }
    }

    pub fn push_fractional(&mut self, element_id: usize, frac: Point3<f64>) {
        let position = self.lattice.to_cartesian(&frac);
        self.atoms.push(Atom { element_id, position });
    }

    pub fn volume(&self) -> f64 {
        self.lattice.volume()
    }

    pub fn fractional_coords(&self) -> Vec<Point3<f64>> {
        self.atoms
            .iter()
            .map(|a| self.lattice.to_fractional(&a.position))
            .collect()
    }

    /// Isotropically rescales the cell to `new_volume`, holding fractional
    /// coordinates fixed. Returns `None` if the target is not a positive volume.
    pub fn scale_to_volume(&mut self, new_volume: f64) -> Option<()> {
        let old = self.volume();
        if !(new_volume > 0.0) || !(old > 0.0) {
            return None;
        }
        let factor = (new_volume / old).cbrt();
        let frac = self.fractional_coords();
        self.lattice = self.lattice.scaled(factor)?;
        for (atom, f) in self.atoms.iter_mut().zip(frac.iter()) {
            atom.position = self.lattice.to_cartesian(f);
        }
        Some(())
    }

    /// Atom count per element symbol.
    pub fn composition(&self) -> Composition {
        let mut counts = Composition::new();
        for atom in &self.atoms {
            if let Some(sym) = self.species.get(atom.element_id) {
                *counts.entry(sym.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Counts per species, in `species` order (POSCAR layout).
    pub fn species_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.species.len()];
        for atom in &self.atoms {
            if atom.element_id < counts.len() {
                counts[atom.element_id] += 1;
            }
        }
        counts
    }

    /// Formula with counts divided by their greatest common divisor, e.g. "Li2O".
    pub fn reduced_formula(&self) -> String {
        let comp = self.composition();
        let divisor = comp.values().copied().fold(0, gcd).max(1);
        comp.iter()
            .map(|(sym, &n)| match n / divisor {
                1 => sym.clone(),
                k => format!("{}{}", sym, k),
            })
            .collect()
    }

    /// Mass density in g/cm^3, or `None` if an element has no tabulated mass.
    pub fn density(&self) -> Option<f64> {
        let mut mass = 0.0;
        for atom in &self.atoms {
            let sym = self.species.get(atom.element_id)?;
            mass += chemistry::atomic_mass(sym)?;
        }
        let volume = self.volume();
        if volume <= 0.0 {
            return None;
        }
        Some(mass * AMU_PER_A3_TO_G_PER_CM3 / volume)
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}
