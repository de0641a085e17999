//! VASP POSCAR/CONTCAR reading and writing.
//!
//! Files are written in `Direct` coordinates with a unit scale factor and
//! sixteen decimals, so a write/read cycle reproduces the cell volume to
//! floating-point tolerance. Atoms are grouped by species on output, as the
//! format requires.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::core::domain::{Atom, Lattice, Structure};
use crate::error::{Result, WorkflowError};

pub fn read_poscar(path: &Path) -> Result<Structure> {
    let text = fs::read_to_string(path)
        .map_err(|e| WorkflowError::invalid_geometry(path, format!("cannot read file: {}", e)))?;
    parse_poscar(&text).map_err(|reason| WorkflowError::invalid_geometry(path, reason))
}

pub fn write_poscar(structure: &Structure, path: &Path) -> Result<()> {
    fs::write(path, to_poscar_string(structure)).map_err(|e| WorkflowError::io(path, e))
}

/// Parses POSCAR text. Errors are plain reasons; callers attach the path.
pub fn parse_poscar(text: &str) -> std::result::Result<Structure, String> {
    let mut lines = text.lines();
    let mut next_line = |what: &str| {
        lines
            .next()
            .map(str::trim)
            .ok_or_else(|| format!("unexpected end of file while reading {}", what))
    };

    let title = next_line("title")?.to_string();

    let scale: f64 = first_token(next_line("scale factor")?)
        .parse()
        .map_err(|_| "invalid scale factor".to_string())?;
    if scale == 0.0 || !scale.is_finite() {
        return Err("scale factor must be non-zero".into());
    }

    let mut rows = [Vector3::zeros(); 3];
    for row in rows.iter_mut() {
        *row = parse_vector(next_line("lattice vector")?)?;
    }

    // VASP 5 carries a species line; VASP 4 files put symbols in the title.
    let line = next_line("species/counts")?;
    let (species, counts_line) = if parse_counts(line).is_ok() {
        let from_title: Vec<String> = title.split_whitespace().map(str::to_string).collect();
        (from_title, line.to_string())
    } else {
        let names = line.split_whitespace().map(clean_symbol).collect();
        (names, next_line("atom counts")?.to_string())
    };
    let counts = parse_counts(&counts_line)?;
    if species.len() != counts.len() {
        return Err(format!(
            "{} species names for {} count entries",
            species.len(),
            counts.len()
        ));
    }

    let mut mode = next_line("coordinate mode")?;
    if mode.starts_with(['S', 's']) {
        mode = next_line("coordinate mode")?;
    }
    let cartesian = mode.starts_with(['C', 'c', 'K', 'k']);

    let raw = Lattice::new(rows[0], rows[1], rows[2])
        .ok_or_else(|| "lattice vectors are linearly dependent".to_string())?;
    // A negative scale factor is the target cell volume.
    let factor = if scale < 0.0 {
        let v = raw.volume().abs();
        if v == 0.0 {
            return Err("cell volume is zero".into());
        }
        (-scale / v).cbrt()
    } else {
        scale
    };
    let lattice = raw
        .scaled(factor)
        .ok_or_else(|| "scaled lattice is singular".to_string())?;
    if !(lattice.volume() > 0.0) {
        return Err(format!("non-positive cell volume {:.6}", lattice.volume()));
    }

    let mut structure = Structure::new(&title, species, lattice);
    for (element_id, &count) in counts.iter().enumerate() {
        for _ in 0..count {
            let v = parse_vector(next_line("atomic position")?)?;
            if cartesian {
                let position = Point3::from(v * factor);
                structure.atoms.push(Atom { element_id, position });
            } else {
                structure.push_fractional(element_id, Point3::from(v));
            }
        }
    }

    Ok(structure)
}

pub fn to_poscar_string(structure: &Structure) -> String {
    let mut s = String::with_capacity(64 * (structure.atoms.len() + 8));
    let title = if structure.label.is_empty() { "density_finder" } else { &structure.label };
    let _ = writeln!(s, "{}", title.lines().next().unwrap_or("density_finder"));
    s.push_str("1.0\n");

    let v = structure.lattice.vectors;
    for col in 0..3 {
        let _ = writeln!(
            s,
            "  {:22.16} {:22.16} {:22.16}",
            v[(0, col)],
            v[(1, col)],
            v[(2, col)]
        );
    }

    let counts = structure.species_counts();
    let _ = writeln!(s, "  {}", structure.species.join(" "));
    let counts_str: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
    let _ = writeln!(s, "  {}", counts_str.join(" "));

    s.push_str("Direct\n");
    for element_id in 0..structure.species.len() {
        for atom in structure.atoms.iter().filter(|a| a.element_id == element_id) {
            let f = structure.lattice.to_fractional(&atom.position);
            let _ = writeln!(s, "  {:20.16} {:20.16} {:20.16}", f.x, f.y, f.z);
        }
    }
    s
}

fn first_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

fn parse_vector(line: &str) -> std::result::Result<Vector3<f64>, String> {
    let vals: Vec<f64> = line
        .split_whitespace()
        .take(3)
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| format!("invalid vector line '{}'", line))?;
    if vals.len() != 3 {
        return Err(format!("expected three components in '{}'", line));
    }
    Ok(Vector3::new(vals[0], vals[1], vals[2]))
}

fn parse_counts(line: &str) -> std::result::Result<Vec<usize>, String> {
    let counts: Vec<usize> = line
        .split_whitespace()
        .map(|t| t.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| format!("invalid atom counts '{}'", line))?;
    if counts.is_empty() {
        return Err("empty atom counts line".into());
    }
    Ok(counts)
}

// Newer VASP writes POTCAR hashes like "Li_sv/abc123"; keep the element part.
fn clean_symbol(token: &str) -> String {
    token
        .split(['/', '_'])
        .next()
        .unwrap_or(token)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LI2O: &str = "Li2 O1\n\
        1.0\n\
        4.0 0.0 0.0\n\
        0.0 4.0 0.0\n\
        0.0 0.0 4.0\n\
        Li O\n\
        2 1\n\
        Direct\n\
        0.0 0.0 0.0\n\
        0.5 0.5 0.5\n\
        0.25 0.25 0.25\n";

    #[test]
    fn parses_vasp5_direct() {
        let s = parse_poscar(LI2O).unwrap();
        assert_eq!(s.species, vec!["Li", "O"]);
        assert_eq!(s.atoms.len(), 3);
        assert!((s.volume() - 64.0).abs() < 1e-12);
        assert!((s.atoms[1].position.x - 2.0).abs() < 1e-12);
        assert_eq!(s.atoms[2].element_id, 1);
    }

    #[test]
    fn negative_scale_is_target_volume() {
        let text = LI2O.replacen("1.0\n", "-125.0\n", 1);
        let s = parse_poscar(&text).unwrap();
        assert!((s.volume() - 125.0).abs() < 1e-9);
    }

    #[test]
    fn vasp4_takes_species_from_title() {
        let text = LI2O.replace("Li2 O1\n", "Li O\n").replace("Li O\n2 1\n", "2 1\n");
        let s = parse_poscar(&text).unwrap();
        assert_eq!(s.species, vec!["Li", "O"]);
    }

    #[test]
    fn cartesian_and_selective_dynamics() {
        let text = LI2O
            .replace("Direct\n", "Selective dynamics\nCartesian\n")
            .replace("0.5 0.5 0.5\n", "2.0 2.0 2.0 T T F\n")
            .replace("0.25 0.25 0.25\n", "1.0 1.0 1.0 T T T\n");
        let s = parse_poscar(&text).unwrap();
        let f = s.lattice.to_fractional(&s.atoms[1].position);
        assert!((f.x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_left_handed_and_truncated_files() {
        let flipped = LI2O.replace("0.0 0.0 4.0\n", "0.0 0.0 -4.0\n");
        assert!(parse_poscar(&flipped).unwrap_err().contains("non-positive"));

        let truncated: String = LI2O.lines().take(9).collect::<Vec<_>>().join("\n");
        assert!(parse_poscar(&truncated).is_err());
    }

    #[test]
    fn potcar_suffixes_are_stripped() {
        let text = LI2O.replace("Li O\n2 1", "Li_sv/8a1b O/3c2d\n2 1");
        let s = parse_poscar(&text).unwrap();
        assert_eq!(s.species, vec!["Li", "O"]);
    }
}
