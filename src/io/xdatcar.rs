use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::core::domain::{Lattice, Structure};
use crate::error::{Result, WorkflowError};

/// One recorded configuration of a trajectory.
#[derive(Debug, Clone)]
pub struct Frame {
    pub lattice: Lattice,
    pub fractional: Vec<Point3<f64>>,
}

/// An MD trajectory with a fixed atom ordering.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub species: Vec<String>,
    pub counts: Vec<usize>,
    pub frames: Vec<Frame>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Materializes frame `index` as an independent structure.
    pub fn structure_at(&self, index: usize) -> Option<Structure> {
        let frame = self.frames.get(index)?;
        let mut s = Structure::new(&format!("frame_{}", index), self.species.clone(), frame.lattice.clone());
        let mut coords = frame.fractional.iter();
        for (element_id, &count) in self.counts.iter().enumerate() {
            for _ in 0..count {
                s.push_fractional(element_id, *coords.next()?);
            }
        }
        Some(s)
    }
}

pub fn read_xdatcar(path: &Path) -> Result<Trajectory> {
    if !path.exists() {
        return Err(WorkflowError::missing_output(path, "trajectory file does not exist"));
    }
    let text = fs::read_to_string(path)
        .map_err(|e| WorkflowError::missing_output(path, format!("cannot read file: {}", e)))?;
    parse_xdatcar(&text).map_err(|reason| WorkflowError::invalid_geometry(path, reason))
}

struct Header {
    lattice: Lattice,
    species: Vec<String>,
    counts: Vec<usize>,
}

/// Parses XDATCAR text. Variable-cell files repeat the header before each
/// configuration; the latest header applies to the frames that follow it.
pub fn parse_xdatcar(text: &str) -> std::result::Result<Trajectory, String> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut pos = 0;

    let header = parse_header(&lines, &mut pos)?;
    let natoms: usize = header.counts.iter().sum();
    let mut traj = Trajectory {
        species: header.species,
        counts: header.counts,
        frames: Vec::new(),
    };
    let mut lattice = header.lattice;

    while pos < lines.len() {
        let line = lines[pos];
        if line.is_empty() {
            pos += 1;
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("configuration") {
            pos += 1;
            let cartesian = lower.starts_with('c') || lower.starts_with('k');
            let mut fractional = Vec::with_capacity(natoms);
            for _ in 0..natoms {
                let row = lines
                    .get(pos)
                    .ok_or_else(|| format!("truncated frame {}", traj.frames.len() + 1))?;
                let v = parse_vector(row)?;
                let p = Point3::from(v);
                fractional.push(if cartesian { lattice.to_fractional(&p) } else { p });
                pos += 1;
            }
            traj.frames.push(Frame {
                lattice: lattice.clone(),
                fractional,
            });
        } else {
            let repeated = parse_header(&lines, &mut pos)?;
            if repeated.counts != traj.counts {
                return Err("atom counts change between frames".into());
            }
            lattice = repeated.lattice;
        }
    }

    Ok(traj)
}

fn take<'a>(lines: &[&'a str], pos: &mut usize, what: &str) -> std::result::Result<&'a str, String> {
    let l = lines
        .get(*pos)
        .copied()
        .ok_or_else(|| format!("unexpected end of file while reading {}", what))?;
    *pos += 1;
    Ok(l)
}

fn parse_header(lines: &[&str], pos: &mut usize) -> std::result::Result<Header, String> {
    let mut next = |what: &str| take(lines, pos, what);

    let _title = next("title")?;
    let scale: f64 = next("scale factor")?
        .split_whitespace()
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| "invalid scale factor".to_string())?;
    let a = parse_vector(next("lattice vector")?)? * scale;
    let b = parse_vector(next("lattice vector")?)? * scale;
    let c = parse_vector(next("lattice vector")?)? * scale;
    let species: Vec<String> = next("species")?.split_whitespace().map(str::to_string).collect();
    let counts: Vec<usize> = next("atom counts")?
        .split_whitespace()
        .map(|t| t.parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| "invalid atom counts".to_string())?;
    if species.len() != counts.len() {
        return Err("species and count lines disagree".into());
    }
    let lattice = Lattice::new(a, b, c).ok_or_else(|| "singular lattice".to_string())?;
    Ok(Header { lattice, species, counts })
}

fn parse_vector(line: &str) -> std::result::Result<Vector3<f64>, String> {
    let mut it = line.split_whitespace().map(str::parse::<f64>);
    match (it.next(), it.next(), it.next()) {
        (Some(Ok(x)), Some(Ok(y)), Some(Ok(z))) => Ok(Vector3::new(x, y, z)),
        _ => Err(format!("invalid coordinate line '{}'", line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(frames: usize) -> String {
        let mut s = String::from("LiO\n1.0\n5.0 0 0\n0 5.0 0\n0 0 5.0\nLi O\n1 1\n");
        for i in 0..frames {
            s.push_str(&format!("Direct configuration= {:>5}\n", i + 1));
            s.push_str(&format!("0.{} 0.0 0.0\n0.5 0.5 0.5\n", i));
        }
        s
    }

    #[test]
    fn reads_constant_cell_frames() {
        let traj = parse_xdatcar(&sample_text(4)).unwrap();
        assert_eq!(traj.len(), 4);
        let s = traj.structure_at(3).unwrap();
        assert_eq!(s.atoms.len(), 2);
        assert!((s.atoms[0].position.x - 1.5).abs() < 1e-12);
        assert!((s.volume() - 125.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_headers_update_the_cell() {
        let mut text = sample_text(1);
        text.push_str("LiO\n1.0\n6.0 0 0\n0 6.0 0\n0 0 6.0\nLi O\n1 1\n");
        text.push_str("Direct configuration=     2\n0.1 0.1 0.1\n0.6 0.6 0.6\n");
        let traj = parse_xdatcar(&text).unwrap();
        assert_eq!(traj.len(), 2);
        assert!((traj.frames[1].lattice.volume() - 216.0).abs() < 1e-9);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut text = sample_text(1);
        text.push_str("Direct configuration=     2\n0.1 0.1 0.1\n");
        assert!(parse_xdatcar(&text).is_err());
    }
}
