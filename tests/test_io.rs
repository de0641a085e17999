use nalgebra::{Point3, Vector3};
use proptest::prelude::*;

use density_finder::core::domain::{Lattice, Structure};
use density_finder::io::{outcar, poscar, xdatcar};
use density_finder::workflow::pressure::PressureSampler;
use density_finder::workflow::rescale::{RescaleParams, VolumeRescaler};

use crate::common::{li2o_cube, write_outcar};

mod common;

fn triclinic(a: f64, b: f64, c: f64, shear: f64) -> Structure {
    let lattice = Lattice::new(
        Vector3::new(a, 0.0, 0.0),
        Vector3::new(shear, b, 0.0),
        Vector3::new(shear, shear, c),
    )
    .unwrap();
    let mut s = Structure::new("Li2O", vec!["Li".into(), "O".into()], lattice);
    s.push_fractional(1, Point3::new(0.1, 0.2, 0.3));
    s.push_fractional(0, Point3::new(0.5, 0.5, 0.5));
    s.push_fractional(0, Point3::new(0.9, 0.1, 0.7));
    s
}

#[test]
fn poscar_groups_species_on_write() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("POSCAR");
    poscar::write_poscar(&triclinic(5.0, 6.0, 7.0, 0.5), &path).unwrap();

    let back = poscar::read_poscar(&path).unwrap();
    assert_eq!(back.species_counts(), vec![2, 1]);
    assert_eq!(back.atoms[2].element_id, 1);
    assert_eq!(back.reduced_formula(), "Li2O");
}

#[test]
fn density_follows_volume() {
    let small = li2o_cube(4.0);
    let large = li2o_cube(8.0);
    let ratio = small.density().unwrap() / large.density().unwrap();
    assert!((ratio - 8.0).abs() < 1e-9);

    let mut unknown = li2o_cube(4.0);
    unknown.species[1] = "Xx".into();
    assert!(unknown.density().is_none());
}

#[test]
fn rescaled_file_carries_new_volume() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("CONTCAR");
    let output = tmp.path().join("POSCAR.rescaled");
    poscar::write_poscar(&li2o_cube(10.0), &input).unwrap();

    let params = RescaleParams::new(300.0, -5000.0);
    let result = VolumeRescaler::new(params).rescale_file(&input).unwrap();
    assert!((result.volume_after - 995.0).abs() < 1e-9);
    poscar::write_poscar(&result.corrected_geometry, &output).unwrap();

    let written = poscar::read_poscar(&output).unwrap();
    assert!((written.volume() - result.volume_after).abs() < 1e-8);
    let f = written.lattice.to_fractional(&written.atoms[0].position);
    assert!((f.x - 0.25).abs() < 1e-12);
}

#[test]
fn trailing_half_of_outcar_is_averaged() {
    let tmp = tempfile::tempdir().unwrap();
    write_outcar(tmp.path(), &[100.0, 100.0, 2.0, 4.0]);
    let series = outcar::read_pressure_series(&tmp.path().join("OUTCAR")).unwrap();
    assert_eq!(series.len(), 4);

    let sample = PressureSampler::new(0.5).unwrap().sample(&tmp.path().join("OUTCAR")).unwrap();
    assert_eq!(sample.samples_used, 2);
    assert!((sample.value - 3.0).abs() < 1e-12);
    assert!((sample.report().avg_pres - 3000.0).abs() < 1e-9);
}

#[test]
fn trajectory_frames_become_structures() {
    let text = "Li2O\n1.0\n4.0 0 0\n0 4.0 0\n0 0 4.0\nLi O\n2 1\n\
        Direct configuration=     1\n0.0 0.0 0.0\n0.5 0.5 0.5\n0.25 0.25 0.25\n\
        Direct configuration=     2\n0.1 0.0 0.0\n0.5 0.5 0.5\n0.25 0.25 0.25\n";
    let traj = xdatcar::parse_xdatcar(text).unwrap();
    assert_eq!(traj.len(), 2);
    let s = traj.structure_at(1).unwrap();
    assert_eq!(s.reduced_formula(), "Li2O");
    assert!((s.atoms[0].position.x - 0.4).abs() < 1e-12);
    assert!(traj.structure_at(2).is_none());
}

proptest! {
    #[test]
    fn poscar_round_trip_keeps_volume(
        a in 3.0f64..20.0,
        b in 3.0f64..20.0,
        c in 3.0f64..20.0,
        shear in 0.0f64..1.0,
    ) {
        let s = triclinic(a, b, c, shear);
        let back = poscar::parse_poscar(&poscar::to_poscar_string(&s)).unwrap();
        prop_assert!((back.volume() - s.volume()).abs() <= 1e-9 * s.volume());
        prop_assert_eq!(back.atoms.len(), 3);
    }

    #[test]
    fn scaling_preserves_fractional_coordinates(edge in 4.0f64..15.0, factor in 0.5f64..2.0) {
        let mut s = li2o_cube(edge);
        let before = s.fractional_coords();
        let target = s.volume() * factor;
        s.scale_to_volume(target).unwrap();
        prop_assert!((s.volume() - target).abs() <= 1e-9 * target);
        for (p, q) in before.iter().zip(s.fractional_coords().iter()) {
            prop_assert!((p - q).norm() < 1e-9);
        }
    }
}
