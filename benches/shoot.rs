// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/// Time ray shooting through a stack of in-memory lens planes.
///
/// Plane loading is part of every iteration since the tracer only keeps
/// grids for the duration of one shot.

#[macro_use] extern crate bencher;
extern crate lenstrace;
extern crate lenstrace_test_support;
extern crate ndarray;
extern crate rand;
extern crate rand_chacha;

use bencher::Bencher;
use lenstrace::cosmology::{Cosmology, Wcdm};
use lenstrace::plane::{InMemoryPlanes, PlaneData, PlaneField, DEG_TO_RAD};
use lenstrace::tracer::{RayBundle, RayTracer, SourceRedshift};
use lenstrace_test_support::{discard_log, Sampler};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const N_PLANES: usize = 8;
const PLANE_RESOLUTION: usize = 256;
const PLANE_ANGLE: f64 = 3.5;


fn planes(cosmo: &Wcdm) -> (InMemoryPlanes, Vec<(String, f64, f64)>) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let noise = Sampler::new(false, -1e-7, 1e-7);
    let mut mem = InMemoryPlanes::new();
    let mut specs = Vec::new();

    for k in 0..N_PLANES {
        let z = 0.25 * (k + 1) as f64;
        let chi = cosmo.comoving_distance(z);
        let psi = Array2::from_shape_vec(
            (PLANE_RESOLUTION, PLANE_RESOLUTION),
            noise.many(&mut rng, PLANE_RESOLUTION * PLANE_RESOLUTION)
        ).unwrap_or_else(|_| Array2::zeros((PLANE_RESOLUTION, PLANE_RESOLUTION)));

        let path = format!("plane{}.fits", k);
        mem.insert(path.clone(), PlaneData {
            field: PlaneField::Potential(psi),
            angle: PLANE_ANGLE * DEG_TO_RAD,
            distance: chi,
            redshift: z,
        });
        specs.push((path, chi, z));
    }

    (mem, specs)
}


fn shoot(b: &mut Bencher, resolution: usize, jacobians: bool) {
    let cosmo = Wcdm::default();
    let log = discard_log();
    let (mem, specs) = planes(&cosmo);
    let rays = RayBundle::grid(PLANE_ANGLE * DEG_TO_RAD, resolution);
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    b.iter(|| {
        let mut tracer = RayTracer::new(&cosmo, &mem, &log);

        for &(ref path, chi, z) in &specs {
            tracer.add_lens(path.as_str(), chi, z).unwrap();
        }

        tracer.reorder_lenses(&mut rng, true).unwrap();

        if jacobians {
            tracer.shoot_jacobians(&rays, SourceRedshift::Uniform(2.5)).unwrap().len()
        } else {
            tracer.shoot_positions(&rays, SourceRedshift::Uniform(2.5)).unwrap().len()
        }
    });
}


fn positions_128(b: &mut Bencher) {
    shoot(b, 128, false)
}

fn jacobians_128(b: &mut Bencher) {
    shoot(b, 128, true)
}

fn jacobians_512(b: &mut Bencher) {
    shoot(b, 512, true)
}


benchmark_group!(benches, positions_128, jacobians_128, jacobians_512);
benchmark_main!(benches);
