// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Multi-lens-plane ray tracing.

A [`RayTracer`] is filled with lens descriptors (`add_lens`), put in distance
order and randomized once (`reorder_lenses`), and then used to shoot a
[`RayBundle`] backwards from the observer to a source redshift.

Each ray carries its angular position β and its angular direction *d*. At
lens plane *k* (comoving distance χ_k) the direction is kicked by the sampled
deflection and the ray travels in a straight line to the next distance χ':

```text
d ← d − α_k(β)
β ← (χ_k / χ') β + ((χ' − χ_k) / χ') d
```

starting from β = d = θ. χ' is the next plane, or the ray's source distance
after the last plane in front of the source. For a single plane this is the
usual β = θ − α (χ_s − χ_l) / χ_s.

The Jacobian A = ∂β/∂θ follows the same recursion, with D = ∂d/∂θ kicked by
the deflection gradient: D ← D − U_k A.

Source distances inside the plane range are interpolated linearly in
redshift between the bracketing planes, with the observer bracketing from
below. Beyond the last plane the cosmology supplies the distance, which
treats the last plane as if it were directly in front of a virtual source
plane. That is an approximation and gets logged as such. If the cosmology
puts such a source in front of the last plane, the source is placed on that
plane instead.

*/

use ndarray::Array2;
use rand::Rng;
use rayon::prelude::*;
use slog::Logger;
use std::path::PathBuf;

use crate::cosmology::Cosmology;
use crate::error::{Error, Result};
use crate::maps::Jacobians;
use crate::plane::{LensPlane, PlaneLoader, PlaneTransform};
use crate::sampler;

const MIN_BATCH: usize = 512;


/// One lens plane as known to the tracer before it is loaded.
#[derive(Clone,Debug,PartialEq)]
pub struct LensSpec {
    /// Where the plane content lives.
    pub path: PathBuf,
    /// Comoving distance, in Mpc.
    pub distance: f64,
    /// Redshift.
    pub redshift: f64,
    /// The randomization applied on load.
    pub transform: PlaneTransform,
}


/// Initial angular positions of a batch of rays, in radians.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct RayBundle {
    /// First angular coordinate.
    pub x: Vec<f64>,
    /// Second angular coordinate.
    pub y: Vec<f64>,
}

impl RayBundle {
    /// Build a bundle from two parallel coordinate vectors.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::config(format!(
                "ray coordinates have different lengths ({} and {})", x.len(), y.len()
            )));
        }

        Ok(RayBundle { x: x, y: y })
    }

    /// A regular `resolution × resolution` grid spanning `[0, angle]` on both
    /// axes, endpoints included. Rays are ordered row by row, so ray
    /// `row * resolution + col` sits at `(x[col], y[row])`.
    pub fn grid(angle: f64, resolution: usize) -> Self {
        let step = if resolution > 1 { angle / (resolution - 1) as f64 } else { 0. };
        let mut x = Vec::with_capacity(resolution * resolution);
        let mut y = Vec::with_capacity(resolution * resolution);

        for row in 0..resolution {
            for col in 0..resolution {
                x.push(col as f64 * step);
                y.push(row as f64 * step);
            }
        }

        RayBundle { x: x, y: y }
    }

    /// The number of rays.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether there are no rays at all.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn points(&self) -> Vec<[f64; 2]> {
        self.x.iter().zip(self.y.iter()).map(|(x, y)| [*x, *y]).collect()
    }

    fn from_points(points: &[[f64; 2]]) -> Self {
        RayBundle {
            x: points.iter().map(|p| p[0]).collect(),
            y: points.iter().map(|p| p[1]).collect(),
        }
    }
}


/// The redshift of the source each ray is shot towards.
#[derive(Copy,Clone,Debug,PartialEq)]
pub enum SourceRedshift<'s> {
    /// The same redshift for every ray.
    Uniform(f64),
    /// One redshift per ray, in bundle order.
    PerRay(&'s [f64]),
}

impl<'s> SourceRedshift<'s> {
    fn get(&self, i: usize) -> f64 {
        match *self {
            SourceRedshift::Uniform(z) => z,
            SourceRedshift::PerRay(zs) => zs[i],
        }
    }

    fn validate(&self, n_rays: usize) -> Result<()> {
        let ok = |z: f64| z.is_finite() && z >= 0.;

        match *self {
            SourceRedshift::Uniform(z) => {
                if !ok(z) {
                    return Err(Error::config(format!("bad source redshift {}", z)));
                }
            },
            SourceRedshift::PerRay(zs) => {
                if zs.len() != n_rays {
                    return Err(Error::config(format!(
                        "{} source redshifts given for {} rays", zs.len(), n_rays
                    )));
                }

                if let Some(z) = zs.iter().find(|z| !ok(**z)) {
                    return Err(Error::config(format!("bad source redshift {}", z)));
                }
            },
        }

        Ok(())
    }
}


/// Per-ray bookkeeping fixed before propagation starts.
#[derive(Copy,Clone,Debug)]
struct Target {
    /// How many planes lie in front of the source.
    n_active: usize,
    /// Comoving distance of the source, in Mpc. Meaningless if
    /// `n_active` is zero.
    chi_s: f64,
    /// Set if the source is behind the last plane in redshift but in front
    /// of it in distance. `chi_s` is then the plane's own distance.
    clamped: bool,
}


/// The multi-plane ray tracer. See the module-level documentation.
pub struct RayTracer<'a> {
    cosmology: &'a dyn Cosmology,
    loader: &'a dyn PlaneLoader,
    logger: &'a Logger,
    lenses: Vec<LensSpec>,
    planes: Vec<Option<LensPlane>>,
    reordered: bool,
}

impl<'a> RayTracer<'a> {
    /// An empty tracer. Plane content will be obtained from `loader` and
    /// source distances beyond the last plane from `cosmology`.
    pub fn new(cosmology: &'a dyn Cosmology, loader: &'a dyn PlaneLoader, logger: &'a Logger) -> Self {
        RayTracer {
            cosmology: cosmology,
            loader: loader,
            logger: logger,
            lenses: Vec::new(),
            planes: Vec::new(),
            reordered: false,
        }
    }

    /// Append a lens plane. Nothing is read until the plane is needed.
    pub fn add_lens<P: Into<PathBuf>>(&mut self, path: P, distance: f64, redshift: f64) -> Result<()> {
        let path = path.into();

        if self.reordered {
            return Err(Error::config(format!(
                "cannot add lens {} after the lenses have been reordered", path.display()
            )));
        }

        if !(distance.is_finite() && distance > 0.) {
            return Err(Error::config(format!("lens {}: bad comoving distance {}", path.display(), distance)));
        }

        if !(redshift.is_finite() && redshift >= 0.) {
            return Err(Error::config(format!("lens {}: bad redshift {}", path.display(), redshift)));
        }

        self.lenses.push(LensSpec {
            path: path,
            distance: distance,
            redshift: redshift,
            transform: PlaneTransform::default(),
        });
        self.planes.push(None);
        Ok(())
    }

    /// Sort the lenses by increasing distance and draw a random roll (and,
    /// if `symmetries` is set, a random square symmetry) for each one. Every
    /// draw comes from `rng`. Calling this again draws new transforms and
    /// drops anything already loaded.
    pub fn reorder_lenses<R: Rng + ?Sized>(&mut self, rng: &mut R, symmetries: bool) -> Result<()> {
        // Distances are finite, so the comparison never fails.
        self.lenses.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));

        for lens in &mut self.lenses {
            lens.transform = PlaneTransform::random(rng, symmetries);
        }

        self.release_planes();
        self.reordered = true;
        self.check_monotonic()?;

        trace!(self.logger, "reordered lenses"; "n_lenses" => self.lenses.len(), "symmetries" => symmetries);
        Ok(())
    }

    /// The lenses, in their current order.
    pub fn lenses(&self) -> &[LensSpec] {
        &self.lenses
    }

    /// Drop every loaded plane grid. They will be reloaded if needed.
    pub fn release_planes(&mut self) {
        for p in &mut self.planes {
            *p = None;
        }
    }

    /// How many planes currently have their grids in memory.
    pub fn n_loaded(&self) -> usize {
        self.planes.iter().filter(|p| p.is_some()).count()
    }

    /// Shoot rays from the observer to the source redshift(s) and return
    /// their final angular positions.
    pub fn shoot_positions(&mut self, rays: &RayBundle, z_source: SourceRedshift) -> Result<RayBundle> {
        let (beta, _) = self.propagate(rays, z_source, false)?;
        Ok(RayBundle::from_points(&beta))
    }

    /// Shoot rays from the observer to the source redshift(s) and return
    /// their distortion matrices ∂β/∂θ.
    pub fn shoot_jacobians(&mut self, rays: &RayBundle, z_source: SourceRedshift) -> Result<Jacobians> {
        let (_, jac) = self.propagate(rays, z_source, true)?;
        let jac = jac.unwrap_or_default();
        let n = jac.len();

        Jacobians::new(Array2::from_shape_fn((4, n), |(c, i)| jac[i][c]))
    }

    fn check_order(&self) -> Result<()> {
        if !self.reordered {
            return Err(Error::config("lenses must be reordered before propagating rays"));
        }

        if self.lenses.is_empty() {
            return Err(Error::config("cannot propagate rays through an empty lens sequence"));
        }

        self.check_monotonic()
    }

    fn check_monotonic(&self) -> Result<()> {
        for w in self.lenses.windows(2) {
            if !(w[1].distance >= w[0].distance) {
                return Err(Error::invariant(format!(
                    "lens distances out of order: {} then {}", w[0].distance, w[1].distance
                )));
            }

            if !(w[1].redshift >= w[0].redshift) {
                return Err(Error::invariant(format!(
                    "lens redshifts out of order: {} (at {} Mpc) then {} (at {} Mpc)",
                    w[0].redshift, w[0].distance, w[1].redshift, w[1].distance
                )));
            }
        }

        Ok(())
    }

    fn plane(&mut self, k: usize) -> Result<&LensPlane> {
        if self.planes[k].is_none() {
            let spec = &self.lenses[k];
            let data = self.loader.load(&spec.path)?;
            let plane = LensPlane::from_data(&data, &spec.transform);

            debug!(self.logger, "loaded lens plane";
                   "path" => %spec.path.display(),
                   "resolution" => plane.resolution(),
                   "redshift" => spec.redshift);

            self.planes[k] = Some(plane);
        }

        self.planes[k].as_ref().ok_or_else(|| Error::invariant("lens plane vanished after loading"))
    }

    /// The comoving distance of a source at redshift `z`, and the number of
    /// planes in front of it.
    fn target(&self, z: f64) -> Target {
        let n_active = self.lenses.partition_point(|l| l.redshift < z);

        if n_active == 0 {
            return Target { n_active: 0, chi_s: 0., clamped: false };
        }

        if n_active < self.lenses.len() {
            let hi = &self.lenses[n_active];
            let (z_lo, chi_lo) = if n_active > 0 {
                let lo = &self.lenses[n_active - 1];
                (lo.redshift, lo.distance)
            } else {
                (0., 0.)
            };

            let chi_s = chi_lo + (z - z_lo) / (hi.redshift - z_lo) * (hi.distance - chi_lo);
            return Target { n_active: n_active, chi_s: chi_s, clamped: false };
        }

        // Manifest distances need not agree with the model cosmology. A
        // source that the cosmology puts in front of the last plane sees it
        // with zero lensing weight.
        let last = &self.lenses[n_active - 1];
        let chi_s = self.cosmology.comoving_distance(z);

        if chi_s >= last.distance {
            Target { n_active: n_active, chi_s: chi_s, clamped: false }
        } else {
            Target { n_active: n_active, chi_s: last.distance, clamped: true }
        }
    }

    fn targets(&self, n_rays: usize, z_source: SourceRedshift) -> Vec<Target> {
        match z_source {
            SourceRedshift::Uniform(z) => vec![self.target(z); n_rays],
            SourceRedshift::PerRay(_) => {
                (0..n_rays).into_par_iter()
                    .with_min_len(MIN_BATCH)
                    .map(|i| self.target(z_source.get(i)))
                    .collect()
            },
        }
    }

    fn propagate(
        &mut self, rays: &RayBundle, z_source: SourceRedshift, jacobians: bool
    ) -> Result<(Vec<[f64; 2]>, Option<Vec<[f64; 4]>>)> {
        self.check_order()?;
        z_source.validate(rays.len())?;

        let targets = self.targets(rays.len(), z_source);
        let n_lenses = self.lenses.len();
        let n_beyond = targets.iter().filter(|t| t.n_active == n_lenses).count();
        let n_clamped = targets.iter().filter(|t| t.clamped).count();

        if n_beyond > 0 {
            warn!(self.logger, "source redshift beyond the last lens plane; extrapolating";
                  "n_rays" => n_beyond, "last_plane_redshift" => self.lenses[n_lenses - 1].redshift);
        }

        if n_clamped > 0 {
            let last = &self.lenses[n_lenses - 1];
            warn!(self.logger, "source distance falls short of the last lens plane; placing it on the plane";
                  "n_rays" => n_clamped, "last_plane_distance" => last.distance,
                  "last_plane_redshift" => last.redshift);
        }

        let mut beta = rays.points();
        let mut dir = beta.clone();
        let (mut amat, mut dmat) = if jacobians {
            (vec![[1., 0., 0., 1.]; rays.len()], vec![[1., 0., 0., 1.]; rays.len()])
        } else {
            (Vec::new(), Vec::new())
        };

        for k in 0..n_lenses {
            let active: Vec<usize> = (0..rays.len()).filter(|i| targets[*i].n_active > k).collect();

            if active.is_empty() {
                break;
            }

            let chi_k = self.lenses[k].distance;
            let chi_next = if k + 1 < n_lenses { self.lenses[k + 1].distance } else { 0. };
            let positions: Vec<[f64; 2]> = active.iter().map(|i| beta[*i]).collect();

            trace!(self.logger, "propagating through lens plane";
                   "index" => k, "distance" => chi_k, "n_active" => active.len());

            let plane = self.plane(k)?;
            let alpha = sampler::deflections(plane, &positions);
            let grads = if jacobians {
                sampler::deflection_gradients(plane, &positions)
            } else {
                Vec::new()
            };

            for (j, &i) in active.iter().enumerate() {
                let t = &targets[i];
                let chi_p = if k + 1 < t.n_active { chi_next } else { t.chi_s };
                let (w_old, w_dir) = weights(chi_k, chi_p);

                dir[i][0] -= alpha[j][0];
                dir[i][1] -= alpha[j][1];
                beta[i][0] = w_old * beta[i][0] + w_dir * dir[i][0];
                beta[i][1] = w_old * beta[i][1] + w_dir * dir[i][1];

                if jacobians {
                    let ua = matmul(&grads[j], &amat[i]);

                    for c in 0..4 {
                        dmat[i][c] -= ua[c];
                        amat[i][c] = w_old * amat[i][c] + w_dir * dmat[i][c];
                    }
                }
            }
        }

        Ok((beta, if jacobians { Some(amat) } else { None }))
    }
}


/// Straight-line weights to go from distance `chi` to `chi_next`.
fn weights(chi: f64, chi_next: f64) -> (f64, f64) {
    (chi / chi_next, (chi_next - chi) / chi_next)
}

/// Product of two flattened 2×2 matrices.
fn matmul(u: &[f64; 4], a: &[f64; 4]) -> [f64; 4] {
    [
        u[0] * a[0] + u[1] * a[2],
        u[0] * a[1] + u[1] * a[3],
        u[2] * a[0] + u[3] * a[2],
        u[2] * a[1] + u[3] * a[3],
    ]
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::Wcdm;
    use crate::plane::{InMemoryPlanes, PlaneData, PlaneField};
    use lenstrace_test_support::discard_log;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn uniform_plane(n: usize, angle: f64, distance: f64, redshift: f64, alpha: [f64; 2]) -> PlaneData {
        PlaneData {
            field: PlaneField::Deflection([
                Array2::from_elem((n, n), alpha[0]),
                Array2::from_elem((n, n), alpha[1]),
            ]),
            angle: angle,
            distance: distance,
            redshift: redshift,
        }
    }

    fn uniform_planes(specs: &[(f64, f64)], alpha: [f64; 2]) -> InMemoryPlanes {
        let mut planes = InMemoryPlanes::new();

        for (i, &(chi, z)) in specs.iter().enumerate() {
            planes.insert(format!("plane{}.fits", i), uniform_plane(8, 0.01, chi, z, alpha));
        }

        planes
    }

    fn add_all(tracer: &mut RayTracer, specs: &[(f64, f64)]) {
        for (i, &(chi, z)) in specs.iter().enumerate() {
            tracer.add_lens(format!("plane{}.fits", i), chi, z).unwrap();
        }
    }

    #[test]
    fn reorder_sorts_and_is_reproducible() {
        let cosmo = Wcdm::default();
        let planes = InMemoryPlanes::new();
        let log = discard_log();
        let specs = [(900., 0.3), (300., 0.1), (1500., 0.6), (600., 0.2)];

        let run = |seed: u64| {
            let mut t = RayTracer::new(&cosmo, &planes, &log);

            for (i, &(chi, z)) in specs.iter().enumerate() {
                t.add_lens(format!("p{}", i), chi, z).unwrap();
            }

            t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(seed), true).unwrap();
            t.lenses().to_vec()
        };

        let a = run(42);
        let dists: Vec<f64> = a.iter().map(|l| l.distance).collect();
        assert_eq!(dists, vec![300., 600., 900., 1500.]);
        assert_eq!(a, run(42));
        assert_ne!(a, run(43));
    }

    #[test]
    fn add_after_reorder_fails() {
        let cosmo = Wcdm::default();
        let planes = InMemoryPlanes::new();
        let log = discard_log();
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("a", 100., 0.02).unwrap();
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(0), false).unwrap();

        match t.add_lens("b", 200., 0.05) {
            Err(Error::Config(_)) => {},
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn bad_lens_parameters() {
        let cosmo = Wcdm::default();
        let planes = InMemoryPlanes::new();
        let log = discard_log();
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        assert!(t.add_lens("a", 0., 0.1).is_err());
        assert!(t.add_lens("a", f64::NAN, 0.1).is_err());
        assert!(t.add_lens("a", 100., -0.1).is_err());
        assert!(t.lenses().is_empty());
    }

    #[test]
    fn propagation_needs_reorder_and_lenses() {
        let cosmo = Wcdm::default();
        let planes = InMemoryPlanes::new();
        let log = discard_log();
        let rays = RayBundle::grid(0.01, 4);

        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("a", 100., 0.02).unwrap();
        assert!(t.shoot_positions(&rays, SourceRedshift::Uniform(1.)).is_err());

        let mut empty = RayTracer::new(&cosmo, &planes, &log);
        empty.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(0), false).unwrap();
        assert!(empty.shoot_jacobians(&rays, SourceRedshift::Uniform(1.)).is_err());
    }

    #[test]
    fn unordered_redshifts_are_invariant_violations() {
        let cosmo = Wcdm::default();
        let planes = InMemoryPlanes::new();
        let log = discard_log();
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("a", 100., 0.5).unwrap();
        t.add_lens("b", 200., 0.1).unwrap();

        match t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(0), false) {
            Err(Error::Invariant(_)) => {},
            other => panic!("expected an invariant violation, got {:?}", other),
        }
    }

    #[test]
    fn zero_deflection_is_identity() {
        let cosmo = Wcdm::default();
        let log = discard_log();
        let rays = RayBundle::grid(0.01, 5);

        for n in 1..5 {
            let specs: Vec<(f64, f64)> = (0..n).map(|i| (400. * (i + 1) as f64, 0.1 * (i + 1) as f64)).collect();
            let planes = uniform_planes(&specs, [0., 0.]);
            let mut t = RayTracer::new(&cosmo, &planes, &log);
            add_all(&mut t, &specs);
            t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(n as u64), true).unwrap();

            let out = t.shoot_positions(&rays, SourceRedshift::Uniform(2.)).unwrap();
            for i in 0..rays.len() {
                assert_approx_eq!(out.x[i], rays.x[i], 1e-15);
                assert_approx_eq!(out.y[i], rays.y[i], 1e-15);
            }

            let jac = t.shoot_jacobians(&rays, SourceRedshift::Uniform(0.25)).unwrap();
            for i in 0..rays.len() {
                assert_approx_eq!(jac.components()[(0, i)], 1., 1e-15);
                assert_approx_eq!(jac.components()[(1, i)], 0., 1e-15);
                assert_approx_eq!(jac.components()[(2, i)], 0., 1e-15);
                assert_approx_eq!(jac.components()[(3, i)], 1., 1e-15);
            }
        }
    }

    #[test]
    fn single_plane_closed_form() {
        let cosmo = Wcdm::default();
        let log = discard_log();
        let alpha = [3e-5, -1e-5];
        let (chi_l, z_l) = (1000., 0.25);
        let (chi_hi, z_hi) = (3000., 1.25);

        let mut planes = InMemoryPlanes::new();
        planes.insert("lens", uniform_plane(16, 0.02, chi_l, z_l, alpha));
        planes.insert("far", uniform_plane(16, 0.02, chi_hi, z_hi, [1., 1.]));

        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("far", chi_hi, z_hi).unwrap();
        t.add_lens("lens", chi_l, z_l).unwrap();
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(1), false).unwrap();

        // The source sits halfway between the planes in redshift; the far
        // plane is behind it and must not act.
        let rays = RayBundle::new(vec![0.001, 0.0153, -0.02], vec![0.004, 0.0071, 0.5]).unwrap();
        let out = t.shoot_positions(&rays, SourceRedshift::Uniform(0.75)).unwrap();
        let chi_s = 2000.;
        let scale = (chi_s - chi_l) / chi_s;

        for i in 0..rays.len() {
            assert_approx_eq!(out.x[i], rays.x[i] - alpha[0] * scale, 1e-15);
            assert_approx_eq!(out.y[i], rays.y[i] - alpha[1] * scale, 1e-15);
        }

        assert_eq!(t.n_loaded(), 1);
        t.release_planes();
        assert_eq!(t.n_loaded(), 0);
    }

    #[test]
    fn per_ray_sources() {
        let cosmo = Wcdm::default();
        let log = discard_log();
        let alpha = [2e-5, 4e-5];
        let specs = [(500., 0.1), (1000., 0.2)];
        let planes = uniform_planes(&specs, alpha);
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        add_all(&mut t, &specs);
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(5), false).unwrap();

        let rays = RayBundle::new(vec![0.; 3], vec![0.; 3]).unwrap();
        let zs = [0.05, 0.15, 0.2];
        let out = t.shoot_positions(&rays, SourceRedshift::PerRay(&zs)).unwrap();

        // In front of every plane: untouched.
        assert_eq!(out.x[0], 0.);

        // Between the planes, at 750 Mpc.
        assert_approx_eq!(out.x[1], -alpha[0] * 250. / 750., 1e-15);

        // Exactly at the second plane, which therefore does not act.
        assert_approx_eq!(out.y[2], -alpha[1] * 500. / 1000., 1e-15);

        assert!(t.shoot_positions(&rays, SourceRedshift::PerRay(&zs[..2])).is_err());
        assert!(t.shoot_positions(&rays, SourceRedshift::PerRay(&[0.1, f64::NAN, 0.1])).is_err());
    }

    #[test]
    fn extrapolates_past_last_plane() {
        let cosmo = Wcdm::default();
        let log = discard_log();
        let alpha = [1e-5, 0.];
        let z_l = 0.5;
        let chi_l = cosmo.comoving_distance(z_l);

        let mut planes = InMemoryPlanes::new();
        planes.insert("lens", uniform_plane(8, 0.01, chi_l, z_l, alpha));
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("lens", chi_l, z_l).unwrap();
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(2), false).unwrap();

        let rays = RayBundle::new(vec![0.003], vec![0.]).unwrap();
        let out = t.shoot_positions(&rays, SourceRedshift::Uniform(1.)).unwrap();
        let chi_s = cosmo.comoving_distance(1.);
        assert_approx_eq!(out.x[0], 0.003 - alpha[0] * (chi_s - chi_l) / chi_s, 1e-14);
    }

    #[test]
    fn source_short_of_last_plane_distance() {
        // The manifest puts the plane 20 Mpc further than the cosmology
        // does, so a source just behind it in redshift would sit in front of
        // it in distance.
        let cosmo = Wcdm::default();
        let log = discard_log();
        let alpha = [2e-5, -3e-5];
        let z_l = 1.;
        let chi_l = cosmo.comoving_distance(z_l) + 20.;

        let mut planes = InMemoryPlanes::new();
        planes.insert("lens", uniform_plane(8, 0.01, chi_l, z_l, alpha));
        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("lens", chi_l, z_l).unwrap();
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(2), false).unwrap();

        let rays = RayBundle::new(vec![0.001, -0.002], vec![0.003, 0.]).unwrap();
        let out = t.shoot_positions(&rays, SourceRedshift::Uniform(1.002)).unwrap();

        for i in 0..rays.len() {
            assert_approx_eq!(out.x[i], rays.x[i], 1e-15);
            assert_approx_eq!(out.y[i], rays.y[i], 1e-15);
        }

        let zs = [1.002, 2.];
        let out = t.shoot_positions(&rays, SourceRedshift::PerRay(&zs)).unwrap();
        let chi_s = cosmo.comoving_distance(2.);
        assert_approx_eq!(out.x[0], rays.x[0], 1e-15);
        assert_approx_eq!(out.x[1], rays.x[1] - alpha[0] * (chi_s - chi_l) / chi_s, 1e-14);

        let jac = t.shoot_jacobians(&rays, SourceRedshift::Uniform(1.002)).unwrap();
        assert_approx_eq!(jac.components()[(0, 0)], 1., 1e-15);
        assert_approx_eq!(jac.components()[(3, 1)], 1., 1e-15);
    }

    #[test]
    fn jacobian_of_sheared_plane() {
        // α = (g x, −g y) away from the plane edges, so U = diag(g, −g).
        let cosmo = Wcdm::default();
        let log = discard_log();
        let n = 64;
        let angle = 1.;
        let g = 1e-3;
        let h = angle / n as f64;

        let ax = Array2::from_shape_fn((n, n), |(_, c)| g * c as f64 * h);
        let ay = Array2::from_shape_fn((n, n), |(r, _)| -g * r as f64 * h);
        let mut planes = InMemoryPlanes::new();
        planes.insert("lens", PlaneData {
            field: PlaneField::Deflection([ax, ay]),
            angle: angle,
            distance: 1000.,
            redshift: 0.3,
        });

        let mut t = RayTracer::new(&cosmo, &planes, &log);
        t.add_lens("lens", 1000., 0.3).unwrap();
        t.reorder_lenses(&mut ChaCha8Rng::seed_from_u64(0), false).unwrap();
        // Keep the transform trivial so the ramp is where the rays are.
        t.lenses[0].transform = PlaneTransform::default();

        let rays = RayBundle::new(vec![0.5, 0.25], vec![0.5, 0.6]).unwrap();
        let jac = t.shoot_jacobians(&rays, SourceRedshift::Uniform(0.6)).unwrap();
        let chi_s = cosmo.comoving_distance(0.6);
        let scale = (chi_s - 1000.) / chi_s;

        for i in 0..2 {
            assert_approx_eq!(jac.components()[(0, i)], 1. - g * scale, 1e-12);
            assert_approx_eq!(jac.components()[(1, i)], 0., 1e-12);
            assert_approx_eq!(jac.components()[(2, i)], 0., 1e-12);
            assert_approx_eq!(jac.components()[(3, i)], 1. + g * scale, 1e-12);
        }
    }

    #[test]
    fn grid_bundle_layout() {
        let b = RayBundle::grid(1., 3);
        assert_eq!(b.len(), 9);
        assert_eq!(b.x[..3], [0., 0.5, 1.]);
        assert_eq!(b.y[3..6], [0.5, 0.5, 0.5]);
        assert!(RayBundle::new(vec![1.], vec![]).is_err());
    }

    #[test]
    fn flattened_matrix_product() {
        let u = [1., 2., 3., 4.];
        let a = [5., 6., 7., 8.];
        assert_eq!(matmul(&u, &a), [19., 22., 43., 50.]);
    }
}
