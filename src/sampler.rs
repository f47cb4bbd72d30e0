// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Sampling lens planes at arbitrary angular positions.

Planes are periodic: pixel `(row, col)` sits at `x = col * h`, `y = row * h`
with `h = angle / resolution`, and positions outside `[0, angle)` wrap
around. Values between pixel centers are interpolated bilinearly.

*/

use ndarray::Array2;
use rayon::prelude::*;

use crate::plane::LensPlane;

/// Rays handed to a single rayon task, at minimum.
const MIN_BATCH: usize = 512;


/// The four neighbouring pixels of a position and the weights to combine
/// them with.
#[derive(Copy,Clone,Debug,PartialEq)]
struct Stencil {
    rows: [usize; 2],
    cols: [usize; 2],
    tx: f64,
    ty: f64,
}

impl Stencil {
    fn new(x: f64, y: f64, angle: f64, n: usize) -> Self {
        let (c0, tx) = wrap(x, angle, n);
        let (r0, ty) = wrap(y, angle, n);

        Stencil {
            rows: [r0, (r0 + 1) % n],
            cols: [c0, (c0 + 1) % n],
            tx: tx,
            ty: ty,
        }
    }

    fn sample(&self, g: &Array2<f64>) -> f64 {
        let [r0, r1] = self.rows;
        let [c0, c1] = self.cols;

        (1. - self.ty) * ((1. - self.tx) * g[(r0, c0)] + self.tx * g[(r0, c1)]) +
            self.ty * ((1. - self.tx) * g[(r1, c0)] + self.tx * g[(r1, c1)])
    }
}

/// Fold a coordinate into a pixel index and the fractional offset past it.
fn wrap(v: f64, angle: f64, n: usize) -> (usize, f64) {
    let nf = n as f64;
    let f = (v / angle * nf).rem_euclid(nf);
    // rem_euclid can round up to exactly `nf` for tiny negative inputs.
    let i = (f.floor() as usize).min(n - 1);
    (i, f - i as f64)
}


impl LensPlane {
    /// The deflection angle (x, y) at one position, in radians.
    pub fn deflection_at(&self, x: f64, y: f64) -> [f64; 2] {
        let s = Stencil::new(x, y, self.angle, self.resolution());
        [s.sample(&self.deflection[0]), s.sample(&self.deflection[1])]
    }

    /// The deflection gradient at one position, flattened as
    /// ∂αx/∂x, ∂αx/∂y, ∂αy/∂x, ∂αy/∂y.
    pub fn gradient_at(&self, x: f64, y: f64) -> [f64; 4] {
        let s = Stencil::new(x, y, self.angle, self.resolution());
        [
            s.sample(&self.gradient[0]),
            s.sample(&self.gradient[1]),
            s.sample(&self.gradient[2]),
            s.sample(&self.gradient[3]),
        ]
    }
}


/// Sample the deflection angle at every position, in parallel. The result
/// is in the same order as `positions`.
pub fn deflections(plane: &LensPlane, positions: &[[f64; 2]]) -> Vec<[f64; 2]> {
    positions.par_iter()
        .with_min_len(MIN_BATCH)
        .map(|p| plane.deflection_at(p[0], p[1]))
        .collect()
}

/// Sample the deflection gradient at every position, in parallel.
pub fn deflection_gradients(plane: &LensPlane, positions: &[[f64; 2]]) -> Vec<[f64; 4]> {
    positions.par_iter()
        .with_min_len(MIN_BATCH)
        .map(|p| plane.gradient_at(p[0], p[1]))
        .collect()
}
