// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Weak lensing observables derived from ray-traced Jacobians.

The Jacobian of ray *i* is stored as the column `i` of a `(4, n)` array with
rows ∂β1/∂θ1, ∂β1/∂θ2, ∂β2/∂θ1, ∂β2/∂θ2. From it:

```text
κ  = 1 − ½ (J0 + J3)
γ1 = ½ (J3 − J0)
γ2 = −½ (J1 + J2)
ω  = −½ (J2 − J1)
```

*/

use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fits::{self, Header, HeaderValue};
use crate::plane::DEG_TO_RAD;


/// Per-ray distortion matrices. See the module-level documentation.
#[derive(Clone,Debug,PartialEq)]
pub struct Jacobians {
    components: Array2<f64>,
}

impl Jacobians {
    /// Wrap a `(4, n)` array.
    pub fn new(components: Array2<f64>) -> Result<Self> {
        if components.nrows() != 4 {
            return Err(Error::invariant(format!(
                "Jacobian arrays need 4 rows, got {}", components.nrows()
            )));
        }

        Ok(Jacobians { components: components })
    }

    /// The raw `(4, n)` array.
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// The number of rays.
    pub fn len(&self) -> usize {
        self.components.ncols()
    }

    /// Whether there are no rays.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, i: usize) -> ArrayView1<f64> {
        self.components.index_axis(Axis(0), i)
    }

    /// The convergence κ of every ray.
    pub fn convergence(&self) -> Array1<f64> {
        let (j0, j3) = (self.row(0), self.row(3));
        ndarray::Zip::from(&j0).and(&j3).map_collect(|a, d| 1. - 0.5 * (a + d))
    }

    /// The shear of every ray, as a `(2, n)` array of γ1 and γ2.
    pub fn shear(&self) -> Array2<f64> {
        let n = self.len();
        let c = &self.components;

        Array2::from_shape_fn((2, n), |(k, i)| {
            if k == 0 {
                0.5 * (c[(3, i)] - c[(0, i)])
            } else {
                -0.5 * (c[(1, i)] + c[(2, i)])
            }
        })
    }

    /// The rotation ω of every ray.
    pub fn omega(&self) -> Array1<f64> {
        let (j1, j2) = (self.row(1), self.row(2));
        ndarray::Zip::from(&j1).and(&j2).map_collect(|b, c| -0.5 * (c - b))
    }
}


/// The kinds of maps that can be made from Jacobians.
#[derive(Copy,Clone,Debug,Eq,Hash,PartialEq)]
pub enum MapKind {
    /// The convergence κ.
    Convergence,
    /// The two shear components.
    Shear,
    /// The rotation ω.
    Omega,
}

impl MapKind {
    /// The file name prefix used for this kind of map.
    pub fn prefix(self) -> &'static str {
        match self {
            MapKind::Convergence => "WLconv",
            MapKind::Shear => "WLshear",
            MapKind::Omega => "WLomega",
        }
    }

    /// The file name of realization `r` (zero-based) of a map at source
    /// redshift `z`.
    pub fn file_name(self, z: f64, r: usize, format: &str) -> String {
        format!("{}_z{:.2}_{:04}r.{}", self.prefix(), z, r + 1, format)
    }
}


/// A square map of one lensing observable.
#[derive(Clone,Debug,PartialEq)]
pub struct LensingMap {
    /// What the map holds.
    pub kind: MapKind,
    /// The side of the map, in radians.
    pub angle: f64,
    /// One grid for scalar maps, two for shear.
    pub planes: Vec<Array2<f64>>,
}

impl LensingMap {
    /// Build a map from Jacobians obtained on a `resolution × resolution`
    /// grid of rays (see `RayBundle::grid`).
    pub fn from_jacobians(kind: MapKind, jac: &Jacobians, angle: f64, resolution: usize) -> Result<Self> {
        if jac.len() != resolution * resolution {
            return Err(Error::invariant(format!(
                "{} Jacobians cannot fill a {}×{} map", jac.len(), resolution, resolution
            )));
        }

        let square = |v: ArrayView1<f64>| {
            Array2::from_shape_fn((resolution, resolution), |(r, c)| v[r * resolution + c])
        };

        let planes = match kind {
            MapKind::Convergence => vec![square(jac.convergence().view())],
            MapKind::Omega => vec![square(jac.omega().view())],
            MapKind::Shear => {
                let g = jac.shear();
                vec![square(g.index_axis(Axis(0), 0)), square(g.index_axis(Axis(0), 1))]
            },
        };

        Ok(LensingMap { kind: kind, angle: angle, planes: planes })
    }

    /// Write the map as a FITS image. Shear maps are three-dimensional with
    /// γ1 first.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let n = self.planes.first().map(|p| p.nrows()).unwrap_or(0);
        let mut header = Header::new();
        header.set("ANGLE", HeaderValue::Float(self.angle / DEG_TO_RAD))
            .set("MAPKIND", HeaderValue::Str(self.kind.prefix().to_owned()));

        let data: Vec<f64> = self.planes.iter().flat_map(|p| p.iter().cloned()).collect();

        if self.planes.len() == 1 {
            fits::write_image(path, &header, &[n, n], &data)
        } else {
            fits::write_image(path, &header, &[self.planes.len(), n, n], &data)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Jacobians {
        Jacobians::new(Array2::from_shape_vec((4, 3), vec![
            0.97, 1.013, 1.2,
            0.011, -0.004, 0.3,
            0.007, 0.0021, -0.7,
            1.03, 0.995, 0.1,
        ]).unwrap()).unwrap()
    }

    #[test]
    fn derived_quantities_are_exact() {
        let j = sample();
        let c = j.components().clone();
        let kappa = j.convergence();
        let shear = j.shear();
        let omega = j.omega();

        for i in 0..3 {
            assert_eq!(kappa[i], 1. - 0.5 * (c[(0, i)] + c[(3, i)]));
            assert_eq!(shear[(0, i)], 0.5 * (c[(3, i)] - c[(0, i)]));
            assert_eq!(shear[(1, i)], -0.5 * (c[(1, i)] + c[(2, i)]));
            assert_eq!(omega[i], -0.5 * (c[(2, i)] - c[(1, i)]));
        }
    }

    #[test]
    fn identity_has_no_signal() {
        let n = 5;
        let j = Jacobians::new(Array2::from_shape_fn((4, n), |(c, _)| if c == 0 || c == 3 { 1. } else { 0. })).unwrap();
        assert!(j.convergence().iter().all(|v| *v == 0.));
        assert!(j.shear().iter().all(|v| *v == 0.));
        assert!(j.omega().iter().all(|v| *v == 0.));
    }

    #[test]
    fn wrong_row_count() {
        assert!(Jacobians::new(Array2::zeros((3, 4))).is_err());
    }

    #[test]
    fn file_names() {
        assert_eq!(MapKind::Convergence.file_name(1., 0, "fits"), "WLconv_z1.00_0001r.fits");
        assert_eq!(MapKind::Shear.file_name(0.754, 41, "fits"), "WLshear_z0.75_0042r.fits");
        assert_eq!(MapKind::Omega.file_name(2., 9999, "fits"), "WLomega_z2.00_10000r.fits");
    }

    #[test]
    fn map_layout_and_save() {
        let res = 2;
        let j = Jacobians::new(Array2::from_shape_fn((4, res * res), |(c, i)| {
            if c == 0 { 1. - 0.1 * i as f64 } else if c == 3 { 1. } else { 0. }
        })).unwrap();

        let kappa = LensingMap::from_jacobians(MapKind::Convergence, &j, 0.01, res).unwrap();
        assert_approx_eq!(kappa.planes[0][(1, 0)], 0.1);

        let shear = LensingMap::from_jacobians(MapKind::Shear, &j, 0.01, res).unwrap();
        assert_eq!(shear.planes.len(), 2);

        let dir = tempdir().unwrap();
        let path = dir.path().join(MapKind::Shear.file_name(1., 0, "fits"));
        shear.save(&path).unwrap();
        let img = fits::read_image(&path).unwrap();
        assert_eq!(img.shape, vec![2, 2, 2]);
        assert_approx_eq!(img.header.get_f64("ANGLE").unwrap(), 0.01 / DEG_TO_RAD, 1e-12);

        assert!(LensingMap::from_jacobians(MapKind::Omega, &j, 0.01, 3).is_err());
    }
}
