// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Background cosmology.

The ray tracer only needs line-of-sight comoving distances, and only to place
a virtual source plane beyond the last lens plane. The orchestrator also needs
the dimensionless Hubble parameter *h* to convert `Mpc/h` distances read from
plane manifests.

The model implemented here is a w0-wa dark energy cosmology with matter,
curvature and no radiation:

```text
E(z)^2 = Om (1+z)^3 + Ok (1+z)^2 + Ode (1+z)^(3 (1 + w0 + wa)) exp(-3 wa z / (1+z))
```

*/

use std::f64;

use crate::quad;

/// The speed of light in km/s.
pub const SPEED_LIGHT_KM_S: f64 = 299792.458;


/// Something that can convert redshifts into comoving distances.
pub trait Cosmology: Sync {
    /// The dimensionless Hubble parameter, H0 / (100 km/s/Mpc).
    fn h(&self) -> f64;

    /// The dimensionless expansion rate H(z) / H0.
    fn efunc(&self, z: f64) -> f64;

    /// The Hubble distance c / H0, in Mpc.
    fn hubble_distance(&self) -> f64 {
        SPEED_LIGHT_KM_S / (100. * self.h())
    }

    /// The line-of-sight comoving distance to redshift *z*, in Mpc.
    fn comoving_distance(&self, z: f64) -> f64 {
        if z <= 0. {
            return 0.;
        }

        let integral = quad::qag(|zz| 1. / self.efunc(zz), 0., z)
            .tolerance(0., 1e-10)
            .compute();
        self.hubble_distance() * integral.value
    }

    /// The size of one `Mpc/h` in Mpc.
    fn mpc_over_h(&self) -> f64 {
        1. / self.h()
    }
}


/// A w0-wa cosmology. See the module-level documentation for the expansion
/// history. Parameters not entering the distances (`ob0`, `sigma8`, `ns`)
/// are carried along for bookkeeping.
#[derive(Copy,Clone,Debug,PartialEq)]
pub struct Wcdm {
    /// Dimensionless Hubble parameter.
    pub h: f64,
    /// Matter density today.
    pub om0: f64,
    /// Dark energy density today.
    pub ode0: f64,
    /// Baryon density today.
    pub ob0: f64,
    /// Dark energy equation of state today.
    pub w0: f64,
    /// Linear evolution of the equation of state with scale factor.
    pub wa: f64,
    /// Power spectrum normalization.
    pub sigma8: f64,
    /// Scalar spectral index.
    pub ns: f64,
}

impl Default for Wcdm {
    /// WMAP9 parameters.
    fn default() -> Self {
        Wcdm {
            h: 0.6932,
            om0: 0.2865,
            ode0: 0.7134,
            ob0: 0.04628,
            w0: -1.,
            wa: 0.,
            sigma8: 0.820,
            ns: 0.9608,
        }
    }
}

impl Wcdm {
    /// A flat LCDM model with the given *h* and matter density.
    pub fn flat_lcdm(h: f64, om0: f64) -> Self {
        Wcdm { h: h, om0: om0, ode0: 1. - om0, w0: -1., wa: 0., ..Wcdm::default() }
    }

    /// The curvature density today.
    pub fn ok0(&self) -> f64 {
        1. - self.om0 - self.ode0
    }
}

impl Cosmology for Wcdm {
    fn h(&self) -> f64 {
        self.h
    }

    fn efunc(&self, z: f64) -> f64 {
        let zp1 = 1. + z;
        let de_scaling = zp1.powf(3. * (1. + self.w0 + self.wa)) *
            (-3. * self.wa * z / zp1).exp();

        (self.om0 * zp1.powi(3) + self.ok0() * zp1.powi(2) + self.ode0 * de_scaling).sqrt()
    }
}
