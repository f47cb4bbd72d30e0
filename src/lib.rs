// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Simulate weak gravitational lensing by tracing light rays through a stack
of lens planes.

The planes are 2D slices of cosmological N-body simulations, stored as the
lensing potential (or surface density, or deflection field) on a square,
periodic grid. A ray shot from the observer at angular position θ is
deflected at every plane in front of its source and its final position β,
together with the Jacobian ∂β/∂θ, gives the lensing observables: the
convergence κ, the shear γ and the rotation ω. See [Hilbert et al.
(2009)](https://dx.doi.org/10.1051/0004-6361:200811054) for the algorithm
and [Petri (2016)](https://dx.doi.org/10.1016/j.ascom.2016.06.001) for the
pipeline it lives in.

The pieces, bottom up:

- [`plane`] holds the content of one plane and its randomization.
- [`sampler`] evaluates deflections and their gradients at arbitrary
  positions.
- [`tracer`] does the multi-plane propagation.
- [`maps`] turns Jacobians into observables and writes maps.
- [`driver`] runs whole campaigns of realizations on a pool of workers
  ([`pool`]), reading [`settings`], plane [`manifest`]s and galaxy
  [`catalog`]s from the directory tree described in [`pipeline`].

*/

#![deny(missing_docs)]

#[macro_use] extern crate slog;

#[cfg(test)] #[macro_use] extern crate assert_approx_eq;

pub mod catalog;
pub mod cosmology;
pub mod driver;
mod error;
pub mod fits;
pub mod manifest;
pub mod maps;
pub mod pipeline;
pub mod plane;
pub mod pool;
pub mod quad;
pub mod sampler;
pub mod settings;
pub mod tracer;

pub use error::{Error, Result};
