// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Lens planes: what is stored on disk, and what the ray tracer samples.

A plane file holds one square, periodic grid together with its angular size,
comoving distance and redshift. The grid can be

- the lensing potential ψ (the usual "potentialPlane" products),
- the dimensionless projected density σ, in which case ψ is obtained by
  solving ∇²ψ = 2σ with an FFT, or
- the two components of the deflection angle directly.

On load a plane is turned into a [`LensPlane`]: two deflection grids α = ∇ψ
and four deflection-gradient grids U = ∇α, all in radians. Derivatives are
centered finite differences with periodic wrapping. Before that happens the
raw grid goes through the plane's [`PlaneTransform`], the random roll and
symmetry that decorrelate repeated use of the same plane.

Grids are indexed `[row, col]`; `col` runs along x and `row` along y.

*/

use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fits::{self, Header, HeaderValue};


/// Radians per degree.
pub const DEG_TO_RAD: f64 = PI / 180.;


/// What the grid of a plane file represents.
#[derive(Clone,Debug,PartialEq)]
pub enum PlaneField {
    /// The lensing potential, in rad².
    Potential(Array2<f64>),

    /// The dimensionless projected density.
    Density(Array2<f64>),

    /// The deflection angle, x component then y component, in radians.
    Deflection([Array2<f64>; 2]),
}

impl PlaneField {
    /// The side length of the grid, in pixels.
    pub fn resolution(&self) -> usize {
        match *self {
            PlaneField::Potential(ref g) | PlaneField::Density(ref g) => g.nrows(),
            PlaneField::Deflection(ref g) => g[0].nrows(),
        }
    }

    fn tag(&self) -> &'static str {
        match *self {
            PlaneField::Potential(_) => "potential",
            PlaneField::Density(_) => "density",
            PlaneField::Deflection(_) => "deflection",
        }
    }
}


/// The content of one lens-plane file.
#[derive(Clone,Debug,PartialEq)]
pub struct PlaneData {
    /// The grid itself.
    pub field: PlaneField,
    /// The side of the plane, in radians.
    pub angle: f64,
    /// Comoving distance of the plane, in Mpc.
    pub distance: f64,
    /// Redshift of the plane.
    pub redshift: f64,
}

impl PlaneData {
    /// Read a plane from a FITS file. See the crate documentation for the
    /// expected header keywords.
    pub fn read_fits<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let img = fits::read_image(path)?;

        let keyword = |k: &str| {
            img.header.get_f64(k)
                .ok_or_else(|| Error::malformed(path, format!("missing numeric keyword {}", k)))
        };

        let angle = keyword("ANGLE")? * DEG_TO_RAD;
        let redshift = keyword("Z")?;
        let distance = keyword("CHI")?;
        let kind = img.header.get_str("PLANE").unwrap_or("potential").to_lowercase();

        let square = |shape: &[usize]| shape.len() == 2 && shape[0] == shape[1] && shape[0] > 0;

        let field = match kind.as_str() {
            "potential" | "density" => {
                if !square(&img.shape) {
                    return Err(Error::malformed(path, format!("plane grid is not square: {:?}", img.shape)));
                }

                let grid = Array2::from_shape_vec((img.shape[0], img.shape[1]), img.data)
                    .map_err(|e| Error::malformed(path, e.to_string()))?;

                if kind == "potential" {
                    PlaneField::Potential(grid)
                } else {
                    PlaneField::Density(grid)
                }
            },
            "deflection" => {
                if img.shape.len() != 3 || img.shape[0] != 2 || !square(&img.shape[1..]) {
                    return Err(Error::malformed(path, format!("bad deflection plane shape {:?}", img.shape)));
                }

                let cube = Array3::from_shape_vec((2, img.shape[1], img.shape[2]), img.data)
                    .map_err(|e| Error::malformed(path, e.to_string()))?;
                PlaneField::Deflection([
                    cube.index_axis(Axis(0), 0).to_owned(),
                    cube.index_axis(Axis(0), 1).to_owned(),
                ])
            },
            other => {
                return Err(Error::malformed(path, format!("unknown plane kind {:?}", other)));
            },
        };

        Ok(PlaneData { field: field, angle: angle, distance: distance, redshift: redshift })
    }

    /// Write this plane as a FITS file.
    pub fn write_fits<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut header = Header::new();
        header.set("Z", HeaderValue::Float(self.redshift))
            .set("CHI", HeaderValue::Float(self.distance))
            .set("ANGLE", HeaderValue::Float(self.angle / DEG_TO_RAD))
            .set("PLANE", HeaderValue::Str(self.field.tag().to_owned()));

        let n = self.field.resolution();

        match self.field {
            PlaneField::Potential(ref g) | PlaneField::Density(ref g) => {
                let data: Vec<f64> = g.iter().cloned().collect();
                fits::write_image(path, &header, &[n, n], &data)
            },
            PlaneField::Deflection(ref g) => {
                let data: Vec<f64> = g[0].iter().chain(g[1].iter()).cloned().collect();
                fits::write_image(path, &header, &[2, n, n], &data)
            },
        }
    }
}


/// The capability of turning a plane reference into plane content. The ray
/// tracer only ever talks to planes through this trait.
pub trait PlaneLoader: Sync {
    /// Load the plane stored at `path`.
    fn load(&self, path: &Path) -> Result<PlaneData>;
}


/// Loads planes from FITS files on disk.
#[derive(Copy,Clone,Debug,Default)]
pub struct FitsPlaneLoader;

impl PlaneLoader for FitsPlaneLoader {
    fn load(&self, path: &Path) -> Result<PlaneData> {
        PlaneData::read_fits(path)
    }
}


/// Planes held in memory, keyed by the path they pretend to live at.
#[derive(Clone,Debug,Default)]
pub struct InMemoryPlanes {
    planes: HashMap<PathBuf, PlaneData>,
}

impl InMemoryPlanes {
    /// An empty set of planes.
    pub fn new() -> Self {
        InMemoryPlanes::default()
    }

    /// Register a plane under `path`.
    pub fn insert<P: Into<PathBuf>>(&mut self, path: P, plane: PlaneData) -> &mut Self {
        self.planes.insert(path.into(), plane);
        self
    }
}

impl PlaneLoader for InMemoryPlanes {
    fn load(&self, path: &Path) -> Result<PlaneData> {
        self.planes.get(path).cloned().ok_or_else(|| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::NotFound, "no such in-memory plane"))
        })
    }
}


/// A random cyclic roll of a plane plus one of the eight symmetries of the
/// square.
///
/// The roll is stored as a fraction of the plane side on each axis so that it
/// can be drawn before the plane resolution is known.
#[derive(Copy,Clone,Debug,PartialEq)]
pub struct PlaneTransform {
    /// Roll along x and y, as fractions of the plane side in `[0, 1)`.
    pub roll: [f64; 2],

    /// Symmetry index: `s % 4` quarter turns, mirrored first if `s >= 4`.
    pub symmetry: u8,
}

impl Default for PlaneTransform {
    fn default() -> Self {
        PlaneTransform { roll: [0., 0.], symmetry: 0 }
    }
}

impl PlaneTransform {
    /// Draw a transform. The symmetry stays the identity unless
    /// `symmetries` is true.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, symmetries: bool) -> Self {
        let roll = [rng.gen::<f64>(), rng.gen::<f64>()];
        let symmetry = if symmetries { rng.gen_range(0..8) } else { 0 };
        PlaneTransform { roll: roll, symmetry: symmetry }
    }

    /// The roll in whole pixels for a grid of side `n`.
    pub fn roll_pixels(&self, n: usize) -> [usize; 2] {
        let px = |f: f64| ((f * n as f64).floor() as usize).min(n.saturating_sub(1));
        [px(self.roll[0]), px(self.roll[1])]
    }

    /// Where output pixel `(row, col)` reads from, for a grid of side `n`.
    fn source_index(&self, row: usize, col: usize, n: usize) -> (usize, usize) {
        let [dx, dy] = self.roll_pixels(n);
        let (mut r, mut c) = ((row + dy) % n, (col + dx) % n);

        if self.symmetry >= 4 {
            c = n - 1 - c;
        }

        for _ in 0..(self.symmetry % 4) {
            let t = r;
            r = c;
            c = n - 1 - t;
        }

        (r, c)
    }

    /// Apply the transform to a scalar grid.
    pub fn apply(&self, grid: &Array2<f64>) -> Array2<f64> {
        let n = grid.nrows();

        Array2::from_shape_fn((n, n), |(r, c)| grid[self.source_index(r, c, n)])
    }

    /// Apply the transform to a deflection field. Unlike a scalar grid, the
    /// vector components themselves get mirrored and rotated.
    pub fn apply_vector(&self, field: &[Array2<f64>; 2]) -> [Array2<f64>; 2] {
        let n = field[0].nrows();

        let mut ax = Array2::zeros((n, n));
        let mut ay = Array2::zeros((n, n));

        for r in 0..n {
            for c in 0..n {
                let src = self.source_index(r, c, n);
                let (vx, vy) = self.rotate_vector(field[0][src], field[1][src]);
                ax[(r, c)] = vx;
                ay[(r, c)] = vy;
            }
        }

        [ax, ay]
    }

    /// Map a gradient taken at a source pixel into the output frame, so
    /// that transforming ∇ψ gives ∇ of the transformed ψ.
    fn rotate_vector(&self, mut vx: f64, mut vy: f64) -> (f64, f64) {
        // A quarter turn of the indices sends (x, y) to (-y, x); gradients
        // pick up the transpose of that.
        for _ in 0..(self.symmetry % 4) {
            let (sx, sy) = (vx, vy);
            vx = sy;
            vy = -sx;
        }

        if self.symmetry >= 4 {
            vx = -vx;
        }

        (vx, vy)
    }
}


/// A loaded, transformed plane, ready to be sampled.
#[derive(Clone,Debug)]
pub struct LensPlane {
    /// The side of the plane, in radians.
    pub angle: f64,

    /// Deflection angle grids, x then y.
    pub deflection: [Array2<f64>; 2],

    /// Deflection gradient grids: ∂αx/∂x, ∂αx/∂y, ∂αy/∂x, ∂αy/∂y.
    pub gradient: [Array2<f64>; 4],
}

impl LensPlane {
    /// Build the sampled fields from raw plane content.
    pub fn from_data(data: &PlaneData, transform: &PlaneTransform) -> Self {
        let n = data.field.resolution();
        let h = data.angle / n as f64;

        let (deflection, gradient) = match data.field {
            PlaneField::Potential(ref psi) => potential_derivatives(&transform.apply(psi), h),
            PlaneField::Density(ref sigma) => {
                let psi = solve_poisson(sigma, data.angle);
                potential_derivatives(&transform.apply(&psi), h)
            },
            PlaneField::Deflection(ref alpha) => {
                let alpha = transform.apply_vector(alpha);
                let gradient = [
                    central_x(&alpha[0], h), central_y(&alpha[0], h),
                    central_x(&alpha[1], h), central_y(&alpha[1], h),
                ];
                (alpha, gradient)
            },
        };

        LensPlane { angle: data.angle, deflection: deflection, gradient: gradient }
    }

    /// The side length of the grids, in pixels.
    pub fn resolution(&self) -> usize {
        self.deflection[0].nrows()
    }
}


fn central_x(g: &Array2<f64>, h: f64) -> Array2<f64> {
    let n = g.nrows();
    Array2::from_shape_fn((n, n), |(r, c)| {
        (g[(r, (c + 1) % n)] - g[(r, (c + n - 1) % n)]) / (2. * h)
    })
}

fn central_y(g: &Array2<f64>, h: f64) -> Array2<f64> {
    let n = g.nrows();
    Array2::from_shape_fn((n, n), |(r, c)| {
        (g[((r + 1) % n, c)] - g[((r + n - 1) % n, c)]) / (2. * h)
    })
}

fn potential_derivatives(psi: &Array2<f64>, h: f64) -> ([Array2<f64>; 2], [Array2<f64>; 4]) {
    let n = psi.nrows();
    let h2 = h * h;
    let up = |i: usize| (i + 1) % n;
    let down = |i: usize| (i + n - 1) % n;

    let psi_xx = Array2::from_shape_fn((n, n), |(r, c)| {
        (psi[(r, up(c))] - 2. * psi[(r, c)] + psi[(r, down(c))]) / h2
    });
    let psi_yy = Array2::from_shape_fn((n, n), |(r, c)| {
        (psi[(up(r), c)] - 2. * psi[(r, c)] + psi[(down(r), c)]) / h2
    });
    let psi_xy = Array2::from_shape_fn((n, n), |(r, c)| {
        (psi[(up(r), up(c))] - psi[(up(r), down(c))] - psi[(down(r), up(c))] + psi[(down(r), down(c))]) / (4. * h2)
    });

    let deflection = [central_x(psi, h), central_y(psi, h)];
    let gradient = [psi_xx, psi_xy.clone(), psi_xy, psi_yy];
    (deflection, gradient)
}


/// Solve ∇²ψ = 2σ on a periodic square of side `angle` (radians). The mean
/// of σ does not source anything.
pub fn solve_poisson(sigma: &Array2<f64>, angle: f64) -> Array2<f64> {
    let n = sigma.nrows();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = sigma.iter().map(|&v| Complex::new(v, 0.)).collect();

    // Rows are contiguous; transpose to do the columns.
    forward.process(&mut buf);
    transpose(&mut buf, n);
    forward.process(&mut buf);

    // `buf` is now indexed [kx, ky].
    let dk = 2. * PI / angle;
    let freq = |i: usize| if i <= n / 2 { i as f64 } else { i as f64 - n as f64 };

    for kx in 0..n {
        for ky in 0..n {
            let k2 = (freq(kx) * dk).powi(2) + (freq(ky) * dk).powi(2);
            let slot = &mut buf[kx * n + ky];

            if k2 == 0. {
                *slot = Complex::new(0., 0.);
            } else {
                *slot = *slot * (-2. / k2);
            }
        }
    }

    inverse.process(&mut buf);
    transpose(&mut buf, n);
    inverse.process(&mut buf);

    let norm = 1. / (n * n) as f64;
    Array2::from_shape_fn((n, n), |(r, c)| buf[r * n + c].re * norm)
}

fn transpose(buf: &mut [Complex<f64>], n: usize) {
    for r in 0..n {
        for c in (r + 1)..n {
            buf.swap(r * n + c, c * n + r);
        }
    }
}
