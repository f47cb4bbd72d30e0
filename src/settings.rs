// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Settings files.

A ray-tracing campaign is described by one TOML file whose `mode` key picks
one of three shapes:

```toml
mode = "map"
directory_name = "Maps"
plane_set = "Planes"
mix_nbody_realizations = [1, 2, 3]
mix_cut_points = [0, 1, 2]
mix_normals = [0, 1, 2]
lens_map_realizations = 16
map_angle = 3.5
map_resolution = 512
source_redshift = 2.0
seed = 0
shear = true
```

`"telescopic"` replaces the plane lists by one list per collection and adds
`collections` and `cut_redshifts`; `"catalog"` traces galaxy catalogs
instead of grids. Where the machine keeps its files is a separate
[`EnvironmentSettings`] file.

*/

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};


/// Where simulation products live on this machine.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct EnvironmentSettings {
    /// Small files: settings, logs, bookkeeping.
    pub home: PathBuf,
    /// Bulk data: planes, maps, catalogs.
    pub storage: PathBuf,
}

impl EnvironmentSettings {
    /// Read an environment file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_toml(path.as_ref())
    }
}


/// A complete settings file.
#[derive(Clone,Debug,Deserialize,PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Settings {
    /// Maps from a single simulation collection.
    Map(MapSettings),
    /// Maps from several collections stacked in redshift.
    Telescopic(TelescopicMapSettings),
    /// Shear catalogs at the positions of given galaxies.
    Catalog(CatalogSettings),
}

impl Settings {
    /// Read and validate a settings file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = load_toml(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from a string.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)
            .map_err(|e| Error::Settings { path: PathBuf::from("<string>"), source: e })?;
        settings.validate()?;
        Ok(settings)
    }

    /// The name of the mode, as written in the file.
    pub fn mode(&self) -> &'static str {
        match *self {
            Settings::Map(_) => "map",
            Settings::Telescopic(_) => "telescopic",
            Settings::Catalog(_) => "catalog",
        }
    }

    /// Check everything that can be checked without touching the disk.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Settings::Map(ref s) => {
                s.maps.validate()?;
                s.planes.validate("")
            },
            Settings::Telescopic(ref s) => s.validate(),
            Settings::Catalog(ref s) => s.validate(),
        }
    }
}


fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    toml::from_str(&text).map_err(|e| Error::Settings { path: path.to_owned(), source: e })
}

fn default_true() -> bool {
    true
}

fn default_fits() -> String {
    "fits".to_owned()
}

fn default_txt() -> String {
    "txt".to_owned()
}


/// Which randomized plane variants one collection can contribute.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct PlaneChoices {
    /// Name of the plane set directory inside each initial condition.
    pub plane_set: String,
    /// Candidate N-body realizations (initial condition numbers).
    pub mix_nbody_realizations: Vec<u32>,
    /// Candidate cut points.
    pub mix_cut_points: Vec<u32>,
    /// Candidate normal axes.
    pub mix_normals: Vec<u32>,
}

impl PlaneChoices {
    fn validate(&self, which: &str) -> Result<()> {
        let lists = [
            ("mix_nbody_realizations", self.mix_nbody_realizations.len()),
            ("mix_cut_points", self.mix_cut_points.len()),
            ("mix_normals", self.mix_normals.len()),
        ];

        for &(name, len) in &lists {
            if len == 0 {
                return Err(Error::config(format!("{}{} must not be empty", name, which)));
            }
        }

        if self.plane_set.is_empty() {
            return Err(Error::config(format!("plane_set{} must not be empty", which)));
        }

        Ok(())
    }
}


/// Settings shared by both map modes.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct MapOptions {
    /// Name of the map set directory.
    pub directory_name: String,
    /// Replace these settings by the `settings.toml` stored with the map set.
    #[serde(default)]
    pub override_with_local: bool,
    /// Output file format. Only `fits` is supported.
    #[serde(default = "default_fits")]
    pub format: String,
    /// Explicit path of the plane manifest; by default `info.txt` in the
    /// first plane directory.
    #[serde(default)]
    pub plane_info_file: Option<PathBuf>,
    /// How many maps to make.
    pub lens_map_realizations: usize,
    /// Side of the maps, in degrees.
    pub map_angle: f64,
    /// Side of the maps, in pixels.
    pub map_resolution: usize,
    /// Redshift of the source plane.
    pub source_redshift: f64,
    /// Base random seed; worker *n* uses `seed + n`.
    pub seed: u64,
    /// Whether to save convergence maps.
    #[serde(default = "default_true")]
    pub convergence: bool,
    /// Whether to save shear maps.
    #[serde(default)]
    pub shear: bool,
    /// Whether to save omega maps.
    #[serde(default)]
    pub omega: bool,
    /// Also randomize planes with one of the eight symmetries of the square.
    #[serde(default)]
    pub randomize_symmetry: bool,
}

impl MapOptions {
    fn validate(&self) -> Result<()> {
        if self.format != "fits" {
            return Err(Error::config(format!("unsupported map format {:?}", self.format)));
        }

        if self.lens_map_realizations == 0 {
            return Err(Error::config("lens_map_realizations must be positive"));
        }

        if self.map_resolution < 2 {
            return Err(Error::config("map_resolution must be at least 2"));
        }

        if !(self.map_angle.is_finite() && self.map_angle > 0.) {
            return Err(Error::config(format!("bad map_angle {}", self.map_angle)));
        }

        if !(self.source_redshift.is_finite() && self.source_redshift > 0.) {
            return Err(Error::config(format!("bad source_redshift {}", self.source_redshift)));
        }

        Ok(())
    }
}


/// Maps from a single simulation collection.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct MapSettings {
    /// General map options.
    #[serde(flatten)]
    pub maps: MapOptions,
    /// Where the planes come from.
    #[serde(flatten)]
    pub planes: PlaneChoices,
}


/// Maps from several collections, each covering a redshift range.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct TelescopicMapSettings {
    /// General map options.
    #[serde(flatten)]
    pub maps: MapOptions,
    /// Geometry identifiers of the collections, nearest first.
    pub collections: Vec<String>,
    /// Lowest lens redshift served by each collection. Starts at 0.
    pub cut_redshifts: Vec<f64>,
    /// Plane set name, per collection.
    pub plane_set: Vec<String>,
    /// Candidate N-body realizations, per collection.
    pub mix_nbody_realizations: Vec<Vec<u32>>,
    /// Candidate cut points, per collection.
    pub mix_cut_points: Vec<Vec<u32>>,
    /// Candidate normal axes, per collection.
    pub mix_normals: Vec<Vec<u32>>,
}

impl TelescopicMapSettings {
    /// The plane choices of each collection.
    pub fn plane_choices(&self) -> Vec<PlaneChoices> {
        (0..self.collections.len()).map(|c| PlaneChoices {
            plane_set: self.plane_set[c].clone(),
            mix_nbody_realizations: self.mix_nbody_realizations[c].clone(),
            mix_cut_points: self.mix_cut_points[c].clone(),
            mix_normals: self.mix_normals[c].clone(),
        }).collect()
    }

    fn validate(&self) -> Result<()> {
        self.maps.validate()?;
        let n = self.collections.len();

        if n == 0 {
            return Err(Error::config("telescopic settings need at least one collection"));
        }

        let lists = [
            ("cut_redshifts", self.cut_redshifts.len()),
            ("plane_set", self.plane_set.len()),
            ("mix_nbody_realizations", self.mix_nbody_realizations.len()),
            ("mix_cut_points", self.mix_cut_points.len()),
            ("mix_normals", self.mix_normals.len()),
        ];

        for &(name, len) in &lists {
            if len != n {
                return Err(Error::config(format!(
                    "you need to specify a setting {} for each of the {} collections (got {})", name, n, len
                )));
            }
        }

        if self.cut_redshifts[0] != 0. {
            return Err(Error::config("cut_redshifts must start at 0"));
        }

        if self.cut_redshifts.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::config("cut_redshifts must be strictly increasing"));
        }

        for (c, choices) in self.plane_choices().iter().enumerate() {
            choices.validate(&format!(" (collection {})", c))?;
        }

        Ok(())
    }
}


/// Shear catalogs at the positions of existing galaxy catalogs.
#[derive(Clone,Debug,Deserialize,PartialEq)]
pub struct CatalogSettings {
    /// Name of the catalog directory.
    pub directory_name: String,
    /// Replace these settings by the `settings.toml` stored with the catalogs.
    #[serde(default)]
    pub override_with_local: bool,
    /// Output file format. Only `txt` is supported.
    #[serde(default = "default_txt")]
    pub format: String,
    /// Where the planes come from.
    #[serde(flatten)]
    pub planes: PlaneChoices,
    /// Explicit path of the plane manifest.
    #[serde(default)]
    pub plane_info_file: Option<PathBuf>,
    /// Galaxy position catalogs, traced together in this order.
    pub input_files: Vec<PathBuf>,
    /// Expected number of galaxies over all input files.
    pub total_num_galaxies: usize,
    /// Angle unit the input catalogs must declare.
    pub catalog_angle_unit: String,
    /// How many catalogs to make.
    pub lens_catalog_realizations: usize,
    /// Bucket the outputs in subdirectories of this many realizations.
    #[serde(default)]
    pub realizations_per_subdirectory: Option<usize>,
    /// Base random seed; worker *n* uses `seed + n`.
    pub seed: u64,
    /// Also randomize planes with one of the eight symmetries of the square.
    #[serde(default)]
    pub randomize_symmetry: bool,
}

impl CatalogSettings {
    /// The effective bucket size for output subdirectories.
    pub fn realizations_in_subdirectory(&self) -> usize {
        self.realizations_per_subdirectory.unwrap_or(self.lens_catalog_realizations)
    }

    fn validate(&self) -> Result<()> {
        self.planes.validate("")?;

        if self.format != "txt" {
            return Err(Error::config(format!("unsupported catalog format {:?}", self.format)));
        }

        if self.input_files.is_empty() {
            return Err(Error::config("input_files must not be empty"));
        }

        if self.lens_catalog_realizations == 0 {
            return Err(Error::config("lens_catalog_realizations must be positive"));
        }

        let per_subdir = self.realizations_in_subdirectory();

        if per_subdir == 0 || self.lens_catalog_realizations % per_subdir != 0 {
            return Err(Error::config(format!(
                "{} realizations cannot be bucketed in subdirectories of {}",
                self.lens_catalog_realizations, per_subdir
            )));
        }

        Ok(())
    }
}
