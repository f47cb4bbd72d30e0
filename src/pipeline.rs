// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Where a simulation campaign keeps its files.

Everything hangs off the two roots of the [`EnvironmentSettings`]:

```text
<root>/<cosmo_id>                               a model
<root>/<cosmo_id>/<geometry_id>                 a collection
<root>/<cosmo_id>/<geometry_id>/ic<N>           an initial condition
<root>/<cosmo_id>/<geometry_id>/ic<N>/<planes>  a plane set
<root>/<cosmo_id>/<geometry_id>/<name>          a map set or catalog
<root>/<cosmo_id>/<name>                        a telescopic map set
```

where `<root>` is `home` for small files and `storage` for bulk data. The
model identifier lists cosmological parameters, as in
`Om0.260_Ol0.740_w-1.000_si0.800`; the geometry identifier gives the
resolution and box side in Mpc/h, as in `512b240`.

*/

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::cosmology::{Cosmology, Wcdm};
use crate::error::{Error, Result};
use crate::settings::EnvironmentSettings;


/// The root of a simulation campaign.
#[derive(Clone,Debug,PartialEq)]
pub struct SimulationBatch {
    /// The directory roots.
    pub environment: EnvironmentSettings,
}

impl SimulationBatch {
    /// A batch rooted at the given environment.
    pub fn new(environment: EnvironmentSettings) -> Self {
        SimulationBatch { environment: environment }
    }

    /// The model with the given identifier.
    pub fn model(&self, cosmo_id: &str) -> Result<SimulationModel> {
        let cosmology = parse_cosmo_id(cosmo_id)?;

        Ok(SimulationModel {
            cosmo_id: cosmo_id.to_owned(),
            cosmology: cosmology,
            home: self.environment.home.join(cosmo_id),
            storage: self.environment.storage.join(cosmo_id),
        })
    }
}


/// A set of simulations sharing a cosmology.
#[derive(Clone,Debug,PartialEq)]
pub struct SimulationModel {
    /// The identifier, e.g. `Om0.300_Ol0.700`.
    pub cosmo_id: String,
    /// The parsed cosmology.
    pub cosmology: Wcdm,
    /// Home directory.
    pub home: PathBuf,
    /// Storage directory.
    pub storage: PathBuf,
}

impl SimulationModel {
    /// The collection with the given geometry identifier.
    pub fn collection(&self, geometry_id: &str) -> Result<SimulationCollection> {
        let (nside, box_mpc_over_h) = parse_geometry_id(geometry_id)?;

        Ok(SimulationCollection {
            geometry_id: geometry_id.to_owned(),
            nside: nside,
            box_size: box_mpc_over_h * self.cosmology.mpc_over_h(),
            home: self.home.join(geometry_id),
            storage: self.storage.join(geometry_id),
        })
    }

    /// A map set spanning several collections.
    pub fn telescopic_map_set(&self, name: &str) -> Directories {
        Directories { home: self.home.join(name), storage: self.storage.join(name) }
    }
}


/// Simulations sharing a cosmology, a box size and a resolution.
#[derive(Clone,Debug,PartialEq)]
pub struct SimulationCollection {
    /// The identifier, e.g. `512b240`.
    pub geometry_id: String,
    /// Particles per box side.
    pub nside: u32,
    /// Box side, in Mpc.
    pub box_size: f64,
    /// Home directory.
    pub home: PathBuf,
    /// Storage directory.
    pub storage: PathBuf,
}

impl SimulationCollection {
    /// The directory holding the planes of one initial condition.
    pub fn plane_dir(&self, ic: u32, plane_set: &str) -> PathBuf {
        self.storage.join(format!("ic{}", ic)).join(plane_set)
    }

    /// The file holding one lens plane.
    pub fn plane_path(&self, ic: u32, plane_set: &str, snapshot: u32, cut: u32, normal: u32) -> PathBuf {
        self.plane_dir(ic, plane_set)
            .join(format!("snap{}_potentialPlane{}_normal{}.fits", snapshot, cut, normal))
    }

    /// A map set made from this collection.
    pub fn map_set(&self, name: &str) -> Directories {
        Directories { home: self.home.join(name), storage: self.storage.join(name) }
    }

    /// A set of simulated catalogs made from this collection.
    pub fn catalog(&self, name: &str) -> Directories {
        Directories { home: self.home.join(name), storage: self.storage.join(name) }
    }
}


/// The two directories of a map set or a catalog set.
#[derive(Clone,Debug,PartialEq)]
pub struct Directories {
    /// Where settings live.
    pub home: PathBuf,
    /// Where products are written.
    pub storage: PathBuf,
}

impl Directories {
    /// The settings file stored with the products.
    pub fn local_settings(&self) -> PathBuf {
        self.home.join("settings.toml")
    }

    /// Where an output file goes.
    pub fn output<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.storage.join(name)
    }
}


/// Build a cosmology from an identifier like `Om0.260_Ol0.740_w-1.000`.
/// Parameters that are not mentioned keep their WMAP9 values.
pub fn parse_cosmo_id(cosmo_id: &str) -> Result<Wcdm> {
    let re = Regex::new(r"^([a-zA-Z]+)([0-9.eE+-]+)$")
        .map_err(|e| Error::invariant(e.to_string()))?;
    let mut cosmo = Wcdm::default();

    for part in cosmo_id.split('_') {
        let caps = re.captures(part).ok_or_else(|| {
            Error::config(format!("cannot parse parameter {:?} of model identifier {:?}", part, cosmo_id))
        })?;

        let value = caps[2].parse::<f64>().map_err(|_| {
            Error::config(format!("bad value in {:?} of model identifier {:?}", part, cosmo_id))
        })?;

        let slot = match &caps[1] {
            "Om" => &mut cosmo.om0,
            "Ol" => &mut cosmo.ode0,
            "w" => &mut cosmo.w0,
            "wa" => &mut cosmo.wa,
            "h" => &mut cosmo.h,
            "Ob" => &mut cosmo.ob0,
            "si" => &mut cosmo.sigma8,
            "ns" => &mut cosmo.ns,
            other => {
                return Err(Error::config(format!(
                    "unknown parameter {:?} in model identifier {:?}", other, cosmo_id
                )));
            },
        };

        *slot = value;
    }

    Ok(cosmo)
}


/// Split a geometry identifier like `512b240` into the resolution and the
/// box side in Mpc/h.
pub fn parse_geometry_id(geometry_id: &str) -> Result<(u32, f64)> {
    let bad = || Error::config(format!("malformed geometry identifier {:?}", geometry_id));
    let (nside, box_size) = geometry_id.split_once('b').ok_or_else(bad)?;
    let nside = nside.parse::<u32>().map_err(|_| bad())?;
    let box_size = box_size.parse::<f64>().map_err(|_| bad())?;

    if nside == 0 || !(box_size > 0.) {
        return Err(bad());
    }

    Ok((nside, box_size))
}
