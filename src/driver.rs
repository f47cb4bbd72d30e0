// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Ray-tracing campaigns: from settings to maps and catalogs on disk.

For every realization a worker picks, for every snapshot listed in the plane
manifest, one randomized plane variant (an N-body realization, a cut point
and a normal axis), hands the resulting lens sequence to a
[`RayTracer`](crate::tracer::RayTracer), and saves what comes out. All random
draws come from the worker's own generator, in a fixed order, so a given
seed and worker count always produce the same products.

- [`single_redshift`] makes convergence, shear and omega maps, either from a
  single collection or "telescopically" from several collections each
  covering a redshift range.
- [`simulated_catalog`] makes shear catalogs at the positions and redshifts
  of existing galaxy catalogs.

*/

use rand::Rng;
use slog::Logger;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::catalog::{self, Catalog};
use crate::error::{Error, Result};
use crate::manifest::PlaneManifest;
use crate::maps::{LensingMap, MapKind};
use crate::pipeline::{Directories, SimulationBatch, SimulationCollection, SimulationModel};
use crate::plane::{PlaneLoader, DEG_TO_RAD};
use crate::pool::{partition, Worker};
use crate::settings::{CatalogSettings, MapOptions, PlaneChoices, Settings};
use crate::tracer::{RayBundle, RayTracer, SourceRedshift};


/// Plane variant choices for every (realization, snapshot) pair, drawn up
/// front. Each entry indexes into the N-body realization, cut point and
/// normal lists, in that order.
#[derive(Clone,Debug,PartialEq)]
pub struct RandomizationMatrix {
    snapshots: usize,
    picks: Vec<[usize; 3]>,
}

impl RandomizationMatrix {
    /// Draw a `realizations × snapshots` matrix. `choices` gives the length
    /// of each candidate list, none of which may be zero. All N-body
    /// realization indices are drawn first, then all cut points, then all
    /// normals.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R, realizations: usize, snapshots: usize, choices: [usize; 3]) -> Result<Self> {
        if choices.iter().any(|n| *n == 0) {
            return Err(Error::config("cannot randomize planes over an empty candidate list"));
        }

        let mut picks = vec![[0; 3]; realizations * snapshots];

        for (col, &n) in choices.iter().enumerate() {
            for p in &mut picks {
                p[col] = rng.gen_range(0..n);
            }
        }

        Ok(RandomizationMatrix { snapshots: snapshots, picks: picks })
    }

    /// `(realizations, snapshots)`.
    pub fn shape(&self) -> (usize, usize) {
        if self.snapshots == 0 {
            (0, 0)
        } else {
            (self.picks.len() / self.snapshots, self.snapshots)
        }
    }

    /// The choices for snapshot `s` of realization `r`.
    pub fn get(&self, r: usize, s: usize) -> [usize; 3] {
        self.picks[r * self.snapshots + s]
    }
}


/// One collection and the plane variants it may contribute.
#[derive(Clone,Debug)]
struct PlaneSource {
    collection: SimulationCollection,
    choices: PlaneChoices,
}

impl PlaneSource {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> [usize; 3] {
        [
            rng.gen_range(0..self.choices.mix_nbody_realizations.len()),
            rng.gen_range(0..self.choices.mix_cut_points.len()),
            rng.gen_range(0..self.choices.mix_normals.len()),
        ]
    }

    fn describe(&self, pick: [usize; 3]) -> (u32, u32, u32) {
        (
            self.choices.mix_nbody_realizations[pick[0]],
            self.choices.mix_cut_points[pick[1]],
            self.choices.mix_normals[pick[2]],
        )
    }

    fn path(&self, pick: [usize; 3], snapshot: u32) -> PathBuf {
        let (ic, cut, normal) = self.describe(pick);
        self.collection.plane_path(ic, &self.choices.plane_set, snapshot, cut, normal)
    }

    /// The manifest shared by every initial condition of this source.
    fn default_info_file(&self) -> PathBuf {
        self.collection
            .plane_dir(self.choices.mix_nbody_realizations[0], &self.choices.plane_set)
            .join("info.txt")
    }

    fn log_origin(&self, logger: &Logger) {
        let ics: Vec<String> = self.choices.mix_nbody_realizations.iter().map(|n| n.to_string()).collect();
        let dir = self.collection.storage.join(format!("ic{}", ics.join("-"))).join(&self.choices.plane_set);
        info!(logger, "reading planes"; "from" => %dir.display());
    }
}


/// The collection that serves a lens at redshift `z`: the last one whose
/// cut redshift is not above `z`.
fn collection_for(z: f64, cut_redshifts: &[f64]) -> usize {
    cut_redshifts.iter().rposition(|c| z >= *c).unwrap_or(0)
}


fn split_id(id: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = id.split('|').collect();

    if parts.len() > 2 {
        return Err(Error::config(format!("format error in {:?}: too many '|'", id)));
    }

    Ok(parts)
}

fn mode_mismatch(id: &str, settings: &Settings) -> Error {
    Error::config(format!("identifier {:?} does not fit {} settings", id, settings.mode()))
}

fn load_local(dirs: &Directories, mode: &str, worker: &Worker, logger: &Logger) -> Result<Settings> {
    let path = dirs.local_settings();
    let local = Settings::load(&path)?;

    if local.mode() != mode {
        return Err(Error::config(format!(
            "local settings {} are for {} mode, expected {}", path.display(), local.mode(), mode
        )));
    }

    if worker.ctx.is_master() {
        warn!(logger, "overriding settings with the ones stored with the products"; "path" => %path.display());
    }

    Ok(local)
}

fn secs(t: Instant) -> f64 {
    t.elapsed().as_secs_f64()
}


/// Map options plus where the planes come from, whatever the map mode.
struct MapPlan<'s> {
    options: &'s MapOptions,
    sources: Vec<PlaneSource>,
    cut_redshifts: Vec<f64>,
}

impl<'s> MapPlan<'s> {
    fn new(model: &SimulationModel, id: &str, parts: &[&str], settings: &'s Settings) -> Result<Self> {
        match (parts.len(), settings) {
            (2, &Settings::Map(ref s)) => Ok(MapPlan {
                options: &s.maps,
                sources: vec![PlaneSource { collection: model.collection(parts[1])?, choices: s.planes.clone() }],
                cut_redshifts: vec![0.],
            }),
            (1, &Settings::Telescopic(ref s)) => {
                let mut sources = Vec::new();

                for (geometry_id, choices) in s.collections.iter().zip(s.plane_choices()) {
                    sources.push(PlaneSource { collection: model.collection(geometry_id)?, choices: choices });
                }

                Ok(MapPlan { options: &s.maps, sources: sources, cut_redshifts: s.cut_redshifts.clone() })
            },
            (_, other) => Err(mode_mismatch(id, other)),
        }
    }

    fn enabled_kinds(&self) -> Vec<MapKind> {
        let mut kinds = Vec::new();

        if self.options.convergence {
            kinds.push(MapKind::Convergence);
        }

        if self.options.shear {
            kinds.push(MapKind::Shear);
        }

        if self.options.omega {
            kinds.push(MapKind::Omega);
        }

        kinds
    }
}


/// Make lensing maps at a single source redshift.
///
/// `id` is `"<cosmo_id>|<geometry_id>"` for [`Settings::Map`] and just
/// `"<cosmo_id>"` for [`Settings::Telescopic`]. Maps are written to the map
/// set storage directory, which must exist.
pub fn single_redshift(
    worker: &Worker, batch: &SimulationBatch, settings: &Settings, id: &str,
    loader: &dyn PlaneLoader, logger: &Logger
) -> Result<()> {
    settings.validate()?;
    let parts = split_id(id)?;
    let model = batch.model(parts[0])?;

    let map_set = match (parts.len(), settings) {
        (2, &Settings::Map(ref s)) => model.collection(parts[1])?.map_set(&s.maps.directory_name),
        (1, &Settings::Telescopic(ref s)) => model.telescopic_map_set(&s.maps.directory_name),
        (_, other) => return Err(mode_mismatch(id, other)),
    };

    let override_with_local = match *settings {
        Settings::Map(ref s) => s.maps.override_with_local,
        Settings::Telescopic(ref s) => s.maps.override_with_local,
        Settings::Catalog(_) => false,
    };

    let local: Settings;
    let settings = if override_with_local {
        local = load_local(&map_set, settings.mode(), worker, logger)?;
        &local
    } else {
        settings
    };

    let plan = MapPlan::new(&model, id, &parts, settings)?;
    let opts = plan.options;
    let ctx = worker.ctx;
    let mut rng = ctx.rng(opts.seed);

    let range = partition(opts.lens_map_realizations, ctx.size, ctx.rank)?;
    debug!(logger, "assigned map realizations"; "rank" => ctx.rank, "first" => range.start + 1, "last" => range.end);

    if ctx.is_master() {
        for source in &plan.sources {
            source.log_origin(logger);
        }
    }

    let info_file = opts.plane_info_file.clone().unwrap_or_else(|| plan.sources[0].default_info_file());

    if ctx.is_master() {
        info!(logger, "reading lens plane summary"; "path" => %info_file.display());
    }

    let manifest = PlaneManifest::read(&info_file, &model.cosmology)?;

    if ctx.is_master() {
        info!(logger, "lensing maps will be saved"; "to" => %map_set.storage.display());
    }

    let angle = opts.map_angle * DEG_TO_RAD;
    let rays = RayBundle::grid(angle, opts.map_resolution);
    let kinds = plan.enabled_kinds();
    let begin = Instant::now();

    for r in range {
        let start = Instant::now();
        let mut tracer = RayTracer::new(&model.cosmology, loader, logger);

        for (s, entry) in manifest.entries.iter().enumerate() {
            let source = &plan.sources[collection_for(entry.redshift, &plan.cut_redshifts)];
            let pick = source.draw(&mut rng);
            let (ic, cut, normal) = source.describe(pick);

            debug!(logger, "plane choice";
                   "realization" => r, "snapshot" => s, "ic" => ic, "cut" => cut, "normal" => normal);
            info!(logger, "adding lens"; "redshift" => entry.redshift);

            tracer.add_lens(source.path(pick, entry.snapshot), entry.distance, entry.redshift)?;
        }

        info!(logger, "plane specification reading completed"; "seconds" => secs(start));
        let mut last = Instant::now();

        tracer.reorder_lenses(&mut rng, opts.randomize_symmetry)?;
        info!(logger, "reordering completed"; "seconds" => secs(last));
        last = Instant::now();

        let jacobians = tracer.shoot_jacobians(&rays, SourceRedshift::Uniform(opts.source_redshift))?;
        tracer.release_planes();
        info!(logger, "Jacobian ray tracing completed"; "realization" => r + 1, "seconds" => secs(last));
        last = Instant::now();

        for &kind in &kinds {
            let map = LensingMap::from_jacobians(kind, &jacobians, angle, opts.map_resolution)?;
            let path = map_set.output(kind.file_name(opts.source_redshift, r, &opts.format));
            info!(logger, "saving map"; "kind" => kind.prefix(), "path" => %path.display());
            map.save(&path)?;
        }

        info!(logger, "weak lensing calculations completed"; "realization" => r + 1, "seconds" => secs(last));
    }

    worker.barrier()?;

    if ctx.is_master() {
        info!(logger, "total runtime"; "seconds" => secs(begin));
    }

    Ok(())
}


/// Galaxy positions and redshifts gathered from several input catalogs.
struct Galaxies {
    inputs: Vec<Catalog>,
    offsets: Vec<usize>,
    rays: RayBundle,
    redshifts: Vec<f64>,
}

impl Galaxies {
    fn gather(settings: &CatalogSettings, save: &Directories, worker: &Worker, logger: &Logger) -> Result<Self> {
        let master = worker.ctx.is_master();
        let to_rad = catalog::radians_per_unit(&settings.catalog_angle_unit).ok_or_else(|| {
            Error::config(format!("unknown catalog angle unit {:?}", settings.catalog_angle_unit))
        })?;

        let mut inputs = Vec::with_capacity(settings.input_files.len());

        for file in &settings.input_files {
            if master {
                info!(logger, "reading galaxy positions and redshifts"; "path" => %file.display());
            }

            let cat = Catalog::read(file)?;

            if master {
                info!(logger, "galaxy catalog read"; "path" => %file.display(), "n_galaxies" => cat.len());
            }

            let unit = cat.meta("AUNIT").ok_or_else(|| Error::malformed(file, "no AUNIT metadata"))?;

            if unit != settings.catalog_angle_unit {
                return Err(Error::config(format!(
                    "catalog angle units, {}, do not match the ones in the settings, {} ({})",
                    unit, settings.catalog_angle_unit, file.display()
                )));
            }

            for col in &["x", "y", "z"] {
                if cat.column(col).is_none() {
                    return Err(Error::malformed(file, format!("no {:?} column", col)));
                }
            }

            if master {
                if let Some(name) = file.file_name() {
                    cat.write(save.output(name))?;
                }
            }

            inputs.push(cat);
        }

        let counts: Vec<usize> = inputs.iter().map(|c| c.len()).collect();
        let offsets = catalog::galaxy_offsets(&counts, settings.total_num_galaxies)?;

        let gather = |name: &str, scale: f64| -> Vec<f64> {
            inputs.iter()
                .flat_map(|c| c.column(name).unwrap_or(&[]).iter().map(move |v| v * scale))
                .collect()
        };

        let rays = RayBundle::new(gather("x", to_rad), gather("y", to_rad))?;
        let redshifts = gather("z", 1.);

        Ok(Galaxies { inputs: inputs, offsets: offsets, rays: rays, redshifts: redshifts })
    }
}


/// Make shear catalogs at the positions of the galaxies in the input
/// catalogs. `id` is `"<cosmo_id>|<geometry_id>"`.
///
/// Every worker reads all input catalogs and checks the galaxy count before
/// anything is traced. Worker 0 writes a copy of each input catalog next to
/// the outputs and creates the output subdirectories.
pub fn simulated_catalog(
    worker: &Worker, batch: &SimulationBatch, settings: &Settings, id: &str,
    loader: &dyn PlaneLoader, logger: &Logger
) -> Result<()> {
    settings.validate()?;
    let parts = split_id(id)?;

    let s = match (parts.len(), settings) {
        (2, &Settings::Catalog(ref s)) => s,
        (_, other) => return Err(mode_mismatch(id, other)),
    };

    let model = batch.model(parts[0])?;
    let collection = model.collection(parts[1])?;
    let save = collection.catalog(&s.directory_name);

    let local: Settings;
    let s = if s.override_with_local {
        local = load_local(&save, "catalog", worker, logger)?;
        match local {
            Settings::Catalog(ref l) => l,
            ref other => return Err(mode_mismatch(id, other)),
        }
    } else {
        s
    };

    let ctx = worker.ctx;
    let mut rng = ctx.rng(s.seed);

    if ctx.is_master() {
        info!(logger, "lensing catalogs will be saved"; "to" => %save.storage.display());
    }

    let galaxies = Galaxies::gather(s, &save, worker, logger)?;

    let per_subdir = s.realizations_in_subdirectory();
    let subdirs = catalog::subdirectories(s.lens_catalog_realizations, per_subdir)?;

    if ctx.is_master() {
        for d in &subdirs {
            let dir = save.output(d);

            if !dir.exists() {
                info!(logger, "creating catalog subdirectory"; "path" => %dir.display());
                fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
            }
        }
    }

    worker.barrier()?;

    let range = partition(s.lens_catalog_realizations, ctx.size, ctx.rank)?;
    debug!(logger, "assigned catalog realizations"; "rank" => ctx.rank, "first" => range.start + 1, "last" => range.end);

    let source = PlaneSource { collection: collection.clone(), choices: s.planes.clone() };

    if ctx.is_master() {
        source.log_origin(logger);
    }

    let info_file = s.plane_info_file.clone().unwrap_or_else(|| source.default_info_file());
    let manifest = PlaneManifest::read(&info_file, &model.cosmology)?;

    let matrix = RandomizationMatrix::draw(
        &mut rng, s.lens_catalog_realizations, manifest.len(),
        [
            s.planes.mix_nbody_realizations.len(),
            s.planes.mix_cut_points.len(),
            s.planes.mix_normals.len(),
        ],
    )?;

    if ctx.is_master() {
        debug!(logger, "randomization matrix drawn"; "shape" => ?matrix.shape());
    }

    let begin = Instant::now();

    for r in range {
        let start = Instant::now();
        let mut tracer = RayTracer::new(&model.cosmology, loader, logger);

        for (snap, entry) in manifest.entries.iter().enumerate() {
            info!(logger, "adding lens"; "redshift" => entry.redshift);
            tracer.add_lens(source.path(matrix.get(r, snap), entry.snapshot), entry.distance, entry.redshift)?;
        }

        info!(logger, "plane specification reading completed"; "seconds" => secs(start));
        let mut last = Instant::now();

        tracer.reorder_lenses(&mut rng, s.randomize_symmetry)?;
        info!(logger, "reordering completed"; "seconds" => secs(last));
        last = Instant::now();

        let jacobians = tracer.shoot_jacobians(&galaxies.rays, SourceRedshift::PerRay(&galaxies.redshifts))?;
        tracer.release_planes();
        info!(logger, "Jacobian ray tracing completed"; "realization" => r + 1, "seconds" => secs(last));
        last = Instant::now();

        let shear = jacobians.shear();

        for (n, (file, input)) in s.input_files.iter().zip(galaxies.inputs.iter()).enumerate() {
            let rows = galaxies.offsets[n]..galaxies.offsets[n] + input.len();
            let mut out = Catalog::new();
            out.set_meta("AUNIT", s.catalog_angle_unit.as_str());
            out.push_column("shear1", shear.row(0).iter().skip(rows.start).take(rows.len()).cloned().collect())?;
            out.push_column("shear2", shear.row(1).iter().skip(rows.start).take(rows.len()).cloned().collect())?;

            for name in input.column_names() {
                if let Some(col) = input.column(name) {
                    out.push_column(name.as_str(), col.to_vec())?;
                }
            }

            let file_name = catalog::shear_catalog_name(file, r, &s.format);
            let path = if subdirs.is_empty() {
                save.output(file_name)
            } else {
                save.output(&subdirs[r / per_subdir]).join(file_name)
            };

            info!(logger, "saving simulated shear catalog"; "path" => %path.display());
            out.write(&path)?;
        }

        info!(logger, "weak lensing calculations completed"; "realization" => r + 1, "seconds" => secs(last));
    }

    worker.barrier()?;

    if ctx.is_master() {
        info!(logger, "total runtime"; "seconds" => secs(begin));
    }

    Ok(())
}


/// Run whichever campaign `settings` describes.
pub fn run(
    worker: &Worker, batch: &SimulationBatch, settings: &Settings, id: &str,
    loader: &dyn PlaneLoader, logger: &Logger
) -> Result<()> {
    match *settings {
        Settings::Map(_) | Settings::Telescopic(_) => single_redshift(worker, batch, settings, id, loader, logger),
        Settings::Catalog(_) => simulated_catalog(worker, batch, settings, id, loader, logger),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn matrix_is_reproducible() {
        let a = RandomizationMatrix::draw(&mut ChaCha8Rng::seed_from_u64(4), 6, 10, [3, 2, 3]).unwrap();
        let b = RandomizationMatrix::draw(&mut ChaCha8Rng::seed_from_u64(4), 6, 10, [3, 2, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), (6, 10));

        for r in 0..6 {
            for s in 0..10 {
                let p = a.get(r, s);
                assert!(p[0] < 3 && p[1] < 2 && p[2] < 3);
            }
        }

        assert!(RandomizationMatrix::draw(&mut ChaCha8Rng::seed_from_u64(4), 6, 10, [3, 0, 3]).is_err());
    }

    #[test]
    fn matrix_draws_column_by_column() {
        // With one candidate in the last two lists, only the first column
        // consumes useful randomness, in realization-major order.
        let m = RandomizationMatrix::draw(&mut ChaCha8Rng::seed_from_u64(9), 2, 3, [5, 1, 1]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let expected: Vec<usize> = (0..6).map(|_| rng.gen_range(0..5)).collect();
        let got: Vec<usize> = (0..2).flat_map(|r| (0..3).map(move |s| (r, s))).map(|(r, s)| m.get(r, s)[0]).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn telescopic_collection_choice() {
        let cuts = [0., 0.5, 1.2];
        assert_eq!(collection_for(0., &cuts), 0);
        assert_eq!(collection_for(0.49, &cuts), 0);
        assert_eq!(collection_for(0.5, &cuts), 1);
        assert_eq!(collection_for(1.19, &cuts), 1);
        assert_eq!(collection_for(3., &cuts), 2);
    }

    #[test]
    fn identifier_shapes() {
        assert_eq!(split_id("Om0.3|512b240").unwrap(), vec!["Om0.3", "512b240"]);
        assert_eq!(split_id("Om0.3").unwrap(), vec!["Om0.3"]);

        match split_id("a|b|c") {
            Err(Error::Config(msg)) => assert!(msg.contains("too many '|'")),
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }
}
