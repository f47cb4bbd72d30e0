// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

//! The `info.txt` summary that sits next to a set of lens planes.
//!
//! One line per snapshot:
//!
//! ```text
//! snapshot=12,distance=2154.31 Mpc/h,redshift=0.9852
//! ```
//!
//! Reading stops at the first empty line.

use std::fs;
use std::path::Path;

use crate::cosmology::Cosmology;
use crate::error::{Error, Result};


/// One manifest line.
#[derive(Copy,Clone,Debug,PartialEq)]
pub struct PlaneInfo {
    /// Snapshot number the planes were cut from.
    pub snapshot: u32,
    /// Comoving distance, converted to Mpc.
    pub distance: f64,
    /// Redshift.
    pub redshift: f64,
}


/// The content of a plane manifest, in file order.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct PlaneManifest {
    /// One entry per snapshot.
    pub entries: Vec<PlaneInfo>,
}

impl PlaneManifest {
    /// Read a manifest. `Mpc/h` distances are converted with the *h* of
    /// `cosmology`.
    pub fn read<P: AsRef<Path>>(path: P, cosmology: &dyn Cosmology) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        PlaneManifest::parse(&text, path, cosmology)
    }

    /// Parse manifest text; `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path, cosmology: &dyn Cosmology) -> Result<Self> {
        let mut entries = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                break;
            }

            let bad = |reason: String| Error::malformed(path, format!("line {}: {}", lineno + 1, reason));
            let fields: Vec<&str> = line.trim().split(',').collect();

            if fields.len() != 3 {
                return Err(bad(format!("expected 3 comma-separated fields, got {}", fields.len())));
            }

            let value = |i: usize, key: &str| {
                keyed_value(fields[i], key)
                    .ok_or_else(|| bad(format!("expected \"{}=...\", got {:?}", key, fields[i])))
            };

            let snapshot = value(0, "snapshot")?.parse::<u32>()
                .map_err(|e| bad(format!("bad snapshot number: {}", e)))?;

            let (number, unit) = value(1, "distance")?.split_once(' ')
                .ok_or_else(|| bad("distance has no unit".to_owned()))?;
            let number = number.parse::<f64>()
                .map_err(|e| bad(format!("bad distance: {}", e)))?;
            let factor = mpc_per_unit(unit.trim(), cosmology)
                .ok_or_else(|| bad(format!("unknown distance unit {:?}", unit.trim())))?;

            let redshift = value(2, "redshift")?.parse::<f64>()
                .map_err(|e| bad(format!("bad redshift: {}", e)))?;

            entries.push(PlaneInfo { snapshot: snapshot, distance: number * factor, redshift: redshift });
        }

        Ok(PlaneManifest { entries: entries })
    }

    /// The number of snapshots listed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no snapshots are listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


/// The value of a `key=value` field, if the key matches.
fn keyed_value<'l>(field: &'l str, key: &str) -> Option<&'l str> {
    match field.split_once('=') {
        Some((k, v)) if k.trim() == key => Some(v.trim()),
        _ => None,
    }
}

/// How many Mpc make up one `unit`.
fn mpc_per_unit(unit: &str, cosmology: &dyn Cosmology) -> Option<f64> {
    match unit {
        "Mpc/h" => Some(cosmology.mpc_over_h()),
        "kpc/h" => Some(1e-3 * cosmology.mpc_over_h()),
        "Mpc" => Some(1.),
        "kpc" => Some(1e-3),
        "Gpc" => Some(1e3),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::Wcdm;

    #[test]
    fn parse_units() {
        let cosmo = Wcdm::flat_lcdm(0.7, 0.3);
        let text = "snapshot=0,distance=700.0 Mpc/h,redshift=0.25\n\
                    snapshot=1,distance=1500 Mpc,redshift=0.5\n\
                    snapshot=2,distance=2.5 Gpc,redshift=1.1\n\
                    \n\
                    snapshot=3,distance=what,redshift=2\n";
        let m = PlaneManifest::parse(text, Path::new("info.txt"), &cosmo).unwrap();

        assert_eq!(m.len(), 3);
        assert_eq!(m.entries[0].snapshot, 0);
        assert_approx_eq!(m.entries[0].distance, 1000., 1e-9);
        assert_eq!(m.entries[1].distance, 1500.);
        assert_eq!(m.entries[2].distance, 2500.);
        assert_eq!(m.entries[2].redshift, 1.1);
    }

    #[test]
    fn malformed_lines_name_the_line() {
        let cosmo = Wcdm::default();

        for text in &[
            "snapshot=0,distance=1.0 Mpc,redshift=0.1\nsnapshot=1,distance=2.0 parsec,redshift=0.2\n",
            "snapshot=0,distance=1.0 Mpc,redshift=0.1\nsnapshot=1,distance=2.0,redshift=0.2\n",
            "snapshot=0,distance=1.0 Mpc,redshift=0.1\nsnapshot=1,distance=2.0 Mpc\n",
            "snapshot=0,distance=1.0 Mpc,redshift=0.1\nsnap=1,distance=2.0 Mpc,redshift=0.2\n",
            "snapshot=0,distance=1.0 Mpc,redshift=0.1\nsnapshot=x,distance=2.0 Mpc,redshift=0.2\n",
        ] {
            match PlaneManifest::parse(text, Path::new("planes/info.txt"), &cosmo) {
                Err(Error::MalformedData { path, reason }) => {
                    assert_eq!(path, Path::new("planes/info.txt"));
                    assert!(reason.starts_with("line 2:"), "{}", reason);
                },
                other => panic!("expected malformed data, got {:?}", other),
            }
        }
    }

    #[test]
    fn missing_file() {
        let cosmo = Wcdm::default();
        assert!(PlaneManifest::read("/nonexistent/info.txt", &cosmo).is_err());
    }
}
