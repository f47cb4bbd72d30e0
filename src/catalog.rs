// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Galaxy catalogs.

Catalogs are whitespace-separated ASCII tables. Lines of the form
`# KEY = value` before the table carry metadata, the first other line names
the columns, and every following non-empty line is one galaxy:

```text
# AUNIT = deg
x y z
0.5 1.25 0.8
```

Position catalogs need at least the columns `x`, `y` (angles, in the unit
given by `AUNIT`) and `z` (redshift).

*/

use std::f64::consts::PI;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::error::{Error, Result};


/// A table of named floating-point columns with string metadata.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct Catalog {
    meta: Vec<(String, String)>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Catalog {
    /// An empty catalog with no columns.
    pub fn new() -> Self {
        Catalog::default()
    }

    /// Read a catalog file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut cat = Catalog::new();
        let mut have_header = false;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('#') {
                if let Some((k, v)) = rest.split_once('=') {
                    cat.meta.push((k.trim().to_owned(), v.trim().to_owned()));
                }
                continue;
            }

            if !have_header {
                for name in line.split_whitespace() {
                    cat.names.push(name.to_owned());
                    cat.columns.push(Vec::new());
                }
                have_header = true;
                continue;
            }

            let mut n = 0;

            for (i, tok) in line.split_whitespace().enumerate() {
                if i >= cat.columns.len() {
                    n = i + 1;
                    break;
                }

                let v = tok.parse::<f64>().map_err(|_| {
                    Error::malformed(path, format!("line {}: bad number {:?}", lineno + 1, tok))
                })?;
                cat.columns[i].push(v);
                n = i + 1;
            }

            if n != cat.columns.len() {
                return Err(Error::malformed(path, format!(
                    "line {}: expected {} values, got {}", lineno + 1, cat.columns.len(),
                    line.split_whitespace().count()
                )));
            }
        }

        if !have_header {
            return Err(Error::malformed(path, "no column header"));
        }

        Ok(cat)
    }

    /// Write the catalog in the format [`Catalog::read`] understands.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = String::new();

        // Writing to a String cannot fail.
        for &(ref k, ref v) in &self.meta {
            let _ = writeln!(out, "# {} = {}", k, v);
        }

        let _ = writeln!(out, "{}", self.names.join(" "));

        for i in 0..self.len() {
            let row: Vec<String> = self.columns.iter().map(|c| format!("{:e}", c[i])).collect();
            let _ = writeln!(out, "{}", row.join(" "));
        }

        fs::write(path, out).map_err(|e| Error::io(path, e))
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names, in order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// A column by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names.iter().position(|n| n == name).map(|i| self.columns[i].as_slice())
    }

    /// Look up a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.iter().find(|m| m.0 == key).map(|m| m.1.as_str())
    }

    /// Set a metadata value.
    pub fn set_meta<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        let (key, value) = (key.into(), value.into());

        if let Some(slot) = self.meta.iter_mut().find(|m| m.0 == key) {
            slot.1 = value;
        } else {
            self.meta.push((key, value));
        }

        self
    }

    /// Append a column. It must match the length of the existing ones.
    pub fn push_column<S: Into<String>>(&mut self, name: S, values: Vec<f64>) -> Result<&mut Self> {
        let name = name.into();

        if !self.columns.is_empty() && values.len() != self.len() {
            return Err(Error::invariant(format!(
                "column {} has {} rows, the catalog has {}", name, values.len(), self.len()
            )));
        }

        self.names.push(name);
        self.columns.push(values);
        Ok(self)
    }

    /// A copy of some of the rows, keeping the metadata.
    pub fn slice(&self, rows: Range<usize>) -> Catalog {
        Catalog {
            meta: self.meta.clone(),
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c[rows.clone()].to_vec()).collect(),
        }
    }
}


/// Radians per angle unit, for the units catalogs may declare.
pub fn radians_per_unit(unit: &str) -> Option<f64> {
    match unit {
        "rad" => Some(1.),
        "deg" => Some(PI / 180.),
        "arcmin" => Some(PI / (180. * 60.)),
        "arcsec" => Some(PI / (180. * 3600.)),
        _ => None,
    }
}


/// Check that per-file galaxy counts add up to the declared total, and
/// return where each file's galaxies start in the combined arrays.
pub fn galaxy_offsets(counts: &[usize], total: usize) -> Result<Vec<usize>> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut sum = 0;

    for &n in counts {
        offsets.push(sum);
        sum += n;
    }

    if sum != total {
        return Err(Error::config(format!(
            "the total number of galaxies in the catalogs, {}, does not match the number \
             given in the settings, {}", sum, total
        )));
    }

    Ok(offsets)
}


/// The names of the output subdirectories, `"1-4"`, `"5-8"`, …, or none if
/// every realization goes in the same directory.
pub fn subdirectories(num_realizations: usize, per_subdirectory: usize) -> Result<Vec<String>> {
    if per_subdirectory == 0 || num_realizations % per_subdirectory != 0 {
        return Err(Error::config(format!(
            "{} realizations cannot be split in subdirectories of {}", num_realizations, per_subdirectory
        )));
    }

    if num_realizations == per_subdirectory {
        return Ok(Vec::new());
    }

    Ok((0..num_realizations / per_subdirectory)
       .map(|c| format!("{}-{}", c * per_subdirectory + 1, (c + 1) * per_subdirectory))
       .collect())
}


/// The file name of the shear catalog made from `input` in realization `r`
/// (zero-based).
pub fn shear_catalog_name(input: &Path, r: usize, format: &str) -> String {
    let name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = name.split('.').next().unwrap_or("");
    format!("WLshear_{}_{:04}r.{}", stem, r + 1, format)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn galaxy_accounting() {
        assert_eq!(galaxy_offsets(&[100, 250, 50], 400).unwrap(), vec![0, 100, 350]);

        match galaxy_offsets(&[100, 250, 50], 399) {
            Err(Error::Config(_)) => {},
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn subdirectory_names() {
        assert!(subdirectories(8, 8).unwrap().is_empty());
        assert_eq!(subdirectories(8, 4).unwrap(), vec!["1-4", "5-8"]);
        assert_eq!(subdirectories(3, 1).unwrap(), vec!["1-1", "2-2", "3-3"]);
        assert!(subdirectories(8, 3).is_err());
        assert!(subdirectories(8, 0).is_err());
    }

    #[test]
    fn output_names() {
        let p = PathBuf::from("/data/galaxies/cfht.w1.txt");
        assert_eq!(shear_catalog_name(&p, 0, "txt"), "WLshear_cfht_0001r.txt");
        assert_eq!(shear_catalog_name(Path::new("pos.txt"), 122, "txt"), "WLshear_pos_0123r.txt");
    }

    #[test]
    fn read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.txt");
        fs::write(&path, "# AUNIT = deg\n# survey = test\nx y z weight\n0.5 1.0 0.8 1\n\n1.5 2.0 1.2 0.5\n").unwrap();

        let cat = Catalog::read(&path).unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.meta("AUNIT"), Some("deg"));
        assert_eq!(cat.column("z"), Some(&[0.8, 1.2][..]));
        assert_eq!(cat.column("w"), None);

        let mut shear = Catalog::new();
        shear.push_column("shear1", vec![0.01, -0.02]).unwrap();
        shear.push_column("shear2", vec![1e-17, 0.]).unwrap();
        assert!(shear.push_column("bad", vec![1.]).is_err());
        shear.set_meta("AUNIT", "deg");

        let out = dir.path().join("shear.txt");
        shear.slice(1..2).write(&out).unwrap();
        let back = Catalog::read(&out).unwrap();
        assert_eq!(back.column_names(), &["shear1".to_owned(), "shear2".to_owned()][..]);
        assert_eq!(back.column("shear1"), Some(&[-0.02][..]));
        assert_eq!(back.meta("AUNIT"), Some("deg"));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.txt");

        for text in &["x y z\n1 2\n", "x y z\n1 2 3 4\n", "x y z\n1 2 zz\n", "# AUNIT = deg\n"] {
            fs::write(&path, text).unwrap();
            match Catalog::read(&path) {
                Err(Error::MalformedData { .. }) => {},
                other => panic!("expected malformed data for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn angle_units() {
        assert_approx_eq!(radians_per_unit("deg").unwrap() * 180., PI);
        assert_approx_eq!(radians_per_unit("arcmin").unwrap() * 60. * 180., PI);
        assert_eq!(radians_per_unit("furlong"), None);
    }
}
