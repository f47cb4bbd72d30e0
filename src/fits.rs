// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

/*! Just enough FITS to move lens planes and maps around.

Only the primary HDU is handled, and only floating-point images (`BITPIX` of
-32 or -64). Data are returned widened to `f64` in C order, i.e. the
*last* FITS axis (`NAXISn`) varies slowest and `NAXIS1` fastest. All of
the ray tracing downstream works in `f64`, so single-precision planes are
sampled in double precision too.

*/

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

const BLOCK: usize = 2880;
const CARD: usize = 80;


/// The value of one header card.
#[derive(Clone,Debug,PartialEq)]
pub enum HeaderValue {
    /// `T` or `F`.
    Logical(bool),
    /// An integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A quoted string.
    Str(String),
}

impl HeaderValue {
    /// Numeric values as `f64`, whatever their stored type.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HeaderValue::Int(i) => Some(i as f64),
            HeaderValue::Float(f) => Some(f),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match *self {
            HeaderValue::Logical(b) => format!("{:>20}", if b { "T" } else { "F" }),
            HeaderValue::Int(i) => format!("{:>20}", i),
            HeaderValue::Float(f) => format!("{:>20}", format!("{:E}", f)),
            HeaderValue::Str(ref s) => format!("'{:<8}'", s.replace('\'', "''")),
        }
    }
}


/// An ordered list of user header cards. The structural keywords (`SIMPLE`,
/// `BITPIX`, `NAXISn`, `END`) are managed by the reader and writer and never
/// appear here.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    /// An empty header.
    pub fn new() -> Self {
        Header::default()
    }

    /// Set a keyword, replacing any previous value.
    pub fn set<K: Into<String>>(&mut self, key: K, value: HeaderValue) -> &mut Self {
        let key = key.into().to_uppercase();

        if let Some(slot) = self.cards.iter_mut().find(|c| c.0 == key) {
            slot.1 = value;
        } else {
            self.cards.push((key, value));
        }

        self
    }

    /// Look up a keyword.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_uppercase();
        self.cards.iter().find(|c| c.0 == key).map(|c| &c.1)
    }

    /// Look up a numeric keyword.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Look up a string keyword.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(&HeaderValue::Str(ref s)) => Some(s.as_str()),
            _ => None,
        }
    }
}


/// An image read from a FITS file.
#[derive(Clone,Debug,PartialEq)]
pub struct Image {
    /// Non-structural header cards.
    pub header: Header,
    /// Axis lengths, slowest first.
    pub shape: Vec<usize>,
    /// Pixel values in C order.
    pub data: Vec<f64>,
}


/// Write a 64-bit floating-point image. `shape` is given slowest axis
/// first and must match `data.len()`.
pub fn write_image<P: AsRef<Path>>(path: P, header: &Header, shape: &[usize], data: &[f64]) -> Result<()> {
    let path = path.as_ref();
    let n: usize = shape.iter().product();

    if n != data.len() {
        return Err(Error::invariant(format!(
            "FITS image shape {:?} does not match {} data values", shape, data.len()
        )));
    }

    let mut cards = Vec::new();
    cards.push(card("SIMPLE", &HeaderValue::Logical(true))?);
    cards.push(card("BITPIX", &HeaderValue::Int(-64))?);
    cards.push(card("NAXIS", &HeaderValue::Int(shape.len() as i64))?);

    for (i, len) in shape.iter().rev().enumerate() {
        cards.push(card(&format!("NAXIS{}", i + 1), &HeaderValue::Int(*len as i64))?);
    }

    for &(ref key, ref value) in &header.cards {
        cards.push(card(key, value)?);
    }

    cards.push(format!("{:<80}", "END"));

    let mut bytes: Vec<u8> = cards.concat().into_bytes();
    pad(&mut bytes, b' ');

    for v in data {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    pad(&mut bytes, 0);

    let f = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut w = BufWriter::new(f);
    w.write_all(&bytes).map_err(|e| Error::io(path, e))?;
    w.flush().map_err(|e| Error::io(path, e))
}


/// Read the primary image of a FITS file.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Image> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut r = BufReader::new(f);

    let mut header = Header::new();
    let mut bitpix = None;
    let mut naxis = None;
    let mut axes: Vec<(usize, usize)> = Vec::new();
    let mut block = vec![0u8; BLOCK];
    let mut done = false;

    while !done {
        r.read_exact(&mut block).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::malformed(path, "file ends inside the header")
            } else {
                Error::io(path, e)
            }
        })?;

        for raw in block.chunks(CARD) {
            let text = match std::str::from_utf8(raw) {
                Ok(t) if raw.is_ascii() => t,
                _ => return Err(Error::malformed(path, "non-ASCII header card")),
            };
            let key = text[..8].trim().to_string();

            if key == "END" {
                done = true;
                break;
            }

            if key.is_empty() || key == "COMMENT" || key == "HISTORY" || &text[8..10] != "= " {
                continue;
            }

            let value = parse_value(&text[10..]).ok_or_else(|| {
                Error::malformed(path, format!("cannot parse header card {:?}", text.trim_end()))
            })?;

            if key == "SIMPLE" || key == "EXTEND" {
                continue;
            } else if key == "BITPIX" {
                bitpix = value.as_f64().map(|v| v as i64);
            } else if key == "NAXIS" {
                naxis = value.as_f64().map(|v| v as usize);
            } else if key.starts_with("NAXIS") {
                let idx = key[5..].parse::<usize>()
                    .map_err(|_| Error::malformed(path, format!("bad axis keyword {}", key)))?;
                let len = value.as_f64()
                    .ok_or_else(|| Error::malformed(path, format!("non-numeric {}", key)))?;
                axes.push((idx, len as usize));
            } else {
                header.set(key, value);
            }
        }
    }

    let naxis = naxis.ok_or_else(|| Error::malformed(path, "missing NAXIS"))?;
    axes.sort();

    if axes.len() != naxis || axes.iter().enumerate().any(|(i, a)| a.0 != i + 1) {
        return Err(Error::malformed(path, "NAXISn keywords do not match NAXIS"));
    }

    let shape: Vec<usize> = axes.iter().rev().map(|a| a.1).collect();
    let n: usize = shape.iter().product();

    let data = match bitpix {
        Some(-64) => {
            let mut buf = vec![0u8; 8 * n];
            r.read_exact(&mut buf).map_err(|_| Error::malformed(path, "truncated image data"))?;
            buf.chunks(8).map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_be_bytes(b)
            }).collect()
        },
        Some(-32) => {
            let mut buf = vec![0u8; 4 * n];
            r.read_exact(&mut buf).map_err(|_| Error::malformed(path, "truncated image data"))?;
            buf.chunks(4).map(|c| {
                let mut b = [0u8; 4];
                b.copy_from_slice(c);
                f32::from_be_bytes(b) as f64
            }).collect()
        },
        other => {
            return Err(Error::malformed(path, format!("unsupported BITPIX {:?}", other)));
        },
    };

    Ok(Image { header: header, shape: shape, data: data })
}


/// One 80-column header card. Values that do not fit are refused rather
/// than cut, since a cut string loses its closing quote.
fn card(key: &str, value: &HeaderValue) -> Result<String> {
    if key.len() > 8 {
        return Err(Error::config(format!("FITS keyword {:?} is longer than 8 characters", key)));
    }

    let s = format!("{:<8}= {}", key, value.render());

    if !s.is_ascii() || s.len() > CARD {
        return Err(Error::config(format!(
            "FITS card {:?} does not fit in {} ASCII columns", s, CARD
        )));
    }

    Ok(format!("{:<80}", s))
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % BLOCK;

    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK - rem, fill);
    }
}

fn parse_value(text: &str) -> Option<HeaderValue> {
    let text = text.trim_start();

    if text.starts_with('\'') {
        // Strings end at a lone quote; doubled quotes are escapes.
        let mut out = String::new();
        let mut chars = text[1..].chars().peekable();

        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    return Some(HeaderValue::Str(out.trim_end().to_string()));
                }
            } else {
                out.push(c);
            }
        }

        return None;
    }

    let token = text.split('/').next().unwrap_or("").trim();

    match token {
        "T" => Some(HeaderValue::Logical(true)),
        "F" => Some(HeaderValue::Logical(false)),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Some(HeaderValue::Int(i))
            } else {
                token.replace('D', "E").parse::<f64>().ok().map(HeaderValue::Float)
            }
        },
    }
}
