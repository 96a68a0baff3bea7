//! Marker dictionaries and code matching.

use std::path::Path;

use snafu::ResultExt;

use crate::error::*;

/// An ArUco-style dictionary
///
/// Codes are packed row-major (`idx = y * marker_size + x`) with black = 1.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    pub name: String,
    /// Number of inner bits per side
    pub marker_size: usize,
    /// Maximum number of bit errors the dictionary can correct
    pub max_correction_bits: u8,
    /// One code per marker id
    pub codes: Vec<u64>,
}
impl Dictionary {
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        max_correction_bits: u8,
        codes: Vec<u64>,
    ) -> Result<Self> {
        let dict = Self {
            name: name.into(),
            marker_size,
            max_correction_bits,
            codes,
        };
        dict.validate()?;
        Ok(dict)
    }

    /// One of the embedded OpenCV ArUco and AprilTag dictionaries, e.g. `DICT_6X6_100`
    pub fn builtin(name: &str) -> Option<Self> {
        let dict = calib_targets_aruco::builtins::builtin_dictionary(name)?;
        Some(Self {
            name: name.to_owned(),
            marker_size: dict.marker_size,
            max_correction_bits: dict.max_correction_bits,
            codes: dict.codes.to_vec(),
        })
    }

    /// Load a dictionary from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read_to_string(path).context(FailedToReadDictionarySnafu { path })?;
        Self::from_json(&buf)
    }

    pub fn from_json(buf: &str) -> Result<Self> {
        let dict: Self = serde_json::from_str(buf).map_err(|err| Error::InvalidDictionary {
            reason: err.to_string(),
        })?;
        dict.validate()?;
        Ok(dict)
    }

    fn validate(&self) -> Result<()> {
        let reason = if self.marker_size < 2 {
            format!("marker size {} is too small", self.marker_size)
        } else if self.bit_count() > 64 {
            format!("{0}x{0} markers don't fit in 64 bits", self.marker_size)
        } else if self.codes.is_empty() {
            "no codes".to_owned()
        } else if let Some(code) = self.codes.iter().find(|&&c| self.bit_count() < 64 && c >> self.bit_count() != 0) {
            format!("code {code:#x} has bits outside a {0}x{0} marker", self.marker_size)
        } else {
            return Ok(());
        };

        Err(Error::InvalidDictionary { reason })
    }

    /// Total number of inner bits per marker
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Read a marker's bit at `(x, y)`, true for black
    pub fn bit(&self, id: usize, x: usize, y: usize) -> bool {
        (self.codes[id] >> (y * self.marker_size + x)) & 1 == 1
    }
}

/// A dictionary match for an observed marker code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    /// Number of clockwise quarter turns from the dictionary code to the observed one
    pub rotation: u8,
    pub hamming: u8,
}

/// Brute-force matcher over all ids and rotations
#[derive(Clone, Debug)]
pub struct Matcher {
    marker_size: usize,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}
impl Matcher {
    pub fn new(dict: &Dictionary, max_hamming: u8) -> Self {
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&base| {
                [
                    rotate_code(base, n, 0),
                    rotate_code(base, n, 1),
                    rotate_code(base, n, 2),
                    rotate_code(base, n, 3),
                ]
            })
            .collect();

        Self {
            marker_size: n,
            max_hamming,
            rotated,
        }
    }

    pub fn marker_size(&self) -> usize {
        self.marker_size
    }

    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the closest code within `max_hamming`
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;

        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let hamming = (observed ^ cand).count_ones() as u8;
                if hamming > self.max_hamming {
                    continue;
                }
                if best.map_or(true, |prev| hamming < prev.hamming) {
                    best = Some(Match {
                        id: id as u32,
                        rotation: rot as u8,
                        hamming,
                    });
                    if hamming == 0 {
                        return best;
                    }
                }
            }
        }

        best
    }
}

/// Rotate a row-major code by `rot` clockwise quarter turns (y pointing down)
pub fn rotate_code(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}

/// Pack rows of `'1'` (black) and `'0'` (white) into a code
pub fn pack_rows(rows: &[&str]) -> Option<u64> {
    let n = rows.len();
    let mut code = 0u64;
    for (y, row) in rows.iter().enumerate() {
        if row.len() != n || n * n > 64 {
            return None;
        }
        for (x, c) in row.chars().enumerate() {
            match c {
                '1' => code |= 1 << (y * n + x),
                '0' => {}
                _ => return None,
            }
        }
    }
    Some(code)
}
