//!
//! Camera intrinsics and lens distortion
//!
//! Calibrations are read from OpenCV `FileStorage` YAML files (the format `cv2.FileStorage`
//! writes), or from JSON files with the same matrix entries.
//!

use std::path::Path;

use nalgebra::{Matrix3, Point2, Point3};
use snafu::ResultExt;

use crate::error::*;

/// FileStorage node holding the intrinsic matrix
pub const CAMERA_MATRIX_NODE: &str = "camera_matrix";
/// FileStorage node holding the distortion coefficients
pub const DIST_COEFF_NODE: &str = "dist_coeff";

const UNDISTORT_ITERATIONS: usize = 20;

/// Intrinsic camera matrix and distortion coefficients
///
/// Distortion uses OpenCV's ordering: `k1 k2 p1 p2 [k3 [k4 k5 k6]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    camera_matrix: Matrix3<f64>,
    dist_coeffs: Vec<f64>,
    k_inv: Matrix3<f64>,
}
impl Calibration {
    /// Validate and build a calibration
    pub fn new(camera_matrix: Matrix3<f64>, dist_coeffs: Vec<f64>) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidCalibration {
            reason: reason.to_owned(),
        };

        if camera_matrix.iter().chain(dist_coeffs.iter()).any(|v| !v.is_finite()) {
            return Err(invalid("non-finite value"));
        }
        if !matches!(dist_coeffs.len(), 0 | 4 | 5 | 8) {
            return Err(Error::InvalidCalibration {
                reason: format!(
                    "expected 0, 4, 5 or 8 distortion coefficients, got {}",
                    dist_coeffs.len()
                ),
            });
        }
        if camera_matrix[(2, 2)].abs() < f64::EPSILON {
            return Err(invalid("camera matrix has a zero in its bottom-right corner"));
        }

        // Some tools write K scaled by an arbitrary factor
        let camera_matrix = camera_matrix / camera_matrix[(2, 2)];

        if camera_matrix[(1, 0)] != 0.0 || camera_matrix[(2, 0)] != 0.0 || camera_matrix[(2, 1)] != 0.0 {
            return Err(invalid("camera matrix is not upper triangular"));
        }
        if camera_matrix[(0, 0)] <= 0.0 || camera_matrix[(1, 1)] <= 0.0 {
            return Err(invalid("focal lengths must be positive"));
        }
        let k_inv = camera_matrix
            .try_inverse()
            .ok_or_else(|| invalid("camera matrix is not invertible"))?;

        Ok(Self {
            camera_matrix,
            dist_coeffs,
            k_inv,
        })
    }

    /// A pinhole camera without distortion
    pub fn ideal(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self> {
        Self::new(
            Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            Vec::new(),
        )
    }

    /// Load a calibration file
    ///
    /// `.json` files are parsed as JSON, anything else as OpenCV FileStorage YAML. With the
    /// `opencv` feature, FileStorage itself reads the YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read_to_string(path).context(FailedToReadCalibrationSnafu { path })?;

        let (camera_matrix, dist_coeffs) = if path.extension().is_some_and(|ext| ext == "json") {
            parse_json(&buf)
        } else if cfg!(feature = "opencv") {
            read_filestorage(path)
        } else {
            parse_yaml(&buf)
        }
        .map_err(|reason| Error::MalformedCalibration {
            path: path.to_owned(),
            reason,
        })?;

        let calib = Self::new(camera_matrix, dist_coeffs)?;
        debug!(
            "loaded calibration from {path:?}: fx={:.2} fy={:.2} cx={:.2} cy={:.2} dist={:?}",
            calib.fx(),
            calib.fy(),
            calib.cx(),
            calib.cy(),
            calib.dist_coeffs
        );

        Ok(calib)
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }
    pub fn dist_coeffs(&self) -> &[f64] {
        &self.dist_coeffs
    }
    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }
    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }
    pub fn cx(&self) -> f64 {
        self.camera_matrix[(0, 2)]
    }
    pub fn cy(&self) -> f64 {
        self.camera_matrix[(1, 2)]
    }

    fn coeff(&self, i: usize) -> f64 {
        self.dist_coeffs.get(i).copied().unwrap_or(0.0)
    }

    /// Apply lens distortion to a normalized image point
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.dist_coeffs.is_empty() {
            return p;
        }
        let (k1, k2, p1, p2, k3) = (self.coeff(0), self.coeff(1), self.coeff(2), self.coeff(3), self.coeff(4));
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));

        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);

        Point2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Map a pixel to an undistorted normalized image point
    ///
    /// Iteratively inverts [Calibration::distort], the same fixed-point scheme as
    /// `cv::undistortPoints`.
    pub fn undistort(&self, pixel: Point2<f64>) -> Point2<f64> {
        let h = self.k_inv * pixel.to_homogeneous();
        let p0 = Point2::new(h.x / h.z, h.y / h.z);
        if self.dist_coeffs.is_empty() {
            return p0;
        }

        let (k1, k2, p1, p2, k3) = (self.coeff(0), self.coeff(1), self.coeff(2), self.coeff(3), self.coeff(4));
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));

        let (mut x, mut y) = (p0.x, p0.y);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist = (1.0 + k4 * r2 + k5 * r4 + k6 * r6) / (1.0 + k1 * r2 + k2 * r4 + k3 * r6);
            if icdist < 0.0 {
                return p0;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let (nx, ny) = ((p0.x - dx) * icdist, (p0.y - dy) * icdist);

            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-12 {
                break;
            }
        }

        Point2::new(x, y)
    }

    /// Map a normalized image point to pixels, applying distortion
    pub fn to_pixel(&self, normalized: Point2<f64>) -> Point2<f64> {
        let d = self.distort(normalized);
        let p = self.camera_matrix * d.to_homogeneous();
        Point2::new(p.x / p.z, p.y / p.z)
    }

    /// Project a point in the camera frame to pixels
    ///
    /// Returns `None` for points at or behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(self.to_pixel(Point2::new(p.x / p.z, p.y / p.z)))
    }
}

type RawCalibration = (Matrix3<f64>, Vec<f64>);

#[derive(Deserialize)]
struct JsonMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}
impl JsonMatrix {
    fn check(self, name: &str) -> Result<Vec<f64>, String> {
        check_shape(name, self.rows, self.cols, self.data)
    }
}

#[derive(Deserialize)]
struct JsonCalibration {
    camera_matrix: JsonMatrix,
    #[serde(alias = "dist_coeffs")]
    dist_coeff: JsonMatrix,
}

fn parse_json(buf: &str) -> Result<RawCalibration, String> {
    let raw: JsonCalibration = serde_json::from_str(buf).map_err(|err| err.to_string())?;
    let k = raw.camera_matrix.check(CAMERA_MATRIX_NODE)?;
    let dist = raw.dist_coeff.check(DIST_COEFF_NODE)?;
    matrix3(&k).map(|k| (k, dist))
}

fn check_shape(name: &str, rows: usize, cols: usize, data: Vec<f64>) -> Result<Vec<f64>, String> {
    if rows * cols != data.len() {
        return Err(format!(
            "{name}: {rows}x{cols} matrix with {} values",
            data.len()
        ));
    }
    Ok(data)
}

fn matrix3(data: &[f64]) -> Result<Matrix3<f64>, String> {
    if data.len() != 9 {
        return Err(format!(
            "{CAMERA_MATRIX_NODE}: expected a 3x3 matrix, got {} values",
            data.len()
        ));
    }
    Ok(Matrix3::from_row_slice(data))
}

/// Read the two matrices with `cv::FileStorage`
#[cfg(feature = "opencv")]
fn read_filestorage(path: &Path) -> Result<RawCalibration, String> {
    use opencv::core::{FileStorage, FileStorage_Mode, Mat, CV_64F};
    use opencv::prelude::*;

    let cv_err = |err: opencv::Error| err.to_string();

    let fs = FileStorage::new(&path.to_string_lossy(), FileStorage_Mode::READ as i32, "").map_err(cv_err)?;
    if !fs.is_opened().map_err(cv_err)? {
        return Err("FileStorage couldn't open the file".to_owned());
    }

    let read = |name: &str| -> Result<Vec<f64>, String> {
        let node = fs.get(name).map_err(cv_err)?;
        if node.empty().map_err(cv_err)? {
            return Err(format!("{name}: missing"));
        }
        let mat = node.mat().map_err(cv_err)?;
        let mut values = Mat::default();
        mat.convert_to(&mut values, CV_64F, 1.0, 0.0).map_err(cv_err)?;

        let mut data = Vec::with_capacity(values.total());
        for r in 0..values.rows() {
            for c in 0..values.cols() {
                data.push(*values.at_2d::<f64>(r, c).map_err(cv_err)?);
            }
        }
        Ok(data)
    };

    let k = read(CAMERA_MATRIX_NODE)?;
    let dist = read(DIST_COEFF_NODE)?;
    matrix3(&k).map(|k| (k, dist))
}
#[cfg(not(feature = "opencv"))]
fn read_filestorage(_path: &Path) -> Result<RawCalibration, String> {
    Err("FileStorage needs the `opencv` feature".to_owned())
}

/// One `!!opencv-matrix` node as it's being read
#[derive(Default)]
struct YamlMatrix {
    rows: Option<usize>,
    cols: Option<usize>,
    data: Vec<f64>,
    /// Whether `data: [` has been opened but not closed yet
    open: bool,
    closed: bool,
}
impl YamlMatrix {
    fn push_values(&mut self, name: &str, text: &str) -> Result<(), String> {
        let (text, done) = match text.split_once(']') {
            Some((values, _)) => (values, true),
            None => (text, false),
        };
        for value in text.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let value: f64 = value
                .parse()
                .map_err(|_| format!("{name}: bad value {value:?}"))?;
            self.data.push(value);
        }
        if done {
            self.open = false;
            self.closed = true;
        }
        Ok(())
    }

    fn finish(self, name: &str) -> Result<Vec<f64>, String> {
        if !self.closed {
            return Err(format!("{name}: missing or unterminated data"));
        }
        let rows = self.rows.ok_or_else(|| format!("{name}: missing rows"))?;
        let cols = self.cols.ok_or_else(|| format!("{name}: missing cols"))?;
        check_shape(name, rows, cols, self.data)
    }
}

/// Read the two matrices we need out of an OpenCV FileStorage YAML document
///
/// This only understands the subset FileStorage writes for matrices; other nodes are skipped.
fn parse_yaml(buf: &str) -> Result<RawCalibration, String> {
    let mut nodes: Vec<(String, YamlMatrix)> = Vec::new();

    for line in buf.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }

        // Continuation of a multi-line `data: [ ... ]`
        if let Some((name, node)) = nodes.last_mut().filter(|(_, node)| node.open) {
            node.push_values(name, trimmed)?;
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        let Some((key, value)) = trimmed.split_once(':') else {
            return Err(format!("unexpected line {trimmed:?}"));
        };
        let (key, value) = (key.trim(), value.trim());

        // Every top-level key gets a node, even scalars like the image size, so indented
        // lines always attach to their own parent
        if !indented {
            nodes.push((key.to_owned(), YamlMatrix::default()));
            continue;
        }

        let Some((name, node)) = nodes.last_mut() else {
            return Err(format!("unexpected indented line {trimmed:?}"));
        };
        match key {
            "rows" => node.rows = Some(value.parse().map_err(|_| format!("{name}: bad rows"))?),
            "cols" => node.cols = Some(value.parse().map_err(|_| format!("{name}: bad cols"))?),
            "dt" => {
                if !matches!(value, "d" | "f") {
                    return Err(format!("{name}: unsupported element type {value:?}"));
                }
            }
            "data" => {
                let rest = value
                    .strip_prefix('[')
                    .ok_or_else(|| format!("{name}: data is not a sequence"))?;
                node.open = true;
                node.push_values(name, rest)?;
            }
            _ => {}
        }
    }

    let mut take = |wanted: &str| -> Result<Vec<f64>, String> {
        let idx = nodes
            .iter()
            .position(|(name, _)| name == wanted)
            .ok_or_else(|| format!("missing {wanted}"))?;
        let (name, node) = nodes.swap_remove(idx);
        node.finish(&name)
    };

    let k = take(CAMERA_MATRIX_NODE)?;
    let dist = take(DIST_COEFF_NODE)?;
    matrix3(&k).map(|k| (k, dist))
}
