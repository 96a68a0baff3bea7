//! Binarization for candidate search and bit reading.

use image::GrayImage;

/// Compute an Otsu threshold from a set of samples
pub fn otsu_threshold(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut hist = [0u32; 256];
    let (mut min_v, mut max_v) = (255u8, 0u8);
    for &v in samples {
        hist[v as usize] += 1;
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist.iter().enumerate().map(|(i, &h)| i as f64 * h as f64).sum();

    let (mut sum_b, mut w_b) = (0f64, 0f64);
    let (mut best_var, mut best_t) = (-1f64, 127u8);

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Dark-pixel mask (1 = dark) from a global Otsu threshold
pub fn binarize_otsu(gray: &GrayImage) -> Vec<u8> {
    let t = otsu_threshold(gray.as_raw());
    gray.as_raw().iter().map(|&v| (v <= t) as u8).collect()
}

/// Dark-pixel mask (1 = dark) from a local mean threshold
///
/// A pixel is dark if it's at least `offset` below the mean of the `window` x `window`
/// neighborhood around it, like OpenCV's `ADAPTIVE_THRESH_MEAN_C` with an inverted binary output.
pub fn binarize_adaptive(gray: &GrayImage, window: u32, offset: i32) -> Vec<u8> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let raw = gray.as_raw();
    let r = (window.max(3) / 2) as usize;

    // Integral image with a zero row and column in front
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += raw[y * w + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let area = ((y1 - y0) * (x1 - x0)) as i64;
            let mean = sum as i64 / area;
            out[y * w + x] = ((raw[y * w + x] as i64) <= mean - offset as i64) as u8;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![20u8; 50];
        samples.extend(vec![30u8; 50]);
        samples.extend(vec![200u8; 60]);
        samples.extend(vec![220u8; 40]);
        let t = otsu_threshold(&samples);
        assert!((30..200).contains(&t), "threshold {t}");
    }

    #[test]
    fn otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold(&[]), 127);
        assert_eq!(otsu_threshold(&[9, 9, 9]), 9);
        assert_eq!(otsu_threshold(&[10, 250, 10]), 130);
    }

    #[test]
    fn adaptive_marks_dark_square_edges() {
        let img = GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([30])
            } else {
                Luma([220])
            }
        });
        let mask = binarize_adaptive(&img, 15, 7);
        let at = |x: usize, y: usize| mask[y * 40 + x];

        assert_eq!(at(10, 10), 1);
        assert_eq!(at(29, 20), 1);
        assert_eq!(at(5, 5), 0);
        assert_eq!(at(35, 20), 0);
    }

    #[test]
    fn otsu_mask_matches_intensity() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([if x < 2 { 10 } else { 240 }]));
        assert_eq!(binarize_otsu(&img), vec![1, 1, 0, 0]);
    }
}
