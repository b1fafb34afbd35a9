// src/metrics/math.rs
//
// Small numeric helpers shared by the SSIM and NIQE backends.

use std::f64::consts::PI;

/// Normalized 1-D Gaussian taps centred on the middle sample.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let center = (size as f64 - 1.0) / 2.0;
    let taps: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// Separable 2-D correlation keeping only fully covered positions.
/// Returns the filtered plane with its (width, height).
pub fn filter_valid(plane: &[f64], width: usize, height: usize, kernel: &[f64]) -> (Vec<f64>, usize, usize) {
    let k = kernel.len();
    debug_assert!(width >= k && height >= k);
    let out_w = width + 1 - k;
    let out_h = height + 1 - k;

    let mut horiz = vec![0.0; out_w * height];
    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        for x in 0..out_w {
            horiz[y * out_w + x] = kernel.iter().zip(&row[x..x + k]).map(|(w, v)| w * v).sum();
        }
    }

    let mut out = vec![0.0; out_w * out_h];
    for y in 0..out_h {
        for x in 0..out_w {
            out[y * out_w + x] = kernel
                .iter()
                .enumerate()
                .map(|(i, w)| w * horiz[(y + i) * out_w + x])
                .sum();
        }
    }
    (out, out_w, out_h)
}

/// Separable 2-D correlation with replicated borders; output matches the input size.
pub fn filter_same_replicate(plane: &[f64], width: usize, height: usize, kernel: &[f64]) -> Vec<f64> {
    let half = (kernel.len() / 2) as isize;
    let clamp = |v: isize, max: usize| v.clamp(0, max as isize - 1) as usize;

    let mut horiz = vec![0.0; width * height];
    for y in 0..height {
        for x in 0..width {
            horiz[y * width + x] = kernel
                .iter()
                .enumerate()
                .map(|(i, w)| w * plane[y * width + clamp(x as isize + i as isize - half, width)])
                .sum();
        }
    }

    let mut out = vec![0.0; width * height];
    for y in 0..height {
        for x in 0..width {
            out[y * width + x] = kernel
                .iter()
                .enumerate()
                .map(|(i, w)| w * horiz[clamp(y as isize + i as isize - half, height) * width + x])
                .sum();
        }
    }
    out
}

/// Natural log of the gamma function for x > 0 (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula.
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + G + 0.5;
        let a = COEF
            .iter()
            .enumerate()
            .skip(1)
            .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

/// Column mean and unbiased covariance of `rows` (one observation per row).
/// Fewer than two observations yield a zero covariance.
pub fn mean_and_covariance(rows: &[Vec<f64>], dim: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = rows.len();
    let mut mean = vec![0.0; dim];
    let mut cov = vec![vec![0.0; dim]; dim];
    if n == 0 {
        return (mean, cov);
    }
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);
    if n < 2 {
        return (mean, cov);
    }
    for row in rows {
        for i in 0..dim {
            let di = row[i] - mean[i];
            for j in i..dim {
                cov[i][j] += di * (row[j] - mean[j]);
            }
        }
    }
    for i in 0..dim {
        for j in i..dim {
            cov[i][j] /= (n - 1) as f64;
            cov[j][i] = cov[i][j];
        }
    }
    (mean, cov)
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns eigenvalues and the matrix whose columns are the eigenvectors.
pub fn symmetric_eigen(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<Vec<f64>>) {
    const MAX_SWEEPS: usize = 100;
    let n = matrix.len();
    let mut a = matrix.to_vec();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    let scale: f64 = a.iter().flatten().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);
    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off <= scale * 1e-30 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p][q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for row in a.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }
    ((0..n).map(|i| a[i][i]).collect(), v)
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix.
pub fn pinv_symmetric(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = matrix.len();
    let (values, vectors) = symmetric_eigen(matrix);
    let max_abs = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let cutoff = max_abs * f64::EPSILON * n as f64;
    let inv: Vec<f64> = values
        .iter()
        .map(|&l| if l.abs() > cutoff { 1.0 / l } else { 0.0 })
        .collect();

    let mut out = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = (0..n).map(|k| vectors[i][k] * inv[k] * vectors[j][k]).sum();
            out[i][j] = sum;
            out[j][i] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_gamma_known_values() {
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5).exp() - PI.sqrt()).abs() < 1e-10);
        assert!((ln_gamma(0.1).exp() - 9.513_507_698_668_732).abs() < 1e-8);
    }

    #[test]
    fn test_gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(11, 1.5);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((k[0] - k[10]).abs() < 1e-15);
        assert!(k[5] > k[4]);
    }

    #[test]
    fn test_filter_valid_box() {
        let plane: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let (out, w, h) = filter_valid(&plane, 4, 4, &[0.5, 0.5]);
        assert_eq!((w, h), (3, 3));
        // Mean of the 2x2 block with top-left (0, 0): (0 + 1 + 4 + 5) / 4.
        assert!((out[0] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_filter_same_replicate_keeps_constant() {
        let plane = vec![3.0; 20];
        let out = filter_same_replicate(&plane, 5, 4, &gaussian_kernel(7, 7.0 / 6.0));
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_pinv_of_diagonal_and_singular() {
        let m = vec![vec![2.0, 0.0], vec![0.0, 0.0]];
        let p = pinv_symmetric(&m);
        assert!((p[0][0] - 0.5).abs() < 1e-12);
        assert!(p[1][1].abs() < 1e-12);
    }

    #[test]
    fn test_pinv_inverts_full_rank() {
        let m = vec![vec![4.0, 1.0, 0.5], vec![1.0, 3.0, 0.2], vec![0.5, 0.2, 2.0]];
        let p = pinv_symmetric(&m);
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| m[i][k] * p[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-9, "({}, {}) = {}", i, j, v);
            }
        }
    }

    #[test]
    fn test_covariance_unbiased() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 6.0]];
        let (mean, cov) = mean_and_covariance(&rows, 2);
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!((cov[0][0] - 2.0).abs() < 1e-12);
        assert!((cov[0][1] - 4.0).abs() < 1e-12);
        assert!((cov[1][1] - 8.0).abs() < 1e-12);
    }
}
