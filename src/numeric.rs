// src/numeric.rs
//
// Small numeric kernels shared by the decoder and the classifier.

/// Numerically stable softmax over a 1-D slice.
///
/// The maximum is subtracted before exponentiation, so adding a constant to
/// every input leaves the output unchanged.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Softmax along one axis of a dense row-major tensor.
///
/// Every 1-D fibre along `axis` is normalised independently.
pub fn softmax_axis(data: &[f32], shape: &[usize], axis: usize) -> Vec<f32> {
    assert!(axis < shape.len(), "axis {} out of range for {:?}", axis, shape);
    debug_assert_eq!(data.len(), shape.iter().product::<usize>());

    let axis_len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let outer: usize = shape[..axis].iter().product();

    let mut out = vec![0.0f32; data.len()];
    let mut fibre = vec![0.0f32; axis_len];

    for o in 0..outer {
        for i in 0..inner {
            let base = o * axis_len * inner + i;
            for (a, slot) in fibre.iter_mut().enumerate() {
                *slot = data[base + a * inner];
            }
            for (a, p) in softmax(&fibre).into_iter().enumerate() {
                out[base + a * inner] = p;
            }
        }
    }

    out
}

/// Index of the first maximum, matching `numpy.argmax` tie-breaking.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Sub-cell location from a column of localisation logits.
///
/// Takes the cells within `±local_width` of the argmax, softmaxes that window
/// and returns the probability-weighted cell index plus the 0.5 cell-centre
/// correction.
pub fn local_soft_argmax(column: &[f32], local_width: usize) -> f32 {
    if column.is_empty() {
        return 0.5;
    }

    let center = argmax(column);
    let lo = center.saturating_sub(local_width);
    let hi = (center + local_width).min(column.len() - 1);

    let probs = softmax(&column[lo..=hi]);
    let centroid: f32 = probs
        .iter()
        .enumerate()
        .map(|(offset, p)| p * (lo + offset) as f32)
        .sum();

    centroid + 0.5
}

/// Percentile with linear interpolation between closest ranks
/// (`numpy.percentile` default). `q` is in `[0, 100]`.
pub fn percentile(values: &[f32], q: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;

    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0, -4.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(p[2] > p[1] && p[1] > p[0] && p[0] > p[3]);
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let a = softmax(&[0.5, -1.0, 2.0]);
        let b = softmax(&[1000.5, 999.0, 1002.0]);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_softmax_axis_class_dimension() {
        // shape [1, 2, 3, 2]: class axis = 1
        let shape = [1, 2, 3, 2];
        let data: Vec<f32> = (0..12).map(|v| v as f32 * 0.37 - 2.0).collect();
        let p = softmax_axis(&data, &shape, 1);

        for k in 0..3 {
            for l in 0..2 {
                let p0 = p[k * 2 + l];
                let p1 = p[6 + k * 2 + l];
                assert!((p0 + p1 - 1.0).abs() < 1e-5);
            }
        }

        let shifted: Vec<f32> = data.iter().map(|v| v + 50.0).collect();
        let q = softmax_axis(&shifted, &shape, 1);
        for (x, y) in p.iter().zip(q.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_softmax_axis_last_dimension() {
        let shape = [2, 4];
        let data = vec![1.0, 1.0, 1.0, 1.0, 0.0, 10.0, 0.0, 0.0];
        let p = softmax_axis(&data, &shape, 1);
        assert!((p[0] - 0.25).abs() < 1e-6);
        assert!(p[5] > 0.99);
    }

    #[test]
    fn test_argmax_first_max_wins() {
        assert_eq!(argmax(&[0.0, 3.0, 1.0, 3.0]), 1);
        assert_eq!(argmax(&[5.0]), 0);
    }

    #[test]
    fn test_local_soft_argmax_symmetric_window() {
        // Symmetric logits around cell 4 -> centroid 4, plus 0.5
        let col = [0.0, 0.0, 0.0, 1.0, 5.0, 1.0, 0.0, 0.0];
        let c = local_soft_argmax(&col, 1);
        assert!((c - 4.5).abs() < 1e-5);
    }

    #[test]
    fn test_local_soft_argmax_clipped_at_border() {
        let col = [9.0, 1.0, 0.0, 0.0];
        let c = local_soft_argmax(&col, 3);
        assert!(c > 0.5 && c < 1.0);
    }

    #[test]
    fn test_percentile_linear() {
        let v = [10.0, 20.0, 30.0, 40.0, 50.0];
        let p80 = percentile(&v, 80.0).unwrap();
        assert!((p80 - 42.0).abs() < 1e-4);
        assert_eq!(percentile(&v, 0.0), Some(10.0));
        assert_eq!(percentile(&[], 50.0), None);
    }
}
