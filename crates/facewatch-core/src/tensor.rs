//! Shared helpers for turning grayscale crops into model inputs and raw
//! model outputs into probabilities.

use ndarray::Array4;

/// Build an NCHW tensor from a square grayscale crop, replicating the single
/// channel `channels` times. Missing pixels read as 0.
pub fn gray_to_nchw(crop: &[u8], size: usize, channels: usize, mean: f32, std: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, channels, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - mean) / std;
            for c in 0..channels {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }
    tensor
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}
