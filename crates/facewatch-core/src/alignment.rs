//! Face crops for the per-face models.
//!
//! Two kinds of crop feed the models: a keypoint-aligned 112×112 crop for
//! the recognizer, and a box-centred square crop (landmarks, age/gender,
//! expression). Both are expressed as a 4-DOF similarity transform
//! `| a -b tx ; b a ty |` mapping frame coordinates to crop coordinates.

/// ArcFace reference keypoints for a 112×112 output.
const REFERENCE_KEYPOINTS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform from frame space into a square crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl CropTransform {
    /// Box-centred crop: `center` lands in the middle of an `out_size` square
    /// and a face of extent `extent` pixels spans `out_size / margin` pixels.
    pub fn centered(center: (f32, f32), extent: f32, margin: f32, out_size: usize) -> Self {
        let half = out_size as f32 / 2.0;
        let scale = if extent > 0.0 {
            out_size as f32 / (extent * margin)
        } else {
            1.0
        };
        Self {
            a: scale,
            b: 0.0,
            tx: half - center.0 * scale,
            ty: half - center.1 * scale,
        }
    }

    /// Least-squares fit from `src` keypoints onto `dst` keypoints.
    pub fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Overdetermined system A * [a, b, tx, ty]^T = B, one row pair per point:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f32; 16];
        let mut atb = [0.0f32; 4];

        for ((sx, sy), (dx, dy)) in src.iter().copied().zip(dst.iter().copied()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];
            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        let [a, b, tx, ty] = solve_4x4(&ata, &atb);
        Self { a, b, tx, ty }
    }

    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Frame point → crop point.
    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Crop point → frame point. Degenerate transforms map everything to the origin.
    pub fn invert(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return (0.0, 0.0);
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        (
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        )
    }

    /// Sample a square `out_size` crop from a grayscale frame with bilinear
    /// interpolation. Pixels outside the frame are black.
    pub fn warp(&self, frame: &[u8], width: u32, height: u32, out_size: usize) -> Vec<u8> {
        let (w, h) = (width as i32, height as i32);
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 || frame.len() < (width * height) as usize {
            return vec![0u8; out_size * out_size];
        }

        let sample = |x: i32, y: i32| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                frame[(y * w + x) as usize] as f32
            } else {
                0.0
            }
        };

        let mut output = vec![0u8; out_size * out_size];
        for oy in 0..out_size {
            for ox in 0..out_size {
                let (sx, sy) = self.invert((ox as f32, oy as f32));
                let x0 = sx.floor() as i32;
                let y0 = sy.floor() as i32;
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1) * fx * fy;

                output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
        output
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i * 4..i * 4 + 4]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let max_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Align a detected face to the canonical 112×112 recognizer crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, keypoints: &[(f32, f32); 5]) -> Vec<u8> {
    CropTransform::fit(keypoints, &REFERENCE_KEYPOINTS_112).warp(frame, width, height, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let t = CropTransform::fit(&REFERENCE_KEYPOINTS_112, &REFERENCE_KEYPOINTS_112);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_fit_half_scale() {
        let src = REFERENCE_KEYPOINTS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = CropTransform::fit(&src, &REFERENCE_KEYPOINTS_112);
        assert!((t.scale() - 0.5).abs() < 0.01, "scale = {}", t.scale());
    }

    #[test]
    fn test_centered_maps_center_to_middle() {
        let t = CropTransform::centered((300.0, 200.0), 100.0, 1.5, 192);
        let (x, y) = t.apply((300.0, 200.0));
        assert!((x - 96.0).abs() < 1e-4 && (y - 96.0).abs() < 1e-4);
        assert!((t.scale() - 192.0 / 150.0).abs() < 1e-5);
    }

    #[test]
    fn test_invert_roundtrip() {
        let t = CropTransform::centered((120.0, 80.0), 64.0, 1.5, 96);
        let p = (131.5, 72.25);
        let back = t.invert(t.apply(p));
        assert!((back.0 - p.0).abs() < 1e-3 && (back.1 - p.1).abs() < 1e-3);
    }

    #[test]
    fn test_warp_output_size() {
        let frame = vec![128u8; 640 * 480];
        let t = CropTransform::centered((320.0, 240.0), 100.0, 1.0, 64);
        let out = t.warp(&frame, 640, 480, 64);
        assert_eq!(out.len(), 64 * 64);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_warp_short_frame_is_black() {
        let t = CropTransform::centered((1.0, 1.0), 2.0, 1.0, 8);
        let out = t.warp(&[255u8; 3], 4, 4, 8);
        assert!(out.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_aligned_keypoint_lands_on_reference() {
        let w = 200usize;
        let h = 200usize;
        let mut frame = vec![0u8; w * h];

        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Bright 5x5 patch at the left eye.
        for dy in 0..5 {
            for dx in 0..5 {
                frame[(58 + dy) * w + 78 + dx] = 255;
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, &src);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);

        let ref_x = REFERENCE_KEYPOINTS_112[0].0.round() as usize;
        let ref_y = REFERENCE_KEYPOINTS_112[0].1.round() as usize;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned[y * ALIGNED_SIZE + x]);
            }
        }
        assert!(max_val > 100, "left eye not near ({ref_x}, {ref_y}), max={max_val}");
    }
}
