//! Overlay canvas laid over the live feed.
//!
//! The canvas is a list of draw operations in video coordinates. Clients
//! either consume the ops directly (JSON over D-Bus) or rasterize them.

use crate::matcher::FaceMatcher;
use crate::types::{DetectedFace, Expression};
use ab_glyph::{FontRef, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// Expressions scoring below this are not drawn.
pub const MIN_EXPRESSION_SCORE: f32 = 0.1;

const LANDMARK_COLOR: Rgba<u8> = Rgba([0, 200, 255, 255]);
const FIELD_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 160]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FONT_PX: f32 = 16.0;
/// Line height and glyph width used when no font is available.
const FALLBACK_LINE: u32 = 18;
const FALLBACK_GLYPH: u32 = 8;
const PADDING: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Landmarks {
        points: Vec<(f32, f32)>,
    },
    Expressions {
        anchor: (f32, f32),
        entries: Vec<(Expression, f32)>,
    },
    TextField {
        anchor: (f32, f32),
        lines: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub ops: Vec<DrawOp>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rasterize onto a transparent image of the canvas size.
    ///
    /// Text is drawn only when a font is supplied; without one each text
    /// field still gets its background box so placement stays visible.
    pub fn rasterize(&self, font: Option<&FontRef>) -> RgbaImage {
        let mut img = RgbaImage::new(self.width.max(1), self.height.max(1));
        for op in &self.ops {
            match op {
                DrawOp::Landmarks { points } => {
                    for &(x, y) in points {
                        draw_filled_circle_mut(&mut img, (x as i32, y as i32), 1, LANDMARK_COLOR);
                    }
                }
                DrawOp::Expressions { anchor, entries } => {
                    let lines: Vec<String> = entries
                        .iter()
                        .map(|(e, score)| format!("{e} ({score:.2})"))
                        .collect();
                    draw_field(&mut img, *anchor, &lines, font);
                }
                DrawOp::TextField { anchor, lines } => {
                    draw_field(&mut img, *anchor, lines, font);
                }
            }
        }
        img
    }
}

fn draw_field(img: &mut RgbaImage, anchor: (f32, f32), lines: &[String], font: Option<&FontRef>) {
    if lines.is_empty() {
        return;
    }
    let scale = PxScale::from(FONT_PX);
    let (line_height, width) = match font {
        Some(font) => {
            let width = lines
                .iter()
                .map(|l| text_size(scale, font, l).0)
                .max()
                .unwrap_or(0);
            (FONT_PX.ceil() as u32 + 2, width)
        }
        None => {
            let chars = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
            (FALLBACK_LINE, chars * FALLBACK_GLYPH)
        }
    };

    let x = anchor.0 as i32;
    let y = anchor.1 as i32;
    let rect = Rect::at(x, y).of_size(
        (width + 2 * PADDING).max(1),
        (line_height * lines.len() as u32 + 2 * PADDING).max(1),
    );
    draw_filled_rect_mut(img, rect, FIELD_BACKGROUND);

    if let Some(font) = font {
        for (i, line) in lines.iter().enumerate() {
            let ly = y + PADDING as i32 + (i as u32 * line_height) as i32;
            draw_text_mut(img, TEXT_COLOR, x + PADDING as i32, ly, scale, font, line);
        }
    }
}

/// Redraw the canvas for one tick's faces.
///
/// Every face gets its landmarks, its expressions and an attribute field
/// (gender, age) at the box's top-right. With a matcher present each face
/// also gets its verdict at the box's top-left.
pub fn render_faces(canvas: &mut Canvas, faces: &[DetectedFace], matcher: Option<&FaceMatcher>) {
    canvas.clear();

    for face in faces {
        canvas.ops.push(DrawOp::Landmarks {
            points: face.landmarks.clone(),
        });
    }
    for face in faces {
        canvas.ops.push(DrawOp::Expressions {
            anchor: face.bbox.bottom_left(),
            entries: face.expressions.above(MIN_EXPRESSION_SCORE),
        });
    }
    for face in faces {
        canvas.ops.push(DrawOp::TextField {
            anchor: face.bbox.top_right(),
            lines: vec![face.gender_text(), face.age_text()],
        });

        if let Some(matcher) = matcher {
            let best = matcher.find_best_match(&face.descriptor);
            tracing::trace!(best = %best, "face matched");
            canvas.ops.push(DrawOp::TextField {
                anchor: face.bbox.top_left(),
                lines: vec![best.verdict().text().to_string()],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{sample_face, Descriptor};

    fn text_fields(canvas: &Canvas) -> Vec<(&(f32, f32), &Vec<String>)> {
        canvas
            .ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::TextField { anchor, lines } => Some((anchor, lines)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_attribute_field_at_top_right() {
        let face = sample_face(10.0, 20.0, vec![1.0, 0.0]);
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &[face.clone()], None);

        let fields = text_fields(&canvas);
        assert_eq!(fields.len(), 1);
        assert_eq!(*fields[0].0, face.bbox.top_right());
        assert_eq!(fields[0].1, &vec!["male (87%)".to_string(), "32 years".to_string()]);
    }

    #[test]
    fn test_no_matcher_no_verdict() {
        let faces = vec![
            sample_face(0.0, 0.0, vec![1.0, 0.0]),
            sample_face(200.0, 0.0, vec![0.0, 1.0]),
        ];
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &faces, None);
        let fields = text_fields(&canvas);
        assert_eq!(fields.len(), 2);
        assert!(fields
            .iter()
            .all(|(_, lines)| !lines.iter().any(|l| l.contains("Unknown") || l.contains("Recognized"))));
    }

    #[test]
    fn test_verdict_per_face_at_top_left() {
        let matcher = FaceMatcher::from_reference(vec![Descriptor::new(vec![1.0, 0.0])]).unwrap();
        let known = sample_face(0.0, 0.0, vec![1.0, 0.0]);
        let stranger = sample_face(300.0, 0.0, vec![-1.0, 0.0]);
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &[known.clone(), stranger.clone()], Some(&matcher));

        let fields = text_fields(&canvas);
        assert_eq!(fields.len(), 4);
        let verdict_at = |anchor: (f32, f32)| {
            fields
                .iter()
                .find(|(a, _)| **a == anchor)
                .map(|(_, lines)| lines[0].clone())
                .unwrap()
        };
        assert_eq!(verdict_at(known.bbox.top_left()), "Face Recognized / Matched");
        assert_eq!(verdict_at(stranger.bbox.top_left()), "Unknown Human...");
    }

    #[test]
    fn test_landmarks_and_expressions_for_every_face() {
        let faces = vec![
            sample_face(0.0, 0.0, vec![1.0]),
            sample_face(100.0, 100.0, vec![1.0]),
            sample_face(200.0, 200.0, vec![1.0]),
        ];
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &faces, None);

        let landmarks = canvas
            .ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Landmarks { .. }))
            .count();
        assert_eq!(landmarks, 3);

        let DrawOp::Expressions { entries, anchor } = &canvas.ops[3] else {
            panic!("expected expressions after landmarks");
        };
        assert_eq!(*anchor, faces[0].bbox.bottom_left());
        // sad (0.05) is under the minimum
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Expression::Neutral);
    }

    #[test]
    fn test_render_clears_previous_tick() {
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &[sample_face(0.0, 0.0, vec![1.0])], None);
        assert!(!canvas.is_empty());
        render_faces(&mut canvas, &[], None);
        assert!(canvas.is_empty());
    }

    #[test]
    fn test_rasterize_without_font() {
        let mut canvas = Canvas::new(64, 48);
        canvas.ops.push(DrawOp::Landmarks {
            points: vec![(10.0, 10.0)],
        });
        canvas.ops.push(DrawOp::TextField {
            anchor: (30.0, 5.0),
            lines: vec!["x".into()],
        });
        let img = canvas.rasterize(None);
        assert_eq!(img.dimensions(), (64, 48));
        assert_eq!(img.get_pixel(10, 10), &LANDMARK_COLOR);
        assert_eq!(img.get_pixel(31, 6)[3], FIELD_BACKGROUND[3]);
        // Untouched pixels stay transparent.
        assert_eq!(img.get_pixel(0, 47)[3], 0);
    }

    #[test]
    fn test_canvas_json_shape() {
        let mut canvas = Canvas::new(640, 480);
        render_faces(&mut canvas, &[sample_face(0.0, 0.0, vec![1.0])], None);
        let json = serde_json::to_value(&canvas).unwrap();
        assert_eq!(json["width"], 640);
        assert_eq!(json["ops"][0]["op"], "landmarks");
        assert_eq!(json["ops"][2]["op"], "text_field");
    }
}
