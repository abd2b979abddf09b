//! Drawable overlay shapes produced by the metadata converter. Pure
//! value types: cloning a [ShapeInfo] deep-copies every list, point
//! vector, and string, and dropping it releases them all.

use crate::Rgba;

#[derive(Debug, Clone, PartialEq)]
pub struct RectShape {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub thickness: u32,
    pub color: Rgba,
    /// Fill the rectangle with `bg_color` (used for masking).
    pub apply_bg_color: bool,
    pub bg_color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextShape {
    pub text: String,
    pub x: i32,
    pub y: i32,
    /// Draw with the baseline at (x, y) so the text sits above the point.
    pub bottom_left_origin: bool,
    pub font_type: u32,
    pub font_size: f32,
    pub color: Rgba,
    pub apply_bg_color: bool,
    pub bg_color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineShape {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub thickness: u32,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrowShape {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub thickness: u32,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircleShape {
    pub cx: i32,
    pub cy: i32,
    pub radius: u32,
    pub thickness: u32,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonShape {
    pub points: Vec<(i32, i32)>,
    pub thickness: u32,
    pub color: Rgba,
}

/// The flat shape lists a renderer consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeInfo {
    pub rects: Vec<RectShape>,
    pub texts: Vec<TextShape>,
    pub lines: Vec<LineShape>,
    pub arrows: Vec<ArrowShape>,
    pub circles: Vec<CircleShape>,
    pub polygons: Vec<PolygonShape>,
}

impl ShapeInfo {
    pub fn new() -> ShapeInfo {
        ShapeInfo::default()
    }

    /// Total number of shapes across all lists.
    pub fn shape_count(&self) -> usize {
        self.rects.len()
            + self.texts.len()
            + self.lines.len()
            + self.arrows.len()
            + self.circles.len()
            + self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape_count() == 0
    }
}
