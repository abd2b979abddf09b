//! Walks a prediction tree and produces the flat shape lists a renderer
//! draws: rectangles and labels for detections, plus model-specific
//! shapes for pose, landmark, lane, and crowd-counting results.

use log::trace;
use serde::Deserialize;

use crate::prediction::{Classification, LineType, ModelClass, NodeId, Prediction, PredictionTree};
use crate::shapes::{CircleShape, LineShape, PolygonShape, RectShape, ShapeInfo, TextShape};
use crate::Rgba;

const BLUE: Rgba = Rgba::new(0, 0, 255);
const GREEN: Rgba = Rgba::new(0, 255, 0);
const RED: Rgba = Rgba::new(255, 0, 0);
const AQUA: Rgba = Rgba::new(0, 255, 255);
const BLACK: Rgba = Rgba::new(0, 0, 0);
const YELLOW: Rgba = Rgba::new(255, 255, 0);
const WHITE: Rgba = Rgba::new(255, 255, 255);

fn depth_color(level: u32) -> Rgba {
    match level {
        1 => BLUE,
        2 => GREEN,
        3 => RED,
        _ => AQUA,
    }
}

fn line_type_color(t: LineType) -> Rgba {
    match t {
        LineType::Background => AQUA,
        LineType::WhiteDotted => BLUE,
        LineType::WhiteSolid => GREEN,
        LineType::Yellow => RED,
    }
}

/// Limb segments between pose points, as index pairs into
/// [crate::prediction::Pose14Pt::points].
const LIMBS: [(usize, usize); 14] = [
    (0, 1),   // head - neck
    (1, 2),   // neck - right shoulder
    (1, 5),   // neck - left shoulder
    (2, 3),   // right upper arm
    (3, 4),   // right forearm
    (5, 6),   // left upper arm
    (6, 7),   // left forearm
    (1, 8),   // neck - right hip
    (1, 11),  // neck - left hip
    (8, 9),   // right thigh
    (9, 10),  // right shin
    (11, 12), // left thigh
    (12, 13), // left shin
    (8, 11),  // pelvis
];

/// Pieces a composed label line may carry, in the order configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelField {
    Class,
    TrackerId,
    Probability,
}

/// Class allow-list entry; a matching classification is drawn with this
/// color and, when `do_mask` is set, a filled black rectangle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedClass {
    pub name: String,
    pub rgb_color: [u8; 3],
    #[serde(default)]
    pub do_mask: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaConvertConfig {
    pub font_type: u32,
    pub font_size: f32,
    pub line_thickness: u32,
    pub radius: u32,
    /// Draw rectangles only for nodes one level below this; 0 draws every
    /// eligible level.
    pub level: u32,
    /// Black-fill rectangles at exactly this depth; 0 disables.
    pub mask_level: u32,
    pub y_offset: i32,
    pub draw_above_bbox: bool,
    pub allowed_labels: Vec<LabelField>,
    pub allowed_classes: Vec<AllowedClass>,
}

impl Default for MetaConvertConfig {
    fn default() -> MetaConvertConfig {
        MetaConvertConfig {
            font_type: 0,
            font_size: 0.5,
            line_thickness: 1,
            radius: 3,
            level: 0,
            mask_level: 0,
            y_offset: 0,
            draw_above_bbox: true,
            allowed_labels: vec![LabelField::Class],
            allowed_classes: Vec::new(),
        }
    }
}

/// Converts prediction trees to overlay shape lists under one fixed
/// configuration.
pub struct MetaConvert {
    config: MetaConvertConfig,
}

impl MetaConvert {
    pub fn new(config: MetaConvertConfig) -> MetaConvert {
        MetaConvert { config }
    }

    pub fn config(&self) -> &MetaConvertConfig {
        &self.config
    }

    /// Walks `tree` and returns the drawable shapes for it.
    pub fn prepare_overlay(&self, tree: &PredictionTree) -> ShapeInfo {
        let mut out = ShapeInfo::new();
        self.append_overlay(tree, &mut out);
        out
    }

    /// As [MetaConvert::prepare_overlay], but extends an existing list
    /// (several trees can share one frame's overlay).
    pub fn append_overlay(&self, tree: &PredictionTree, out: &mut ShapeInfo) {
        self.visit(tree, tree.root(), out);
        trace!("overlay now holds {} shapes", out.shape_count());
    }

    fn visit(&self, tree: &PredictionTree, id: NodeId, out: &mut ShapeInfo) {
        let node = tree.get(id);
        if !node.enabled {
            return;
        }
        let level = tree.level(id);
        match node.model_class {
            ModelClass::PoseDetect => self.pose(node, level, out),
            ModelClass::FaceLandmark => self.face_landmark(node, level, out),
            ModelClass::RoadLine => self.road_line(node, out),
            ModelClass::UltraFast => self.ultrafast(node, out),
            ModelClass::Bcc => self.crowd(node, out),
            _ => self.detection(tree, id, node, level, out),
        }
        for child_id in tree.children(id) {
            let child = tree.get(child_id);
            let special = matches!(
                child.model_class,
                ModelClass::FaceLandmark
                    | ModelClass::RoadLine
                    | ModelClass::PoseDetect
                    | ModelClass::Bcc
                    | ModelClass::UltraFast
            );
            if special || (child.bbox.width > 0 && child.bbox.height > 0) {
                self.visit(tree, child_id, out);
            }
        }
    }

    /// Rectangle plus composed label for ordinary detection nodes.
    fn detection(
        &self,
        tree: &PredictionTree,
        id: NodeId,
        node: &Prediction,
        level: u32,
        out: &mut ShapeInfo,
    ) {
        let matched = self.matched_class(node);
        if !self.config.allowed_classes.is_empty() && matched.is_none() {
            return;
        }
        let draw = node.bbox.width > 0
            && node.bbox.height > 0
            && level != 1
            && (self.config.level == 0 || level - 1 == self.config.level);
        if !draw {
            return;
        }
        let color = match matched {
            Some(m) => Rgba::new(m.rgb_color[0], m.rgb_color[1], m.rgb_color[2]),
            None => depth_color(level),
        };
        let mask = matched.map_or(false, |m| m.do_mask) || self.config.mask_level == level;
        out.rects.push(RectShape {
            x: node.bbox.x,
            y: node.bbox.y,
            width: node.bbox.width,
            height: node.bbox.height,
            thickness: self.config.line_thickness,
            color,
            apply_bg_color: mask,
            bg_color: BLACK,
        });

        let (label, label_color) = self.compose_label(tree, id, node);
        if !label.is_empty() {
            let y = node.bbox.y + self.config.y_offset;
            out.texts.push(TextShape {
                text: label,
                x: node.bbox.x,
                y,
                bottom_left_origin: self.config.draw_above_bbox && y != 0,
                font_type: self.config.font_type,
                font_size: self.config.font_size,
                color: label_color,
                apply_bg_color: false,
                bg_color: Rgba::default(),
            });
        }
    }

    /// One line per displayed node: its allowed classifications joined by
    /// `", "`, with classification-only children each appending a line.
    fn compose_label(
        &self,
        tree: &PredictionTree,
        id: NodeId,
        node: &Prediction,
    ) -> (String, Rgba) {
        let mut color = None;
        let mut label = self.classification_line(node, &mut color);
        for child_id in tree.children(id) {
            let child = tree.get(child_id);
            if !child.enabled || (child.bbox.width > 0 && child.bbox.height > 0) {
                continue;
            }
            let line = self.classification_line(child, &mut color);
            if !line.is_empty() {
                if !label.is_empty() {
                    label.push('\n');
                }
                label.push_str(&line);
            }
        }
        (label, color.unwrap_or(WHITE))
    }

    fn classification_line(&self, node: &Prediction, color: &mut Option<Rgba>) -> String {
        let parts: Vec<String> = node
            .classifications
            .iter()
            .filter(|c| self.class_allowed(c))
            .map(|c| {
                if color.is_none() && c.label_color != Rgba::default() {
                    *color = Some(c.label_color);
                }
                self.classification_label(node, c)
            })
            .filter(|s| !s.is_empty())
            .collect();
        parts.join(", ")
    }

    /// Renders one classification according to `allowed_labels`. The
    /// `"tid - "` / `"prob - "` prefixes apply only when that field opens
    /// the string; later fields join with `" : "`.
    fn classification_label(&self, node: &Prediction, c: &Classification) -> String {
        let mut s = String::new();
        for field in &self.config.allowed_labels {
            let fragment = match field {
                LabelField::Class => match c.class_label {
                    Some(ref l) => first_token(l).to_owned(),
                    None => continue,
                },
                LabelField::TrackerId => match node.obj_track_label {
                    Some(ref t) => t.clone(),
                    None => continue,
                },
                LabelField::Probability => format!("{:.2}", c.class_prob),
            };
            if s.is_empty() {
                match field {
                    LabelField::TrackerId => s.push_str("tid - "),
                    LabelField::Probability => s.push_str("prob - "),
                    LabelField::Class => {}
                }
                s.push_str(&fragment);
            } else {
                s.push_str(" : ");
                s.push_str(&fragment);
            }
        }
        s
    }

    /// First allow-list entry matching any of the node's classifications.
    fn matched_class(&self, node: &Prediction) -> Option<&AllowedClass> {
        node.classifications.iter().find_map(|c| {
            let label = c.class_label.as_deref()?;
            let token = first_token(label);
            self.config.allowed_classes.iter().find(|a| a.name == token)
        })
    }

    fn class_allowed(&self, c: &Classification) -> bool {
        if self.config.allowed_classes.is_empty() {
            return true;
        }
        match c.class_label {
            Some(ref l) => {
                let token = first_token(l);
                self.config.allowed_classes.iter().any(|a| a.name == token)
            }
            None => false,
        }
    }

    /// 14 joint circles plus 14 limb segments, colored by depth.
    fn pose(&self, node: &Prediction, level: u32, out: &mut ShapeInfo) {
        let color = depth_color(level);
        let pts = node.pose14pt.points();
        for p in &pts {
            out.circles.push(CircleShape {
                cx: p.x as i32,
                cy: p.y as i32,
                radius: self.config.radius,
                thickness: self.config.line_thickness,
                color,
            });
        }
        for &(a, b) in &LIMBS {
            out.lines.push(LineShape {
                x1: pts[a].x as i32,
                y1: pts[a].y as i32,
                x2: pts[b].x as i32,
                y2: pts[b].y as i32,
                thickness: self.config.line_thickness,
                color,
            });
        }
    }

    /// Five facial landmark circles.
    fn face_landmark(&self, node: &Prediction, level: u32, out: &mut ShapeInfo) {
        let color = depth_color(level);
        for p in node.feature.points.iter().take(5) {
            out.circles.push(CircleShape {
                cx: p.x as i32,
                cy: p.y as i32,
                radius: self.config.radius,
                thickness: self.config.line_thickness,
                color,
            });
        }
    }

    /// One polygon tracing the detected road line.
    fn road_line(&self, node: &Prediction, out: &mut ShapeInfo) {
        if node.feature.points.is_empty() {
            return;
        }
        out.polygons.push(PolygonShape {
            points: node
                .feature
                .points
                .iter()
                .map(|p| (p.x as i32, p.y as i32))
                .collect(),
            thickness: self.config.line_thickness,
            color: line_type_color(node.feature.line_type),
        });
    }

    /// Lane points; negative x marks a point the model did not place.
    fn ultrafast(&self, node: &Prediction, out: &mut ShapeInfo) {
        let color = line_type_color(node.feature.line_type);
        for p in node.feature.points.iter().filter(|p| p.x >= 0.0) {
            out.circles.push(CircleShape {
                cx: p.x as i32,
                cy: p.y as i32,
                radius: self.config.radius,
                thickness: self.config.line_thickness,
                color,
            });
        }
    }

    /// Crowd-counting banner, black on yellow.
    fn crowd(&self, node: &Prediction, out: &mut ShapeInfo) {
        let y = node.bbox.y + self.config.y_offset;
        out.texts.push(TextShape {
            text: format!("Crowd = {}", node.count),
            x: node.bbox.x,
            y,
            bottom_left_origin: self.config.draw_above_bbox && y != 0,
            font_type: self.config.font_type,
            font_size: self.config.font_size,
            color: BLACK,
            apply_bg_color: true,
            bg_color: YELLOW,
        });
    }
}

fn first_token(label: &str) -> &str {
    label.split(',').next().unwrap_or(label)
}
