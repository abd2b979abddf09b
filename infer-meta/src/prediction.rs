//! Hierarchical inference results: a rooted tree of detections, each with
//! classifications and model-specific payloads.
//!
//! The tree is arena-backed: one owning vector of nodes with
//! parent/first-child/next-sibling indices. Deep copy is a plain clone of
//! the arena (indices stay valid), and dropping the tree releases every
//! node; there is no per-node free and no cyclic ownership.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Rgba;

static NEXT_PREDICTION_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique, monotonically increasing prediction id.
/// Concurrent callers always see distinct values.
pub fn next_prediction_id() -> u64 {
    NEXT_PREDICTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: Rgba,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One classification result attached to a prediction. `probabilities`
/// and `labels` (when present) are indexed by class number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub id: u64,
    pub class_id: i32,
    pub class_prob: f32,
    pub class_label: Option<String>,
    pub probabilities: Vec<f32>,
    pub labels: Option<Vec<String>>,
    pub label_color: Rgba,
}

impl Classification {
    pub fn num_classes(&self) -> usize {
        self.probabilities.len()
    }
}

/// The kind of model that produced a prediction; drives overlay drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Ssd,
    YoloV3,
    FaceDetect,
    Classify,
    ReidModel,
    SegmentationModel,
    PoseDetect,
    FaceLandmark,
    RoadLine,
    UltraFast,
    Bcc,
}

impl Default for ModelClass {
    fn default() -> ModelClass {
        ModelClass::Ssd
    }
}

/// The 14 anatomical points of a pose-detection result.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose14Pt {
    pub head: Point,
    pub neck: Point,
    pub right_shoulder: Point,
    pub right_elbow: Point,
    pub right_wrist: Point,
    pub left_shoulder: Point,
    pub left_elbow: Point,
    pub left_wrist: Point,
    pub right_hip: Point,
    pub right_knee: Point,
    pub right_ankle: Point,
    pub left_hip: Point,
    pub left_knee: Point,
    pub left_ankle: Point,
}

impl Pose14Pt {
    /// Points in a fixed order; indices match the limb table in the
    /// overlay builder.
    pub fn points(&self) -> [Point; 14] {
        [
            self.head,
            self.neck,
            self.right_shoulder,
            self.right_elbow,
            self.right_wrist,
            self.left_shoulder,
            self.left_elbow,
            self.left_wrist,
            self.right_hip,
            self.right_knee,
            self.right_ankle,
            self.left_hip,
            self.left_knee,
            self.left_ankle,
        ]
    }
}

/// Lane/road-line class reported by the corresponding models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Background,
    WhiteDotted,
    WhiteSolid,
    Yellow,
}

impl Default for LineType {
    fn default() -> LineType {
        LineType::Background
    }
}

/// Point features (road lines, lane markers, face landmarks).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub points: Vec<Point>,
    pub line_type: LineType,
}

/// Re-identification embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Reid {
    pub rows: u32,
    pub cols: u32,
    pub data: Vec<f32>,
}

/// Per-pixel class map.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub width: u32,
    pub height: u32,
    pub class_map: Vec<u8>,
}

/// Raw tensor output carried through for downstream stages.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuf {
    pub dims: Vec<usize>,
    pub data: Vec<u8>,
}

/// One detection/classification node.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Process-unique id; preserved by deep copies.
    pub prediction_id: u64,
    pub enabled: bool,
    pub bbox: BoundingBox,
    /// Set once the affixer has rescaled `bbox` to a consumer resolution.
    pub bbox_scaled: bool,
    pub obj_track_label: Option<String>,
    pub model_class: ModelClass,
    pub model_name: Option<String>,
    /// Object count for crowd-counting models.
    pub count: u32,
    pub pose14pt: Pose14Pt,
    pub feature: Feature,
    pub reid: Option<Reid>,
    pub segmentation: Option<Segmentation>,
    pub tensor: Option<TensorBuf>,
    pub classifications: Vec<Classification>,
}

impl Prediction {
    pub fn new() -> Prediction {
        Prediction {
            prediction_id: next_prediction_id(),
            enabled: true,
            bbox: BoundingBox::default(),
            bbox_scaled: false,
            obj_track_label: None,
            model_class: ModelClass::default(),
            model_name: None,
            count: 0,
            pose14pt: Pose14Pt::default(),
            feature: Feature::default(),
            reid: None,
            segmentation: None,
            tensor: None,
            classifications: Vec::new(),
        }
    }
}

impl Default for Prediction {
    fn default() -> Prediction {
        Prediction::new()
    }
}

/// Index of a node within its [PredictionTree].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    data: Prediction,
}

/// A rooted tree of predictions. The root usually represents the frame;
/// children are detected objects; grandchildren sub-classifications.
#[derive(Debug, Clone)]
pub struct PredictionTree {
    nodes: Vec<Node>,
}

impl PredictionTree {
    pub fn new(root: Prediction) -> PredictionTree {
        PredictionTree {
            nodes: vec![Node {
                parent: None,
                first_child: None,
                last_child: None,
                next_sibling: None,
                data: root,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Appends `child` under `parent`, after any existing children.
    pub fn append(&mut self, parent: NodeId, child: Prediction) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            first_child: None,
            last_child: None,
            next_sibling: None,
            data: child,
        });
        match self.nodes[parent.0].last_child {
            Some(prev) => self.nodes[prev.0].next_sibling = Some(id),
            None => self.nodes[parent.0].first_child = Some(id),
        }
        self.nodes[parent.0].last_child = Some(id);
        id
    }

    pub fn get(&self, id: NodeId) -> &Prediction {
        &self.nodes[id.0].data
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Prediction {
        &mut self.nodes[id.0].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Depth of the node; the root is level 1.
    pub fn level(&self, id: NodeId) -> u32 {
        let mut level = 1;
        let mut cur = id;
        while let Some(p) = self.nodes[cur.0].parent {
            level += 1;
            cur = p;
        }
        level
    }

    pub fn children(&self, id: NodeId) -> Children {
        Children {
            tree: self,
            cur: self.nodes[id.0].first_child,
        }
    }

    /// Every node paired with its id, in insertion order (root first).
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Prediction)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), &n.data))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut Prediction)> {
        self.nodes
            .iter_mut()
            .enumerate()
            .map(|(i, n)| (NodeId(i), &mut n.data))
    }

    /// Duplicates the whole tree, every owned string, classification, and
    /// payload included. Prediction ids are preserved, not reallocated.
    pub fn deep_copy(&self) -> PredictionTree {
        self.clone()
    }

    fn fmt_node(&self, f: &mut fmt::Formatter, id: NodeId, indent: usize) -> fmt::Result {
        let p = self.get(id);
        write!(
            f,
            "{:indent$}prediction {}: enabled={} bbox=({},{} {}x{})",
            "",
            p.prediction_id,
            p.enabled,
            p.bbox.x,
            p.bbox.y,
            p.bbox.width,
            p.bbox.height,
            indent = indent
        )?;
        if let Some(ref track) = p.obj_track_label {
            write!(f, " track={}", track)?;
        }
        if !p.classifications.is_empty() {
            write!(f, " classes=[")?;
            for (i, c) in p.classifications.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match c.class_label {
                    Some(ref l) => write!(f, "{}({:.2})", l, c.class_prob)?,
                    None => write!(f, "#{}({:.2})", c.class_id, c.class_prob)?,
                }
            }
            write!(f, "]")?;
        }
        writeln!(f)?;
        for child in self.children(id) {
            self.fmt_node(f, child, indent + 2)?;
        }
        Ok(())
    }
}

/// Deterministic indented rendering, usable as a debugging aid and as a
/// test oracle.
impl fmt::Display for PredictionTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_node(f, self.root(), 0)
    }
}

pub struct Children<'a> {
    tree: &'a PredictionTree,
    cur: Option<NodeId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.tree.nodes[id.0].next_sibling;
        Some(id)
    }
}
