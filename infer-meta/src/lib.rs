//! Inference-metadata support: prediction trees, temporal alignment of
//! inference results with consumer frames, and conversion of a tree into
//! flat drawable overlay shapes.
//!
//! The expected pipeline: an inferencer fills a [PredictionTree] per
//! analyzed frame and [Affixer::submit]s it; the consumer side calls
//! [Affixer::get_frame_meta] per displayed frame to receive the
//! best-overlapping tree rescaled to its resolution, then hands that to
//! [MetaConvert::prepare_overlay] for a renderer-ready [ShapeInfo].

use failure::Fail;
use serde::Deserialize;

pub mod affix;
pub mod overlay;
pub mod prediction;
pub mod shapes;

pub use crate::affix::{Affixer, FrameMeta, VideoInfo};
pub use crate::overlay::{AllowedClass, LabelField, MetaConvert, MetaConvertConfig};
pub use crate::prediction::{BoundingBox, Classification, NodeId, Prediction, PredictionTree};
pub use crate::shapes::ShapeInfo;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArg(&'static str),
}

/// An RGBA color; alpha 255 is opaque.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    255
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8) -> Rgba {
        Rgba { r, g, b, a: 255 }
    }
}
