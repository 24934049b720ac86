//! Cascade descriptor parsing and the flat in-memory model.
//!
//! A trained cascade is stored as a key/value tree (JSON here) with one entry
//! per octave. [`CascadeModel::load`] validates the tree and flattens it into
//! index-addressed arenas: one [`Octave`] per trained scale, one stage
//! threshold per weak classifier, three [`Node`]s and four leaves per stage.
//! Stages of an octave are contiguous and keep their training order.

use crate::channels::HOG_LUV_CHANNELS;
use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::ops::Range;
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const STAGE_TYPE_BOOST: &str = "BOOST";
pub const FEATURE_TYPE_ICF: &str = "ICF";
pub const FEATURE_FORMAT_BOX: &str = "BOX";

pub const NODES_PER_STAGE: usize = 3;
pub const LEAVES_PER_STAGE: usize = 4;
/// Each serialized internal node is `[_, _, feature index, threshold]`.
const NODE_FIELDS: usize = 4;

/// Serialized cascade, keys as written by the trainer.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeDescriptor {
    pub stage_type: String,
    pub feature_type: String,
    /// Canonical object width in pixels.
    pub width: i32,
    /// Canonical object height in pixels.
    pub height: i32,
    /// `"BOX"` when rectangles are stored as corners, anything else for
    /// offset plus extent.
    pub feature_format: String,
    pub shrinkage: i32,
    pub octaves: Vec<OctaveDescriptor>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OctaveDescriptor {
    /// Power-of-two exponent of the octave scale.
    pub scale: i32,
    /// Number of weak classifiers (stages).
    pub weaks: i32,
    pub features: Vec<FeatureDescriptor>,
    pub trees: Vec<TreeDescriptor>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDescriptor {
    pub channel: i32,
    pub rect: [i32; 4],
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeDescriptor {
    pub tree_threshold: f32,
    pub internal_nodes: Vec<f32>,
    pub leaf_values: Vec<f32>,
}

impl CascadeDescriptor {
    pub fn from_json_str(s: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ParseError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ParseError::Malformed(format!("{}: {e}", path.display())))?;
        Self::from_reader(std::io::BufReader::new(file))
    }
}

/// How a node rectangle is encoded; fixed per octave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RectLayout {
    /// `(x, y, w, h)`, used by octaves with scale >= 1.
    Extent,
    /// `(x0, y0, x1, y1)`, used by octaves with scale < 1.
    Corners,
}

/// One trained scale of the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Octave {
    pub index: u16,
    /// Number of stages evaluated for this octave.
    pub stages: u16,
    /// Global index of the first stage in the model arenas.
    pub first_stage: u32,
    pub shrinkage: u16,
    /// Object size at this octave in frame pixels, `[w, h]`.
    pub size: [u16; 2],
    pub scale: f32,
}

impl Octave {
    #[inline]
    pub fn is_up(&self) -> bool {
        self.scale >= 1.0
    }

    #[inline]
    pub fn rect_layout(&self) -> RectLayout {
        if self.is_up() {
            RectLayout::Extent
        } else {
            RectLayout::Corners
        }
    }

    #[inline]
    pub fn stage_range(&self) -> Range<usize> {
        let first = self.first_stage as usize;
        first..first + self.stages as usize
    }
}

/// Decision stump over one channel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node {
    /// Rectangle in shrunk channel pixels, layout given by the owning octave.
    pub rect: [u8; 4],
    pub channel: u8,
    pub threshold: u32,
}

/// Validated, flattened soft cascade.
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeModel {
    /// Canonical object size `[w, h]` in frame pixels.
    pub object_size: [u32; 2],
    pub shrinkage: u16,
    pub octaves: Vec<Octave>,
    pub stage_thresholds: Vec<f32>,
    pub nodes: Vec<Node>,
    pub leaves: Vec<f32>,
}

#[inline]
fn saturate_u8(v: i32) -> u8 {
    v.clamp(0, u8::MAX as i32) as u8
}

#[inline]
fn saturate_u16(v: f32) -> u16 {
    v.round().clamp(0.0, u16::MAX as f32) as u16
}

impl CascadeModel {
    /// Validate `desc` and build the flat model.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(desc), fields(octaves = desc.octaves.len()))
    )]
    pub fn load(desc: &CascadeDescriptor) -> Result<Self, ParseError> {
        if desc.stage_type != STAGE_TYPE_BOOST {
            return Err(ParseError::UnsupportedStageType(desc.stage_type.clone()));
        }
        if desc.feature_type != FEATURE_TYPE_ICF {
            return Err(ParseError::UnsupportedFeatureType(desc.feature_type.clone()));
        }
        if desc.width <= 0 || desc.height <= 0 {
            return Err(ParseError::InvalidObjectSize {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.shrinkage <= 0 || desc.shrinkage > u16::MAX as i32 {
            return Err(ParseError::InvalidShrinkage(desc.shrinkage));
        }
        if desc.octaves.is_empty() {
            return Err(ParseError::NoOctaves);
        }

        let use_boxes = desc.feature_format == FEATURE_FORMAT_BOX;
        let shrinkage = desc.shrinkage as u16;

        let total_stages: usize = desc.octaves.iter().map(|o| o.trees.len()).sum();
        let mut octaves = Vec::with_capacity(desc.octaves.len());
        let mut stage_thresholds = Vec::with_capacity(total_stages);
        let mut nodes = Vec::with_capacity(total_stages * NODES_PER_STAGE);
        let mut leaves = Vec::with_capacity(total_stages * LEAVES_PER_STAGE);

        for (oi, od) in desc.octaves.iter().enumerate() {
            if od.weaks <= 0 {
                return Err(ParseError::EmptyOctave { octave: oi });
            }
            if od.trees.len() != od.weaks as usize {
                return Err(ParseError::StageCountMismatch {
                    octave: oi,
                    declared: od.weaks,
                    found: od.trees.len(),
                });
            }
            if od.features.is_empty() {
                return Err(ParseError::NoFeatures { octave: oi });
            }

            let scale = 2f32.powi(od.scale);
            let octave = Octave {
                index: oi as u16,
                stages: od.trees.len().min(u16::MAX as usize) as u16,
                first_stage: stage_thresholds.len() as u32,
                shrinkage,
                size: [
                    saturate_u16(desc.width as f32 * scale),
                    saturate_u16(desc.height as f32 * scale),
                ],
                scale,
            };
            let up = octave.is_up();

            let features = od
                .features
                .iter()
                .enumerate()
                .map(|(fi, f)| {
                    if f.channel < 0 || f.channel as usize >= HOG_LUV_CHANNELS {
                        return Err(ParseError::ChannelOutOfRange {
                            octave: oi,
                            feature: fi,
                            channel: f.channel,
                            max: HOG_LUV_CHANNELS,
                        });
                    }
                    let [x, y, mut w, mut h] = f.rect;
                    match (use_boxes, up) {
                        (true, true) => {
                            w -= x;
                            h -= y;
                        }
                        (false, false) => {
                            w += x;
                            h += y;
                        }
                        _ => {}
                    }
                    Ok((
                        [saturate_u8(x), saturate_u8(y), saturate_u8(w), saturate_u8(h)],
                        f.channel as u8,
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;

            for (si, tree) in od.trees.iter().enumerate() {
                let expected = NODES_PER_STAGE * NODE_FIELDS;
                if tree.internal_nodes.len() != expected {
                    return Err(ParseError::MalformedNodes {
                        octave: oi,
                        stage: si,
                        expected,
                        found: tree.internal_nodes.len(),
                    });
                }
                if tree.leaf_values.len() != LEAVES_PER_STAGE {
                    return Err(ParseError::MalformedLeaves {
                        octave: oi,
                        stage: si,
                        expected: LEAVES_PER_STAGE,
                        found: tree.leaf_values.len(),
                    });
                }

                stage_thresholds.push(tree.tree_threshold);
                for raw in tree.internal_nodes.chunks_exact(NODE_FIELDS) {
                    let index = raw[2] as i64;
                    let (rect, channel) = usize::try_from(index)
                        .ok()
                        .and_then(|i| features.get(i).copied())
                        .ok_or(ParseError::FeatureIndexOutOfRange {
                            octave: oi,
                            stage: si,
                            index,
                            len: features.len(),
                        })?;
                    // Truncate toward zero, then clamp into the unsigned range.
                    let threshold = (raw[3] as i32).max(0) as u32;
                    nodes.push(Node {
                        rect,
                        channel,
                        threshold,
                    });
                }
                leaves.extend_from_slice(&tree.leaf_values);
            }

            octaves.push(octave);
        }

        Ok(Self {
            object_size: [desc.width as u32, desc.height as u32],
            shrinkage,
            octaves,
            stage_thresholds,
            nodes,
            leaves,
        })
    }

    #[inline]
    pub fn stage_count(&self) -> usize {
        self.stage_thresholds.len()
    }

    /// The three nodes of global stage `stage`.
    #[inline]
    pub fn stage_nodes(&self, stage: usize) -> &[Node] {
        &self.nodes[stage * NODES_PER_STAGE..(stage + 1) * NODES_PER_STAGE]
    }

    /// The four leaves of global stage `stage`.
    #[inline]
    pub fn stage_leaves(&self, stage: usize) -> &[f32] {
        &self.leaves[stage * LEAVES_PER_STAGE..(stage + 1) * LEAVES_PER_STAGE]
    }
}
