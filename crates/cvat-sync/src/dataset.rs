// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory label model exchanged with CVAT.
//!
//! Geometry is stored relative to the media dimensions: every coordinate is a
//! fraction in `[0, 1]` of the image or frame width and height. Conversion to
//! the pixel coordinates used by CVAT happens in [`crate::cvat::geometry`].

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::PathBuf,
};

/// Free-form attributes attached to a label instance.
pub type AttributeBag = BTreeMap<String, Value>;

/// Prefix marking a field that lives on the frames of a video sample.
pub const FRAMES_PREFIX: &str = "frames.";

pub(crate) fn new_label_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Splits `frames.<name>` into `(true, name)`; other names are sample fields.
pub fn split_frame_field(field: &str) -> (bool, &str) {
    match field.strip_prefix(FRAMES_PREFIX) {
        Some(name) => (true, name),
        None => (false, field),
    }
}

/// Bounding box in relative `[top-left-x, top-left-y, width, height]` form.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        BoundingBox {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box containing every point, or `None` without points.
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a (f64, f64)>) -> Option<Self> {
        let mut points = points.into_iter();
        let &(x0, y0) = points.next()?;
        let (xmin, ymin, xmax, ymax) = points.fold((x0, y0, x0, y0), |acc, &(x, y)| {
            (acc.0.min(x), acc.1.min(y), acc.2.max(x), acc.3.max(y))
        });
        Some(BoundingBox::new(xmin, ymin, xmax - xmin, ymax - ymin))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Classification {
    #[serde(default = "new_label_id")]
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeBag,
}

impl Classification {
    pub fn new(label: impl Into<String>) -> Self {
        Classification {
            id: new_label_id(),
            label: label.into(),
            attributes: AttributeBag::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Detection {
    #[serde(default = "new_label_id")]
    pub id: String,
    pub label: String,
    pub bounding_box: BoundingBox,
    /// Object identity shared by the detections of one track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeBag,
}

impl Detection {
    pub fn new(label: impl Into<String>, bounding_box: BoundingBox) -> Self {
        Detection {
            id: new_label_id(),
            label: label.into(),
            bounding_box,
            index: None,
            attributes: AttributeBag::new(),
        }
    }
}

/// One or more point lists sharing a label. Filled polylines are polygons.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Polyline {
    #[serde(default = "new_label_id")]
    pub id: String,
    pub label: String,
    pub points: Vec<Vec<(f64, f64)>>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub filled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeBag,
}

impl Polyline {
    pub fn new(label: impl Into<String>, points: Vec<Vec<(f64, f64)>>) -> Self {
        Polyline {
            id: new_label_id(),
            label: label.into(),
            points,
            closed: false,
            filled: false,
            index: None,
            attributes: AttributeBag::new(),
        }
    }

    pub fn polygon(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Polyline {
            closed: true,
            filled: true,
            ..Polyline::new(label, vec![points])
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Keypoint {
    #[serde(default = "new_label_id")]
    pub id: String,
    pub label: String,
    pub points: Vec<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: AttributeBag,
}

impl Keypoint {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Keypoint {
            id: new_label_id(),
            label: label.into(),
            points,
            index: None,
            attributes: AttributeBag::new(),
        }
    }
}

/// Kind of value stored in a label field.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    Classification,
    Classifications,
    Detection,
    Detections,
    Polyline,
    Polylines,
    Keypoint,
    Keypoints,
    Scalar,
}

impl LabelType {
    pub fn is_scalar(&self) -> bool {
        matches!(self, LabelType::Scalar)
    }

    /// Whether a field of this type holds a list of instances.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            LabelType::Classifications
                | LabelType::Detections
                | LabelType::Polylines
                | LabelType::Keypoints
        )
    }

    /// Whether instances are uploaded as shapes rather than tags.
    pub fn is_shape(&self) -> bool {
        matches!(
            self,
            LabelType::Detection
                | LabelType::Detections
                | LabelType::Polyline
                | LabelType::Polylines
                | LabelType::Keypoint
                | LabelType::Keypoints
        )
    }

    pub fn is_detection(&self) -> bool {
        matches!(self, LabelType::Detection | LabelType::Detections)
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, LabelType::Classification | LabelType::Classifications)
    }

    /// List form of the type, used to key results by discovered kind.
    pub fn plural(&self) -> LabelType {
        match self {
            LabelType::Classification => LabelType::Classifications,
            LabelType::Detection => LabelType::Detections,
            LabelType::Polyline => LabelType::Polylines,
            LabelType::Keypoint => LabelType::Keypoints,
            other => *other,
        }
    }

    /// Whether `kind`, a plural instance kind, belongs to this field type.
    pub fn accepts(&self, kind: LabelType) -> bool {
        !self.is_scalar() && self.plural() == kind.plural()
    }
}

impl Display for LabelType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            LabelType::Classification => "classification",
            LabelType::Classifications => "classifications",
            LabelType::Detection => "detection",
            LabelType::Detections => "detections",
            LabelType::Polyline => "polyline",
            LabelType::Polylines => "polylines",
            LabelType::Keypoint => "keypoint",
            LabelType::Keypoints => "keypoints",
            LabelType::Scalar => "scalar",
        };
        write!(f, "{}", name)
    }
}

/// Value of a label field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Label {
    Classification(Classification),
    Classifications(Vec<Classification>),
    Detection(Detection),
    Detections(Vec<Detection>),
    Polyline(Polyline),
    Polylines(Vec<Polyline>),
    Keypoint(Keypoint),
    Keypoints(Vec<Keypoint>),
    /// Primitive value such as a string, number or boolean.
    Scalar(Value),
}

impl Label {
    pub fn label_type(&self) -> LabelType {
        match self {
            Label::Classification(_) => LabelType::Classification,
            Label::Classifications(_) => LabelType::Classifications,
            Label::Detection(_) => LabelType::Detection,
            Label::Detections(_) => LabelType::Detections,
            Label::Polyline(_) => LabelType::Polyline,
            Label::Polylines(_) => LabelType::Polylines,
            Label::Keypoint(_) => LabelType::Keypoint,
            Label::Keypoints(_) => LabelType::Keypoints,
            Label::Scalar(_) => LabelType::Scalar,
        }
    }

    /// Instances held by the label; empty for scalars.
    pub fn instances(&self) -> Vec<LabelInstance> {
        match self {
            Label::Classification(c) => vec![c.clone().into()],
            Label::Classifications(cs) => cs.iter().cloned().map(Into::into).collect(),
            Label::Detection(d) => vec![d.clone().into()],
            Label::Detections(ds) => ds.iter().cloned().map(Into::into).collect(),
            Label::Polyline(p) => vec![p.clone().into()],
            Label::Polylines(ps) => ps.iter().cloned().map(Into::into).collect(),
            Label::Keypoint(k) => vec![k.clone().into()],
            Label::Keypoints(ks) => ks.iter().cloned().map(Into::into).collect(),
            Label::Scalar(_) => vec![],
        }
    }

    /// Builds a label of `label_type` from instances of the matching kind.
    ///
    /// Instances of other kinds are ignored. Single-instance types keep the
    /// first matching instance and yield `None` when there is none.
    pub fn from_instances(label_type: LabelType, instances: Vec<LabelInstance>) -> Option<Label> {
        let mut classifications = vec![];
        let mut detections = vec![];
        let mut polylines = vec![];
        let mut keypoints = vec![];
        for instance in instances {
            match instance {
                LabelInstance::Classification(c) => classifications.push(c),
                LabelInstance::Detection(d) => detections.push(d),
                LabelInstance::Polyline(p) => polylines.push(p),
                LabelInstance::Keypoint(k) => keypoints.push(k),
            }
        }

        match label_type {
            LabelType::Classification => classifications
                .into_iter()
                .next()
                .map(Label::Classification),
            LabelType::Classifications => Some(Label::Classifications(classifications)),
            LabelType::Detection => detections.into_iter().next().map(Label::Detection),
            LabelType::Detections => Some(Label::Detections(detections)),
            LabelType::Polyline => polylines.into_iter().next().map(Label::Polyline),
            LabelType::Polylines => Some(Label::Polylines(polylines)),
            LabelType::Keypoint => keypoints.into_iter().next().map(Label::Keypoint),
            LabelType::Keypoints => Some(Label::Keypoints(keypoints)),
            LabelType::Scalar => None,
        }
    }
}

/// A single label instance of any kind.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LabelInstance {
    Classification(Classification),
    Detection(Detection),
    Polyline(Polyline),
    Keypoint(Keypoint),
}

impl LabelInstance {
    pub fn id(&self) -> &str {
        match self {
            LabelInstance::Classification(c) => &c.id,
            LabelInstance::Detection(d) => &d.id,
            LabelInstance::Polyline(p) => &p.id,
            LabelInstance::Keypoint(k) => &k.id,
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            LabelInstance::Classification(c) => c.id = id,
            LabelInstance::Detection(d) => d.id = id,
            LabelInstance::Polyline(p) => p.id = id,
            LabelInstance::Keypoint(k) => k.id = id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LabelInstance::Classification(c) => &c.label,
            LabelInstance::Detection(d) => &d.label,
            LabelInstance::Polyline(p) => &p.label,
            LabelInstance::Keypoint(k) => &k.label,
        }
    }

    pub fn index(&self) -> Option<u64> {
        match self {
            LabelInstance::Classification(_) => None,
            LabelInstance::Detection(d) => d.index,
            LabelInstance::Polyline(p) => p.index,
            LabelInstance::Keypoint(k) => k.index,
        }
    }

    pub fn set_index(&mut self, index: Option<u64>) {
        match self {
            LabelInstance::Classification(_) => {}
            LabelInstance::Detection(d) => d.index = index,
            LabelInstance::Polyline(p) => p.index = index,
            LabelInstance::Keypoint(k) => k.index = index,
        }
    }

    pub fn attributes(&self) -> &AttributeBag {
        match self {
            LabelInstance::Classification(c) => &c.attributes,
            LabelInstance::Detection(d) => &d.attributes,
            LabelInstance::Polyline(p) => &p.attributes,
            LabelInstance::Keypoint(k) => &k.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeBag {
        match self {
            LabelInstance::Classification(c) => &mut c.attributes,
            LabelInstance::Detection(d) => &mut d.attributes,
            LabelInstance::Polyline(p) => &mut p.attributes,
            LabelInstance::Keypoint(k) => &mut k.attributes,
        }
    }

    /// Plural kind of the instance, e.g. [`LabelType::Detections`].
    pub fn kind(&self) -> LabelType {
        match self {
            LabelInstance::Classification(_) => LabelType::Classifications,
            LabelInstance::Detection(_) => LabelType::Detections,
            LabelInstance::Polyline(_) => LabelType::Polylines,
            LabelInstance::Keypoint(_) => LabelType::Keypoints,
        }
    }
}

impl From<Classification> for LabelInstance {
    fn from(value: Classification) -> Self {
        LabelInstance::Classification(value)
    }
}

impl From<Detection> for LabelInstance {
    fn from(value: Detection) -> Self {
        LabelInstance::Detection(value)
    }
}

impl From<Polyline> for LabelInstance {
    fn from(value: Polyline) -> Self {
        LabelInstance::Polyline(value)
    }
}

impl From<Keypoint> for LabelInstance {
    fn from(value: Keypoint) -> Self {
        LabelInstance::Keypoint(value)
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct VideoMetadata {
    pub frame_width: u32,
    pub frame_height: u32,
    pub total_frame_count: u64,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Metadata {
    Video(VideoMetadata),
    Image(ImageMetadata),
}

impl Metadata {
    /// `(width, height)` of the image or of every video frame.
    pub fn frame_size(&self) -> (u32, u32) {
        match self {
            Metadata::Image(m) => (m.width, m.height),
            Metadata::Video(m) => (m.frame_width, m.frame_height),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Frame {
    #[serde(default = "new_label_id")]
    pub id: String,
    /// One-based frame number within the video.
    pub frame_number: u64,
    #[serde(default)]
    pub fields: BTreeMap<String, Label>,
}

impl Frame {
    pub fn new(frame_number: u64) -> Self {
        Frame {
            id: new_label_id(),
            frame_number,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, label: Label) -> Self {
        self.fields.insert(name.into(), label);
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Sample {
    #[serde(default = "new_label_id")]
    pub id: String,
    pub filepath: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub fields: BTreeMap<String, Label>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<Frame>,
}

impl Sample {
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Sample {
            id: new_label_id(),
            filepath: filepath.into(),
            metadata: None,
            fields: BTreeMap::new(),
            frames: vec![],
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, label: Label) -> Self {
        self.fields.insert(name.into(), label);
        self
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    /// File name component of the path, used as the image name in CVAT.
    pub fn file_name(&self) -> String {
        self.filepath
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filepath.to_string_lossy().into_owned())
    }

    /// Dimensions of the media, or [`Error::MissingMetadata`].
    pub fn frame_size(&self) -> Result<(u32, u32), Error> {
        self.metadata
            .map(|m| m.frame_size())
            .ok_or_else(|| Error::MissingMetadata(self.filepath.display().to_string()))
    }

    /// Creates the missing frames of a video so that every frame up to the
    /// total frame count exists, then orders frames by number.
    pub fn ensure_frames(&mut self) {
        if let Some(Metadata::Video(video)) = self.metadata {
            let existing: BTreeSet<u64> = self.frames.iter().map(|f| f.frame_number).collect();
            for frame_number in 1..=video.total_frame_count {
                if !existing.contains(&frame_number) {
                    self.frames.push(Frame::new(frame_number));
                }
            }
        }
        self.frames.sort_by_key(|frame| frame.frame_number);
    }
}

/// Ordered samples of a single media type.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SampleCollection {
    #[serde(default)]
    pub media_type: MediaType,
    pub samples: Vec<Sample>,
}

impl SampleCollection {
    pub fn new(media_type: MediaType, samples: Vec<Sample>) -> Self {
        SampleCollection {
            media_type,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sort_by_filepath(&mut self) {
        self.samples.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    }

    /// Splits the samples into consecutive batches of at most `size`.
    pub fn batches(&self, size: usize) -> Vec<&[Sample]> {
        self.samples.chunks(size.max(1)).collect()
    }

    /// Reads image dimensions from disk for samples without metadata.
    ///
    /// Video dimensions are never read from disk, so a video without
    /// metadata is an error.
    pub fn compute_metadata(&mut self) -> Result<(), Error> {
        for sample in self.samples.iter_mut().filter(|s| s.metadata.is_none()) {
            match self.media_type {
                MediaType::Image => {
                    let size = imagesize::size(&sample.filepath).map_err(|err| {
                        Error::MissingMetadata(format!("{}: {}", sample.filepath.display(), err))
                    })?;
                    log::debug!(
                        "computed metadata for {}: {}x{}",
                        sample.filepath.display(),
                        size.width,
                        size.height
                    );
                    sample.metadata = Some(Metadata::Image(ImageMetadata {
                        width: u32::try_from(size.width).unwrap_or(u32::MAX),
                        height: u32::try_from(size.height).unwrap_or(u32::MAX),
                    }));
                }
                MediaType::Video => {
                    return Err(Error::MissingMetadata(format!(
                        "video {} requires frame_width, frame_height and total_frame_count",
                        sample.filepath.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
