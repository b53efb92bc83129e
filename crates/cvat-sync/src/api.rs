// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Wire types of the CVAT REST API and the [`AnnotationBackend`] seam.
//!
//! Class and attribute ids handed out by the server are opaque and scoped to
//! one task. They are only ever resolved through the [`TaskInfo`] of the task
//! that produced them.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, path::PathBuf, str::FromStr};

/// Identifier of a remote task.
///
/// # Examples
///
/// ```rust
/// use cvat_sync::TaskId;
///
/// let task_id: TaskId = "42".parse()?;
/// assert_eq!(task_id.value(), 42);
/// assert_eq!(task_id.to_string(), "42");
/// # Ok::<(), cvat_sync::Error>(())
/// ```
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

impl From<TaskId> for u64 {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl TaskId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskId(s.trim().parse()?))
    }
}

/// Identifier of a remote job, a subdivision of a task.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        JobId(id)
    }
}

impl JobId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Identifier of a CVAT user.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(u64);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

impl UserId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Input widget of a task attribute.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Select,
    Checkbox,
    Radio,
}

impl InputType {
    /// Whether the server rejects the attribute without a value list.
    pub fn requires_values(&self) -> bool {
        !matches!(self, InputType::Text)
    }
}

impl Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            InputType::Text => "text",
            InputType::Select => "select",
            InputType::Checkbox => "checkbox",
            InputType::Radio => "radio",
        };
        write!(f, "{}", name)
    }
}

/// Attribute definition submitted on task creation.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RemoteAttributeSpec {
    pub name: String,
    pub mutable: bool,
    pub input_type: InputType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl RemoteAttributeSpec {
    /// A mutable free-text attribute.
    pub fn text(name: impl Into<String>) -> Self {
        RemoteAttributeSpec {
            name: name.into(),
            mutable: true,
            input_type: InputType::Text,
            values: vec![],
            default_value: None,
        }
    }
}

/// Label definition submitted on task creation.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RemoteLabelSpec {
    pub name: String,
    pub attributes: Vec<RemoteAttributeSpec>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TaskCreateParams {
    pub name: String,
    pub image_quality: u8,
    pub labels: Vec<RemoteLabelSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TaskAttribute {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TaskLabel {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<TaskAttribute>,
}

/// Task as returned by `POST /tasks` and `GET /tasks/{id}`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TaskInfo {
    pub id: TaskId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Vec<TaskLabel>,
    #[serde(default)]
    pub data_original_chunk_type: Option<String>,
}

impl TaskInfo {
    pub fn is_video(&self) -> bool {
        self.data_original_chunk_type.as_deref() == Some("video")
    }

    /// `label name → class id`.
    pub fn class_id_map(&self) -> BTreeMap<String, u64> {
        self.labels
            .iter()
            .map(|label| (label.name.clone(), label.id))
            .collect()
    }

    /// `class id → attribute name → attribute id`.
    pub fn attribute_id_map(&self) -> BTreeMap<u64, BTreeMap<String, u64>> {
        self.labels
            .iter()
            .map(|label| {
                let attributes = label
                    .attributes
                    .iter()
                    .map(|attr| (attr.name.clone(), attr.id))
                    .collect();
                (label.id, attributes)
            })
            .collect()
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|label| label.name.clone()).collect()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct JobInfo {
    pub id: JobId,
}

/// Body of a task or job PATCH assigning users.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct AssigneePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<UserId>,
}

/// Reference to a label or attribute in a tag or shape.
///
/// Payloads are assembled with names and rewritten to the numeric ids of
/// the destination task right before submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum SpecRef {
    Id(u64),
    Name(String),
}

impl SpecRef {
    pub fn id(&self) -> Option<u64> {
        match self {
            SpecRef::Id(id) => Some(*id),
            SpecRef::Name(_) => None,
        }
    }
}

impl From<&str> for SpecRef {
    fn from(name: &str) -> Self {
        SpecRef::Name(name.to_owned())
    }
}

impl From<u64> for SpecRef {
    fn from(id: u64) -> Self {
        SpecRef::Id(id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteAttribute {
    pub spec_id: SpecRef,
    pub value: String,
}

/// Geometric kind of a remote shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ShapeType {
    Rectangle,
    Polygon,
    Polyline,
    Points,
    /// Kinds this library does not convert, such as `ellipse` or `cuboid`.
    Other(String),
}

impl From<String> for ShapeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "rectangle" => ShapeType::Rectangle,
            "polygon" => ShapeType::Polygon,
            "polyline" => ShapeType::Polyline,
            "points" => ShapeType::Points,
            _ => ShapeType::Other(value),
        }
    }
}

impl From<ShapeType> for String {
    fn from(value: ShapeType) -> Self {
        match value {
            ShapeType::Rectangle => "rectangle".to_owned(),
            ShapeType::Polygon => "polygon".to_owned(),
            ShapeType::Polyline => "polyline".to_owned(),
            ShapeType::Points => "points".to_owned(),
            ShapeType::Other(other) => other,
        }
    }
}

fn default_source() -> String {
    "manual".to_owned()
}

/// Frame-level, non-geometric annotation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub label_id: SpecRef,
    pub frame: u64,
    #[serde(default)]
    pub group: Option<u64>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub attributes: Vec<RemoteAttribute>,
}

/// Frame-level geometric annotation with flattened `[x0, y0, x1, y1, ...]`
/// pixel coordinates.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub z_order: i64,
    pub points: Vec<f64>,
    pub label_id: SpecRef,
    pub frame: u64,
    #[serde(default)]
    pub group: Option<u64>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub attributes: Vec<RemoteAttribute>,
}

/// Keyframe of a [`RemoteTrack`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrackedShape {
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    #[serde(default)]
    pub occluded: bool,
    #[serde(default)]
    pub outside: bool,
    #[serde(default)]
    pub z_order: i64,
    pub points: Vec<f64>,
    pub frame: u64,
    #[serde(default)]
    pub attributes: Vec<RemoteAttribute>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteTrack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub label_id: SpecRef,
    pub frame: u64,
    #[serde(default)]
    pub group: Option<u64>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub shapes: Vec<TrackedShape>,
    #[serde(default)]
    pub attributes: Vec<RemoteAttribute>,
}

/// Body of `GET`/`PUT /tasks/{id}/annotations`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AnnotationPayload {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tags: Vec<RemoteTag>,
    #[serde(default)]
    pub shapes: Vec<RemoteShape>,
    #[serde(default)]
    pub tracks: Vec<RemoteTrack>,
}

impl AnnotationPayload {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.shapes.is_empty() && self.tracks.is_empty()
    }

    /// `(tags, shapes, tracks)` counts used to confirm a submission.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.tags.len(), self.shapes.len(), self.tracks.len())
    }
}

#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
}

/// Body of `GET /tasks/{id}/data/meta`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct DataMeta {
    #[serde(default)]
    pub frames: Vec<FrameMeta>,
}

impl DataMeta {
    /// Dimensions of a frame. Tasks made of a single video report one entry
    /// for all frames, so out-of-range frames resolve to the first entry.
    pub fn frame(&self, frame: u64) -> Option<FrameMeta> {
        usize::try_from(frame)
            .ok()
            .and_then(|index| self.frames.get(index))
            .or_else(|| self.frames.first())
            .copied()
    }
}

/// The remote operations needed to upload samples and reconcile annotations.
///
/// [`Client`](crate::Client) implements this against a live server; tests
/// substitute an in-memory implementation.
#[allow(async_fn_in_trait)]
pub trait AnnotationBackend {
    async fn users(&self) -> Result<Vec<User>, Error>;

    async fn create_task(&self, params: &TaskCreateParams) -> Result<TaskInfo, Error>;

    async fn patch_task(&self, task_id: TaskId, patch: &AssigneePatch) -> Result<(), Error>;

    /// Uploads media files in order; the server numbers frames in the same
    /// order.
    async fn upload_media(
        &self,
        task_id: TaskId,
        paths: &[PathBuf],
        image_quality: u8,
    ) -> Result<(), Error>;

    async fn jobs(&self, task_id: TaskId) -> Result<Vec<JobInfo>, Error>;

    async fn patch_job(&self, job_id: JobId, patch: &AssigneePatch) -> Result<(), Error>;

    async fn task(&self, task_id: TaskId) -> Result<TaskInfo, Error>;

    async fn annotations(&self, task_id: TaskId) -> Result<AnnotationPayload, Error>;

    /// Replaces the task annotations and returns what the server stored.
    async fn put_annotations(
        &self,
        task_id: TaskId,
        payload: &AnnotationPayload,
    ) -> Result<AnnotationPayload, Error>;

    async fn data_meta(&self, task_id: TaskId) -> Result<DataMeta, Error>;

    async fn delete_task(&self, task_id: TaskId) -> Result<(), Error>;
}
