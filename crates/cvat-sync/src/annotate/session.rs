// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Label schemas, upload options and the identifier maps of an annotation
//! session.

use crate::{
    Error,
    api::{InputType, JobId, RemoteAttributeSpec, RemoteLabelSpec, TaskId},
    config::ConnectionConfig,
    dataset::{LabelType, SampleCollection, split_frame_field},
    poll::PollPolicy,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

/// Attribute carrying the local label id through a round trip.
pub const LABEL_ID_ATTRIBUTE: &str = "label_id";

/// Attribute used for scalar fields declared without attributes.
pub const DEFAULT_SCALAR_ATTRIBUTE: &str = "value";

/// Prefix of attribute names read from a label's `attributes` bag entry
/// rather than from a top-level label field.
pub const ATTRIBUTE_PREFIX: &str = "attribute:";

/// Attribute requested for annotation on a label field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl AttributeSpec {
    pub fn text(name: impl Into<String>) -> Self {
        AttributeSpec {
            name: name.into(),
            input_type: InputType::Text,
            values: vec![],
            default_value: None,
        }
    }

    pub fn select(name: impl Into<String>, values: Vec<String>) -> Self {
        AttributeSpec {
            name: name.into(),
            input_type: InputType::Select,
            values,
            default_value: None,
        }
    }

    /// Name with any `attribute:` prefix removed.
    pub fn bare_name(&self) -> &str {
        self.name
            .strip_prefix(ATTRIBUTE_PREFIX)
            .unwrap_or(&self.name)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.input_type.requires_values() && self.values.is_empty() {
            return Err(Error::InvalidParameters(format!(
                "attribute '{}' of type {} requires a non-empty list of values",
                self.name, self.input_type
            )));
        }
        Ok(())
    }

    pub fn to_remote(&self) -> RemoteAttributeSpec {
        RemoteAttributeSpec {
            name: self.name.clone(),
            mutable: true,
            input_type: self.input_type,
            values: self.values.clone(),
            default_value: self.default_value.clone(),
        }
    }
}

/// What to annotate in one label field.
///
/// Fields on the frames of a video are named `frames.<field>`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LabelFieldSchema {
    #[serde(rename = "type")]
    pub label_type: LabelType,
    /// Class names. Empty for scalars annotated as free values.
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    /// Whether the field already holds labels that are sent along.
    #[serde(default)]
    pub existing_field: bool,
}

impl LabelFieldSchema {
    pub fn new(label_type: LabelType, classes: Vec<String>) -> Self {
        LabelFieldSchema {
            label_type,
            classes,
            attributes: vec![],
            existing_field: false,
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<AttributeSpec>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn existing(mut self) -> Self {
        self.existing_field = true;
        self
    }

    /// Whether scalar values travel as the attribute of a single tag label
    /// rather than as the tag's class.
    pub fn assigns_scalar_attrs(&self) -> bool {
        self.classes.is_empty()
    }

    fn validate(&self, field: &str) -> Result<(), Error> {
        if !self.label_type.is_scalar() && self.classes.is_empty() {
            return Err(Error::InvalidParameters(format!(
                "field '{}' of type {} requires classes",
                field, self.label_type
            )));
        }
        for attribute in &self.attributes {
            attribute.validate()?;
        }
        Ok(())
    }

    /// Attributes created on every remote label of the field.
    pub fn remote_attributes(&self) -> Vec<AttributeSpec> {
        let mut attributes = self.attributes.clone();

        if self.assigns_scalar_attrs() {
            attributes.truncate(1);
            if attributes.is_empty() {
                attributes.push(AttributeSpec::text(DEFAULT_SCALAR_ATTRIBUTE));
            }
            return attributes;
        }

        if self.existing_field
            && !self.label_type.is_scalar()
            && !attributes.iter().any(|a| a.name == LABEL_ID_ATTRIBUTE)
        {
            attributes.push(AttributeSpec::text(LABEL_ID_ATTRIBUTE));
        }
        attributes
    }

    /// Labels submitted when creating a task for the field.
    ///
    /// A field without classes becomes a single label named after the field.
    pub fn remote_labels(&self, field: &str) -> Vec<RemoteLabelSpec> {
        let attributes: Vec<RemoteAttributeSpec> = self
            .remote_attributes()
            .iter()
            .map(AttributeSpec::to_remote)
            .collect();

        let names = if self.assigns_scalar_attrs() {
            vec![field.to_owned()]
        } else {
            self.classes.clone()
        };

        names
            .into_iter()
            .map(|name| RemoteLabelSpec {
                name,
                attributes: attributes.clone(),
            })
            .collect()
    }
}

/// Label fields to annotate, keyed by field name.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct LabelSchema {
    pub fields: BTreeMap<String, LabelFieldSchema>,
}

impl LabelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, field: LabelFieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn get(&self, field: &str) -> Option<&LabelFieldSchema> {
        self.fields.get(field)
    }

    /// Checks every field before anything is sent to the server.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fields.is_empty() {
            return Err(Error::InvalidParameters("label schema has no fields".to_owned()));
        }
        for (name, field) in &self.fields {
            field.validate(name)?;
        }
        Ok(())
    }

    /// Fills the classes of existing fields declared without classes from
    /// the labels they hold.
    pub fn infer_classes(&mut self, samples: &SampleCollection) {
        for (name, field) in self.fields.iter_mut() {
            if !field.existing_field || field.label_type.is_scalar() || !field.classes.is_empty() {
                continue;
            }

            let (on_frames, field_name) = split_frame_field(name);
            let mut classes = BTreeSet::new();
            for sample in &samples.samples {
                let labels: Vec<_> = if on_frames {
                    sample
                        .frames
                        .iter()
                        .filter_map(|frame| frame.fields.get(field_name))
                        .collect()
                } else {
                    sample.fields.get(field_name).into_iter().collect()
                };
                for label in labels {
                    classes.extend(label.instances().iter().map(|i| i.label().to_owned()));
                }
            }

            log::debug!("Inferred {} classes for field '{}'", classes.len(), name);
            field.classes = classes.into_iter().collect();
        }
    }
}

/// Options of an upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UploadOptions {
    /// Prefix of task names, followed by the field name.
    pub task_name_prefix: String,
    /// JPEG quality, 0 to 100, of the images stored by the server.
    pub image_quality: u8,
    /// Maximum number of images per job.
    pub segment_size: Option<u32>,
    pub task_assignee: Option<String>,
    /// Usernames assigned to jobs in order; the last one takes the rest.
    pub job_assignees: Vec<String>,
    pub job_reviewers: Vec<String>,
    #[serde(skip)]
    pub poll: PollPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            task_name_prefix: "annotation".to_owned(),
            image_quality: 75,
            segment_size: None,
            task_assignee: None,
            job_assignees: vec![],
            job_reviewers: vec![],
            poll: PollPolicy::from_env(),
        }
    }
}

impl UploadOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.image_quality > 100 {
            return Err(Error::InvalidParameters(format!(
                "image_quality must be between 0 and 100, got {}",
                self.image_quality
            )));
        }
        Ok(())
    }

    /// Every username referenced by the options.
    pub fn usernames(&self) -> BTreeSet<&str> {
        self.task_assignee
            .iter()
            .chain(&self.job_assignees)
            .chain(&self.job_reviewers)
            .map(String::as_str)
            .collect()
    }
}

/// Local identity of a remote frame.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FrameRef {
    pub sample_id: String,
    /// Set for frames of a video sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
}

/// Summary of one annotated label field.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct LabelFieldInfo {
    pub field: String,
    pub label_type: LabelType,
    pub classes: Vec<String>,
    pub task_ids: Vec<TaskId>,
}

/// Everything needed to download and reconcile the annotations of an
/// upload.
///
/// The maps are written once per field during the upload and only read
/// afterwards. The session is serializable so it can outlive the process
/// that created it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AnnotationSession {
    pub label_schema: LabelSchema,
    pub task_ids: Vec<TaskId>,
    pub job_ids: BTreeMap<TaskId, Vec<JobId>>,
    /// `task → remote frame number → local sample and frame`.
    pub frame_id_map: BTreeMap<TaskId, BTreeMap<u64, FrameRef>>,
    /// `field → tasks`, one task per field for images and one per video.
    pub labels_task_map: BTreeMap<String, Vec<TaskId>>,
    /// `scalar field → whether values travel as tag attributes`.
    pub assigned_scalar_attrs: BTreeMap<String, bool>,
}

impl AnnotationSession {
    pub fn new(label_schema: LabelSchema) -> Self {
        AnnotationSession {
            label_schema,
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Task and job ids created for a field.
    pub fn label_field_ids(&self, field: &str) -> Option<(Vec<TaskId>, Vec<JobId>)> {
        let task_ids = self.labels_task_map.get(field)?.clone();
        let job_ids = task_ids
            .iter()
            .filter_map(|task_id| self.job_ids.get(task_id))
            .flatten()
            .copied()
            .collect();
        Some((task_ids, job_ids))
    }

    pub fn label_fields_info(&self) -> Vec<LabelFieldInfo> {
        self.label_schema
            .fields
            .iter()
            .map(|(field, schema)| LabelFieldInfo {
                field: field.clone(),
                label_type: schema.label_type,
                classes: schema.classes.clone(),
                task_ids: self
                    .labels_task_map
                    .get(field)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn task_id_to_label_field(&self, task_id: TaskId) -> Option<&str> {
        self.labels_task_map
            .iter()
            .find(|(_, tasks)| tasks.contains(&task_id))
            .map(|(field, _)| field.as_str())
    }

    /// Browser URL of the first job of the first task, or of the first task
    /// when it has no jobs.
    pub fn editor_url(&self, config: &ConnectionConfig) -> Option<String> {
        let task_id = *self.task_ids.first()?;
        match self.job_ids.get(&task_id).and_then(|jobs| jobs.first()) {
            Some(job_id) => Some(config.job_url(task_id, *job_id)),
            None => Some(config.task_url(task_id)),
        }
    }

    /// Records the task created for a field.
    pub(crate) fn add_task(
        &mut self,
        field: &str,
        task_id: TaskId,
        job_ids: Vec<JobId>,
        frames: BTreeMap<u64, FrameRef>,
    ) {
        self.task_ids.push(task_id);
        self.job_ids.insert(task_id, job_ids);
        self.frame_id_map.insert(task_id, frames);
        self.labels_task_map
            .entry(field.to_owned())
            .or_default()
            .push(task_id);
    }
}
