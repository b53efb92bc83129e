// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use super::{
    session::{AnnotationSession, FrameRef, LabelFieldSchema},
    shapes::ShapeDecoder,
};
use crate::{
    Error,
    api::{AnnotationBackend, AnnotationPayload, DataMeta, RemoteAttribute, TaskId},
    cvat::AttributeValue,
    dataset::{Label, LabelInstance, LabelType, SampleCollection, split_frame_field},
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotations downloaded for one sample or frame.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct LabelSet {
    /// Value of a scalar field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Value>,
    /// Instances keyed by label id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, LabelInstance>,
}

impl LabelSet {
    pub fn is_empty(&self) -> bool {
        self.scalar.is_none() && self.instances.is_empty()
    }

    /// Builds the field value of type `label_type`.
    pub fn to_label(&self, label_type: LabelType) -> Option<Label> {
        if label_type.is_scalar() {
            return self.scalar.clone().map(Label::Scalar);
        }
        Label::from_instances(label_type, self.instances.values().cloned().collect())
    }
}

/// Annotations of one sample: its own labels and those of its frames keyed
/// by frame id.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct SampleResults {
    #[serde(skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub frames: BTreeMap<String, LabelSet>,
}

impl SampleResults {
    fn target(&mut self, frame_id: Option<&str>) -> &mut LabelSet {
        match frame_id {
            Some(frame_id) => self.frames.entry(frame_id.to_owned()).or_default(),
            None => &mut self.labels,
        }
    }
}

/// Annotations of one field keyed by sample id.
pub type FieldResults = BTreeMap<String, SampleResults>;

/// Annotations downloaded for a session.
///
/// `results` holds what matches the type declared for each field.
/// Annotations of other kinds, which CVAT allows in any task, are kept in
/// `additional_results` under the kind they were found as.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct DownloadResults {
    pub label_types: BTreeMap<String, LabelType>,
    pub results: BTreeMap<String, FieldResults>,
    pub additional_results: BTreeMap<String, BTreeMap<LabelType, FieldResults>>,
}

impl DownloadResults {
    fn insert(
        &mut self,
        field: &str,
        kind: Option<LabelType>,
        frame: &FrameRef,
        instance: LabelInstance,
    ) {
        let field_results = match kind {
            None => self.results.entry(field.to_owned()).or_default(),
            Some(kind) => self
                .additional_results
                .entry(field.to_owned())
                .or_default()
                .entry(kind)
                .or_default(),
        };
        field_results
            .entry(frame.sample_id.clone())
            .or_default()
            .target(frame.frame_id.as_deref())
            .instances
            .insert(instance.id().to_owned(), instance);
    }

    fn insert_scalar(&mut self, field: &str, frame: &FrameRef, value: Value) {
        self.results
            .entry(field.to_owned())
            .or_default()
            .entry(frame.sample_id.clone())
            .or_default()
            .target(frame.frame_id.as_deref())
            .scalar = Some(value);
    }

    /// Writes the annotations of each field back into the samples.
    ///
    /// Only samples and frames with downloaded annotations are updated, and
    /// only with annotations of the declared field type.
    pub fn merge_into(&self, samples: &mut SampleCollection) {
        for (field, field_results) in &self.results {
            let Some(label_type) = self.label_types.get(field).copied() else {
                continue;
            };
            let (on_frames, name) = split_frame_field(field);

            for sample in &mut samples.samples {
                let Some(results) = field_results.get(&sample.id) else {
                    continue;
                };

                if on_frames {
                    for frame in &mut sample.frames {
                        if let Some(label) = results
                            .frames
                            .get(&frame.id)
                            .and_then(|set| set.to_label(label_type))
                        {
                            frame.fields.insert(name.to_owned(), label);
                        }
                    }
                } else if let Some(label) = results.labels.to_label(label_type) {
                    sample.fields.insert(name.to_owned(), label);
                }
            }
        }
    }
}

/// Downloads the annotations of every task of a session, in the order the
/// session lists its tasks.
///
/// Class and attribute ids are read from each task rather than from the
/// session since the task labels may have changed remotely. When
/// `delete_tasks` is set the tasks are deleted once everything has been
/// downloaded.
pub async fn download_annotations<B: AnnotationBackend>(
    backend: &B,
    session: &AnnotationSession,
    delete_tasks: bool,
) -> Result<DownloadResults, Error> {
    let mut results = DownloadResults::default();

    for task_id in &session.task_ids {
        let Some(field) = session.task_id_to_label_field(*task_id) else {
            log::warn!("Task {} belongs to no label field of the session", task_id);
            continue;
        };
        let Some(schema) = session.label_schema.get(field) else {
            log::warn!("Session has tasks for unknown field '{}'", field);
            continue;
        };
        results.label_types.insert(field.to_owned(), schema.label_type);

        let assigned = session
            .assigned_scalar_attrs
            .get(field)
            .copied()
            .unwrap_or(false);

        let (task, payload, meta) = futures::try_join!(
            backend.task(*task_id),
            backend.annotations(*task_id),
            backend.data_meta(*task_id)
        )?;
        let (tags, shapes, tracks) = payload.counts();
        log::debug!(
            "Task {} returned {} tags, {} shapes and {} tracks",
            task_id,
            tags,
            shapes,
            tracks
        );

        // Assigned scalars accept every class the task offers.
        let declared: &[String] = if assigned { &[] } else { &schema.classes };
        let reconciler = TaskReconciler {
            task_id: *task_id,
            field,
            schema,
            assigned,
            decoder: ShapeDecoder::new(&task, declared),
            frames: session.frame_id_map.get(task_id),
            meta: &meta,
        };
        reconciler.reconcile(&payload, &mut results)?;
    }

    if delete_tasks {
        for task_id in &session.task_ids {
            backend.delete_task(*task_id).await?;
            log::info!("Deleted task {}", task_id);
        }
    }

    Ok(results)
}

/// Decodes the annotations of one task into the results of its field.
struct TaskReconciler<'a> {
    task_id: TaskId,
    field: &'a str,
    schema: &'a LabelFieldSchema,
    assigned: bool,
    decoder: ShapeDecoder,
    frames: Option<&'a BTreeMap<u64, FrameRef>>,
    meta: &'a DataMeta,
}

impl TaskReconciler<'_> {
    fn frame(&self, frame: u64) -> Result<&FrameRef, Error> {
        self.frames
            .and_then(|frames| frames.get(&frame))
            .ok_or(Error::UnmappedFrame {
                task_id: self.task_id,
                frame,
            })
    }

    fn frame_size(&self, frame: u64) -> Result<(u32, u32), Error> {
        self.meta
            .frame(frame)
            .map(|meta| (meta.width, meta.height))
            .ok_or_else(|| {
                Error::MissingMetadata(format!("frame {} of task {}", frame, self.task_id))
            })
    }

    /// `None` for kinds belonging in the field, else the bucket of the
    /// additional results.
    fn drift(&self, kind: LabelType) -> Option<LabelType> {
        if self.schema.label_type.accepts(kind) {
            None
        } else {
            log::debug!(
                "Field '{}' of type {} received {} from task {}",
                self.field,
                self.schema.label_type,
                kind,
                self.task_id
            );
            Some(kind)
        }
    }

    fn scalar_value(&self, class: &str, attributes: &[RemoteAttribute]) -> Option<Value> {
        let text = if self.assigned {
            self.decoder
                .attribute_values(attributes)
                .into_values()
                .next()?
        } else {
            class.to_owned()
        };
        Some(AttributeValue::parse(&text).to_json())
    }

    fn reconcile(
        &self,
        payload: &AnnotationPayload,
        results: &mut DownloadResults,
    ) -> Result<(), Error> {
        let field_type = self.schema.label_type;

        for tag in &payload.tags {
            let frame = self.frame(tag.frame)?;

            if field_type.is_scalar() {
                let Some(class) = self.decoder.class(&tag.label_id) else {
                    continue;
                };
                if let Some(value) = self.scalar_value(class, &tag.attributes) {
                    results.insert_scalar(self.field, frame, value);
                }
                continue;
            }

            if let Some(instance) = self.decoder.decode_tag(tag) {
                let kind = self.drift(instance.kind());
                results.insert(self.field, kind, frame, instance);
            }
        }

        for shape in &payload.shapes {
            let frame = self.frame(shape.frame)?;
            let decoded = self.decoder.decode_shape(
                &shape.shape_type,
                &shape.label_id,
                &shape.points,
                &shape.attributes,
                self.frame_size(shape.frame)?,
                field_type,
            );
            if let Some((kind, instance)) = decoded {
                results.insert(self.field, self.drift(kind), frame, instance);
            }
        }

        for (position, track) in payload.tracks.iter().enumerate() {
            let index = track.id.unwrap_or(position as u64);
            for shape in track.shapes.iter().filter(|shape| !shape.outside) {
                let frame = self.frame(shape.frame)?;
                let attributes: Vec<RemoteAttribute> = track
                    .attributes
                    .iter()
                    .chain(&shape.attributes)
                    .cloned()
                    .collect();
                let decoded = self.decoder.decode_shape(
                    &shape.shape_type,
                    &track.label_id,
                    &shape.points,
                    &attributes,
                    self.frame_size(shape.frame)?,
                    field_type,
                );
                if let Some((kind, mut instance)) = decoded {
                    instance.set_index(Some(index));
                    results.insert(self.field, self.drift(kind), frame, instance);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{
            FrameMeta, RemoteShape, RemoteTag, RemoteTrack, ShapeType, SpecRef, TaskInfo,
            TaskLabel, TrackedShape,
        },
        dataset::{BoundingBox, Detection},
    };

    fn task() -> TaskInfo {
        TaskInfo {
            id: TaskId::from(3),
            name: "task".into(),
            labels: vec![TaskLabel {
                id: 1,
                name: "car".into(),
                attributes: vec![],
            }],
            data_original_chunk_type: Some("video".into()),
        }
    }

    fn frames() -> BTreeMap<u64, FrameRef> {
        (0..3)
            .map(|n| {
                (
                    n,
                    FrameRef {
                        sample_id: "video".into(),
                        frame_id: Some(format!("f{}", n)),
                    },
                )
            })
            .collect()
    }

    fn tracked(frame: u64, outside: bool) -> TrackedShape {
        TrackedShape {
            shape_type: ShapeType::Rectangle,
            occluded: false,
            outside,
            z_order: 0,
            points: vec![0.0, 0.0, 5.0, 5.0],
            frame,
            attributes: vec![],
        }
    }

    #[test]
    fn test_tracks_expand_per_keyframe() {
        let schema = LabelFieldSchema::new(LabelType::Detections, vec!["car".into()]);
        let frame_map = frames();
        let meta = DataMeta {
            frames: vec![FrameMeta {
                width: 10,
                height: 10,
            }],
        };
        let reconciler = TaskReconciler {
            task_id: TaskId::from(3),
            field: "frames.gt",
            schema: &schema,
            assigned: false,
            decoder: ShapeDecoder::new(&task(), &schema.classes),
            frames: Some(&frame_map),
            meta: &meta,
        };

        let payload = AnnotationPayload {
            tracks: vec![RemoteTrack {
                id: Some(8),
                label_id: SpecRef::Id(1),
                frame: 0,
                group: None,
                source: "manual".into(),
                shapes: vec![tracked(0, false), tracked(1, false), tracked(2, true)],
                attributes: vec![],
            }],
            ..Default::default()
        };

        let mut results = DownloadResults::default();
        reconciler.reconcile(&payload, &mut results).unwrap();

        let video = &results.results["frames.gt"]["video"];
        assert_eq!(video.frames.len(), 2);
        let instance = video.frames["f1"].instances.values().next().unwrap();
        assert_eq!(instance.index(), Some(8));
        match instance {
            LabelInstance::Detection(d) => {
                assert_eq!(d.bounding_box, BoundingBox::new(0.0, 0.0, 0.5, 0.5))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_frame_is_an_error() {
        let schema = LabelFieldSchema::new(LabelType::Classifications, vec!["car".into()]);
        let frame_map = frames();
        let meta = DataMeta::default();
        let reconciler = TaskReconciler {
            task_id: TaskId::from(3),
            field: "frames.tags",
            schema: &schema,
            assigned: false,
            decoder: ShapeDecoder::new(&task(), &schema.classes),
            frames: Some(&frame_map),
            meta: &meta,
        };
        let payload = AnnotationPayload {
            tags: vec![RemoteTag {
                id: None,
                label_id: SpecRef::Id(1),
                frame: 9,
                group: None,
                source: "manual".into(),
                attributes: vec![],
            }],
            ..Default::default()
        };

        let err = reconciler
            .reconcile(&payload, &mut DownloadResults::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnmappedFrame { frame: 9, .. }));

        // Shapes need frame dimensions.
        let payload = AnnotationPayload {
            shapes: vec![RemoteShape {
                id: None,
                shape_type: ShapeType::Rectangle,
                occluded: false,
                z_order: 0,
                points: vec![0.0, 0.0, 1.0, 1.0],
                label_id: SpecRef::Id(1),
                frame: 0,
                group: None,
                source: "manual".into(),
                attributes: vec![],
            }],
            ..Default::default()
        };
        let err = reconciler
            .reconcile(&payload, &mut DownloadResults::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingMetadata(_)));
    }

    #[test]
    fn test_merge_into_samples() {
        use crate::dataset::{MediaType, Sample};

        let mut sample = Sample::new("/a.jpg");
        sample.id = "s0".into();
        let mut samples = SampleCollection::new(MediaType::Image, vec![sample]);

        let detection = Detection::new("car", BoundingBox::new(0.0, 0.0, 0.5, 0.5));
        let mut results = DownloadResults::default();
        results
            .label_types
            .insert("gt".into(), LabelType::Detections);
        results.insert(
            "gt",
            None,
            &FrameRef {
                sample_id: "s0".into(),
                frame_id: None,
            },
            detection.clone().into(),
        );
        results.merge_into(&mut samples);

        assert_eq!(
            samples.samples[0].fields["gt"],
            Label::Detections(vec![detection])
        );
    }
}
