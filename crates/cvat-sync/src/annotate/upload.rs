// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use super::{
    Progress,
    session::{AnnotationSession, FrameRef, LabelFieldSchema, LabelSchema, UploadOptions},
    shapes::{ShapeEncoder, remap_ids},
};
use crate::{
    Error,
    api::{
        AnnotationBackend, AnnotationPayload, AssigneePatch, JobId, TaskCreateParams, TaskInfo,
        UserId,
    },
    dataset::{MediaType, Sample, SampleCollection, split_frame_field},
};
use std::collections::BTreeMap;
use tokio::sync::mpsc::Sender;

/// Picks the entry for position `index`, reusing the last entry once the
/// list runs out.
fn capped<T: Copy>(values: &[T], index: usize) -> Option<T> {
    values.get(index.min(values.len().checked_sub(1)?)).copied()
}

fn resolve_users(names: &[String], ids: &BTreeMap<String, UserId>) -> Result<Vec<UserId>, Error> {
    names
        .iter()
        .map(|name| {
            ids.get(name)
                .copied()
                .ok_or_else(|| Error::UnknownUser(name.clone()))
        })
        .collect()
}

/// User ids referenced by the upload options.
struct Assignments {
    task_assignee: Option<UserId>,
    job_assignees: Vec<UserId>,
    job_reviewers: Vec<UserId>,
}

impl Assignments {
    async fn resolve<B: AnnotationBackend>(
        backend: &B,
        options: &UploadOptions,
    ) -> Result<Self, Error> {
        if options.usernames().is_empty() {
            return Ok(Assignments {
                task_assignee: None,
                job_assignees: vec![],
                job_reviewers: vec![],
            });
        }

        let users: BTreeMap<String, UserId> = backend
            .users()
            .await?
            .into_iter()
            .map(|user| (user.username, user.id))
            .collect();

        let task_assignee = match &options.task_assignee {
            Some(name) => Some(resolve_users(std::slice::from_ref(name), &users)?[0]),
            None => None,
        };

        Ok(Assignments {
            task_assignee,
            job_assignees: resolve_users(&options.job_assignees, &users)?,
            job_reviewers: resolve_users(&options.job_reviewers, &users)?,
        })
    }

    fn job_patch(&self, index: usize) -> Option<AssigneePatch> {
        let patch = AssigneePatch {
            assignee_id: capped(&self.job_assignees, index),
            reviewer_id: capped(&self.job_reviewers, index),
        };
        (patch.assignee_id.is_some() || patch.reviewer_id.is_some()).then_some(patch)
    }
}

/// Remote frame numbers of a batch in upload order.
fn frame_map(batch: &[Sample], media_type: MediaType) -> BTreeMap<u64, FrameRef> {
    let refs: Vec<FrameRef> = match media_type {
        MediaType::Image => batch
            .iter()
            .map(|sample| FrameRef {
                sample_id: sample.id.clone(),
                frame_id: None,
            })
            .collect(),
        MediaType::Video => batch
            .iter()
            .flat_map(|sample| {
                sample.frames.iter().map(|frame| FrameRef {
                    sample_id: sample.id.clone(),
                    frame_id: Some(frame.id.clone()),
                })
            })
            .collect(),
    };

    (0u64..).zip(refs).collect()
}

/// Tags and shapes of the labels a batch already holds in `field`.
fn existing_annotations(
    batch: &[Sample],
    field: &str,
    schema: &LabelFieldSchema,
) -> Result<AnnotationPayload, Error> {
    let (on_frames, name) = split_frame_field(field);
    let encoder = ShapeEncoder::new(name, schema);
    let mut payload = AnnotationPayload::default();
    let mut frame = 0u64;

    for sample in batch {
        let frame_size = sample.frame_size()?;
        if on_frames {
            for f in &sample.frames {
                if let Some(label) = f.fields.get(name) {
                    encoder.encode(label, frame, frame_size, &mut payload);
                }
                frame += 1;
            }
        } else {
            if let Some(label) = sample.fields.get(name) {
                encoder.encode(label, frame, frame_size, &mut payload);
            }
            frame += 1;
        }
    }

    Ok(payload)
}

/// Checks that fields match the media: frame fields only on videos, and
/// videos only through frame fields.
fn check_fields(schema: &LabelSchema, media_type: MediaType) -> Result<(), Error> {
    for field in schema.fields.keys() {
        let (on_frames, _) = split_frame_field(field);
        match (media_type, on_frames) {
            (MediaType::Image, true) => {
                return Err(Error::InvalidParameters(format!(
                    "field '{}' targets video frames but the samples are images",
                    field
                )));
            }
            (MediaType::Video, false) => {
                return Err(Error::InvalidParameters(format!(
                    "field '{}' must be a frame field (frames.<name>) for video samples",
                    field
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn task_name(prefix: &str, field: &str) -> String {
    format!("{}_{}", prefix, field.replace(' ', "_"))
}

/// Sends samples to CVAT for annotation.
///
/// One task is created per label field, or per label field and video since
/// CVAT accepts a single video per task. Each task receives the media in
/// file path order, waits for its jobs, assigns them and, for fields marked
/// as existing, receives the labels the samples already hold.
///
/// Samples are sorted by file path and image dimensions are read from disk
/// when missing. Video frames are completed up to the total frame count so
/// remote frame numbers follow frame order.
///
/// Returns the session needed to download the annotations later.
pub async fn upload_samples<B: AnnotationBackend>(
    backend: &B,
    samples: &mut SampleCollection,
    mut label_schema: LabelSchema,
    options: &UploadOptions,
    progress: Option<Sender<Progress>>,
) -> Result<AnnotationSession, Error> {
    if samples.is_empty() {
        return Err(Error::InvalidParameters("no samples to upload".to_owned()));
    }

    options.validate()?;
    check_fields(&label_schema, samples.media_type)?;
    label_schema.infer_classes(samples);
    label_schema.validate()?;

    samples.sort_by_filepath();
    samples.compute_metadata()?;
    if samples.media_type == MediaType::Video {
        samples.samples.iter_mut().for_each(Sample::ensure_frames);
    }

    let assignments = Assignments::resolve(backend, options).await?;
    let batch_size = match samples.media_type {
        MediaType::Image => samples.len(),
        MediaType::Video => 1,
    };
    let batches = samples.batches(batch_size);
    let total = batches.len() * label_schema.fields.len();
    let mut current = 0;

    let mut session = AnnotationSession::new(label_schema.clone());

    for (field, schema) in &label_schema.fields {
        if schema.label_type.is_scalar() {
            session
                .assigned_scalar_attrs
                .insert(field.clone(), schema.assigns_scalar_attrs());
        }

        let (_, name) = split_frame_field(field);
        let params = TaskCreateParams {
            name: task_name(&options.task_name_prefix, name),
            image_quality: options.image_quality,
            labels: schema.remote_labels(name),
            segment_size: options.segment_size,
        };

        for (batch_index, batch) in batches.iter().enumerate() {
            let task = backend.create_task(&params).await?;
            log::info!(
                "Created task {} '{}' for field '{}' with {} samples",
                task.id,
                task.name,
                field,
                batch.len()
            );

            let job_ids = upload_batch(
                backend,
                &task,
                batch,
                batch_index,
                samples.media_type,
                &assignments,
                options,
            )
            .await?;

            if schema.existing_field {
                let payload = existing_annotations(batch, field, schema)?;
                submit_annotations(backend, &task, payload, options).await?;
            }

            session.add_task(
                field,
                task.id,
                job_ids,
                frame_map(batch, samples.media_type),
            );

            current += 1;
            if let Some(progress) = &progress {
                let _ = progress.send(Progress { current, total }).await;
            }
        }
    }

    Ok(session)
}

/// Assigns the task, uploads its media and assigns the jobs created for it.
async fn upload_batch<B: AnnotationBackend>(
    backend: &B,
    task: &TaskInfo,
    batch: &[Sample],
    batch_index: usize,
    media_type: MediaType,
    assignments: &Assignments,
    options: &UploadOptions,
) -> Result<Vec<JobId>, Error> {
    let task_id = task.id;

    if let Some(assignee) = assignments.task_assignee {
        let patch = AssigneePatch {
            assignee_id: Some(assignee),
            reviewer_id: None,
        };
        backend.patch_task(task_id, &patch).await?;
    }

    let paths: Vec<_> = batch.iter().map(|sample| sample.filepath.clone()).collect();
    backend
        .upload_media(task_id, &paths, options.image_quality)
        .await?;

    let jobs = options
        .poll
        .poll("job creation", |_| async move {
            let jobs = backend.jobs(task_id).await?;
            Ok((!jobs.is_empty()).then_some(jobs))
        })
        .await?;
    let job_ids: Vec<JobId> = jobs.into_iter().map(|job| job.id).collect();
    log::debug!("Task {} has jobs {:?}", task_id, job_ids);

    for (job_index, job_id) in job_ids.iter().enumerate() {
        // A video task holds one video, so users rotate per task.
        let index = match media_type {
            MediaType::Image => job_index,
            MediaType::Video => batch_index,
        };
        if let Some(patch) = assignments.job_patch(index) {
            backend.patch_job(*job_id, &patch).await?;
        }
    }

    Ok(job_ids)
}

/// Uploads `payload` to the task until the server reports holding all of
/// it.
async fn submit_annotations<B: AnnotationBackend>(
    backend: &B,
    task: &TaskInfo,
    mut payload: AnnotationPayload,
    options: &UploadOptions,
) -> Result<(), Error> {
    if payload.is_empty() {
        return Ok(());
    }

    remap_ids(&mut payload, task)?;
    let expected = payload.counts();
    let task_id = task.id;
    let payload = &payload;

    options
        .poll
        .poll("annotation upload", |_| async move {
            let stored = backend.put_annotations(task_id, payload).await?;
            if stored.counts() == expected {
                return Ok(Some(()));
            }
            log::warn!(
                "Task {} stored {} of {}; resubmitting",
                task_id,
                count_summary(stored.counts()),
                count_summary(expected)
            );
            Ok(None)
        })
        .await?;

    log::info!("Uploaded {} to task {}", count_summary(expected), task_id);
    Ok(())
}

fn count_summary((tags, shapes, tracks): (usize, usize, usize)) -> String {
    format!("{} tags, {} shapes and {} tracks", tags, shapes, tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Frame, Label, Metadata, VideoMetadata};
    use serde_json::json;

    #[test]
    fn test_count_summary_includes_tracks() {
        assert_eq!(count_summary((2, 1, 3)), "2 tags, 1 shapes and 3 tracks");
    }

    #[test]
    fn test_capped_reuses_last_entry() {
        let users = [UserId::from(1), UserId::from(2)];
        assert_eq!(capped(&users, 0), Some(UserId::from(1)));
        assert_eq!(capped(&users, 1), Some(UserId::from(2)));
        assert_eq!(capped(&users, 5), Some(UserId::from(2)));
        assert_eq!(capped::<UserId>(&[], 0), None);
    }

    #[test]
    fn test_task_name() {
        assert_eq!(
            task_name("annotation", "ground truth"),
            "annotation_ground_truth"
        );
    }

    #[test]
    fn test_video_frame_map_and_existing_labels() {
        let metadata = Metadata::Video(VideoMetadata {
            frame_width: 10,
            frame_height: 10,
            total_frame_count: 2,
        });
        let rain = Frame::new(2).with_field("weather", Label::Scalar(json!("rain")));
        let mut first = Sample::new("/a.mp4")
            .with_metadata(metadata)
            .with_frames(vec![rain]);
        first.ensure_frames();
        let batch = vec![first];

        let map = frame_map(&batch, MediaType::Video);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map[&1].frame_id.as_deref(),
            Some(batch[0].frames[1].id.as_str())
        );
        assert_eq!(map[&0].sample_id, batch[0].id);

        let schema = LabelFieldSchema::new(crate::dataset::LabelType::Scalar, vec![]).existing();
        let payload = existing_annotations(&batch, "frames.weather", &schema).unwrap();
        assert_eq!(payload.tags.len(), 1);
        assert_eq!(payload.tags[0].frame, 1);
    }

    #[test]
    fn test_check_fields() {
        let schema = LabelSchema::new().with_field(
            "frames.gt",
            LabelFieldSchema::new(crate::dataset::LabelType::Detections, vec!["car".into()]),
        );
        assert!(check_fields(&schema, MediaType::Video).is_ok());
        assert!(check_fields(&schema, MediaType::Image).is_err());
    }
}
