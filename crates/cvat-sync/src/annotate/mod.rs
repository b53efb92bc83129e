// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Annotation round trips through a CVAT server.
//!
//! [`upload_samples`] creates one task per label field (one per field and
//! video for video samples), uploads the media and any labels the field
//! already holds, and returns an [`AnnotationSession`]. The session records
//! how remote tasks, jobs and frame numbers map to local samples and frames
//! and can be saved to disk between the two halves of the round trip.
//!
//! [`download_annotations`] later reads the annotations back, resolves the
//! remote class and attribute ids through the current task labels and
//! returns them as [`DownloadResults`]. Annotations whose kind does not
//! match the declared field type are returned separately instead of being
//! dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use cvat_sync::{
//!     Client, ConnectionConfig, LabelType, SampleCollection,
//!     annotate::{
//!         LabelFieldSchema, LabelSchema, UploadOptions, download_annotations, upload_samples,
//!     },
//! };
//!
//! # async fn run(mut samples: SampleCollection) -> Result<(), cvat_sync::Error> {
//! let client = Client::connect(ConnectionConfig::from_env()?).await?;
//! let schema = LabelSchema::new().with_field(
//!     "ground_truth",
//!     LabelFieldSchema::new(LabelType::Detections, vec!["car".into(), "bus".into()]),
//! );
//!
//! let options = UploadOptions::default();
//! let session = upload_samples(&client, &mut samples, schema, &options, None).await?;
//! // ... annotate in the browser ...
//! let results = download_annotations(&client, &session, true).await?;
//! results.merge_into(&mut samples);
//! # Ok(())
//! # }
//! ```

mod download;
mod session;
mod shapes;
mod upload;

pub use download::{DownloadResults, FieldResults, LabelSet, SampleResults, download_annotations};
pub use session::{
    ATTRIBUTE_PREFIX, AnnotationSession, AttributeSpec, DEFAULT_SCALAR_ATTRIBUTE, FrameRef,
    LABEL_ID_ATTRIBUTE, LabelFieldInfo, LabelFieldSchema, LabelSchema, UploadOptions,
};
pub use shapes::remap_ids;
pub use upload::upload_samples;

/// Progress of a long-running operation, sent over a channel.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Number of completed items.
    pub current: usize,
    /// Number of items to process.
    pub total: usize,
}
