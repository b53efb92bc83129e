// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # CVAT Sync
//!
//! Exchange of vision dataset labels with the CVAT annotation tool.
//!
//! ## Features
//!
//! - **Label model**: samples, video frames and typed labels (classifications,
//!   detections, polylines, keypoints and scalars) with relative geometry
//! - **XML interchange**: reading and writing CVAT image and video documents,
//!   including aggregation of per-frame labels into tracks
//! - **Annotation round trips**: creating tasks on a CVAT server, uploading
//!   media and existing labels, and reconciling the annotations that come
//!   back, even when their kinds differ from what was requested
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cvat_sync::{Client, ConnectionConfig, Error};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = ConnectionConfig::new("localhost")
//!         .with_port(8080)
//!         .with_tls(false)
//!         .with_credentials("username", "password");
//!     let client = Client::connect(config).await?;
//!
//!     let users = client.users().await?;
//!     println!("Found {} users", users.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`ConnectionConfig::from_env`] reads `CVAT_URL`, `CVAT_PORT`,
//! `CVAT_USE_TLS`, `CVAT_USERNAME` and `CVAT_PASSWORD`, on top of an
//! optional `cvat.toml` in the user configuration directory.

pub mod annotate;
pub mod api;
mod client;
mod config;
pub mod cvat;
mod dataset;
mod error;
mod poll;

pub use crate::{
    annotate::{AnnotationSession, DownloadResults, Progress},
    api::{AnnotationBackend, JobId, TaskId, User, UserId},
    client::Client,
    config::{ConnectionConfig, Credentials},
    dataset::{
        AttributeBag, BoundingBox, Classification, Detection, FRAMES_PREFIX, Frame, ImageMetadata,
        Keypoint, Label, LabelInstance, LabelType, MediaType, Metadata, Polyline, Sample,
        SampleCollection, VideoMetadata, split_frame_field,
    },
    error::Error,
    poll::PollPolicy,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    #[test]
    fn test_samples_from_json() {
        let json = r#"{
            "media_type": "image",
            "samples": [{
                "filepath": "/data/street.jpg",
                "metadata": {"width": 640, "height": 480},
                "fields": {
                    "weather": {"type": "scalar", "value": "sunny"},
                    "ground_truth": {"type": "detections", "value": [
                        {"label": "car", "bounding_box": {"x": 0.1, "y": 0.1, "width": 0.2, "height": 0.2}}
                    ]}
                }
            }]
        }"#;

        let samples: SampleCollection = serde_json::from_str(json).unwrap();
        let sample = &samples.samples[0];
        assert_eq!(sample.frame_size().unwrap(), (640, 480));
        assert_eq!(sample.file_name(), "street.jpg");
        assert_eq!(
            sample.fields["ground_truth"].label_type(),
            LabelType::Detections
        );
    }
}
