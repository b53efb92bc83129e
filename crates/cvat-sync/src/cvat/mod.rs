// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # CVAT Interchange Support
//!
//! Conversion between the in-memory label model and CVAT's annotation
//! entities, plus reading and writing of CVAT 1.1 XML documents.
//!
//! ## Coordinate Systems
//!
//! The label model stores geometry relative to the frame size (`[0, 1]` per
//! axis, boxes as `[x, y, width, height]`). CVAT stores integer pixel
//! coordinates, boxes as `xtl, ytl, xbr, ybr`. Conversion to pixels rounds
//! half away from zero.
//!
//! ## Documents
//!
//! - **Image documents** hold one `<image>` per labeled image with nested
//!   `<box>`, `<polygon>`, `<polyline>` and `<points>` annotations.
//! - **Video documents** hold one `<track>` per object, each carrying one
//!   shape per keyframe along with `outside`, `occluded` and `keyframe`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cvat_sync::cvat::{CvatReader, CvatWriter, TaskHeader};
//!
//! let reader = CvatReader::new();
//! let document = reader.read_image_xml("annotations.xml")?;
//! for (name, (size, labels)) in document.labels_by_name() {
//!     println!("{} {}x{}: {} fields", name, size.0, size.1, labels.len());
//! }
//!
//! let writer = CvatWriter::new();
//! writer.write_image_xml(
//!     &TaskHeader::new(0, "copy"),
//!     &document.info.task_labels,
//!     &document.images,
//!     "copy.xml",
//! )?;
//! # Ok::<(), cvat_sync::Error>(())
//! ```

pub mod attributes;
pub mod geometry;
pub mod records;
pub mod schema;
pub mod tracks;

mod reader;
mod writer;
mod xml;

pub use attributes::{Attribute, AttributeKind, AttributeValue};
pub use reader::{
    CvatReader, DocumentInfo, ImageDocument, SUPPORTED_VERSION, VideoDocument, VideoImport,
};
pub use records::{ImageBox, ImageRecord, ImageShape, Track, TrackFlags, VideoBox, VideoShape};
pub use schema::{AttributeSchema, LabelEntry, TaskLabels};
pub use tracks::{FrameLabels, frames_to_tracks, tracks_to_frames};
pub use writer::{CvatWriteOptions, CvatWriter, ImageExport, TaskHeader, VideoExport};
