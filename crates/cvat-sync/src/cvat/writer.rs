// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Writers for CVAT image and video XML documents.

use super::{
    attributes::Attribute,
    geometry::{PixelBox, format_points},
    reader::SUPPORTED_VERSION,
    records::{ImageRecord, ImageShape, Track, TrackFlags, VideoShape},
    schema::TaskLabels,
    tracks::{FrameLabels, frames_to_tracks},
    xml::XmlWriter,
};
use crate::{
    Error,
    dataset::{Label, VideoMetadata},
};
use serde_json::Value;
use std::{collections::BTreeMap, path::Path};

/// Options for CVAT writing.
#[derive(Debug, Clone, Default)]
pub struct CvatWriteOptions {
    /// Timestamp written as created, updated and dumped time. Defaults to the
    /// current time.
    pub timestamp: Option<String>,
}

/// Identity of the task described by a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskHeader {
    pub id: Option<u64>,
    pub name: String,
}

impl TaskHeader {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        TaskHeader {
            id: Some(id),
            name: name.into(),
        }
    }
}

/// Renders CVAT XML documents.
///
/// # Example
///
/// ```rust,no_run
/// use cvat_sync::cvat::{CvatWriter, TaskHeader, TaskLabels};
///
/// let writer = CvatWriter::new();
/// let header = TaskHeader::new(0, "street");
/// writer.write_image_xml(&header, &TaskLabels::default(), &[], "annotations.xml")?;
/// # Ok::<(), cvat_sync::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CvatWriter {
    options: CvatWriteOptions,
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_owned()
}

impl CvatWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CvatWriteOptions) -> Self {
        Self { options }
    }

    fn timestamp(&self) -> String {
        self.options
            .timestamp
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
    }

    pub fn write_image_xml<P: AsRef<Path>>(
        &self,
        header: &TaskHeader,
        task_labels: &TaskLabels,
        images: &[ImageRecord],
        path: P,
    ) -> Result<(), Error> {
        let xml = self.image_xml(header, task_labels, images)?;
        std::fs::write(path.as_ref(), xml)?;
        Ok(())
    }

    pub fn write_video_xml<P: AsRef<Path>>(
        &self,
        header: &TaskHeader,
        task_labels: &TaskLabels,
        tracks: &[Track],
        metadata: &VideoMetadata,
        path: P,
    ) -> Result<(), Error> {
        let xml = self.video_xml(header, task_labels, tracks, metadata)?;
        std::fs::write(path.as_ref(), xml)?;
        Ok(())
    }

    /// Renders an image document.
    pub fn image_xml(
        &self,
        header: &TaskHeader,
        task_labels: &TaskLabels,
        images: &[ImageRecord],
    ) -> Result<String, Error> {
        let mut xml = XmlWriter::new()?;
        xml.start("annotations", &[])?;
        self.write_meta(&mut xml, header, task_labels, images.len() as u64, None)?;

        for image in images {
            xml.start(
                "image",
                &[
                    ("id", image.id.to_string()),
                    ("name", image.name.clone()),
                    ("width", image.width.to_string()),
                    ("height", image.height.to_string()),
                ],
            )?;

            for b in &image.boxes {
                let mut attrs = vec![("label", b.label.clone())];
                attrs.extend(box_attributes(&b.pixels));
                if let Some(occluded) = b.occluded {
                    attrs.push(("occluded", flag(occluded)));
                }
                write_annotation(&mut xml, "box", &attrs, &b.attributes)?;
            }

            for (name, shapes) in [
                ("polygon", &image.polygons),
                ("polyline", &image.polylines),
                ("points", &image.points),
            ] {
                for shape in shapes {
                    write_image_shape(&mut xml, name, shape)?;
                }
            }

            xml.end("image")?;
        }

        xml.end("annotations")?;
        xml.finish()
    }

    /// Renders a video document with one `<track>` per track.
    pub fn video_xml(
        &self,
        header: &TaskHeader,
        task_labels: &TaskLabels,
        tracks: &[Track],
        metadata: &VideoMetadata,
    ) -> Result<String, Error> {
        let mut xml = XmlWriter::new()?;
        xml.start("annotations", &[])?;
        self.write_meta(
            &mut xml,
            header,
            task_labels,
            metadata.total_frame_count,
            Some((metadata.frame_width, metadata.frame_height)),
        )?;

        for track in tracks {
            xml.start(
                "track",
                &[("id", track.id.to_string()), ("label", track.label.clone())],
            )?;

            for b in track.boxes.values() {
                let mut attrs = vec![("frame", b.frame.to_string())];
                attrs.extend(box_attributes(&b.pixels));
                attrs.extend(track_flag_attributes(&b.flags));
                write_annotation(&mut xml, "box", &attrs, &b.attributes)?;
            }

            for (name, shapes) in [
                ("polygon", &track.polygons),
                ("polyline", &track.polylines),
                ("points", &track.points),
            ] {
                for shape in shapes.values() {
                    write_video_shape(&mut xml, name, shape)?;
                }
            }

            xml.end("track")?;
        }

        xml.end("annotations")?;
        xml.finish()
    }

    fn write_meta(
        &self,
        xml: &mut XmlWriter,
        header: &TaskHeader,
        task_labels: &TaskLabels,
        size: u64,
        original_size: Option<(u32, u32)>,
    ) -> Result<(), Error> {
        let now = self.timestamp();

        xml.element("version", SUPPORTED_VERSION)?;
        xml.start("meta", &[])?;
        xml.start("task", &[])?;
        let id = header.id.map(|id| id.to_string()).unwrap_or_default();
        xml.element("id", &id)?;
        xml.element("name", &header.name)?;
        xml.element("size", &size.to_string())?;
        let mode = if original_size.is_some() {
            "interpolation"
        } else {
            "annotation"
        };
        xml.element("mode", mode)?;
        xml.element("overlap", "")?;
        xml.element("bugtracker", "")?;
        xml.element("flipped", "False")?;
        xml.element("created", &now)?;
        xml.element("updated", &now)?;

        xml.start("labels", &[])?;
        for label in task_labels.labels() {
            xml.start("label", &[])?;
            xml.element("name", &label.name)?;
            xml.start("attributes", &[])?;
            for attribute in &label.attributes {
                xml.start("attribute", &[])?;
                xml.element("name", &attribute.name)?;
                xml.element("values", &attribute.categories.join("\n"))?;
                xml.end("attribute")?;
            }
            xml.end("attributes")?;
            xml.end("label")?;
        }
        xml.end("labels")?;

        if let Some((width, height)) = original_size {
            xml.start("original_size", &[])?;
            xml.element("width", &width.to_string())?;
            xml.element("height", &height.to_string())?;
            xml.end("original_size")?;
        }

        xml.end("task")?;
        xml.element("dumped", &now)?;
        xml.end("meta")
    }
}

fn box_attributes(pixels: &PixelBox) -> Vec<(&'static str, String)> {
    vec![
        ("xtl", pixels.xtl.to_string()),
        ("ytl", pixels.ytl.to_string()),
        ("xbr", pixels.xbr.to_string()),
        ("ybr", pixels.ybr.to_string()),
    ]
}

fn track_flag_attributes(flags: &TrackFlags) -> Vec<(&'static str, String)> {
    [
        ("outside", flags.outside),
        ("occluded", flags.occluded),
        ("keyframe", flags.keyframe),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|value| (name, flag(value))))
    .collect()
}

fn write_annotation(
    xml: &mut XmlWriter,
    name: &str,
    attrs: &[(&str, String)],
    attributes: &[Attribute],
) -> Result<(), Error> {
    xml.start(name, attrs)?;
    for attribute in attributes {
        xml.element_with_attributes(
            "attribute",
            &[("name", attribute.name.clone())],
            &attribute.value.to_string(),
        )?;
    }
    xml.end(name)
}

fn write_image_shape(xml: &mut XmlWriter, name: &str, shape: &ImageShape) -> Result<(), Error> {
    let mut attrs = vec![
        ("label", shape.label.clone()),
        ("points", format_points(&shape.points)),
    ];
    if let Some(occluded) = shape.occluded {
        attrs.push(("occluded", flag(occluded)));
    }
    write_annotation(xml, name, &attrs, &shape.attributes)
}

fn write_video_shape(xml: &mut XmlWriter, name: &str, shape: &VideoShape) -> Result<(), Error> {
    let mut attrs = vec![
        ("frame", shape.frame.to_string()),
        ("points", format_points(&shape.points)),
    ];
    attrs.extend(track_flag_attributes(&shape.flags));
    write_annotation(xml, name, &attrs, &shape.attributes)
}

/// Accumulates labeled images into one image document.
///
/// Images are numbered in the order they are added. Images without labels
/// are skipped.
#[derive(Debug, Clone, Default)]
pub struct ImageExport {
    task_name: String,
    task_labels: Option<TaskLabels>,
    images: Vec<ImageRecord>,
}

impl ImageExport {
    /// `task_labels` declares the schema; without it the schema is derived
    /// from the exported annotations.
    pub fn new(task_name: impl Into<String>, task_labels: Option<TaskLabels>) -> Self {
        ImageExport {
            task_name: task_name.into(),
            task_labels,
            images: vec![],
        }
    }

    /// Adds an image; returns `false` when it has no labels.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        labels: &BTreeMap<String, Label>,
        frame_size: (u32, u32),
    ) -> bool {
        if labels
            .values()
            .all(|label| matches!(label, Label::Scalar(Value::Null)))
        {
            return false;
        }

        let mut record = ImageRecord::from_labels(labels.values(), frame_size);
        record.id = self.images.len() as u64;
        record.name = name.into();
        self.images.push(record);
        true
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn task_labels(&self) -> TaskLabels {
        self.task_labels
            .clone()
            .unwrap_or_else(|| TaskLabels::from_image_records(&self.images))
    }

    pub fn write<P: AsRef<Path>>(&self, writer: &CvatWriter, path: P) -> Result<(), Error> {
        log::debug!(
            "writing {} images to {}",
            self.images.len(),
            path.as_ref().display()
        );
        writer.write_image_xml(
            &TaskHeader::new(0, self.task_name.clone()),
            &self.task_labels(),
            &self.images,
            path,
        )
    }
}

/// Writes one video document per labeled video.
#[derive(Debug, Clone, Default)]
pub struct VideoExport {
    task_labels: Option<TaskLabels>,
    written: u64,
}

impl VideoExport {
    pub fn new(task_labels: Option<TaskLabels>) -> Self {
        VideoExport {
            task_labels,
            written: 0,
        }
    }

    /// Aggregates the frames into tracks and writes them to `path`.
    ///
    /// Returns `false` without writing when no frame holds a detection,
    /// polyline or keypoint field.
    pub fn export<P: AsRef<Path>>(
        &mut self,
        writer: &CvatWriter,
        name: impl Into<String>,
        frames: &BTreeMap<u64, FrameLabels>,
        metadata: &VideoMetadata,
        path: P,
    ) -> Result<bool, Error> {
        let frame_size = (metadata.frame_width, metadata.frame_height);
        let Some(tracks) = frames_to_tracks(frames, frame_size) else {
            return Ok(false);
        };

        let task_labels = self
            .task_labels
            .clone()
            .unwrap_or_else(|| TaskLabels::from_tracks(&tracks));

        writer.write_video_xml(
            &TaskHeader::new(self.written, name),
            &task_labels,
            &tracks,
            metadata,
            path,
        )?;
        self.written += 1;
        Ok(true)
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}
