// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Readers for CVAT image and video XML documents.
//!
//! Only version 1.1 is explicitly supported. Other or missing versions are
//! reported with a warning and parsed as 1.1.

use super::{
    attributes::{Attribute, AttributeValue},
    geometry::{PixelBox, parse_points},
    records::{ImageBox, ImageRecord, ImageShape, Track, TrackFlags, VideoBox, VideoShape},
    schema::{AttributeSchema, LabelEntry, TaskLabels},
    tracks::{FrameLabels, tracks_to_frames},
    xml::XmlNode,
};
use crate::{Error, dataset::Label};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

pub const SUPPORTED_VERSION: &str = "1.1";

/// Task information carried by a document.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DocumentInfo {
    pub task_labels: TaskLabels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dumped: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageDocument {
    pub info: DocumentInfo,
    pub images: Vec<ImageRecord>,
}

impl ImageDocument {
    /// Labels of every image keyed by image name, with the image dimensions.
    pub fn labels_by_name(&self) -> BTreeMap<String, ((u32, u32), BTreeMap<String, Label>)> {
        self.images
            .iter()
            .map(|image| {
                let labels = (image.frame_size(), image.to_labels());
                (image.name.clone(), labels)
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoDocument {
    pub info: DocumentInfo,
    /// `(width, height)` of the frames, present whenever there are tracks.
    pub frame_size: Option<(u32, u32)>,
    pub tracks: Vec<Track>,
}

impl VideoDocument {
    pub fn frames(&self) -> BTreeMap<u64, FrameLabels> {
        tracks_to_frames(&self.tracks)
    }
}

/// Reads CVAT XML documents.
///
/// # Example
///
/// ```rust,no_run
/// use cvat_sync::cvat::CvatReader;
///
/// let reader = CvatReader::new();
/// let document = reader.read_image_xml("annotations.xml")?;
/// println!("Loaded {} images", document.images.len());
/// # Ok::<(), cvat_sync::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct CvatReader;

impl CvatReader {
    pub fn new() -> Self {
        CvatReader
    }

    pub fn read_image_xml<P: AsRef<Path>>(&self, path: P) -> Result<ImageDocument, Error> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        self.parse_image_xml(&xml)
    }

    pub fn read_video_xml<P: AsRef<Path>>(&self, path: P) -> Result<VideoDocument, Error> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        self.parse_video_xml(&xml)
    }

    pub fn parse_image_xml(&self, xml: &str) -> Result<ImageDocument, Error> {
        let root = parse_root(xml)?;
        let images = root
            .children_named("image")
            .map(parse_image)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ImageDocument {
            info: parse_info(&root)?,
            images,
        })
    }

    pub fn parse_video_xml(&self, xml: &str) -> Result<VideoDocument, Error> {
        let root = parse_root(xml)?;
        let track_nodes: Vec<&XmlNode> = root.children_named("track").collect();

        let frame_size = if track_nodes.is_empty() {
            None
        } else {
            let size = root
                .child("meta")
                .and_then(|meta| meta.child("task"))
                .and_then(|task| task.child("original_size"))
                .ok_or_else(|| {
                    Error::InvalidXml("video document has tracks but no original_size".to_owned())
                })?;
            Some((
                parse_child_number(size, "width")?,
                parse_child_number(size, "height")?,
            ))
        };

        let tracks = match frame_size {
            Some(frame_size) => track_nodes
                .into_iter()
                .map(|node| parse_track(node, frame_size))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![],
        };

        Ok(VideoDocument {
            info: parse_info(&root)?,
            frame_size,
            tracks,
        })
    }
}

fn parse_root(xml: &str) -> Result<XmlNode, Error> {
    let root = XmlNode::parse(xml)?;
    if root.name != "annotations" {
        return Err(Error::InvalidXml(format!(
            "expected <annotations> root, found <{}>",
            root.name
        )));
    }

    match root.child_text("version") {
        None => log::warn!(
            "No version tag found; assuming version {}",
            SUPPORTED_VERSION
        ),
        Some(version) if version != SUPPORTED_VERSION => log::warn!(
            "Only version {} is explicitly supported; found {}. Trying to load assuming version {} format",
            SUPPORTED_VERSION,
            version,
            SUPPORTED_VERSION
        ),
        Some(_) => {}
    }

    Ok(root)
}

fn parse_child_number(node: &XmlNode, name: &str) -> Result<u32, Error> {
    let text = node
        .child_text(name)
        .ok_or_else(|| Error::InvalidXml(format!("<{}> is missing <{}>", node.name, name)))?;
    Ok(text.parse()?)
}

fn parse_info(root: &XmlNode) -> Result<DocumentInfo, Error> {
    let meta = root.child("meta");
    let task = meta.and_then(|meta| meta.child("task"));

    let task_labels = match task.and_then(|task| task.child("labels")) {
        Some(labels) => parse_labels(labels)?,
        None => TaskLabels::default(),
    };

    let text = |node: Option<&XmlNode>, name: &str| {
        node.and_then(|n| n.child_text(name)).map(str::to_owned)
    };

    Ok(DocumentInfo {
        task_labels,
        created: text(task, "created"),
        updated: text(task, "updated"),
        dumped: text(meta, "dumped"),
    })
}

/// Name of a `<label>` or `<attribute>`, as a child element or XML attribute.
fn node_name(node: &XmlNode) -> Result<String, Error> {
    node.child_text("name")
        .or_else(|| node.attr("name"))
        .map(str::to_owned)
        .ok_or_else(|| Error::InvalidXml(format!("<{}> has no name", node.name)))
}

fn parse_labels(labels: &XmlNode) -> Result<TaskLabels, Error> {
    let mut entries = vec![];
    for label in labels.children_named("label") {
        let mut attributes = vec![];
        if let Some(attrs) = label.child("attributes") {
            for attribute in attrs.children_named("attribute") {
                let categories = attribute
                    .child_text("values")
                    .unwrap_or_default()
                    .split('\n')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_owned)
                    .collect();
                attributes.push(AttributeSchema {
                    name: node_name(attribute)?,
                    categories,
                });
            }
        }
        entries.push(LabelEntry {
            name: node_name(label)?,
            attributes,
        });
    }
    Ok(TaskLabels::from_labels(entries))
}

fn parse_flag(node: &XmlNode, name: &str) -> Option<bool> {
    node.attr(name)
        .and_then(|value| AttributeValue::parse(value).as_flag())
}

fn parse_attributes(node: &XmlNode) -> Result<Vec<Attribute>, Error> {
    node.children_named("attribute")
        .map(|attr| -> Result<Attribute, Error> {
            let name = attr.require_attr("name")?.trim_start_matches('@');
            let value = AttributeValue::parse(attr.text.trim());
            Ok(Attribute::new(name, value))
        })
        .collect()
}

fn parse_pixel_box(node: &XmlNode) -> Result<PixelBox, Error> {
    let coordinate = |name: &str| -> Result<f64, Error> {
        Ok(node.require_attr(name)?.trim().parse::<f64>()?.round())
    };
    Ok(PixelBox::new(
        coordinate("xtl")?,
        coordinate("ytl")?,
        coordinate("xbr")?,
        coordinate("ybr")?,
    ))
}

fn parse_image_shape(node: &XmlNode) -> Result<ImageShape, Error> {
    Ok(ImageShape {
        label: node.require_attr("label")?.to_owned(),
        points: parse_points(node.require_attr("points")?)?,
        occluded: parse_flag(node, "occluded"),
        attributes: parse_attributes(node)?,
    })
}

fn parse_image(node: &XmlNode) -> Result<ImageRecord, Error> {
    let shapes = |name: &str| -> Result<Vec<ImageShape>, Error> {
        node.children_named(name).map(parse_image_shape).collect()
    };

    let boxes = node
        .children_named("box")
        .map(|b| -> Result<ImageBox, Error> {
            Ok(ImageBox {
                label: b.require_attr("label")?.to_owned(),
                pixels: parse_pixel_box(b)?,
                occluded: parse_flag(b, "occluded"),
                attributes: parse_attributes(b)?,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(ImageRecord {
        id: node.require_attr("id")?.trim().parse()?,
        name: node.require_attr("name")?.to_owned(),
        width: node.require_attr("width")?.trim().parse()?,
        height: node.require_attr("height")?.trim().parse()?,
        boxes,
        polygons: shapes("polygon")?,
        polylines: shapes("polyline")?,
        points: shapes("points")?,
    })
}

fn parse_track_flags(node: &XmlNode) -> TrackFlags {
    TrackFlags {
        outside: parse_flag(node, "outside"),
        occluded: parse_flag(node, "occluded"),
        keyframe: parse_flag(node, "keyframe"),
    }
}

fn parse_frame(node: &XmlNode) -> Result<u64, Error> {
    Ok(node.require_attr("frame")?.trim().parse()?)
}

fn parse_track(node: &XmlNode, frame_size: (u32, u32)) -> Result<Track, Error> {
    let shapes = |name: &str| -> Result<BTreeMap<u64, VideoShape>, Error> {
        node.children_named(name)
            .map(|s| -> Result<(u64, VideoShape), Error> {
                let frame = parse_frame(s)?;
                let shape = VideoShape {
                    frame,
                    points: parse_points(s.require_attr("points")?)?,
                    flags: parse_track_flags(s),
                    attributes: parse_attributes(s)?,
                };
                Ok((frame, shape))
            })
            .collect()
    };

    let boxes = node
        .children_named("box")
        .map(|b| -> Result<(u64, VideoBox), Error> {
            let frame = parse_frame(b)?;
            let video_box = VideoBox {
                frame,
                pixels: parse_pixel_box(b)?,
                flags: parse_track_flags(b),
                attributes: parse_attributes(b)?,
            };
            Ok((frame, video_box))
        })
        .collect::<Result<BTreeMap<_, _>, Error>>()?;

    Ok(Track {
        id: node.require_attr("id")?.trim().parse()?,
        label: node.require_attr("label")?.to_owned(),
        width: frame_size.0,
        height: frame_size.1,
        boxes,
        polygons: shapes("polygon")?,
        polylines: shapes("polyline")?,
        points: shapes("points")?,
    })
}

/// Streams video documents into per-frame labels while merging their task
/// labels into one schema.
#[derive(Clone, Debug, Default)]
pub struct VideoImport {
    info: Option<DocumentInfo>,
    task_labels: TaskLabels,
}

impl VideoImport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the document's task labels and returns its frames.
    pub fn add(&mut self, document: &VideoDocument) -> BTreeMap<u64, FrameLabels> {
        self.task_labels.merge(&document.info.task_labels);
        let info = self.info.get_or_insert_with(|| document.info.clone());
        info.task_labels = self.task_labels.clone();
        document.frames()
    }

    pub fn task_labels(&self) -> &TaskLabels {
        &self.task_labels
    }

    /// Info of the first document with the merged task labels.
    pub fn info(&self) -> Option<&DocumentInfo> {
        self.info.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <task>
      <name>street</name>
      <created>2024-01-01T00:00:00+00:00</created>
      <labels>
        <label>
          <name>car</name>
          <attributes>
            <attribute>
              <name>type</name>
              <values>sedan
coupe</values>
            </attribute>
          </attributes>
        </label>
      </labels>
    </task>
    <dumped>2024-01-02T00:00:00+00:00</dumped>
  </meta>
  <image id="0" name="a.jpg" width="100" height="50">
    <box label="car" xtl="10.4" ytl="5" xbr="60" ybr="45" occluded="1">
      <attribute name="@type">sedan</attribute>
      <attribute name="speed">3.5</attribute>
    </box>
  </image>
  <image id="1" name="b.jpg" width="100" height="50">
    <polygon label="car" points="0,0;10,0;10,10" occluded="0"/>
    <polyline label="road" points="0,0;5,5"/>
    <points label="wheel" points="1,1"/>
  </image>
</annotations>"#;

    #[test]
    fn test_parse_image_document() {
        let document = CvatReader::new().parse_image_xml(IMAGE_XML).unwrap();
        assert_eq!(document.info.task_labels.label_names(), vec!["car"]);
        let car = &document.info.task_labels.labels()[0];
        assert_eq!(car.attributes[0].categories, vec!["coupe", "sedan"]);
        assert_eq!(
            document.info.created.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert_eq!(document.info.updated, None);
        assert!(document.info.dumped.is_some());

        let first = &document.images[0];
        assert_eq!(first.boxes[0].pixels, PixelBox::new(10.0, 5.0, 60.0, 45.0));
        assert_eq!(first.boxes[0].occluded, Some(true));
        let attributes = &first.boxes[0].attributes;
        assert_eq!(attributes[0].name, "type");
        assert_eq!(attributes[1].value, AttributeValue::Real(3.5));

        let second = &document.images[1];
        assert_eq!(second.polygons.len(), 1);
        assert_eq!(second.polygons[0].occluded, Some(false));
        assert_eq!(second.polylines.len(), 1);
        assert_eq!(second.points[0].points, vec![(1.0, 1.0)]);

        let labels = document.labels_by_name();
        match &labels["b.jpg"].1["polylines"] {
            Label::Polylines(polylines) => {
                assert!(polylines[0].closed && polylines[0].filled);
                assert!(!polylines[1].closed && !polylines[1].filled);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_version_is_tolerated() {
        let xml = r#"<annotations><image id="0" name="a" width="1" height="1"/></annotations>"#;
        let document = CvatReader::new().parse_image_xml(xml).unwrap();
        assert_eq!(document.images.len(), 1);
        assert!(document.info.task_labels.is_empty());
    }

    #[test]
    fn test_video_tracks_require_original_size() {
        let xml = r#"<annotations><version>1.1</version>
            <track id="0" label="car"><box frame="0" xtl="0" ytl="0" xbr="1" ybr="1" outside="0" occluded="0" keyframe="1"/></track>
        </annotations>"#;
        assert!(matches!(
            CvatReader::new().parse_video_xml(xml),
            Err(Error::InvalidXml(_))
        ));

        let empty = CvatReader::new()
            .parse_video_xml("<annotations><version>1.1</version></annotations>")
            .unwrap();
        assert!(empty.tracks.is_empty());
        assert_eq!(empty.frame_size, None);
    }

    #[test]
    fn test_video_import_merges_labels() {
        let video = |label: &str| {
            format!(
                r#"<annotations><version>1.1</version><meta><task>
                <original_size><width>10</width><height>10</height></original_size>
                <labels><label><name>{label}</name></label></labels></task></meta>
                <track id="3" label="{label}">
                  <points frame="1" points="5,5" outside="0" occluded="0" keyframe="1"/>
                  <points frame="2" points="6,6" outside="0" occluded="0" keyframe="0"/>
                </track></annotations>"#
            )
        };

        let reader = CvatReader::new();
        let mut import = VideoImport::new();
        let frames = import.add(&reader.parse_video_xml(&video("person")).unwrap());
        import.add(&reader.parse_video_xml(&video("dog")).unwrap());

        assert_eq!(import.task_labels().label_names(), vec!["dog", "person"]);
        let info = import.info().unwrap();
        assert_eq!(info.task_labels.label_names().len(), 2);
        match &frames[&2]["keypoints"] {
            Label::Keypoints(keypoints) => {
                assert_eq!(keypoints[0].index, Some(3));
                assert_eq!(keypoints[0].points, vec![(0.6, 0.6)]);
                assert_eq!(
                    keypoints[0].attributes.get("keyframe"),
                    Some(&serde_json::json!(false))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
