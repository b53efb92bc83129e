// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! CVAT image and track records in pixel coordinates.
//!
//! An [`ImageRecord`] holds the annotations of one image. A [`Track`] holds
//! one object followed across video frames, keyed by frame number. Both are
//! converted to and from the label model with the helpers of
//! [`super::geometry`] and [`super::attributes`].

use super::{
    attributes::{Attribute, SHAPE_FLAGS, attributes_from_bag, bag_from_attributes, flag_from_bag},
    geometry::{PixelBox, Point, close_ring, to_absolute, to_relative},
};
use crate::dataset::{Detection, Keypoint, Label, LabelInstance, LabelType, Polyline};
use std::collections::BTreeMap;

/// Borrowed view of one annotation, used to derive task label schemas.
#[derive(Clone, Debug)]
pub struct AnnotationView<'a> {
    pub label: &'a str,
    pub flags: Vec<(&'static str, Option<bool>)>,
    pub attributes: &'a [Attribute],
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageBox {
    pub label: String,
    pub pixels: PixelBox,
    pub occluded: Option<bool>,
    pub attributes: Vec<Attribute>,
}

impl ImageBox {
    pub fn to_detection(&self, frame_size: (u32, u32)) -> Detection {
        Detection {
            attributes: bag_from_attributes(&self.attributes, &[("occluded", self.occluded)]),
            ..Detection::new(self.label.clone(), self.pixels.to_relative(frame_size))
        }
    }

    pub fn from_detection(detection: &Detection, frame_size: (u32, u32)) -> Self {
        ImageBox {
            label: detection.label.clone(),
            pixels: PixelBox::from_relative(&detection.bounding_box, frame_size),
            occluded: flag_from_bag(&detection.attributes, "occluded"),
            attributes: attributes_from_bag(&detection.attributes, &["occluded"]),
        }
    }
}

/// Polygon, polyline or point set of an image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageShape {
    pub label: String,
    pub points: Vec<Point>,
    pub occluded: Option<bool>,
    pub attributes: Vec<Attribute>,
}

impl ImageShape {
    /// Polygons are closed and filled; polylines are neither.
    pub fn to_polyline(&self, frame_size: (u32, u32), polygon: bool) -> Polyline {
        Polyline {
            closed: polygon,
            filled: polygon,
            attributes: bag_from_attributes(&self.attributes, &[("occluded", self.occluded)]),
            ..Polyline::new(
                self.label.clone(),
                vec![to_relative(&self.points, frame_size)],
            )
        }
    }

    /// One shape per point list of the polyline.
    pub fn from_polyline(polyline: &Polyline, frame_size: (u32, u32)) -> Vec<Self> {
        if polyline.points.len() > 1 {
            log::warn!(
                "Found polyline with {} shapes; generating separate annotations for each shape",
                polyline.points.len()
            );
        }

        let occluded = flag_from_bag(&polyline.attributes, "occluded");
        let attributes = attributes_from_bag(&polyline.attributes, &["occluded"]);
        polyline
            .points
            .iter()
            .map(|points| ImageShape {
                label: polyline.label.clone(),
                points: to_absolute(points, frame_size),
                occluded,
                attributes: attributes.clone(),
            })
            .collect()
    }

    pub fn to_keypoint(&self, frame_size: (u32, u32)) -> Keypoint {
        Keypoint {
            attributes: bag_from_attributes(&self.attributes, &[("occluded", self.occluded)]),
            ..Keypoint::new(self.label.clone(), to_relative(&self.points, frame_size))
        }
    }

    pub fn from_keypoint(keypoint: &Keypoint, frame_size: (u32, u32)) -> Self {
        ImageShape {
            label: keypoint.label.clone(),
            points: to_absolute(&keypoint.points, frame_size),
            occluded: flag_from_bag(&keypoint.attributes, "occluded"),
            attributes: attributes_from_bag(&keypoint.attributes, &["occluded"]),
        }
    }
}

/// Annotations of one image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageRecord {
    pub id: u64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<ImageBox>,
    pub polygons: Vec<ImageShape>,
    pub polylines: Vec<ImageShape>,
    pub points: Vec<ImageShape>,
}

impl ImageRecord {
    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
            && self.polygons.is_empty()
            && self.polylines.is_empty()
            && self.points.is_empty()
    }

    pub fn annotations(&self) -> impl Iterator<Item = AnnotationView<'_>> {
        let boxes = self.boxes.iter().map(|b| AnnotationView {
            label: &b.label,
            flags: vec![("occluded", b.occluded)],
            attributes: &b.attributes,
        });
        let shapes = self
            .polygons
            .iter()
            .chain(&self.polylines)
            .chain(&self.points)
            .map(|s| AnnotationView {
                label: &s.label,
                flags: vec![("occluded", s.occluded)],
                attributes: &s.attributes,
            });
        boxes.chain(shapes)
    }

    /// Labels keyed by `detections`, `polylines` and `keypoints`.
    pub fn to_labels(&self) -> BTreeMap<String, Label> {
        let frame_size = self.frame_size();
        let mut labels = BTreeMap::new();

        if !self.boxes.is_empty() {
            let detections = self
                .boxes
                .iter()
                .map(|b| b.to_detection(frame_size))
                .collect();
            labels.insert("detections".to_owned(), Label::Detections(detections));
        }

        if !self.polygons.is_empty() || !self.polylines.is_empty() {
            let open = self
                .polylines
                .iter()
                .map(|p| p.to_polyline(frame_size, false));
            let polylines = self
                .polygons
                .iter()
                .map(|p| p.to_polyline(frame_size, true))
                .chain(open)
                .collect();
            labels.insert("polylines".to_owned(), Label::Polylines(polylines));
        }

        if !self.points.is_empty() {
            let keypoints = self
                .points
                .iter()
                .map(|p| p.to_keypoint(frame_size))
                .collect();
            labels.insert("keypoints".to_owned(), Label::Keypoints(keypoints));
        }

        labels
    }

    /// Builds an unnamed record from the labels of one image.
    ///
    /// Closed polylines become polygons. Classifications and scalars have no
    /// image representation and are skipped with a warning.
    pub fn from_labels<'a>(
        labels: impl IntoIterator<Item = &'a Label>,
        frame_size: (u32, u32),
    ) -> Self {
        let mut record = ImageRecord {
            width: frame_size.0,
            height: frame_size.1,
            ..Default::default()
        };

        for label in labels {
            if matches!(label, Label::Scalar(serde_json::Value::Null)) {
                continue;
            }

            let label_type = label.label_type();
            if label_type.is_classification() || label_type.is_scalar() {
                log::warn!("Ignoring unsupported label type '{}'", label_type);
                continue;
            }

            for instance in label.instances() {
                match instance {
                    LabelInstance::Detection(d) => {
                        record.boxes.push(ImageBox::from_detection(&d, frame_size))
                    }
                    LabelInstance::Polyline(p) if p.closed => record
                        .polygons
                        .extend(ImageShape::from_polyline(&p, frame_size)),
                    LabelInstance::Polyline(p) => record
                        .polylines
                        .extend(ImageShape::from_polyline(&p, frame_size)),
                    LabelInstance::Keypoint(k) => record
                        .points
                        .push(ImageShape::from_keypoint(&k, frame_size)),
                    LabelInstance::Classification(_) => {}
                }
            }
        }

        record
    }
}

/// Per-frame state CVAT keeps for every shape of a track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackFlags {
    pub outside: Option<bool>,
    pub occluded: Option<bool>,
    pub keyframe: Option<bool>,
}

impl TrackFlags {
    fn from_bag(bag: &crate::dataset::AttributeBag) -> Self {
        TrackFlags {
            outside: flag_from_bag(bag, "outside"),
            occluded: flag_from_bag(bag, "occluded"),
            keyframe: flag_from_bag(bag, "keyframe"),
        }
    }

    fn as_pairs(&self) -> Vec<(&'static str, Option<bool>)> {
        vec![
            ("outside", self.outside),
            ("occluded", self.occluded),
            ("keyframe", self.keyframe),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoBox {
    pub frame: u64,
    pub pixels: PixelBox,
    pub flags: TrackFlags,
    pub attributes: Vec<Attribute>,
}

/// Polygon, polyline or point set on one frame of a track.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoShape {
    pub frame: u64,
    pub points: Vec<Point>,
    pub flags: TrackFlags,
    pub attributes: Vec<Attribute>,
}

/// Keeps the first point list of a polyline, which is all a track shape can
/// hold.
fn single_shape_points(polyline: &Polyline) -> Vec<Point> {
    if polyline.points.len() > 1 {
        log::warn!(
            "Found polyline with {} shapes; only the first shape will be stored in CVAT format",
            polyline.points.len()
        );
    }
    polyline.points.first().cloned().unwrap_or_default()
}

/// One object followed across the frames of a video.
///
/// A track is homogeneous: only one of the shape maps is populated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Track {
    pub id: u64,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub boxes: BTreeMap<u64, VideoBox>,
    pub polygons: BTreeMap<u64, VideoShape>,
    pub polylines: BTreeMap<u64, VideoShape>,
    pub points: BTreeMap<u64, VideoShape>,
}

impl Track {
    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Kind of label held by the track, `None` when it has no shapes.
    pub fn kind(&self) -> Option<LabelType> {
        if !self.boxes.is_empty() {
            Some(LabelType::Detections)
        } else if !self.polygons.is_empty() || !self.polylines.is_empty() {
            Some(LabelType::Polylines)
        } else if !self.points.is_empty() {
            Some(LabelType::Keypoints)
        } else {
            None
        }
    }

    pub fn annotations(&self) -> impl Iterator<Item = AnnotationView<'_>> {
        let label = self.label.as_str();
        let boxes = self.boxes.values().map(move |b| AnnotationView {
            label,
            flags: b.flags.as_pairs(),
            attributes: &b.attributes,
        });
        let shapes = self
            .polygons
            .values()
            .chain(self.polylines.values())
            .chain(self.points.values())
            .map(move |s| AnnotationView {
                label,
                flags: s.flags.as_pairs(),
                attributes: &s.attributes,
            });
        boxes.chain(shapes)
    }

    /// One label instance per frame, each with `index` set to the track id.
    pub fn to_labels(&self) -> BTreeMap<u64, LabelInstance> {
        let frame_size = self.frame_size();
        let mut labels = BTreeMap::new();

        for (frame, b) in &self.boxes {
            let detection = Detection {
                index: Some(self.id),
                attributes: bag_from_attributes(&b.attributes, &b.flags.as_pairs()),
                ..Detection::new(self.label.clone(), b.pixels.to_relative(frame_size))
            };
            labels.insert(*frame, detection.into());
        }

        for (polygon, shapes) in [(true, &self.polygons), (false, &self.polylines)] {
            for (frame, s) in shapes {
                let points = vec![to_relative(&s.points, frame_size)];
                let polyline = Polyline {
                    closed: polygon,
                    filled: polygon,
                    index: Some(self.id),
                    attributes: bag_from_attributes(&s.attributes, &s.flags.as_pairs()),
                    ..Polyline::new(self.label.clone(), points)
                };
                labels.insert(*frame, polyline.into());
            }
        }

        for (frame, s) in &self.points {
            let keypoint = Keypoint {
                index: Some(self.id),
                attributes: bag_from_attributes(&s.attributes, &s.flags.as_pairs()),
                ..Keypoint::new(self.label.clone(), to_relative(&s.points, frame_size))
            };
            labels.insert(*frame, keypoint.into());
        }

        labels
    }

    /// Builds a track from the per-frame instances of one object.
    ///
    /// The kind of the first instance decides the kind of the track; other
    /// kinds are skipped with a warning. Filled polylines become polygons and
    /// closed open polylines repeat their first point.
    pub fn from_labels(
        id: u64,
        labels: &BTreeMap<u64, LabelInstance>,
        frame_size: (u32, u32),
    ) -> Self {
        let mut track = Track {
            id,
            width: frame_size.0,
            height: frame_size.1,
            ..Default::default()
        };

        let mut kind = None;
        for (frame, instance) in labels {
            if matches!(instance, LabelInstance::Classification(_)) {
                log::warn!("Ignoring unsupported label type '{}'", instance.kind());
                continue;
            }

            let instance_kind = *kind.get_or_insert(instance.kind());
            if instance_kind != instance.kind() {
                log::warn!(
                    "Track {} holds {}; ignoring {} on frame {}",
                    id,
                    instance_kind,
                    instance.kind(),
                    frame
                );
                continue;
            }

            if track.label.is_empty() {
                track.label = instance.label().to_owned();
            }

            let flags = TrackFlags::from_bag(instance.attributes());
            let attributes = attributes_from_bag(instance.attributes(), &SHAPE_FLAGS);
            match instance {
                LabelInstance::Detection(d) => {
                    track.boxes.insert(
                        *frame,
                        VideoBox {
                            frame: *frame,
                            pixels: PixelBox::from_relative(&d.bounding_box, frame_size),
                            flags,
                            attributes,
                        },
                    );
                }
                LabelInstance::Polyline(p) => {
                    let mut points = to_absolute(&single_shape_points(p), frame_size);
                    let shape = |points| VideoShape {
                        frame: *frame,
                        points,
                        flags,
                        attributes,
                    };
                    if p.filled {
                        track.polygons.insert(*frame, shape(points));
                    } else {
                        if p.closed {
                            close_ring(&mut points);
                        }
                        track.polylines.insert(*frame, shape(points));
                    }
                }
                LabelInstance::Keypoint(k) => {
                    track.points.insert(
                        *frame,
                        VideoShape {
                            frame: *frame,
                            points: to_absolute(&k.points, frame_size),
                            flags,
                            attributes,
                        },
                    );
                }
                LabelInstance::Classification(_) => {}
            }
        }

        track
    }
}
