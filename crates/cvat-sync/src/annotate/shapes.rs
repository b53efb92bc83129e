// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Conversion between labels and the tags and shapes of the REST API.

use super::session::{ATTRIBUTE_PREFIX, LABEL_ID_ATTRIBUTE, LabelFieldSchema};
use crate::{
    Error,
    api::{
        AnnotationPayload, RemoteAttribute, RemoteShape, RemoteTag, ShapeType, SpecRef, TaskInfo,
    },
    cvat::{
        AttributeValue,
        attributes::flag_from_bag,
        geometry::{PixelBox, flatten, pairs, to_absolute, to_relative},
    },
    dataset::{
        BoundingBox, Classification, Detection, Keypoint, Label, LabelInstance, LabelType,
        Polyline, new_label_id,
    },
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Text sent to the server for a scalar or attribute value; `None` for
/// nulls and values of unsupported types.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    AttributeValue::from_json(value).map(|value| value.to_string())
}

/// Builds the tags and shapes of one label field.
pub(crate) struct ShapeEncoder<'a> {
    field: &'a str,
    schema: &'a LabelFieldSchema,
    attribute_names: Vec<String>,
    classes: BTreeSet<&'a str>,
}

impl<'a> ShapeEncoder<'a> {
    /// `field` is the name of the field without any `frames.` prefix.
    pub fn new(field: &'a str, schema: &'a LabelFieldSchema) -> Self {
        let attribute_names = schema
            .remote_attributes()
            .into_iter()
            .map(|spec| spec.name)
            .filter(|name| name != LABEL_ID_ATTRIBUTE)
            .collect();

        ShapeEncoder {
            field,
            schema,
            attribute_names,
            classes: schema.classes.iter().map(String::as_str).collect(),
        }
    }

    /// Appends the annotations of `label` on remote `frame` to `payload`.
    pub fn encode(
        &self,
        label: &Label,
        frame: u64,
        frame_size: (u32, u32),
        payload: &mut AnnotationPayload,
    ) {
        if let Label::Scalar(value) = label {
            if let Some(tag) = self.scalar_tag(value, frame) {
                payload.tags.push(tag);
            }
            return;
        }

        for instance in label.instances() {
            if !self.classes.contains(instance.label()) {
                log::debug!(
                    "Skipping '{}' label in field '{}': class is not declared",
                    instance.label(),
                    self.field
                );
                continue;
            }

            let attributes = self.attributes(&instance);
            let label_id = SpecRef::from(instance.label());
            let shape = |shape_type: ShapeType, points: Vec<f64>| RemoteShape {
                id: None,
                shape_type,
                occluded: flag_from_bag(instance.attributes(), "occluded").unwrap_or(false),
                z_order: 0,
                points,
                label_id: label_id.clone(),
                frame,
                group: Some(0),
                source: "manual".to_owned(),
                attributes: attributes.clone(),
            };

            match &instance {
                LabelInstance::Classification(_) => payload.tags.push(RemoteTag {
                    id: None,
                    label_id: label_id.clone(),
                    frame,
                    group: Some(0),
                    source: "manual".to_owned(),
                    attributes: attributes.clone(),
                }),
                LabelInstance::Detection(d) => {
                    let pixels = PixelBox::from_relative(&d.bounding_box, frame_size);
                    payload
                        .shapes
                        .push(shape(ShapeType::Rectangle, pixels.to_points()));
                }
                LabelInstance::Polyline(p) => {
                    let Some(points) = p.points.first() else {
                        log::warn!("Skipping polyline '{}' without points", p.id);
                        continue;
                    };
                    if p.points.len() > 1 {
                        log::warn!(
                            "Polyline '{}' has {} shapes; only the first is uploaded",
                            p.id,
                            p.points.len()
                        );
                    }
                    let shape_type = if p.closed {
                        ShapeType::Polygon
                    } else {
                        ShapeType::Polyline
                    };
                    let points = flatten(&to_absolute(points, frame_size));
                    payload.shapes.push(shape(shape_type, points));
                }
                LabelInstance::Keypoint(k) => {
                    let points = flatten(&to_absolute(&k.points, frame_size));
                    payload.shapes.push(shape(ShapeType::Points, points));
                }
            }
        }
    }

    fn scalar_tag(&self, value: &Value, frame: u64) -> Option<RemoteTag> {
        let text = value_text(value)?;

        let (class, attributes) = if self.schema.assigns_scalar_attrs() {
            let spec_id = self.attribute_names.first()?;
            let attribute = RemoteAttribute {
                spec_id: SpecRef::from(spec_id.as_str()),
                value: text,
            };
            (self.field.to_owned(), vec![attribute])
        } else if self.classes.contains(text.as_str()) {
            (text, vec![])
        } else {
            log::debug!(
                "Skipping value '{}' of field '{}': class is not declared",
                text,
                self.field
            );
            return None;
        };

        Some(RemoteTag {
            id: None,
            label_id: SpecRef::Name(class),
            frame,
            group: Some(0),
            source: "manual".to_owned(),
            attributes,
        })
    }

    /// Declared attributes found on the instance, then its `label_id`.
    fn attributes(&self, instance: &LabelInstance) -> Vec<RemoteAttribute> {
        let bag = instance.attributes();
        let mut attributes: Vec<RemoteAttribute> = self
            .attribute_names
            .iter()
            .filter_map(|name| {
                let key = name.strip_prefix(ATTRIBUTE_PREFIX).unwrap_or(name);
                let value = value_text(bag.get(key)?)?;
                Some(RemoteAttribute {
                    spec_id: SpecRef::from(name.as_str()),
                    value,
                })
            })
            .collect();

        if self.schema.existing_field {
            attributes.push(RemoteAttribute {
                spec_id: SpecRef::from(LABEL_ID_ATTRIBUTE),
                value: instance.id().to_owned(),
            });
        }
        attributes
    }
}

fn remap_label(label_id: &mut SpecRef, classes: &BTreeMap<String, u64>) -> Result<u64, Error> {
    let id = match label_id {
        SpecRef::Id(id) => return Ok(*id),
        SpecRef::Name(name) => *classes
            .get(name.as_str())
            .ok_or_else(|| Error::MissingLabel(name.clone()))?,
    };
    *label_id = SpecRef::Id(id);
    Ok(id)
}

fn remap_attributes(
    attributes: &mut [RemoteAttribute],
    class_id: u64,
    attribute_ids: &BTreeMap<u64, BTreeMap<String, u64>>,
) -> Result<(), Error> {
    for attribute in attributes {
        let SpecRef::Name(name) = &attribute.spec_id else {
            continue;
        };
        let id = *attribute_ids
            .get(&class_id)
            .and_then(|ids| ids.get(name.as_str()))
            .ok_or_else(|| Error::MissingAttribute(format!("{} of label {}", name, class_id)))?;
        attribute.spec_id = SpecRef::Id(id);
    }
    Ok(())
}

/// Rewrites class and attribute names in `payload` into the numeric ids of
/// `task`.
pub fn remap_ids(payload: &mut AnnotationPayload, task: &TaskInfo) -> Result<(), Error> {
    let classes = task.class_id_map();
    let attribute_ids = task.attribute_id_map();

    for tag in &mut payload.tags {
        let class_id = remap_label(&mut tag.label_id, &classes)?;
        remap_attributes(&mut tag.attributes, class_id, &attribute_ids)?;
    }

    for shape in &mut payload.shapes {
        let class_id = remap_label(&mut shape.label_id, &classes)?;
        remap_attributes(&mut shape.attributes, class_id, &attribute_ids)?;
    }

    for track in &mut payload.tracks {
        let class_id = remap_label(&mut track.label_id, &classes)?;
        remap_attributes(&mut track.attributes, class_id, &attribute_ids)?;
        for shape in &mut track.shapes {
            remap_attributes(&mut shape.attributes, class_id, &attribute_ids)?;
        }
    }

    Ok(())
}

/// Reverse id maps of one task, used to decode its annotations.
pub(crate) struct ShapeDecoder {
    class_names: BTreeMap<u64, String>,
    attribute_names: BTreeMap<u64, String>,
    classes: BTreeSet<String>,
}

impl ShapeDecoder {
    /// Classes outside `declared` are ignored. An empty `declared` accepts
    /// every label of the task.
    pub fn new(task: &TaskInfo, declared: &[String]) -> Self {
        let class_names = task
            .labels
            .iter()
            .map(|label| (label.id, label.name.clone()))
            .collect();
        let attribute_names = task
            .labels
            .iter()
            .flat_map(|label| &label.attributes)
            .map(|attr| (attr.id, attr.name.clone()))
            .collect();
        let classes = if declared.is_empty() {
            task.label_names().into_iter().collect()
        } else {
            declared.iter().cloned().collect()
        };

        ShapeDecoder {
            class_names,
            attribute_names,
            classes,
        }
    }

    /// Name of a declared class, or `None` for classes to ignore.
    pub fn class<'s>(&'s self, label_id: &'s SpecRef) -> Option<&'s str> {
        let name = match label_id {
            SpecRef::Id(id) => self.class_names.get(id)?.as_str(),
            SpecRef::Name(name) => name.as_str(),
        };
        if self.classes.contains(name) {
            Some(name)
        } else {
            log::debug!("Ignoring annotation of undeclared class '{}'", name);
            None
        }
    }

    fn attribute_name<'s>(&'s self, spec_id: &'s SpecRef) -> Option<&'s str> {
        match spec_id {
            SpecRef::Id(id) => self.attribute_names.get(id).map(String::as_str),
            SpecRef::Name(name) => Some(name.as_str()),
        }
    }

    /// Values of the attributes by name. Empty and `None` values are absent.
    pub fn attribute_values(&self, attributes: &[RemoteAttribute]) -> BTreeMap<String, String> {
        attributes
            .iter()
            .filter(|attr| !attr.value.is_empty() && attr.value != "None")
            .filter_map(|attr| {
                let name = self.attribute_name(&attr.spec_id)?;
                Some((name.to_owned(), attr.value.clone()))
            })
            .collect()
    }

    /// Sets the id and attribute bag of a decoded instance.
    ///
    /// A `label_id` attribute restores the identity of the local label the
    /// annotation was created from.
    fn apply_attributes(&self, instance: &mut LabelInstance, attributes: &[RemoteAttribute]) {
        let mut id = None;
        for (name, value) in self.attribute_values(attributes) {
            if name == LABEL_ID_ATTRIBUTE {
                id = Some(value);
                continue;
            }
            let key = name
                .strip_prefix(ATTRIBUTE_PREFIX)
                .map(str::to_owned)
                .unwrap_or(name);
            instance
                .attributes_mut()
                .insert(key, AttributeValue::parse(&value).to_json());
        }
        instance.set_id(id.unwrap_or_else(new_label_id));
    }

    pub fn decode_tag(&self, tag: &RemoteTag) -> Option<LabelInstance> {
        let class = self.class(&tag.label_id)?;
        let mut instance = LabelInstance::from(Classification::new(class));
        self.apply_attributes(&mut instance, &tag.attributes);
        Some(instance)
    }

    /// Decodes a shape of a field of type `field_type`.
    ///
    /// Returns the instance with the kind the shape belongs to, which for a
    /// polygon demoted to a detection is still [`LabelType::Polylines`].
    pub fn decode_shape(
        &self,
        shape_type: &ShapeType,
        label_id: &SpecRef,
        points: &[f64],
        attributes: &[RemoteAttribute],
        frame_size: (u32, u32),
        field_type: LabelType,
    ) -> Option<(LabelType, LabelInstance)> {
        let class = self.class(label_id)?;
        let relative = to_relative(&pairs(points), frame_size);

        let (kind, mut instance) = match shape_type {
            ShapeType::Rectangle => {
                let pixels = PixelBox::from_points(points)?;
                let detection = Detection::new(class, pixels.to_relative(frame_size));
                (LabelType::Detections, LabelInstance::from(detection))
            }
            ShapeType::Polygon if field_type.is_detection() => {
                let bounding_box = BoundingBox::enclosing(&relative)?;
                let detection = Detection::new(class, bounding_box);
                (LabelType::Polylines, LabelInstance::from(detection))
            }
            ShapeType::Polygon => (
                LabelType::Polylines,
                LabelInstance::from(Polyline::polygon(class, relative)),
            ),
            ShapeType::Polyline => (
                LabelType::Polylines,
                LabelInstance::from(Polyline::new(class, vec![relative])),
            ),
            ShapeType::Points => (
                LabelType::Keypoints,
                LabelInstance::from(Keypoint::new(class, relative)),
            ),
            ShapeType::Other(other) => {
                log::warn!("Ignoring unsupported shape type '{}'", other);
                return None;
            }
        };

        self.apply_attributes(&mut instance, attributes);
        Some((kind, instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotate::session::AttributeSpec,
        api::{TaskAttribute, TaskId, TaskLabel},
    };
    use serde_json::json;

    fn task() -> TaskInfo {
        TaskInfo {
            id: TaskId::from(1),
            name: "task".into(),
            labels: vec![
                TaskLabel {
                    id: 10,
                    name: "car".into(),
                    attributes: vec![
                        TaskAttribute {
                            id: 100,
                            name: "color".into(),
                        },
                        TaskAttribute {
                            id: 101,
                            name: "label_id".into(),
                        },
                    ],
                },
                TaskLabel {
                    id: 11,
                    name: "bus".into(),
                    attributes: vec![TaskAttribute {
                        id: 102,
                        name: "label_id".into(),
                    }],
                },
            ],
            data_original_chunk_type: None,
        }
    }

    #[test]
    fn test_encode_existing_detections() {
        let schema = LabelFieldSchema::new(LabelType::Detections, vec!["car".into()])
            .with_attributes(vec![AttributeSpec::text("color")])
            .existing();
        let encoder = ShapeEncoder::new("gt", &schema);

        let mut car = Detection::new("car", BoundingBox::new(0.1, 0.2, 0.5, 0.4));
        car.attributes.insert("color".into(), json!("red"));
        let bus = Detection::new("bus", BoundingBox::new(0.0, 0.0, 1.0, 1.0));

        let mut payload = AnnotationPayload::default();
        encoder.encode(
            &Label::Detections(vec![car.clone(), bus]),
            3,
            (200, 100),
            &mut payload,
        );

        assert_eq!(payload.counts(), (0, 1, 0));
        let shape = &payload.shapes[0];
        assert_eq!(shape.shape_type, ShapeType::Rectangle);
        assert_eq!(shape.points, vec![20.0, 20.0, 120.0, 60.0]);
        assert_eq!(shape.frame, 3);
        assert_eq!(shape.label_id, SpecRef::from("car"));
        assert_eq!(
            shape.attributes,
            vec![
                RemoteAttribute {
                    spec_id: SpecRef::from("color"),
                    value: "red".into()
                },
                RemoteAttribute {
                    spec_id: SpecRef::from("label_id"),
                    value: car.id.clone()
                },
            ]
        );
    }

    #[test]
    fn test_encode_polylines_keeps_first_shape() {
        let schema = LabelFieldSchema::new(LabelType::Polylines, vec!["lane".into()]);
        let encoder = ShapeEncoder::new("lanes", &schema);

        let closed = Polyline {
            closed: true,
            ..Polyline::new(
                "lane",
                vec![vec![(0.0, 0.0), (0.5, 0.5)], vec![(1.0, 1.0), (0.5, 0.5)]],
            )
        };
        let open = Polyline::new("lane", vec![vec![(0.25, 0.5), (0.75, 0.5)]]);

        let mut payload = AnnotationPayload::default();
        encoder.encode(
            &Label::Polylines(vec![closed, open]),
            0,
            (10, 10),
            &mut payload,
        );

        assert_eq!(payload.shapes[0].shape_type, ShapeType::Polygon);
        assert_eq!(payload.shapes[0].points, vec![0.0, 0.0, 5.0, 5.0]);
        assert_eq!(payload.shapes[1].shape_type, ShapeType::Polyline);
        assert_eq!(payload.shapes[1].points, vec![3.0, 5.0, 8.0, 5.0]);
        assert!(payload.shapes[1].attributes.is_empty());
    }

    #[test]
    fn test_encode_scalars() {
        let mut payload = AnnotationPayload::default();

        let free = LabelFieldSchema::new(LabelType::Scalar, vec![]);
        ShapeEncoder::new("animal", &free).encode(
            &Label::Scalar(json!("cat")),
            0,
            (1, 1),
            &mut payload,
        );
        ShapeEncoder::new("animal", &free).encode(
            &Label::Scalar(Value::Null),
            1,
            (1, 1),
            &mut payload,
        );

        let classed = LabelFieldSchema::new(LabelType::Scalar, vec!["sunny".into()]);
        let encoder = ShapeEncoder::new("weather", &classed);
        encoder.encode(&Label::Scalar(json!("sunny")), 2, (1, 1), &mut payload);
        encoder.encode(&Label::Scalar(json!("foggy")), 3, (1, 1), &mut payload);

        assert_eq!(payload.tags.len(), 2);
        assert_eq!(payload.tags[0].label_id, SpecRef::from("animal"));
        assert_eq!(
            payload.tags[0].attributes,
            vec![RemoteAttribute {
                spec_id: SpecRef::from("value"),
                value: "cat".into()
            }]
        );
        assert_eq!(payload.tags[1].label_id, SpecRef::from("sunny"));
        assert!(payload.tags[1].attributes.is_empty());
    }

    #[test]
    fn test_remap_ids() {
        let mut payload = AnnotationPayload::default();
        let schema = LabelFieldSchema::new(LabelType::Detections, vec!["car".into(), "bus".into()])
            .with_attributes(vec![AttributeSpec::text("color")])
            .existing();
        let mut car = Detection::new("car", BoundingBox::new(0.0, 0.0, 0.5, 0.5));
        car.attributes.insert("color".into(), json!("red"));
        ShapeEncoder::new("gt", &schema).encode(
            &Label::Detections(vec![car]),
            0,
            (10, 10),
            &mut payload,
        );

        remap_ids(&mut payload, &task()).unwrap();
        let shape = &payload.shapes[0];
        assert_eq!(shape.label_id, SpecRef::Id(10));
        let ids: Vec<Option<u64>> = shape.attributes.iter().map(|a| a.spec_id.id()).collect();
        assert_eq!(ids, vec![Some(100), Some(101)]);

        let mut unknown = AnnotationPayload {
            tags: vec![RemoteTag {
                id: None,
                label_id: SpecRef::from("truck"),
                frame: 0,
                group: None,
                source: "manual".into(),
                attributes: vec![],
            }],
            ..Default::default()
        };
        assert!(matches!(
            remap_ids(&mut unknown, &task()),
            Err(Error::MissingLabel(name)) if name == "truck"
        ));

        let mut bad_attribute = AnnotationPayload {
            tags: vec![RemoteTag {
                id: None,
                label_id: SpecRef::from("bus"),
                frame: 0,
                group: None,
                source: "manual".into(),
                attributes: vec![RemoteAttribute {
                    spec_id: SpecRef::from("color"),
                    value: "red".into(),
                }],
            }],
            ..Default::default()
        };
        assert!(matches!(
            remap_ids(&mut bad_attribute, &task()),
            Err(Error::MissingAttribute(_))
        ));
    }

    #[test]
    fn test_decode_shapes() {
        let decoder = ShapeDecoder::new(&task(), &["car".to_string()]);
        let attributes = vec![
            RemoteAttribute {
                spec_id: SpecRef::Id(100),
                value: "7".into(),
            },
            RemoteAttribute {
                spec_id: SpecRef::Id(101),
                value: "local-id".into(),
            },
        ];

        let (kind, instance) = decoder
            .decode_shape(
                &ShapeType::Rectangle,
                &SpecRef::Id(10),
                &[20.0, 20.0, 120.0, 60.0],
                &attributes,
                (200, 100),
                LabelType::Detections,
            )
            .unwrap();
        assert_eq!(kind, LabelType::Detections);
        assert_eq!(instance.id(), "local-id");
        assert_eq!(instance.attributes()["color"], json!(7));
        match instance {
            LabelInstance::Detection(d) => {
                assert_eq!(d.bounding_box, BoundingBox::new(0.1, 0.2, 0.5, 0.4))
            }
            other => panic!("unexpected {:?}", other),
        }

        // Polygons become detections on detection fields but keep their kind.
        let (kind, instance) = decoder
            .decode_shape(
                &ShapeType::Polygon,
                &SpecRef::Id(10),
                &[0.0, 0.0, 10.0, 0.0, 10.0, 5.0],
                &[],
                (10, 10),
                LabelType::Detections,
            )
            .unwrap();
        assert_eq!(kind, LabelType::Polylines);
        assert!(matches!(instance, LabelInstance::Detection(_)));

        // Undeclared classes and unsupported shapes are ignored.
        assert!(
            decoder
                .decode_shape(
                    &ShapeType::Rectangle,
                    &SpecRef::Id(11),
                    &[0.0, 0.0, 1.0, 1.0],
                    &[],
                    (10, 10),
                    LabelType::Detections,
                )
                .is_none()
        );
        assert!(
            decoder
                .decode_shape(
                    &ShapeType::Other("ellipse".into()),
                    &SpecRef::Id(10),
                    &[0.0, 0.0, 1.0, 1.0],
                    &[],
                    (10, 10),
                    LabelType::Detections,
                )
                .is_none()
        );
    }

    #[test]
    fn test_decode_tag_drops_empty_attributes() {
        let decoder = ShapeDecoder::new(&task(), &[]);
        let tag = RemoteTag {
            id: Some(1),
            label_id: SpecRef::Id(11),
            frame: 0,
            group: None,
            source: "manual".into(),
            attributes: vec![
                RemoteAttribute {
                    spec_id: SpecRef::from("attribute:weather"),
                    value: "rain".into(),
                },
                RemoteAttribute {
                    spec_id: SpecRef::Id(102),
                    value: "".into(),
                },
                RemoteAttribute {
                    spec_id: SpecRef::from("blank"),
                    value: "None".into(),
                },
            ],
        };

        let instance = decoder.decode_tag(&tag).unwrap();
        assert_eq!(instance.label(), "bus");
        assert_eq!(instance.attributes().len(), 1);
        assert_eq!(instance.attributes()["weather"], json!("rain"));
        assert!(uuid::Uuid::parse_str(instance.id()).is_ok());
    }
}
