// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Task label schemas: the labels of a CVAT task and their attributes.

use super::{
    attributes::{AttributeKind, AttributeValue},
    records::{AnnotationView, ImageRecord, Track},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute of a task label. Non-empty categories are the closed value set
/// of a choice attribute.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelEntry {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeSchema>,
}

type SchemaMap = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Normalized set of task labels.
///
/// Labels are sorted by name, attributes by name within each label and
/// categories within each attribute. Duplicates are merged.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(from = "Vec<LabelEntry>", into = "Vec<LabelEntry>")]
pub struct TaskLabels {
    labels: Vec<LabelEntry>,
}

impl TaskLabels {
    /// Normalizes a declared list of labels.
    pub fn from_labels(labels: Vec<LabelEntry>) -> Self {
        let mut map = SchemaMap::new();
        for label in labels {
            let attributes = map.entry(label.name).or_default();
            for attribute in label.attributes {
                attributes
                    .entry(attribute.name)
                    .or_default()
                    .extend(attribute.categories);
            }
        }
        Self::from_map(map)
    }

    /// Observed schema of image records; `occluded` is folded in as a boolean
    /// attribute wherever it is set.
    pub fn from_image_records(records: &[ImageRecord]) -> Self {
        Self::from_annotations(records.iter().flat_map(|r| r.annotations()))
    }

    /// Observed schema of tracks; `outside`, `occluded` and `keyframe` are
    /// folded in as boolean attributes wherever they are set.
    pub fn from_tracks(tracks: &[Track]) -> Self {
        Self::from_annotations(tracks.iter().flat_map(|t| t.annotations()))
    }

    fn from_annotations<'a>(annotations: impl Iterator<Item = AnnotationView<'a>>) -> Self {
        let mut map = SchemaMap::new();
        for annotation in annotations {
            let attributes = map.entry(annotation.label.to_owned()).or_default();

            for (name, flag) in &annotation.flags {
                if flag.is_some() {
                    attributes
                        .entry((*name).to_owned())
                        .or_default()
                        .extend(["false".to_owned(), "true".to_owned()]);
                }
            }

            for attribute in annotation.attributes {
                let categories = attributes.entry(attribute.name.clone()).or_default();
                match attribute.value.kind() {
                    AttributeKind::Boolean => {
                        categories.extend(["false".to_owned(), "true".to_owned()])
                    }
                    AttributeKind::Categorical => {
                        if let AttributeValue::Text(text) = &attribute.value {
                            categories.insert(text.clone());
                        }
                    }
                    AttributeKind::Numeric | AttributeKind::Null => {}
                }
            }
        }
        Self::from_map(map)
    }

    fn from_map(map: SchemaMap) -> Self {
        let labels = map
            .into_iter()
            .map(|(name, attributes)| LabelEntry {
                name,
                attributes: attributes
                    .into_iter()
                    .map(|(name, categories)| AttributeSchema {
                        name,
                        categories: categories.into_iter().collect(),
                    })
                    .collect(),
            })
            .collect();
        TaskLabels { labels }
    }

    fn to_map(&self) -> SchemaMap {
        self.labels
            .iter()
            .map(|label| {
                let attributes = label
                    .attributes
                    .iter()
                    .map(|a| (a.name.clone(), a.categories.iter().cloned().collect()))
                    .collect();
                (label.name.clone(), attributes)
            })
            .collect()
    }

    /// Monotonic union: labels, attributes and categories are only added.
    pub fn merge(&mut self, other: &TaskLabels) {
        let mut map = self.to_map();
        for (label, attributes) in other.to_map() {
            let merged = map.entry(label).or_default();
            for (name, categories) in attributes {
                merged.entry(name).or_default().extend(categories);
            }
        }
        *self = Self::from_map(map);
    }

    pub fn labels(&self) -> &[LabelEntry] {
        &self.labels
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<Vec<LabelEntry>> for TaskLabels {
    fn from(labels: Vec<LabelEntry>) -> Self {
        TaskLabels::from_labels(labels)
    }
}

impl From<TaskLabels> for Vec<LabelEntry> {
    fn from(task_labels: TaskLabels) -> Self {
        task_labels.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvat::{
        attributes::Attribute,
        geometry::PixelBox,
        records::{ImageBox, ImageShape},
    };

    fn entry(name: &str, attributes: &[(&str, &[&str])]) -> LabelEntry {
        LabelEntry {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(n, c)| AttributeSchema {
                    name: n.to_string(),
                    categories: c.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_from_labels_normalizes() {
        let labels = TaskLabels::from_labels(vec![
            entry("truck", &[("color", &["red", "blue"])]),
            entry("car", &[("type", &["sedan"]), ("color", &[])]),
            entry("truck", &[("color", &["green"])]),
        ]);

        assert_eq!(labels.label_names(), vec!["car", "truck"]);
        assert_eq!(labels.labels()[0].attributes[0].name, "color");
        assert_eq!(
            labels.labels()[1].attributes[0].categories,
            vec!["blue", "green", "red"]
        );
    }

    #[test]
    fn test_merge_is_idempotent_and_associative() {
        let a = TaskLabels::from_labels(vec![entry("car", &[("type", &["sedan"])])]);
        let b = TaskLabels::from_labels(vec![entry("car", &[("type", &["coupe"])])]);
        let c = TaskLabels::from_labels(vec![entry("bus", &[])]);

        let mut aa = a.clone();
        aa.merge(&a);
        assert_eq!(aa, a);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        assert_eq!(left, right);
        assert_eq!(left.label_names(), vec!["bus", "car"]);
    }

    #[test]
    fn test_from_image_records_infers_attributes() {
        let record = ImageRecord {
            boxes: vec![ImageBox {
                label: "car".to_string(),
                pixels: PixelBox::new(0.0, 0.0, 1.0, 1.0),
                occluded: Some(true),
                attributes: vec![
                    Attribute::new("type", AttributeValue::Text("sedan".to_string())),
                    Attribute::new("speed", AttributeValue::Real(3.5)),
                ],
            }],
            points: vec![ImageShape {
                label: "wheel".to_string(),
                points: vec![(1.0, 1.0)],
                occluded: None,
                attributes: vec![],
            }],
            ..Default::default()
        };

        let labels = TaskLabels::from_image_records(&[record]);
        assert_eq!(labels.label_names(), vec!["car", "wheel"]);
        let car = &labels.labels()[0];
        let names: Vec<&str> = car.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["occluded", "speed", "type"]);
        assert_eq!(car.attributes[0].categories, vec!["false", "true"]);
        assert!(car.attributes[1].categories.is_empty());
        assert_eq!(car.attributes[2].categories, vec!["sedan"]);
        assert!(labels.labels()[1].attributes.is_empty());
    }

    #[test]
    fn test_serde_normalizes() {
        let labels: TaskLabels = serde_json::from_str(
            r#"[{"name": "b"}, {"name": "a", "attributes": [{"name": "x", "categories": ["2", "1"]}]}]"#,
        )
        .unwrap();
        assert_eq!(labels.label_names(), vec!["a", "b"]);
        assert_eq!(labels.labels()[0].attributes[0].categories, vec!["1", "2"]);
    }
}
