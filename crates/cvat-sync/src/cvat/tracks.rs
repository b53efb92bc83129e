// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Aggregation of per-frame labels into tracks and expansion back.

use super::records::Track;
use crate::dataset::{Label, LabelInstance};
use serde_json::Value;
use std::collections::BTreeMap;

/// Labels of one frame keyed by field name.
pub type FrameLabels = BTreeMap<String, Label>;

/// Groups the labels of a video into tracks.
///
/// Labels sharing an `index` form one track keyed by that index. Every label
/// without an index becomes a single-frame track numbered after the largest
/// index in use, in frame order. Returns `None` when no frame holds a
/// detection, polyline or keypoint field, so callers can skip the video.
pub fn frames_to_tracks(
    frames: &BTreeMap<u64, FrameLabels>,
    frame_size: (u32, u32),
) -> Option<Vec<Track>> {
    let mut indexed: BTreeMap<u64, BTreeMap<u64, LabelInstance>> = BTreeMap::new();
    let mut unindexed: Vec<(u64, LabelInstance)> = vec![];
    let mut found_label = false;

    for (frame_number, fields) in frames {
        for label in fields.values() {
            if !label.label_type().is_shape() {
                if !matches!(label, Label::Scalar(Value::Null)) {
                    log::warn!("Ignoring unsupported label type '{}'", label.label_type());
                }
                continue;
            }

            found_label = true;
            for instance in label.instances() {
                match instance.index() {
                    Some(index) => {
                        indexed
                            .entry(index)
                            .or_default()
                            .insert(*frame_number, instance);
                    }
                    None => unindexed.push((*frame_number, instance)),
                }
            }
        }
    }

    if !found_label {
        return None;
    }

    let mut tracks: Vec<Track> = indexed
        .iter()
        .map(|(id, labels)| Track::from_labels(*id, labels, frame_size))
        .collect();

    let mut next_index = indexed.keys().next_back().map_or(0, |max| max + 1);
    for (frame_number, instance) in unindexed {
        let labels = BTreeMap::from([(frame_number, instance)]);
        tracks.push(Track::from_labels(next_index, &labels, frame_size));
        next_index += 1;
    }

    Some(tracks)
}

/// Appends an instance to the list field of its kind: `detections`,
/// `polylines` or `keypoints`.
pub fn append_instance(fields: &mut FrameLabels, instance: LabelInstance) {
    let field = instance.kind().to_string();
    let empty = Label::from_instances(instance.kind(), vec![]);
    let label = fields
        .entry(field.clone())
        .or_insert_with(|| empty.unwrap_or(Label::Scalar(Value::Null)));

    match (label, instance) {
        (Label::Detections(list), LabelInstance::Detection(d)) => list.push(d),
        (Label::Polylines(list), LabelInstance::Polyline(p)) => list.push(p),
        (Label::Keypoints(list), LabelInstance::Keypoint(k)) => list.push(k),
        (Label::Classifications(list), LabelInstance::Classification(c)) => list.push(c),
        (existing, instance) => log::warn!(
            "Field '{}' holds {}; dropping {} instance",
            field,
            existing.label_type(),
            instance.kind()
        ),
    }
}

/// Expands tracks into per-frame labels, each instance carrying the track id
/// as its `index`.
pub fn tracks_to_frames(tracks: &[Track]) -> BTreeMap<u64, FrameLabels> {
    let mut frames: BTreeMap<u64, FrameLabels> = BTreeMap::new();
    for track in tracks {
        for (frame_number, instance) in track.to_labels() {
            append_instance(frames.entry(frame_number).or_default(), instance);
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{BoundingBox, Classification, Detection, Keypoint};

    fn detection(index: Option<u64>) -> Detection {
        Detection {
            index,
            ..Detection::new("car", BoundingBox::new(0.1, 0.1, 0.5, 0.5))
        }
    }

    fn frame(label: Label) -> FrameLabels {
        BTreeMap::from([("detections".to_string(), label)])
    }

    #[test]
    fn test_unindexed_labels_follow_max_index() {
        let frames = BTreeMap::from([
            (
                1,
                frame(Label::Detections(vec![
                    detection(Some(0)),
                    detection(None),
                    detection(Some(2)),
                ])),
            ),
            (
                2,
                frame(Label::Detections(vec![detection(None), detection(Some(5))])),
            ),
            (3, frame(Label::Detections(vec![detection(None)]))),
        ]);

        let tracks = frames_to_tracks(&frames, (100, 100)).unwrap();
        let ids: Vec<u64> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 2, 5, 6, 7, 8]);

        let unindexed_frames: Vec<u64> = tracks[3..]
            .iter()
            .map(|t| *t.boxes.keys().next().unwrap())
            .collect();
        assert_eq!(unindexed_frames, vec![1, 2, 3]);
    }

    #[test]
    fn test_no_recognized_labels_yields_none() {
        let frames = BTreeMap::from([(
            1,
            BTreeMap::from([(
                "weather".to_string(),
                Label::Classification(Classification::new("sunny")),
            )]),
        )]);
        assert!(frames_to_tracks(&frames, (10, 10)).is_none());

        let empty = BTreeMap::from([(1, frame(Label::Detections(vec![])))]);
        assert_eq!(frames_to_tracks(&empty, (10, 10)), Some(vec![]));
    }

    #[test]
    fn test_aggregation_is_left_inverse_of_expansion() {
        let mut frames = BTreeMap::new();
        for frame_number in 1..=3u64 {
            let mut d = detection(Some(4));
            d.attributes
                .insert("speed".to_string(), serde_json::json!(frame_number));
            let k = Keypoint {
                index: Some(9),
                ..Keypoint::new("person", vec![(0.5, 0.5)])
            };
            let mut fields = frame(Label::Detections(vec![d]));
            fields.insert("keypoints".to_string(), Label::Keypoints(vec![k]));
            frames.insert(frame_number, fields);
        }

        let tracks = frames_to_tracks(&frames, (100, 100)).unwrap();
        assert_eq!(tracks.len(), 2);

        let expanded = tracks_to_frames(&tracks);
        assert_eq!(expanded.len(), 3);
        for (frame_number, fields) in &expanded {
            let detections = match fields.get("detections") {
                Some(Label::Detections(ds)) => ds,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(detections.len(), 1);
            assert_eq!(detections[0].index, Some(4));
            assert_eq!(
                detections[0].attributes.get("speed"),
                Some(&serde_json::json!(*frame_number))
            );
            assert_eq!(
                detections[0].bounding_box,
                BoundingBox::new(0.1, 0.1, 0.5, 0.5)
            );

            match fields.get("keypoints") {
                Some(Label::Keypoints(ks)) => assert_eq!(ks[0].index, Some(9)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
