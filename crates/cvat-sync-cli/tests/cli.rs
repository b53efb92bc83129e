// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const IMAGE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <task>
      <labels>
        <label>
          <name>car</name>
          <attributes>
            <attribute>
              <name>color</name>
              <values>red
blue</values>
            </attribute>
          </attributes>
        </label>
        <label>
          <name>lane</name>
        </label>
      </labels>
    </task>
  </meta>
  <image id="0" name="street.jpg" width="640" height="480">
    <box label="car" xtl="10" ytl="20" xbr="110" ybr="220" occluded="0">
      <attribute name="color">red</attribute>
    </box>
    <polyline label="lane" points="0,0;100,100"></polyline>
  </image>
  <image id="1" name="empty.jpg" width="640" height="480"></image>
</annotations>
"#;

const VIDEO_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <task>
      <original_size>
        <width>100</width>
        <height>50</height>
      </original_size>
      <labels>
        <label>
          <name>person</name>
        </label>
      </labels>
    </task>
  </meta>
  <track id="0" label="person">
    <box frame="0" outside="0" occluded="0" keyframe="1" xtl="10" ytl="10" xbr="20" ybr="20"></box>
    <box frame="1" outside="0" occluded="0" keyframe="1" xtl="12" ytl="10" xbr="22" ybr="20"></box>
    <box frame="2" outside="1" occluded="0" keyframe="1" xtl="12" ytl="10" xbr="22" ybr="20"></box>
  </track>
</annotations>
"#;

fn xml_file(xml: &str) -> Result<NamedTempFile, Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(xml.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[test]
fn test_help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("cvat-sync")?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("annotate"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("inspect"));
    Ok(())
}

#[test]
fn test_inspect_image_document() -> Result<(), Box<dyn std::error::Error>> {
    let file = xml_file(IMAGE_XML)?;

    let mut cmd = Command::cargo_bin("cvat-sync")?;
    cmd.arg("inspect").arg(file.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("car"))
        .stdout(predicate::str::contains("color [blue, red]"))
        .stdout(predicate::str::contains("2 images"))
        .stdout(predicate::str::contains("2 annotations"));
    Ok(())
}

#[test]
fn test_inspect_video_document() -> Result<(), Box<dyn std::error::Error>> {
    let file = xml_file(VIDEO_XML)?;

    let mut cmd = Command::cargo_bin("cvat-sync")?;
    cmd.arg("inspect").arg("--video").arg(file.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("person"))
        .stdout(predicate::str::contains("frame size: 100x50"))
        .stdout(predicate::str::contains("1 tracks"));
    Ok(())
}

#[test]
fn test_inspect_rejects_other_documents() -> Result<(), Box<dyn std::error::Error>> {
    let file = xml_file("<project><name>not annotations</name></project>")?;

    let mut cmd = Command::cargo_bin("cvat-sync")?;
    cmd.arg("inspect").arg(file.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("annotations"));
    Ok(())
}

#[test]
fn test_annotate_requires_schema() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("cvat-sync")?;
    cmd.args([
        "annotate",
        "--samples",
        "samples.json",
        "--output",
        "session.json",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--schema"));
    Ok(())
}
