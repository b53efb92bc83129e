// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Conversion between relative label geometry and CVAT pixel geometry.
//!
//! CVAT works on integer pixels, so every conversion to absolute coordinates
//! rounds half away from zero. Round trips are exact up to that rounding.

use crate::{Error, dataset::BoundingBox};
use itertools::Itertools;

/// An `(x, y)` coordinate pair.
pub type Point = (f64, f64);

/// Pixel coordinates to fractions of `(width, height)`.
pub fn to_relative(points: &[Point], (width, height): (u32, u32)) -> Vec<Point> {
    let (width, height) = (f64::from(width), f64::from(height));
    points
        .iter()
        .map(|(x, y)| (x / width, y / height))
        .collect()
}

/// Relative coordinates to integer pixels.
pub fn to_absolute(points: &[Point], (width, height): (u32, u32)) -> Vec<Point> {
    let (width, height) = (f64::from(width), f64::from(height));
    points
        .iter()
        .map(|(x, y)| ((x * width).round(), (y * height).round()))
        .collect()
}

/// Box corners in pixels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelBox {
    pub xtl: f64,
    pub ytl: f64,
    pub xbr: f64,
    pub ybr: f64,
}

impl PixelBox {
    pub fn new(xtl: f64, ytl: f64, xbr: f64, ybr: f64) -> Self {
        PixelBox { xtl, ytl, xbr, ybr }
    }

    pub fn from_relative(bbox: &BoundingBox, (width, height): (u32, u32)) -> Self {
        let (width, height) = (f64::from(width), f64::from(height));
        PixelBox {
            xtl: (bbox.x * width).round(),
            ytl: (bbox.y * height).round(),
            xbr: ((bbox.x + bbox.width) * width).round(),
            ybr: ((bbox.y + bbox.height) * height).round(),
        }
    }

    pub fn to_relative(&self, (width, height): (u32, u32)) -> BoundingBox {
        let (width, height) = (f64::from(width), f64::from(height));
        BoundingBox::new(
            self.xtl / width,
            self.ytl / height,
            (self.xbr - self.xtl) / width,
            (self.ybr - self.ytl) / height,
        )
    }

    /// `[xtl, ytl, xbr, ybr]`, the point layout of a CVAT rectangle.
    pub fn to_points(&self) -> Vec<f64> {
        vec![self.xtl, self.ytl, self.xbr, self.ybr]
    }

    /// Reads a rectangle from its flattened points.
    pub fn from_points(points: &[f64]) -> Option<Self> {
        match points {
            [xtl, ytl, xbr, ybr, ..] => Some(PixelBox::new(*xtl, *ytl, *xbr, *ybr)),
            _ => None,
        }
    }
}

/// Renders points as CVAT's `x0,y0;x1,y1` string.
pub fn format_points(points: &[Point]) -> String {
    points.iter().map(|(x, y)| format!("{},{}", x, y)).join(";")
}

/// Parses a CVAT points string, rounding every coordinate to a pixel.
pub fn parse_points(text: &str) -> Result<Vec<Point>, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(vec![]);
    }

    text.split(';')
        .map(|pair| -> Result<Point, Error> {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| Error::InvalidXml(format!("malformed point '{}'", pair)))?;
            Ok((
                x.trim().parse::<f64>()?.round(),
                y.trim().parse::<f64>()?.round(),
            ))
        })
        .collect()
}

/// Closes a ring by repeating its first point.
pub fn close_ring(points: &mut Vec<Point>) {
    if let Some(first) = points.first().copied() {
        points.push(first);
    }
}

/// `[(x0, y0), (x1, y1)]` to `[x0, y0, x1, y1]`.
pub fn flatten(points: &[Point]) -> Vec<f64> {
    points.iter().flat_map(|&(x, y)| [x, y]).collect()
}

/// Inverse of [`flatten`]; a trailing odd coordinate is ignored.
pub fn pairs(points: &[f64]) -> Vec<Point> {
    points
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_round_trip() {
        let size = (640, 480);
        let points = vec![(0.0, 0.0), (101.4, 33.6), (639.0, 479.6)];
        let back = to_absolute(&to_relative(&points, size), size);
        assert_eq!(back, vec![(0.0, 0.0), (101.0, 34.0), (639.0, 480.0)]);
    }

    #[test]
    fn test_box_round_trip() {
        let size = (1920, 1080);
        let pixels = PixelBox::new(15.0, 40.0, 301.0, 999.0);
        let back = PixelBox::from_relative(&pixels.to_relative(size), size);
        assert!((back.xtl - pixels.xtl).abs() <= 1.0);
        assert!((back.ytl - pixels.ytl).abs() <= 1.0);
        assert!((back.xbr - pixels.xbr).abs() <= 1.0);
        assert!((back.ybr - pixels.ybr).abs() <= 1.0);
    }

    #[test]
    fn test_box_from_relative_rounds() {
        let bbox = BoundingBox::new(0.1, 0.25, 0.5, 0.5);
        let pixels = PixelBox::from_relative(&bbox, (100, 10));
        assert_eq!(pixels, PixelBox::new(10.0, 3.0, 60.0, 8.0));
        assert_eq!(pixels.to_points(), vec![10.0, 3.0, 60.0, 8.0]);
        assert_eq!(PixelBox::from_points(&[1.0, 2.0]), None);
    }

    #[test]
    fn test_points_string() {
        let points = vec![(10.0, 20.0), (30.0, 40.0)];
        assert_eq!(format_points(&points), "10,20;30,40");
        assert_eq!(
            parse_points("10.4,20.5;30,40").unwrap(),
            vec![(10.0, 21.0), (30.0, 40.0)]
        );
        assert!(parse_points("").unwrap().is_empty());
        assert!(matches!(parse_points("10;20"), Err(Error::InvalidXml(_))));
        assert!(parse_points("a,b").is_err());
    }

    #[test]
    fn test_close_ring_and_flatten() {
        let mut points = vec![(1.0, 2.0), (3.0, 4.0)];
        close_ring(&mut points);
        assert_eq!(points.last(), Some(&(1.0, 2.0)));
        let flat = flatten(&points);
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0]);
        assert_eq!(pairs(&flat), points);

        let mut empty: Vec<Point> = vec![];
        close_ring(&mut empty);
        assert!(empty.is_empty());
    }
}
