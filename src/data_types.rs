//! Concrete observation types for K-trees: 1-D points, 2-D points and RGB pixels.

use std::cmp::Ordering;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::vector_value::VectorValue;

/// A point on the real line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point1D {
    pub x: f64,
}

impl Point1D {
    pub fn new(x: f64) -> Self {
        Point1D { x }
    }
}

impl VectorValue for Point1D {
    fn zero(&self) -> Self {
        Point1D { x: 0.0 }
    }

    fn add(&self, other: &Self) -> Self {
        Point1D { x: self.x + other.x }
    }

    fn scale_down(&self, n: usize) -> Self {
        Point1D { x: self.x / n as f64 }
    }

    fn distance(&self, other: &Self) -> f64 {
        // Squared Euclidean distance
        (self.x - other.x).powi(2)
    }

    fn compare(&self, other: &Self) -> Ordering {
        OrderedFloat(self.x).cmp(&OrderedFloat(other.x))
    }
}

impl fmt::Display for Point1D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.x)
    }
}

/// A point in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Point2D { x, y }
    }
}

impl VectorValue for Point2D {
    fn zero(&self) -> Self {
        Point2D { x: 0.0, y: 0.0 }
    }

    fn add(&self, other: &Self) -> Self {
        Point2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    fn scale_down(&self, n: usize) -> Self {
        let n = n as f64;
        Point2D {
            x: self.x / n,
            y: self.y / n,
        }
    }

    fn distance(&self, other: &Self) -> f64 {
        // Squared Euclidean distance
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }

    fn compare(&self, other: &Self) -> Ordering {
        OrderedFloat(self.x)
            .cmp(&OrderedFloat(other.x))
            .then_with(|| OrderedFloat(self.y).cmp(&OrderedFloat(other.y)))
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// An RGB pixel taken from an image.
///
/// `x` and `y` locate the pixel in its source image. They travel with raw
/// observations but play no part in the metric, and cluster means (which are
/// built from [`VectorValue::zero`]) always carry `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Pixel {
    pub fn new(x: u32, y: u32, r: u8, g: u8, b: u8) -> Self {
        Pixel {
            x,
            y,
            r: r as f64,
            g: g as f64,
            b: b as f64,
        }
    }

    /// A colour with no image position, e.g. for querying.
    pub fn from_rgb(r: f64, g: f64, b: f64) -> Self {
        Pixel { x: 0, y: 0, r, g, b }
    }

    /// The colour clamped and rounded to 8-bit channels.
    pub fn to_rgb8(&self) -> [u8; 3] {
        let channel = |c: f64| c.round().clamp(0.0, 255.0) as u8;
        [channel(self.r), channel(self.g), channel(self.b)]
    }
}

impl VectorValue for Pixel {
    fn zero(&self) -> Self {
        Pixel::from_rgb(0.0, 0.0, 0.0)
    }

    fn add(&self, other: &Self) -> Self {
        Pixel::from_rgb(self.r + other.r, self.g + other.g, self.b + other.b)
    }

    fn scale_down(&self, n: usize) -> Self {
        let n = n as f64;
        Pixel::from_rgb(self.r / n, self.g / n, self.b / n)
    }

    fn distance(&self, other: &Self) -> f64 {
        ((self.r - other.r).powi(2) + (self.g - other.g).powi(2) + (self.b - other.b).powi(2)).sqrt()
    }

    fn compare(&self, other: &Self) -> Ordering {
        OrderedFloat(self.r)
            .cmp(&OrderedFloat(other.r))
            .then_with(|| OrderedFloat(self.g).cmp(&OrderedFloat(other.g)))
            .then_with(|| OrderedFloat(self.b).cmp(&OrderedFloat(other.b)))
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(R:{} G:{} B:{})", self.r, self.g, self.b)
    }
}
