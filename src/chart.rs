//! Radar charts of dimension scores, rendered as SVG.
//!
//! Axis 0 points straight up, and the rest follow clockwise. A score of 0
//! sits at the center, and a full score on the outer ring.

use std::{f64::consts::PI, fmt::Write as _};

use thiserror::Error;

use crate::{grading::Grade, prelude::*};

/// Width and height of the SVG, in pixels.
const SIZE: f64 = 400.0;

/// Radius of the outer ring. The rest of the space is for labels.
const RADIUS: f64 = 130.0;

/// Number of grid rings.
const RINGS: usize = 4;

/// Why we couldn't draw a chart.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ChartError {
    #[error("a radar chart needs at least 3 axes, not {0}")]
    TooFewAxes(usize),

    #[error("maximum for {label} must be positive, not {max}")]
    NonPositiveMax { label: String, max: f64 },

    #[error("value for {label} is not a finite number")]
    NonFiniteValue { label: String },

    #[error("value for {label} is {value}, outside 0 to {max}")]
    ValueOutOfRange { label: String, value: f64, max: f64 },
}

/// One axis of a radar chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Axis {
    /// What this axis measures.
    pub label: String,
    /// The score, from 0 to `max`.
    pub value: f64,
    /// The maximum score.
    pub max: f64,
}

/// A validated radar chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RadarChart {
    axes: Vec<Axis>,
}

impl RadarChart {
    /// Create a chart, checking that every value fits its axis.
    pub fn new(axes: Vec<Axis>) -> Result<Self, ChartError> {
        if axes.len() < 3 {
            return Err(ChartError::TooFewAxes(axes.len()));
        }
        for axis in &axes {
            if !axis.max.is_finite() || axis.max <= 0.0 {
                return Err(ChartError::NonPositiveMax {
                    label: axis.label.clone(),
                    max: axis.max,
                });
            }
            if !axis.value.is_finite() {
                return Err(ChartError::NonFiniteValue {
                    label: axis.label.clone(),
                });
            }
            if axis.value < 0.0 || axis.value > axis.max {
                return Err(ChartError::ValueOutOfRange {
                    label: axis.label.clone(),
                    value: axis.value,
                    max: axis.max,
                });
            }
        }
        Ok(Self { axes })
    }

    /// Chart the five scores of a grade.
    pub fn from_grade(grade: &Grade) -> Result<Self, ChartError> {
        let axes = grade
            .scores
            .iter()
            .map(|(dimension, score)| Axis {
                label: dimension.label().to_owned(),
                value: f64::from(score),
                max: f64::from(grade.max_score),
            })
            .collect();
        Self::new(axes)
    }

    /// Our axes, in drawing order.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// The angle of axis `idx`, in radians, clockwise from straight up.
    fn angle(&self, idx: usize) -> f64 {
        -PI / 2.0 + 2.0 * PI * idx as f64 / self.axes.len() as f64
    }

    /// The point `fraction` of the way out along axis `idx`.
    fn point(&self, idx: usize, fraction: f64, center: (f64, f64), radius: f64) -> (f64, f64) {
        let angle = self.angle(idx);
        (
            center.0 + fraction * radius * angle.cos(),
            center.1 + fraction * radius * angle.sin(),
        )
    }

    /// The vertices of the score polygon, one per axis.
    pub fn points(&self, center: (f64, f64), radius: f64) -> Vec<(f64, f64)> {
        self.axes
            .iter()
            .enumerate()
            .map(|(idx, axis)| self.point(idx, axis.value / axis.max, center, radius))
            .collect()
    }

    /// Render as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let center = (SIZE / 2.0, SIZE / 2.0);
        let n = self.axes.len();
        let mut svg = String::new();

        // `write!` to a `String` can't fail.
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {SIZE} {SIZE}" width="{SIZE}" height="{SIZE}" class="radar-chart" role="img">"#
        );

        // Grid rings.
        for ring in 1..=RINGS {
            let fraction = ring as f64 / RINGS as f64;
            let ring_points = (0..n)
                .map(|idx| self.point(idx, fraction, center, RADIUS))
                .collect::<Vec<_>>();
            let _ = writeln!(
                svg,
                r##"  <polygon class="grid" points="{}" fill="none" stroke="#d0d4da" stroke-width="1"/>"##,
                format_points(&ring_points)
            );
        }

        // Spokes.
        for idx in 0..n {
            let (x, y) = self.point(idx, 1.0, center, RADIUS);
            let _ = writeln!(
                svg,
                r##"  <line class="spoke" x1="{:.1}" y1="{:.1}" x2="{x:.1}" y2="{y:.1}" stroke="#d0d4da" stroke-width="1"/>"##,
                center.0, center.1
            );
        }

        // Scores.
        let _ = writeln!(
            svg,
            r##"  <polygon class="scores" points="{}" fill="rgba(37, 99, 235, 0.35)" stroke="#2563eb" stroke-width="2"/>"##,
            format_points(&self.points(center, RADIUS))
        );

        // Labels, pushed out past the outer ring.
        for (idx, axis) in self.axes.iter().enumerate() {
            let (x, y) = self.point(idx, 1.0, center, RADIUS + 28.0);
            let anchor = if (x - center.0).abs() < 1.0 {
                "middle"
            } else if x > center.0 {
                "start"
            } else {
                "end"
            };
            let _ = writeln!(
                svg,
                r##"  <text class="label" x="{x:.1}" y="{y:.1}" text-anchor="{anchor}" dominant-baseline="middle" font-family="sans-serif" font-size="12" fill="#1f2937">{} ({}/{})</text>"##,
                escape_xml(&axis.label),
                axis.value,
                axis.max
            );
        }

        svg.push_str("</svg>\n");
        svg
    }
}

fn format_points(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{x:.1},{y:.1}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
