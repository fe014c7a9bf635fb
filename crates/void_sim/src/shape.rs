//! Backend-independent shape descriptors
//!
//! The variant set is closed on purpose: each world resolves it with an
//! exhaustive `match`, so a new shape kind does not compile until every
//! backend handles it.

use crate::dimension::{Dimension, Transform};
use crate::error::{PhysicsError, Result};

/// Points closer than this are treated as coincident
pub const LINEAR_SLOP: f32 = 0.005;

/// Shape attached to a body
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDefinition<D: Dimension> {
    /// Box (rectangle in 2D)
    Box { half_extents: D::Vector },
    /// Circle in 2D, sphere in 3D
    Ball { radius: f32 },
    /// Capsule aligned with the local Y axis
    Capsule { radius: f32, half_height: f32 },
    /// Convex polygon in 2D, convex hull of the points in 3D
    Polygon { vertices: Vec<D::Vector> },
    /// Open or closed polyline
    Chain { vertices: Vec<D::Vector>, closed: bool },
    Segment { a: D::Vector, b: D::Vector },
    /// Inner shape placed at an offset in body space
    Transformed {
        shape: Box<ShapeDefinition<D>>,
        offset: Transform<D>,
    },
}

impl<D: Dimension> ShapeDefinition<D> {
    pub fn cuboid(half_extents: D::Vector) -> Self {
        Self::Box { half_extents }
    }

    pub fn ball(radius: f32) -> Self {
        Self::Ball { radius }
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::Capsule { radius, half_height }
    }

    pub fn polygon(vertices: impl Into<Vec<D::Vector>>) -> Self {
        Self::Polygon {
            vertices: vertices.into(),
        }
    }

    pub fn chain(vertices: impl Into<Vec<D::Vector>>, closed: bool) -> Self {
        Self::Chain {
            vertices: vertices.into(),
            closed,
        }
    }

    pub fn segment(a: D::Vector, b: D::Vector) -> Self {
        Self::Segment { a, b }
    }

    /// Wrap this shape at `offset`
    pub fn transformed(self, offset: Transform<D>) -> Self {
        Self::Transformed {
            shape: Box::new(self),
            offset,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Box { .. } => "box",
            Self::Ball { .. } => "ball",
            Self::Capsule { .. } => "capsule",
            Self::Polygon { .. } => "polygon",
            Self::Chain { .. } => "chain",
            Self::Segment { .. } => "segment",
            Self::Transformed { .. } => "transformed",
        }
    }

    /// Parameter checks shared by every backend.
    ///
    /// Backends may still reject a shape that passes (e.g. collinear
    /// polygon points), always before touching the world.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Box { half_extents } => {
                if !D::is_finite(*half_extents) || D::min_element(*half_extents) <= 0.0 {
                    return Err(invalid(format!(
                        "box half extents must be positive, got {half_extents:?}"
                    )));
                }
            }
            Self::Ball { radius } => positive("ball radius", *radius)?,
            Self::Capsule { radius, half_height } => {
                positive("capsule radius", *radius)?;
                if !half_height.is_finite() || *half_height < 0.0 {
                    return Err(invalid(format!(
                        "capsule half height must be non-negative, got {half_height}"
                    )));
                }
            }
            Self::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(invalid(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                finite_points::<D>("polygon", vertices)?;
            }
            Self::Chain { vertices, closed } => {
                let min = if *closed { 3 } else { 2 };
                if vertices.len() < min {
                    return Err(invalid(format!(
                        "chain needs at least {min} vertices, got {}",
                        vertices.len()
                    )));
                }
                finite_points::<D>("chain", vertices)?;
                if vertices
                    .windows(2)
                    .any(|w| D::distance(w[0], w[1]) <= LINEAR_SLOP)
                {
                    return Err(invalid("chain has coincident consecutive vertices".into()));
                }
            }
            Self::Segment { a, b } => {
                finite_points::<D>("segment", &[*a, *b])?;
                if D::distance(*a, *b) <= LINEAR_SLOP {
                    return Err(invalid("segment endpoints coincide".into()));
                }
            }
            Self::Transformed { shape, offset } => {
                if !D::is_finite(offset.translation) {
                    return Err(invalid("transformed shape offset is not finite".into()));
                }
                shape.validate()?;
            }
        }
        Ok(())
    }
}

fn invalid(msg: String) -> PhysicsError {
    PhysicsError::InvalidShape(msg)
}

fn positive(what: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{what} must be positive, got {value}")))
    }
}

fn finite_points<D: Dimension>(what: &str, points: &[D::Vector]) -> Result<()> {
    if points.iter().all(|p| D::is_finite(*p)) {
        Ok(())
    } else {
        Err(invalid(format!("{what} has non-finite vertices")))
    }
}
