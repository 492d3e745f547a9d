//! Scene graph baking and geometric fitting for a match-move solver.
//!
//! A [SceneGraph] holds a hierarchy of animated transform nodes, cameras and 2D markers. An
//! [EvaluationObjects] request names which nodes and markers are needed at which frames, and
//! [bake] evaluates the request into an immutable [FlatScene]. The [fit] module holds the
//! stateless geometry helpers used to build initial solver guesses.

extern crate byteorder;
extern crate cgmath;
extern crate indicatif;
extern crate itertools;
extern crate nalgebra;
extern crate nom;
extern crate rayon;

pub mod bake;
pub mod curve;
pub mod evaluation;
pub mod fit;
pub mod flat;
pub mod io;
pub mod scene;

pub use bake::{bake, bake_with, BakeOptions, BakePlan};
pub use curve::{Attribute, AttributeDriver, Curve, Interpolation};
pub use evaluation::{frame_range, EvaluationObjects};
pub use fit::{fit_line_to_points_type2, fit_plane_to_points, line_point_intersection, Line2, Plane};
pub use flat::{FlatScene, MarkerSample, NodeSample, WorldTransform};
pub use scene::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("need at least {required} points, got {actual}")]
    NotEnoughPoints { required: usize, actual: usize },
    #[error("mismatched input lengths ({left} and {right})")]
    MismatchedLengths { left: usize, right: usize },
    #[error("degenerate input: {0}")]
    Degenerate(String),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("unknown camera {0}")]
    UnknownCamera(CameraId),
    #[error("unknown marker {0}")]
    UnknownMarker(MarkerId),
    #[error("parenting cycle through {0}")]
    CyclicParent(NodeId),
    #[error("{owner}.{attribute} is animated but has no keys")]
    NoKeys {
        owner: String,
        attribute: &'static str,
    },
    #[error("{owner}.{attribute} is not finite at frame {frame}")]
    NonFiniteValue {
        owner: String,
        attribute: &'static str,
        frame: f64,
    },
    #[error("invalid frame {0}")]
    InvalidFrame(f64),
    #[error("duplicate name {0}")]
    DuplicateName(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}
