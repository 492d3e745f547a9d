//! Time-varying attribute values.
//!
//! An [Attribute] is either a constant, a keyed [Curve] or a [AttributeDriver] evaluated as a
//! continuous function of the frame. Curves never extrapolate: frames before the first key or
//! after the last key clamp to the boundary value.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::Error;

/// How values between two keys are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Straight line between the bracketing keys.
    Linear,
    /// Hold the value of the previous key until the next one.
    Step,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Linear
    }
}

impl std::str::FromStr for Interpolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Interpolation::Linear),
            "step" => Ok(Interpolation::Step),
            x => Err(Error::ParseError(format!("unknown interpolation {}", x))),
        }
    }
}

/// Keyed animation curve. Keys are kept sorted by frame with no duplicate frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Curve {
    keys: Vec<(f64, f64)>,
    interpolation: Interpolation,
}

impl Curve {
    pub fn new(interpolation: Interpolation) -> Self {
        Curve {
            keys: Vec::new(),
            interpolation: interpolation,
        }
    }

    /// Build a linear curve from `(frame, value)` pairs given in any order.
    pub fn from_keys<I>(keys: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut curve = Curve::new(Interpolation::Linear);
        for (frame, value) in keys {
            curve.insert(frame, value)?;
        }
        Ok(curve)
    }

    /// Insert a key. A key already present at `frame` is replaced.
    pub fn insert(&mut self, frame: f64, value: f64) -> Result<(), Error> {
        if !frame.is_finite() {
            return Err(Error::InvalidFrame(frame));
        }
        match self.search(frame) {
            Ok(i) => self.keys[i].1 = value,
            Err(i) => self.keys.insert(i, (frame, value)),
        }
        Ok(())
    }

    pub fn keys(&self) -> &[(f64, f64)] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    /// Frame range covered by the keys, `None` for an empty curve.
    pub fn frame_range(&self) -> Option<(f64, f64)> {
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => Some((first.0, last.0)),
            _ => None,
        }
    }

    fn search(&self, frame: f64) -> Result<usize, usize> {
        self.keys
            .binary_search_by(|(f, _)| f.partial_cmp(&frame).unwrap_or(Ordering::Less))
    }

    /// Value of the curve at `frame`. Returns `None` if the curve has no keys or `frame` is NaN.
    ///
    /// A frame that lands on a key returns that key's value exactly. Frames outside the keyed
    /// range take the value of the nearest boundary key.
    pub fn evaluate(&self, frame: f64) -> Option<f64> {
        if frame.is_nan() {
            return None;
        }
        let first = self.keys.first()?;
        let last = self.keys.last()?;
        if frame <= first.0 {
            return Some(first.1);
        }
        if frame >= last.0 {
            return Some(last.1);
        }
        match self.search(frame) {
            Ok(i) => Some(self.keys[i].1),
            Err(i) => {
                // frame is strictly inside the keyed range so 0 < i < len
                let (f0, v0) = self.keys[i - 1];
                let (f1, v1) = self.keys[i];
                match self.interpolation {
                    Interpolation::Step => Some(v0),
                    Interpolation::Linear => {
                        let t = (frame - f0) / (f1 - f0);
                        Some(v0 + (v1 - v0) * t)
                    }
                }
            }
        }
    }
}

/// A value computed from the frame number by code outside of the scene graph.
///
/// This is the hook a host integration layer implements to drive attributes from its own
/// evaluation system. Implementations must be deterministic for a given frame.
pub trait AttributeDriver: Send + Sync {
    fn evaluate(&self, frame: f64) -> f64;
}

impl<F> AttributeDriver for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn evaluate(&self, frame: f64) -> f64 {
        self(frame)
    }
}

/// A possibly time-varying scalar.
#[derive(Clone)]
pub enum Attribute {
    Static(f64),
    Animated(Curve),
    Driven(Arc<dyn AttributeDriver>),
}

impl Attribute {
    pub fn driven<D: AttributeDriver + 'static>(driver: D) -> Self {
        Attribute::Driven(Arc::new(driver))
    }

    /// Replace the attribute with a constant value, dropping any keys.
    pub fn set_value(&mut self, value: f64) {
        *self = Attribute::Static(value);
    }

    /// Key the attribute. A static or driven attribute becomes an animated one holding only the
    /// new key.
    pub fn set_key(&mut self, frame: f64, value: f64) -> Result<(), Error> {
        match self {
            Attribute::Animated(curve) => curve.insert(frame, value),
            _ => {
                let mut curve = Curve::default();
                curve.insert(frame, value)?;
                *self = Attribute::Animated(curve);
                Ok(())
            }
        }
    }

    /// Change the interpolation of a keyed attribute. Returns false and leaves the attribute
    /// untouched if it is static or driven.
    pub fn set_interpolation(&mut self, interpolation: Interpolation) -> bool {
        match self {
            Attribute::Animated(curve) => {
                curve.set_interpolation(interpolation);
                true
            }
            _ => false,
        }
    }

    pub fn is_animated(&self) -> bool {
        match self {
            Attribute::Static(_) => false,
            _ => true,
        }
    }

    /// True if the attribute can produce a value at every frame.
    pub fn is_resolvable(&self) -> bool {
        match self {
            Attribute::Animated(curve) => !curve.is_empty(),
            _ => true,
        }
    }

    pub fn evaluate(&self, frame: f64) -> Option<f64> {
        match self {
            Attribute::Static(v) => Some(*v),
            Attribute::Animated(curve) => curve.evaluate(frame),
            Attribute::Driven(driver) => Some(driver.evaluate(frame)),
        }
    }
}

impl From<f64> for Attribute {
    fn from(v: f64) -> Self {
        Attribute::Static(v)
    }
}

impl From<Curve> for Attribute {
    fn from(c: Curve) -> Self {
        Attribute::Animated(c)
    }
}

impl Default for Attribute {
    fn default() -> Self {
        Attribute::Static(0.0)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Static(v) => f.debug_tuple("Static").field(v).finish(),
            Attribute::Animated(c) => f.debug_tuple("Animated").field(c).finish(),
            Attribute::Driven(_) => f.write_str("Driven(..)"),
        }
    }
}
