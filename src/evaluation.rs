//! Selection of what a bake has to produce.
//!
//! [EvaluationObjects] is independent of any [SceneGraph](crate::scene::SceneGraph): ids are only
//! checked when the request is baked, so the same request can be replayed against different
//! states of a graph (for example before and after a solver iteration).

use crate::scene::{MarkerId, NodeId};
use crate::Error;

/// Requested (node, frame) and (marker, frame) pairs. Frames are stored as given; ordering and
/// de-duplication happen at bake time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationObjects {
    nodes: Vec<(NodeId, Vec<f64>)>,
    markers: Vec<(MarkerId, Vec<f64>)>,
}

fn merge<K: PartialEq>(entries: &mut Vec<(K, Vec<f64>)>, key: K, frames: Vec<f64>) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, existing)) => existing.extend(frames),
        None => entries.push((key, frames)),
    }
}

impl EvaluationObjects {
    pub fn new() -> Self {
        Default::default()
    }

    /// Request the world transform of `node` at `frames`. Adding a node again merges the frames.
    pub fn add_node<I>(&mut self, node: NodeId, frames: I) -> &mut Self
    where
        I: IntoIterator<Item = f64>,
    {
        merge(&mut self.nodes, node, frames.into_iter().collect());
        self
    }

    /// Request several nodes at the same frames.
    pub fn add_nodes<N>(&mut self, nodes: N, frames: &[f64]) -> &mut Self
    where
        N: IntoIterator<Item = NodeId>,
    {
        for node in nodes {
            self.add_node(node, frames.iter().cloned());
        }
        self
    }

    /// Request the observed and reprojected positions of `marker` at `frames`.
    pub fn add_marker<I>(&mut self, marker: MarkerId, frames: I) -> &mut Self
    where
        I: IntoIterator<Item = f64>,
    {
        merge(&mut self.markers, marker, frames.into_iter().collect());
        self
    }

    pub fn nodes(&self) -> &[(NodeId, Vec<f64>)] {
        &self.nodes
    }

    pub fn markers(&self) -> &[(MarkerId, Vec<f64>)] {
        &self.markers
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.markers.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.markers.clear();
    }
}

/// Upper bound on the number of frames `frame_range` will generate.
pub const MAX_FRAMES: usize = 10_000_000;

/// Frames from `start` to `end` inclusive, `step` apart. The last frame is `end` when the range
/// divides evenly.
pub fn frame_range(start: f64, end: f64, step: f64) -> Result<Vec<f64>, Error> {
    for x in &[start, end, step] {
        if !x.is_finite() {
            return Err(Error::InvalidFrame(*x));
        }
    }
    if step <= 0.0 || end < start {
        return Err(Error::ParseError(format!(
            "invalid frame range {}:{}:{}",
            start, end, step
        )));
    }
    let span = ((end - start) / step + 1e-9).floor();
    if !(span < MAX_FRAMES as f64) {
        return Err(Error::ParseError(format!(
            "frame range {}:{}:{} has more than {} frames",
            start, end, step, MAX_FRAMES
        )));
    }
    let count = span as usize + 1;
    // multiply instead of accumulating so long ranges do not drift
    Ok((0..count).map(|i| start + i as f64 * step).collect())
}

/// Sort and de-duplicate frames, rejecting non-finite values.
pub(crate) fn normalize_frames(frames: &[f64]) -> Result<Vec<f64>, Error> {
    if let Some(f) = frames.iter().find(|f| !f.is_finite()) {
        return Err(Error::InvalidFrame(*f));
    }
    let mut sorted = frames.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_merges_repeated_nodes() {
        let mut eval = EvaluationObjects::new();
        eval.add_node(NodeId(1), vec![3.0, 1.0])
            .add_node(NodeId(0), vec![2.0])
            .add_node(NodeId(1), vec![2.0]);
        assert_eq!(eval.num_nodes(), 2);
        assert_eq!(eval.nodes()[0], (NodeId(1), vec![3.0, 1.0, 2.0]));
        assert!(!eval.is_empty());
        eval.clear();
        assert!(eval.is_empty());
    }

    #[test]
    fn add_nodes_shares_frames() {
        let mut eval = EvaluationObjects::new();
        eval.add_nodes(vec![NodeId(0), NodeId(2)], &[1.0, 2.0]);
        eval.add_marker(MarkerId(0), (1..=3_i32).map(f64::from));
        assert_eq!(eval.nodes()[1], (NodeId(2), vec![1.0, 2.0]));
        assert_eq!(eval.markers()[0].1.len(), 3);
    }

    #[test]
    fn frame_ranges() {
        assert_eq!(frame_range(1.0, 3.0, 1.0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(frame_range(0.0, 1.0, 0.25).unwrap().len(), 5);
        let uneven = frame_range(0.0, 1.0, 0.3).unwrap();
        assert_eq!(uneven.len(), 4);
        assert!(uneven[3] < 1.0);
        assert!(frame_range(3.0, 1.0, 1.0).is_err());
        assert!(frame_range(1.0, 3.0, 0.0).is_err());
    }

    #[test]
    fn huge_frame_ranges_are_rejected() {
        assert!(frame_range(0.0, 1e300, 1.0).is_err());
        assert!(frame_range(0.0, 1.0, 1e-300).is_err());
        assert!(frame_range(-1e308, 1e308, 1.0).is_err());
        let last = (MAX_FRAMES - 1) as f64;
        assert!(frame_range(0.0, last + 1.0, 1.0).is_err());
        assert_eq!(frame_range(0.0, 1e6, 1.0).unwrap().len(), 1_000_001);
    }

    #[test]
    fn normalized_frames_are_sorted_and_unique() {
        assert_eq!(
            normalize_frames(&[3.0, 1.0, 3.0, 2.0]).unwrap(),
            vec![1.0, 2.0, 3.0]
        );
        assert!(normalize_frames(&[1.0, std::f64::NAN]).is_err());
    }
}
