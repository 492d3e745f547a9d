//! Immutable result of a bake.
//!
//! A [FlatScene] holds world-space transforms per (node, frame) and marker reprojections per
//! (marker, frame). It holds no reference to the graph it was baked from.

use byteorder::*;
use cgmath::prelude::*;
use cgmath::{Matrix3, Matrix4, Point2, Point3, Quaternion, Vector3};
use itertools::Itertools;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::scene::{MarkerId, NodeId};
use crate::Error;

const ZERO_SCALE: f64 = 1e-12;

/// World-space transform of a node at one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTransform {
    pub matrix: Matrix4<f64>,
}

impl WorldTransform {
    pub fn identity() -> Self {
        WorldTransform {
            matrix: Matrix4::identity(),
        }
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::from_vec(self.matrix.w.truncate())
    }

    /// Length of each basis axis.
    pub fn scale(&self) -> Vector3<f64> {
        Vector3::new(
            self.matrix.x.truncate().magnitude(),
            self.matrix.y.truncate().magnitude(),
            self.matrix.z.truncate().magnitude(),
        )
    }

    /// Rotation part of the transform with scale removed. `None` if an axis has zero scale.
    ///
    /// Sheared transforms (non-uniform scale under a rotated parent) do not have an exact
    /// rotation; the normalized basis is converted as is.
    pub fn orientation(&self) -> Option<Quaternion<f64>> {
        let scale = self.scale();
        if scale.x < ZERO_SCALE || scale.y < ZERO_SCALE || scale.z < ZERO_SCALE {
            return None;
        }
        let basis = Matrix3::from_cols(
            self.matrix.x.truncate() / scale.x,
            self.matrix.y.truncate() / scale.y,
            self.matrix.z.truncate() / scale.z,
        );
        Some(Quaternion::from(basis).normalize())
    }

    pub fn transform_point(&self, p: Point3<f64>) -> Point3<f64> {
        self.matrix.transform_point(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSample {
    pub frame: f64,
    pub transform: WorldTransform,
}

/// Marker observation compared against the reprojection of its bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSample {
    pub frame: f64,
    /// Observed position in marker space.
    pub observed: Point2<f64>,
    /// Bundle projected through the camera, `None` if the bundle is behind the camera.
    pub reprojected: Option<Point2<f64>>,
    /// Distance between observed and reprojected positions in pixels.
    pub deviation: Option<f64>,
}

fn find_frame<T>(samples: &[T], frame: f64, key: impl Fn(&T) -> f64) -> Option<&T> {
    samples
        .binary_search_by(|s| {
            key(s)
                .partial_cmp(&frame)
                .unwrap_or(std::cmp::Ordering::Less)
        })
        .ok()
        .map(|i| &samples[i])
}

/// Baked scene. Every requested (node, frame) and (marker, frame) pair is present exactly once,
/// with frames ascending per entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatScene {
    nodes: BTreeMap<NodeId, Vec<NodeSample>>,
    markers: BTreeMap<MarkerId, Vec<MarkerSample>>,
}

impl FlatScene {
    pub(crate) fn new(
        nodes: BTreeMap<NodeId, Vec<NodeSample>>,
        markers: BTreeMap<MarkerId, Vec<MarkerSample>>,
    ) -> Self {
        FlatScene {
            nodes: nodes,
            markers: markers,
        }
    }

    pub fn transform(&self, node: NodeId, frame: f64) -> Option<&WorldTransform> {
        let samples = self.nodes.get(&node)?;
        find_frame(samples, frame, |s| s.frame).map(|s| &s.transform)
    }

    pub fn position(&self, node: NodeId, frame: f64) -> Option<Point3<f64>> {
        self.transform(node, frame).map(|t| t.position())
    }

    pub fn samples(&self, node: NodeId) -> Option<&[NodeSample]> {
        self.nodes.get(&node).map(|x| x.as_slice())
    }

    pub fn frames(&self, node: NodeId) -> Option<Vec<f64>> {
        self.samples(node)
            .map(|s| s.iter().map(|x| x.frame).collect())
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().cloned()
    }

    pub fn marker_sample(&self, marker: MarkerId, frame: f64) -> Option<&MarkerSample> {
        let samples = self.markers.get(&marker)?;
        find_frame(samples, frame, |s| s.frame)
    }

    pub fn marker_samples(&self, marker: MarkerId) -> Option<&[MarkerSample]> {
        self.markers.get(&marker).map(|x| x.as_slice())
    }

    pub fn markers(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.markers.keys().cloned()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// Number of (node, frame) samples.
    pub fn num_samples(&self) -> usize {
        self.nodes.values().map(|x| x.len()).sum()
    }

    /// Number of (marker, frame) samples.
    pub fn num_marker_samples(&self) -> usize {
        self.markers.values().map(|x| x.len()).sum()
    }

    fn deviations(&self) -> impl Iterator<Item = f64> + '_ {
        self.markers
            .values()
            .flat_map(|x| x.iter().filter_map(|s| s.deviation))
    }

    /// Mean marker deviation in pixels over all samples with a reprojection.
    pub fn average_deviation(&self) -> Option<f64> {
        let (sum, count) = self
            .deviations()
            .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    pub fn max_deviation(&self) -> Option<f64> {
        self.deviations().fold(None, |m, d| match m {
            Some(x) if x >= d => Some(x),
            _ => Some(d),
        })
    }

    /// Write the flat scene as text.
    ///
    /// ```txt
    /// <num_nodes> <num_markers>
    /// node <node_index> <num_samples>
    /// <frame> <m00> <m10> <m20> <m30> <m01> ... <m33>     (column major)
    /// ...
    /// marker <marker_index> <num_samples>
    /// <frame> <observed_x> <observed_y> <reprojected_x> <reprojected_y> <deviation>
    /// ...
    /// ```
    /// Missing reprojections and deviations are written as `nan`.
    pub fn write_text(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(&mut file, "{} {}", self.nodes.len(), self.markers.len())?;
        for (node, samples) in &self.nodes {
            writeln!(&mut file, "node {} {}", node.index(), samples.len())?;
            for s in samples {
                let m: &[f64; 16] = s.transform.matrix.as_ref();
                writeln!(&mut file, "{} {}", s.frame, m.iter().join(" "))?;
            }
        }
        for (marker, samples) in &self.markers {
            writeln!(&mut file, "marker {} {}", marker.index(), samples.len())?;
            for s in samples {
                let (rx, ry) = s
                    .reprojected
                    .map(|p| (p.x, p.y))
                    .unwrap_or((std::f64::NAN, std::f64::NAN));
                writeln!(
                    &mut file,
                    "{} {} {} {} {} {}",
                    s.frame,
                    s.observed.x,
                    s.observed.y,
                    rx,
                    ry,
                    s.deviation.unwrap_or(std::f64::NAN)
                )?;
            }
        }
        Ok(())
    }

    /// Write the flat scene in big endian binary. Same layout as the text format, without the
    /// `node`/`marker` tags; counts are `u64`, everything else `f64`.
    pub fn write_binary(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_u64::<BigEndian>(self.nodes.len() as u64)?;
        file.write_u64::<BigEndian>(self.markers.len() as u64)?;

        for (node, samples) in &self.nodes {
            file.write_u64::<BigEndian>(node.index() as u64)?;
            file.write_u64::<BigEndian>(samples.len() as u64)?;
            for s in samples {
                file.write_f64::<BigEndian>(s.frame)?;
                let m: &[f64; 16] = s.transform.matrix.as_ref();
                for x in m.iter() {
                    file.write_f64::<BigEndian>(*x)?;
                }
            }
        }

        for (marker, samples) in &self.markers {
            file.write_u64::<BigEndian>(marker.index() as u64)?;
            file.write_u64::<BigEndian>(samples.len() as u64)?;
            for s in samples {
                let r = s
                    .reprojected
                    .unwrap_or(Point2::new(std::f64::NAN, std::f64::NAN));
                for x in &[
                    s.frame,
                    s.observed.x,
                    s.observed.y,
                    r.x,
                    r.y,
                    s.deviation.unwrap_or(std::f64::NAN),
                ] {
                    file.write_f64::<BigEndian>(*x)?;
                }
            }
        }

        Ok(())
    }

    /// Write the flat scene to a file. Text or binary format is chosen from the extension.
    /// `.txt` -> text, `.bflat` -> binary.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        match path.extension().and_then(|x| x.to_str()) {
            Some("txt") => self.write_text(path)?,
            Some("bflat") => self.write_binary(path)?,
            ext => {
                return Err(Error::IOError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unknown file extension {:?}", ext),
                )))
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for FlatScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Flat scene with {} nodes ({} samples) and {} markers ({} samples)",
            self.num_nodes(),
            self.num_samples(),
            self.num_markers(),
            self.num_marker_samples()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{AbsDiffEq, Deg, Rotation3};

    fn sample(frame: f64, matrix: Matrix4<f64>) -> NodeSample {
        NodeSample {
            frame: frame,
            transform: WorldTransform { matrix: matrix },
        }
    }

    fn scene() -> FlatScene {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId(3),
            vec![
                sample(1.0, Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0))),
                sample(2.0, Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0))),
            ],
        );
        let mut markers = BTreeMap::new();
        markers.insert(
            MarkerId(0),
            vec![
                MarkerSample {
                    frame: 1.0,
                    observed: Point2::new(0.0, 0.0),
                    reprojected: Some(Point2::new(0.0, 0.0)),
                    deviation: Some(2.0),
                },
                MarkerSample {
                    frame: 2.0,
                    observed: Point2::new(0.0, 0.0),
                    reprojected: None,
                    deviation: None,
                },
                MarkerSample {
                    frame: 3.0,
                    observed: Point2::new(0.0, 0.0),
                    reprojected: Some(Point2::new(0.0, 0.0)),
                    deviation: Some(4.0),
                },
            ],
        );
        FlatScene::new(nodes, markers)
    }

    #[test]
    fn queries_only_hit_baked_frames() {
        let s = scene();
        assert_eq!(s.position(NodeId(3), 2.0), Some(Point3::new(2.0, 0.0, 0.0)));
        assert_eq!(s.position(NodeId(3), 1.5), None);
        assert_eq!(s.position(NodeId(0), 1.0), None);
        assert_eq!(s.frames(NodeId(3)), Some(vec![1.0, 2.0]));
        assert_eq!(s.num_samples(), 2);
        assert!(s.marker_sample(MarkerId(0), 2.0).unwrap().deviation.is_none());
    }

    #[test]
    fn deviation_statistics_skip_missing_reprojections() {
        let s = scene();
        assert_eq!(s.average_deviation(), Some(3.0));
        assert_eq!(s.max_deviation(), Some(4.0));
        assert_eq!(FlatScene::default().average_deviation(), None);
    }

    #[test]
    fn decompose_world_transform() {
        let m = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))
            * Matrix4::from_angle_y(Deg(30.0))
            * Matrix4::from_nonuniform_scale(2.0, 3.0, 4.0);
        let t = WorldTransform { matrix: m };
        assert!(t.scale().abs_diff_eq(&Vector3::new(2.0, 3.0, 4.0), 1e-12));
        let q = t.orientation().unwrap();
        let expected = Quaternion::from_angle_y(Deg(30.0));
        assert!(q.abs_diff_eq(&expected, 1e-12) || q.abs_diff_eq(&-expected, 1e-12));

        let flat = WorldTransform {
            matrix: Matrix4::from_nonuniform_scale(1.0, 0.0, 1.0),
        };
        assert_eq!(flat.orientation(), None);
    }

    #[test]
    fn write_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let s = scene();
        s.write(&dir.path().join("scene.txt")).unwrap();
        s.write(&dir.path().join("scene.bflat")).unwrap();
        assert!(s.write(&dir.path().join("scene.obj")).is_err());

        let text = std::fs::read_to_string(dir.path().join("scene.txt")).unwrap();
        assert!(text.starts_with("1 1\nnode 3 2\n"));
        let binary = std::fs::read(dir.path().join("scene.bflat")).unwrap();
        // header + node block + marker block
        assert_eq!(binary.len(), 16 + 16 + 2 * 17 * 8 + 16 + 3 * 6 * 8);
    }
}
