//! Mutable, hierarchical scene description.
//!
//! A [SceneGraph] owns transform nodes, cameras attached to nodes, and markers (2D observations
//! of a bundle node seen through a camera). Nodes reference their parent by [NodeId]; the parent
//! graph must be acyclic. Graphs built with [SceneGraph::add_node] and [SceneGraph::set_parent]
//! are acyclic by construction. [SceneGraph::from_nodes] accepts a raw description that is only
//! checked when it is baked.

use cgmath::{Deg, Matrix4, Vector3};

use std::fmt;

use crate::curve::Attribute;
use crate::Error;

macro_rules! index_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

index_id!(NodeId, "node");
index_id!(CameraId, "camera");
index_id!(MarkerId, "marker");

/// Order in which the three euler rotations are applied. `XYZ` rotates around X first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOrder {
    XYZ,
    YZX,
    ZXY,
    XZY,
    YXZ,
    ZYX,
}

impl Default for RotateOrder {
    fn default() -> Self {
        RotateOrder::XYZ
    }
}

impl std::str::FromStr for RotateOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xyz" => Ok(RotateOrder::XYZ),
            "yzx" => Ok(RotateOrder::YZX),
            "zxy" => Ok(RotateOrder::ZXY),
            "xzy" => Ok(RotateOrder::XZY),
            "yxz" => Ok(RotateOrder::YXZ),
            "zyx" => Ok(RotateOrder::ZYX),
            x => Err(Error::ParseError(format!("unknown rotate order {}", x))),
        }
    }
}

impl RotateOrder {
    /// Rotation matrix for euler angles in degrees.
    pub fn matrix(self, rx: f64, ry: f64, rz: f64) -> Matrix4<f64> {
        let x = Matrix4::from_angle_x(Deg(rx));
        let y = Matrix4::from_angle_y(Deg(ry));
        let z = Matrix4::from_angle_z(Deg(rz));
        // column vectors: the first rotation applied is the rightmost factor
        match self {
            RotateOrder::XYZ => z * y * x,
            RotateOrder::YZX => x * z * y,
            RotateOrder::ZXY => y * x * z,
            RotateOrder::XZY => y * z * x,
            RotateOrder::YXZ => z * x * y,
            RotateOrder::ZYX => x * y * z,
        }
    }
}

/// One of the nine animatable channels of a [LocalTransform].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformAttr {
    TranslateX,
    TranslateY,
    TranslateZ,
    RotateX,
    RotateY,
    RotateZ,
    ScaleX,
    ScaleY,
    ScaleZ,
}

impl TransformAttr {
    pub const ALL: [TransformAttr; 9] = [
        TransformAttr::TranslateX,
        TransformAttr::TranslateY,
        TransformAttr::TranslateZ,
        TransformAttr::RotateX,
        TransformAttr::RotateY,
        TransformAttr::RotateZ,
        TransformAttr::ScaleX,
        TransformAttr::ScaleY,
        TransformAttr::ScaleZ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransformAttr::TranslateX => "tx",
            TransformAttr::TranslateY => "ty",
            TransformAttr::TranslateZ => "tz",
            TransformAttr::RotateX => "rx",
            TransformAttr::RotateY => "ry",
            TransformAttr::RotateZ => "rz",
            TransformAttr::ScaleX => "sx",
            TransformAttr::ScaleY => "sy",
            TransformAttr::ScaleZ => "sz",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TransformAttr::ALL.iter().cloned().find(|a| a.name() == name)
    }
}

/// Local transform of a node, relative to its parent. Rotations are in degrees.
///
/// The local matrix is `translate * rotate * scale`.
#[derive(Debug, Clone)]
pub struct LocalTransform {
    pub translate: [Attribute; 3],
    pub rotate: [Attribute; 3],
    pub scale: [Attribute; 3],
    pub rotate_order: RotateOrder,
}

impl Default for LocalTransform {
    fn default() -> Self {
        LocalTransform {
            translate: [0.0.into(), 0.0.into(), 0.0.into()],
            rotate: [0.0.into(), 0.0.into(), 0.0.into()],
            scale: [1.0.into(), 1.0.into(), 1.0.into()],
            rotate_order: RotateOrder::XYZ,
        }
    }
}

impl LocalTransform {
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        LocalTransform {
            translate: [x.into(), y.into(), z.into()],
            ..Default::default()
        }
    }

    pub fn attribute(&self, attr: TransformAttr) -> &Attribute {
        match attr {
            TransformAttr::TranslateX => &self.translate[0],
            TransformAttr::TranslateY => &self.translate[1],
            TransformAttr::TranslateZ => &self.translate[2],
            TransformAttr::RotateX => &self.rotate[0],
            TransformAttr::RotateY => &self.rotate[1],
            TransformAttr::RotateZ => &self.rotate[2],
            TransformAttr::ScaleX => &self.scale[0],
            TransformAttr::ScaleY => &self.scale[1],
            TransformAttr::ScaleZ => &self.scale[2],
        }
    }

    pub fn attribute_mut(&mut self, attr: TransformAttr) -> &mut Attribute {
        match attr {
            TransformAttr::TranslateX => &mut self.translate[0],
            TransformAttr::TranslateY => &mut self.translate[1],
            TransformAttr::TranslateZ => &mut self.translate[2],
            TransformAttr::RotateX => &mut self.rotate[0],
            TransformAttr::RotateY => &mut self.rotate[1],
            TransformAttr::RotateZ => &mut self.rotate[2],
            TransformAttr::ScaleX => &mut self.scale[0],
            TransformAttr::ScaleY => &mut self.scale[1],
            TransformAttr::ScaleZ => &mut self.scale[2],
        }
    }

    /// First channel that cannot be evaluated (an animated channel without keys).
    pub fn unresolved(&self) -> Option<TransformAttr> {
        TransformAttr::ALL
            .iter()
            .cloned()
            .find(|a| !self.attribute(*a).is_resolvable())
    }

    /// Evaluate all channels at `frame`. Fails with the offending channel if one of them has no
    /// value or a non-finite one.
    pub fn values_at(&self, frame: f64) -> Result<[f64; 9], TransformAttr> {
        let mut values = [0.0; 9];
        for (v, attr) in values.iter_mut().zip(TransformAttr::ALL.iter()) {
            *v = match self.attribute(*attr).evaluate(frame) {
                Some(x) if x.is_finite() => x,
                _ => return Err(*attr),
            };
        }
        Ok(values)
    }

    /// Local matrix at `frame`.
    pub fn matrix_at(&self, frame: f64) -> Result<Matrix4<f64>, TransformAttr> {
        let v = self.values_at(frame)?;
        Ok(Matrix4::from_translation(Vector3::new(v[0], v[1], v[2]))
            * self.rotate_order.matrix(v[3], v[4], v[5])
            * Matrix4::from_nonuniform_scale(v[6], v[7], v[8]))
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub transform: LocalTransform,
}

impl Node {
    pub fn new(name: &str, parent: Option<NodeId>) -> Self {
        Node {
            name: name.to_string(),
            parent: parent,
            transform: LocalTransform::default(),
        }
    }
}

/// A pinhole camera attached to a transform node. The camera looks down its local -Z axis with +Y
/// up.
#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub node: NodeId,
    /// Focal length in millimeters.
    pub focal_length: Attribute,
    /// Film back width in millimeters.
    pub film_back_width: f64,
    /// Film back height in millimeters.
    pub film_back_height: f64,
    /// Image width in pixels, used to express deviations in pixels.
    pub image_width: f64,
    /// Image height in pixels.
    pub image_height: f64,
}

impl Camera {
    pub fn new(name: &str, node: NodeId) -> Self {
        Camera {
            name: name.to_string(),
            node: node,
            focal_length: 35.0.into(),
            film_back_width: 36.0,
            film_back_height: 24.0,
            image_width: 1920.0,
            image_height: 1080.0,
        }
    }
}

/// A 2D observation of a bundle node through a camera, in marker space where the film back spans
/// -0.5 to 0.5 on both axes.
#[derive(Debug, Clone)]
pub struct Marker {
    pub name: String,
    pub camera: CameraId,
    pub bundle: NodeId,
    pub x: Attribute,
    pub y: Attribute,
}

impl Marker {
    pub fn new(name: &str, camera: CameraId, bundle: NodeId) -> Self {
        Marker {
            name: name.to_string(),
            camera: camera,
            bundle: bundle,
            x: crate::curve::Curve::default().into(),
            y: crate::curve::Curve::default().into(),
        }
    }
}

/// Hierarchy of transform nodes, cameras and markers.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    cameras: Vec<Camera>,
    markers: Vec<Marker>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a graph from a raw list of nodes. Node `i` gets `NodeId(i)`. Parent references are
    /// not checked here; dangling parents and cycles are reported when the graph is baked.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        SceneGraph {
            nodes: nodes,
            cameras: Vec::new(),
            markers: Vec::new(),
        }
    }

    fn check_name(&self, name: &str) -> Result<(), Error> {
        let taken = self.nodes.iter().any(|n| n.name == name)
            || self.cameras.iter().any(|c| c.name == name)
            || self.markers.iter().any(|m| m.name == name);
        if taken {
            Err(Error::DuplicateName(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Add a node under `parent`. The parent must already exist, which keeps the graph acyclic.
    pub fn add_node(&mut self, name: &str, parent: Option<NodeId>) -> Result<NodeId, Error> {
        if let Some(p) = parent {
            if p.0 >= self.nodes.len() {
                return Err(Error::UnknownNode(p));
            }
        }
        self.check_name(name)?;
        self.nodes.push(Node::new(name, parent));
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Reparent `node`. Fails without modifying the graph if `parent` is `node` itself or one of
    /// its descendants.
    pub fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), Error> {
        if node.0 >= self.nodes.len() {
            return Err(Error::UnknownNode(node));
        }
        if let Some(p) = parent {
            // walk up from the new parent; reaching `node` means we would close a loop
            let mut current = Some(p);
            let mut steps = 0;
            while let Some(c) = current {
                if c == node || steps > self.nodes.len() {
                    return Err(Error::CyclicParent(node));
                }
                current = self.node(c).ok_or(Error::UnknownNode(c))?.parent;
                steps += 1;
            }
        }
        self.nodes[node.0].parent = parent;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_camera(&mut self, name: &str, node: NodeId) -> Result<CameraId, Error> {
        if self.node(node).is_none() {
            return Err(Error::UnknownNode(node));
        }
        self.check_name(name)?;
        self.cameras.push(Camera::new(name, node));
        Ok(CameraId(self.cameras.len() - 1))
    }

    pub fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.get(id.0)
    }

    pub fn camera_mut(&mut self, id: CameraId) -> Option<&mut Camera> {
        self.cameras.get_mut(id.0)
    }

    pub fn find_camera(&self, name: &str) -> Option<CameraId> {
        self.cameras.iter().position(|c| c.name == name).map(CameraId)
    }

    pub fn cameras(&self) -> impl Iterator<Item = (CameraId, &Camera)> {
        self.cameras.iter().enumerate().map(|(i, c)| (CameraId(i), c))
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn add_marker(
        &mut self,
        name: &str,
        camera: CameraId,
        bundle: NodeId,
    ) -> Result<MarkerId, Error> {
        if self.camera(camera).is_none() {
            return Err(Error::UnknownCamera(camera));
        }
        if self.node(bundle).is_none() {
            return Err(Error::UnknownNode(bundle));
        }
        self.check_name(name)?;
        self.markers.push(Marker::new(name, camera, bundle));
        Ok(MarkerId(self.markers.len() - 1))
    }

    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(id.0)
    }

    pub fn marker_mut(&mut self, id: MarkerId) -> Option<&mut Marker> {
        self.markers.get_mut(id.0)
    }

    pub fn find_marker(&self, name: &str) -> Option<MarkerId> {
        self.markers.iter().position(|m| m.name == name).map(MarkerId)
    }

    pub fn markers(&self) -> impl Iterator<Item = (MarkerId, &Marker)> {
        self.markers.iter().enumerate().map(|(i, m)| (MarkerId(i), m))
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// Depth of every node in the hierarchy (roots are 0).
    ///
    /// Fails if a parent reference points outside the graph or if the parent links contain a
    /// cycle. The error names the lowest-indexed node found on the offending chain, so the
    /// result is deterministic.
    pub fn depths(&self) -> Result<Vec<usize>, Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Visiting,
            Done(usize),
        }

        let mut state = vec![State::Unvisited; self.nodes.len()];
        let mut chain = Vec::new();
        for start in 0..self.nodes.len() {
            chain.clear();
            let mut current = start;
            // walk up until a resolved ancestor or a root
            let base = loop {
                match state[current] {
                    State::Done(d) => break Some(d),
                    State::Visiting => {
                        let lowest = chain.iter().cloned().min().unwrap_or(current);
                        return Err(Error::CyclicParent(NodeId(lowest)));
                    }
                    State::Unvisited => {
                        state[current] = State::Visiting;
                        chain.push(current);
                        match self.nodes[current].parent {
                            None => break None,
                            Some(p) if p.0 >= self.nodes.len() => {
                                return Err(Error::UnknownNode(p));
                            }
                            Some(p) => current = p.0,
                        }
                    }
                }
            };
            // chain is ordered child -> topmost unresolved ancestor
            let mut depth = base.map(|d| d + 1).unwrap_or(0);
            for &n in chain.iter().rev() {
                state[n] = State::Done(depth);
                depth += 1;
            }
        }

        Ok(state
            .into_iter()
            .map(|s| match s {
                State::Done(d) => d,
                _ => unreachable!(),
            })
            .collect())
    }

    /// All nodes ordered so that every parent comes before its children. Nodes at the same depth
    /// are ordered by id.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, Error> {
        let depths = self.depths()?;
        let mut order = (0..self.nodes.len()).map(NodeId).collect::<Vec<_>>();
        order.sort_by_key(|n| (depths[n.0], n.0));
        Ok(order)
    }

    /// First and last key frame over every keyed attribute in the graph.
    pub fn keyed_range(&self) -> Option<(f64, f64)> {
        let node_attrs = self.nodes.iter().flat_map(|n| {
            TransformAttr::ALL
                .iter()
                .map(move |a| n.transform.attribute(*a))
        });
        let camera_attrs = self.cameras.iter().map(|c| &c.focal_length);
        let marker_attrs = self.markers.iter().flat_map(|m| vec![&m.x, &m.y]);
        node_attrs
            .chain(camera_attrs)
            .chain(marker_attrs)
            .filter_map(|a| match a {
                Attribute::Animated(curve) => curve.frame_range(),
                _ => None,
            })
            .fold(None, |acc, (lo, hi)| match acc {
                None => Some((lo, hi)),
                Some((a, b)) => Some((lo.min(a), hi.max(b))),
            })
    }
}

impl fmt::Display for SceneGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scene graph with {} nodes, {} cameras, and {} markers",
            self.num_nodes(),
            self.num_cameras(),
            self.num_markers()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{AbsDiffEq, Point3, Transform};

    #[test]
    fn add_node_requires_existing_parent() {
        let mut g = SceneGraph::new();
        let root = g.add_node("root", None).unwrap();
        assert!(g.add_node("child", Some(NodeId(5))).is_err());
        let child = g.add_node("child", Some(root)).unwrap();
        assert_eq!(g.node(child).unwrap().parent, Some(root));
        assert!(g.add_node("child", None).is_err());
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut g = SceneGraph::new();
        let a = g.add_node("a", None).unwrap();
        let b = g.add_node("b", Some(a)).unwrap();
        let c = g.add_node("c", Some(b)).unwrap();
        assert!(g.set_parent(a, Some(c)).is_err());
        assert!(g.set_parent(a, Some(a)).is_err());
        assert_eq!(g.node(a).unwrap().parent, None);
        g.set_parent(c, Some(a)).unwrap();
        assert_eq!(g.node(c).unwrap().parent, Some(a));
    }

    #[test]
    fn topological_order_parents_first() {
        let mut nodes = vec![
            Node::new("leaf", Some(NodeId(2))),
            Node::new("root", None),
            Node::new("mid", Some(NodeId(1))),
        ];
        nodes.push(Node::new("other", None));
        let g = SceneGraph::from_nodes(nodes);
        assert_eq!(
            g.topological_order().unwrap(),
            vec![NodeId(1), NodeId(3), NodeId(2), NodeId(0)]
        );
    }

    #[test]
    fn depths_detect_cycles_and_dangling_parents() {
        let g = SceneGraph::from_nodes(vec![
            Node::new("a", Some(NodeId(1))),
            Node::new("b", Some(NodeId(0))),
        ]);
        match g.depths() {
            Err(Error::CyclicParent(n)) => assert_eq!(n, NodeId(0)),
            x => panic!("expected a cycle, got {:?}", x),
        }

        let g = SceneGraph::from_nodes(vec![Node::new("a", Some(NodeId(7)))]);
        match g.depths() {
            Err(Error::UnknownNode(n)) => assert_eq!(n, NodeId(7)),
            x => panic!("expected a dangling parent, got {:?}", x),
        }
    }

    #[test]
    fn rotate_order_xyz_applies_x_first() {
        let m = RotateOrder::XYZ.matrix(90.0, 90.0, 0.0);
        // +Y rotated 90 around X goes to +Z, then 90 around Y goes to +X
        let p = m.transform_point(Point3::new(0.0, 1.0, 0.0));
        assert!(p.abs_diff_eq(&Point3::new(1.0, 0.0, 0.0), 1e-12));

        let m = RotateOrder::ZYX.matrix(90.0, 90.0, 0.0);
        // around Y first: +Y is unchanged, then around X goes to +Z
        let p = m.transform_point(Point3::new(0.0, 1.0, 0.0));
        assert!(p.abs_diff_eq(&Point3::new(0.0, 0.0, 1.0), 1e-12));
    }

    #[test]
    fn local_matrix_is_translate_rotate_scale() {
        let mut t = LocalTransform::from_translation(1.0, 2.0, 3.0);
        t.scale[0] = 2.0.into();
        t.rotate[2] = 90.0.into();
        let m = t.matrix_at(0.0).unwrap();
        // scale x by 2, rotate +X onto +Y, then translate
        let p = m.transform_point(Point3::new(1.0, 0.0, 0.0));
        assert!(p.abs_diff_eq(&Point3::new(1.0, 4.0, 3.0), 1e-12));
    }

    #[test]
    fn unresolved_channel_is_reported() {
        let mut t = LocalTransform::default();
        assert_eq!(t.unresolved(), None);
        *t.attribute_mut(TransformAttr::RotateY) = crate::curve::Curve::default().into();
        assert_eq!(t.unresolved(), Some(TransformAttr::RotateY));
        assert_eq!(t.matrix_at(1.0).err(), Some(TransformAttr::RotateY));
    }

    #[test]
    fn keyed_range_spans_all_curves() {
        let mut g = SceneGraph::new();
        let a = g.add_node("a", None).unwrap();
        assert_eq!(g.keyed_range(), None);
        let cam = g.add_camera("cam", a).unwrap();
        let mkr = g.add_marker("mkr", cam, a).unwrap();
        g.node_mut(a).unwrap().transform.translate[1].set_key(5.0, 1.0).unwrap();
        g.camera_mut(cam).unwrap().focal_length.set_key(12.0, 35.0).unwrap();
        g.marker_mut(mkr).unwrap().x.set_key(-2.0, 0.0).unwrap();
        assert_eq!(g.keyed_range(), Some((-2.0, 12.0)));
    }
}
