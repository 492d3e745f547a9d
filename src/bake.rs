//! Evaluate a [SceneGraph] into a [FlatScene].
//!
//! Baking happens in two steps. [BakePlan::new] validates the request against the graph and
//! precomputes, for every frame, which nodes have to be evaluated and in which order (parents
//! before children). [BakePlan::execute] then evaluates the frames. Frames do not depend on each
//! other, so they are evaluated in parallel into separate tables and assembled afterwards. Either
//! every requested sample is produced or an error is returned.
//!
//! Example usage:
//! ```
//! use mmscene::*;
//!
//! let mut graph = SceneGraph::new();
//! let root = graph.add_node("root", None).unwrap();
//! let child = graph.add_node("child", Some(root)).unwrap();
//! graph.node_mut(child).unwrap().transform = LocalTransform::from_translation(0., 1., 0.);
//! graph.node_mut(root).unwrap().transform.translate[0].set_key(1., 0.).unwrap();
//! graph.node_mut(root).unwrap().transform.translate[0].set_key(3., 4.).unwrap();
//!
//! let mut request = EvaluationObjects::new();
//! request.add_node(child, vec![1., 2., 3.]);
//! let flat = bake(&graph, &request).unwrap();
//! assert_eq!(flat.position(child, 2.), Some(cgmath::Point3::new(2., 1., 0.)));
//! ```

use cgmath::prelude::*;
use cgmath::{Matrix4, Point2, Point3};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;

use std::collections::BTreeMap;
use std::convert::TryInto;

use crate::evaluation::{normalize_frames, EvaluationObjects};
use crate::flat::*;
use crate::scene::*;
use crate::Error;

pub(crate) fn progress_bar(length: u64, message: &str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {percent}% ({eta})")
            .progress_chars("#-"),
    );
    pb.set_message(message);
    pb
}

/// Options controlling how a bake is executed. They never change the result.
#[derive(Debug, Clone)]
pub struct BakeOptions {
    /// Evaluate frames on the rayon thread pool. When false everything runs on the calling
    /// thread.
    pub parallel: bool,
    /// Display a progress bar.
    pub verbose: bool,
}

impl Default for BakeOptions {
    fn default() -> Self {
        BakeOptions {
            parallel: true,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRequest {
    node: NodeId,
    slot: usize,
    frames: Vec<usize>,
}

#[derive(Debug, Clone)]
struct MarkerRequest {
    marker: MarkerId,
    camera_slot: usize,
    bundle_slot: usize,
    frames: Vec<usize>,
}

/// Validated, ordered work for one bake.
///
/// Nodes are assigned slots in topological order so that a parent's slot is always smaller than
/// its children's. Per frame, only slots that a requested node or marker depends on are
/// evaluated.
#[derive(Debug)]
pub struct BakePlan<'a> {
    graph: &'a SceneGraph,
    order: Vec<NodeId>,
    depths: Vec<usize>,
    parents: Vec<Option<usize>>,
    frames: Vec<f64>,
    work: Vec<Vec<usize>>,
    node_requests: Vec<NodeRequest>,
    marker_requests: Vec<MarkerRequest>,
}

fn frame_index(frames: &[f64], frame: f64) -> usize {
    // frames come from the same normalized set, so the search always hits
    frames
        .binary_search_by(|f| f.partial_cmp(&frame).unwrap_or(std::cmp::Ordering::Less))
        .unwrap_or_else(|i| i)
}

fn node_owner(graph: &SceneGraph, node: NodeId) -> String {
    match graph.node(node) {
        Some(n) => format!("{} ({})", node, n.name),
        None => node.to_string(),
    }
}

impl<'a> BakePlan<'a> {
    /// Validate `request` against `graph` and compute the evaluation order.
    ///
    /// Fails if the graph has a parenting cycle or a dangling parent, if a requested node,
    /// marker or camera does not exist, if a frame is not finite, or if an attribute that has to
    /// be evaluated has no keys.
    pub fn new(graph: &'a SceneGraph, request: &EvaluationObjects) -> Result<Self, Error> {
        let depths = graph.depths()?;

        let mut node_frames = Vec::with_capacity(request.num_nodes());
        for (node, frames) in request.nodes() {
            if graph.node(*node).is_none() {
                return Err(Error::UnknownNode(*node));
            }
            node_frames.push((*node, normalize_frames(frames)?));
        }

        let mut marker_frames = Vec::with_capacity(request.num_markers());
        for (id, frames) in request.markers() {
            let marker = graph.marker(*id).ok_or(Error::UnknownMarker(*id))?;
            let camera = graph
                .camera(marker.camera)
                .ok_or(Error::UnknownCamera(marker.camera))?;
            for node in &[camera.node, marker.bundle] {
                if graph.node(*node).is_none() {
                    return Err(Error::UnknownNode(*node));
                }
            }
            if !(camera.film_back_width > 0.0 && camera.film_back_height > 0.0) {
                return Err(Error::Degenerate(format!(
                    "camera {} has an empty film back",
                    camera.name
                )));
            }
            let attrs = [
                (&camera.focal_length, "focal", &camera.name),
                (&marker.x, "x", &marker.name),
                (&marker.y, "y", &marker.name),
            ];
            for (attr, name, owner) in attrs.iter() {
                if !attr.is_resolvable() {
                    return Err(Error::NoKeys {
                        owner: owner.to_string(),
                        attribute: *name,
                    });
                }
            }
            marker_frames.push((*id, camera.node, marker.bundle, normalize_frames(frames)?));
        }

        let all_frames = node_frames
            .iter()
            .flat_map(|(_, f)| f.iter().cloned())
            .chain(marker_frames.iter().flat_map(|(_, _, _, f)| f.iter().cloned()))
            .collect::<Vec<_>>();
        let frames = normalize_frames(&all_frames)?;

        // which frames each needed node is evaluated at
        let mut needed: BTreeMap<NodeId, Vec<bool>> = BTreeMap::new();
        {
            let mut mark = |node: NodeId, frame_indices: &[usize]| {
                let mut current = Some(node);
                while let Some(n) = current {
                    let mask = needed.entry(n).or_insert_with(|| vec![false; frames.len()]);
                    for &fi in frame_indices {
                        mask[fi] = true;
                    }
                    // depths() succeeded so every parent exists
                    current = graph.node(n).and_then(|x| x.parent);
                }
            };
            for (node, f) in &node_frames {
                let fis = f.iter().map(|x| frame_index(&frames, *x)).collect::<Vec<_>>();
                mark(*node, &fis);
            }
            for (_, camera_node, bundle, f) in &marker_frames {
                let fis = f.iter().map(|x| frame_index(&frames, *x)).collect::<Vec<_>>();
                mark(*camera_node, &fis);
                mark(*bundle, &fis);
            }
        }

        for node in needed.keys() {
            if let Some(attr) = graph.node(*node).and_then(|n| n.transform.unresolved()) {
                return Err(Error::NoKeys {
                    owner: node_owner(graph, *node),
                    attribute: attr.name(),
                });
            }
        }

        let mut order = needed.keys().cloned().collect::<Vec<_>>();
        order.sort_by_key(|n| (depths[n.0], n.0));
        let slot_of = order
            .iter()
            .enumerate()
            .map(|(slot, n)| (*n, slot))
            .collect::<BTreeMap<_, _>>();
        let parents = order
            .iter()
            .map(|n| {
                graph
                    .node(*n)
                    .and_then(|x| x.parent)
                    .and_then(|p| slot_of.get(&p).cloned())
            })
            .collect::<Vec<_>>();

        let work = (0..frames.len())
            .map(|fi| {
                order
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| needed[n][fi])
                    .map(|(slot, _)| slot)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let node_requests = node_frames
            .into_iter()
            .map(|(node, f)| NodeRequest {
                node: node,
                slot: slot_of[&node],
                frames: f.iter().map(|x| frame_index(&frames, *x)).collect(),
            })
            .collect();
        let marker_requests = marker_frames
            .into_iter()
            .map(|(marker, camera_node, bundle, f)| MarkerRequest {
                marker: marker,
                camera_slot: slot_of[&camera_node],
                bundle_slot: slot_of[&bundle],
                frames: f.iter().map(|x| frame_index(&frames, *x)).collect(),
            })
            .collect();

        let plan = BakePlan {
            graph: graph,
            depths: order.iter().map(|n| depths[n.0]).collect(),
            order: order,
            parents: parents,
            frames: frames,
            work: work,
            node_requests: node_requests,
            marker_requests: marker_requests,
        };
        log::debug!(
            "bake plan: {} nodes over {} frames, {} work items",
            plan.order.len(),
            plan.frames.len(),
            plan.num_work_items()
        );
        Ok(plan)
    }

    /// Every frame any requested entry needs, ascending.
    pub fn frames(&self) -> &[f64] {
        &self.frames
    }

    /// Nodes that take part in the bake, parents before children.
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    pub fn num_work_items(&self) -> usize {
        self.work.iter().map(|x| x.len()).sum()
    }

    /// All (node, frame) evaluations grouped by hierarchy depth. Every item only depends on items
    /// of earlier groups, so the items inside one group can be evaluated concurrently.
    pub fn work_items(&self) -> Vec<Vec<(NodeId, f64)>> {
        let max_depth = self.depths.iter().cloned().max().map(|d| d + 1).unwrap_or(0);
        let mut groups = vec![Vec::new(); max_depth];
        for (fi, slots) in self.work.iter().enumerate() {
            for &slot in slots {
                groups[self.depths[slot]].push((self.order[slot], self.frames[fi]));
            }
        }
        groups
    }

    /// World matrices of every slot at one frame. Slots not needed at this frame stay identity.
    fn evaluate_frame(&self, fi: usize) -> Result<Vec<Matrix4<f64>>, Error> {
        let frame = self.frames[fi];
        let mut world = vec![Matrix4::identity(); self.order.len()];
        for &slot in &self.work[fi] {
            let id = self.order[slot];
            let node = self.graph.node(id).ok_or(Error::UnknownNode(id))?;
            let local = node
                .transform
                .matrix_at(frame)
                .map_err(|attr| Error::NonFiniteValue {
                    owner: node_owner(self.graph, id),
                    attribute: attr.name(),
                    frame: frame,
                })?;
            // parents have smaller slots and are needed wherever a child is
            world[slot] = match self.parents[slot] {
                Some(p) => world[p] * local,
                None => local,
            };
        }
        log::trace!("evaluated frame {} ({} nodes)", frame, self.work[fi].len());
        Ok(world)
    }

    fn marker_samples(
        &self,
        request: &MarkerRequest,
        tables: &[Vec<Matrix4<f64>>],
    ) -> Result<Vec<MarkerSample>, Error> {
        let marker = self
            .graph
            .marker(request.marker)
            .ok_or(Error::UnknownMarker(request.marker))?;
        let camera = self
            .graph
            .camera(marker.camera)
            .ok_or(Error::UnknownCamera(marker.camera))?;

        let value = |attr: &crate::curve::Attribute, name: &'static str, owner: &str, frame| {
            match attr.evaluate(frame) {
                Some(x) if x.is_finite() => Ok(x),
                _ => Err(Error::NonFiniteValue {
                    owner: owner.to_string(),
                    attribute: name,
                    frame: frame,
                }),
            }
        };

        let mut behind = 0;
        let samples = request
            .frames
            .iter()
            .map(|&fi| -> Result<MarkerSample, Error> {
                let frame = self.frames[fi];
                let observed = Point2::new(
                    value(&marker.x, "x", &marker.name, frame)?,
                    value(&marker.y, "y", &marker.name, frame)?,
                );
                let focal = value(&camera.focal_length, "focal", &camera.name, frame)?;

                let camera_world = tables[fi][request.camera_slot];
                let world_camera = camera_world.invert().ok_or_else(|| {
                    Error::Degenerate(format!(
                        "camera {} has a singular transform at frame {}",
                        camera.name, frame
                    ))
                })?;
                let bundle = Point3::from_vec(tables[fi][request.bundle_slot].w.truncate());
                let p = world_camera.transform_point(bundle);

                // camera looks down -z
                let reprojected = if p.z < 0.0 {
                    Some(Point2::new(
                        focal * (p.x / -p.z) / camera.film_back_width,
                        focal * (p.y / -p.z) / camera.film_back_height,
                    ))
                } else {
                    behind += 1;
                    None
                };
                let deviation = reprojected.map(|r| {
                    let dx = (r.x - observed.x) * camera.image_width;
                    let dy = (r.y - observed.y) * camera.image_height;
                    (dx * dx + dy * dy).sqrt()
                });

                Ok(MarkerSample {
                    frame: frame,
                    observed: observed,
                    reprojected: reprojected,
                    deviation: deviation,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        if behind > 0 {
            log::warn!(
                "bundle of marker {} is behind camera {} on {} of {} frames",
                marker.name,
                camera.name,
                behind,
                samples.len()
            );
        }
        Ok(samples)
    }

    /// Evaluate the plan. Produces every requested sample or fails without a partial result.
    pub fn execute(&self, options: &BakeOptions) -> Result<FlatScene, Error> {
        let pb = progress_bar(
            self.frames.len().try_into().unwrap_or(u64::max_value()),
            "Baking frames",
            options.verbose,
        );

        // collect every frame before looking at errors so the reported error does not depend on
        // thread scheduling
        let results: Vec<Result<Vec<Matrix4<f64>>, Error>> = if options.parallel {
            (0..self.frames.len())
                .into_par_iter()
                .progress_with(pb)
                .map(|fi| self.evaluate_frame(fi))
                .collect()
        } else {
            (0..self.frames.len())
                .map(|fi| {
                    pb.inc(1);
                    self.evaluate_frame(fi)
                })
                .collect()
        };
        let tables = results.into_iter().collect::<Result<Vec<_>, Error>>()?;

        let nodes = self
            .node_requests
            .iter()
            .map(|r| {
                let samples = r
                    .frames
                    .iter()
                    .map(|&fi| NodeSample {
                        frame: self.frames[fi],
                        transform: WorldTransform {
                            matrix: tables[fi][r.slot],
                        },
                    })
                    .collect();
                (r.node, samples)
            })
            .collect::<BTreeMap<_, _>>();

        let marker_results: Vec<Result<Vec<MarkerSample>, Error>> = if options.parallel {
            self.marker_requests
                .par_iter()
                .map(|r| self.marker_samples(r, &tables))
                .collect()
        } else {
            self.marker_requests
                .iter()
                .map(|r| self.marker_samples(r, &tables))
                .collect()
        };
        let markers = self
            .marker_requests
            .iter()
            .map(|r| r.marker)
            .zip(marker_results)
            .map(|(m, samples)| samples.map(|s| (m, s)))
            .collect::<Result<BTreeMap<_, _>, Error>>()?;

        Ok(FlatScene::new(nodes, markers))
    }
}

/// Bake `request` from `graph` with default options.
pub fn bake(graph: &SceneGraph, request: &EvaluationObjects) -> Result<FlatScene, Error> {
    bake_with(graph, request, &BakeOptions::default())
}

/// Bake `request` from `graph`.
pub fn bake_with(
    graph: &SceneGraph,
    request: &EvaluationObjects,
    options: &BakeOptions,
) -> Result<FlatScene, Error> {
    let plan = BakePlan::new(graph, request)?;
    let flat = plan.execute(options)?;
    log::info!("{}", flat);
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{Attribute, Curve};
    use cgmath::{AbsDiffEq, Vector3};

    /// root animated in x and y, child offset by a fixed translation
    fn two_nodes() -> (SceneGraph, NodeId, NodeId) {
        let mut g = SceneGraph::new();
        let root = g.add_node("root", None).unwrap();
        let child = g.add_node("child", Some(root)).unwrap();
        {
            let t = &mut g.node_mut(root).unwrap().transform;
            t.translate[0] = Curve::from_keys(vec![(1.0, 0.0), (3.0, 10.0)]).unwrap().into();
            t.translate[1] = Attribute::driven(|f: f64| f * f);
        }
        g.node_mut(child).unwrap().transform = LocalTransform::from_translation(1.0, 2.0, 3.0);
        (g, root, child)
    }

    #[test]
    fn child_follows_root_translation() {
        let (g, root, child) = two_nodes();
        let mut request = EvaluationObjects::new();
        request.add_nodes(vec![root, child], &[1.0, 2.0, 3.0]);
        let flat = bake(&g, &request).unwrap();
        for &f in &[1.0, 2.0, 3.0] {
            let r = flat.position(root, f).unwrap();
            let c = flat.position(child, f).unwrap();
            assert!((c - r).abs_diff_eq(&Vector3::new(1.0, 2.0, 3.0), 1e-12));
        }
        assert_eq!(flat.position(root, 2.0), Some(Point3::new(5.0, 4.0, 0.0)));
    }

    #[test]
    fn child_follows_rotated_scaled_parent() {
        let (mut g, root, child) = two_nodes();
        {
            let t = &mut g.node_mut(root).unwrap().transform;
            t.rotate[2] = Attribute::Static(90.0);
            t.scale = [Attribute::Static(2.0), Attribute::Static(2.0), Attribute::Static(2.0)];
        }
        let mut request = EvaluationObjects::new();
        request.add_node(child, vec![1.0]);
        let flat = bake(&g, &request).unwrap();
        // (1, 2, 3) scaled by 2 and rotated 90 degrees around z, root at (0, 1, 0)
        let p = flat.position(child, 1.0).unwrap();
        assert!(p.abs_diff_eq(&Point3::new(-4.0, 3.0, 6.0), 1e-12));
        let s = flat.transform(child, 1.0).unwrap().scale();
        assert!(s.abs_diff_eq(&Vector3::new(2.0, 2.0, 2.0), 1e-12));
    }

    #[test]
    fn clamps_before_first_key() {
        let (g, root, _) = two_nodes();
        let mut request = EvaluationObjects::new();
        request.add_node(root, vec![-5.0, 1.0, 100.0]);
        let flat = bake(&g, &request).unwrap();
        assert_eq!(flat.position(root, -5.0).unwrap().x, 0.0);
        assert_eq!(flat.position(root, 1.0).unwrap().x, 0.0);
        assert_eq!(flat.position(root, 100.0).unwrap().x, 10.0);
    }

    #[test]
    fn only_requested_pairs_are_present() {
        let (g, root, child) = two_nodes();
        let mut request = EvaluationObjects::new();
        request.add_node(child, vec![3.0, 1.0, 3.0]);
        let flat = bake(&g, &request).unwrap();
        assert_eq!(flat.num_nodes(), 1);
        assert_eq!(flat.frames(child), Some(vec![1.0, 3.0]));
        assert!(flat.samples(root).is_none());
        assert!(flat.transform(child, 2.0).is_none());
    }

    #[test]
    fn cycles_fail() {
        let mut a = Node::new("a", Some(NodeId(1)));
        a.transform = LocalTransform::from_translation(1.0, 0.0, 0.0);
        let b = Node::new("b", Some(NodeId(0)));
        let g = SceneGraph::from_nodes(vec![a, b]);
        let mut request = EvaluationObjects::new();
        request.add_node(NodeId(0), vec![1.0]);
        for _ in 0..3 {
            match bake(&g, &request) {
                Err(Error::CyclicParent(n)) => assert_eq!(n, NodeId(0)),
                x => panic!("expected a cycle error, got {:?}", x),
            }
        }
    }

    #[test]
    fn structural_errors() {
        let (mut g, root, _) = two_nodes();
        let mut request = EvaluationObjects::new();
        request.add_node(NodeId(42), vec![1.0]);
        match bake(&g, &request) {
            Err(Error::UnknownNode(n)) => assert_eq!(n, NodeId(42)),
            x => panic!("expected unknown node, got {:?}", x),
        }

        let mut request = EvaluationObjects::new();
        request.add_node(root, vec![std::f64::NAN]);
        assert!(bake(&g, &request).is_err());

        let mut request = EvaluationObjects::new();
        request.add_marker(MarkerId(0), vec![1.0]);
        assert!(bake(&g, &request).is_err());

        // an animated channel without keys cannot be evaluated
        g.node_mut(root).unwrap().transform.rotate[0] = Curve::default().into();
        let mut request = EvaluationObjects::new();
        request.add_node(root, vec![1.0]);
        match bake(&g, &request) {
            Err(Error::NoKeys { attribute, .. }) => assert_eq!(attribute, "rx"),
            x => panic!("expected missing keys, got {:?}", x),
        }
    }

    #[test]
    fn non_finite_driver_fails_whole_bake() {
        let (mut g, root, child) = two_nodes();
        g.node_mut(child).unwrap().transform.scale[1] =
            Attribute::driven(|f: f64| if f > 2.0 { std::f64::NAN } else { 1.0 });
        let mut request = EvaluationObjects::new();
        request.add_node(root, vec![1.0, 2.0, 3.0]);
        request.add_node(child, vec![1.0, 2.0, 3.0]);
        match bake(&g, &request) {
            Err(Error::NonFiniteValue { attribute, frame, .. }) => {
                assert_eq!(attribute, "sy");
                assert_eq!(frame, 3.0);
            }
            x => panic!("expected a non-finite value, got {:?}", x),
        }
    }

    #[test]
    fn deterministic_and_serial_matches_parallel() {
        let (g, root, child) = two_nodes();
        let mut request = EvaluationObjects::new();
        let frames = crate::evaluation::frame_range(0.0, 50.0, 0.5).unwrap();
        request.add_nodes(vec![root, child], &frames);
        let a = bake(&g, &request).unwrap();
        let b = bake(&g, &request).unwrap();
        assert_eq!(a, b);
        let serial = BakeOptions {
            parallel: false,
            verbose: false,
        };
        assert_eq!(a, bake_with(&g, &request, &serial).unwrap());
    }

    #[test]
    fn plan_skips_unrequested_work() {
        let mut g = SceneGraph::new();
        let root = g.add_node("root", None).unwrap();
        let a = g.add_node("a", Some(root)).unwrap();
        let b = g.add_node("b", Some(root)).unwrap();
        let leaf = g.add_node("leaf", Some(a)).unwrap();
        let _unused = g.add_node("unused", None).unwrap();

        let mut request = EvaluationObjects::new();
        request.add_node(leaf, vec![1.0]).add_node(b, vec![2.0]);
        let plan = BakePlan::new(&g, &request).unwrap();
        assert_eq!(plan.frames(), &[1.0, 2.0]);
        assert_eq!(plan.nodes(), &[root, a, b, leaf]);
        // root, a, leaf at frame 1 and root, b at frame 2
        assert_eq!(plan.num_work_items(), 5);
        let groups = plan.work_items();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], vec![(root, 1.0), (root, 2.0)]);
        assert_eq!(groups[1], vec![(a, 1.0), (b, 2.0)]);
        assert_eq!(groups[2], vec![(leaf, 1.0)]);
    }

    /// camera at the origin looking down -z, bundle 10 units in front of it
    fn camera_scene() -> (SceneGraph, MarkerId, NodeId) {
        let mut g = SceneGraph::new();
        let cam_node = g.add_node("cam_tfm", None).unwrap();
        let camera = g.add_camera("cam", cam_node).unwrap();
        let bundle = g.add_node("bundle", None).unwrap();
        g.node_mut(bundle).unwrap().transform = LocalTransform::from_translation(1.8, 1.2, -10.0);
        {
            let c = g.camera_mut(camera).unwrap();
            c.focal_length = Attribute::Static(50.0);
            c.film_back_width = 36.0;
            c.film_back_height = 24.0;
            c.image_width = 1000.0;
            c.image_height = 500.0;
        }
        let marker = g.add_marker("mkr", camera, bundle).unwrap();
        {
            let m = g.marker_mut(marker).unwrap();
            // 50 * 1.8 / 10 / 36 = 0.25 and 50 * 1.2 / 10 / 24 = 0.25
            m.x.set_key(1.0, 0.25).unwrap();
            m.y.set_key(1.0, 0.25).unwrap();
            m.x.set_key(2.0, 0.26).unwrap();
        }
        (g, marker, cam_node)
    }

    #[test]
    fn marker_reprojection() {
        let (g, marker, _) = camera_scene();
        let mut request = EvaluationObjects::new();
        request.add_marker(marker, vec![1.0, 2.0]);
        let flat = bake(&g, &request).unwrap();
        assert_eq!(flat.num_nodes(), 0);

        let s = flat.marker_sample(marker, 1.0).unwrap();
        let r = s.reprojected.unwrap();
        assert!(r.abs_diff_eq(&Point2::new(0.25, 0.25), 1e-12));
        assert!(s.deviation.unwrap() < 1e-9);

        // 0.01 of a 1000 pixel wide image
        let s = flat.marker_sample(marker, 2.0).unwrap();
        assert!((s.deviation.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn marker_behind_camera_has_no_deviation() {
        let (mut g, marker, cam_node) = camera_scene();
        g.node_mut(cam_node).unwrap().transform.rotate[1] = Attribute::Static(180.0);
        let mut request = EvaluationObjects::new();
        request.add_marker(marker, vec![1.0]);
        let flat = bake(&g, &request).unwrap();
        let s = flat.marker_sample(marker, 1.0).unwrap();
        assert_eq!(s.reprojected, None);
        assert_eq!(s.deviation, None);
        assert_eq!(flat.average_deviation(), None);
    }

    #[test]
    fn marker_without_keys_fails() {
        let (mut g, marker, _) = camera_scene();
        g.marker_mut(marker).unwrap().y = Curve::default().into();
        let mut request = EvaluationObjects::new();
        request.add_marker(marker, vec![1.0]);
        match bake(&g, &request) {
            Err(Error::NoKeys { owner, attribute }) => {
                assert_eq!(owner, "mkr");
                assert_eq!(attribute, "y");
            }
            x => panic!("expected missing keys, got {:?}", x),
        }
    }

    #[test]
    fn replay_request_against_modified_graph() {
        let (mut g, root, child) = two_nodes();
        let mut request = EvaluationObjects::new();
        request.add_node(child, vec![1.0]);
        let before = bake(&g, &request).unwrap();
        g.node_mut(root).unwrap().transform.translate[2] = Attribute::Static(5.0);
        let after = bake(&g, &request).unwrap();
        assert_eq!(
            after.position(child, 1.0).unwrap() - before.position(child, 1.0).unwrap(),
            Vector3::new(0.0, 0.0, 5.0)
        );
    }
}
