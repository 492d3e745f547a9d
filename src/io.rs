//! Text input: `.mms` scene descriptions and whitespace separated point lists.
//!
//! A scene description has one statement per line. `#` starts a comment. Names are any run of
//! non-whitespace characters and must be unique across nodes, cameras and markers.
//!
//! ```txt
//! node NAME [PARENT]              # add a node, parent must already exist
//! parent NAME PARENT              # reparent a node, `-` makes it a root
//! rotate_order NAME ORDER         # xyz, yzx, zxy, xzy, yxz or zyx
//! camera NAME NODE                # camera attached to a transform node
//! marker NAME CAMERA NODE         # marker of bundle NODE seen through CAMERA
//! set NAME ATTR VALUE             # constant value
//! key NAME ATTR FRAME VALUE       # add a key, turning the attribute into a curve
//! interp NAME ATTR linear|step    # interpolation of an attribute that already has keys
//! ```
//!
//! Node attributes are `tx ty tz rx ry rz sx sy sz` (rotations in degrees). Camera attributes are
//! `focal`, `film_back_width`, `film_back_height`, `image_width` and `image_height`; only
//! `focal` can be keyed. Marker attributes are `x` and `y`.

use cgmath::Point3;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1};
use nom::character::complete::{space0, space1};
use nom::combinator::{all_consuming, map, opt};
use nom::multi::count;
use nom::number::complete::double;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

use crate::curve::{Attribute, Interpolation};
use crate::scene::*;
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
enum Statement<'a> {
    Node(&'a str, Option<&'a str>),
    Parent(&'a str, &'a str),
    RotateOrder(&'a str, &'a str),
    Camera(&'a str, &'a str),
    Marker(&'a str, &'a str, &'a str),
    Set(&'a str, &'a str, f64),
    Key(&'a str, &'a str, f64, f64),
    Interp(&'a str, &'a str, &'a str),
}

fn word(input: &str) -> IResult<&str, &str> {
    preceded(space0, take_till1(|c: char| c.is_whitespace()))(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    preceded(space0, double)(input)
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), space1)
}

fn statement(input: &str) -> IResult<&str, Statement> {
    alt((
        map(preceded(keyword("node"), tuple((word, opt(word)))), |(n, p)| {
            Statement::Node(n, p)
        }),
        map(preceded(keyword("parent"), tuple((word, word))), |(n, p)| {
            Statement::Parent(n, p)
        }),
        map(preceded(keyword("rotate_order"), tuple((word, word))), |(n, o)| {
            Statement::RotateOrder(n, o)
        }),
        map(preceded(keyword("camera"), tuple((word, word))), |(n, t)| {
            Statement::Camera(n, t)
        }),
        map(
            preceded(keyword("marker"), tuple((word, word, word))),
            |(n, c, b)| Statement::Marker(n, c, b),
        ),
        map(
            preceded(keyword("set"), tuple((word, word, number))),
            |(n, a, v)| Statement::Set(n, a, v),
        ),
        map(
            preceded(keyword("key"), tuple((word, word, number, number))),
            |(n, a, f, v)| Statement::Key(n, a, f, v),
        ),
        map(
            preceded(keyword("interp"), tuple((word, word, word))),
            |(n, a, i)| Statement::Interp(n, a, i),
        ),
    ))(input)
}

/// Lines with content, numbered from 1, comments removed.
fn content_lines(input: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
    input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split('#').next().unwrap_or("").trim()))
        .filter(|(_, line)| !line.is_empty())
}

fn lookup_node(graph: &SceneGraph, name: &str) -> Result<NodeId, Error> {
    graph
        .find_node(name)
        .ok_or_else(|| Error::ParseError(format!("unknown node {}", name)))
}

/// A keyable attribute of a node, camera or marker.
fn attribute_mut<'g>(
    graph: &'g mut SceneGraph,
    owner: &str,
    attr: &str,
) -> Result<&'g mut Attribute, Error> {
    let unknown = || Error::ParseError(format!("{} has no keyable attribute {}", owner, attr));
    if let Some(id) = graph.find_node(owner) {
        let channel = TransformAttr::from_name(attr).ok_or_else(unknown)?;
        let node = graph.node_mut(id).ok_or(Error::UnknownNode(id))?;
        return Ok(node.transform.attribute_mut(channel));
    }
    if let Some(id) = graph.find_camera(owner) {
        let camera = graph.camera_mut(id).ok_or(Error::UnknownCamera(id))?;
        return match attr {
            "focal" => Ok(&mut camera.focal_length),
            _ => Err(unknown()),
        };
    }
    if let Some(id) = graph.find_marker(owner) {
        let marker = graph.marker_mut(id).ok_or(Error::UnknownMarker(id))?;
        return match attr {
            "x" => Ok(&mut marker.x),
            "y" => Ok(&mut marker.y),
            _ => Err(unknown()),
        };
    }
    Err(Error::ParseError(format!("unknown object {}", owner)))
}

fn set_value(graph: &mut SceneGraph, owner: &str, attr: &str, value: f64) -> Result<(), Error> {
    if let Some(camera) = graph.find_camera(owner).and_then(|id| graph.camera_mut(id)) {
        let field = match attr {
            "film_back_width" => Some(&mut camera.film_back_width),
            "film_back_height" => Some(&mut camera.film_back_height),
            "image_width" => Some(&mut camera.image_width),
            "image_height" => Some(&mut camera.image_height),
            _ => None,
        };
        if let Some(field) = field {
            *field = value;
            return Ok(());
        }
    }
    attribute_mut(graph, owner, attr)?.set_value(value);
    Ok(())
}

fn apply(graph: &mut SceneGraph, statement: Statement) -> Result<(), Error> {
    match statement {
        Statement::Node(name, parent) => {
            let parent = match parent {
                Some(p) => Some(lookup_node(graph, p)?),
                None => None,
            };
            graph.add_node(name, parent)?;
        }
        Statement::Parent(name, parent) => {
            let node = lookup_node(graph, name)?;
            let parent = match parent {
                "-" => None,
                p => Some(lookup_node(graph, p)?),
            };
            graph.set_parent(node, parent)?;
        }
        Statement::RotateOrder(name, order) => {
            let node = lookup_node(graph, name)?;
            let order: RotateOrder = order.parse()?;
            if let Some(n) = graph.node_mut(node) {
                n.transform.rotate_order = order;
            }
        }
        Statement::Camera(name, node) => {
            let node = lookup_node(graph, node)?;
            graph.add_camera(name, node)?;
        }
        Statement::Marker(name, camera, bundle) => {
            let camera = graph
                .find_camera(camera)
                .ok_or_else(|| Error::ParseError(format!("unknown camera {}", camera)))?;
            let bundle = lookup_node(graph, bundle)?;
            graph.add_marker(name, camera, bundle)?;
        }
        Statement::Set(name, attr, value) => set_value(graph, name, attr, value)?,
        Statement::Key(name, attr, frame, value) => {
            attribute_mut(graph, name, attr)?.set_key(frame, value)?
        }
        Statement::Interp(name, attr, interp) => {
            let interp: Interpolation = interp.parse()?;
            if !attribute_mut(graph, name, attr)?.set_interpolation(interp) {
                return Err(Error::ParseError(format!(
                    "{} {} has no keys to interpolate, key it before interp",
                    name, attr
                )));
            }
        }
    }
    Ok(())
}

/// Build a scene graph from the text of a scene description.
pub fn parse_scene(input: &str) -> Result<SceneGraph, Error> {
    let mut graph = SceneGraph::new();
    for (n, line) in content_lines(input) {
        let (_, stmt) = all_consuming(terminated(statement, space0))(line)
            .map_err(|_| Error::ParseError(format!("line {}: cannot parse `{}`", n, line)))?;
        apply(&mut graph, stmt).map_err(|e| Error::ParseError(format!("line {}: {}", n, e)))?;
    }
    Ok(graph)
}

impl SceneGraph {
    /// Read a scene description (`.mms`) from a file.
    pub fn from_file(path: &Path) -> Result<SceneGraph, Error> {
        match path.extension().and_then(|x| x.to_str()) {
            Some("mms") => {
                let mut file = File::open(path)?;
                let mut contents = String::new();
                file.read_to_string(&mut contents)?;
                let graph = parse_scene(&contents)?;
                log::debug!("read {} from {:?}", graph, path);
                Ok(graph)
            }
            ext => Err(Error::IOError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown file extension {:?}", ext),
            ))),
        }
    }
}

/// Rows of exactly `columns` numbers, one row per line.
pub fn parse_rows(input: &str, columns: usize) -> Result<Vec<Vec<f64>>, Error> {
    content_lines(input)
        .map(|(n, line)| {
            all_consuming(terminated(count(number, columns), space0))(line)
                .map(|(_, row)| row)
                .map_err(|_| {
                    Error::ParseError(format!("line {}: expected {} numbers", n, columns))
                })
        })
        .collect()
}

fn read_rows(path: &Path, columns: usize) -> Result<Vec<Vec<f64>>, Error> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    parse_rows(&contents, columns)
}

/// Read 3D points, one `x y z` per line.
pub fn read_points3(path: &Path) -> Result<Vec<Point3<f64>>, Error> {
    Ok(read_rows(path, 3)?
        .into_iter()
        .map(|r| Point3::new(r[0], r[1], r[2]))
        .collect())
}

/// Read 2D points, one `x y` per line, as separate coordinate lists.
pub fn read_points2(path: &Path) -> Result<(Vec<f64>, Vec<f64>), Error> {
    Ok(read_rows(path, 2)?.into_iter().map(|r| (r[0], r[1])).unzip())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = "
# a camera looking at a bundle
node world
node cam_tfm world
node bundle world    # trailing comment
rotate_order cam_tfm zxy
set bundle tz -10
key world tx 1 0
key world tx 3 4.5
interp world tx step
camera cam cam_tfm
set cam focal 50
set cam image_width 1000
marker mkr cam bundle
key mkr x 1 0.25
key mkr y 1 -1e-1
";

    #[test]
    fn parse_full_scene() {
        let g = parse_scene(SCENE).unwrap();
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_cameras(), 1);
        assert_eq!(g.num_markers(), 1);

        let world = g.find_node("world").unwrap();
        let cam_tfm = g.node(g.find_node("cam_tfm").unwrap()).unwrap();
        assert_eq!(cam_tfm.parent, Some(world));
        assert_eq!(cam_tfm.transform.rotate_order, RotateOrder::ZXY);

        let tx = &g.node(world).unwrap().transform.translate[0];
        assert_eq!(tx.evaluate(2.0), Some(0.0));
        assert_eq!(tx.evaluate(3.0), Some(4.5));

        let cam = g.camera(g.find_camera("cam").unwrap()).unwrap();
        assert_eq!(cam.focal_length.evaluate(7.0), Some(50.0));
        assert_eq!(cam.image_width, 1000.0);
        assert_eq!(cam.film_back_width, 36.0);

        let mkr = g.marker(g.find_marker("mkr").unwrap()).unwrap();
        assert_eq!(mkr.y.evaluate(1.0), Some(-0.1));
    }

    #[test]
    fn reparent_and_unparent() {
        let g = parse_scene("node a\nnode b a\nnode c\nparent b c\nparent c -\n").unwrap();
        let b = g.node(g.find_node("b").unwrap()).unwrap();
        assert_eq!(b.parent, g.find_node("c"));
    }

    #[test]
    fn errors_name_the_line() {
        let err = |s: &str| match parse_scene(s) {
            Err(Error::ParseError(msg)) => msg,
            x => panic!("expected a parse error, got {:?}", x),
        };
        assert!(err("node a\nnode b missing\n").starts_with("line 2:"));
        assert!(err("node a\nfrobnicate a\n").starts_with("line 2:"));
        assert!(err("node a\nnode b a\nparent a b\n").contains("cycle"));
        assert!(err("node a\nnode a\n").contains("duplicate"));
        assert!(err("node a\nset a qx 1\n").starts_with("line 2:"));
        assert!(err("node a\nkey a tx one 1\n").starts_with("line 2:"));
        assert!(err("node a\ncamera c a\nkey c image_width 1 2\n").starts_with("line 3:"));
        assert!(err("node a\ninterp a tx cubic\n").contains("cubic"));
    }

    #[test]
    fn interp_needs_keys() {
        let msg = match parse_scene("node a\nset a tx 5\ninterp a tx step\n") {
            Err(Error::ParseError(msg)) => msg,
            x => panic!("interp on a static attribute should fail, got {:?}", x),
        };
        assert!(msg.starts_with("line 3:"));
        assert!(msg.contains("no keys"));

        let g = parse_scene("node a\nkey a tx 1 5\nkey a tx 3 9\ninterp a tx step\n").unwrap();
        let a = g.node(g.find_node("a").unwrap()).unwrap();
        let tx = a.transform.attribute(TransformAttr::TranslateX);
        assert_eq!(tx.evaluate(2.0), Some(5.0));
    }

    #[test]
    fn rows() {
        let rows = parse_rows("1 2 3\n# skip\n\n 4.5 -6 7e1 \n", 3).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.5, -6.0, 70.0]]);
        assert!(parse_rows("1 2\n", 3).is_err());
        assert!(parse_rows("1 2 3 4\n", 3).is_err());
    }

    #[test]
    fn read_point_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.txt");
        std::fs::write(&path, "0 0\n1 2\n2 4\n").unwrap();
        let (x, y) = read_points2(&path).unwrap();
        assert_eq!(x, vec![0.0, 1.0, 2.0]);
        assert_eq!(y, vec![0.0, 2.0, 4.0]);
        assert!(read_points3(&path).is_err());
        assert!(SceneGraph::from_file(&path).is_err());
    }
}
