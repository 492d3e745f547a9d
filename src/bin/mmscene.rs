extern crate cgmath;
extern crate env_logger;
extern crate mmscene;
extern crate ply_rs;
extern crate structopt;

use cgmath::Point3;
use mmscene::io::*;
use mmscene::*;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Ply, Property, PropertyDef, PropertyType, ScalarType,
};
use ply_rs::writer::Writer;
use std::fs::File;
use std::io::BufWriter;
use std::str::FromStr;
use structopt::StructOpt;

/// Frames given as `start:end` or `start:end:step`.
#[derive(Debug, Clone)]
struct Frames(Vec<f64>);

impl FromStr for Frames {
    type Err = mmscene::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(':')
            .map(|x| {
                f64::from_str(x.trim())
                    .map_err(|_| Error::ParseError(format!("invalid frame {}", x)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [start, end] => frame_range(*start, *end, 1.0).map(Frames),
            [start, end, step] => frame_range(*start, *end, *step).map(Frames),
            _ => Err(Error::ParseError(format!(
                "expected start:end[:step], got {}",
                s
            ))),
        }
    }
}

#[derive(StructOpt, Debug)]
struct BakeOpt {
    /// Input scene description in .mms format.
    #[structopt(name = "SCENE", parse(from_os_str))]
    input: std::path::PathBuf,

    /// Output file. Will be output in binary format if the ending is .bflat, text if it is .txt.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: std::path::PathBuf,

    /// Frames to bake as <start>:<end>[:<step>]. Defaults to every whole frame between the first
    /// and last key in the scene.
    #[structopt(long = "frames", allow_hyphen_values = true)]
    frames: Option<Frames>,

    /// Node to bake. Can be repeated. If neither nodes nor markers are given, every node and
    /// marker in the scene is baked.
    #[structopt(long = "node")]
    nodes: Vec<String>,

    /// Marker to bake. Can be repeated.
    #[structopt(long = "marker")]
    markers: Vec<String>,

    /// Evaluate all frames on the current thread.
    #[structopt(long = "serial")]
    serial: bool,

    /// Show a progress bar.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

#[derive(StructOpt, Debug)]
struct PLYOpt {
    /// Input scene description in .mms format.
    #[structopt(name = "SCENE", parse(from_os_str))]
    input: std::path::PathBuf,

    /// Output file in .ply format.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: std::path::PathBuf,

    /// Frames to sample as <start>:<end>[:<step>]. Defaults to every whole frame between the
    /// first and last key in the scene.
    #[structopt(long = "frames", allow_hyphen_values = true)]
    frames: Option<Frames>,
}

#[derive(StructOpt, Debug)]
struct FitPlaneOpt {
    /// Input file with one `x y z` point per line.
    #[structopt(name = "FILE", parse(from_os_str))]
    input: std::path::PathBuf,
}

#[derive(StructOpt, Debug)]
struct FitLineOpt {
    /// Input file with one `x y` point per line.
    #[structopt(name = "FILE", parse(from_os_str))]
    input: std::path::PathBuf,
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "mmscene",
    about = "Bake match-move scenes and fit geometry to points."
)]
enum Opt {
    /// Bake node world transforms and marker reprojections to a flat file.
    Bake(BakeOpt),
    /// Write baked node trajectories to a .ply for visualization.
    PLY(PLYOpt),
    /// Fit a plane to 3D points.
    FitPlane(FitPlaneOpt),
    /// Fit a line to 2D points.
    FitLine(FitLineOpt),
}

fn scene_frames(graph: &SceneGraph, frames: Option<Frames>) -> Result<Vec<f64>, Error> {
    match frames {
        Some(Frames(f)) => Ok(f),
        None => {
            let (start, end) = graph.keyed_range().unwrap_or((1.0, 1.0));
            frame_range(start.floor(), end.ceil(), 1.0)
        }
    }
}

fn run_bake(opt: BakeOpt) -> Result<(), mmscene::Error> {
    let graph = SceneGraph::from_file(&opt.input)?;
    println!("{}", graph);
    let frames = scene_frames(&graph, opt.frames)?;

    let mut request = EvaluationObjects::new();
    if opt.nodes.is_empty() && opt.markers.is_empty() {
        request.add_nodes(graph.nodes().map(|(id, _)| id), &frames);
        for (id, _) in graph.markers() {
            request.add_marker(id, frames.iter().cloned());
        }
    } else {
        for name in &opt.nodes {
            let id = graph
                .find_node(name)
                .ok_or_else(|| Error::ParseError(format!("unknown node {}", name)))?;
            request.add_node(id, frames.iter().cloned());
        }
        for name in &opt.markers {
            let id = graph
                .find_marker(name)
                .ok_or_else(|| Error::ParseError(format!("unknown marker {}", name)))?;
            request.add_marker(id, frames.iter().cloned());
        }
    }

    let options = BakeOptions {
        parallel: !opt.serial,
        verbose: opt.verbose,
    };
    let flat = bake_with(&graph, &request, &options)?;
    println!("{}", flat);
    if let (Some(avg), Some(max)) = (flat.average_deviation(), flat.max_deviation()) {
        println!("Marker deviation: {:.3} px average, {:.3} px max", avg, max);
    }

    flat.write(&opt.out)
}

/// Write node trajectories out to a ply file. Camera nodes are red, other nodes are green.
/// Consecutive samples of each node are joined by an edge.
fn write_trajectories(
    path: &std::path::Path,
    graph: &SceneGraph,
    flat: &FlatScene,
) -> Result<(), std::io::Error> {
    let mut ply = Ply::<DefaultElement>::new();
    let mut point_element = ElementDef::new("vertex".to_string());
    for name in &["x", "y", "z"] {
        let p = PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float));
        point_element.properties.add(p);
    }
    for name in &["red", "green", "blue"] {
        let p = PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::UChar));
        point_element.properties.add(p);
    }
    ply.header.elements.add(point_element);
    let mut edge_element = ElementDef::new("edge".to_string());
    edge_element.properties.add(PropertyDef::new(
        "vertex1".to_string(),
        PropertyType::Scalar(ScalarType::Int),
    ));
    edge_element.properties.add(PropertyDef::new(
        "vertex2".to_string(),
        PropertyType::Scalar(ScalarType::Int),
    ));
    ply.header.elements.add(edge_element);

    let camera_nodes = graph.cameras().map(|(_, c)| c.node).collect::<Vec<_>>();

    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    for node in flat.nodes() {
        let color = if camera_nodes.contains(&node) {
            (255, 0, 0)
        } else {
            (0, 255, 0)
        };
        let samples = flat.samples(node).unwrap_or(&[]);
        for (i, sample) in samples.iter().enumerate() {
            let p: Point3<f64> = sample.transform.position();
            let mut v = DefaultElement::new();
            v.insert("x".to_string(), Property::Float(p.x as f32));
            v.insert("y".to_string(), Property::Float(p.y as f32));
            v.insert("z".to_string(), Property::Float(p.z as f32));
            v.insert("red".to_string(), Property::UChar(color.0));
            v.insert("green".to_string(), Property::UChar(color.1));
            v.insert("blue".to_string(), Property::UChar(color.2));
            vertices.push(v);

            if i > 0 {
                let mut e = DefaultElement::new();
                e.insert(
                    "vertex1".to_string(),
                    Property::Int((vertices.len() - 2) as i32),
                );
                e.insert(
                    "vertex2".to_string(),
                    Property::Int((vertices.len() - 1) as i32),
                );
                edges.push(e);
            }
        }
    }
    ply.payload.insert("vertex".to_string(), vertices);
    ply.payload.insert("edge".to_string(), edges);

    let mut file = BufWriter::new(File::create(path)?);
    let writer = Writer::new();
    writer.write_ply(&mut file, &mut ply).map(|_| ())
}

fn run_ply(opt: PLYOpt) -> Result<(), mmscene::Error> {
    let graph = SceneGraph::from_file(&opt.input)?;
    let frames = scene_frames(&graph, opt.frames)?;
    let mut request = EvaluationObjects::new();
    request.add_nodes(graph.nodes().map(|(id, _)| id), &frames);
    let flat = bake(&graph, &request)?;
    println!("{}", flat);
    write_trajectories(&opt.out, &graph, &flat)?;
    Ok(())
}

fn run_fit_plane(opt: FitPlaneOpt) -> Result<(), mmscene::Error> {
    let points = read_points3(&opt.input)?;
    let plane = fit_plane_to_points(&points)?;
    println!(
        "Plane through ({:.6}, {:.6}, {:.6}) with normal ({:.6}, {:.6}, {:.6})",
        plane.position.x,
        plane.position.y,
        plane.position.z,
        plane.normal.x,
        plane.normal.y,
        plane.normal.z
    );
    println!("RMS error: {:.6e}", plane.rms_error);
    Ok(())
}

fn run_fit_line(opt: FitLineOpt) -> Result<(), mmscene::Error> {
    let (x, y) = read_points2(&opt.input)?;
    let line = fit_line_to_points_type2(&x, &y)?;
    println!(
        "Line through ({:.6}, {:.6}) with direction ({:.6}, {:.6})",
        line.point.x, line.point.y, line.direction.x, line.direction.y
    );
    println!("Slope: {:.6}, angle: {:.6} rad", line.slope, line.angle);
    Ok(())
}

fn main() -> Result<(), mmscene::Error> {
    env_logger::init();
    match Opt::from_args() {
        Opt::Bake(opt) => run_bake(opt),
        Opt::PLY(opt) => run_ply(opt),
        Opt::FitPlane(opt) => run_fit_plane(opt),
        Opt::FitLine(opt) => run_fit_line(opt),
    }
}
