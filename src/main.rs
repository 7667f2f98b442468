use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sdf_streamlines::field::sdf::{capsule_sdf, ellipsoid_sdf, smooth_union, sphere_sdf, torus_sdf};
use sdf_streamlines::field::{Pt3, Vec3};
use sdf_streamlines::{
    load_grid, load_params, save_params, serialize_geometry_to_bytes, StreamlineParams,
    StreamlinePipeline, VoxelGrid,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_HALF_EXTENT: f32 = 1.5;

#[derive(Parser)]
#[command(name = "sdf-streamlines")]
#[command(about = "Curvature-aligned streamlines over signed distance fields")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    Sphere,
    Torus,
    Ellipsoid,
    /// Torus with a capsule threaded through its hole
    Blend,
}

impl Shape {
    fn distance(self, p: &Pt3) -> f32 {
        let center = Pt3::origin();
        match self {
            Shape::Sphere => sphere_sdf(p, &center, 1.0),
            Shape::Torus => torus_sdf(p, &center, 0.9, 0.35),
            Shape::Ellipsoid => ellipsoid_sdf(p, &center, &Vec3::new(1.2, 0.7, 0.9)),
            Shape::Blend => {
                let a = Pt3::new(0.0, -1.1, 0.0);
                let b = Pt3::new(0.0, 1.1, 0.0);
                smooth_union(
                    torus_sdf(p, &center, 0.9, 0.3),
                    capsule_sdf(p, &a, &b, 0.25),
                    0.2,
                )
            }
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build streamlines for a voxel grid described by a JSON descriptor
    Run {
        #[arg(short, long)]
        grid: PathBuf,
        #[arg(short, long)]
        params: Option<PathBuf>,
        #[arg(short, long, default_value = "strokes.bin")]
        out: PathBuf,
    },

    /// Build streamlines for an analytic shape
    Demo {
        #[arg(long, value_enum, default_value = "torus")]
        shape: Shape,
        #[arg(short, long, default_value = "64")]
        resolution: u32,
        #[arg(short, long)]
        params: Option<PathBuf>,
        #[arg(short, long, default_value = "strokes.bin")]
        out: PathBuf,
    },

    /// Write the default parameters as JSON
    InitParams {
        #[arg(short, long, default_value = "params.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { grid, params, out } => {
            let grid = load_grid(&grid)
                .with_context(|| format!("failed to load grid descriptor {}", grid.display()))?;
            build(grid, params.as_deref(), &out)
        }
        Commands::Demo {
            shape,
            resolution,
            params,
            out,
        } => {
            let grid = VoxelGrid::centered(resolution, DEMO_HALF_EXTENT, |p| shape.distance(p))?;
            build(grid, params.as_deref(), &out)
        }
        Commands::InitParams { output } => {
            save_params(&output, &StreamlineParams::default())?;
            info!("wrote default parameters to {}", output.display());
            Ok(())
        }
    }
}

fn build(grid: VoxelGrid, params: Option<&Path>, out: &Path) -> Result<()> {
    let params = match params {
        Some(path) => load_params(path)
            .with_context(|| format!("failed to load parameters {}", path.display()))?,
        None => StreamlineParams::default(),
    };

    let mut pipeline = StreamlinePipeline::new(params)?;
    pipeline.load_grid(grid);
    let geometry = pipeline.rebuild()?;

    std::fs::write(out, serialize_geometry_to_bytes(&geometry))
        .with_context(|| format!("failed to write {}", out.display()))?;

    let stats = pipeline.stats();
    info!(
        surface_points = stats.surface_points,
        poisson_points = stats.poisson_points,
        triangles = stats.triangles,
        "wrote {}",
        out.display()
    );
    println!("{}", serde_json::to_string_pretty(stats)?);

    Ok(())
}
