use std::{num::NonZeroU32, num::NonZeroUsize, path::PathBuf, time::Instant};

use anyhow::{Context as _, bail};
use clap::{Parser, ValueEnum};
use indicatif::ProgressBar;
use itertools::Itertools as _;
use raybatch::{
    Arena, EngineConfig, ExecutionPolicy, IntersectionRecord, QueryEngine, RayRecord, Scene,
    SphericalProbe, WorkerCount, geometry::WorldPoint,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "raybatch-cli")]
#[command(about = "Cast a spherical probe against a Wavefront OBJ scene", long_about = None)]
struct Cli {
    /// OBJ file to load
    obj: PathBuf,

    /// Probe center as x,y,z
    #[arg(long, default_value = "0,0,0", value_parser = parse_point)]
    center: WorldPoint,

    /// Number of steps along both probe angles
    #[arg(long, default_value_t = NonZeroU32::new(512).unwrap_or(NonZeroU32::MIN))]
    resolution: NonZeroU32,

    /// Maximal hit distance
    #[arg(long, default_value_t = 10.0)]
    range: f32,

    #[arg(long, value_enum, default_value_t = Policy::Vectorized)]
    policy: Policy,

    /// Worker threads, one per CPU if not set
    #[arg(long)]
    workers: Option<NonZeroUsize>,

    /// Rays submitted per run call
    #[arg(long, default_value_t = NonZeroUsize::new(65536).unwrap_or(NonZeroUsize::MIN))]
    batch: NonZeroUsize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Policy {
    Scalar,
    Vectorized,
}

impl From<Policy> for ExecutionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Scalar => ExecutionPolicy::Scalar,
            Policy::Vectorized => ExecutionPolicy::Vectorized,
        }
    }
}

fn parse_point(s: &str) -> anyhow::Result<WorldPoint> {
    let coords: Vec<f32> = s
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid coordinate in {s:?}"))?;
    let [x, y, z] = coords[..] else {
        bail!("expected three comma separated coordinates, got {s:?}");
    };
    Ok(WorldPoint::new(x, y, z))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let arena = Arena::new();
    let mut scene = Scene::new(&arena);
    let geometries = scene
        .append_obj(&cli.obj, 0)
        .with_context(|| format!("loading {}", cli.obj.display()))?;
    println!(
        "Loaded {} geometries, {} triangles, {} vertices",
        geometries.len(),
        scene.triangle_count(),
        scene.vertex_count()
    );

    let config = EngineConfig::builder()
        .workers(cli.workers.map_or(WorkerCount::Auto, WorkerCount::Manual))
        .build();
    let mut engine = QueryEngine::with_config(&arena, config);
    let build_start = Instant::now();
    engine.setup(&mut scene)?;
    println!("Built in {:.2?}", build_start.elapsed());
    if let Some(bvh) = engine.bvh() {
        println!("{}", bvh.statistics());
    }

    let probe = SphericalProbe::builder()
        .center(cli.center)
        .resolution(cli.resolution)
        .range(cli.range)
        .build();
    let policy = ExecutionPolicy::from(cli.policy);

    let bar = ProgressBar::new(probe.ray_count() as u64);
    let mut rays: Vec<RayRecord> = Vec::with_capacity(cli.batch.get());
    let mut intersections = Vec::with_capacity(cli.batch.get());
    let mut hit_count = 0usize;
    let mut distances: Option<(f32, f32)> = None;

    let cast_start = Instant::now();
    for chunk in &probe.rays().chunks(cli.batch.get()) {
        rays.clear();
        rays.extend(chunk);
        intersections.clear();
        intersections.resize(rays.len(), IntersectionRecord::MISS);

        engine.run(&rays, &mut intersections, policy)?;

        let hits = intersections.iter().filter(|record| record.is_hit());
        hit_count += hits.clone().count();
        let batch_distances = hits.map(|record| record.t).minmax_by(f32::total_cmp);
        if let Some((closest, farthest)) = batch_distances.into_option() {
            distances = Some(distances.map_or((closest, farthest), |(a, b)| {
                (a.min(closest), b.max(farthest))
            }));
        }
        bar.inc(rays.len() as u64);
    }
    let cast_time = cast_start.elapsed();
    bar.finish_and_clear();

    println!("Hits: {hit_count} / {}", probe.ray_count());
    if let Some((closest, farthest)) = distances {
        println!("Closest hit: {closest}, farthest hit: {farthest}");
    }
    println!(
        "Cast {} rays in {:.2?} ({:.2} Mrays/s)",
        probe.ray_count(),
        cast_time,
        probe.ray_count() as f64 / cast_time.as_secs_f64().max(f64::EPSILON) / 1e6
    );

    engine.release();
    Ok(())
}
