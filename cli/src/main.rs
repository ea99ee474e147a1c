use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures_util::future::LocalBoxFuture;
use roomkit::assets::{AssetSource, Raster};
use roomkit::audio::SilentDevice;
use roomkit::camera::Camera;
use roomkit::collision::CollisionMask;
use roomkit::config::{EngineConfig, RunOptions};
use roomkit::draw::{Fill, Path, PatternId, Repeat, ResolvedStroke, Style, Surface, Transform, draw_ellipse};
use roomkit::engine::Engine;
use roomkit::entity::{Behavior, InstanceId, ObjectDef};
use roomkit::error::{AssetError, ConfigError, EngineError, SurfaceError};
use roomkit::geometry::{Point, Rect};
use roomkit::render::DrawFrame;
use roomkit::room::RoomDef;
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid definition: {0}")]
    Config(#[from] ConfigError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("draw failed: {0}")]
    Surface(#[from] SurfaceError),
    #[error("--fps must be positive, got {0}")]
    InvalidFps(f64),
}

#[derive(Parser, Debug)]
#[command(name = "roomkit-cli", about = "Run the roomkit demo room headless")]
struct Cli {
    /// Host frames to run.
    #[arg(long, default_value_t = 300)]
    frames: u32,

    /// Host frame rate.
    #[arg(long, default_value_t = 60.0)]
    fps: f64,

    /// Simulation steps per second for the demo room.
    #[arg(long, env = "ROOMKIT_ROOM_SPEED", default_value_t = 60)]
    speed: u32,

    /// Number of balls placed in the room.
    #[arg(long, default_value_t = 3)]
    balls: u32,

    /// Directory assets are read from.
    #[arg(long, env = "ROOMKIT_ASSETS", default_value = ".")]
    assets: PathBuf,

    /// Sleep between frames instead of running as fast as possible.
    #[arg(long)]
    realtime: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => println!("{summary}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    if !(cli.fps.is_finite() && cli.fps > 0.0) {
        return Err(CliError::InvalidFps(cli.fps));
    }
    let mut engine = Engine::new(EngineConfig::from_env(), Box::new(SilentDevice::new()));
    build_demo(&mut engine, cli.speed, cli.balls)?;
    engine.run_game(&DirSource { root: cli.assets.clone() }, RunOptions::default()).await?;

    let mut surface = NullSurface::default();
    let delta = Duration::from_secs_f64(1.0 / cli.fps);
    let mut steps = 0u64;
    for _ in 0..cli.frames {
        steps += u64::from(engine.frame(delta, &mut surface)?);
        if cli.realtime {
            tokio::time::sleep(delta).await;
        }
    }

    let bounces: u64 = engine
        .instances_of("ball")
        .into_iter()
        .filter_map(|id| engine.vars_get(id, "bounces").and_then(Value::as_u64))
        .sum();
    info!(frames = cli.frames, steps, bounces, "run complete");
    Ok(json!({
        "room": engine.current_room(),
        "frames": cli.frames,
        "steps": steps,
        "balls": engine.instance_count("ball"),
        "bounces": bounces,
        "fills": surface.fills,
        "images": surface.images,
    }))
}

// =============================================================
// Demo room
// =============================================================

const ROOM_W: f64 = 320.0;
const ROOM_H: f64 = 240.0;
const WALL: f64 = 8.0;
const BALL_RADIUS: f64 = 4.0;

fn build_demo(engine: &mut Engine, speed: u32, balls: u32) -> Result<(), ConfigError> {
    engine.create_object(ObjectDef::new("wall_h").with_mask(CollisionMask::rect(0.0, 0.0, ROOM_W, WALL)))?;
    engine.create_object(ObjectDef::new("wall_v").with_mask(CollisionMask::rect(0.0, 0.0, WALL, ROOM_H)))?;
    engine.create_object(ObjectDef::new("ball").with_mask(CollisionMask::circle(BALL_RADIUS)).with_behavior(Ball))?;

    let mut room = RoomDef::new("arena", ROOM_W, ROOM_H)
        .with_speed(speed)
        .with_background("#202028")
        .with_camera(Camera::new("main", Rect::new(0.0, 0.0, ROOM_W, ROOM_H)))
        .with_camera(
            Camera::new("overview", Rect::new(ROOM_W * 0.75, 0.0, ROOM_W * 0.25, ROOM_H * 0.25)).with_scale(0.25, 0.25),
        )
        .place("wall_h", 0.0, 0.0, 0.0)
        .place("wall_h", 0.0, ROOM_H - WALL, 0.0)
        .place("wall_v", 0.0, 0.0, 0.0)
        .place("wall_v", ROOM_W - WALL, 0.0, 0.0);
    for i in 0..balls {
        let n = f64::from(i);
        room = room.place_with("ball", 40.0 + n * 24.0, 40.0 + n * 16.0, 1.0, json!({ "vx": 2.0 + n * 0.5, "vy": 1.5 }));
    }
    engine.create_room(room)
}

struct Ball;

fn velocity(engine: &Engine, id: InstanceId) -> (f64, f64) {
    let get = |key| engine.vars_get(id, key).and_then(Value::as_f64).unwrap_or(0.0);
    (get("vx"), get("vy"))
}

impl Behavior for Ball {
    fn create(&self, engine: &mut Engine, id: InstanceId, props: &Value) {
        let vx = props.get("vx").and_then(Value::as_f64).unwrap_or(2.0);
        let vy = props.get("vy").and_then(Value::as_f64).unwrap_or(2.0);
        engine.vars_set(id, "vx", json!(vx));
        engine.vars_set(id, "vy", json!(vy));
        engine.vars_set(id, "bounces", json!(0));
    }

    fn step(&self, engine: &mut Engine, id: InstanceId) {
        let (mut vx, mut vy) = velocity(engine, id);
        let Some(ball) = engine.instance_mut(id) else {
            return;
        };
        ball.x += vx;
        ball.y += vy;

        let hit_h = !engine.objects_colliding(id, "wall_h").is_empty();
        let hit_v = !engine.objects_colliding(id, "wall_v").is_empty();
        if !(hit_h || hit_v) {
            return;
        }
        if let Some(ball) = engine.instance_mut(id) {
            ball.x -= vx;
            ball.y -= vy;
        }
        if hit_h {
            vy = -vy;
        }
        if hit_v {
            vx = -vx;
        }
        engine.vars_set(id, "vx", json!(vx));
        engine.vars_set(id, "vy", json!(vy));
        engine.vars_update(id, "bounces", |n| json!(n.as_u64().unwrap_or(0) + 1));
        debug!(ball = %id, vx, vy, "bounce");
    }

    fn draw(&self, frame: &mut DrawFrame<'_>, id: InstanceId) -> Result<(), SurfaceError> {
        let Some(ball) = frame.engine().instance(id) else {
            return Ok(());
        };
        draw_ellipse(frame.surface(), ball.position(), BALL_RADIUS, BALL_RADIUS, &Style::color("#f0c040"))
    }
}

// =============================================================
// Headless host
// =============================================================

/// Reads assets from a directory.
struct DirSource {
    root: PathBuf,
}

impl AssetSource for DirSource {
    fn fetch<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>, AssetError>> {
        Box::pin(async move {
            tokio::fs::read(self.root.join(path))
                .await
                .map_err(|e| AssetError::Fetch { path: path.to_owned(), message: e.to_string() })
        })
    }
}

/// Counts draw calls and discards them.
#[derive(Debug, Default)]
struct NullSurface {
    fills: u64,
    images: u64,
    patterns: u32,
}

impl Surface for NullSurface {
    fn save(&mut self) {}

    fn restore(&mut self) {}

    fn set_transform(&mut self, _t: Transform) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn transform(&mut self, _t: Transform) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn clip_rect(&mut self, _rect: Rect) {}

    fn clear(&mut self) {}

    fn set_alpha(&mut self, _alpha: f64) {}

    fn fill_path(&mut self, _path: &Path, _fill: &Fill, _fill_transform: Option<Transform>) -> Result<(), SurfaceError> {
        self.fills += 1;
        Ok(())
    }

    fn stroke_path(&mut self, _path: &Path, _stroke: &ResolvedStroke) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn fill_text(&mut self, _text: &str, _at: Point, _font: &str, _fill: &Fill) -> Result<(), SurfaceError> {
        self.fills += 1;
        Ok(())
    }

    fn stroke_text(&mut self, _text: &str, _at: Point, _font: &str, _stroke: &ResolvedStroke) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn draw_image(&mut self, _raster: &Raster, _src: Rect, _dst: Rect) -> Result<(), SurfaceError> {
        self.images += 1;
        Ok(())
    }

    fn create_pattern(&mut self, _raster: &Raster, _repeat: Repeat) -> Result<PatternId, SurfaceError> {
        self.patterns += 1;
        Ok(PatternId(self.patterns))
    }
}
