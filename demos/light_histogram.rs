//! Culls a random light field against a synthetic depth buffer and prints how
//! many lights land in each tile.
//!
//! Run with:
//!   cargo run --example light_histogram
//!   cargo run --example light_histogram -- --backend wgpu --lights 1500 --width 1920 --height 1080

use clap::Parser;
use forward_plus::backend::types::TextureFormat;
use forward_plus::pipeline::{MAX_LIGHTS_PER_TILE, SPOT_LIGHT_BIT};
use forward_plus::resources::RenderTexture;
use forward_plus::scene::{Camera, Light};
use forward_plus::{BackendType, EngineConfig, GfxDevice, LightTiler};
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU kernels, no GPU required
    #[default]
    Headless,
    /// wgpu on the native API
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(name = "light_histogram", about = "Per-tile light counts of the Forward+ culler")]
struct Args {
    #[arg(long, value_enum, default_value_t = CliBackend::Headless)]
    backend: CliBackend,

    /// Native API for the wgpu backend (vulkan, metal, dx12, gl)
    #[arg(long)]
    api: Option<String>,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Lights to scatter, split evenly between point and spot lights
    #[arg(long, default_value_t = 256)]
    lights: usize,

    #[arg(long, default_value_t = 1.5)]
    radius: f32,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// xorshift64*, enough to scatter lights reproducibly
struct Rng(u64);

impl Rng {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        let bits = self.0.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 40;
        bits as f32 / (1u64 << 24) as f32
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

fn create_device(args: &Args) -> Result<GfxDevice, Box<dyn std::error::Error>> {
    let device = match args.backend {
        CliBackend::Headless => GfxDevice::headless(args.width, args.height)?,
        CliBackend::Wgpu => {
            let mut config = EngineConfig {
                width: args.width,
                height: args.height,
                ..Default::default()
            }
            .with_env_overrides();
            if let Some(api) = &args.api {
                config.backend = BackendType::from_name(api).ok_or(format!("unknown API '{}'", api))?;
            }
            GfxDevice::from_config(&config)?
        }
    };
    Ok(device)
}

/// Floor plane at y = -2 seen from eye height, sky above the horizon
fn floor_depth(camera: &Camera, width: u32, height: u32) -> Vec<f32> {
    let inv_view_projection = (camera.projection_matrix() * camera.view_matrix()).inverse();
    let mut texels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
            let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
            let far = inv_view_projection.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
            let direction = (far - camera.position).normalize();
            let depth = if direction.y < -1e-4 {
                let t = (-2.0 - camera.position.y) / direction.y;
                camera.linear_depth(camera.position + direction * t)
            } else {
                0.0
            };
            texels.extend_from_slice(&[depth, 0.0, 0.0, 1.0]);
        }
    }
    texels
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    forward_plus::init_logging();
    let args = Args::parse();

    let mut device = create_device(&args)?;
    log::info!("Backend: {}", device.backend().name());

    let camera = Camera::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, -0.3, -1.0)).with_viewport(args.width, args.height);
    let depth_target = RenderTexture::new(
        &mut device,
        "Depth Normals",
        args.width,
        args.height,
        TextureFormat::Rgba32Float,
        false,
    )?;
    depth_target.write_pixels(&mut device, bytemuck::cast_slice(&floor_depth(&camera, args.width, args.height)));

    let mut rng = Rng(args.seed.max(1));
    let lights: Vec<Light> = (0..args.lights)
        .map(|i| {
            let position = Vec3::new(rng.range(-30.0, 30.0), -2.0 + rng.range(0.0, 1.0), -rng.range(2.0, 60.0));
            if i % 2 == 0 {
                Light::point(position, args.radius)
            } else {
                Light::spot(position, args.radius)
            }
        })
        .collect();

    let mut tiler = LightTiler::new();
    tiler.init(&mut device)?;
    let mut shader = LightTiler::load_shader(&mut device);

    tiler.set_lights(&lights);
    tiler.update_light_buffers(&mut device);
    tiler.cull_lights(
        &mut device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );
    let tiles = tiler.read_tile_light_lists(&mut device)?;
    device.error_check("light_histogram");

    println!(
        "{} x {} tiles, {} point + {} spot lights",
        tiler.num_tiles_x(),
        tiler.num_tiles_y(),
        tiler.point_light_count(),
        tiler.spot_light_count()
    );

    // Buckets of 4 lights, the last one catches everything above
    const BUCKETS: usize = 16;
    let mut histogram = [0usize; BUCKETS];
    let mut spot_total = 0;
    for tile in &tiles {
        histogram[(tile.len() / 4).min(BUCKETS - 1)] += 1;
        spot_total += tile.iter().filter(|index| *index & SPOT_LIGHT_BIT != 0).count();
    }
    let widest = histogram.iter().copied().max().unwrap_or(1).max(1);
    for (bucket, count) in histogram.iter().enumerate() {
        let label = if bucket == BUCKETS - 1 {
            format!("{:>3}+    ", bucket * 4)
        } else {
            format!("{:>3}-{:<3} ", bucket * 4, bucket * 4 + 3)
        };
        println!("{}{:>6} {}", label, count, "#".repeat(count * 50 / widest));
    }

    let full = tiles.iter().filter(|tile| tile.len() == MAX_LIGHTS_PER_TILE as usize).count();
    println!("{} spot entries, {} saturated tiles", spot_total, full);

    tiler.destroy_buffers(&mut device);
    shader.destroy(&mut device);
    Ok(())
}
