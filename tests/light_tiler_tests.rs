//! Light tiler integration tests.
//!
//! The headless cases run the CPU culling kernel; the wgpu cases run the WGSL
//! kernel and are skipped when no adapter is available.

mod common;

use common::{test_camera, Backend, TestContext};
use forward_plus::pipeline::light_culling::{CullerUniforms, TileFrustum};
use forward_plus::pipeline::{tile_count, LightTiler, MAX_LIGHTS, MAX_LIGHTS_PER_TILE, SPOT_LIGHT_BIT};
use forward_plus::scene::{Light, LightKind};
use glam::Vec3;
use rstest::rstest;

const WIDTH: u32 = 128;
const HEIGHT: u32 = 64;
const DEPTH: f32 = 20.0;

/// Deterministic light field in front of the camera
fn scattered_lights(count: usize) -> Vec<Light> {
    (0..count)
        .map(|i| {
            let f = i as f32;
            let position = Vec3::new((f * 1.7).sin() * 12.0, (f * 0.9).cos() * 6.0, -DEPTH + (f * 0.3).sin() * 4.0);
            if i % 3 == 0 {
                Light::spot(position, 1.5)
            } else {
                Light::point(position, 2.0)
            }
        })
        .collect()
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn tile_lists_match_reference(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, WIDTH, HEIGHT) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let camera = test_camera(WIDTH, HEIGHT);
    // Left half of the first tile column is empty, the rest sits at DEPTH
    let depth_target = ctx.depth_target(WIDTH, HEIGHT, |x, _| if x < 8 { 0.0 } else { DEPTH });
    let lights = scattered_lights(40);

    let mut tiler = LightTiler::new();
    tiler.init(&mut ctx.device).unwrap();
    let mut shader = LightTiler::load_shader(&mut ctx.device);
    assert!(shader.is_valid());

    tiler.set_lights(&lights);
    tiler.update_light_buffers(&mut ctx.device);
    tiler.cull_lights(
        &mut ctx.device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );
    let tiles = tiler.read_tile_light_lists(&mut ctx.device).unwrap();
    assert!(!ctx.device.error_check("cull_lights"));

    let (tiles_x, tiles_y) = tile_count(WIDTH, HEIGHT);
    assert_eq!(tiles.len(), (tiles_x * tiles_y) as usize);

    // Brute-force reference with the same tile math
    let uniforms = CullerUniforms {
        inv_projection: camera.projection_matrix().inverse(),
        view: camera.view_matrix(),
        window_width: WIDTH,
        window_height: HEIGHT,
        point_light_count: tiler.point_light_count(),
        spot_light_count: tiler.spot_light_count(),
    };
    let points: Vec<&Light> = lights.iter().filter(|l| l.kind == LightKind::Point).collect();
    let spots: Vec<&Light> = lights.iter().filter(|l| l.kind == LightKind::Spot).collect();

    let mut non_empty = 0;
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let frustum = TileFrustum::new(&uniforms, tx, ty, DEPTH, DEPTH);
            let visible = |light: &&Light| {
                let center = uniforms.view.transform_point3(light.position);
                frustum.intersects_sphere(center, light.radius)
            };
            let mut expected: Vec<u32> = (0u32..).zip(&points).filter(|(_, l)| visible(l)).map(|(i, _)| i).collect();
            expected.extend((0u32..).zip(&spots).filter(|(_, l)| visible(l)).map(|(i, _)| i | SPOT_LIGHT_BIT));

            let mut actual = tiles[(ty * tiles_x + tx) as usize].clone();
            // The GPU appends in arbitrary order within each kind
            let split = actual.iter().position(|i| i & SPOT_LIGHT_BIT != 0).unwrap_or(actual.len());
            assert!(actual[split..].iter().all(|i| i & SPOT_LIGHT_BIT != 0), "points must precede spots");
            actual[..split].sort_unstable();
            actual[split..].sort_unstable();

            assert_eq!(actual, expected, "tile ({}, {})", tx, ty);
            if !actual.is_empty() {
                non_empty += 1;
            }
        }
    }
    assert!(non_empty > 0);

    tiler.destroy_buffers(&mut ctx.device);
    shader.destroy(&mut ctx.device);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn counts_stay_within_capacity(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 32, 32) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let camera = test_camera(32, 32);
    let depth_target = ctx.depth_target(32, 32, |_, _| 10.0);
    let mut tiler = LightTiler::new();
    tiler.init(&mut ctx.device).unwrap();
    let mut shader = LightTiler::load_shader(&mut ctx.device);

    // Every light covers every tile
    for i in 0..MAX_LIGHTS as usize {
        tiler.set_point_light_position_and_radius(i, Vec3::new(0.0, 0.0, -10.0), 50.0);
        tiler.set_spot_light_position_and_radius(i, Vec3::new(0.0, 0.0, -10.0), 50.0);
    }
    tiler.update_light_buffers(&mut ctx.device);
    tiler.cull_lights(
        &mut ctx.device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );

    let tiles = tiler.read_tile_light_lists(&mut ctx.device).unwrap();
    assert_eq!(tiles.len(), 4);
    for tile in &tiles {
        assert_eq!(tile.len(), MAX_LIGHTS_PER_TILE as usize);
        assert!(tile.iter().all(|i| i & SPOT_LIGHT_BIT == 0), "point lights fill the tile first");
    }
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn empty_depth_yields_empty_tiles(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 48, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let camera = test_camera(48, 16);
    let depth_target = ctx.depth_target(48, 16, |_, _| 0.0);
    let mut tiler = LightTiler::new();
    tiler.init(&mut ctx.device).unwrap();
    let mut shader = LightTiler::load_shader(&mut ctx.device);

    tiler.set_lights(&[Light::point(Vec3::new(0.0, 0.0, -5.0), 100.0)]);
    tiler.update_light_buffers(&mut ctx.device);
    tiler.cull_lights(
        &mut ctx.device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );

    let tiles = tiler.read_tile_light_lists(&mut ctx.device).unwrap();
    assert_eq!(tiles.len(), 3);
    assert!(tiles.iter().all(Vec::is_empty));
}

#[test]
fn index_buffer_follows_target_size() {
    let mut ctx = TestContext::new(Backend::Headless, 1920, 1080).unwrap();
    let mut tiler = LightTiler::new();
    tiler.init(&mut ctx.device).unwrap();
    assert_eq!((tiler.num_tiles_x(), tiler.num_tiles_y()), (120, 68));

    let camera = test_camera(40, 40);
    let depth_target = ctx.depth_target(40, 40, |_, _| 5.0);
    let mut shader = LightTiler::load_shader(&mut ctx.device);
    tiler.set_point_light_position_and_radius(0, Vec3::new(0.0, 0.0, -5.0), 1.0);
    tiler.update_light_buffers(&mut ctx.device);
    tiler.cull_lights(
        &mut ctx.device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );

    assert_eq!((tiler.num_tiles_x(), tiler.num_tiles_y()), (3, 3));
    let tiles = tiler.read_tile_light_lists(&mut ctx.device).unwrap();
    assert_eq!(tiles.len(), 9);
    // The light sits in the middle of the screen
    assert_eq!(tiles[4], vec![0]);
}

#[test]
fn cull_before_init_is_ignored() {
    let mut ctx = TestContext::new(Backend::Headless, 32, 32).unwrap();
    let camera = test_camera(32, 32);
    let depth_target = ctx.depth_target(32, 32, |_, _| 1.0);
    let mut shader = LightTiler::load_shader(&mut ctx.device);
    let mut tiler = LightTiler::new();

    tiler.update_light_buffers(&mut ctx.device);
    tiler.cull_lights(
        &mut ctx.device,
        &mut shader,
        &camera.projection_matrix(),
        &camera.view_matrix(),
        &depth_target,
    );
    assert!(tiler.read_tile_light_lists(&mut ctx.device).is_err());
    assert!(!tiler.culler_uniforms_created());
}
