//! End-to-end scenarios: small packed scenes rendered through the public
//! driver, checking the radiometric and bookkeeping contracts.

use candela::compile::SceneBuilder;
use candela::{render_pass, Film, Image, RenderMode, ToneMapper};
use glam::{Mat4, Vec3};
use image::{DynamicImage, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use scene_tables::SceneTables;

fn cornell_box(resolution: u32) -> SceneTables {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, -3.0),
        Vec3::ZERO,
        Vec3::Y,
        45f32.to_radians(),
        45f32.to_radians(),
        resolution,
        resolution,
    );

    let white = builder.matte_from_color(Vec3::splat(0.73));
    let red = builder.matte_from_color(Vec3::new(0.65, 0.05, 0.05));
    let green = builder.matte_from_color(Vec3::new(0.12, 0.45, 0.15));

    let floor = builder.plane(
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(0.0, -1.0, 1.0),
    );
    builder.primitive(floor, white, Mat4::IDENTITY);
    let ceiling = builder.plane(
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 0.0),
    );
    builder.primitive(ceiling, white, Mat4::IDENTITY);
    let back = builder.plane(
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
    );
    builder.primitive(back, white, Mat4::IDENTITY);
    let left = builder.plane(
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 1.0),
        Vec3::new(-1.0, 1.0, 0.0),
    );
    builder.primitive(left, red, Mat4::IDENTITY);
    let right = builder.plane(
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 1.0),
    );
    builder.primitive(right, green, Mat4::IDENTITY);

    let sphere = builder.sphere(Vec3::new(-0.35, -0.6, 0.3), 0.4);
    builder.primitive(sphere, white, Mat4::IDENTITY);

    builder.emissive_triangle(
        Vec3::new(-0.3, 0.99, -0.3),
        Vec3::new(0.3, 0.99, -0.3),
        Vec3::new(0.0, 0.99, 0.3),
        Vec3::new(17.0, 12.0, 4.0),
        false,
        white,
    );
    builder.build()
}

fn solid_environment(red: u8, green: u8, blue: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_raw(1, 1, vec![red, green, blue]).unwrap())
}

// One path-traced sample through the Cornell box produces finite,
// strictly positive radiance and exactly one film sample.
#[test]
fn cornell_box_single_sample_is_positive_and_counted() {
    let tables = cornell_box(64);
    let mut film = Film::new(64, 64);
    render_pass(&tables, RenderMode::default(), 0, &mut film).unwrap();

    let cell = film.cell(32, 32);
    assert_eq!(cell.sample_count, 1);
    assert!(cell.color.is_finite());
    assert!(cell.color.x > 0.0 && cell.color.y > 0.0 && cell.color.z > 0.0);
}

// A mirror sphere at normal incidence bounces the ray straight back
// into a solid red environment; throughput survives intact.
#[test]
fn environment_miss_carries_full_throughput() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, -10.0),
        Vec3::ZERO,
        Vec3::Y,
        20f32.to_radians(),
        20f32.to_radians(),
        9,
        9,
    );
    let mirror = builder.mirror_from_color(Vec3::ONE);
    let sphere = builder.sphere(Vec3::ZERO, 0.5);
    builder.primitive(sphere, mirror, Mat4::IDENTITY);
    let environment = solid_environment(255, 0, 0);
    builder.ldr_image_light(&environment, 0.0, glam::Vec2::ONE);
    let tables = builder.build();

    let mut film = Film::new(9, 9);
    render_pass(&tables, RenderMode::default(), 0, &mut film).unwrap();
    let center = film.cell(4, 4).color;
    assert!(center.x > 0.99, "expected full red throughput, got {center}");
    assert!(center.y < 1e-3 && center.z < 1e-3);
}

// Two parallel perfect mirrors trap the ray; the kernel must still
// terminate within the bounce cap and collect nothing.
#[test]
fn parallel_mirrors_terminate_within_bounce_cap() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, 0.5),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::Y,
        30f32.to_radians(),
        30f32.to_radians(),
        5,
        5,
    );
    let mirror = builder.mirror_from_color(Vec3::ONE);
    let near = builder.plane(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    );
    builder.primitive(near, mirror, Mat4::IDENTITY);
    let far = builder.plane(
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
    );
    builder.primitive(far, mirror, Mat4::IDENTITY);
    let tables = builder.build();

    let mut film = Film::new(5, 5);
    render_pass(&tables, RenderMode::default(), 0, &mut film).unwrap();
    let cell = film.cell(2, 2);
    assert_eq!(cell.sample_count, 1);
    assert!(cell.color.is_finite());
    assert_eq!(cell.color, Vec3::ZERO);
}

// Ambient occlusion over a lone ground plane sees the whole upper
// hemisphere; the estimator must come out at exactly one.
#[test]
fn ambient_occlusion_over_open_plane_is_one() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 2.0, -1.0),
        Vec3::new(0.0, 0.0, 0.5),
        Vec3::Y,
        40f32.to_radians(),
        40f32.to_radians(),
        8,
        8,
    );
    let matte = builder.matte_from_color(Vec3::splat(0.5));
    let ground = builder.plane(Vec3::ZERO, Vec3::X, Vec3::Z);
    builder.primitive(ground, matte, Mat4::IDENTITY);
    let tables = builder.build();

    let mode = RenderMode::AmbientOcclusion {
        maximum_distance: 10.0,
        samples: 4,
    };
    let mut film = Film::new(8, 8);
    render_pass(&tables, mode, 0, &mut film).unwrap();
    for y in 0..8 {
        for x in 0..8 {
            let cell = film.cell(x, y);
            assert_eq!(cell.sample_count, 1);
            assert_eq!(cell.color, Vec3::ONE, "pixel ({x},{y}) saw occlusion");
        }
    }
}

// Reinhard stays monotonic through the full image pipeline.
#[test]
fn tone_mapping_preserves_channel_order() {
    let mut film = Film::new(2, 1);
    film.add_color(0, Vec3::new(0.4, 0.2, 0.2));
    film.add_color(1, Vec3::new(2.5, 0.2, 0.2));
    let mut image = Image::new(2, 1);
    image.begin(&film);
    image.tone_map(ToneMapper::Reinhard, 1.0);
    image.redo_gamma_correction();
    assert!(image.pixel(0, 0).x < image.pixel(1, 0).x);
    let bytes = image.end();
    assert!(bytes[0] < bytes[4]);
    assert_eq!(bytes[3], 255);
    assert_eq!(bytes[7], 255);
}

// The moving mean neither drifts nor loses count.
#[test]
fn film_mean_is_stable_over_many_identical_samples() {
    let mut film = Film::new(1, 1);
    let color = Vec3::new(0.123, 0.456, 0.789);
    for _ in 0..10_000 {
        film.add_color(0, color);
    }
    let cell = film.cell(0, 0);
    assert_eq!(cell.sample_count, 10_000);
    assert!((cell.color - color).abs().max_element() < 1e-5);
}

// Identical (scene, mode, pass, flags) must produce bitwise identical
// output regardless of how rayon schedules the work items.
#[test]
fn passes_are_deterministic_across_schedules() {
    let tables = cornell_box(32);
    let mut first = Film::new(32, 32);
    let mut second = Film::new(32, 32);
    for pass in 0..3 {
        render_pass(&tables, RenderMode::default(), pass, &mut first).unwrap();
        render_pass(&tables, RenderMode::default(), pass, &mut second).unwrap();
    }

    let mut first_image = Image::new(32, 32);
    let mut second_image = Image::new(32, 32);
    first_image.begin(&first);
    second_image.begin(&second);
    first_image.tone_map(ToneMapper::FilmicAcesModifiedV1, 1.0);
    second_image.tone_map(ToneMapper::FilmicAcesModifiedV1, 1.0);
    first_image.redo_gamma_correction();
    second_image.redo_gamma_correction();
    assert_eq!(first_image.end(), second_image.end());
}

// The film clear flag covers exactly one pass: the first pass after it
// restarts every cell at count one.
#[test]
fn clear_flag_restarts_accumulation() {
    let tables = cornell_box(16);
    let mut film = Film::new(16, 16);
    render_pass(&tables, RenderMode::default(), 0, &mut film).unwrap();
    render_pass(&tables, RenderMode::default(), 1, &mut film).unwrap();
    assert_eq!(film.cell(8, 8).sample_count, 2);

    film.set_clear_flag(true);
    render_pass(&tables, RenderMode::default(), 2, &mut film).unwrap();
    assert_eq!(film.cell(8, 8).sample_count, 1);
    render_pass(&tables, RenderMode::default(), 3, &mut film).unwrap();
    assert_eq!(film.cell(8, 8).sample_count, 2);
}

// A fisheye camera rejects corner samples outside the unit disk; those
// film cells stay untouched.
#[test]
fn fisheye_rejection_leaves_film_untouched() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, -3.0),
        Vec3::ZERO,
        Vec3::Y,
        90f32.to_radians(),
        90f32.to_radians(),
        32,
        32,
    );
    builder.set_fisheye();
    let matte = builder.matte_from_color(Vec3::splat(0.5));
    let sphere = builder.sphere(Vec3::ZERO, 1.0);
    builder.primitive(sphere, matte, Mat4::IDENTITY);
    let tables = builder.build();

    let mut film = Film::new(32, 32);
    render_pass(&tables, RenderMode::default(), 0, &mut film).unwrap();
    assert_eq!(film.cell(0, 0).sample_count, 0);
    assert_eq!(film.cell(31, 31).sample_count, 0);
    assert_eq!(film.cell(16, 16).sample_count, 1);
}

// White furnace: a matte sphere of albedo 0.8 inside a uniform white
// environment must converge to 0.8 (the classic energy-conservation
// check, run across many passes).
#[test]
fn furnace_test_converges_to_albedo() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, -4.0),
        Vec3::ZERO,
        Vec3::Y,
        10f32.to_radians(),
        10f32.to_radians(),
        4,
        4,
    );
    let matte = builder.matte_from_color(Vec3::splat(0.8));
    let sphere = builder.sphere(Vec3::ZERO, 1.0);
    builder.primitive(sphere, matte, Mat4::IDENTITY);
    let environment = solid_environment(255, 255, 255);
    builder.ldr_image_light(&environment, 0.0, glam::Vec2::ONE);
    let tables = builder.build();

    let mut film = Film::new(4, 4);
    for pass in 0..600 {
        render_pass(&tables, RenderMode::default(), pass, &mut film).unwrap();
    }
    let mean = film.cell(2, 2).color;
    for channel in [mean.x, mean.y, mean.z] {
        assert!(
            (channel - 0.8).abs() < 0.06,
            "furnace drifted: {channel} vs 0.8"
        );
    }
}

// Debug modes: depth shortens with distance, ray casting shades by cosine.
#[test]
fn depth_and_ray_cast_modes_behave() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 0.0, -5.0),
        Vec3::ZERO,
        Vec3::Y,
        30f32.to_radians(),
        30f32.to_radians(),
        16,
        16,
    );
    let matte = builder.matte_from_color(Vec3::new(0.9, 0.1, 0.1));
    let sphere = builder.sphere(Vec3::ZERO, 1.0);
    builder.primitive(sphere, matte, Mat4::IDENTITY);
    let tables = builder.build();

    let mut depth = Film::new(16, 16);
    render_pass(&tables, RenderMode::DepthCamera, 0, &mut depth).unwrap();
    let center = depth.cell(8, 8).color.x;
    let miss = depth.cell(0, 0).color.x;
    assert!(center > 0.0 && center < 1.0);
    assert_eq!(miss, 0.0);

    let mut cast = Film::new(16, 16);
    render_pass(&tables, RenderMode::RayCasting, 0, &mut cast).unwrap();
    let center = cast.cell(8, 8).color;
    assert!(center.x > center.y);
    assert!(center.x > 0.5);
}

// A fuzzed sphere field with mixed materials must render finite radiance
// for every pixel: numeric trouble degrades to black, never to NaN.
#[test]
fn random_sphere_field_stays_finite() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 1.5, -6.0),
        Vec3::ZERO,
        Vec3::Y,
        50f32.to_radians(),
        50f32.to_radians(),
        24,
        24,
    );
    for _ in 0..20 {
        let center = Vec3::new(
            rng.gen_range(-2.0..2.0),
            rng.gen_range(-1.0..2.0),
            rng.gen_range(-2.0..2.0),
        );
        let radius = rng.gen_range(0.1..0.6);
        let shape = builder.sphere(Vec3::ZERO, radius);
        let material = match rng.gen_range(0..4) {
            0 => builder.matte_from_color(Vec3::new(
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
            )),
            1 => builder.mirror_from_color(Vec3::splat(rng.gen_range(0.5..1.0))),
            2 => {
                let emission = builder.constant_texture(Vec3::ZERO);
                let white = builder.constant_texture(Vec3::ONE);
                builder.glass_material(emission, white, white, None)
            }
            _ => {
                let emission = builder.constant_texture(Vec3::ZERO);
                let tint = builder.constant_texture(Vec3::new(0.9, 0.6, 0.3));
                let exponent = builder.constant_texture(Vec3::splat(rng.gen_range(2.0..200.0)));
                builder.metal_material(emission, tint, exponent)
            }
        };
        builder.primitive(shape, material, Mat4::from_translation(center));
    }
    builder.point_light(Vec3::new(0.0, 6.0, -2.0), Vec3::splat(80.0));
    builder.perez_light(Vec3::new(0.4, 0.8, 0.2), 3.0, 0.02);
    let tables = builder.build();

    let mut film = Film::new(24, 24);
    for pass in 0..4 {
        render_pass(&tables, RenderMode::default(), pass, &mut film).unwrap();
    }
    for y in 0..24 {
        for x in 0..24 {
            let cell = film.cell(x, y);
            assert!(cell.color.is_finite(), "pixel ({x},{y}) went non-finite");
            assert!(cell.color.min_element() >= 0.0);
            assert_eq!(cell.sample_count, 4);
        }
    }
}

// Whitted mode: a mirror floor under a point light still terminates and
// produces finite output.
#[test]
fn ray_tracing_mode_is_finite() {
    let mut builder = SceneBuilder::new();
    builder.look_at_camera(
        Vec3::new(0.0, 1.0, -3.0),
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::Y,
        40f32.to_radians(),
        40f32.to_radians(),
        8,
        8,
    );
    let mirror = builder.mirror_from_color(Vec3::splat(0.9));
    let matte = builder.matte_from_color(Vec3::splat(0.6));
    let floor = builder.plane(
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(0.0, -1.0, 1.0),
    );
    builder.primitive(floor, mirror, Mat4::IDENTITY);
    let sphere = builder.sphere(Vec3::new(0.0, 0.2, 0.5), 0.5);
    builder.primitive(sphere, matte, Mat4::IDENTITY);
    builder.point_light(Vec3::new(2.0, 4.0, -2.0), Vec3::splat(60.0));
    let tables = builder.build();

    let mut film = Film::new(8, 8);
    render_pass(&tables, RenderMode::RayTracing { maximum_depth: 8 }, 0, &mut film).unwrap();
    for y in 0..8 {
        for x in 0..8 {
            assert!(film.cell(x, y).color.is_finite());
        }
    }
}
