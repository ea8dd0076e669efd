#![cfg(feature = "integration-tests")]

use std::time::Duration;

use foot_viewer::{
    pipelines::environment::{
        CUBE_SIZE, ENVIRONMENT_FORMAT, EnvironmentPrefilter, EnvironmentResources, mip_levels,
    },
    resources::environment::EquirectImage,
};

use crate::common::test_utils::headless_device;

mod common;

fn grey_panorama(width: u32, height: u32, value: f32) -> EquirectImage {
    EquirectImage {
        width,
        height,
        data: [value, value, value, 1.0].repeat((width * height) as usize),
    }
}

/// Normal and zero half floats only, which is all a prefiltered grey holds.
fn f16_to_f32(bits: u16) -> f32 {
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f32 / 1024.0;
    if exponent == 0 {
        return 0.0;
    }
    (1.0 + mantissa) * 2f32.powi(exponent - 15)
}

/// Reads the red channel of every texel of face 0 at `mip`.
fn read_face(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, mip: u32) -> Vec<f32> {
    let size = (CUBE_SIZE >> mip).max(1);
    let texel_bytes = 8;
    let padded_row = (size * texel_bytes).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: (padded_row * size) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture,
            mip_level: mip,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(size),
            },
        },
        wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = futures::channel::oneshot::channel();
    let slice = buffer.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(Duration::from_secs(3)),
        })
        .unwrap();
    futures::executor::block_on(rx).unwrap().unwrap();

    let data = slice.get_mapped_range();
    let mut reds = Vec::new();
    for row in 0..size {
        for column in 0..size {
            let at = (row * padded_row + column * texel_bytes) as usize;
            reds.push(f16_to_f32(u16::from_le_bytes([data[at], data[at + 1]])));
        }
    }
    reds
}

#[test]
fn a_grey_panorama_stays_grey_in_every_mip() {
    let Some((device, queue)) = headless_device() else {
        eprintln!("no GPU adapter, skipping");
        return;
    };
    let prefilter = EnvironmentPrefilter::new(&device);
    let map = prefilter.from_equirectangular(&device, &queue, &grey_panorama(64, 32, 0.5));
    prefilter.dispose();

    assert_eq!(map.mip_level_count, mip_levels(CUBE_SIZE));
    assert_eq!(map.texture.format(), ENVIRONMENT_FORMAT);
    assert_eq!(map.texture.width(), CUBE_SIZE);
    assert_eq!(map.texture.depth_or_array_layers(), 6);

    for mip in [0, map.mip_level_count - 1] {
        for red in read_face(&device, &queue, &map.texture, mip) {
            assert!((red - 0.5).abs() < 0.01, "mip {mip} holds {red}");
        }
    }
    map.destroy();
}

#[test]
fn assigning_an_environment_enables_it() {
    let Some((device, queue)) = headless_device() else {
        eprintln!("no GPU adapter, skipping");
        return;
    };
    let mut environment = EnvironmentResources::new(&device, &queue);
    assert!(!environment.uniform.enabled());
    assert_eq!(environment.map.mip_level_count, 1);

    let prefilter = EnvironmentPrefilter::new(&device);
    let map = prefilter.from_equirectangular(&device, &queue, &grey_panorama(16, 8, 1.0));
    environment.assign(&device, &queue, map);
    assert!(environment.uniform.enabled());
    assert_eq!(environment.map.mip_level_count, mip_levels(CUBE_SIZE));
    environment.destroy();
}
