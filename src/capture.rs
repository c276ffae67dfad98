//! Composite capture.
//!
//! Renders the scene four times (the live camera pose plus three fixed
//! poses) and composes the results into one 2560x1440 PNG: a large left
//! panel from the live view and a right-hand column of three auxiliary
//! views. Each pass is letterboxed into its panel with a "contain" fit
//! against a white background. The camera pose and projection are restored
//! exactly afterward, whatever happens in between.

use cgmath::{Point3, Vector3};
use image::RgbaImage;
use image::imageops::FilterType;

use crate::camera::{Camera, OrbitController, Projection};
use crate::context::Context;
use crate::pipelines::CAPTURE_FORMAT;
use crate::render::SceneRenderer;
use crate::resources::texture::Texture;

pub const CAPTURE_WIDTH: u32 = 2560;
pub const CAPTURE_HEIGHT: u32 = 1440;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Panel layout: the live view takes the left two thirds at full height,
/// the three auxiliary views stack in the remaining right column.
pub fn panel_rects(width: u32, height: u32) -> [Rect; 4] {
    let left_width = width * 2 / 3;
    let right_width = width - left_width;
    let row_height = height / 3;
    [
        Rect {
            x: 0,
            y: 0,
            width: left_width,
            height,
        },
        Rect {
            x: left_width,
            y: 0,
            width: right_width,
            height: row_height,
        },
        Rect {
            x: left_width,
            y: row_height,
            width: right_width,
            height: row_height,
        },
        Rect {
            x: left_width,
            y: 2 * row_height,
            width: right_width,
            height: height - 2 * row_height,
        },
    ]
}

/// Scale `src` to fit inside `panel` without cropping, centered on the
/// shorter axis.
pub fn contain_fit(src_width: u32, src_height: u32, panel: Rect) -> Rect {
    let scale = (panel.width as f64 / src_width as f64)
        .min(panel.height as f64 / src_height as f64);
    let width = ((src_width as f64 * scale) as u32).max(1);
    let height = ((src_height as f64 * scale) as u32).max(1);
    Rect {
        x: panel.x + (panel.width - width) / 2,
        y: panel.y + (panel.height - height) / 2,
        width,
        height,
    }
}

/// The three fixed auxiliary poses: top, left, rear, all aimed at the
/// origin. The top pose needs a horizontal up vector to stay well defined.
fn aux_poses() -> [Camera; 3] {
    let target = Point3::new(0.0, 0.0, 0.0);
    [
        Camera {
            eye: Point3::new(0.0, 0.5, 0.0),
            target,
            up: Vector3::new(0.0, 0.0, -1.0),
        },
        Camera {
            eye: Point3::new(0.5, 0.0, 0.0),
            target,
            up: Vector3::unit_y(),
        },
        Camera {
            eye: Point3::new(0.0, 0.0, -0.5),
            target,
            up: Vector3::unit_y(),
        },
    ]
}

/// Saved camera pose and projection, put back when a capture run ends,
/// whether or not its passes succeeded.
struct PoseSnapshot {
    camera: Camera,
    projection: Projection,
}

impl PoseSnapshot {
    fn take(camera: &Camera, projection: &Projection) -> Self {
        Self {
            camera: *camera,
            projection: *projection,
        }
    }

    /// Restore the exact saved pose and re-sync the orbit controller so the
    /// next interaction continues from it.
    fn restore(
        &self,
        camera: &mut Camera,
        projection: &mut Projection,
        controller: &mut OrbitController,
    ) {
        *camera = self.camera;
        *projection = self.projection;
        controller.sync_from(&self.camera);
    }
}

/// Render the four views and compose the capture image.
///
/// Non-reentrant: temporarily repositions the live camera. Returns the
/// encoded PNG, or `None` with an error log when any pass fails.
pub fn capture_composition(
    runtime: &tokio::runtime::Runtime,
    ctx: &mut Context,
    renderer: &SceneRenderer,
) -> Option<Vec<u8>> {
    let snapshot = PoseSnapshot::take(&ctx.camera.camera, &ctx.projection);

    let result = capture_inner(runtime, ctx, renderer);

    // Restored even when a pass failed partway through the pose list.
    snapshot.restore(
        &mut ctx.camera.camera,
        &mut ctx.projection,
        &mut ctx.camera.controller,
    );
    ctx.camera.upload(&ctx.queue, &ctx.projection);

    if result.is_none() {
        log::error!("capture failed, no image produced");
    }
    result
}

fn capture_inner(
    runtime: &tokio::runtime::Runtime,
    ctx: &mut Context,
    renderer: &SceneRenderer,
) -> Option<Vec<u8>> {
    let panels = panel_rects(CAPTURE_WIDTH, CAPTURE_HEIGHT);
    let mut canvas = RgbaImage::from_pixel(
        CAPTURE_WIDTH,
        CAPTURE_HEIGHT,
        image::Rgba([255, 255, 255, 255]),
    );

    let mut poses = vec![ctx.camera.camera];
    poses.extend(aux_poses());

    for (pose, panel) in poses.into_iter().zip(panels) {
        ctx.camera.camera = pose;
        ctx.camera.upload(&ctx.queue, &ctx.projection);
        let frame = render_offscreen(runtime, ctx, renderer)?;
        let fit = contain_fit(frame.width(), frame.height(), panel);
        let resized = image::imageops::resize(&frame, fit.width, fit.height, FilterType::Triangle);
        image::imageops::overlay(&mut canvas, &resized, fit.x as i64, fit.y as i64);
    }

    let mut png = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png);
    if let Err(err) = canvas.write_with_encoder(encoder) {
        log::error!("failed to encode capture: {err}");
        return None;
    }
    Some(png)
}

/// One offscreen pass at the live surface size, read back to the CPU.
fn render_offscreen(
    runtime: &tokio::runtime::Runtime,
    ctx: &Context,
    renderer: &SceneRenderer,
) -> Option<RgbaImage> {
    let width = ctx.config.width;
    let height = ctx.config.height;
    let extent = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let color = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Capture texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: CAPTURE_FORMAT,
        usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth = Texture::create_depth_texture(&ctx.device, [width, height], "capture depth");

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Capture Encoder"),
        });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Capture Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color.create_view(&wgpu::TextureViewDescriptor::default()),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.pipelines.capture);
        renderer.draw(ctx, &mut pass);
    }

    let unpadded_bytes_per_row = width * 4;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(256) * 256;
    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Capture readback"),
        size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &color,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        extent,
    );
    ctx.queue.submit(std::iter::once(encoder.finish()));

    runtime.block_on(read_frame(
        &ctx.device,
        &buffer,
        width,
        height,
        padded_bytes_per_row,
    ))
}

async fn read_frame(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
) -> Option<RgbaImage> {
    let slice = buffer.slice(..);
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    if device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .is_err()
    {
        log::error!("device poll failed during capture readback");
        return None;
    }
    match rx.receive().await {
        Some(Ok(())) => {}
        _ => {
            log::error!("capture buffer mapping failed");
            return None;
        }
    }

    let data = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for row in 0..height {
        let start = (row * padded_bytes_per_row) as usize;
        pixels.extend_from_slice(&data[start..start + (width * 4) as usize]);
    }
    drop(data);
    buffer.unmap();
    RgbaImage::from_raw(width, height, pixels)
}
