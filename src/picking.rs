//! Picking and selection.
//!
//! Selection is a two-state machine: `Idle` or `Selected(part)`. Only
//! meshes the part map classifies as customizable can be selected or
//! hovered; clicking anything else (or the background) returns to `Idle`.
//! The GPU side renders mesh ids into an offscreen `R32Uint` buffer and
//! reads back the pixel under the cursor.

use crate::context::Context;
use crate::parts::{PartCategory, PartMap};
use crate::render::SceneRenderer;
use crate::scene::{MeshId, Scene};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedPart {
    pub mesh: MeshId,
    pub name: String,
    pub category: PartCategory,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Idle,
    Selected(SelectedPart),
}

impl Selection {
    pub fn mesh(&self) -> Option<MeshId> {
        match self {
            Selection::Idle => None,
            Selection::Selected(part) => Some(part.mesh),
        }
    }
}

/// Tracks the current selection and hover target.
#[derive(Debug, Default)]
pub struct SelectionController {
    pub selection: Selection,
    hover: Option<MeshId>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hover(&self) -> Option<MeshId> {
        self.hover
    }

    /// Process a click resolved to `hit`. Returns the newly selected mesh
    /// when the click lands on a customizable part, so the caller can fire
    /// the glow pulse.
    pub fn click(
        &mut self,
        scene: &Scene,
        hit: Option<MeshId>,
        parts: &PartMap,
    ) -> Option<MeshId> {
        let selected = hit.and_then(|id| {
            let mesh = scene.mesh(id)?;
            let category = parts.classify(&mesh.name)?;
            Some(SelectedPart {
                mesh: id,
                name: mesh.name.clone(),
                category,
            })
        });
        match selected {
            Some(part) => {
                let mesh = part.mesh;
                self.selection = Selection::Selected(part);
                Some(mesh)
            }
            None => {
                self.selection = Selection::Idle;
                None
            }
        }
    }

    /// Update the hover target; non-customizable hits clear it.
    pub fn set_hover(&mut self, scene: &Scene, hit: Option<MeshId>, parts: &PartMap) {
        self.hover = hit.filter(|&id| {
            scene
                .mesh(id)
                .is_some_and(|mesh| parts.is_customizable(&mesh.name))
        });
    }

    /// Pointer left the window.
    pub fn clear_hover(&mut self) {
        self.hover = None;
    }

    pub fn deselect(&mut self) {
        self.selection = Selection::Idle;
    }

    /// A stale selection must never survive an asset reload.
    pub fn on_scene_reload(&mut self) {
        self.selection = Selection::Idle;
        self.hover = None;
    }
}

/// Render the pick buffer and read back the mesh id under `coords`.
///
/// Blocks on the readback; pick passes are issued at most a few times per
/// second (click plus throttled hover) so the stall is unnoticeable.
pub fn pick_mesh(
    runtime: &tokio::runtime::Runtime,
    ctx: &Context,
    renderer: &SceneRenderer,
    coords: winit::dpi::PhysicalPosition<f64>,
) -> Option<MeshId> {
    let width = ctx.config.width;
    let height = ctx.config.height;
    let x = coords.x as u32;
    let y = coords.y as u32;
    if x >= width || y >= height {
        return None;
    }

    let extent = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let pick_texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Pick texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R32Uint,
        usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let pick_depth = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Pick depth texture"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth24Plus,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Pick Encoder"),
        });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Pick Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &pick_texture.create_view(&wgpu::TextureViewDescriptor::default()),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &pick_depth.create_view(&wgpu::TextureViewDescriptor::default()),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        renderer.draw_pick(ctx, &mut pass);
    }

    // copy_texture_to_buffer requires rows padded to 256 bytes.
    let u32_size = std::mem::size_of::<u32>() as u32;
    let unpadded_bytes_per_row = u32_size * width;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(256) * 256;

    let output_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Pick readback"),
        size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &pick_texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &output_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        extent,
    );
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let id = runtime.block_on(read_pick_id(
        &ctx.device,
        &output_buffer,
        padded_bytes_per_row,
        x,
        y,
    ));
    MeshId::from_pick_id(id)
}

async fn read_pick_id(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    padded_bytes_per_row: u32,
    x: u32,
    y: u32,
) -> u32 {
    let buffer_slice = buffer.slice(..);
    // The mapping has to be created and the device polled before the await,
    // otherwise the future never resolves.
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let poll = device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: None,
    });
    if poll.is_err() {
        log::error!("device poll failed during pick readback");
        return 0;
    }
    match rx.receive().await {
        Some(Ok(())) => {}
        _ => {
            log::error!("pick buffer mapping failed");
            return 0;
        }
    }

    let data = buffer_slice.get_mapped_range();
    let offset = (y * padded_bytes_per_row + x * 4) as usize;
    let id = u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]);
    drop(data);
    buffer.unmap();
    log::debug!("pick buffer read id {id}");
    id
}
