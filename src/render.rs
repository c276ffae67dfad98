//! GPU mirror of the CPU scene.
//!
//! The renderer owns per-mesh vertex/index/uniform buffers and a texture
//! cache keyed by source URL. [`SceneRenderer::prepare`] rebuilds the mesh
//! buffers when the scene generation changes and rewrites every mesh
//! uniform each frame, so material mutation stays a CPU concern and the
//! sync layer never touches the device.

use std::collections::HashMap;

use cgmath::{Deg, Matrix4};
use wgpu::util::DeviceExt;

use crate::context::Context;
use crate::scene::{MaterialParams, Mesh, MeshId, Scene};

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshUniform {
    pub model: [[f32; 4]; 4],
    /// rgb = linear base color, a = opacity.
    pub base_color: [f32; 4],
    /// rgb = emissive color, a = intensity.
    pub emissive: [f32; 4],
    /// x = roughness, y = metalness.
    pub surface: [f32; 4],
    /// xy = uv repeat, zw = uv offset.
    pub uv_repeat_offset: [f32; 4],
    /// x = rotation radians, yz = rotation center.
    pub uv_rotation: [f32; 4],
    /// x = pick id, y = 1 when a surface map is bound.
    pub flags: [u32; 4],
}

impl MeshUniform {
    fn from_material(mesh: &Mesh, material: &MaterialParams, root: Matrix4<f32>) -> Self {
        let (uv_repeat_offset, uv_rotation, has_map) = match &material.map {
            Some(map) => (
                [map.repeat[0], map.repeat[1], map.offset[0], map.offset[1]],
                [map.rotation, map.center[0], map.center[1], 0.0],
                1,
            ),
            None => ([1.0, 1.0, 0.0, 0.0], [0.0, 0.5, 0.5, 0.0], 0),
        };
        Self {
            model: (root * mesh.transform).into(),
            base_color: [
                material.base_color[0],
                material.base_color[1],
                material.base_color[2],
                material.opacity,
            ],
            emissive: [
                material.emissive[0],
                material.emissive[1],
                material.emissive[2],
                material.emissive_intensity,
            ],
            surface: [material.roughness, material.metalness, 0.0, 0.0],
            uv_repeat_offset,
            uv_rotation,
            flags: [mesh.id.pick_id(), has_map, 0, 0],
        }
    }
}

struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    num_indices: u32,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    /// URL of the surface map bound last frame, to detect binding changes.
    map_url: Option<String>,
}

pub struct SceneRenderer {
    meshes: HashMap<MeshId, MeshBuffers>,
    /// Draw order; transparency needs opaque-ish meshes first but the asset
    /// order is good enough for a single centered model.
    order: Vec<MeshId>,
    textures: HashMap<String, wgpu::BindGroup>,
    fallback_map: wgpu::BindGroup,
    generation: Option<u64>,
    /// Model-to-world transform applied above every node transform.
    root: Matrix4<f32>,
}

impl SceneRenderer {
    pub fn new(ctx: &Context) -> Self {
        let fallback = crate::resources::texture::Texture::white_fallback(&ctx.device, &ctx.queue);
        let fallback_map = bind_texture(ctx, &fallback);
        Self {
            meshes: HashMap::new(),
            order: Vec::new(),
            textures: HashMap::new(),
            fallback_map,
            generation: None,
            // The asset is authored small and faces away from the default
            // camera; scale up and spin it around.
            root: Matrix4::from_scale(2.0) * Matrix4::from_angle_y(Deg(180.0)),
        }
    }

    /// Mirror the scene onto the GPU: rebuild geometry when the generation
    /// moved, upload any texture images that appeared, and rewrite every
    /// mesh uniform.
    pub fn prepare(&mut self, ctx: &Context, scene: &Scene) {
        if self.generation != Some(scene.generation()) {
            self.meshes.clear();
            self.order.clear();
            self.textures.clear();
            for mesh in &scene.meshes {
                self.meshes.insert(mesh.id, Self::create_buffers(ctx, mesh));
                self.order.push(mesh.id);
            }
            self.generation = Some(scene.generation());
        }

        for mesh in &scene.meshes {
            let material = &scene.materials[mesh.material];
            if let Some(map) = &material.map {
                if !self.textures.contains_key(&map.url) {
                    let texture = crate::resources::texture::Texture::from_image(
                        &ctx.device,
                        &ctx.queue,
                        &map.image,
                        Some(&map.url),
                    );
                    self.textures.insert(map.url.clone(), bind_texture(ctx, &texture));
                }
            }
            if let Some(buffers) = self.meshes.get_mut(&mesh.id) {
                let uniform = MeshUniform::from_material(mesh, material, self.root);
                ctx.queue
                    .write_buffer(&buffers.uniform, 0, bytemuck::cast_slice(&[uniform]));
                buffers.map_url = material.map.as_ref().map(|map| map.url.clone());
            }
        }
    }

    fn create_buffers(ctx: &Context, mesh: &Mesh) -> MeshBuffers {
        let vertex = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} vertices", mesh.name)),
                contents: bytemuck::cast_slice(&mesh.geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} indices", mesh.name)),
                contents: bytemuck::cast_slice(&mesh.geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let uniform = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} uniform", mesh.name)),
            size: std::mem::size_of::<MeshUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &ctx.pipelines.mesh_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            }],
            label: Some(&format!("{} bind group", mesh.name)),
        });
        MeshBuffers {
            vertex,
            index,
            num_indices: mesh.geometry.indices.len() as u32,
            uniform,
            bind_group,
            map_url: None,
        }
    }

    /// Record the shaded draw calls. The caller sets up the pass and picks
    /// the pipeline so the same path serves the surface and the capture
    /// buffer.
    pub fn draw<'pass>(&'pass self, ctx: &'pass Context, pass: &mut wgpu::RenderPass<'pass>) {
        pass.set_bind_group(0, &ctx.camera.bind_group, &[]);
        for id in &self.order {
            let Some(buffers) = self.meshes.get(id) else {
                continue;
            };
            let map = buffers
                .map_url
                .as_ref()
                .and_then(|url| self.textures.get(url))
                .unwrap_or(&self.fallback_map);
            pass.set_bind_group(1, &buffers.bind_group, &[]);
            pass.set_bind_group(2, map, &[]);
            pass.set_vertex_buffer(0, buffers.vertex.slice(..));
            pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..buffers.num_indices, 0, 0..1);
        }
    }

    /// Record the pick draw calls (ids only, no textures).
    pub fn draw_pick<'pass>(&'pass self, ctx: &'pass Context, pass: &mut wgpu::RenderPass<'pass>) {
        pass.set_pipeline(&ctx.pipelines.pick);
        pass.set_bind_group(0, &ctx.camera.bind_group, &[]);
        for id in &self.order {
            let Some(buffers) = self.meshes.get(id) else {
                continue;
            };
            pass.set_bind_group(1, &buffers.bind_group, &[]);
            pass.set_vertex_buffer(0, buffers.vertex.slice(..));
            pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..buffers.num_indices, 0, 0..1);
        }
    }

    /// Render one frame to the window surface.
    pub fn render(&self, ctx: &Context) -> Result<(), wgpu::SurfaceError> {
        let output = ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shaded Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.95,
                            g: 0.95,
                            b: 0.95,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &ctx.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&ctx.pipelines.shaded);
            self.draw(ctx, &mut pass);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

fn bind_texture(
    ctx: &Context,
    texture: &crate::resources::texture::Texture,
) -> wgpu::BindGroup {
    ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &ctx.pipelines.surface_map_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            },
        ],
        label: None,
    })
}
