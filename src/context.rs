//! WGPU device, surface, and per-window render state.

use std::sync::Arc;

use anyhow::Context as _;
use winit::window::Window;

use crate::camera::{CameraResources, Projection};
use crate::pipelines::Pipelines;
use crate::resources::texture::Texture;

/// Pointer state tracked across winit events, consumed by picking and the
/// orbit controller.
#[derive(Debug, Default)]
pub struct MouseState {
    pub coords: winit::dpi::PhysicalPosition<f64>,
    pub pressed: bool,
}

pub struct Context {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_texture: Texture,
    pub camera: CameraResources,
    pub projection: Projection,
    pub pipelines: Pipelines,
    pub mouse: MouseState,
}

impl Context {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no compatible graphics adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            })
            .await
            .context("failed to acquire a graphics device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        // The shaders assume an sRGB surface; a linear format would render
        // everything darker.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let camera = CameraResources::new(&device, &config);
        let projection = Projection::new(config.width, config.height);
        let pipelines = Pipelines::new(&device, &config, &camera.bind_group_layout);
        let depth_texture =
            Texture::create_depth_texture(&device, [config.width, config.height], "depth_texture");

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            depth_texture,
            camera,
            projection,
            pipelines,
            mouse: MouseState::default(),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.projection.resize(width, height);
        self.depth_texture =
            Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
    }
}
