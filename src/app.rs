//! Application shell and event loop.
//!
//! Wires the pieces together: window + GPU context, asset loading, the
//! store/sync/selection trio, picking, capture export, and AI texture
//! generation. The flow each frame is: drain fetch completions, reconcile
//! if the scene or store moved, run the glow animation, update the camera,
//! mirror the scene to the GPU, draw.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use crate::capture::capture_composition;
use crate::context::Context;
use crate::parts::{PartCategory, PartMap};
use crate::picking::{self, SelectionController, pick_mesh};
use crate::render::SceneRenderer;
use crate::resources;
use crate::scene::Scene;
use crate::store::{MaterialStore, TextureEntry, TextureLibrary};
use crate::sync::{HttpFetcher, SceneSync, TextureFetcher};
use crate::texgen::TextureGenerator;

/// Asset location override; a file path or URL. Without it the bundled
/// default model URL is used.
const MODEL_ENV_VAR: &str = "MATSHIFT_MODEL";

const DEFAULT_MODEL_URL: &str =
    "https://raw.githubusercontent.com/matshift/assets/main/models/shoe.glb";

/// Prompt for AI texture generation, read when the generate key is hit.
const PROMPT_ENV_VAR: &str = "MATSHIFT_PROMPT";

/// Minimum interval between hover pick passes.
const HOVER_INTERVAL: Duration = Duration::from_millis(50);

fn seed_library() -> TextureLibrary {
    let mut library = TextureLibrary::new();
    library.seed(
        PartCategory::Surface,
        vec![
            TextureEntry::new("Denim", "assets/textures/denim.jpg", false),
            TextureEntry::new("Suede", "assets/textures/suede.jpg", false),
            TextureEntry::new("Knit", "assets/textures/knit.jpg", false),
        ],
    );
    library.seed(
        PartCategory::Lace,
        vec![TextureEntry::new(
            "Waxed cotton",
            "assets/textures/waxed_cotton.jpg",
            false,
        )],
    );
    library.seed(
        PartCategory::Label,
        vec![TextureEntry::new(
            "Woven label",
            "assets/textures/label.jpg",
            false,
        )],
    );
    library
}

struct AppState {
    ctx: Context,
    scene: Option<Scene>,
    renderer: SceneRenderer,
    store: MaterialStore,
    sync: SceneSync,
    selection: SelectionController,
    parts: PartMap,
    library: TextureLibrary,
    fetcher: HttpFetcher,
    generator: TextureGenerator,
    start: Instant,
    last_hover_pick: Instant,
    next_generation: u64,
    is_surface_configured: bool,
}

impl AppState {
    async fn new(window: Arc<Window>, runtime_handle: tokio::runtime::Handle) -> anyhow::Result<Self> {
        let ctx = Context::new(window).await?;
        let renderer = SceneRenderer::new(&ctx);
        Ok(Self {
            ctx,
            scene: None,
            renderer,
            store: MaterialStore::new(),
            sync: SceneSync::new(),
            selection: SelectionController::new(),
            parts: PartMap::default(),
            library: seed_library(),
            fetcher: HttpFetcher::new(runtime_handle),
            generator: TextureGenerator::new(),
            start: Instant::now(),
            last_hover_pick: Instant::now(),
            next_generation: 1,
            is_surface_configured: false,
        })
    }

    fn model_source() -> String {
        std::env::var(MODEL_ENV_VAR).unwrap_or_else(|_| DEFAULT_MODEL_URL.to_string())
    }

    /// Load (or reload) the asset. Failure keeps the previous scene and is
    /// retryable; success resets the store and forces the selection idle.
    fn load_model(&mut self, runtime: &tokio::runtime::Runtime) {
        let source = Self::model_source();
        let generation = self.next_generation;
        let loaded = runtime
            .block_on(async {
                let client = reqwest::Client::new();
                let bytes = resources::fetch_bytes(&client, &source).await?;
                anyhow::Ok(bytes)
            })
            .and_then(|bytes| {
                Scene::from_gltf_bytes(&bytes, generation).context("failed to parse model")
            });
        match loaded {
            Ok(scene) => {
                log::info!("loaded model from {source}");
                self.next_generation += 1;
                self.scene = Some(scene);
                self.store.reset();
                self.selection.on_scene_reload();
            }
            Err(err) => {
                log::error!("could not load model from {source}: {err:#}");
            }
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.is_surface_configured = true;
            self.ctx.resize(width, height);
        }
    }

    fn redraw(&mut self, dt: Duration) {
        self.ctx.window.request_redraw();
        if !self.is_surface_configured {
            return;
        }

        if let Some(scene) = &mut self.scene {
            let completions = self.fetcher.drain();
            if !completions.is_empty() {
                self.sync.poll_completions(scene, &self.store, completions);
            }
            if self.sync.needs_reconcile(scene, &self.store) {
                self.sync
                    .reconcile(scene, &self.store, &self.parts, &mut self.fetcher);
            }
            self.sync.animate(
                scene,
                &self.store,
                self.selection.selection.mesh(),
                self.selection.hover(),
                dt.as_secs_f32(),
                self.start.elapsed().as_secs_f32(),
            );
        }

        self.ctx
            .camera
            .controller
            .update(&mut self.ctx.camera.camera, dt.as_secs_f32());
        let projection = self.ctx.projection;
        self.ctx.camera.upload(&self.ctx.queue, &projection);

        if let Some(scene) = &self.scene {
            self.renderer.prepare(&self.ctx, scene);
        }

        match self.renderer.render(&self.ctx) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.ctx.window.inner_size();
                self.resize(size.width, size.height);
            }
            Err(err) => {
                log::error!("unable to render: {err}");
            }
        }
    }

    fn on_click(&mut self, runtime: &tokio::runtime::Runtime) {
        let Some(scene) = &self.scene else {
            return;
        };
        let hit = pick_mesh(runtime, &self.ctx, &self.renderer, self.ctx.mouse.coords);
        if let Some(mesh) = self.selection.click(scene, hit, &self.parts) {
            self.sync.set_glow_pulse(mesh);
        }
    }

    fn on_hover(&mut self, runtime: &tokio::runtime::Runtime) {
        if self.last_hover_pick.elapsed() < HOVER_INTERVAL {
            return;
        }
        self.last_hover_pick = Instant::now();
        let Some(scene) = &self.scene else {
            return;
        };
        let hit = pick_mesh(runtime, &self.ctx, &self.renderer, self.ctx.mouse.coords);
        self.selection.set_hover(scene, hit, &self.parts);
    }

    /// Apply the n-th library texture for the selected part's category.
    fn apply_library_entry(&mut self, index: usize) {
        let picking::Selection::Selected(part) = &self.selection.selection else {
            return;
        };
        let Some(entry) = self.library.entries(part.category).get(index).cloned() else {
            log::info!("no library texture at slot {index} for {:?}", part.category);
            return;
        };
        log::info!("applying {} to {}", entry.name, part.name);
        self.store.apply_texture(part.mesh, &entry.url);
    }

    /// Generate an AI texture for the selection and apply it. Blocks the
    /// loop for the duration of the single service call.
    fn generate_texture(&mut self, runtime: &tokio::runtime::Runtime) {
        let picking::Selection::Selected(part) = &self.selection.selection else {
            log::info!("select a part before generating a texture");
            return;
        };
        let prompt =
            std::env::var(PROMPT_ENV_VAR).unwrap_or_else(|_| "blue denim fabric".to_string());
        match runtime.block_on(self.generator.generate(&prompt)) {
            Ok(uri) => {
                let mesh = part.mesh;
                let category = part.category;
                self.library
                    .prepend(category, TextureEntry::new(prompt, uri.clone(), true));
                self.store.apply_texture(mesh, &uri);
            }
            Err(err) => {
                log::error!("texture generation failed: {err}");
            }
        }
    }

    fn export_capture(&mut self, runtime: &tokio::runtime::Runtime) {
        let Some(png) = capture_composition(runtime, &mut self.ctx, &self.renderer) else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .set_file_name("composition.png")
            .add_filter("PNG image", &["png"])
            .save_file()
        else {
            return;
        };
        if let Err(err) = std::fs::write(&path, png) {
            log::error!("failed to write {}: {err}", path.display());
        } else {
            log::info!("saved capture to {}", path.display());
        }
    }

    fn on_key(&mut self, runtime: &tokio::runtime::Runtime, code: KeyCode) {
        match code {
            KeyCode::Escape => self.selection.deselect(),
            KeyCode::KeyR => self.load_model(runtime),
            KeyCode::KeyT => {
                self.ctx.camera.controller.auto_rotate = !self.ctx.camera.controller.auto_rotate;
            }
            KeyCode::KeyC => self.export_capture(runtime),
            KeyCode::KeyG => self.generate_texture(runtime),
            KeyCode::Digit1 => self.apply_library_entry(0),
            KeyCode::Digit2 => self.apply_library_entry(1),
            KeyCode::Digit3 => self.apply_library_entry(2),
            _ => {}
        }
    }
}

pub struct App {
    runtime: tokio::runtime::Runtime,
    state: Option<AppState>,
    last_time: Instant,
}

impl App {
    fn new(runtime: tokio::runtime::Runtime) -> Self {
        Self {
            runtime,
            state: None,
            last_time: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = Window::default_attributes().with_title("matshift");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("could not create a window: {err}");
                event_loop.exit();
                return;
            }
        };

        let handle = self.runtime.handle().clone();
        let state = self.runtime.block_on(AppState::new(window, handle));
        match state {
            Ok(mut state) => {
                state.load_model(&self.runtime);
                state.ctx.window.request_redraw();
                self.state = Some(state);
            }
            Err(err) => {
                log::error!("initialization failed: {err:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => state.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                let dt = self.last_time.elapsed();
                self.last_time = Instant::now();
                state.redraw(dt);
            }
            WindowEvent::CursorMoved { position, .. } => {
                if state.ctx.mouse.pressed {
                    let dx = position.x - state.ctx.mouse.coords.x;
                    let dy = position.y - state.ctx.mouse.coords.y;
                    state
                        .ctx
                        .camera
                        .controller
                        .rotate(dx as f32, dy as f32);
                } else {
                    state.ctx.mouse.coords = position;
                    state.on_hover(&self.runtime);
                }
                state.ctx.mouse.coords = position;
            }
            WindowEvent::CursorLeft { .. } => state.selection.clear_hover(),
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                };
                state.ctx.camera.controller.zoom(scroll);
            }
            WindowEvent::MouseInput {
                state: button_state,
                button,
                ..
            } => match (button, button_state.is_pressed()) {
                (MouseButton::Left, true) => {
                    state.ctx.mouse.pressed = true;
                    state.on_click(&self.runtime);
                }
                (MouseButton::Left, false) => state.ctx.mouse.pressed = false,
                _ => {}
            },
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && let PhysicalKey::Code(code) = event.physical_key
                {
                    state.on_key(&self.runtime, code);
                }
            }
            _ => {}
        }
    }
}

/// Build the runtime and the event loop and run the configurator until the
/// window closes.
pub fn run() -> anyhow::Result<()> {
    if let Err(err) = env_logger::try_init() {
        println!("Warning: could not initialize logger: {err}");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let event_loop = EventLoop::new()?;
    let mut app = App::new(runtime);
    event_loop.run_app(&mut app)?;
    Ok(())
}
