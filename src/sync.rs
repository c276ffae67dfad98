//! Scene synchronization.
//!
//! Keeps every mesh's live material in agreement with the
//! [`MaterialStore`](crate::store::MaterialStore), across asset reloads and
//! store edits, without corrupting materials shared by non-customizable
//! meshes. Per-mesh bookkeeping (original material, private-clone flag,
//! bound texture URL, glow energy) lives in an explicit side-table owned
//! here and rebuilt whenever the scene generation changes.
//!
//! Texture fetches run on the tokio runtime and complete via channel; a
//! completion carries the URL it was issued for and is dropped unless that
//! URL is still the one the mesh wants, so out-of-order resolutions can
//! never bind a stale image.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;

use crate::color;
use crate::parts::{PartCategory, PartMap};
use crate::resources::{self, FetchError, TextureImage};
use crate::scene::{MeshId, Scene, TextureBinding};
use crate::store::MaterialStore;

/// Result of one texture fetch, tagged with the request it answers.
pub struct FetchCompletion {
    pub mesh: MeshId,
    pub url: String,
    pub result: Result<Arc<TextureImage>, FetchError>,
}

/// Issues texture fetches and hands back whatever has completed since the
/// last frame. Abstracted so the reconciliation logic runs headless in
/// tests with scripted completion orders.
pub trait TextureFetcher {
    fn request(&mut self, mesh: MeshId, url: &str);
    fn drain(&mut self) -> Vec<FetchCompletion>;
}

/// Production fetcher: spawns each request onto the tokio runtime and
/// collects completions over an mpsc channel drained at frame start.
pub struct HttpFetcher {
    handle: tokio::runtime::Handle,
    client: reqwest::Client,
    tx: mpsc::Sender<FetchCompletion>,
    rx: mpsc::Receiver<FetchCompletion>,
}

impl HttpFetcher {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            handle,
            client: reqwest::Client::new(),
            tx,
            rx,
        }
    }
}

impl TextureFetcher for HttpFetcher {
    fn request(&mut self, mesh: MeshId, url: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            let result = resources::fetch_texture_image(&client, &url)
                .await
                .map(Arc::new);
            // The receiver outlives every in-flight fetch except during
            // shutdown, where dropping the completion is fine.
            let _ = tx.send(FetchCompletion { mesh, url, result });
        });
    }

    fn drain(&mut self) -> Vec<FetchCompletion> {
        self.rx.try_iter().collect()
    }
}

/// Per-mesh side-table entry.
struct MeshRecord {
    /// Asset-authored material, captured once per generation. The restore
    /// point when the store entry for this mesh disappears.
    original: crate::scene::MaterialParams,
    category: Option<PartCategory>,
    has_private_clone: bool,
    /// URL of the image currently bound as the surface map.
    bound_url: Option<String>,
    /// URL the store most recently asked for. Completions for anything
    /// else are stale.
    desired_url: Option<String>,
    was_customized: bool,
    glow_energy: f32,
}

/// The synchronization layer itself.
pub struct SceneSync {
    records: HashMap<MeshId, MeshRecord>,
    customizable: Vec<MeshId>,
    generation: Option<u64>,
    store_revision: Option<u64>,
}

impl Default for SceneSync {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneSync {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            customizable: Vec::new(),
            generation: None,
            store_revision: None,
        }
    }

    /// Mesh ids classified as customizable in the current generation.
    pub fn customizable(&self) -> &[MeshId] {
        &self.customizable
    }

    /// True when the scene generation or store revision moved since the
    /// last [`reconcile`](Self::reconcile).
    pub fn needs_reconcile(&self, scene: &Scene, store: &MaterialStore) -> bool {
        self.generation != Some(scene.generation()) || self.store_revision != Some(store.revision())
    }

    /// Bring every mesh's material into agreement with the store.
    ///
    /// One full traversal: capture originals lazily, give customizable
    /// meshes a private material clone, apply the store config (or restore
    /// the original when the config is gone), and issue fetches for texture
    /// URLs that are not yet bound. Same-URL slider changes refresh the
    /// tiling parameters in place without a re-fetch.
    pub fn reconcile(
        &mut self,
        scene: &mut Scene,
        store: &MaterialStore,
        parts: &PartMap,
        fetcher: &mut dyn TextureFetcher,
    ) {
        if self.generation != Some(scene.generation()) {
            self.records.clear();
            self.customizable.clear();
            self.generation = Some(scene.generation());
        }
        self.store_revision = Some(store.revision());

        for index in 0..scene.meshes.len() {
            let (id, name, material_slot) = {
                let mesh = &scene.meshes[index];
                (mesh.id, mesh.name.clone(), mesh.material)
            };

            let record = self.records.entry(id).or_insert_with(|| MeshRecord {
                original: scene.materials[material_slot].clone(),
                category: parts.classify(&name),
                has_private_clone: false,
                bound_url: None,
                desired_url: None,
                was_customized: false,
                glow_energy: 0.0,
            });

            // Non-customizable meshes stay on the shared authored material.
            if record.category.is_none() {
                continue;
            }

            if !record.has_private_clone {
                let mut clone = record.original.clone();
                clone.double_sided = true;
                clone.transparent = true;
                clone.emissive = [0.0, 0.0, 0.0];
                clone.emissive_intensity = 0.0;
                scene.materials.push(clone);
                scene.meshes[index].material = scene.materials.len() - 1;
                record.has_private_clone = true;
                self.customizable.push(id);
            }
            let slot = scene.meshes[index].material;

            match store.get(id) {
                Some(config) => {
                    record.was_customized = true;
                    let material = &mut scene.materials[slot];
                    material.base_color = match config.flat_color {
                        Some(packed) => color::packed_to_linear_f32(packed),
                        // Neutral white lets a texture show true colors.
                        None => [1.0, 1.0, 1.0],
                    };
                    material.roughness = config.roughness;
                    material.metalness = config.metalness;
                    material.opacity = config.opacity;

                    match &config.texture_url {
                        Some(url) => {
                            if record.bound_url.as_deref() == Some(url.as_str()) {
                                if let Some(binding) = &mut material.map {
                                    apply_tiling(binding, config);
                                }
                                record.desired_url = Some(url.clone());
                            } else if record.desired_url.as_deref() != Some(url.as_str()) {
                                record.desired_url = Some(url.clone());
                                fetcher.request(id, url);
                            }
                        }
                        None => {
                            material.map = None;
                            record.bound_url = None;
                            record.desired_url = None;
                        }
                    }
                }
                None => {
                    if record.was_customized {
                        scene.materials[slot] = {
                            let mut restored = record.original.clone();
                            restored.double_sided = true;
                            restored.transparent = true;
                            restored
                        };
                        record.bound_url = None;
                        record.desired_url = None;
                        record.was_customized = false;
                    }
                }
            }
        }
    }

    /// Apply finished fetches. A completion binds only if its URL is still
    /// the one the store currently wants for that mesh; superseded fetches
    /// fall through silently, failures are logged and leave the previous
    /// binding untouched.
    pub fn poll_completions(
        &mut self,
        scene: &mut Scene,
        store: &MaterialStore,
        completions: Vec<FetchCompletion>,
    ) {
        for completion in completions {
            let Some(record) = self.records.get_mut(&completion.mesh) else {
                continue;
            };
            let desired = store
                .get(completion.mesh)
                .and_then(|config| config.texture_url.as_deref());
            if desired != Some(completion.url.as_str()) {
                log::debug!(
                    "dropping stale texture completion {} for superseded request",
                    completion.url
                );
                continue;
            }
            match completion.result {
                Ok(image) => {
                    let Some(slot) = scene.mesh(completion.mesh).map(|mesh| mesh.material) else {
                        continue;
                    };
                    let mut binding = TextureBinding::new(completion.url.clone(), image);
                    if let Some(config) = store.get(completion.mesh) {
                        apply_tiling(&mut binding, config);
                    }
                    scene.materials[slot].map = Some(binding);
                    record.bound_url = Some(completion.url);
                }
                Err(err) => {
                    log::warn!("texture fetch for {} failed: {err}", completion.url);
                }
            }
        }
    }

    /// Fresh-selection pulse: full glow energy that [`animate`](Self::animate)
    /// decays over the following frames.
    pub fn set_glow_pulse(&mut self, mesh: MeshId) {
        if let Some(record) = self.records.get_mut(&mesh) {
            record.glow_energy = 1.0;
        }
    }

    /// Per-frame highlight pass. Pure visual feedback: eases emissive color,
    /// intensity and opacity toward targets derived from hover, selection
    /// and the decaying click pulse. Never writes to the store.
    pub fn animate(
        &mut self,
        scene: &mut Scene,
        store: &MaterialStore,
        selected: Option<MeshId>,
        hovered: Option<MeshId>,
        dt: f32,
        elapsed: f32,
    ) {
        for &id in &self.customizable {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            let Some(slot) = scene.mesh(id).map(|mesh| mesh.material) else {
                continue;
            };

            if record.glow_energy > 0.0 {
                record.glow_energy *= (-2.6 * dt).exp();
                if record.glow_energy < 1e-3 {
                    record.glow_energy = 0.0;
                }
            }
            let pulse = (record.glow_energy * std::f32::consts::PI).sin();

            let is_selected = selected == Some(id);
            let is_hovered = hovered == Some(id);

            let mut target_intensity = 0.0;
            if is_selected {
                target_intensity = 0.08 + (elapsed * 1.8).sin() * 0.03;
            }
            if is_hovered {
                target_intensity += 0.06;
            }
            target_intensity += pulse * 0.12;

            let base_opacity = store.get(id).map_or(1.0, |config| config.opacity);
            let target_opacity = (base_opacity + pulse * 0.15).min(1.0);

            // Mid-gray while selected keeps the pulse readable on bright
            // textures; white elsewhere so hover reads as a lift.
            let target_emissive = if is_selected { 0.4 } else { 1.0 };

            let material = &mut scene.materials[slot];
            for channel in &mut material.emissive {
                *channel += (target_emissive - *channel) * 0.08;
            }
            material.emissive_intensity +=
                (target_intensity - material.emissive_intensity) * 0.1;
            material.opacity += (target_opacity - material.opacity) * 0.08;
        }
    }
}

fn apply_tiling(binding: &mut TextureBinding, config: &crate::store::MaterialConfig) {
    binding.repeat = [config.scale, config.scale];
    binding.offset = [config.offset_x, config.offset_y];
    binding.rotation = config.rotation_deg.to_radians();
    binding.center = [0.5, 0.5];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MaterialParams, Mesh, MeshGeometry};
    use cgmath::SquareMatrix;

    /// Fetcher that records requests and completes them on demand, in any
    /// order the test chooses.
    struct StubFetcher {
        requests: Vec<(MeshId, String)>,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                requests: Vec::new(),
            }
        }

        fn complete(&self, index: usize) -> FetchCompletion {
            let (mesh, url) = self.requests[index].clone();
            FetchCompletion {
                mesh,
                url,
                result: Ok(Arc::new(TextureImage::solid([0, 255, 0, 255]))),
            }
        }
    }

    impl TextureFetcher for StubFetcher {
        fn request(&mut self, mesh: MeshId, url: &str) {
            self.requests.push((mesh, url.to_string()));
        }

        fn drain(&mut self) -> Vec<FetchCompletion> {
            Vec::new()
        }
    }

    fn test_scene(generation: u64) -> Scene {
        let meshes = vec![
            Mesh {
                id: MeshId::from_index(0),
                name: "Shape027_vamp".into(),
                material: 0,
                transform: cgmath::Matrix4::identity(),
                geometry: MeshGeometry::default(),
            },
            Mesh {
                id: MeshId::from_index(1),
                name: "Sole_01".into(),
                material: 0,
                transform: cgmath::Matrix4::identity(),
                geometry: MeshGeometry::default(),
            },
        ];
        let mut authored = MaterialParams::named("authored");
        authored.base_color = [0.2, 0.3, 0.4];
        authored.roughness = 0.5;
        Scene::new(meshes, vec![authored], generation)
    }

    fn vamp() -> MeshId {
        MeshId::from_index(0)
    }

    fn sole() -> MeshId {
        MeshId::from_index(1)
    }

    #[test]
    fn customizable_mesh_gets_a_private_clone() {
        let mut scene = test_scene(1);
        let store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

        assert_eq!(scene.materials.len(), 2);
        assert_ne!(scene.mesh(vamp()).unwrap().material, 0);
        assert_eq!(scene.mesh(sole()).unwrap().material, 0);
        assert!(scene.material_of(vamp()).unwrap().double_sided);
        assert_eq!(sync.customizable(), &[vamp()]);
    }

    #[test]
    fn empty_store_preserves_original_appearance() {
        let mut scene = test_scene(1);
        let store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

        let material = scene.material_of(vamp()).unwrap();
        assert_eq!(material.base_color, [0.2, 0.3, 0.4]);
        assert_eq!(material.roughness, 0.5);
        assert!(fetcher.requests.is_empty());
    }

    #[test]
    fn removing_the_config_restores_the_original() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.update(vamp(), |config| {
            config.flat_color = Some(0xff0000);
            config.roughness = 0.1;
        });
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        assert_eq!(scene.material_of(vamp()).unwrap().roughness, 0.1);

        store.remove(vamp());
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

        let material = scene.material_of(vamp()).unwrap();
        assert_eq!(material.base_color, [0.2, 0.3, 0.4]);
        assert_eq!(material.roughness, 0.5);
    }

    #[test]
    fn last_write_wins_under_out_of_order_completion() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.apply_texture(vamp(), "http://textures/a.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        store.apply_texture(vamp(), "http://textures/b.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        assert_eq!(fetcher.requests.len(), 2);

        // B resolves first, then the stale A.
        let b = fetcher.complete(1);
        let a = fetcher.complete(0);
        sync.poll_completions(&mut scene, &store, vec![b]);
        sync.poll_completions(&mut scene, &store, vec![a]);

        let map = scene.material_of(vamp()).unwrap().map.as_ref().unwrap();
        assert_eq!(map.url, "http://textures/b.png");
    }

    #[test]
    fn slider_tick_on_bound_texture_does_not_refetch() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.apply_texture(vamp(), "http://textures/a.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        sync.poll_completions(&mut scene, &store, vec![fetcher.complete(0)]);

        store.update(vamp(), |config| {
            config.scale = 3.0;
            config.rotation_deg = 90.0;
        });
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

        assert_eq!(fetcher.requests.len(), 1);
        let map = scene.material_of(vamp()).unwrap().map.as_ref().unwrap();
        assert_eq!(map.repeat, [3.0, 3.0]);
        assert!((map.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn clearing_the_url_clears_the_surface_map() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.apply_texture(vamp(), "http://textures/a.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        sync.poll_completions(&mut scene, &store, vec![fetcher.complete(0)]);
        assert!(scene.material_of(vamp()).unwrap().map.is_some());

        store.update(vamp(), |config| {
            config.texture_url = None;
            config.opacity = 1.0;
        });
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

        assert!(scene.material_of(vamp()).unwrap().map.is_none());
    }

    #[test]
    fn fetch_failure_keeps_the_previous_binding() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.apply_texture(vamp(), "http://textures/a.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        sync.poll_completions(&mut scene, &store, vec![fetcher.complete(0)]);

        store.apply_texture(vamp(), "http://textures/broken.png");
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        let failure = FetchCompletion {
            mesh: vamp(),
            url: "http://textures/broken.png".into(),
            result: Err(FetchError::BadDataUri),
        };
        sync.poll_completions(&mut scene, &store, vec![failure]);

        let map = scene.material_of(vamp()).unwrap().map.as_ref().unwrap();
        assert_eq!(map.url, "http://textures/a.png");
    }

    #[test]
    fn reload_rebuilds_the_side_table() {
        let mut scene = test_scene(1);
        let mut store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        store.update(vamp(), |config| config.flat_color = Some(0x123456));
        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        assert!(!sync.needs_reconcile(&scene, &store));

        let mut reloaded = test_scene(2);
        store.reset();
        assert!(sync.needs_reconcile(&reloaded, &store));
        sync.reconcile(&mut reloaded, &store, &parts, &mut fetcher);
        assert_eq!(sync.customizable(), &[vamp()]);
        assert_eq!(
            reloaded.material_of(vamp()).unwrap().base_color,
            [0.2, 0.3, 0.4]
        );
    }

    #[test]
    fn glow_pulse_decays_and_never_touches_the_store() {
        let mut scene = test_scene(1);
        let store = MaterialStore::new();
        let parts = PartMap::default();
        let mut sync = SceneSync::new();
        let mut fetcher = StubFetcher::new();

        sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
        sync.set_glow_pulse(vamp());

        let revision = store.revision();
        for frame in 0..300 {
            let elapsed = frame as f32 / 60.0;
            sync.animate(&mut scene, &store, Some(vamp()), None, 1.0 / 60.0, elapsed);
        }
        assert_eq!(store.revision(), revision);
        assert!(store.is_empty());

        // After five seconds the click pulse has fully decayed and only the
        // selection shimmer remains.
        let intensity = scene.material_of(vamp()).unwrap().emissive_intensity;
        assert!(intensity > 0.0 && intensity < 0.2, "intensity {intensity}");
    }
}
