//! Material state store and texture libraries.
//!
//! The store is the single owner of per-part customization state: a map from
//! mesh id to [`MaterialConfig`], mutated by UI actions and read by the sync
//! layer. An absent entry means "use the asset's authored material
//! unmodified". A revision counter lets the frame loop observe edits without
//! diffing the map.

use std::collections::HashMap;

use uuid::Uuid;

use crate::parts::PartCategory;
use crate::scene::MeshId;

/// Per-part texture/material configuration. Owned exclusively by the store,
/// never shared across parts.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialConfig {
    pub texture_url: Option<String>,
    /// Tiling scale, applied to both axes.
    pub scale: f32,
    /// Planar offset in texture space, each in [-1, 1].
    pub offset_x: f32,
    pub offset_y: f32,
    /// Rotation about the texture center, degrees in [0, 360).
    pub rotation_deg: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
    /// Packed sRGB tint; `None` renders neutral white under a texture.
    pub flat_color: Option<u32>,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            texture_url: None,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            rotation_deg: 0.0,
            roughness: 1.0,
            metalness: 0.0,
            opacity: 1.0,
            flat_color: None,
        }
    }
}

/// Associative map from customized part to its configuration.
#[derive(Debug, Default)]
pub struct MaterialStore {
    entries: HashMap<MeshId, MaterialConfig>,
    revision: u64,
}

impl MaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic edit counter; bumped by every mutation, including `reset`.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, mesh: MeshId) -> Option<&MaterialConfig> {
        self.entries.get(&mesh)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, mesh: MeshId) -> bool {
        self.entries.contains_key(&mesh)
    }

    /// Apply a texture to a part. An existing entry keeps its slider values
    /// and only swaps the URL; the first application creates a default
    /// config carrying the URL.
    pub fn apply_texture(&mut self, mesh: MeshId, url: &str) {
        let entry = self.entries.entry(mesh).or_default();
        entry.texture_url = Some(url.to_string());
        self.revision += 1;
    }

    /// Field-by-field mutation, creating the entry on first touch.
    pub fn update(&mut self, mesh: MeshId, edit: impl FnOnce(&mut MaterialConfig)) {
        edit(self.entries.entry(mesh).or_default());
        self.revision += 1;
    }

    /// Drop a part's customization entirely; the sync layer will restore the
    /// authored material on the next reconcile.
    pub fn remove(&mut self, mesh: MeshId) -> Option<MaterialConfig> {
        let removed = self.entries.remove(&mesh);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    /// Discard everything. Must be called whenever the underlying asset is
    /// replaced: stale entries would dangle into the previous scene's ids.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeshId, &MaterialConfig)> {
        self.entries.iter().map(|(id, cfg)| (*id, cfg))
    }
}

/// One selectable texture in a category library.
#[derive(Clone, Debug)]
pub struct TextureEntry {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub ai_generated: bool,
}

impl TextureEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>, ai_generated: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            ai_generated,
        }
    }
}

/// Per-category texture catalogs. Append-only during a session: uploads and
/// AI generations prepend; referenced entries are never deleted (doing so
/// would dangle `MaterialConfig::texture_url`).
#[derive(Debug, Default)]
pub struct TextureLibrary {
    categories: HashMap<PartCategory, Vec<TextureEntry>>,
}

impl TextureLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, category: PartCategory, entries: Vec<TextureEntry>) {
        self.categories.entry(category).or_default().extend(entries);
    }

    /// New entries go to the front so fresh uploads surface first.
    pub fn prepend(&mut self, category: PartCategory, entry: TextureEntry) {
        self.categories.entry(category).or_default().insert(0, entry);
    }

    pub fn entries(&self, category: PartCategory) -> &[TextureEntry] {
        self.categories.get(&category).map_or(&[], Vec::as_slice)
    }
}
