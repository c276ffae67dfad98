//! Shared helpers for the headless integration tests: scene builders and a
//! scriptable texture fetcher.

use std::sync::Arc;

use cgmath::SquareMatrix;
use matshift::resources::{FetchError, TextureImage};
use matshift::scene::{MaterialParams, Mesh, MeshGeometry, MeshId, Scene};
use matshift::sync::{FetchCompletion, TextureFetcher};

/// Build a scene whose meshes all share one authored material.
pub fn scene_with_names(names: &[&str], generation: u64) -> Scene {
    let meshes = names
        .iter()
        .enumerate()
        .map(|(index, name)| Mesh {
            id: MeshId::from_index(index),
            name: (*name).into(),
            material: 0,
            transform: cgmath::Matrix4::identity(),
            geometry: MeshGeometry::default(),
        })
        .collect();
    let mut authored = MaterialParams::named("authored");
    authored.base_color = [0.25, 0.5, 0.75];
    authored.roughness = 0.6;
    Scene::new(meshes, vec![authored], generation)
}

pub fn mesh(index: usize) -> MeshId {
    MeshId::from_index(index)
}

/// Fetcher that records every request; tests complete them explicitly, in
/// any order they choose.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub requests: Vec<(MeshId, String)>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful completion for the n-th recorded request.
    pub fn succeed(&self, index: usize) -> FetchCompletion {
        let (mesh, url) = self.requests[index].clone();
        FetchCompletion {
            mesh,
            url,
            result: Ok(Arc::new(TextureImage::solid([128, 128, 128, 255]))),
        }
    }

    /// Failed completion for the n-th recorded request.
    pub fn fail(&self, index: usize) -> FetchCompletion {
        let (mesh, url) = self.requests[index].clone();
        FetchCompletion {
            mesh,
            url,
            result: Err(FetchError::BadDataUri),
        }
    }
}

impl TextureFetcher for ScriptedFetcher {
    fn request(&mut self, mesh: MeshId, url: &str) {
        self.requests.push((mesh, url.to_string()));
    }

    fn drain(&mut self) -> Vec<FetchCompletion> {
        Vec::new()
    }
}
