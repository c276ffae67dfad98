//! CPU-side scene model.
//!
//! The loaded asset is flattened into an arena of meshes with stable ids and
//! a table of authored materials. The arena is externally replaceable (asset
//! reload swaps the whole `Scene`); everything else in the crate holds only
//! [`MeshId`]s into it and re-derives its working sets when the generation
//! changes. GPU buffers are not created here, the `render` module mirrors
//! this data onto the device, so the scene and everything that reconciles
//! against it stays testable without a GPU.

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use cgmath::SquareMatrix;

use crate::resources::TextureImage;

/// Stable per-session mesh identifier. Doubles as the pick-buffer id, which
/// is why zero is reserved for the background.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u32);

impl MeshId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// The value written into the pick buffer for this mesh.
    pub fn pick_id(self) -> u32 {
        self.0
    }

    /// Inverse of [`pick_id`](Self::pick_id); zero is the background.
    pub fn from_pick_id(id: u32) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }
}

/// UV-mapped surface texture bound to a material.
#[derive(Clone, Debug)]
pub struct TextureBinding {
    /// The URL this image was fetched from; the sync layer's staleness
    /// checks key on it.
    pub url: String,
    pub image: Arc<TextureImage>,
    /// Tiling repeat per axis.
    pub repeat: [f32; 2],
    /// Planar offset in texture space.
    pub offset: [f32; 2],
    /// Rotation in radians about `center`.
    pub rotation: f32,
    /// Rotation pivot in texture space; (0.5, 0.5) keeps tiles centered.
    pub center: [f32; 2],
}

impl TextureBinding {
    pub fn new(url: impl Into<String>, image: Arc<TextureImage>) -> Self {
        Self {
            url: url.into(),
            image,
            repeat: [1.0, 1.0],
            offset: [0.0, 0.0],
            rotation: 0.0,
            center: [0.5, 0.5],
        }
    }
}

/// The full shading state of one material slot.
#[derive(Clone, Debug)]
pub struct MaterialParams {
    pub name: String,
    /// Linear-light base color factor.
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
    pub emissive: [f32; 3],
    pub emissive_intensity: f32,
    pub double_sided: bool,
    pub transparent: bool,
    pub map: Option<TextureBinding>,
}

impl MaterialParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: [1.0, 1.0, 1.0],
            roughness: 1.0,
            metalness: 0.0,
            opacity: 1.0,
            emissive: [0.0, 0.0, 0.0],
            emissive_intensity: 0.0,
            double_sided: false,
            transparent: false,
            map: None,
        }
    }
}

/// Vertex layout shared by the CPU model and the GPU pipelines.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Debug, Default)]
pub struct MeshGeometry {
    pub vertices: Vec<SceneVertex>,
    pub indices: Vec<u32>,
}

/// One renderable sub-part of the asset.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub id: MeshId,
    pub name: String,
    /// Index into [`Scene::materials`]. Several meshes may share a slot
    /// until the sync layer gives a customizable mesh a private clone.
    pub material: usize,
    /// Flattened node-to-scene transform.
    pub transform: cgmath::Matrix4<f32>,
    pub geometry: MeshGeometry,
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to parse glTF: {0}")]
    Parse(#[from] gltf::Error),
    #[error("glTF buffer {index} is missing its payload")]
    MissingBuffer { index: usize },
    #[error("glTF buffer {index} is truncated: needs {needed} bytes, found {actual}")]
    TruncatedBuffer {
        index: usize,
        needed: usize,
        actual: usize,
    },
    #[error("mesh primitive has no position data")]
    MissingPositions,
    #[error("failed to decode embedded texture: {0}")]
    Image(#[from] image::ImageError),
}

/// Arena of meshes plus the authored material table.
#[derive(Debug)]
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<MaterialParams>,
    generation: u64,
}

impl Scene {
    /// Assemble a scene directly from parts. The loader goes through this;
    /// headless tooling and tests can too.
    pub fn new(meshes: Vec<Mesh>, materials: Vec<MaterialParams>, generation: u64) -> Self {
        Self {
            meshes,
            materials,
            generation,
        }
    }

    /// Identifies which asset load this arena came from. Everything caching
    /// per-mesh state must drop it when the generation changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.iter().find(|mesh| mesh.id == id)
    }

    pub fn contains(&self, id: MeshId) -> bool {
        self.mesh(id).is_some()
    }

    pub fn material_of(&self, id: MeshId) -> Option<&MaterialParams> {
        self.mesh(id).map(|mesh| &self.materials[mesh.material])
    }

    /// Parse a binary glTF payload into a flattened scene.
    ///
    /// Node transforms are composed down the hierarchy and stored per mesh;
    /// authored PBR factors and embedded base-color textures are captured as
    /// the material table. Consumed read-only: nothing here mutates the
    /// source data.
    pub fn from_gltf_bytes(bytes: &[u8], generation: u64) -> Result<Self, SceneError> {
        let reader = BufReader::new(Cursor::new(bytes));
        let doc = gltf::Gltf::from_reader(reader)?;

        let mut buffer_data: Vec<Vec<u8>> = Vec::new();
        for buffer in doc.buffers() {
            match buffer.source() {
                gltf::buffer::Source::Bin => match doc.blob.as_deref() {
                    // The parser validates views and accessors against the
                    // declared byteLength, not against the actual chunk, so
                    // a short chunk has to be rejected here before anything
                    // slices into it.
                    Some(blob) if blob.len() >= buffer.length() => {
                        buffer_data.push(blob.to_vec());
                    }
                    Some(blob) => {
                        return Err(SceneError::TruncatedBuffer {
                            index: buffer.index(),
                            needed: buffer.length(),
                            actual: blob.len(),
                        });
                    }
                    None => {
                        return Err(SceneError::MissingBuffer {
                            index: buffer.index(),
                        });
                    }
                },
                // External .bin sidecars are not part of the configurator's
                // asset contract; it consumes self-contained .glb files.
                gltf::buffer::Source::Uri(_) => {
                    return Err(SceneError::MissingBuffer {
                        index: buffer.index(),
                    });
                }
            }
        }

        let materials = load_materials(&doc, &buffer_data)?;

        let mut meshes = Vec::new();
        for scene in doc.scenes() {
            for node in scene.nodes() {
                flatten_node(
                    node,
                    cgmath::Matrix4::identity(),
                    &buffer_data,
                    &mut meshes,
                )?;
            }
        }

        log::info!(
            "scene generation {}: {} meshes, {} materials",
            generation,
            meshes.len(),
            materials.len()
        );

        Ok(Self::new(meshes, materials, generation))
    }
}

fn load_materials(
    doc: &gltf::Gltf,
    buffer_data: &[Vec<u8>],
) -> Result<Vec<MaterialParams>, SceneError> {
    let mut materials = Vec::new();
    for material in doc.materials() {
        let pbr = material.pbr_metallic_roughness();
        let base = pbr.base_color_factor();
        let name = material
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("material_{}", materials.len()));

        let map = match pbr.base_color_texture() {
            Some(info) => {
                let source = info.texture().source();
                decode_embedded_image(&source, buffer_data)?.map(|image| {
                    // Cache key for authored images, distinct from any URL
                    // the store could ever hand out.
                    let url = format!("gltf:image/{}", source.index());
                    TextureBinding::new(url, Arc::new(image))
                })
            }
            None => None,
        };

        materials.push(MaterialParams {
            name,
            base_color: [base[0], base[1], base[2]],
            roughness: pbr.roughness_factor(),
            metalness: pbr.metallic_factor(),
            opacity: base[3],
            emissive: material.emissive_factor(),
            emissive_intensity: 0.0,
            double_sided: material.double_sided(),
            transparent: !matches!(material.alpha_mode(), gltf::material::AlphaMode::Opaque),
            map,
        });
    }
    if materials.is_empty() {
        materials.push(MaterialParams::named("default"));
    }
    Ok(materials)
}

fn decode_embedded_image(
    source: &gltf::Image,
    buffer_data: &[Vec<u8>],
) -> Result<Option<TextureImage>, SceneError> {
    match source.source() {
        gltf::image::Source::View { view, .. } => {
            let buffer = buffer_data
                .get(view.buffer().index())
                .ok_or(SceneError::MissingBuffer {
                    index: view.buffer().index(),
                })?;
            let bytes = buffer
                .get(view.offset()..view.offset() + view.length())
                .ok_or(SceneError::TruncatedBuffer {
                    index: view.buffer().index(),
                    needed: view.offset() + view.length(),
                    actual: buffer.len(),
                })?;
            let decoded = image::load_from_memory(bytes)?;
            Ok(Some(TextureImage::from_dynamic(&decoded)))
        }
        // URI-referenced images would need the network; authored textures in
        // .glb assets are always embedded views.
        gltf::image::Source::Uri { uri, .. } => {
            log::warn!("skipping external authored texture {uri}");
            Ok(None)
        }
    }
}

fn flatten_node(
    node: gltf::scene::Node,
    parent: cgmath::Matrix4<f32>,
    buffer_data: &[Vec<u8>],
    meshes: &mut Vec<Mesh>,
) -> Result<(), SceneError> {
    let local: cgmath::Matrix4<f32> = node.transform().matrix().into();
    let world = parent * local;

    if let Some(mesh) = node.mesh() {
        let node_name = node
            .name()
            .or(mesh.name())
            .unwrap_or("unnamed_mesh")
            .to_string();
        for primitive in mesh.primitives() {
            let geometry = read_primitive(&primitive, buffer_data)?;
            let material = primitive.material().index().unwrap_or(0);
            let id = MeshId::from_index(meshes.len());
            meshes.push(Mesh {
                id,
                name: node_name.clone(),
                material,
                transform: world,
                geometry,
            });
        }
    }

    for child in node.children() {
        flatten_node(child, world, buffer_data, meshes)?;
    }
    Ok(())
}

fn read_primitive(
    primitive: &gltf::Primitive,
    buffer_data: &[Vec<u8>],
) -> Result<MeshGeometry, SceneError> {
    let reader = primitive.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));

    let mut vertices: Vec<SceneVertex> = reader
        .read_positions()
        .ok_or(SceneError::MissingPositions)?
        .map(|position| SceneVertex {
            position,
            ..Default::default()
        })
        .collect();

    if let Some(normals) = reader.read_normals() {
        for (vertex, normal) in vertices.iter_mut().zip(normals) {
            vertex.normal = normal;
        }
    }
    if let Some(uvs) = reader.read_tex_coords(0).map(|uvs| uvs.into_f32()) {
        for (vertex, uv) in vertices.iter_mut().zip(uvs) {
            vertex.uv = uv;
        }
    }

    let indices = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..vertices.len() as u32).collect(),
    };

    Ok(MeshGeometry { vertices, indices })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a binary glTF container from a JSON chunk and a BIN chunk.
    fn glb_bytes(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json_chunk = json.as_bytes().to_vec();
        while json_chunk.len() % 4 != 0 {
            json_chunk.push(b' ');
        }
        let mut bin_chunk = bin.to_vec();
        while bin_chunk.len() % 4 != 0 {
            bin_chunk.push(0);
        }
        let total = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
        let mut out = Vec::new();
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend(json_chunk);
        out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend(bin_chunk);
        out
    }

    #[test]
    fn truncated_binary_chunk_is_an_error_not_a_panic() {
        // The JSON declares 100 bytes; the BIN chunk carries 4. User-provided
        // assets arrive exactly this malformed.
        let json = r#"{"asset":{"version":"2.0"},"buffers":[{"byteLength":100}]}"#;
        let glb = glb_bytes(json, &[1, 2, 3, 4]);
        let err = Scene::from_gltf_bytes(&glb, 1).unwrap_err();
        assert!(matches!(
            err,
            SceneError::TruncatedBuffer {
                index: 0,
                needed: 100,
                ..
            }
        ));
    }

    #[test]
    fn mesh_ids_skip_the_background_sentinel() {
        assert_eq!(MeshId::from_index(0).pick_id(), 1);
        assert_eq!(MeshId::from_pick_id(0), None);
        assert_eq!(MeshId::from_pick_id(3), Some(MeshId::from_index(2)));
    }

    #[test]
    fn lookup_by_id() {
        let mesh = Mesh {
            id: MeshId::from_index(0),
            name: "Shape027".into(),
            material: 0,
            transform: cgmath::Matrix4::identity(),
            geometry: MeshGeometry::default(),
        };
        let scene = Scene::new(vec![mesh], vec![MaterialParams::named("vamp")], 1);
        assert!(scene.contains(MeshId::from_index(0)));
        assert!(!scene.contains(MeshId::from_index(5)));
        assert_eq!(
            scene.material_of(MeshId::from_index(0)).unwrap().name,
            "vamp"
        );
    }
}
