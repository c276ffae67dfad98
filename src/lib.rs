//! matshift
//!
//! An interactive 3D product configurator engine: load a glTF asset, pick
//! customizable parts with the mouse, edit their materials live (colors,
//! textures, sliders), generate textures with an AI service, and export a
//! multi-view composite capture.
//!
//! High-level modules
//! - `color`: packed sRGB to CIELAB conversions for perceptual color edits
//! - `parts`: keyword-based classification of mesh names into part categories
//! - `store`: the material configuration store and texture libraries
//! - `scene`: CPU-side scene model loaded from binary glTF
//! - `sync`: reconciliation between store and scene, async texture binding,
//!   glow animation
//! - `picking`: selection state machine and the GPU pick buffer
//! - `capture`: multi-view composite PNG export
//! - `texgen`: AI texture generation client
//! - `camera`, `context`, `pipelines`, `render`, `resources`: the wgpu
//!   rendering stack
//! - `app`: the winit application shell tying everything together

pub mod app;
pub mod camera;
pub mod capture;
pub mod color;
pub mod context;
pub mod parts;
pub mod picking;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod scene;
pub mod store;
pub mod sync;
pub mod texgen;

pub use parts::{PartCategory, PartMap};
pub use picking::{Selection, SelectionController};
pub use scene::{MeshId, Scene};
pub use store::{MaterialConfig, MaterialStore};
pub use sync::SceneSync;
