//! Loading of external image and model bytes.
//!
//! Texture inputs arrive three ways: http(s) URLs from the library catalogs,
//! local file paths from user uploads, and `data:` URIs produced by the AI
//! texture service. All of them funnel through [`fetch_bytes`] and decode to
//! a CPU-side [`TextureImage`]; GPU upload happens separately in
//! [`texture`].

pub mod texture;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decoded RGBA8 image data, shared by reference between the scene's
/// material bindings and the renderer's texture cache.
#[derive(Clone, Debug)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureImage {
    pub fn from_dynamic(img: &image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::from_dynamic(&image::load_from_memory(bytes)?))
    }

    /// Solid single-pixel image, used as the no-texture fallback binding.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed data URI")]
    BadDataUri,
    #[error("base64 payload is invalid: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a decodable image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Fetch raw bytes from a URL, file path, or data URI.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    if let Some(payload) = url.strip_prefix("data:") {
        let (_mime, data) = payload.split_once(";base64,").ok_or(FetchError::BadDataUri)?;
        return Ok(BASE64.decode(data)?);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let response = client.get(url).send().await?.error_for_status()?;
        return Ok(response.bytes().await?.to_vec());
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    std::fs::read(path).map_err(|source| FetchError::Read {
        path: path.to_string(),
        source,
    })
}

/// Fetch and decode a surface texture.
///
/// The decoder's top-to-bottom row order already matches glTF's top-left
/// UV origin, so the image goes to the GPU as decoded.
pub async fn fetch_texture_image(
    client: &reqwest::Client,
    url: &str,
) -> Result<TextureImage, FetchError> {
    let bytes = fetch_bytes(client, url).await?;
    let decoded = image::load_from_memory(&bytes)?;
    Ok(TextureImage::from_dynamic(&decoded))
}
