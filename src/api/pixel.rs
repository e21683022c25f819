use anyhow::{bail, Context, Result};
use axum::body::Bytes;
use mime_guess::from_path;
use rust_embed::RustEmbed;
use std::path::Path;

#[derive(RustEmbed)]
#[folder = "assets"]
struct Assets;

const EMBEDDED_PIXEL: &str = "beacon.png";

/// The image returned by every pixel request, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Pixel {
    pub bytes: Bytes,
    pub content_type: String,
}

impl Pixel {
    /// Load the pixel from `path` when given, otherwise the embedded asset.
    ///
    /// A missing or empty file is an error so the process never starts
    /// serving empty beacons.
    pub async fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read pixel from {path}"))?;
                if content.is_empty() {
                    bail!("pixel file {path} is empty");
                }
                Ok(Self {
                    bytes: Bytes::from(content),
                    content_type: from_path(Path::new(path))
                        .first_or_octet_stream()
                        .to_string(),
                })
            }
            None => Self::embedded(),
        }
    }

    pub fn embedded() -> Result<Self> {
        let asset = Assets::get(EMBEDDED_PIXEL)
            .with_context(|| format!("embedded asset {EMBEDDED_PIXEL} is missing"))?;
        Ok(Self {
            bytes: Bytes::from(asset.data.into_owned()),
            content_type: "image/png".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_pixel_is_png() {
        let pixel = Pixel::embedded().unwrap();
        assert_eq!(pixel.content_type, "image/png");
        assert!(pixel.bytes.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn test_missing_override_fails() {
        assert!(Pixel::load(Some("/nonexistent/beacon.gif")).await.is_err());
    }
}
