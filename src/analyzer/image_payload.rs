//! 送信用画像データ
//!
//! 長辺が上限を超える画像は縮小してJPEGで再エンコードする。
//! それ以外は元のバイト列をそのまま送る。

use crate::error::{LabelAuditError, Result};
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// 画像を読み込み、必要なら縮小する
///
/// デコードできないファイルは `ImageLoad` エラー。
pub fn load_image(path: &Path, max_size: u32) -> Result<ImagePayload> {
    let bytes = std::fs::read(path)
        .map_err(|e| LabelAuditError::ImageLoad(format!("{}: {}", path.display(), e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| LabelAuditError::ImageLoad(format!("{}: {}", path.display(), e)))?;

    if image.width().max(image.height()) <= max_size {
        return Ok(ImagePayload {
            mime_type: mime_type_for(path).to_string(),
            data: bytes,
        });
    }

    let resized = image.resize(max_size, max_size, FilterType::Triangle);
    tracing::debug!(
        file = %path.display(),
        from = ?(image.width(), image.height()),
        to = ?(resized.width(), resized.height()),
        "画像を縮小しました"
    );

    let mut data = Vec::new();
    DynamicImage::ImageRgb8(resized.to_rgb8())
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)
        .map_err(|e| LabelAuditError::ImageLoad(format!("{}: {}", path.display(), e)))?;

    Ok(ImagePayload {
        mime_type: "image/jpeg".into(),
        data,
    })
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::tempdir;

    #[test]
    fn test_small_image_is_sent_as_is() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pequena.png");
        RgbImage::new(20, 10).save(&path).unwrap();

        let payload = load_image(&path, 100).unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.data, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_large_image_is_downscaled_to_jpeg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grande.png");
        RgbImage::new(400, 200).save(&path).unwrap();

        let payload = load_image(&path, 100).unwrap();
        assert_eq!(payload.mime_type, "image/jpeg");

        let decoded = image::load_from_memory(&payload.data).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn test_unreadable_image_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quebrada.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            load_image(&path, 100),
            Err(LabelAuditError::ImageLoad(_))
        ));
    }

    #[test]
    fn test_base64() {
        let payload = ImagePayload {
            mime_type: "image/jpeg".into(),
            data: b"abc".to_vec(),
        };
        assert_eq!(payload.to_base64(), "YWJj");
    }
}
