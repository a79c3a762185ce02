use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, RgbImage};
use mime_guess::{MimeGuess, mime};

use crate::config::MediaConfig;
use crate::error::ItemError;

type ItemResult<T> = std::result::Result<T, ItemError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Word used for this kind in the tagging instruction.
    pub fn subject(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

pub(crate) fn classify(path: &Path) -> Option<MediaKind> {
    let guess = MimeGuess::from_path(path).first()?;
    if guess.type_() == mime::IMAGE {
        Some(MediaKind::Image)
    } else if guess.type_() == mime::VIDEO {
        Some(MediaKind::Video)
    } else {
        None
    }
}

pub(crate) fn is_jpeg_ext(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

/// The stable key an item is addressed by across cache, output and report.
/// Images in a non-JPEG format are converted before tagging, so their
/// identifier switches to the `.jpg` name; everything else keeps its own.
pub(crate) fn logical_identifier(file_name: &str, kind: MediaKind) -> String {
    match kind {
        MediaKind::Video => file_name.to_string(),
        MediaKind::Image => {
            if is_jpeg_ext(file_name) {
                file_name.to_string()
            } else {
                let stem = Path::new(file_name)
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or(file_name);
                format!("{stem}.jpg")
            }
        }
    }
}

/// Re-encodes any decodable image as RGB JPEG at `dst`. Transparency is
/// dropped; animated inputs keep their first frame.
pub(crate) fn convert_to_jpeg(src: &Path, dst: &Path, quality: u8) -> ItemResult<()> {
    let img = image::open(src)
        .map_err(|err| ItemError::CorruptMedia(format!("{}: {err}", src.display())))?;
    save_jpeg(&img, dst, quality)
        .map_err(|err| ItemError::CorruptMedia(format!("{}: {err:#}", src.display())))
}

/// Builds the transport payload for an image artifact: base64 of the JPEG
/// bytes, from a stretched copy when either dimension exceeds the bound,
/// from the file itself otherwise. The resized copy lands in `scratch` and
/// is never written next to the originals.
pub(crate) fn encode_payload(
    artifact: &Path,
    scratch: &Path,
    media: &MediaConfig,
) -> ItemResult<String> {
    let img = image::open(artifact)
        .map_err(|err| ItemError::CorruptMedia(format!("{}: {err}", artifact.display())))?;
    let (width, height) = img.dimensions();

    let bytes = if width > media.max_width || height > media.max_height {
        // stretched to exactly the bound; still images do not keep their
        // aspect ratio
        let resized = img.resize_exact(media.max_width, media.max_height, FilterType::Triangle);
        let name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image.jpg");
        let resized_path = scratch.join(format!("resized_{name}"));
        save_jpeg(&resized, &resized_path, media.jpeg_quality)
            .map_err(|err| ItemError::CorruptMedia(format!("{}: {err:#}", artifact.display())))?;
        fs::read(&resized_path)
            .map_err(|err| ItemError::CorruptMedia(format!("{}: {err}", resized_path.display())))?
    } else {
        fs::read(artifact)
            .map_err(|err| ItemError::CorruptMedia(format!("{}: {err}", artifact.display())))?
    };

    Ok(general_purpose::STANDARD.encode(bytes))
}

pub(crate) fn encode_jpeg_bytes(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode(image, image.width(), image.height(), ColorType::Rgb8.into())
        .context("failed to encode jpeg")?;
    Ok(buffer)
}

fn save_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    let rgb = img.to_rgb8();
    let buffer = encode_jpeg_bytes(&rgb, quality)?;
    fs::write(path, buffer).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn solid_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([120, 80, 40]))
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(classify(Path::new("photo.png")), Some(MediaKind::Image));
        assert_eq!(classify(Path::new("photo.JPG")), Some(MediaKind::Image));
        assert_eq!(classify(Path::new("clip.mp4")), Some(MediaKind::Video));
        assert_eq!(classify(Path::new("clip.mov")), Some(MediaKind::Video));
        assert_eq!(classify(Path::new("notes.txt")), None);
        assert_eq!(classify(Path::new("no_extension")), None);
    }

    // A converted PNG keeps addressing the same logical item under its
    // JPEG name; JPEGs and videos keep their own.
    #[test]
    fn logical_identifier_follows_conversion() {
        assert_eq!(
            logical_identifier("photo.png", MediaKind::Image),
            "photo.jpg"
        );
        assert_eq!(
            logical_identifier("Photo.PNG", MediaKind::Image),
            "Photo.jpg"
        );
        assert_eq!(
            logical_identifier("photo.jpeg", MediaKind::Image),
            "photo.jpeg"
        );
        assert_eq!(logical_identifier("clip.mp4", MediaKind::Video), "clip.mp4");
    }

    #[test]
    fn oversized_image_is_stretched_to_the_bound() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("wide.jpg");
        let img = DynamicImage::ImageRgb8(solid_image(1000, 600));
        save_jpeg(&img, &artifact, 90).unwrap();

        let payload = encode_payload(&artifact, tmp.path(), &MediaConfig::default()).unwrap();
        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (510, 510));
    }

    #[test]
    fn small_image_passes_through_unchanged() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("small.jpg");
        let img = DynamicImage::ImageRgb8(solid_image(100, 80));
        save_jpeg(&img, &artifact, 90).unwrap();

        let payload = encode_payload(&artifact, tmp.path(), &MediaConfig::default()).unwrap();
        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        assert_eq!(bytes, fs::read(&artifact).unwrap());
    }

    #[test]
    fn convert_to_jpeg_drops_alpha() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("photo.png");
        let dst = tmp.path().join("photo.jpg");
        let rgba = image::RgbaImage::from_pixel(16, 16, image::Rgba([10, 200, 30, 128]));
        rgba.save(&src).unwrap();

        convert_to_jpeg(&src, &dst, 90).unwrap();
        let converted = image::open(&dst).unwrap();
        assert_eq!(converted.color(), ColorType::Rgb8);
        assert_eq!(converted.dimensions(), (16, 16));
    }

    #[test]
    fn unreadable_image_is_a_corrupt_item() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("broken.jpg");
        fs::write(&artifact, b"not a jpeg").unwrap();

        let err = encode_payload(&artifact, tmp.path(), &MediaConfig::default()).unwrap_err();
        assert!(matches!(err, ItemError::CorruptMedia(_)));
    }
}
