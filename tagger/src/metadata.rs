use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};
use little_exif::endian::Endian;
use little_exif::exif_tag::ExifTag;
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::ifd::ExifTagGroup;
use little_exif::metadata::Metadata;

use crate::error::ItemError;

// XPKeywords is not natively modeled by little_exif
const TAG_XP_KEYWORDS: u16 = 0x9C9E;

// little_exif as_u8_vec(JPEG) prefixes [APP1 marker 2B][length 2B][Exif\0\0 6B];
// img-parts set_exif() expects only the TIFF data that follows
const JPEG_EXIF_OVERHEAD: usize = 10;

const APP13_MARKER: u8 = 0xED;
const APP13_HEADER: &[u8] = b"Photoshop 3.0\0";
const RESOURCE_8BIM: &[u8] = b"8BIM";
const IPTC_RESOURCE_ID: u16 = 0x0404;

/// Embeds title and keywords into an image's own metadata: an EXIF pass and
/// an independent IPTC pass, each a read-modify-write that splices segments
/// and leaves the compressed image data untouched. No backup files are
/// created.
pub(crate) fn embed(path: &Path, title: &str, keywords: &[String]) -> Result<(), ItemError> {
    embed_exif(path, title, keywords)
        .map_err(|err| ItemError::MetadataWrite(format!("{}: {err:#}", path.display())))?;
    embed_iptc(path, title, keywords)
        .map_err(|err| ItemError::MetadataWrite(format!("{}: {err:#}", path.display())))?;
    Ok(())
}

/// EXIF: ImageDescription carries the title, XPKeywords the comma-joined
/// keyword list as UTF-16LE (the legacy tag's required encoding). Existing
/// tags survive when the container parses; otherwise a fresh one is built.
fn embed_exif(path: &Path, title: &str, keywords: &[String]) -> Result<()> {
    let file_bytes = fs::read(path).context("failed to read image")?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|err| anyhow!("failed to parse jpeg: {err}"))?;

    let mut metadata = load_existing_exif(path).unwrap_or_else(Metadata::new);
    metadata.set_tag(ExifTag::ImageDescription(title.to_string()));
    if let Some(tag) = keywords_tag(keywords) {
        metadata.set_tag(tag);
    }

    let exif_bytes = metadata
        .as_u8_vec(FileExtension::JPEG)
        .context("failed to encode exif")?;
    if exif_bytes.len() > JPEG_EXIF_OVERHEAD {
        jpeg.set_exif(Some(Bytes::from(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())));
    }

    fs::write(path, jpeg.encoder().bytes()).context("failed to write image")?;
    Ok(())
}

/// little_exif can panic on malformed containers; treat that like any other
/// parse failure and start from an empty container.
fn load_existing_exif(path: &Path) -> Option<Metadata> {
    let owned = path.to_path_buf();
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(move || Metadata::new_from_path(&owned));
    std::panic::set_hook(prev_hook);
    match result {
        Ok(Ok(metadata)) => Some(metadata),
        Ok(Err(_)) | Err(_) => None,
    }
}

fn keywords_tag(keywords: &[String]) -> Option<ExifTag> {
    let raw = encode_utf16le(&keywords.join(","));
    ExifTag::from_u16_with_data(
        TAG_XP_KEYWORDS,
        &ExifTagFormat::INT8U,
        &raw,
        &Endian::Little,
        &ExifTagGroup::GENERIC,
    )
    .ok()
}

fn encode_utf16le(value: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = value
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    bytes.push(0);
    bytes.push(0);
    bytes
}

/// IPTC (APP13 / Photoshop 3.0), the second legacy sidecar: Caption/Abstract
/// carries the title, one Keywords record per keyword. Foreign 8BIM
/// resources in an existing segment are preserved.
fn embed_iptc(path: &Path, title: &str, keywords: &[String]) -> Result<()> {
    let file_bytes = fs::read(path).context("failed to read image")?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|err| anyhow!("failed to parse jpeg: {err}"))?;

    let existing_pos = jpeg.segments().iter().position(|segment| {
        segment.marker() == APP13_MARKER && segment.contents().starts_with(APP13_HEADER)
    });
    let existing = existing_pos.map(|pos| jpeg.segments()[pos].contents().to_vec());

    let contents = build_app13(existing.as_deref(), title, keywords);
    let segment = JpegSegment::new_with_contents(APP13_MARKER, Bytes::from(contents));

    let segments = jpeg.segments_mut();
    match existing_pos {
        Some(pos) => segments[pos] = segment,
        None => {
            let pos = segments.len().min(3);
            segments.insert(pos, segment);
        }
    }

    fs::write(path, jpeg.encoder().bytes()).context("failed to write image")?;
    Ok(())
}

fn build_app13(existing: Option<&[u8]>, title: &str, keywords: &[String]) -> Vec<u8> {
    let mut contents = Vec::new();
    contents.extend_from_slice(APP13_HEADER);

    // keep every 8BIM resource except the IPTC-IIM block we are replacing
    if let Some(data) = existing {
        let mut pos = APP13_HEADER.len();
        while pos + 12 <= data.len() {
            if &data[pos..pos + 4] != RESOURCE_8BIM {
                break;
            }
            let resource_id = u16::from_be_bytes([data[pos + 4], data[pos + 5]]);
            let pascal_len = data[pos + 6] as usize;
            let pascal_padded = if (pascal_len + 1) % 2 == 0 {
                pascal_len + 1
            } else {
                pascal_len + 2
            };
            let data_start = pos + 6 + pascal_padded;
            if data_start + 4 > data.len() {
                break;
            }
            let data_len = u32::from_be_bytes([
                data[data_start],
                data[data_start + 1],
                data[data_start + 2],
                data[data_start + 3],
            ]) as usize;
            let resource_end = data_start + 4 + data_len;
            let resource_end_padded = if data_len % 2 == 0 {
                resource_end
            } else {
                resource_end + 1
            };

            if resource_id != IPTC_RESOURCE_ID {
                let end = resource_end_padded.min(data.len());
                contents.extend_from_slice(&data[pos..end]);
            }
            pos = resource_end_padded;
        }
    }

    let mut iptc_data = Vec::new();

    // record version (2:0) is required
    iptc_data.extend_from_slice(&[0x1C, 0x02, 0x00, 0x00, 0x02, 0x00, 0x02]);

    // one keywords record (2:25) per keyword
    for keyword in keywords {
        let bytes = keyword.as_bytes();
        let len = bytes.len().min(64) as u16;
        iptc_data.extend_from_slice(&[0x1C, 0x02, 0x19]);
        iptc_data.extend_from_slice(&len.to_be_bytes());
        iptc_data.extend_from_slice(&bytes[..len as usize]);
    }

    // caption/abstract (2:120) carries the title
    let title_bytes = title.as_bytes();
    let title_len = title_bytes.len().min(2000) as u16;
    iptc_data.extend_from_slice(&[0x1C, 0x02, 0x78]);
    iptc_data.extend_from_slice(&title_len.to_be_bytes());
    iptc_data.extend_from_slice(&title_bytes[..title_len as usize]);

    contents.extend_from_slice(RESOURCE_8BIM);
    contents.extend_from_slice(&IPTC_RESOURCE_ID.to_be_bytes());
    contents.push(0x00); // empty pascal name
    contents.push(0x00); // padding to even
    contents.extend_from_slice(&(iptc_data.len() as u32).to_be_bytes());
    contents.extend_from_slice(&iptc_data);
    if iptc_data.len() % 2 != 0 {
        contents.push(0x00);
    }

    contents
}
