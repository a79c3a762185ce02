use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use crate::error::ItemError;

/// Must be called once at startup, before any container is opened.
pub(crate) fn init() -> Result<()> {
    ffmpeg::init().context("failed to initialize ffmpeg")
}

/// Preview frames are pulled at these fractions of the total duration.
const FRAME_POSITIONS: [f64; 2] = [0.25, 0.75];

/// Builds the single image sent to the tagging service for a video: two
/// representative frames, each downscaled to fit the bound, side by side.
pub(crate) fn composite_preview(
    path: &Path,
    max_width: u32,
    max_height: u32,
) -> Result<RgbImage, ItemError> {
    let frames = extract_frames(path, max_width, max_height)
        .map_err(|err| ItemError::CorruptMedia(format!("{}: {err:#}", path.display())))?;
    Ok(merge_side_by_side(&frames[0], &frames[1]))
}

fn extract_frames(path: &Path, max_width: u32, max_height: u32) -> Result<Vec<RgbImage>> {
    let mut input = ffmpeg::format::input(&path).context("failed to open video container")?;

    let duration = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
    if duration <= 0.0 {
        anyhow::bail!("container reports no duration");
    }

    let (stream_index, time_base, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("no video stream found")?;
        (
            stream.index(),
            f64::from(stream.time_base()),
            stream.parameters(),
        )
    };

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
        .context("failed to create decoder context")?
        .decoder()
        .video()
        .context("failed to create video decoder")?;

    // video frames keep their aspect ratio; the scaler does the downscale
    let (dst_width, dst_height) = fit_within(
        (decoder.width(), decoder.height()),
        (max_width, max_height),
    );
    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        dst_width,
        dst_height,
        ffmpeg::software::scaling::flag::Flags::LANCZOS,
    )
    .context("failed to create scaler")?;

    let mut frames = Vec::with_capacity(FRAME_POSITIONS.len());
    for position in FRAME_POSITIONS {
        let target = duration * position;
        let seek_ts = (target * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        input
            .seek(seek_ts, ..seek_ts)
            .with_context(|| format!("failed to seek to {target:.2}s"))?;
        decoder.flush();
        let frame = decode_frame_at(&mut input, stream_index, &mut decoder, &mut scaler, target, time_base)
            .with_context(|| format!("failed to decode frame at {target:.2}s"))?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Decodes forward from the seek point until a frame at or past the target
/// timestamp appears. Streams without usable timestamps yield the first
/// decodable frame instead.
fn decode_frame_at(
    input: &mut ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::context::Context,
    target: f64,
    time_base: f64,
) -> Result<RgbImage> {
    let mut decoded = ffmpeg::util::frame::video::Video::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut decoded).is_ok() {
            let reached = decoded
                .pts()
                .map(|pts| pts as f64 * time_base >= target)
                .unwrap_or(true);
            if reached {
                return frame_to_image(scaler, &decoded);
            }
        }
    }

    // drain the decoder; a short stream may end before the target
    decoder.send_eof().ok();
    if decoder.receive_frame(&mut decoded).is_ok() {
        return frame_to_image(scaler, &decoded);
    }
    anyhow::bail!("no decodable frame near {target:.2}s")
}

fn frame_to_image(
    scaler: &mut ffmpeg::software::scaling::context::Context,
    frame: &ffmpeg::util::frame::video::Video,
) -> Result<RgbImage> {
    let mut rgb = ffmpeg::util::frame::video::Video::empty();
    scaler.run(frame, &mut rgb).context("failed to scale frame")?;

    let width = rgb.width();
    let height = rgb.height();
    let stride = rgb.stride(0);
    let data = rgb.data(0);

    // rows carry alignment padding; copy only the visible pixels
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_len]);
    }

    RgbImage::from_raw(width, height, pixels).context("failed to build image from frame data")
}

/// Largest size at most `bounds` with the source aspect ratio; sources
/// already inside the bound are left alone.
pub(crate) fn fit_within(
    (width, height): (u32, u32),
    (max_width, max_height): (u32, u32),
) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height));
    let scaled_width = ((f64::from(width) * scale).round() as u32).clamp(1, max_width);
    let scaled_height = ((f64::from(height) * scale).round() as u32).clamp(1, max_height);
    (scaled_width, scaled_height)
}

/// Concatenates two frames horizontally: width is the sum, height the max,
/// with any vertical gap left as canvas background.
pub(crate) fn merge_side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());
    let mut canvas = RgbImage::new(width, height);
    image::imageops::replace(&mut canvas, left, 0, 0);
    image::imageops::replace(&mut canvas, right, i64::from(left.width()), 0);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        assert_eq!(fit_within((1000, 600), (510, 510)), (510, 306));
        assert_eq!(fit_within((600, 1000), (510, 510)), (306, 510));
        assert_eq!(fit_within((400, 300), (510, 510)), (400, 300));
        assert_eq!(fit_within((510, 510), (510, 510)), (510, 510));
    }

    #[test]
    fn merge_places_frames_side_by_side() {
        let left = RgbImage::from_pixel(400, 300, Rgb([255, 0, 0]));
        let right = RgbImage::from_pixel(300, 400, Rgb([0, 0, 255]));
        let merged = merge_side_by_side(&left, &right);

        assert_eq!((merged.width(), merged.height()), (700, 400));
        assert_eq!(merged.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(merged.get_pixel(399, 299), &Rgb([255, 0, 0]));
        assert_eq!(merged.get_pixel(400, 0), &Rgb([0, 0, 255]));
        assert_eq!(merged.get_pixel(699, 399), &Rgb([0, 0, 255]));
        // below the shorter frame the canvas stays unpainted
        assert_eq!(merged.get_pixel(0, 350), &Rgb([0, 0, 0]));
    }
}
