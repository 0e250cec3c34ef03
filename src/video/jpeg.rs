//! JPEG encode/decode through `OpenCV`, plus RGB packing for sinks.

use std::sync::Arc;

use opencv::{
    core::{AlgorithmHint, CV_8UC3, Mat, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};

use crate::media::utils::now_millis;

use super::{video_error::VideoError, video_sink::DecodedVideoFrame};

/// Resizes `frame` to `width`x`height` when needed and encodes it as JPEG.
///
/// # Errors
/// `OpenCV` failures, or `EncodeFailed` when the encoder refuses the image.
pub fn encode_jpeg(
    frame: &Mat,
    width: i32,
    height: i32,
    quality: i32,
) -> Result<Vec<u8>, VideoError> {
    let mut resized = Mat::default();
    let src = if frame.cols() == width && frame.rows() == height {
        frame
    } else {
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(width, height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        &resized
    };

    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    if !imgcodecs::imencode(".jpg", src, &mut buf, &params)? {
        return Err(VideoError::EncodeFailed(format!(
            "{}x{} frame rejected",
            src.cols(),
            src.rows()
        )));
    }
    Ok(buf.to_vec())
}

/// Decodes a JPEG blob into a BGR `Mat`.
///
/// # Errors
/// `DecodeFailed` when the bytes are not a decodable image.
pub fn decode_jpeg_mat(bytes: &[u8]) -> Result<Mat, VideoError> {
    let buf = Vector::<u8>::from_slice(bytes);
    let mat = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if mat.empty() {
        return Err(VideoError::DecodeFailed(format!("{} bytes", bytes.len())));
    }
    Ok(mat)
}

/// Decodes a JPEG blob into a frame ready for a [`VideoSink`](super::video_sink::VideoSink).
///
/// # Errors
/// See [`decode_jpeg_mat`].
pub fn decode_jpeg(bytes: &[u8]) -> Result<DecodedVideoFrame, VideoError> {
    let mat = decode_jpeg_mat(bytes)?;
    to_rgb_frame(&mat)
}

/// Converts a BGR `Mat` to a packed RGB frame.
///
/// # Errors
/// `OpenCV` conversion failures.
pub fn to_rgb_frame(bgr: &Mat) -> Result<DecodedVideoFrame, VideoError> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        bgr,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let width = u32::try_from(rgb.cols()).unwrap_or(0);
    let height = u32::try_from(rgb.rows()).unwrap_or(0);
    let bytes = tight_rgb_bytes(&rgb, width, height)?;
    Ok(DecodedVideoFrame {
        width,
        height,
        rgb: Arc::new(bytes),
        timestamp_ms: now_millis(),
    })
}

/// Always returns tightly packed RGB (len = width*height*3), regardless of stride/continuity.
///
/// # Errors
/// `OpenCV` access failures.
pub fn tight_rgb_bytes(mat: &Mat, width: u32, height: u32) -> opencv::Result<Vec<u8>> {
    if mat.typ() != CV_8UC3 {
        let mut fixed = Mat::default();
        mat.convert_to(&mut fixed, CV_8UC3, 1.0, 0.0)?;
        return tight_rgb_bytes(&fixed, width, height);
    }

    // a deep copy is always continuous
    let owned;
    let m = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    let ch = usize::try_from(m.channels()).unwrap_or(3);
    let expected = width as usize * height as usize * ch;
    let data = m.data_bytes()?;
    if data.len() == expected {
        return Ok(data.to_vec());
    }

    // row copy using the real step
    let step_bytes = m.step1(0)? * m.elem_size()?;
    let cols = usize::try_from(m.cols()).unwrap_or(0);
    let rows = usize::try_from(m.rows()).unwrap_or(0);
    let row_bytes = cols * ch;

    let mut out = vec![0u8; rows * row_bytes];
    for r in 0..rows {
        let src = &data[r * step_bytes..r * step_bytes + row_bytes];
        out[r * row_bytes..(r + 1) * row_bytes].copy_from_slice(src);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use opencv::core::Scalar;

    fn solid(w: i32, h: i32, bgr: (f64, f64, f64)) -> Mat {
        Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::new(bgr.0, bgr.1, bgr.2, 0.0))
            .unwrap()
    }

    #[test]
    fn encode_resizes_to_target() {
        let jpeg = encode_jpeg(&solid(320, 240, (0.0, 0.0, 255.0)), 640, 480, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let back = decode_jpeg_mat(&jpeg).unwrap();
        assert_eq!((back.cols(), back.rows()), (640, 480));
    }

    #[test]
    fn decode_produces_rgb_order() {
        let jpeg = encode_jpeg(&solid(64, 48, (0.0, 0.0, 255.0)), 64, 48, 95).unwrap();
        let frame = decode_jpeg(&jpeg).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.rgb.len(), 64 * 48 * 3);
        // pure red in BGR comes out with R dominant
        assert!(frame.rgb[0] > 200 && frame.rgb[2] < 60);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 1, 2, 3]).is_err());
    }
}
