//! Geometric normalization of captured frames into upright RGB.
//!
//! Rotation is applied clockwise by the frame's rotation hint, then the
//! result is optionally flipped horizontally (front-facing cameras deliver
//! a mirrored view of the user).

use ndarray::{s, ArrayView3, Axis};
use thiserror::Error;

use crate::shared::frame::{Frame, NormalizedFrame, PixelFormat, Rotation};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported pixel format {0:?}")]
    Unsupported(PixelFormat),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
}

pub struct FramePreprocessor;

impl FramePreprocessor {
    pub fn normalize(frame: &Frame, mirror: bool) -> Result<NormalizedFrame, FormatError> {
        let format = frame.format();
        let bpp = format
            .bytes_per_pixel()
            .ok_or(FormatError::Unsupported(format))?;

        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let expected = w * h * bpp;
        let mismatch = || FormatError::LengthMismatch {
            expected,
            actual: frame.data().len(),
            width: frame.width(),
            height: frame.height(),
        };
        if frame.data().len() != expected {
            return Err(mismatch());
        }
        let packed = ArrayView3::from_shape((h, w, bpp), frame.data()).map_err(|_| mismatch())?;

        let rgb = match format {
            PixelFormat::Bgra8888 => packed.slice_move(s![.., .., 0..3;-1]),
            _ => packed.slice_move(s![.., .., 0..3]),
        };

        let mut upright = orient(rgb, frame.rotation());
        if mirror {
            upright.invert_axis(Axis(1));
        }

        let (out_h, out_w, _) = upright.dim();
        let data: Vec<u8> = upright.iter().copied().collect();
        Ok(NormalizedFrame::new(data, out_w as u32, out_h as u32))
    }
}

/// Rotates an `(h, w, c)` view clockwise without copying.
fn orient(view: ArrayView3<'_, u8>, rotation: Rotation) -> ArrayView3<'_, u8> {
    match rotation {
        Rotation::Deg0 => view,
        Rotation::Deg90 => {
            let mut t = view.permuted_axes([1, 0, 2]);
            t.invert_axis(Axis(1));
            t
        }
        Rotation::Deg180 => {
            let mut t = view;
            t.invert_axis(Axis(0));
            t.invert_axis(Axis(1));
            t
        }
        Rotation::Deg270 => {
            let mut t = view.permuted_axes([1, 0, 2]);
            t.invert_axis(Axis(0));
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::Timestamp;
    use rstest::rstest;

    /// RGB frame whose pixels are all distinct: (r, c) holds [r*10 + c, 100 + r, 200 + c].
    fn labelled_rgb(width: u32, height: u32, rotation: Rotation) -> Frame {
        let mut data = Vec::new();
        for r in 0..height {
            for c in 0..width {
                data.extend_from_slice(&[(r * 10 + c) as u8, (100 + r) as u8, (200 + c) as u8]);
            }
        }
        Frame::new(
            data,
            width,
            height,
            PixelFormat::Rgb888,
            rotation,
            Timestamp::from_millis(0),
        )
    }

    /// Reference clockwise rotation by repeated quarter turns on explicit indices.
    fn reference_rotate(data: &[u8], width: usize, height: usize, quarter_turns: u32) -> (Vec<u8>, usize, usize) {
        let (mut buf, mut w, mut h) = (data.to_vec(), width, height);
        for _ in 0..quarter_turns {
            let mut out = vec![0u8; buf.len()];
            let (nw, nh) = (h, w);
            for r in 0..h {
                for c in 0..w {
                    // (r, c) lands at (c, h - 1 - r) after a clockwise quarter turn
                    let (nr, nc) = (c, h - 1 - r);
                    let src = (r * w + c) * 3;
                    let dst = (nr * nw + nc) * 3;
                    out[dst..dst + 3].copy_from_slice(&buf[src..src + 3]);
                }
            }
            buf = out;
            w = nw;
            h = nh;
        }
        (buf, w, h)
    }

    #[test]
    fn test_upright_without_mirror_is_identity() {
        let frame = labelled_rgb(3, 2, Rotation::Deg0);
        let out = FramePreprocessor::normalize(&frame, false).unwrap();
        assert_eq!(out.data(), frame.data());
        assert_eq!((out.width(), out.height()), (3, 2));
    }

    #[rstest]
    #[case::quarter(Rotation::Deg90, 1)]
    #[case::half(Rotation::Deg180, 2)]
    #[case::three_quarter(Rotation::Deg270, 3)]
    fn test_rotation_matches_reference(#[case] rotation: Rotation, #[case] turns: u32) {
        let frame = labelled_rgb(3, 2, rotation);
        let (expected, ew, eh) = reference_rotate(frame.data(), 3, 2, turns);

        let out = FramePreprocessor::normalize(&frame, false).unwrap();

        assert_eq!(out.data(), &expected[..]);
        assert_eq!((out.width() as usize, out.height() as usize), (ew, eh));
    }

    #[test]
    fn test_rotated_frame_matches_upright_original() {
        // An upright image rotated 90° counter-clockwise by the camera,
        // tagged with a 90° hint, normalizes back to the upright image.
        let upright = labelled_rgb(3, 2, Rotation::Deg0);
        let (sideways, w, h) = reference_rotate(upright.data(), 3, 2, 3);
        let captured = Frame::new(
            sideways,
            w as u32,
            h as u32,
            PixelFormat::Rgb888,
            Rotation::Deg90,
            Timestamp::from_millis(0),
        );

        let out = FramePreprocessor::normalize(&captured, false).unwrap();

        assert_eq!(out.data(), upright.data());
        assert_eq!((out.width(), out.height()), (3, 2));
    }

    #[test]
    fn test_mirror_flips_columns() {
        let frame = labelled_rgb(3, 1, Rotation::Deg0);
        let out = FramePreprocessor::normalize(&frame, true).unwrap();
        let arr = out.as_ndarray();
        assert_eq!(arr[[0, 0, 0]], 2);
        assert_eq!(arr[[0, 2, 0]], 0);
    }

    #[test]
    fn test_double_mirror_restores_original() {
        let frame = labelled_rgb(4, 3, Rotation::Deg0);
        let once = FramePreprocessor::normalize(&frame, true).unwrap();
        let twice =
            FramePreprocessor::normalize(&once.into_frame(frame.timestamp()), true).unwrap();
        assert_eq!(twice.data(), frame.data());
    }

    #[test]
    fn test_mirror_applies_after_rotation() {
        let frame = labelled_rgb(3, 2, Rotation::Deg90);
        let (rotated, w, h) = reference_rotate(frame.data(), 3, 2, 1);
        let mut expected = Vec::with_capacity(rotated.len());
        for r in 0..h {
            for c in (0..w).rev() {
                let i = (r * w + c) * 3;
                expected.extend_from_slice(&rotated[i..i + 3]);
            }
        }

        let out = FramePreprocessor::normalize(&frame, true).unwrap();

        assert_eq!(out.data(), &expected[..]);
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let data = vec![1, 2, 3, 255, 4, 5, 6, 255];
        let frame = Frame::new(
            data,
            2,
            1,
            PixelFormat::Rgba8888,
            Rotation::Deg0,
            Timestamp::from_millis(0),
        );
        let out = FramePreprocessor::normalize(&frame, false).unwrap();
        assert_eq!(out.data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_bgra_is_swizzled_to_rgb() {
        let data = vec![30, 20, 10, 255];
        let frame = Frame::new(
            data,
            1,
            1,
            PixelFormat::Bgra8888,
            Rotation::Deg0,
            Timestamp::from_millis(0),
        );
        let out = FramePreprocessor::normalize(&frame, false).unwrap();
        assert_eq!(out.data(), &[10, 20, 30]);
    }

    #[test]
    fn test_yuv_is_unsupported() {
        let frame = Frame::new(
            vec![0u8; 6],
            2,
            2,
            PixelFormat::Yuv420,
            Rotation::Deg0,
            Timestamp::from_millis(0),
        );
        let err = FramePreprocessor::normalize(&frame, false).unwrap_err();
        assert_eq!(err, FormatError::Unsupported(PixelFormat::Yuv420));
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let frame = Frame::new(
            vec![0u8; 5],
            2,
            1,
            PixelFormat::Rgb888,
            Rotation::Deg0,
            Timestamp::from_millis(0),
        );
        let err = FramePreprocessor::normalize(&frame, false).unwrap_err();
        assert!(matches!(
            err,
            FormatError::LengthMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let frame = labelled_rgb(3, 2, Rotation::Deg270);
        let a = FramePreprocessor::normalize(&frame, true).unwrap();
        let b = FramePreprocessor::normalize(&frame, true).unwrap();
        assert_eq!(a, b);
    }
}
