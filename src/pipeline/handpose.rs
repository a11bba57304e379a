use std::path::Path;

use anyhow::{Context, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use rayon::prelude::*;

use super::landmarks::{LandmarkExtractor, NUM_HAND_LANDMARKS};
use crate::{
    config::ExtractorConfig,
    error::{PipelineError, Result},
    model_download::{ModelKind, ensure_model_ready, log_download_event},
    types::{Frame, Landmark, LandmarkSet},
};

pub const INPUT_SIZE: u32 = 224;

#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Hand landmark extractor running the MediaPipe handpose estimator through ONNX Runtime.
pub struct HandposeExtractor {
    session: Session,
    min_confidence: f32,
    resizer: fir::Resizer,
    canvas: Vec<u8>,
}

impl HandposeExtractor {
    pub fn new(config: &ExtractorConfig) -> anyhow::Result<Self> {
        ensure_model_ready(
            ModelKind::HandposeEstimator,
            &config.model_path,
            log_download_event,
        )?;
        let session = load_session(&config.model_path)?;
        log::info!(
            "handpose ORT backend ready using {}",
            config.model_path.display()
        );

        Ok(Self {
            session,
            min_confidence: config.min_confidence,
            resizer: fir::Resizer::new(),
            canvas: Vec::new(),
        })
    }

    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Option<Vec<Landmark>>> {
        let letterbox = letterbox_into(&mut self.resizer, frame, INPUT_SIZE, &mut self.canvas)?;
        let input = normalize_canvas(&self.canvas, INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "handpose model returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let confidence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if confidence < self.min_confidence {
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let raw = decode_landmarks(&flattened)?;
        let points = to_normalized(&raw, &letterbox, confidence);
        if !points.iter().all(Landmark::is_finite) {
            return Err(anyhow!("handpose model returned non-finite landmarks"));
        }
        Ok(Some(points))
    }
}

impl LandmarkExtractor for HandposeExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<LandmarkSet> {
        match self.infer(frame) {
            Ok(Some(points)) => Ok(LandmarkSet::new(points, frame.timestamp)),
            Ok(None) => Err(PipelineError::ExtractionFailed),
            Err(err) => {
                log::warn!("handpose inference failed: {err:?}");
                Err(PipelineError::ExtractionFailed)
            }
        }
    }
}

pub(crate) fn load_session(model_path: &Path) -> anyhow::Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))
}

/// Resizes `frame` to fit a `target_size` square, centred on an opaque black canvas.
pub fn letterbox_into(
    resizer: &mut fir::Resizer,
    frame: &Frame,
    target_size: u32,
    canvas: &mut Vec<u8>,
) -> anyhow::Result<LetterboxInfo> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            Frame::expected_len(frame.width, frame.height)
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = (frame.width as f32 * scale).round().clamp(1.0, target_size as f32) as u32;
    let new_h = (frame.height as f32 * scale).round().clamp(1.0, target_size as f32) as u32;

    let src_image =
        fir::images::ImageRef::new(frame.width, frame.height, &frame.rgba, fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.buffer();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    canvas.clear();
    canvas.resize((target_size as usize) * (target_size as usize) * 4, 0);
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    Ok(LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    })
}

fn normalize_canvas(canvas: &[u8], target_size: u32) -> anyhow::Result<Array4<f32>> {
    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

pub fn decode_landmarks(flat: &[f32]) -> anyhow::Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_HAND_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_HAND_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_HAND_LANDMARKS)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

/// Maps model-space landmarks back onto the original frame, normalized to `[0, 1]`.
pub fn to_normalized(
    landmarks: &[[f32; 3]],
    letterbox: &LetterboxInfo,
    confidence: f32,
) -> Vec<Landmark> {
    let max_x = letterbox.orig_w.saturating_sub(1).max(1) as f32;
    let max_y = letterbox.orig_h.saturating_sub(1).max(1) as f32;
    landmarks
        .iter()
        .map(|[x, y, z]| {
            let px = ((x - letterbox.pad_x) / letterbox.scale).clamp(0.0, max_x);
            let py = ((y - letterbox.pad_y) / letterbox.scale).clamp(0.0, max_y);
            Landmark::new(
                px / letterbox.orig_w as f32,
                py / letterbox.orig_h as f32,
                z / letterbox.scale / letterbox.orig_w as f32,
                confidence.clamp(0.0, 1.0),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            rgba: vec![200; Frame::expected_len(width, height)],
            width,
            height,
            timestamp: 0,
        }
    }

    #[test]
    fn wide_frames_are_padded_vertically() {
        let mut resizer = fir::Resizer::new();
        let mut canvas = Vec::new();
        let info = letterbox_into(&mut resizer, &frame(448, 224), INPUT_SIZE, &mut canvas).unwrap();

        assert_eq!(info.scale, 0.5);
        assert_eq!(info.pad_x, 0.0);
        assert_eq!(info.pad_y, 56.0);
        assert_eq!(canvas.len(), (INPUT_SIZE * INPUT_SIZE * 4) as usize);
        // top padding row stays black, centre row carries the image
        assert_eq!(&canvas[..4], &[0, 0, 0, 255]);
        let centre = (112 * INPUT_SIZE as usize + 112) * 4;
        assert_eq!(canvas[centre], 200);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut resizer = fir::Resizer::new();
        let mut bad = frame(4, 4);
        bad.rgba.pop();
        assert!(letterbox_into(&mut resizer, &bad, INPUT_SIZE, &mut Vec::new()).is_err());
    }

    #[test]
    fn decode_requires_full_hand() {
        assert!(decode_landmarks(&[0.0; 10]).is_err());
        let decoded = decode_landmarks(&vec![1.0; NUM_HAND_LANDMARKS * 3 + 5]).unwrap();
        assert_eq!(decoded.len(), NUM_HAND_LANDMARKS);
    }

    #[test]
    fn landmarks_map_back_to_frame_space() {
        let info = LetterboxInfo {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 56.0,
            orig_w: 448,
            orig_h: 224,
        };
        let points = to_normalized(&[[112.0, 112.0, 0.0]], &info, 0.8);
        assert!((points[0].x - 0.5).abs() < 1e-6);
        assert!((points[0].y - 0.5).abs() < 1e-6);
        assert_eq!(points[0].confidence, 0.8);
    }
}
