//! Sky-mask payloads and per-stage transforms.
//!
//! Payload shapes, in pipeline order:
//! `LoadedFrame → PreparedFrame → InferredFrame → MaskArtifact`.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use ndarray::Array4;

use irss_models::{mask_output_path, ItemId};

use crate::error::{MediaError, MediaResult};
use crate::replica::{InferContext, InferInput};

/// Decoded RGB frame.
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    pub image: RgbImage,
}

/// Normalised NCHW tensor at model resolution.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub tensor: Array4<f32>,
    /// Original frame size, restored during post-processing
    pub width: u32,
    pub height: u32,
}

/// Raw model output at model resolution.
#[derive(Debug, Clone)]
pub struct InferredFrame {
    pub mask: Array4<f32>,
    pub width: u32,
    pub height: u32,
}

/// Binary mask at the original frame size.
#[derive(Debug, Clone)]
pub struct MaskArtifact {
    pub mask: GrayImage,
}

impl InferInput for PreparedFrame {
    type Output = InferredFrame;

    fn into_tensor(self) -> (Array4<f32>, InferContext<InferredFrame>) {
        let (width, height) = (self.width, self.height);
        (
            self.tensor,
            InferContext::new(move |mask| InferredFrame {
                mask,
                width,
                height,
            }),
        )
    }
}

/// Decode the image behind a file identity.
pub fn load_image(id: &ItemId) -> MediaResult<LoadedFrame> {
    let path = id
        .as_path()
        .ok_or_else(|| MediaError::internal(format!("Item {} has no source file", id)))?;
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let image = image::open(path)?.to_rgb8();
    Ok(LoadedFrame { image })
}

/// Resize to `model_size²`, scale to `[0, 1]` and lay out as `[1, 3, H, W]`.
pub fn prepare(frame: LoadedFrame, model_size: u32) -> MediaResult<PreparedFrame> {
    let (width, height) = frame.image.dimensions();
    if width == 0 || height == 0 {
        return Err(MediaError::UnsupportedFormat("empty image".to_string()));
    }

    let resized = image::imageops::resize(&frame.image, model_size, model_size, FilterType::Triangle);
    let size = model_size as usize;
    let mut chw: Vec<f32> = Vec::with_capacity(3 * size * size);

    // HWC -> CHW
    for c in 0..3 {
        for y in 0..model_size {
            for x in 0..model_size {
                chw.push(resized.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }

    Ok(PreparedFrame {
        tensor: Array4::from_shape_vec((1, 3, size, size), chw)?,
        width,
        height,
    })
}

/// Clip, scale back to the original size and binarise at `threshold`.
pub fn postprocess(frame: InferredFrame, threshold: f32) -> MediaResult<MaskArtifact> {
    let (n, c, h, w) = frame.mask.dim();
    if n != 1 || c != 1 {
        return Err(MediaError::inference(format!(
            "Expected mask [1, 1, H, W], got [{}, {}, {}, {}]",
            n, c, h, w
        )));
    }
    if frame.mask.iter().any(|v| v.is_nan()) {
        return Err(MediaError::inference("mask contains NaN"));
    }

    let pixels: Vec<u8> = frame
        .mask
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    let small = GrayImage::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| MediaError::internal("mask buffer size mismatch"))?;

    let mut mask = image::imageops::resize(&small, frame.width, frame.height, FilterType::Lanczos3);
    let cutoff = (threshold.clamp(0.0, 1.0) * 255.0).round() as u8;
    for px in mask.pixels_mut() {
        px[0] = if px[0] > cutoff { 255 } else { 0 };
    }

    Ok(MaskArtifact { mask })
}

/// Write the mask to `<stem>_mask<ext>` under `output_dir`.
pub fn save_mask(id: &ItemId, artifact: MaskArtifact, output_dir: &Path) -> MediaResult<PathBuf> {
    let destination = mask_output_path(output_dir, id);
    artifact.mask.save(&destination)?;
    Ok(destination)
}
