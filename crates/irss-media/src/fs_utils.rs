//! Filesystem helpers: input enumeration and output directory handling.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use irss_models::{mask_output_path, ItemId};

use crate::error::{MediaError, MediaResult};

/// Image extensions accepted from directory inputs (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Whether the path carries one of [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve an input path into the ordered list of images to process.
///
/// A file is taken as-is. A directory is walked recursively and filtered to
/// image files. Results are in natural order so `frame2` precedes `frame10`.
pub fn collect_images(input: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let input = input.as_ref();

    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(input).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(input = %input.display(), error = %e, "Skipping unreadable input entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            images.push(entry.into_path());
        }
    }

    images.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    tracing::debug!(input = %input.display(), count = images.len(), "Collected input images");
    Ok(images)
}

/// Compare strings treating runs of ASCII digits as numbers.
///
/// Equal numeric values with different zero padding fall back to ordinal
/// comparison so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut ai, mut bi) = (a.char_indices().peekable(), b.char_indices().peekable());

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((sa, ca)), Some((sb, cb))) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let ea = digit_run_end(a, sa);
                    let eb = digit_run_end(b, sb);
                    let na = a[sa..ea].trim_start_matches('0');
                    let nb = b[sb..eb].trim_start_matches('0');
                    let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    while ai.peek().map_or(false, |&(i, _)| i < ea) {
                        ai.next();
                    }
                    while bi.peek().map_or(false, |&(i, _)| i < eb) {
                        bi.next();
                    }
                } else {
                    if ca != cb {
                        return ca.cmp(&cb);
                    }
                    ai.next();
                    bi.next();
                }
            }
        }
    }
}

fn digit_run_end(s: &str, start: usize) -> usize {
    s[start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |offset| start + offset)
}

/// Groups of inputs that would write the same mask file.
///
/// Outputs are written flat, so `a/img.png` and `b/img.png` collide.
pub fn duplicate_mask_outputs(inputs: &[PathBuf], output_dir: &Path) -> Vec<(PathBuf, Vec<PathBuf>)> {
    let mut by_output: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for input in inputs {
        let output = mask_output_path(output_dir, &ItemId::Path(input.clone()));
        by_output.entry(output).or_default().push(input.clone());
    }

    let mut duplicates: Vec<_> = by_output
        .into_iter()
        .filter(|(_, sources)| sources.len() > 1)
        .collect();
    duplicates.sort_by(|a, b| a.0.cmp(&b.0));
    duplicates
}

/// Default output directory next to the input: `<stem><suffix>`.
pub fn default_output_dir(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{}{}", stem, suffix))
}

/// Create the directory (and parents) if absent.
pub async fn ensure_dir(path: &Path) -> MediaResult<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
    }
    Ok(())
}
