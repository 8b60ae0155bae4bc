//! Output file naming.

use std::path::{Path, PathBuf};

use crate::item::ItemId;

/// Suffix appended to the source file stem for mask artifacts.
pub const MASK_SUFFIX: &str = "_mask";

/// Extension used for masks whose identity carries no file extension.
const DEFAULT_MASK_EXTENSION: &str = "png";

/// Destination of the mask generated for `id`.
///
/// `<stem>_mask<ext>` for file identities, `<index>_mask.png` for stream
/// frames. The name depends only on the identity, never on processing order.
pub fn mask_output_path(output_dir: &Path, id: &ItemId) -> PathBuf {
    match id {
        ItemId::Path(source) => {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "frame".to_string());
            let name = match source.extension() {
                Some(ext) => format!("{}{}.{}", stem, MASK_SUFFIX, ext.to_string_lossy()),
                None => format!("{}{}", stem, MASK_SUFFIX),
            };
            output_dir.join(name)
        }
        ItemId::Index(index) => {
            output_dir.join(format!("{}{}.{}", index, MASK_SUFFIX, DEFAULT_MASK_EXTENSION))
        }
    }
}

/// Destination of an extracted frame: `<index>.<extension>`.
pub fn frame_output_path(output_dir: &Path, index: u64, extension: &str) -> PathBuf {
    let extension = extension.trim_start_matches('.');
    output_dir.join(format!("{}.{}", index, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_name_keeps_extension() {
        let id = ItemId::Path(PathBuf::from("/in/DJI_0042.JPG"));
        let out = mask_output_path(Path::new("/out"), &id);
        assert_eq!(out, PathBuf::from("/out/DJI_0042_mask.JPG"));
    }

    #[test]
    fn test_mask_name_without_extension() {
        let id = ItemId::Path(PathBuf::from("/in/frame"));
        let out = mask_output_path(Path::new("/out"), &id);
        assert_eq!(out, PathBuf::from("/out/frame_mask"));
    }

    #[test]
    fn test_mask_name_for_index() {
        let out = mask_output_path(Path::new("/out"), &ItemId::Index(12));
        assert_eq!(out, PathBuf::from("/out/12_mask.png"));
    }

    #[test]
    fn test_mask_name_with_multiple_dots() {
        let id = ItemId::Path(PathBuf::from("shots/site.a.v2.png"));
        let out = mask_output_path(Path::new("o"), &id);
        assert_eq!(out, PathBuf::from("o/site.a.v2_mask.png"));
    }

    #[test]
    fn test_frame_name() {
        assert_eq!(
            frame_output_path(Path::new("/f"), 3, ".jpg"),
            PathBuf::from("/f/3.jpg")
        );
        assert_eq!(
            frame_output_path(Path::new("/f"), 0, "png"),
            PathBuf::from("/f/0.png")
        );
    }
}
