use super::{Frame, FrameSource};
use crate::error::{FrameError, PipelineError};
use std::path::{Path, PathBuf};

/// File extensions picked up from an image directory
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Reads every still image in a directory, ordered by sample index then name
///
/// Files named `frame_<n>` take `n` as their index; anything else is indexed
/// by its position in the listing.
pub struct ImageDirectorySource {
    dir: PathBuf,
    entries: std::vec::IntoIter<(usize, PathBuf)>,
    count: usize,
}

impl ImageDirectorySource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, PipelineError> {
        let dir = dir.as_ref().to_path_buf();
        let listing = std::fs::read_dir(&dir).map_err(|e| PipelineError::Source {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = listing
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort_by_key(|path| (sample_index(path), path.file_name().map(|n| n.to_os_string())));

        let entries: Vec<(usize, PathBuf)> = paths
            .into_iter()
            .enumerate()
            .map(|(position, path)| (sample_index(&path).unwrap_or(position), path))
            .collect();
        let count = entries.len();

        tracing::info!("Found {} images in {}", count, dir.display());

        Ok(Self {
            dir,
            entries: entries.into_iter(),
            count,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl FrameSource for ImageDirectorySource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        let (index, path) = self.entries.next()?;
        let name = file_stem(&path);
        let loaded = image::open(&path)
            .map(|image| Frame::new(index, name, image))
            .map_err(|source| FrameError::UnreadableImage { path, source });
        Some(loaded)
    }

    fn describe(&self) -> String {
        format!("{} ({} images)", self.dir.display(), self.count)
    }
}

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sample_index(path: &Path) -> Option<usize> {
    file_stem(path).strip_prefix("frame_")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_sampled_frames_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for i in [10, 2, 0] {
            image::GrayImage::new(3, 3)
                .save(dir.path().join(format!("frame_{i}.png")))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = ImageDirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 3);
        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame() {
            let frame = frame.unwrap();
            seen.push((frame.index, frame.name));
        }
        assert_eq!(
            seen,
            vec![
                (0, "frame_0".to_string()),
                (2, "frame_2".to_string()),
                (10, "frame_10".to_string())
            ]
        );
    }

    #[test]
    fn corrupt_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();
        image::GrayImage::new(3, 3).save(dir.path().join("good.png")).unwrap();

        let mut source = ImageDirectorySource::open(dir.path()).unwrap();
        let first = source.next_frame().unwrap();
        assert!(matches!(first, Err(FrameError::UnreadableImage { .. })));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.name, "good");
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn missing_directory_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ImageDirectorySource::open(&missing),
            Err(PipelineError::Source { .. })
        ));
    }
}
