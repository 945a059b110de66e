//! Image folder dataset

use crate::{Error, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// A directory of class subdirectories of images, in the usual
/// `root/<class>/<image>` layout. Labels are ignored: self-distillation only
/// consumes the pixels.
#[derive(Debug)]
pub struct ImageFolderDataset {
    paths: Vec<PathBuf>,
}

impl ImageFolderDataset {
    /// Scan `root` recursively for image files. Files directly under `root`
    /// are accepted too.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "data_path {} is not a directory",
                root.display()
            )));
        }
        let mut paths = Vec::new();
        collect_images(root, &mut paths)?;
        if paths.is_empty() {
            return Err(Error::Data(format!(
                "no images found under {}",
                root.display()
            )));
        }
        paths.sort();
        Ok(Self { paths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decode one image to RGB.
    pub fn load(&self, index: usize) -> Result<RgbImage> {
        let path = &self.paths[index];
        let img = image::open(path)
            .map_err(|e| Error::Data(format!("failed to decode {}: {e}", path.display())))?;
        Ok(img.to_rgb8())
    }
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                out.push(path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn write_dataset(classes: usize, per_class: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for c in 0..classes {
            let class_dir = dir.path().join(format!("class{c}"));
            std::fs::create_dir(&class_dir).unwrap();
            for i in 0..per_class {
                let img = RgbImage::from_pixel(8, 8, Rgb([(c * 40) as u8, (i * 20) as u8, 0]));
                img.save(class_dir.join(format!("img{i}.png"))).unwrap();
            }
        }
        dir
    }

    #[test]
    fn scans_class_subdirectories() {
        let dir = write_dataset(3, 4);
        let ds = ImageFolderDataset::open(dir.path()).unwrap();
        assert_eq!(ds.len(), 12);
    }

    #[test]
    fn loads_rgb_images() {
        let dir = write_dataset(1, 1);
        let ds = ImageFolderDataset::open(dir.path()).unwrap();
        let img = ds.load(0).unwrap();
        assert_eq!(img.dimensions(), (8, 8));
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(ImageFolderDataset::open(dir.path()).is_err());
    }

    #[test]
    fn missing_folder_is_a_config_error() {
        let err = ImageFolderDataset::open("/nope/nothing/here").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
