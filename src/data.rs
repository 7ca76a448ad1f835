//! Datasets and batch streams feeding the classifiers
//!
//! Streams are finite and restartable: `next_batch` yields collated batches
//! until the underlying data is exhausted, `reset` rewinds to the start so
//! the same stream can drive several epochs.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::thread_rng;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tch::vision::image;
use tch::{Kind, Tensor};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One collated batch: images `[N, C, H, W]` float in `[0, 1]`,
/// labels `[N]` int64.
#[derive(Debug)]
pub struct Batch {
    pub images: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn shallow_clone(&self) -> Self {
        Self {
            images: self.images.shallow_clone(),
            labels: self.labels.shallow_clone(),
        }
    }

    /// Number of samples in the batch
    pub fn len(&self) -> i64 {
        self.labels.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A finite, restartable sequence of labeled batches.
pub trait BatchStream {
    /// Next batch, or `None` once the data is exhausted.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Rewind to the first batch.
    fn reset(&mut self);
}

/// In-memory stream over pre-built batches. Used for small fixtures and
/// for data that already lives in tensors.
pub struct VecStream {
    batches: Vec<Batch>,
    cursor: usize,
}

impl VecStream {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl BatchStream for VecStream {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let batch = self.batches.get(self.cursor).map(Batch::shallow_clone);
        if batch.is_some() {
            self.cursor += 1;
        }
        Ok(batch)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

/// Load one image as a `[C, H, W]` float tensor scaled to `[0, 1]`.
fn load_image(path: &Path, image_size: i64) -> Result<Tensor> {
    let img = image::load(path).with_context(|| format!("Failed to load image {:?}", path))?;
    let img = image::resize(&img, image_size, image_size)
        .with_context(|| format!("Failed to resize image {:?}", path))?;
    Ok(img.to_kind(Kind::Float) / 255.0)
}

fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Labeled dataset over a `<root>/<class_name>/*.png` directory layout.
///
/// Class indices follow the sorted order of the class subdirectories.
/// Samples are shuffled once at construction; `reset` rewinds without
/// reshuffling so epochs stay comparable.
#[derive(Debug)]
pub struct ImageFolderDataset {
    samples: Vec<(PathBuf, i64)>,
    classes: Vec<String>,
    image_size: i64,
    batch_size: usize,
    cursor: usize,
}

impl ImageFolderDataset {
    pub fn new<P: AsRef<Path>>(root: P, image_size: i64, batch_size: usize) -> Result<Self> {
        let root = root.as_ref();
        let mut classes: Vec<String> = fs::read_dir(root)
            .with_context(|| format!("Failed to read dataset root {:?}", root))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        classes.sort();

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            for file in list_image_files(&root.join(class))? {
                samples.push((file, label as i64));
            }
        }
        if samples.is_empty() {
            return Err(PipelineError::EmptySource(root.to_path_buf()).into());
        }
        samples.shuffle(&mut thread_rng());

        Ok(Self {
            samples,
            classes,
            image_size,
            batch_size,
            cursor: 0,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl BatchStream for ImageFolderDataset {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.samples.len());
        let slice = &self.samples[self.cursor..end];
        self.cursor = end;

        let images: Vec<Tensor> = slice
            .par_iter()
            .map(|(path, _)| load_image(path, self.image_size))
            .collect::<Result<_>>()?;
        let labels: Vec<i64> = slice.iter().map(|(_, label)| *label).collect();

        Ok(Some(Batch {
            images: Tensor::stack(&images, 0),
            labels: Tensor::from_slice(&labels),
        }))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Unlabeled dataset over a flat directory of image files.
///
/// File order is sorted and stable so batch predictions concatenate back
/// into alignment with `files()`.
pub struct PredictDataset {
    files: Vec<PathBuf>,
    image_size: i64,
    batch_size: usize,
    cursor: usize,
}

impl PredictDataset {
    pub fn from_dir<P: AsRef<Path>>(dir: P, image_size: i64, batch_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let files = list_image_files(dir)?;
        if files.is_empty() {
            return Err(PipelineError::EmptySource(dir.to_path_buf()).into());
        }
        Ok(Self {
            files,
            image_size,
            batch_size,
            cursor: 0,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Next batch of images `[N, C, H, W]`, or `None` when exhausted.
    pub fn next_images(&mut self) -> Result<Option<Tensor>> {
        if self.cursor >= self.files.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.files.len());
        let slice = &self.files[self.cursor..end];
        self.cursor = end;

        let images: Vec<Tensor> = slice
            .par_iter()
            .map(|path| load_image(path, self.image_size))
            .collect::<Result<_>>()?;
        Ok(Some(Tensor::stack(&images, 0)))
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn write_png(path: &Path, edge: i64) {
        let img = Tensor::zeros([3, edge, edge], (Kind::Uint8, Device::Cpu));
        image::save(&img, path).unwrap();
    }

    #[test]
    fn test_image_folder_batches() {
        let dir = tempfile::tempdir().unwrap();
        for (class, count) in [("background", 3), ("barrier", 2)] {
            let class_dir = dir.path().join(class);
            fs::create_dir(&class_dir).unwrap();
            for i in 0..count {
                write_png(&class_dir.join(format!("{i}.png")), 12);
            }
        }

        let mut ds = ImageFolderDataset::new(dir.path(), 16, 2).unwrap();
        assert_eq!(ds.classes().to_vec(), ["background", "barrier"]);
        assert_eq!(ds.len(), 5);

        let mut total = 0;
        while let Some(batch) = ds.next_batch().unwrap() {
            assert_eq!(batch.images.size()[1..], [3, 16, 16]);
            assert_eq!(batch.images.kind(), Kind::Float);
            let labels = Vec::<i64>::try_from(&batch.labels).unwrap();
            assert!(labels.iter().all(|&l| l == 0 || l == 1));
            total += batch.len();
        }
        assert_eq!(total, 5);

        // Restartable: a second pass sees the same number of samples
        ds.reset();
        let mut total = 0;
        while let Some(batch) = ds.next_batch().unwrap() {
            total += batch.len();
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_image_folder_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageFolderDataset::new(dir.path(), 16, 2).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[test]
    fn test_predict_dataset_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.png", "b.jpg", "notes.txt"] {
            if name.ends_with(".txt") {
                fs::write(dir.path().join(name), "ignored").unwrap();
            } else {
                write_png(&dir.path().join(name), 8);
            }
        }

        let mut ds = PredictDataset::from_dir(dir.path(), 16, 2).unwrap();
        let names: Vec<_> = ds
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a.png", "b.jpg", "c.png"]);

        let mut total = 0;
        while let Some(images) = ds.next_images().unwrap() {
            assert_eq!(images.size()[1..], [3, 16, 16]);
            total += images.size()[0];
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn test_vec_stream_restarts() {
        let batch = Batch {
            images: Tensor::zeros([2, 3, 4, 4], (Kind::Float, Device::Cpu)),
            labels: Tensor::from_slice(&[0i64, 1]),
        };
        let mut stream = VecStream::new(vec![batch]);
        assert!(stream.next_batch().unwrap().is_some());
        assert!(stream.next_batch().unwrap().is_none());
        stream.reset();
        assert!(stream.next_batch().unwrap().is_some());
    }
}
