use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Output dimensionality of the default ImageNet-1k configuration.
pub const DEFAULT_NUM_CLASSES: usize = 1000;

/// Ordered mapping from scorer output index to class name. Immutable after
/// load.
#[derive(Debug, Clone)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Loads labels from a file with one label per line, ordered by model
    /// output index. Blank lines are skipped.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let names = reader
            .lines()
            .collect::<std::io::Result<Vec<String>>>()?
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        Ok(Self { names })
    }

    /// Placeholder labels in the `class_{i}` format.
    pub fn synthetic(len: usize) -> Self {
        Self {
            names: (0..len).map(|i| format!("class_{i}")).collect(),
        }
    }

    /// Resolves the label set for a deployment: the configured file when
    /// present and non-empty, synthetic placeholders otherwise. The label
    /// order is load-bearing, so a deployment should always supply the list
    /// matching its weights.
    pub fn resolve(path: Option<&Path>) -> Self {
        match path {
            Some(p) => match Self::from_file(p) {
                Ok(set) if !set.is_empty() => {
                    tracing::info!(path = %p.display(), classes = set.len(), "loaded class labels");
                    set
                }
                Ok(_) => {
                    tracing::warn!(path = %p.display(), "label file is empty, using synthetic labels");
                    Self::synthetic(DEFAULT_NUM_CLASSES)
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "failed to read label file, using synthetic labels");
                    Self::synthetic(DEFAULT_NUM_CLASSES)
                }
            },
            None => {
                tracing::warn!("no label file configured, using synthetic class_{{i}} labels");
                Self::synthetic(DEFAULT_NUM_CLASSES)
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
