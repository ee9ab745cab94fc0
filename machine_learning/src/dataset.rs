use std::{fs, path::Path};

use ndarray::{ArrayD, Axis, IxDyn, concatenate};
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// An ordered sequence of host tensors: the inputs, then the labels, then exactly one tensor
/// of per-example weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    tensors: Vec<ArrayD<f32>>,
}

impl Batch {
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }
}

/// A finite source of batches that can be iterated once per epoch.
///
/// Each call to `batches` starts a new full pass, a pass can't be resumed once dropped.
pub trait BatchSource {
    fn batches(&mut self) -> impl Iterator<Item = Batch> + '_;
}

impl<B: BatchSource + ?Sized> BatchSource for &mut B {
    fn batches(&mut self) -> impl Iterator<Item = Batch> + '_ {
        (**self).batches()
    }
}

impl BatchSource for Vec<Batch> {
    fn batches(&mut self) -> impl Iterator<Item = Batch> + '_ {
        self.iter().cloned()
    }
}

/// A named collection of example-major arrays plus their weights.
///
/// Every element shares the leading (example) dimension, one dimensional elements are stored
/// as column vectors.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    names: Vec<String>,
    elements: Vec<ArrayD<f32>>,
    weights: ArrayD<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset.
    ///
    /// # Arguments
    /// * `elements` - The named arrays, all with the same amount of examples.
    /// * `weights` - Per-example weights, all ones when `None`.
    ///
    /// # Returns
    /// The dataset or a shape mismatch error.
    pub fn new(elements: Vec<(String, ArrayD<f32>)>, weights: Option<ArrayD<f32>>) -> Result<Self> {
        let len = elements
            .first()
            .map(|(_, e)| e.shape().first().copied().unwrap_or(0))
            .unwrap_or(0);

        let (names, elements): (Vec<_>, Vec<_>) = elements
            .into_iter()
            .map(|(name, e)| (name, as_column(e)))
            .unzip();

        let weights = as_column(weights.unwrap_or_else(|| ArrayD::ones(IxDyn(&[len, 1]))));

        for e in elements.iter().chain([&weights]) {
            let rows = e.shape().first().copied().unwrap_or(0);
            if rows != len {
                return Err(MlErr::ShapeMismatch {
                    what: "dataset examples",
                    got: e.shape().to_vec(),
                    expected: vec![len],
                });
            }
        }

        Ok(Self {
            names,
            elements,
            weights,
        })
    }

    /// Returns the amount of examples.
    pub fn len(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the element with the given name.
    pub fn element(&self, name: &str) -> Option<&ArrayD<f32>> {
        let i = self.names.iter().position(|n| n == name)?;
        Some(&self.elements[i])
    }

    /// Appends the examples of `other`, which must hold the same elements in the same order.
    pub fn extend(&mut self, other: InMemoryDataset) -> Result<()> {
        if self.names != other.names {
            return Err(MlErr::InvalidArgument(format!(
                "can't join datasets with elements {:?} and {:?}",
                self.names, other.names
            )));
        }

        let join = |a: &ArrayD<f32>, b: &ArrayD<f32>| {
            concatenate(Axis(0), &[a.view(), b.view()]).map_err(|_| MlErr::ShapeMismatch {
                what: "joined dataset element",
                got: b.shape().to_vec(),
                expected: a.shape().to_vec(),
            })
        };

        let elements = self
            .elements
            .iter()
            .zip(&other.elements)
            .map(|(a, b)| join(a, b))
            .collect::<Result<Vec<_>>>()?;

        self.weights = join(&self.weights, &other.weights)?;
        self.elements = elements;
        Ok(())
    }

    /// Gathers the examples at `indices` into a batch laid out as the given elements followed
    /// by the weights.
    fn gather(&self, order: &[usize], indices: &[usize]) -> Batch {
        let mut tensors: Vec<ArrayD<f32>> = order
            .iter()
            .map(|&i| self.elements[i].select(Axis(0), indices))
            .collect();

        tensors.push(self.weights.select(Axis(0), indices));
        Batch::new(tensors)
    }
}

/// A flattened array as stored in a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayFile {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A named array as stored in a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFile {
    pub name: String,
    #[serde(flatten)]
    pub array: ArrayFile,
}

/// The on-disk JSON layout of an `InMemoryDataset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFile {
    pub elements: Vec<ElementFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<ArrayFile>,
}

impl ArrayFile {
    fn into_array(self) -> Result<ArrayD<f32>> {
        let len = self.data.len();
        let shape = self.shape;

        ArrayD::from_shape_vec(IxDyn(&shape), self.data).map_err(|_| MlErr::ShapeMismatch {
            what: "dataset file element",
            got: vec![len],
            expected: shape,
        })
    }

    fn from_array(array: &ArrayD<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }
}

impl InMemoryDataset {
    /// Builds a dataset from its file representation.
    pub fn from_file(file: DatasetFile) -> Result<Self> {
        let elements = file
            .elements
            .into_iter()
            .map(|e| e.array.into_array().map(|array| (e.name, array)))
            .collect::<Result<Vec<_>>>()?;

        let weights = file.weights.map(ArrayFile::into_array).transpose()?;
        Self::new(elements, weights)
    }

    /// Returns the file representation of this dataset.
    pub fn to_file(&self) -> DatasetFile {
        let elements = self
            .names
            .iter()
            .zip(&self.elements)
            .map(|(name, e)| ElementFile {
                name: name.clone(),
                array: ArrayFile::from_array(e),
            })
            .collect();

        DatasetFile {
            elements,
            weights: Some(ArrayFile::from_array(&self.weights)),
        }
    }

    /// Loads a JSON dataset file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let file = serde_json::from_str(&content).map_err(|e| {
            MlErr::InvalidArgument(format!("malformed dataset file {}: {e}", path.display()))
        })?;

        Self::from_file(file)
    }

    /// Loads and joins several JSON dataset files, in order.
    ///
    /// # Returns
    /// The joined dataset or an error if there are no paths or the files hold different elements.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut paths = paths.iter();
        let Some(first) = paths.next() else {
            return Err(MlErr::InvalidArgument("there are no dataset files to load".into()));
        };

        let mut dataset = Self::load(first.as_ref())?;
        for path in paths {
            dataset.extend(Self::load(path.as_ref())?)?;
        }

        Ok(dataset)
    }

    /// Writes this dataset to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(&self.to_file()).map_err(std::io::Error::from)?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn as_column(e: ArrayD<f32>) -> ArrayD<f32> {
    if e.ndim() == 1 {
        e.insert_axis(Axis(1))
    } else {
        e
    }
}

/// Batches an `InMemoryDataset` following a fixed element order.
#[derive(Debug)]
pub struct DataLoader<R> {
    dataset: InMemoryDataset,
    order: Vec<usize>,
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: Option<R>,
}

impl<R: Rng> DataLoader<R> {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to batch.
    /// * `element_names` - The elements each batch holds, in order (inputs then labels).
    /// * `batch_size` - The maximum amount of examples per batch.
    /// * `shuffle` - A random number generator to reshuffle the examples each epoch, if any.
    ///
    /// # Returns
    /// A new `DataLoader` or an error if an element is missing or the batch size is zero.
    pub fn new(
        dataset: InMemoryDataset,
        element_names: &[String],
        batch_size: usize,
        shuffle: Option<R>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(MlErr::InvalidArgument("batch size must be positive".into()));
        }

        let order = element_names
            .iter()
            .map(|name| {
                dataset
                    .names()
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| MlErr::InvalidArgument(format!("dataset has no element {name}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            indices: (0..dataset.len()).collect(),
            dataset,
            order,
            batch_size,
            shuffle,
        })
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}

impl<R: Rng> BatchSource for DataLoader<R> {
    fn batches(&mut self) -> impl Iterator<Item = Batch> + '_ {
        if let Some(rng) = &mut self.shuffle {
            self.indices.shuffle(rng);
        }

        let dataset = &self.dataset;
        let order = &self.order;

        self.indices
            .chunks(self.batch_size)
            .map(move |chunk| dataset.gather(order, chunk))
    }
}
