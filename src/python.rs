//! Python bindings: a K-tree over RGB pixels for colour quantisation.

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::data_types::Pixel;
use crate::error::KTreeError;
use crate::ktree::KTree;
use crate::ktree::config::KTreeConfig;

impl From<KTreeError> for PyErr {
    fn from(err: KTreeError) -> PyErr {
        match &err {
            KTreeError::Io(_) => PyIOError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

fn rgb(pixel: &Pixel) -> (f64, f64, f64) {
    (pixel.r, pixel.g, pixel.b)
}

#[pyclass(name = "PixelKTree")]
struct PyPixelKTree {
    tree: KTree<Pixel>,
}

#[pymethods]
impl PyPixelKTree {
    #[new]
    #[pyo3(signature = (order, seed = None))]
    fn new(order: usize, seed: Option<u64>) -> PyResult<Self> {
        let mut config = KTreeConfig::new(order);
        if let Some(seed) = seed {
            config = config.with_seed(seed);
        }
        Ok(PyPixelKTree {
            tree: KTree::new(config)?,
        })
    }

    #[pyo3(signature = (r, g, b, x = 0, y = 0))]
    fn insert(&mut self, r: u8, g: u8, b: u8, x: u32, y: u32) -> PyResult<()> {
        self.tree.insert(Pixel::new(x, y, r, g, b))?;
        Ok(())
    }

    /// Inserts `(x, y, r, g, b)` tuples in order and returns the total
    /// number of stored pixels.
    fn construct(&mut self, pixels: Vec<(u32, u32, u8, u8, u8)>) -> PyResult<usize> {
        if pixels.is_empty() {
            return Err(KTreeError::EmptyObservations.into());
        }
        for (x, y, r, g, b) in pixels {
            self.tree.insert(Pixel::new(x, y, r, g, b))?;
        }
        Ok(self.tree.observation_count())
    }

    /// Cluster means of a colour from coarsest to finest, as `(r, g, b)`.
    fn cluster_path(&self, r: f64, g: f64, b: f64) -> Vec<(f64, f64, f64)> {
        let query = Pixel::from_rgb(r, g, b);
        self.tree.cluster_path(&query).map(|key| rgb(&key.value)).collect()
    }

    fn mean_at_depth(&self, r: f64, g: f64, b: f64, depth: usize) -> Option<(f64, f64, f64)> {
        let query = Pixel::from_rgb(r, g, b);
        self.tree.mean_at_depth(&query, depth).map(|key| rgb(&key.value))
    }

    fn save(&self, path: &str) -> PyResult<()> {
        self.tree.save(path)?;
        Ok(())
    }

    #[staticmethod]
    fn open(path: &str) -> PyResult<Self> {
        Ok(PyPixelKTree {
            tree: KTree::open(path)?,
        })
    }

    #[getter]
    fn height(&self) -> usize {
        self.tree.height()
    }

    #[getter]
    fn order(&self) -> usize {
        self.tree.order()
    }

    fn render(&self) -> String {
        self.tree.render()
    }

    fn __len__(&self) -> usize {
        self.tree.observation_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "PixelKTree(order={}, pixels={}, height={})",
            self.tree.order(),
            self.tree.observation_count(),
            self.tree.height()
        )
    }
}

/// The name of this module must match the `lib.name` in `Cargo.toml`.
#[pymodule]
#[pyo3(name = "ktree")]
fn ktree_py(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPixelKTree>()?;
    Ok(())
}
