use crate::error::TreeError;

use ndarray::{Array1, Array2, Array3, Axis};
use std::fmt;
use std::str::FromStr;

/// Ordering of per-node quantities
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Indexing {
    /// Order of the nodes inside the tree
    Tree,
    /// Order of the locations of the original, unreduced model
    #[default]
    Locs,
}

impl FromStr for Indexing {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree" => Ok(Self::Tree),
            "locs" => Ok(Self::Locs),
            _ => Err(TreeError::InvalidIndexing(s.to_owned())),
        }
    }
}

impl fmt::Display for Indexing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree => write!(f, "tree"),
            Self::Locs => write!(f, "locs"),
        }
    }
}

/// Arrays whose node axes can be reordered
///
/// One-dimensional arrays are indexed by node, two-dimensional arrays by `(node, node)` and
/// three-dimensional arrays by `(freq, node, node)`.
pub trait Permute: Sized {
    /// Array whose entry `i` is entry `inds[i]` of `self` along every node axis
    fn permuted(&self, inds: &[usize]) -> Self;

    fn node_axis_len(&self) -> usize;
}

impl<A: Clone> Permute for Array1<A> {
    fn permuted(&self, inds: &[usize]) -> Self {
        self.select(Axis(0), inds)
    }

    fn node_axis_len(&self) -> usize {
        self.len()
    }
}

impl<A: Clone> Permute for Array2<A> {
    fn permuted(&self, inds: &[usize]) -> Self {
        self.select(Axis(0), inds).select(Axis(1), inds)
    }

    fn node_axis_len(&self) -> usize {
        self.nrows()
    }
}

impl<A: Clone> Permute for Array3<A> {
    fn permuted(&self, inds: &[usize]) -> Self {
        self.select(Axis(1), inds).select(Axis(2), inds)
    }

    fn node_axis_len(&self) -> usize {
        self.len_of(Axis(1))
    }
}
