//! Relabeling of variable and constraint index spaces.

use serde::{Deserialize, Serialize};

use crate::error::NlpError;

/// A bijection on `0..n`. Applying it to a vector `v` yields `w` with
/// `w[i] = v[order[i]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    pub fn new(order: Vec<usize>) -> Result<Self, NlpError> {
        let mut seen = vec![false; order.len()];
        for &i in &order {
            if i >= order.len() || seen[i] {
                return Err(NlpError::DescriptorInvalid(format!(
                    "{:?} is not a permutation of 0..{}",
                    order,
                    order.len()
                )));
            }
            seen[i] = true;
        }
        Ok(Self { order })
    }

    pub fn identity(n: usize) -> Self {
        Self {
            order: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    pub fn apply<T: Clone>(&self, v: &[T]) -> Vec<T> {
        self.order.iter().map(|&i| v[i].clone()).collect()
    }

    pub fn inverse(&self) -> Permutation {
        let mut inv = vec![0; self.order.len()];
        for (new, &old) in self.order.iter().enumerate() {
            inv[old] = new;
        }
        Permutation { order: inv }
    }

    /// Every permutation of `0..n` in lexicographic order.
    ///
    /// Grows as `n!`; meant for exhaustive checks on small problems.
    pub fn all(n: usize) -> Vec<Permutation> {
        let mut current: Vec<usize> = (0..n).collect();
        let mut out = vec![Permutation {
            order: current.clone(),
        }];
        while next_permutation(&mut current) {
            out.push(Permutation {
                order: current.clone(),
            });
        }
        out
    }
}

fn next_permutation(v: &mut [usize]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}
