use crate::make_error;
use eyre::Report;
use ndarray::Array2;

/// Rooted tree over mutation superclusters. Node 0 is the fixed, always-empty
/// root representing the founding population. Stored as a parent-of-adjacency
/// matrix with `adj[p, c] = 1` for every edge from parent `p` to child `c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStructure {
  adj: Array2<u8>,
}

impl TreeStructure {
  /// Builds a structure from an adjacency matrix, rejecting malformed input:
  /// non-square matrices, self-edges, a parented root, multi-parent nodes and
  /// nodes unreachable from the root.
  pub fn from_adjacency(adj: Array2<u8>) -> Result<Self, Report> {
    let (n_rows, n_cols) = adj.dim();
    if n_rows != n_cols || n_rows == 0 {
      return make_error!("Invalid tree structure: adjacency matrix must be square and non-empty, got {n_rows}x{n_cols}");
    }
    let n = n_rows;
    for i in 0..n {
      if adj[[i, i]] != 0 {
        return make_error!("Invalid tree structure: node {i} has a self-edge");
      }
    }
    let root_parents = (0..n).filter(|&p| adj[[p, 0]] != 0).count();
    if root_parents != 0 {
      return make_error!("Invalid tree structure: root node must not have a parent");
    }
    for c in 1..n {
      let n_parents = (0..n).filter(|&p| adj[[p, c]] != 0).count();
      if n_parents != 1 {
        return make_error!("Invalid tree structure: node {c} has {n_parents} parents, expected exactly 1");
      }
    }

    let structure = Self { adj };
    let mut seen = vec![false; n];
    let mut stack = vec![0];
    seen[0] = true;
    while let Some(node) = stack.pop() {
      for child in structure.children_of(node) {
        if !seen[child] {
          seen[child] = true;
          stack.push(child);
        }
      }
    }
    if let Some(unreachable) = seen.iter().position(|&s| !s) {
      return make_error!("Invalid tree structure: node {unreachable} is not reachable from the root (cycle or disconnected subtree)");
    }

    Ok(structure)
  }

  /// Builds a structure from a parent vector, where `parents[i]` is the
  /// parent of node `i + 1`.
  pub fn from_parents(parents: &[usize]) -> Result<Self, Report> {
    let n = parents.len() + 1;
    let mut adj = Array2::<u8>::zeros((n, n));
    for (i, &p) in parents.iter().enumerate() {
      let child = i + 1;
      if p >= n {
        return make_error!("Invalid tree structure: node {child} names parent {p}, but only {n} nodes exist");
      }
      adj[[p, child]] = 1;
    }
    Self::from_adjacency(adj)
  }

  pub fn num_nodes(&self) -> usize {
    self.adj.nrows()
  }

  pub fn adjacency(&self) -> &Array2<u8> {
    &self.adj
  }

  pub fn parent_of(&self, node: usize) -> Option<usize> {
    (0..self.num_nodes()).find(|&p| self.adj[[p, node]] != 0)
  }

  pub fn children_of(&self, node: usize) -> Vec<usize> {
    (0..self.num_nodes()).filter(|&c| self.adj[[node, c]] != 0).collect()
  }

  pub fn to_parents(&self) -> Vec<usize> {
    (1..self.num_nodes())
      .map(|c| self.parent_of(c).unwrap_or_default())
      .collect()
  }

  /// Depth of every node, with the root at depth 0.
  pub fn depths(&self) -> Vec<usize> {
    let n = self.num_nodes();
    let mut depths = vec![0; n];
    let mut stack = vec![0];
    while let Some(node) = stack.pop() {
      for child in self.children_of(node) {
        depths[child] = depths[node] + 1;
        stack.push(child);
      }
    }
    depths
  }

  /// Reparents `node` under `new_parent`. The caller must ensure `new_parent`
  /// is not in the subtree of `node`; the resulting structure is re-validated.
  pub fn with_moved_node(&self, node: usize, new_parent: usize) -> Result<Self, Report> {
    if node == 0 {
      return make_error!("Invalid tree move: the root cannot be relocated");
    }
    let mut adj = self.adj.clone();
    for p in 0..self.num_nodes() {
      adj[[p, node]] = 0;
    }
    adj[[new_parent, node]] = 1;
    Self::from_adjacency(adj)
  }

  /// Canonical row-major byte serialization of the adjacency contents, used
  /// for structural fingerprinting.
  pub fn canonical_bytes(&self) -> Vec<u8> {
    self.adj.iter().copied().collect()
  }
}
