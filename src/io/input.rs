use crate::make_error;
use crate::model::mutrel::{ClustrelPosterior, NUM_RELATIONS};
use crate::model::supervariant::Supervariant;
use eyre::{Report, WrapErr};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Input bundle for one inference run: clustered supervariant read-count
/// summaries, the precomputed pairwise-relation posterior over clusters, and
/// optionally a fixed set of structures (as parent vectors) that bypasses
/// sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputData {
  pub samples: Vec<String>,

  pub supervariants: Vec<Supervariant>,

  /// M x M x 5 tensor over clusters; relation order is
  /// (ancestor, descendant, cocluster, unrelated, garbage)
  pub clustrel_posterior: Vec<Vec<Vec<f64>>>,

  /// Mutation indices per cluster, aligned with `supervariants`
  #[serde(default)]
  pub clusters: Option<Vec<Vec<usize>>>,

  /// Parent vectors: entry `i` is the parent of node `i + 1`
  #[serde(default)]
  pub structures: Option<Vec<Vec<usize>>>,
}

pub fn load_input(path: impl AsRef<Path>) -> Result<InputData, Report> {
  let path = path.as_ref();
  let file = File::open(path).wrap_err_with(|| format!("When opening input file {path:#?}"))?;
  let input: InputData =
    serde_json::from_reader(BufReader::new(file)).wrap_err_with(|| format!("When parsing input file {path:#?}"))?;
  input.validate()?;
  Ok(input)
}

impl InputData {
  pub fn validate(&self) -> Result<(), Report> {
    for sv in &self.supervariants {
      sv.validate()?;
      if sv.num_samples() != self.samples.len() {
        return make_error!(
          "Supervariant '{}' has {} samples but {} sample names were given",
          sv.name,
          sv.num_samples(),
          self.samples.len()
        );
      }
    }
    let m = self.supervariants.len();
    if self.clustrel_posterior.len() != m {
      return make_error!(
        "Pairwise posterior covers {} clusters but {m} supervariants were given",
        self.clustrel_posterior.len()
      );
    }
    if let Some(clusters) = &self.clusters {
      if clusters.len() != m {
        return make_error!("Expected {m} clusters to match the supervariants, got {}", clusters.len());
      }
    }
    Ok(())
  }

  /// Node-indexed pairwise posterior (root prepended).
  pub fn posterior(&self) -> Result<ClustrelPosterior, Report> {
    let m = self.clustrel_posterior.len();
    let mut tensor = Array3::<f64>::zeros((m, m, NUM_RELATIONS));
    for (i, row) in self.clustrel_posterior.iter().enumerate() {
      if row.len() != m {
        return make_error!("Pairwise posterior row {i} has {} entries, expected {m}", row.len());
      }
      for (j, rels) in row.iter().enumerate() {
        if rels.len() != NUM_RELATIONS {
          return make_error!(
            "Pairwise posterior entry ({i}, {j}) has {} relations, expected {NUM_RELATIONS}",
            rels.len()
          );
        }
        for (r, &p) in rels.iter().enumerate() {
          tensor[[i, j, r]] = p;
        }
      }
    }
    ClustrelPosterior::from_cluster_tensor(tensor)
  }

  /// Superclusters with the empty root prepended at index 0. When the input
  /// carries no cluster membership, each supervariant forms its own
  /// singleton cluster.
  pub fn superclusters(&self) -> Vec<Vec<usize>> {
    let mut superclusters = vec![Vec::new()];
    match &self.clusters {
      Some(clusters) => superclusters.extend(clusters.iter().cloned()),
      None => superclusters.extend((0..self.supervariants.len()).map(|k| vec![k])),
    }
    superclusters
  }
}
