use eyre::{Report, WrapErr};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Incremental result store keyed by pipeline stage name. A run invoked with
/// some stages already present must not recompute them, so partial results
/// survive interruption.
#[derive(Debug)]
pub struct Results {
  path: PathBuf,
  values: Map<String, Value>,
}

impl Results {
  pub fn load_or_new(path: impl AsRef<Path>) -> Result<Self, Report> {
    let path = path.as_ref().to_owned();
    let values = if path.exists() {
      let file = File::open(&path).wrap_err_with(|| format!("When opening results file {path:#?}"))?;
      serde_json::from_reader(BufReader::new(file)).wrap_err_with(|| format!("When parsing results file {path:#?}"))?
    } else {
      Map::new()
    };
    Ok(Self { path, values })
  }

  pub fn has(&self, stage: &str) -> bool {
    self.values.contains_key(stage)
  }

  pub fn get<T: DeserializeOwned>(&self, stage: &str) -> Result<Option<T>, Report> {
    match self.values.get(stage) {
      None => Ok(None),
      Some(value) => {
        let parsed = serde_json::from_value(value.clone()).wrap_err_with(|| format!("When decoding stage '{stage}'"))?;
        Ok(Some(parsed))
      }
    }
  }

  pub fn set<T: Serialize>(&mut self, stage: &str, value: &T) -> Result<(), Report> {
    let value = serde_json::to_value(value).wrap_err_with(|| format!("When encoding stage '{stage}'"))?;
    self.values.insert(stage.to_owned(), value);
    Ok(())
  }

  pub fn save(&self) -> Result<(), Report> {
    let file = File::create(&self.path).wrap_err_with(|| format!("When creating results file {:#?}", self.path))?;
    serde_json::to_writer(BufWriter::new(file), &self.values)
      .wrap_err_with(|| format!("When writing results file {:#?}", self.path))?;
    Ok(())
  }
}

pub fn matrix_to_rows<T: Clone>(matrix: &Array2<T>) -> Vec<Vec<T>> {
  matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

pub fn matrices_to_rows<T: Clone>(matrices: &[Array2<T>]) -> Vec<Vec<Vec<T>>> {
  matrices.iter().map(matrix_to_rows).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn roundtrips_stages_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let mut results = Results::load_or_new(&path).unwrap();
    assert!(!results.has("seed"));
    results.set("seed", &42_u64).unwrap();
    results
      .set("llh", &vec![-12.5_f64, -13.25, -11.0])
      .unwrap();
    results.save().unwrap();

    let reloaded = Results::load_or_new(&path).unwrap();
    assert!(reloaded.has("seed"));
    assert!(reloaded.has("llh"));
    assert!(!reloaded.has("adjm"));
    assert_eq!(reloaded.get::<u64>("seed").unwrap(), Some(42));
    assert_eq!(
      reloaded.get::<Vec<f64>>("llh").unwrap(),
      Some(vec![-12.5, -13.25, -11.0])
    );
  }

  #[rstest]
  fn matrix_rows_preserve_contents() {
    let m = array![[1_u8, 0], [0, 1]];
    assert_eq!(matrix_to_rows(&m), vec![vec![1, 0], vec![0, 1]]);
  }
}
