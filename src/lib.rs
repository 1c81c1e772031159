pub mod cli;
pub mod fit;
pub mod io;
pub mod model;
pub mod sampler;
pub mod tree;
pub mod utils;
