pub mod adjacency;
pub mod ancestry;
