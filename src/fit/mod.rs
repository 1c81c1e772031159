pub mod cache;
pub mod iterative;
pub mod projection;
