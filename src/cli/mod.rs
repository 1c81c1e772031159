pub mod clonetree_cli;
