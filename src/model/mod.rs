pub mod likelihood;
pub mod mutrel;
pub mod supervariant;
