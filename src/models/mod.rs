pub mod container;
pub mod image;
pub mod outcome;
pub mod rule;

pub use container::*;
pub use image::*;
pub use outcome::*;
pub use rule::*;
