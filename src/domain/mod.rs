pub mod point;
pub mod result;

pub use point::*;
pub use result::*;
