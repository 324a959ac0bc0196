mod bandwidth;

pub use bandwidth::*;
