mod bandwidth;

pub use bandwidth::PostgresBandwidthRepo;
