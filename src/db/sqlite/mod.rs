mod bandwidth;

pub use bandwidth::SqliteBandwidthRepo;
