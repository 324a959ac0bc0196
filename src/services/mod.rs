mod bandwidth;

use std::sync::Arc;

pub use bandwidth::{
    BandwidthService, ServiceError, ServiceResult, SweepPolicy, SweepReport, fill_range,
};

use crate::db::DbPool;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub bandwidth: BandwidthService,
}

impl Services {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self {
            bandwidth: BandwidthService::new(db),
        }
    }
}
