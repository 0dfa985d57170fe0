use std::sync::Arc;
use std::time::Duration;

use crate::middleware::origin::OriginPolicy;
use crate::transport::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub origin_policy: Arc<OriginPolicy>,
    pub sse_keep_alive: Duration,
}
