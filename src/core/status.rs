use std::sync::atomic::{AtomicBool, Ordering};

/// Set once the request store has answered a ping at startup.
///
/// Read by the `/status/ready` probe.
static STORE_REACHABLE: AtomicBool = AtomicBool::new(false);

/// Which backend the service was started with, for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Etcd,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Etcd => "etcd",
        }
    }
}

/// Mark the service as ready to take requests.
pub fn mark_ready(kind: StoreKind) {
    STORE_REACHABLE.store(true, Ordering::SeqCst);
    log::info!("Request store ({}) reachable, service is ready", kind.as_str());
}

pub fn is_ready() -> bool {
    STORE_REACHABLE.load(Ordering::SeqCst)
}

/// Reset readiness status (useful for testing)
#[allow(dead_code)]
pub fn reset() {
    STORE_REACHABLE.store(false, Ordering::SeqCst);
    log::debug!("Readiness status reset");
}
