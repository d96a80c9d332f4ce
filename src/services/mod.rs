pub(crate) mod attempts;
pub(crate) mod backend_client;
pub(crate) mod exam_loader;
pub(crate) mod session_timing;
