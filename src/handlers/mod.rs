pub mod entity_handlers;
pub mod health_handlers;
pub mod sink_handlers;
pub mod transfer_handlers;
