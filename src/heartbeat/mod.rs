mod events;
mod runner;

pub use events::{HeartbeatEvent, HeartbeatStatus, emit_heartbeat_event, get_last_heartbeat_event};
pub use runner::HeartbeatRunner;
