//! Domain services behind the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own presence state and fan-out so the route handler can
//! stay focused on transport concerns and frame dispatch. `session` is the
//! coordinator: the only module allowed to touch the registry, the room
//! directory, and the presence store within one operation.

pub mod dispatch;
pub mod presence;
pub mod room;
pub mod session;
pub mod sweeper;
