pub(crate) mod chat;
pub(crate) mod connection;
pub(crate) mod dispatch;
pub(crate) mod forum;
pub(crate) mod handlers_auth;
pub(crate) mod presence;
pub(crate) mod reply;
pub(crate) mod write_pump;

pub(crate) use connection::{forum_ws, ConnectionSeat};
