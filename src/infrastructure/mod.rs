pub mod bluetooth;
pub mod hardware;
pub mod logging;
