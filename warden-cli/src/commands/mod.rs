pub mod autostart;
pub mod control;
pub mod list;
pub mod logs;
