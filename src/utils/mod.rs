//! Utility modules for wechat-channel

pub mod logging;
pub mod string;
