//! 调度核心依赖的外部协作者接口
//!
//! 消息总线与状态查询的具体传输由外部提供，核心只依赖这里定义的接口。

pub mod message_bus;

pub use message_bus::*;
