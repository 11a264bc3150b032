//! 内存存储实现模块
//!
//! 用于本地演示和测试，不依赖外部服务。
//!
//! 包含以下实现：
//! - PollingRepository: InMemoryPollingRepository
//! - LeaseStore: InMemoryLeaseStore

pub mod lease;
pub mod repository;

pub use lease::*;
pub use repository::*;
