//! Graylog 搜索 MCP 工具核心库
//! 时间范围、查询编译、载荷构造、降级执行与结果归一化各自独立成模块。

pub mod backend;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fields;
pub mod http;
pub mod interval;
pub mod mcp;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod query;
pub mod search;
pub mod state;
pub mod timerange;
pub mod tools;
