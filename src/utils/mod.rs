//! Utils: 日志和输入校验等辅助功能

pub mod logger;
pub mod validator;
