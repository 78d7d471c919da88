pub mod config;
pub mod enums;
pub mod error;
pub mod providers;
pub mod rules;
pub mod services;
pub mod channels;
pub mod alert_checker;
pub mod api;

pub use config::{ Config, EngineSettings };
pub use enums::{ AlertKind, ChannelKind, ConditionField, LogicalOperator, Operator, Priority, TimeWindow };
pub use error::{ AppError, Result };
pub use alert_checker::{ AlertChecker, CycleSummary };
