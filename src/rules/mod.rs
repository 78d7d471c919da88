pub mod condition;
pub mod rule;

pub use condition::{ evaluate_condition, Condition, Evaluation, DEFAULT_SPIKE_MULTIPLIER };
pub use rule::AlertRule;
