pub mod dispatcher;
pub mod evaluator;
pub mod history;
pub mod rule_repository;

pub use dispatcher::{ DispatchOutcome, NotificationDispatcher };
pub use evaluator::{ CycleReport, Firing, RuleSetEvaluator, SkippedRule };
pub use history::{ NotificationEvent, NotificationHistoryStore };
pub use rule_repository::{ InMemoryRuleRepository, RuleRepository };
