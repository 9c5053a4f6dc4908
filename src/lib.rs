pub mod checker;
pub mod classifier;
pub mod config;
pub mod locations;
pub mod repost;
pub mod resolver;
pub mod timestamp;

pub use checker::{Comment, HasReplies, ModActions, PostChecker, Submission, Verdict};
pub use classifier::{TitleClass, TitleClassifier};
pub use config::{CategoryRule, Config, Family, FamilyConfig};
pub use locations::LocationTable;
pub use repost::{RepostVerdict, UserStateStore};
pub use resolver::CategoryEngine;
pub use timestamp::{TimestampCheck, TimestampChecker};
