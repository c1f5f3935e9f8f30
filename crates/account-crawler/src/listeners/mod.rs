//! Housekeeping listeners run by the crawler.

mod directory;
mod push_feedback;
mod reaper;

pub use directory::DirectoryReconciler;
pub use push_feedback::PushFeedbackProcessor;
pub use reaper::StaleAccountReaper;
