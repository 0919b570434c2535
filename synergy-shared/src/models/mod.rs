/// Domain models for SynergySphere
///
/// Each model carries its own PostgreSQL operations.
///
/// # Models
///
/// - `project`: Projects and their owner
/// - `task`: Board tasks with status, priority, due date and assignee
/// - `message`: Per-project chat messages
/// - `membership`: Project membership with owner/member roles
/// - `profile`: User display data

pub mod membership;
pub mod message;
pub mod profile;
pub mod project;
pub mod task;

pub use membership::{MemberProfile, MemberRole, Membership};
pub use message::{Message, NewMessage};
pub use profile::{Profile, ProfileSummary};
pub use project::{NewProject, Project};
pub use task::{AssignedTask, NewTask, StatusCounts, Task, TaskPatch, TaskPriority, TaskStatus};
