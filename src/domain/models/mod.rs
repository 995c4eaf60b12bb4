pub mod cycle;
pub mod row;
pub mod source;

pub use cycle::PollCycleResult;
pub use row::{OutboxRow, RowId};
pub use source::{ColumnMap, CompletionKind, IdType, SourceDescriptor, SourceKey, TopicRule};
