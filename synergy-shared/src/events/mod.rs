/// Change events
///
/// This module defines how row changes travel from the data service to
/// subscribed views:
/// - `RawChange`: the untyped JSON payload published per committed change
/// - `ChangeEvent<T>`: the validated, typed form a store applies
/// - `Topic`: table + project scope + event filter, and its channel name
///
/// # Example
///
/// ```
/// use synergy_shared::events::{ChangeEvent, RawChange, Table};
/// use synergy_shared::models::Task;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// let raw = RawChange {
///     table: "tasks".to_string(),
///     kind: "delete".to_string(),
///     project_id: Uuid::new_v4(),
///     record: json!({ "id": "550e8400-e29b-41d4-a716-446655440000" }),
/// };
///
/// let event = ChangeEvent::<Task>::parse(&raw, Table::Tasks).unwrap();
/// assert!(matches!(event, ChangeEvent::Delete { .. }));
/// ```

pub mod change;

pub use change::{
    change_channel, ChangeEvent, ChangeFilter, ChangeKind, ChangeParseError, RawChange, Table,
    Topic,
};
