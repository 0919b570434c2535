/// Session context passed into every operation that needs the current user
use uuid::Uuid;

/// The signed-in user on whose behalf operations run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionContext {
    pub user_id: Uuid,
}

impl SessionContext {
    pub fn new(user_id: Uuid) -> Self {
        SessionContext { user_id }
    }
}
