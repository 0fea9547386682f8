use crate::repository::OwnerId;
use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};

/// A request by `owner` to hide their reference to `code`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletionTask {
    pub owner: OwnerId,
    pub code: ShortCode,
}

impl DeletionTask {
    pub fn new(owner: impl Into<OwnerId>, code: ShortCode) -> Self {
        Self {
            owner: owner.into(),
            code,
        }
    }
}
