use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A billed party. `oid` is an opaque stable identifier minted by whatever
/// upstream identity system owns the user, not a UUID this gateway assigns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub oid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub payment_status: String,
    pub payment_valid_until: NaiveDate,
    pub webhook_url: Option<String>,
    pub total_cost_cache: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub const STATUS_ACTIVE: &'static str = "active";
    pub const STATUS_TRIAL: &'static str = "trial";
    pub const STATUS_EXPIRED: &'static str = "expired";
    pub const STATUS_BANNED: &'static str = "banned";

    /// True when `payment_valid_until` has passed and the status hasn't
    /// already been moved to a terminal one.
    pub fn should_auto_expire(&self, today: NaiveDate) -> bool {
        self.payment_valid_until < today
            && self.payment_status != Self::STATUS_EXPIRED
            && self.payment_status != Self::STATUS_BANNED
    }
}
