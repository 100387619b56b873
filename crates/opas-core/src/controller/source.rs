use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Registration, RegistrationFilter, RegistrationPage};

/// Where the controller gets registration data and sends review decisions.
#[async_trait]
pub trait RegistrationSource: Send + Sync {
    async fn list_registrations(&self, filter: &RegistrationFilter) -> Result<RegistrationPage>;

    async fn get_registration(&self, id: i64) -> Result<Registration>;

    async fn approve_registration(&self, id: i64, notes: Option<&str>) -> Result<()>;

    async fn reject_registration(&self, id: i64, reason: &str) -> Result<()>;

    async fn request_more_info(&self, id: i64, message: &str) -> Result<()>;
}
