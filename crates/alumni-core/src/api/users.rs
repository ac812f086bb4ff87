use tracing::debug;

use crate::models::{UpdateUser, User, UsersPage, UsersQuery};

use super::client::ApiRequest;
use super::{ApiClient, ApiError};

const USERS_PATH: &str = "users/";
const USERS_LAZY_PATH: &str = "users/lazy";

/// Directory endpoints. Every call goes through the client's
/// refresh-and-retry path.
#[derive(Clone)]
pub struct UserService {
    client: ApiClient,
}

impl UserService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetch every user in the directory
    pub async fn all_users(&self) -> Result<Vec<User>, ApiError> {
        let users: Vec<User> = self.client.get_json(USERS_PATH).await?;
        debug!(count = users.len(), "Users received");
        Ok(users)
    }

    /// Fetch one page of users matching the filters
    pub async fn users_lazy(&self, query: &UsersQuery) -> Result<UsersPage, ApiError> {
        let request = ApiRequest::get(USERS_LAZY_PATH).query(query.to_pairs());
        let page: UsersPage = self.client.send_json(&request).await?;
        debug!(
            count = page.users.len(),
            total = page.total,
            offset = query.offset,
            "User page received"
        );
        Ok(page)
    }

    /// Find a single user by id in the full listing
    pub async fn find_user(&self, id: i64) -> Result<Option<User>, ApiError> {
        Ok(self.all_users().await?.into_iter().find(|u| u.id == id))
    }

    /// Apply a partial profile update and return the stored profile
    pub async fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User, ApiError> {
        self.client.put_json(&format!("users/{id}"), update).await
    }
}
