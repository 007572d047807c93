//! Role/profile directory backed by the platform's REST endpoint.
//!
//! Queries `GET {base}/rest/v1/user_roles?select=role&user_id=eq.{id}` and
//! `GET {base}/rest/v1/profiles?select=full_name&id=eq.{id}` with the
//! project API key and, when present, the session's bearer token.

use futures::future::BoxFuture;
use futures::FutureExt;
use portal_protocol::{ProfileRow, RoleRow};
use reqwest::Client;
use tracing::debug;

use crate::{ConnectorError, ConnectorResult, Directory};

const ROLES_TABLE: &str = "user_roles";
const PROFILES_TABLE: &str = "profiles";

pub struct RestDirectory {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestDirectory {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
        }
    }

    /// Authorize row-level reads as the signed-in user.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn roles_url(&self, user_id: &str) -> String {
        format!(
            "{}/rest/v1/{ROLES_TABLE}?select=role&user_id=eq.{user_id}",
            self.base_url
        )
    }

    fn profile_url(&self, user_id: &str) -> String {
        format!(
            "{}/rest/v1/{PROFILES_TABLE}?select=full_name&id=eq.{user_id}&limit=1",
            self.base_url
        )
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, url: String) -> ConnectorResult<Vec<T>> {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Backend(format!("{status}: {body}")));
        }

        let rows = response.json::<Vec<T>>().await?;
        debug!(
            component = "rest_directory",
            event = "rest_directory.rows_fetched",
            url = %url,
            rows = rows.len(),
            "Directory rows fetched"
        );
        Ok(rows)
    }

    async fn fetch_roles(&self, user_id: &str) -> ConnectorResult<Vec<RoleRow>> {
        self.get_rows(self.roles_url(user_id)).await
    }

    async fn fetch_profile(&self, user_id: &str) -> ConnectorResult<Option<ProfileRow>> {
        let rows: Vec<ProfileRow> = self.get_rows(self.profile_url(user_id)).await?;
        Ok(rows.into_iter().next())
    }
}

impl Directory for RestDirectory {
    fn roles<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ConnectorResult<Vec<RoleRow>>> {
        self.fetch_roles(user_id).boxed()
    }

    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ConnectorResult<Option<ProfileRow>>> {
        self.fetch_profile(user_id).boxed()
    }
}
