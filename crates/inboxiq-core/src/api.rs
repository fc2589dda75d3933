use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::ClientError;

/// Logged-in user as returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAccount {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "email_address")]
    pub address: String,
    #[serde(rename = "provider_type", default)]
    pub provider_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginUser {
    #[serde(deserialize_with = "id_string")]
    id: String,
    email: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    user: LoginUser,
    token: String,
}

#[derive(Deserialize)]
struct IntegrationsResponse {
    #[serde(default)]
    integrations: Vec<EmailAccount>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Serialize)]
struct CreateTagRequest<'a> {
    name: &'a str,
    color: &'a str,
    priority: i64,
}

#[derive(Deserialize)]
struct CreateTagResponse {
    tag: Tag,
}

#[derive(Deserialize)]
struct AccountByTagResponse {
    #[serde(rename = "emailAccount")]
    email_account: Option<EmailAccount>,
}

#[derive(Serialize)]
struct AssignTagRequest<'a> {
    #[serde(rename = "tagId")]
    tag_id: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Client for the account and tag collaborators behind the web API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let url = format!("{}/api/auth/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let login: LoginResponse = check(response).await?.json().await?;
        Ok(Session {
            user_id: login.user.id,
            email: login.user.email,
            token: login.token,
        })
    }

    pub async fn list_email_accounts(&self) -> Result<Vec<EmailAccount>, ClientError> {
        let url = format!("{}/api/email/integrations", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?;

        let body: IntegrationsResponse = check(response).await?.json().await?;
        debug!(count = body.integrations.len(), "loaded email accounts");
        Ok(body.integrations)
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, ClientError> {
        let url = format!("{}/api/user-tags", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?;

        let body: TagsResponse = check(response).await?.json().await?;
        debug!(count = body.tags.len(), "loaded tags");
        Ok(body.tags)
    }

    /// Creates a tag. `color` must be `#RRGGBB`; lower `priority` sorts first.
    /// A duplicate name comes back as a `409` API error.
    pub async fn create_tag(&self, name: &str, color: &str, priority: i64) -> Result<Tag, ClientError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&CreateTagRequest { name, color, priority })
            .send()
            .await?;

        let body: CreateTagResponse = check(response).await?.json().await?;
        debug!(tag_id = %body.tag.id, name = %body.tag.name, "created tag");
        Ok(body.tag)
    }

    /// The single email account bound to a tag, or `None` when the tag is
    /// not bound to any account.
    pub async fn account_for_tag(&self, tag_id: &str) -> Result<Option<EmailAccount>, ClientError> {
        let url = format!("{}/api/email/account-by-tag", self.base_url);
        let response = self
            .authorized(self.client.get(&url).query(&[("tagId", tag_id)]))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: AccountByTagResponse = check(response).await?.json().await?;
        Ok(body.email_account)
    }

    /// Binds a tag to an email account.
    pub async fn assign_tag(&self, account_id: &str, tag_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/email/accounts/{}/tags", self.base_url, account_id);
        let response = self
            .authorized(self.client.post(&url))
            .json(&AssignTagRequest { tag_id })
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or(text);

    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized(message));
    }
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Ids come back as numbers from some endpoints and strings from others.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
