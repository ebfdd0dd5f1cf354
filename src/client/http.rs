use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    RequestBuilder, Response,
    multipart::{Form, Part},
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{AuthEvent, AuthListener, GedcomFile, TransportError, TreeClient};
use crate::domain::{TreeForm, TreeId, TreeRecord, TreeScope};

/// [`TreeClient`] over the tree REST API.
///
/// Routes, relative to the base URL:
///
/// | operation      | request                          |
/// |----------------|----------------------------------|
/// | own trees      | `GET /trees`                     |
/// | public trees   | `GET /trees/public`              |
/// | own GEDCOM     | `GET /trees/{id}/gedcom`         |
/// | public GEDCOM  | `GET /trees/public/{id}/gedcom`  |
/// | create         | `POST /trees` (multipart)        |
/// | update         | `PUT /trees/{id}` (multipart)    |
/// | delete         | `DELETE /trees/{id}`             |
#[derive(Clone)]
pub struct HttpTreeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    listener: Option<Arc<dyn AuthListener>>,
}

impl std::fmt::Debug for HttpTreeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTreeClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Response bodies seen for tree listings.
#[derive(Deserialize)]
#[serde(untagged)]
enum TreeList {
    Bare(Vec<TreeRecord>),
    Wrapped { trees: Vec<TreeRecord> },
}

/// Response bodies seen for a create.
#[derive(Deserialize)]
#[serde(untagged)]
enum Created {
    Id { id: TreeId },
    Wrapped { tree: IdOnly },
}

#[derive(Deserialize)]
struct IdOnly {
    id: TreeId,
}

impl HttpTreeClient {
    /// A client for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            listener: None,
        }
    }

    /// Sends `token` as a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into()).filter(|t| !t.is_empty());
        self
    }

    /// Reports authentication problems to `listener`.
    #[must_use]
    pub fn with_auth_listener(mut self, listener: impl AuthListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn notify(&self, event: AuthEvent) {
        if let Some(listener) = &self.listener {
            listener.on_auth_event(event);
        }
    }

    /// Attaches the token and sends the request.
    ///
    /// Requests in the public scope go out anonymously when there is no
    /// token. At most one [`AuthEvent`] is reported per request: `Missing`
    /// up front for an anonymous request in the own scope, otherwise on a
    /// 401 response.
    async fn send(
        &self,
        method: &'static str,
        url: String,
        request: RequestBuilder,
        scope: TreeScope,
    ) -> Result<Response, TransportError> {
        let reported = self.token.is_none() && scope == TreeScope::Own;
        if reported {
            self.notify(AuthEvent::Missing);
        }
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        debug!(method, %url, "sending request");
        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Request {
                method,
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED && !reported {
            self.notify(if self.token.is_some() {
                AuthEvent::Expired
            } else {
                AuthEvent::Missing
            });
        }
        warn!(method, %url, status = status.as_u16(), "request rejected");
        Err(TransportError::Status {
            method,
            url,
            status: status.as_u16(),
        })
    }

    fn form(form: &TreeForm, file: Option<&GedcomFile>) -> Result<Form, reqwest::Error> {
        let mut multipart = Form::new()
            .text("title", form.title.clone())
            .text("description", form.description.clone())
            .text("archiveSource", form.archive_source.clone())
            .text("documentCode", form.document_code.clone())
            .text("isPublic", form.is_public.to_string());

        if let Some(file) = file {
            let part = Part::text(file.text().to_string())
                .file_name(file.name().to_string())
                .mime_str("text/plain")?;
            multipart = multipart.part("file", part);
        }

        Ok(multipart)
    }

    async fn submit(
        &self,
        method: &'static str,
        url: String,
        request: RequestBuilder,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<Response, TransportError> {
        let multipart = Self::form(form, file).map_err(|source| TransportError::Request {
            method,
            url: url.clone(),
            source,
        })?;
        self.send(method, url, request.multipart(multipart), TreeScope::Own)
            .await
    }
}

#[async_trait]
impl TreeClient for HttpTreeClient {
    #[instrument(level = "debug", skip(self))]
    async fn list_trees(&self, scope: TreeScope) -> Result<Vec<TreeRecord>, TransportError> {
        let url = match scope {
            TreeScope::Own => self.url("trees"),
            TreeScope::Public => self.url("trees/public"),
        };
        let response = self
            .send("GET", url.clone(), self.http.get(&url), scope)
            .await?;

        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                method: "GET",
                url: url.clone(),
                source,
            })?;
        let list: TreeList = serde_json::from_str(&body).map_err(|e| TransportError::Decode {
            url,
            reason: e.to_string(),
        })?;

        Ok(match list {
            TreeList::Bare(trees) | TreeList::Wrapped { trees } => trees,
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_gedcom(&self, id: &TreeId, scope: TreeScope) -> Result<String, TransportError> {
        let url = match scope {
            TreeScope::Own => self.url(&format!("trees/{id}/gedcom")),
            TreeScope::Public => self.url(&format!("trees/public/{id}/gedcom")),
        };
        let response = self
            .send("GET", url.clone(), self.http.get(&url), scope)
            .await?;

        response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                method: "GET",
                url,
                source,
            })
    }

    #[instrument(level = "debug", skip(self, file), fields(title = %form.title))]
    async fn create_tree(
        &self,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<TreeId, TransportError> {
        let url = self.url("trees");
        let response = self
            .submit("POST", url.clone(), self.http.post(&url), form, file)
            .await?;

        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                method: "POST",
                url: url.clone(),
                source,
            })?;
        let created: Created = serde_json::from_str(&body).map_err(|e| TransportError::Decode {
            url,
            reason: e.to_string(),
        })?;

        Ok(match created {
            Created::Id { id } | Created::Wrapped { tree: IdOnly { id } } => id,
        })
    }

    #[instrument(level = "debug", skip(self, form, file))]
    async fn update_tree(
        &self,
        id: &TreeId,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<(), TransportError> {
        let url = self.url(&format!("trees/{id}"));
        self.submit("PUT", url.clone(), self.http.put(&url), form, file)
            .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_tree(&self, id: &TreeId) -> Result<(), TransportError> {
        let url = self.url(&format!("trees/{id}"));
        self.send("DELETE", url.clone(), self.http.delete(&url), TreeScope::Own)
            .await?;
        Ok(())
    }
}
