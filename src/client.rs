//! Access to trees stored by the backend.
//!
//! The builder only ever sees the [`TreeClient`] trait. [`HttpTreeClient`]
//! implements it over the tree REST API.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    domain::{TreeForm, TreeId, TreeRecord, TreeScope},
    error::ValidationError,
};

mod http;
pub use http::HttpTreeClient;

/// A failed request to the backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or its body could not be read.
    #[error("{method} {url} failed: {source}")]
    Request {
        /// HTTP method.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a non-success status.
    #[error("{method} {url} returned {status}")]
    Status {
        /// HTTP method.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Status code.
        status: u16,
    },
    /// The backend answered with a body that could not be understood.
    #[error("unexpected response from {url}: {reason}")]
    Decode {
        /// Request URL.
        url: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl TransportError {
    /// Whether the backend rejected the caller's credentials.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

/// Authentication state changes observed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// A request that needs a token was made without one.
    Missing,
    /// The backend rejected the token.
    Expired,
}

/// Receives [`AuthEvent`]s from a client.
pub trait AuthListener: Send + Sync {
    /// Called once per observed event.
    fn on_auth_event(&self, event: AuthEvent);
}

impl<F> AuthListener for F
where
    F: Fn(AuthEvent) + Send + Sync,
{
    fn on_auth_event(&self, event: AuthEvent) {
        self(event);
    }
}

/// A serialized tree ready to be attached to a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GedcomFile {
    name: String,
    text: String,
}

impl GedcomFile {
    /// Wraps GEDCOM text under a file name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TooLarge`] if the text is longer than
    /// `limit` bytes.
    pub fn new(name: String, text: String, limit: usize) -> Result<Self, ValidationError> {
        if text.len() > limit {
            return Err(ValidationError::TooLarge {
                size: text.len(),
                limit,
            });
        }
        Ok(Self { name, text })
    }

    /// File name sent with the upload.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The GEDCOM text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Tree persistence operations.
#[async_trait]
pub trait TreeClient: Send + Sync {
    /// Lists tree metadata for one scope.
    async fn list_trees(&self, scope: TreeScope) -> Result<Vec<TreeRecord>, TransportError>;

    /// Downloads a tree's GEDCOM text.
    async fn fetch_gedcom(&self, id: &TreeId, scope: TreeScope) -> Result<String, TransportError>;

    /// Creates a tree, returning the id the backend assigned.
    async fn create_tree(
        &self,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<TreeId, TransportError>;

    /// Replaces a tree's metadata and, when given, its GEDCOM file.
    async fn update_tree(
        &self,
        id: &TreeId,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<(), TransportError>;

    /// Deletes a tree.
    async fn delete_tree(&self, id: &TreeId) -> Result<(), TransportError>;
}

#[async_trait]
impl<C: TreeClient + ?Sized> TreeClient for Arc<C> {
    async fn list_trees(&self, scope: TreeScope) -> Result<Vec<TreeRecord>, TransportError> {
        (**self).list_trees(scope).await
    }

    async fn fetch_gedcom(&self, id: &TreeId, scope: TreeScope) -> Result<String, TransportError> {
        (**self).fetch_gedcom(id, scope).await
    }

    async fn create_tree(
        &self,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<TreeId, TransportError> {
        (**self).create_tree(form, file).await
    }

    async fn update_tree(
        &self,
        id: &TreeId,
        form: &TreeForm,
        file: Option<&GedcomFile>,
    ) -> Result<(), TransportError> {
        (**self).update_tree(id, form, file).await
    }

    async fn delete_tree(&self, id: &TreeId) -> Result<(), TransportError> {
        (**self).delete_tree(id).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory backend for session tests.

    use std::{collections::BTreeMap, sync::Mutex, time::Duration};

    use super::*;

    /// A call received by the mock, with the GEDCOM text it carried.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        List(TreeScope),
        Fetch(TreeId),
        Create(TreeForm, Option<String>),
        Update(TreeId, TreeForm, Option<String>),
        Delete(TreeId),
    }

    #[derive(Debug, Default)]
    struct State {
        trees: BTreeMap<TreeId, (TreeRecord, Option<String>)>,
        public: Vec<TreeRecord>,
        next_id: u64,
        calls: Vec<Call>,
        failing_saves: usize,
        save_latency: Duration,
    }

    #[derive(Debug, Default)]
    pub struct MockTreeClient {
        state: Mutex<State>,
    }

    impl MockTreeClient {
        pub fn with_tree(self, record: TreeRecord, gedcom: Option<&str>) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                state
                    .trees
                    .insert(record.id.clone(), (record, gedcom.map(str::to_string)));
            }
            self
        }

        pub fn with_public(self, record: TreeRecord) -> Self {
            self.state.lock().unwrap().public.push(record);
            self
        }

        /// Makes the next `count` creates or updates fail with a 503.
        pub fn fail_saves(&self, count: usize) {
            self.state.lock().unwrap().failing_saves = count;
        }

        /// Makes every create or update take `latency` before it lands.
        pub fn delay_saves(&self, latency: Duration) {
            self.state.lock().unwrap().save_latency = latency;
        }

        async fn wait_for_save(&self) {
            let latency = self.state.lock().unwrap().save_latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn saves(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Create(..) | Call::Update(..)))
                .collect()
        }

        pub fn gedcom(&self, id: &TreeId) -> Option<String> {
            let state = self.state.lock().unwrap();
            state.trees.get(id).and_then(|(_, text)| text.clone())
        }

        fn check_failure(state: &mut State, method: &'static str) -> Result<(), TransportError> {
            if state.failing_saves > 0 {
                state.failing_saves -= 1;
                return Err(TransportError::Status {
                    method,
                    url: "mock://trees".to_string(),
                    status: 503,
                });
            }
            Ok(())
        }
    }

    fn not_found(id: &TreeId) -> TransportError {
        TransportError::Status {
            method: "GET",
            url: format!("mock://trees/{id}"),
            status: 404,
        }
    }

    #[async_trait]
    impl TreeClient for MockTreeClient {
        async fn list_trees(&self, scope: TreeScope) -> Result<Vec<TreeRecord>, TransportError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::List(scope));
            Ok(match scope {
                TreeScope::Own => state.trees.values().map(|(r, _)| r.clone()).collect(),
                TreeScope::Public => state.public.clone(),
            })
        }

        async fn fetch_gedcom(
            &self,
            id: &TreeId,
            _scope: TreeScope,
        ) -> Result<String, TransportError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Fetch(id.clone()));
            state
                .trees
                .get(id)
                .and_then(|(_, text)| text.clone())
                .ok_or_else(|| not_found(id))
        }

        async fn create_tree(
            &self,
            form: &TreeForm,
            file: Option<&GedcomFile>,
        ) -> Result<TreeId, TransportError> {
            self.wait_for_save().await;
            let mut state = self.state.lock().unwrap();
            let text = file.map(|f| f.text().to_string());
            state.calls.push(Call::Create(form.clone(), text.clone()));
            Self::check_failure(&mut state, "POST")?;

            state.next_id += 1;
            let id = TreeId::new(format!("new-{}", state.next_id));
            let mut record = TreeRecord::new(id.clone());
            record.apply_form(form);
            record.has_gedcom = Some(text.is_some());
            state.trees.insert(id.clone(), (record, text));
            Ok(id)
        }

        async fn update_tree(
            &self,
            id: &TreeId,
            form: &TreeForm,
            file: Option<&GedcomFile>,
        ) -> Result<(), TransportError> {
            self.wait_for_save().await;
            let mut state = self.state.lock().unwrap();
            let text = file.map(|f| f.text().to_string());
            state
                .calls
                .push(Call::Update(id.clone(), form.clone(), text.clone()));
            Self::check_failure(&mut state, "PUT")?;

            let (record, stored) = state.trees.get_mut(id).ok_or_else(|| not_found(id))?;
            record.apply_form(form);
            if text.is_some() {
                record.has_gedcom = Some(true);
                *stored = text;
            }
            Ok(())
        }

        async fn delete_tree(&self, id: &TreeId) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Delete(id.clone()));
            state
                .trees
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found(id))
        }
    }
}
