use std::time::Duration;

use tracing::instrument;

use super::{LoadOutcome, SaveOutcome, SaveRequest, TimeSource, TreeBuilder};
use crate::{
    client::{TransportError, TreeClient},
    domain::{TreeForm, TreeId, TreeRecord, TreeScope, merge_trees},
    error::Error,
};

/// Drives a [`TreeBuilder`] against a [`TreeClient`].
///
/// Every method takes `&mut self`, so loads and saves for one session are
/// strictly sequential. A host runs [`TreeSession::run_autosave`] alongside
/// its input handling (for example in a `tokio::select!` loop) and applies
/// edits through [`TreeSession::builder_mut`].
#[derive(Debug)]
pub struct TreeSession<C, T> {
    client: C,
    builder: TreeBuilder<T>,
}

impl<C, T> TreeSession<C, T>
where
    C: TreeClient,
    T: TimeSource,
{
    /// Wraps a builder and the client it persists through.
    #[must_use]
    pub const fn new(client: C, builder: TreeBuilder<T>) -> Self {
        Self { client, builder }
    }

    /// The builder.
    #[must_use]
    pub const fn builder(&self) -> &TreeBuilder<T> {
        &self.builder
    }

    /// The builder, for edits.
    pub const fn builder_mut(&mut self) -> &mut TreeBuilder<T> {
        &mut self.builder
    }

    /// The client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Own and public trees, merged by id.
    ///
    /// Without valid credentials only public trees are listed.
    ///
    /// # Errors
    ///
    /// Returns a transport error if a listing fails for any other reason.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_trees(&self) -> Result<Vec<TreeRecord>, Error> {
        let own = match self.client.list_trees(TreeScope::Own).await {
            Ok(own) => own,
            Err(e) if e.is_unauthorized() => {
                tracing::info!("not signed in; listing public trees only");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        let public = self.client.list_trees(TreeScope::Public).await?;
        Ok(merge_trees([own, public]))
    }

    /// Opens a tree, first sending any pending auto-save of the current one.
    ///
    /// A tree known to have no GEDCOM file opens empty without a download.
    ///
    /// # Errors
    ///
    /// A failed download or parse leaves the builder empty and is returned.
    #[instrument(level = "debug", skip(self, tree), fields(tree = %tree.id))]
    pub async fn open(
        &mut self,
        tree: TreeRecord,
        scope: TreeScope,
        read_only: bool,
    ) -> Result<LoadOutcome, Error> {
        self.flush().await;

        let ticket = self.builder.begin_load(tree, scope, read_only);
        let text = if ticket.tree().has_gedcom == Some(false) {
            Ok(String::new())
        } else {
            self.client.fetch_gedcom(&ticket.tree().id, scope).await
        };
        self.builder.finish_load(ticket, text)
    }

    /// Saves the canvas and `form`, creating the tree if none is selected.
    ///
    /// # Errors
    ///
    /// Returns the builder's refusal or the transport failure. The form is
    /// not consumed and can be resubmitted.
    #[instrument(level = "debug", skip(self, form), fields(title = %form.title))]
    pub async fn save(&mut self, form: &TreeForm) -> Result<SaveOutcome, Error> {
        let request = self.builder.begin_save(form)?;
        self.exchange(request).await
    }

    /// Waits for the pending auto-save to fall due, then sends it.
    ///
    /// Returns `None` immediately when nothing is pending, and also when the
    /// text turned out unchanged. The future can be dropped at any point; a
    /// request cut off mid-send is handed back to the scheduler.
    pub async fn run_autosave(&mut self) -> Option<SaveOutcome> {
        let deadline = self.builder.autosave_deadline()?;
        let now = self.builder.clock().current_time_ms();
        if deadline > now {
            tokio::time::sleep(Duration::from_millis(deadline - now)).await;
        }
        let request = self.builder.poll_autosave()?;
        Some(self.complete_autosave(request).await)
    }

    /// Sends the pending auto-save now.
    pub async fn flush(&mut self) -> Option<SaveOutcome> {
        let request = self.builder.flush_autosave()?;
        Some(self.complete_autosave(request).await)
    }

    /// Re-sends an auto-save that failed.
    pub async fn retry(&mut self) -> Option<SaveOutcome> {
        let request = self.builder.retry_autosave()?;
        Some(self.complete_autosave(request).await)
    }

    /// Flushes pending edits and clears the canvas.
    pub async fn close(&mut self) -> Option<SaveOutcome> {
        let outcome = self.flush().await;
        self.builder.clear_canvas();
        outcome
    }

    /// Deletes a tree from the backend, clearing the canvas if it is the
    /// open one.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the canvas is then left as it was.
    pub async fn delete(&mut self, id: &TreeId) -> Result<(), Error> {
        self.client.delete_tree(id).await?;
        if self.builder.tree().is_some_and(|t| &t.id == id) {
            self.builder.clear_canvas();
        }
        Ok(())
    }

    async fn complete_autosave(&mut self, request: SaveRequest) -> SaveOutcome {
        match self.exchange(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("auto-save failed: {e}");
                SaveOutcome::Failed
            }
        }
    }

    /// Sends a save request and applies the response.
    async fn exchange(&mut self, request: SaveRequest) -> Result<SaveOutcome, Error> {
        let in_flight = InFlight {
            builder: &mut self.builder,
            request: Some(request),
        };
        let result = match &in_flight.request {
            Some(request) => send(&self.client, request).await,
            None => return Ok(SaveOutcome::Superseded),
        };
        in_flight.finish(result)
    }
}

async fn send<C: TreeClient>(client: &C, request: &SaveRequest) -> Result<TreeId, TransportError> {
    let file = Some(request.file());
    match request.tree() {
        Some(id) => client
            .update_tree(id, request.form(), file)
            .await
            .map(|()| id.clone()),
        None => client.create_tree(request.form(), file).await,
    }
}

/// A sent request awaiting its response.
///
/// Dropped unfinished, it returns the request to the builder so the session
/// does not stay in [`Saving`](super::BuilderState::Saving).
struct InFlight<'a, T: TimeSource> {
    builder: &'a mut TreeBuilder<T>,
    request: Option<SaveRequest>,
}

impl<T: TimeSource> InFlight<'_, T> {
    fn finish(mut self, result: Result<TreeId, TransportError>) -> Result<SaveOutcome, Error> {
        match self.request.take() {
            Some(request) => self.builder.finish_save(request, result),
            None => Ok(SaveOutcome::Superseded),
        }
    }
}

impl<T: TimeSource> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            self.builder.abandon_save(&request);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::{
        builder::{BuilderState, TokioTimeSource},
        client::mock::{Call, MockTreeClient},
        domain::{Config, Person, PersonId},
    };

    const LAYLA: &str = "0 HEAD\n0 @I1@ INDI\n1 NAME Layla\n1 SEX F\n0 TRLR\n";
    const OMAR: &str = "0 HEAD\n0 @I1@ INDI\n1 NAME Omar\n1 SEX M\n0 TRLR\n";

    type Session = TreeSession<Arc<MockTreeClient>, TokioTimeSource>;

    fn record(id: &str, title: &str) -> TreeRecord {
        TreeRecord {
            title: Some(title.to_string()),
            has_gedcom: Some(true),
            ..TreeRecord::new(TreeId::new(id))
        }
    }

    fn session(client: MockTreeClient) -> (Session, Arc<MockTreeClient>) {
        let client = Arc::new(client);
        let builder = TreeBuilder::new(&Config::default(), TokioTimeSource::default());
        (TreeSession::new(Arc::clone(&client), builder), client)
    }

    fn person(raw: &str) -> Person {
        Person::named(raw.parse::<PersonId>().unwrap(), "en", raw)
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_edits_are_sent_once() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();
        let start = Instant::now();

        for name in ["a", "b", "c"] {
            session.builder_mut().add_person(person(name)).unwrap();
            tokio::time::advance(Duration::from_millis(300)).await;
        }
        let outcome = session.run_autosave().await;

        assert!(matches!(outcome, Some(SaveOutcome::Saved(_))));
        // three edits 300ms apart, then the 800ms quiet period
        assert!(start.elapsed() >= Duration::from_millis(1400));
        assert!(start.elapsed() < Duration::from_millis(1500));
        let saves = client.saves();
        assert_eq!(saves.len(), 1);
        let Call::Update(id, form, Some(text)) = &saves[0] else {
            panic!("expected an update with a file, got {saves:?}");
        };
        assert_eq!(id, &TreeId::new("1"));
        assert_eq!(form.title, "Family");
        assert!(text.contains("1 NAME c"));
        assert_eq!(session.builder().state(), BuilderState::Ready);
        assert!(session.run_autosave().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_trees_flushes_pending_edits() {
        let (mut session, client) = session(
            MockTreeClient::default()
                .with_tree(record("1", "One"), Some(LAYLA))
                .with_tree(record("2", "Two"), Some(OMAR)),
        );
        session
            .open(record("1", "One"), TreeScope::Own, false)
            .await
            .unwrap();
        session.builder_mut().add_person(person("a")).unwrap();

        session
            .open(record("2", "Two"), TreeScope::Own, false)
            .await
            .unwrap();

        assert!(client.gedcom(&TreeId::new("1")).unwrap().contains("1 NAME a"));
        assert_eq!(
            client.calls().last(),
            Some(&Call::Fetch(TreeId::new("2")))
        );
        assert_eq!(session.builder().tree().unwrap().id, TreeId::new("2"));
        assert_eq!(session.builder().state(), BuilderState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_cut_off_mid_send_can_be_saved_again() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();
        client.delay_saves(Duration::from_secs(10));
        session.builder_mut().add_person(person("a")).unwrap();

        let cut_off =
            tokio::time::timeout(Duration::from_millis(900), session.run_autosave()).await;

        assert!(cut_off.is_err());
        assert_eq!(session.builder().state(), BuilderState::Dirty);
        assert!(session.builder().autosave_deadline().is_some());

        session.builder_mut().add_person(person("b")).unwrap();
        assert!(session.builder().autosave_deadline().is_some());

        let outcome = session.save(&TreeForm::titled("Family")).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved(_)));
        assert_eq!(session.builder().state(), BuilderState::Ready);
        let text = client.gedcom(&TreeId::new("1")).unwrap();
        assert!(text.contains("1 NAME a") && text.contains("1 NAME b"));
    }

    #[tokio::test]
    async fn lists_own_and_public_trees() {
        let mut shared = record("2", "Shared");
        shared.is_public = Some(true);
        let (session, _) = session(
            MockTreeClient::default()
                .with_tree(record("1", "Mine"), None)
                .with_tree(TreeRecord::new(TreeId::new("2")), None)
                .with_public(shared)
                .with_public(record("3", "Theirs")),
        );

        let trees = session.list_trees().await.unwrap();

        let ids: Vec<_> = trees.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(trees[1].title(), Some("Shared"));
        assert_eq!(trees[1].is_public, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn new_tree_is_created_then_autosaved() {
        let (mut session, client) = session(MockTreeClient::default());
        session.builder_mut().add_person(person("a")).unwrap();

        let outcome = session.save(&TreeForm::titled("Fresh")).await.unwrap();

        let SaveOutcome::Saved(record) = outcome else {
            panic!("expected a save, got {outcome:?}");
        };
        assert_eq!(record.id, TreeId::new("new-1"));

        session.builder_mut().add_person(person("b")).unwrap();
        session.run_autosave().await;

        let saves = client.saves();
        assert!(matches!(&saves[0], Call::Create(form, Some(_)) if form.title == "Fresh"));
        assert!(matches!(&saves[1], Call::Update(id, _, Some(text))
            if id == &TreeId::new("new-1") && text.contains("1 NAME b")));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_autosave_waits_for_the_next_edit() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();
        client.fail_saves(1);

        session.builder_mut().add_person(person("a")).unwrap();
        assert_eq!(session.run_autosave().await, Some(SaveOutcome::Failed));
        assert_eq!(session.builder_mut().take_notices().len(), 1);
        assert_eq!(session.builder().state(), BuilderState::Dirty);
        assert!(session.run_autosave().await.is_none());

        session.builder_mut().add_person(person("b")).unwrap();
        assert!(matches!(
            session.run_autosave().await,
            Some(SaveOutcome::Saved(_))
        ));
        let stored = client.gedcom(&TreeId::new("1")).unwrap();
        assert!(stored.contains("1 NAME a") && stored.contains("1 NAME b"));
    }

    #[tokio::test]
    async fn failed_explicit_save_keeps_the_form() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();
        client.fail_saves(1);
        let form = TreeForm::titled("Renamed");

        let err = session.save(&form).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let outcome = session.save(&form).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved(r) if r.title() == Some("Renamed")));
    }

    #[tokio::test]
    async fn tree_without_file_opens_empty() {
        let (mut session, client) = session(MockTreeClient::default());
        let mut blank = record("5", "Blank");
        blank.has_gedcom = Some(false);

        let outcome = session.open(blank, TreeScope::Own, false).await.unwrap();

        assert_eq!(outcome, LoadOutcome::Loaded(Vec::new()));
        assert!(session.builder().people().is_empty());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_file_fails_the_load() {
        let (mut session, _) = session(MockTreeClient::default());

        let err = session
            .open(record("9", "Gone"), TreeScope::Public, true)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(session.builder().state(), BuilderState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_then_clears() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();
        session.builder_mut().add_person(person("a")).unwrap();

        let outcome = session.close().await;

        assert!(matches!(outcome, Some(SaveOutcome::Saved(_))));
        assert_eq!(client.saves().len(), 1);
        assert_eq!(session.builder().state(), BuilderState::Empty);
    }

    #[tokio::test]
    async fn deleting_the_open_tree_clears_the_canvas() {
        let (mut session, client) =
            session(MockTreeClient::default().with_tree(record("1", "Family"), Some(LAYLA)));
        session
            .open(record("1", "Family"), TreeScope::Own, false)
            .await
            .unwrap();

        session.delete(&TreeId::new("1")).await.unwrap();

        assert_eq!(session.builder().state(), BuilderState::Empty);
        assert!(client.gedcom(&TreeId::new("1")).is_none());
    }
}
