//! One poll of one subscription, start to finish.
//!
//! A poll runs gate → fetch → parse → split → filter → classify → apply →
//! commit subscription metadata. Classification finishes before the first
//! write, so a cancelled poll either issues every write or none.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::config::WebcalConfig;
use crate::error::WebcalResult;
use crate::feed::Feed;
use crate::fetch::{FeedFetcher, FetchedFeed, HttpTransport, Transport};
use crate::filter::ObjectFilter;
use crate::schedule;
use crate::store::{CalendarObjectStore, SubscriptionStore};
use crate::subscription::{Subscription, SubscriptionMutation};
use crate::sync::{PollSummary, ReconciliationPlan};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The refresh interval has not elapsed yet.
    Skipped { next_due: DateTime<Utc> },
    /// Nothing usable was downloaded; the subscription is untouched.
    NoData,
    /// The feed was downloaded but could not be read as a whole.
    Aborted,
    Cancelled,
    Synced(PollSummary),
}

/// Result of polling one subscription as part of a batch.
#[derive(Debug)]
pub struct PollReport {
    pub subscription: Subscription,
    pub result: WebcalResult<PollOutcome>,
}

pub struct Poller {
    fetcher: FeedFetcher,
    subscriptions: Arc<dyn SubscriptionStore>,
    objects: Arc<dyn CalendarObjectStore>,
    max_concurrent: usize,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        user_agent: impl Into<String>,
        subscriptions: Arc<dyn SubscriptionStore>,
        objects: Arc<dyn CalendarObjectStore>,
    ) -> Self {
        Poller {
            fetcher: FeedFetcher::new(transport, user_agent),
            subscriptions,
            objects,
            max_concurrent: 1,
        }
    }

    /// A poller using the HTTP transport and the settings from `config`.
    pub fn from_config(
        config: &WebcalConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
        objects: Arc<dyn CalendarObjectStore>,
    ) -> WebcalResult<Self> {
        let transport = Arc::new(HttpTransport::from_config(config)?);
        Ok(Self::new(transport, config.user_agent.clone(), subscriptions, objects)
            .with_max_concurrent(config.max_concurrent_polls))
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub async fn poll(
        &self,
        subscription: &Subscription,
        cancel: &CancellationToken,
    ) -> WebcalResult<PollOutcome> {
        self.poll_at(subscription, Utc::now(), cancel).await
    }

    /// Poll as if the current time were `now`.
    pub async fn poll_at(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> WebcalResult<PollOutcome> {
        let span = info_span!(
            "poll",
            subscription_id = subscription.id,
            source = %subscription.redacted_source()
        );
        self.run(subscription, now, cancel).instrument(span).await
    }

    async fn run(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> WebcalResult<PollOutcome> {
        if let Some(next_due) = schedule::next_due(subscription).filter(|due| now < *due) {
            debug!(%next_due, "Not due yet");
            return Ok(PollOutcome::Skipped { next_due });
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Poll cancelled during fetch");
                return Ok(PollOutcome::Cancelled);
            }
            fetched = self.fetcher.fetch(subscription) => fetched,
        };
        let Some(fetched) = fetched else {
            return Ok(PollOutcome::NoData);
        };

        self.sync_fetched(subscription, &fetched, now, cancel).await
    }

    /// Everything after the download: parse, classify, apply and commit.
    async fn sync_fetched(
        &self,
        subscription: &Subscription,
        fetched: &FetchedFeed,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> WebcalResult<PollOutcome> {
        let feed = match Feed::parse(&fetched.canonical) {
            Ok(feed) => feed,
            Err(e) => {
                error!("Feed could not be parsed, cache left untouched: {e}");
                // the feed was reachable, so wait a full interval before retrying
                let mutation = SubscriptionMutation {
                    refresh_interval: None,
                    last_modified: now,
                };
                self.subscriptions
                    .apply_mutation(subscription.id, &mutation)
                    .await?;
                return Ok(PollOutcome::Aborted);
            }
        };

        let hint = schedule::refresh_hint(&feed);
        let filter = ObjectFilter::for_subscription(subscription);
        let cached = self.objects.list_for_subscription(subscription.id).await?;

        let plan = ReconciliationPlan::build(
            subscription.id,
            feed.into_objects().filter_map(|object| filter.apply(object)),
            cached,
        );

        if cancel.is_cancelled() {
            info!("Poll cancelled before applying changes");
            return Ok(PollOutcome::Cancelled);
        }

        let summary = plan.apply(self.objects.as_ref()).await?;

        let mutation = schedule::stage_mutation(subscription, hint, now);
        if let Some(interval) = &mutation.refresh_interval {
            info!(%interval, "Adopting refresh interval suggested by feed");
        }
        self.subscriptions
            .apply_mutation(subscription.id, &mutation)
            .await?;

        info!(%summary, "Subscription synced");
        Ok(PollOutcome::Synced(summary))
    }

    /// Fetch and classify without touching either store or the gate.
    pub async fn preview(
        &self,
        subscription: &Subscription,
    ) -> WebcalResult<Option<ReconciliationPlan>> {
        let span = info_span!(
            "preview",
            subscription_id = subscription.id,
            source = %subscription.redacted_source()
        );
        self.classify(subscription).instrument(span).await
    }

    async fn classify(
        &self,
        subscription: &Subscription,
    ) -> WebcalResult<Option<ReconciliationPlan>> {
        let Some(fetched) = self.fetcher.fetch(subscription).await else {
            return Ok(None);
        };
        let feed = match Feed::parse(&fetched.canonical) {
            Ok(feed) => feed,
            Err(e) => {
                error!("Feed could not be parsed: {e}");
                return Ok(None);
            }
        };

        let filter = ObjectFilter::for_subscription(subscription);
        let cached = self.objects.list_for_subscription(subscription.id).await?;
        Ok(Some(ReconciliationPlan::build(
            subscription.id,
            feed.into_objects().filter_map(|object| filter.apply(object)),
            cached,
        )))
    }

    /// Poll every subscription the store lists, a bounded number at a time.
    /// A failing subscription is reported and does not stop the others.
    pub async fn poll_due(&self, cancel: &CancellationToken) -> WebcalResult<Vec<PollReport>> {
        let subscriptions = self.subscriptions.list_due().await?;
        let now = Utc::now();

        let reports: Vec<PollReport> = stream::iter(subscriptions)
            .map(|subscription| async move {
                let result = self.poll_at(&subscription, now, cancel).await;
                if let Err(e) = &result {
                    error!(subscription_id = subscription.id, "Poll failed: {e}");
                }
                PollReport {
                    subscription,
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::error::TransportError;
    use crate::fetch::{ContentKind, FeedRequest, FeedResponse};
    use crate::object::{CachedCalendarObject, denormalize};
    use crate::store::{DirectoryStore, MemoryStore};
    use crate::sync::ActionKind;

    /// Serves a fixed body and records every request.
    struct ScriptedTransport {
        response: Mutex<Result<FeedResponse, TransportError>>,
        requests: Mutex<usize>,
    }

    impl ScriptedTransport {
        fn new(body: &str, content_type: &str) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                response: Mutex::new(Ok(FeedResponse {
                    body: body.to_string(),
                    content_type: Some(content_type.to_string()),
                })),
                requests: Mutex::new(0),
            })
        }

        fn failing(error: TransportError) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                response: Mutex::new(Err(error)),
                requests: Mutex::new(0),
            })
        }

        fn serve(&self, body: &str) {
            *self.response.lock().unwrap() = Ok(FeedResponse {
                body: body.to_string(),
                content_type: Some("text/calendar".into()),
            });
        }

        fn requests(&self) -> usize {
            *self.requests.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, _request: &FeedRequest) -> Result<FeedResponse, TransportError> {
            *self.requests.lock().unwrap() += 1;
            self.response.lock().unwrap().clone()
        }
    }

    /// Never answers; only cancellation ends a fetch.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn fetch(&self, _request: &FeedRequest) -> Result<FeedResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn ics(events: &[(&str, &str)], header: &str) -> String {
        let body: String = events
            .iter()
            .map(|(uid, extra)| format!("BEGIN:VEVENT\r\nUID:{uid}\r\n{extra}END:VEVENT\r\n"))
            .collect();
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\n{header}{body}END:VCALENDAR\r\n"
        )
    }

    fn setup(transport: Arc<dyn Transport>) -> (Arc<MemoryStore>, Poller, Subscription) {
        let store = Arc::new(MemoryStore::new());
        let subscription = Subscription::new(
            1,
            "principals/users/alice",
            "feed",
            "webcal://example.com/feed.ics",
        );
        store.insert_subscription(subscription.clone()).expect("seed");

        let poller = Poller::new(transport, "webcal-test", store.clone(), store.clone());
        (store, poller, subscription)
    }

    /// Cache `uid` as the feed would have delivered it.
    fn seed(store: &MemoryStore, id: i64, uid: &str, extra: &str) -> CachedCalendarObject {
        let feed = Feed::parse(&ics(&[(uid, extra)], "")).expect("Should parse");
        let object = feed.into_objects().next().expect("object");
        let cached = CachedCalendarObject::from_denormalized(
            id,
            &format!("{uid}.ics"),
            &denormalize(&object).expect("valid"),
        );
        store.insert_object(1, cached.clone()).expect("seed");
        cached
    }

    fn uids(store: &MemoryStore) -> Vec<String> {
        let mut uids: Vec<_> = store
            .objects(1)
            .expect("objects")
            .into_iter()
            .map(|o| o.uid)
            .collect();
        uids.sort();
        uids
    }

    fn synced(outcome: PollOutcome) -> PollSummary {
        match outcome {
            PollOutcome::Synced(summary) => summary,
            other => panic!("expected a sync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_stale_and_created_scenario() {
        let feed = ics(&[("A", "SUMMARY:Alpha\r\n"), ("C", "SUMMARY:Gamma\r\n")], "");
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let a = seed(&store, 1, "A", "SUMMARY:Alpha\r\n");
        seed(&store, 2, "B", "SUMMARY:Beta\r\n");

        let plan = poller
            .preview(&subscription)
            .await
            .expect("preview")
            .expect("plan");
        let mut kinds: Vec<_> = plan
            .actions
            .iter()
            .map(|a| (a.uid().to_string(), a.kind()))
            .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ("A".to_string(), ActionKind::Unchanged),
                ("B".to_string(), ActionKind::StaleForDeletion),
                ("C".to_string(), ActionKind::Created),
            ]
        );

        let cancel = CancellationToken::new();
        let summary = synced(poller.poll(&subscription, &cancel).await.expect("poll"));
        assert_eq!(
            (summary.unchanged, summary.purged, summary.created),
            (1, 1, 1)
        );
        assert_eq!(uids(&store), ["A", "C"]);

        // A kept its storage address
        let objects = store.objects(1).expect("objects");
        let kept = objects.iter().find(|o| o.uid == "A").expect("A");
        assert_eq!((kept.id, kept.uri.as_str()), (a.id, a.uri.as_str()));
    }

    #[tokio::test]
    async fn test_second_poll_of_unchanged_feed_writes_nothing() {
        let feed = ics(&[("A", "SUMMARY:Alpha\r\n"), ("B", "SUMMARY:Beta\r\n")], "");
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let cancel = CancellationToken::new();

        synced(poller.poll(&subscription, &cancel).await.expect("first poll"));
        let after_first = store.object_mutations().expect("count");
        let objects_after_first = store.objects(1).expect("objects");

        let summary = synced(poller.poll(&subscription, &cancel).await.expect("second poll"));
        assert_eq!(summary.mutations(), 0);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(store.object_mutations().expect("count"), after_first);
        assert_eq!(store.objects(1).expect("objects"), objects_after_first);
    }

    #[tokio::test]
    async fn test_dtstamp_only_change_is_content_identical() {
        let transport = ScriptedTransport::new(
            &ics(&[("A", "DTSTAMP:20240101T000000Z\r\nSUMMARY:Alpha\r\n")], ""),
            "text/calendar",
        );
        let (store, poller, subscription) = setup(transport.clone());
        let cancel = CancellationToken::new();
        synced(poller.poll(&subscription, &cancel).await.expect("first poll"));
        let before = store.object_mutations().expect("count");

        transport.serve(&ics(
            &[("A", "DTSTAMP:20240909T090909Z\r\nSUMMARY:Alpha\r\n")],
            "",
        ));
        let summary = synced(poller.poll(&subscription, &cancel).await.expect("second poll"));

        assert_eq!(summary.content_identical, 1);
        assert_eq!(summary.modified, 0);
        assert_eq!(store.object_mutations().expect("count"), before);
    }

    #[tokio::test]
    async fn test_real_change_updates_in_place() {
        let feed = ics(&[("A", "SUMMARY:Old\r\n")], "");
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let cached = seed(&store, 5, "A", "SUMMARY:Something else\r\n");

        let cancel = CancellationToken::new();
        let summary = synced(poller.poll(&subscription, &cancel).await.expect("poll"));

        assert_eq!(summary.modified, 1);
        let objects = store.objects(1).expect("objects");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].uri, cached.uri);
        assert!(objects[0].calendar_data.contains("SUMMARY:Old"));
    }

    #[tokio::test]
    async fn test_missing_uid_is_purged_and_nothing_else_touched() {
        let feed = ics(&[("A", ""), ("C", "")], "");
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let a = seed(&store, 1, "A", "");
        seed(&store, 2, "B", "");
        let c = seed(&store, 3, "C", "");

        let cancel = CancellationToken::new();
        let summary = synced(poller.poll(&subscription, &cancel).await.expect("poll"));

        assert_eq!(summary.purged, 1);
        // only the purge was issued
        assert_eq!(store.object_mutations().expect("count"), 1);
        assert_eq!(store.objects(1).expect("objects"), vec![a, c]);
    }

    #[tokio::test]
    async fn test_poll_is_skipped_before_interval_elapses() {
        let transport = ScriptedTransport::new(&ics(&[("A", "")], ""), "text/calendar");
        let (store, poller, mut subscription) = setup(transport.clone());
        let now = Utc::now();
        subscription.refresh_interval = Some("PT1H".parse().expect("PT1H"));
        subscription.last_modified = Some(now - Duration::minutes(30));

        let outcome = poller
            .poll_at(&subscription, now, &CancellationToken::new())
            .await
            .expect("poll");

        assert!(matches!(outcome, PollOutcome::Skipped { .. }));
        assert_eq!(transport.requests(), 0);
        assert_eq!(store.subscription_mutations().expect("count"), 0);
    }

    #[tokio::test]
    async fn test_malformed_jcal_changes_nothing() {
        let transport = ScriptedTransport::new("[\"vcalendar\", [", "application/calendar+json");
        let (store, poller, subscription) = setup(transport);
        seed(&store, 1, "A", "");

        let outcome = poller
            .poll(&subscription, &CancellationToken::new())
            .await
            .expect("poll");

        assert_eq!(outcome, PollOutcome::NoData);
        assert_eq!(store.object_mutations().expect("count"), 0);
        assert_eq!(store.subscription_mutations().expect("count"), 0);
        assert_eq!(store.subscription(1).expect("found").last_modified, None);
        assert_eq!(uids(&store), ["A"]);
    }

    #[tokio::test]
    async fn test_unreadable_canonical_text_aborts_and_waits_an_interval() {
        let (store, poller, subscription) = setup(ScriptedTransport::new("", "text/calendar"));
        seed(&store, 1, "A", "");
        let now = Utc::now();
        let fetched = FetchedFeed {
            canonical: "<html>Bad gateway</html>".into(),
            kind: ContentKind::ICalendar,
        };

        let outcome = poller
            .sync_fetched(&subscription, &fetched, now, &CancellationToken::new())
            .await
            .expect("poll");

        assert_eq!(outcome, PollOutcome::Aborted);
        assert_eq!(store.object_mutations().expect("count"), 0);
        assert_eq!(uids(&store), ["A"]);

        let updated = store.subscription(1).expect("found");
        assert_eq!(updated.last_modified, Some(now));
        assert_eq!(updated.refresh_interval, None);
    }

    #[tokio::test]
    async fn test_overflowing_duration_skips_only_that_event() {
        let feed = ics(
            &[
                ("A", "DTSTART:20240101T100000Z\r\nDURATION:PT1H\r\n"),
                ("B", "DTSTART:20240101T100000Z\r\nDURATION:P99999999W\r\n"),
            ],
            "",
        );
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));

        let summary = synced(
            poller
                .poll(&subscription, &CancellationToken::new())
                .await
                .expect("poll"),
        );

        assert_eq!((summary.created, summary.skipped), (1, 1));
        assert_eq!(uids(&store), ["A"]);
    }

    #[tokio::test]
    async fn test_missing_cached_body_is_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(DirectoryStore::new(dir.path()));
        let subscription = store
            .create_subscription(Subscription::new(
                0,
                "principals/local",
                "",
                "https://example.com/feed.ics",
            ))
            .expect("create");
        let feed = ics(&[("A", "SUMMARY:Alpha\r\n")], "");
        let poller = Poller::new(
            ScriptedTransport::new(&feed, "text/calendar"),
            "webcal-test",
            store.clone(),
            store.clone(),
        );
        let cancel = CancellationToken::new();
        synced(poller.poll(&subscription, &cancel).await.expect("first poll"));

        let cached = store
            .list_for_subscription(subscription.id)
            .await
            .expect("list");
        let body = dir.path().join(&subscription.uri).join(&cached[0].uri);
        std::fs::remove_file(&body).expect("remove body");

        let summary = synced(poller.poll(&subscription, &cancel).await.expect("second poll"));

        assert_eq!((summary.modified, summary.unchanged), (1, 0));
        assert_eq!(
            std::fs::read_to_string(&body).expect("restored"),
            cached[0].calendar_data
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_no_data() {
        let blocked = TransportError::PolicyBlocked("10.0.0.1".into());
        let (store, poller, subscription) = setup(ScriptedTransport::failing(blocked));

        let outcome = poller
            .poll(&subscription, &CancellationToken::new())
            .await
            .expect("poll");

        assert_eq!(outcome, PollOutcome::NoData);
        assert_eq!(store.subscription_mutations().expect("count"), 0);
    }

    #[tokio::test]
    async fn test_feed_hint_is_adopted_only_without_user_interval() {
        let feed = ics(&[("A", "")], "X-PUBLISHED-TTL:PT6H\r\n");
        let (store, poller, subscription) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let now = Utc::now();

        poller
            .poll_at(&subscription, now, &CancellationToken::new())
            .await
            .expect("poll");

        let updated = store.subscription(1).expect("found");
        assert_eq!(
            updated.refresh_interval.map(|i| i.to_string()),
            Some("PT6H".into())
        );
        assert_eq!(updated.last_modified, Some(now));
    }

    #[tokio::test]
    async fn test_user_interval_survives_any_hint() {
        for header in ["X-PUBLISHED-TTL:PT1M\r\n", "X-PUBLISHED-TTL:garbage\r\n", ""] {
            let feed = ics(&[("A", "")], header);
            let transport = ScriptedTransport::new(&feed, "text/calendar");
            let (store, poller, mut subscription) = setup(transport);
            subscription.refresh_interval = Some("P1D".parse().expect("P1D"));
            store.insert_subscription(subscription.clone()).expect("seed");

            poller
                .poll(&subscription, &CancellationToken::new())
                .await
                .expect("poll");

            let updated = store.subscription(1).expect("found");
            assert_eq!(
                updated.refresh_interval.map(|i| i.to_string()),
                Some("P1D".into())
            );
            assert!(updated.last_modified.is_some());
        }
    }

    #[tokio::test]
    async fn test_stripped_todo_ages_out_of_cache() {
        let feed = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\n\
BEGIN:VTODO\r\nUID:T\r\nEND:VTODO\r\n\
END:VCALENDAR\r\n";
        let (store, poller, subscription) = setup(ScriptedTransport::new(feed, "text/calendar"));

        // cached back when the subscription still kept to-dos
        let todo = Feed::parse(feed)
            .expect("Should parse")
            .into_objects()
            .next()
            .expect("todo");
        let cached =
            CachedCalendarObject::from_denormalized(9, "T.ics", &denormalize(&todo).expect("valid"));
        store.insert_object(1, cached).expect("seed");

        let cancel = CancellationToken::new();
        let summary = synced(poller.poll(&subscription, &cancel).await.expect("poll"));

        assert_eq!((summary.created, summary.purged), (0, 1));
        assert!(uids(&store).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_fetch() {
        let (store, poller, subscription) = setup(Arc::new(HangingTransport));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poller.poll(&subscription, &cancel).await.expect("poll");

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(store.subscription_mutations().expect("count"), 0);
    }

    #[tokio::test]
    async fn test_poll_due_reports_every_subscription() {
        let feed = ics(&[("A", "")], "");
        let (store, poller, _) = setup(ScriptedTransport::new(&feed, "text/calendar"));
        let poller = poller.with_max_concurrent(4);
        let mut second = Subscription::new(
            2,
            "principals/users/alice",
            "other",
            "https://example.org/b.ics",
        );
        second.refresh_interval = Some("P1D".parse().expect("P1D"));
        second.last_modified = Some(Utc::now());
        store.insert_subscription(second).expect("seed");

        let mut reports = poller.poll_due(&CancellationToken::new()).await.expect("poll");
        reports.sort_by_key(|r| r.subscription.id);

        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].result, Ok(PollOutcome::Synced(_))));
        assert!(matches!(reports[1].result, Ok(PollOutcome::Skipped { .. })));
    }
}
