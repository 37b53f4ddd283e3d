//! Filesystem-backed store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/<slug>/.webcal/subscription.toml   subscription record
//! <data_dir>/<slug>/.webcal/objects.toml        cached object manifest
//! <data_dir>/<slug>/<uuid>.ics                  one file per cached object
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::WebcalConfig;
use crate::error::{WebcalError, WebcalResult};
use crate::object::{
    CachedCalendarObject, Classification, ComponentType, DenormalizedObject, etag,
};
use crate::store::{CalendarObjectStore, ObjectWrite, StaleObject, SubscriptionStore};
use crate::subscription::{Subscription, SubscriptionMutation};

const META_DIR: &str = ".webcal";
const SUBSCRIPTION_FILE: &str = "subscription.toml";
const MANIFEST_FILE: &str = "objects.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    next_id: i64,
    #[serde(default, rename = "object")]
    objects: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    id: i64,
    uri: String,
    uid: String,
    etag: String,
    component_type: ComponentType,
    size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_occurrence: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_occurrence: Option<DateTime<Utc>>,
    #[serde(default)]
    classification: Classification,
}

impl ManifestEntry {
    fn new(id: i64, uri: &str, object: &DenormalizedObject) -> Self {
        ManifestEntry {
            id,
            uri: uri.to_string(),
            uid: object.uid.clone(),
            etag: object.etag.clone(),
            component_type: object.component_type,
            size: object.size,
            first_occurrence: object.first_occurrence,
            last_occurrence: object.last_occurrence,
            classification: object.classification,
        }
    }

    fn into_cached(self, calendar_data: String) -> CachedCalendarObject {
        CachedCalendarObject {
            id: self.id,
            uri: self.uri,
            uid: self.uid,
            etag: self.etag,
            calendar_data,
            component_type: self.component_type,
            size: self.size,
            first_occurrence: self.first_occurrence,
            last_occurrence: self.last_occurrence,
            classification: self.classification,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStore { root: root.into() }
    }

    pub fn from_config(config: &WebcalConfig) -> Self {
        Self::new(config.data_path())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All subscriptions, sorted by uri.
    pub fn subscriptions(&self) -> WebcalResult<Vec<Subscription>> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Ok(Vec::new());
        };

        let mut subscriptions = Vec::new();
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let file = path.join(META_DIR).join(SUBSCRIPTION_FILE);
            if !file.exists() {
                continue;
            }
            match read_toml::<Subscription>(&file) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => warn!(path = %file.display(), "Ignoring unreadable subscription: {e}"),
            }
        }

        subscriptions.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(subscriptions)
    }

    pub fn subscription(&self, uri: &str) -> WebcalResult<Subscription> {
        let file = self.root.join(uri).join(META_DIR).join(SUBSCRIPTION_FILE);
        if !file.exists() {
            return Err(WebcalError::SubscriptionNotFound(uri.to_string()));
        }
        read_toml(&file)
    }

    /// Persist a new subscription. Its id and uri are assigned here; the uri
    /// is a unique slug of the display name, or of the source host.
    pub fn create_subscription(&self, mut subscription: Subscription) -> WebcalResult<Subscription> {
        let existing = self.subscriptions()?;

        subscription.id = existing.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        subscription.uri = self.unique_slug(&base_slug(&subscription))?;

        let meta = self.root.join(&subscription.uri).join(META_DIR);
        std::fs::create_dir_all(&meta)?;
        self.save_subscription(&subscription)?;

        Ok(subscription)
    }

    pub fn save_subscription(&self, subscription: &Subscription) -> WebcalResult<()> {
        let path = self
            .root
            .join(&subscription.uri)
            .join(META_DIR)
            .join(SUBSCRIPTION_FILE);
        write_toml(&path, subscription)
    }

    /// Delete a subscription together with all of its cached objects.
    pub fn delete_subscription(&self, uri: &str) -> WebcalResult<Subscription> {
        let subscription = self.subscription(uri)?;
        std::fs::remove_dir_all(self.root.join(&subscription.uri))?;
        Ok(subscription)
    }

    fn unique_slug(&self, base: &str) -> WebcalResult<String> {
        if !self.root.join(base).exists() {
            return Ok(base.to_string());
        }

        for n in 2..=100 {
            let suffixed = format!("{base}-{n}");
            if !self.root.join(&suffixed).exists() {
                return Ok(suffixed);
            }
        }

        Err(WebcalError::Store(format!(
            "Too many subscription name collisions for '{base}'"
        )))
    }

    fn dir_for(&self, subscription_id: i64) -> WebcalResult<PathBuf> {
        self.subscriptions()?
            .into_iter()
            .find(|s| s.id == subscription_id)
            .map(|s| self.root.join(s.uri))
            .ok_or_else(|| WebcalError::SubscriptionNotFound(subscription_id.to_string()))
    }

    fn load_manifest(dir: &Path) -> WebcalResult<Manifest> {
        let path = dir.join(META_DIR).join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        read_toml(&path)
    }

    fn save_manifest(dir: &Path, manifest: &Manifest) -> WebcalResult<()> {
        write_toml(&dir.join(META_DIR).join(MANIFEST_FILE), manifest)
    }
}

impl Manifest {
    /// Write the body of a new object and record it.
    fn insert(
        &mut self,
        dir: &Path,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()> {
        if self.objects.iter().any(|o| o.uid == object.uid || o.uri == uri) {
            return Err(WebcalError::Store(format!(
                "object '{}' already exists in subscription {subscription_id}",
                object.uid
            )));
        }

        write_atomic(&dir.join(uri), &object.calendar_data)?;

        self.next_id += 1;
        self.objects.push(ManifestEntry::new(self.next_id, uri, object));
        Ok(())
    }

    /// Rewrite the body at `uri` and its entry, keeping the id.
    fn replace(&mut self, dir: &Path, uri: &str, object: &DenormalizedObject) -> WebcalResult<()> {
        let entry = self
            .objects
            .iter_mut()
            .find(|o| o.uri == uri)
            .ok_or_else(|| WebcalError::Store(format!("no object at '{uri}'")))?;

        write_atomic(&dir.join(uri), &object.calendar_data)?;
        *entry = ManifestEntry::new(entry.id, uri, object);
        Ok(())
    }
}

fn base_slug(subscription: &Subscription) -> String {
    let name = subscription.display_name.clone().or_else(|| {
        crate::fetch::normalize_source(&subscription.source)
            .ok()
            .and_then(|s| s.url.host_str().map(str::to_string))
    });

    let slug = name.map(slug::slugify).unwrap_or_default();
    if slug.is_empty() {
        "subscription".to_string()
    } else {
        slug
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> WebcalResult<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| WebcalError::Serialization(format!("{}: {e}", path.display())))
}

/// Write via a temp file and rename so readers never see a partial file.
fn write_toml<T: Serialize>(path: &Path, value: &T) -> WebcalResult<()> {
    let content =
        toml::to_string_pretty(value).map_err(|e| WebcalError::Serialization(e.to_string()))?;
    write_atomic(path, &content)
}

fn write_atomic(path: &Path, content: &str) -> WebcalResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, content)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

#[async_trait]
impl SubscriptionStore for DirectoryStore {
    async fn list_due(&self) -> WebcalResult<Vec<Subscription>> {
        self.subscriptions()
    }

    async fn apply_mutation(
        &self,
        subscription_id: i64,
        mutation: &SubscriptionMutation,
    ) -> WebcalResult<()> {
        let mut subscription = self
            .subscriptions()?
            .into_iter()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| WebcalError::SubscriptionNotFound(subscription_id.to_string()))?;

        mutation.apply_to(&mut subscription);
        self.save_subscription(&subscription)
    }
}

#[async_trait]
impl CalendarObjectStore for DirectoryStore {
    async fn list_for_subscription(
        &self,
        subscription_id: i64,
    ) -> WebcalResult<Vec<CachedCalendarObject>> {
        let dir = self.dir_for(subscription_id)?;
        let manifest = Self::load_manifest(&dir)?;

        Ok(manifest
            .objects
            .into_iter()
            .map(|entry| match std::fs::read_to_string(dir.join(&entry.uri)) {
                Ok(data) => entry.into_cached(data),
                Err(e) => {
                    warn!(uri = %entry.uri, "Cached object body unreadable: {e}");
                    // etag of the empty body, so the next poll rewrites it
                    let mut cached = entry.into_cached(String::new());
                    cached.etag = etag(&cached.calendar_data);
                    cached
                }
            })
            .collect())
    }

    async fn create(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()> {
        let dir = self.dir_for(subscription_id)?;
        let mut manifest = Self::load_manifest(&dir)?;
        manifest.insert(&dir, subscription_id, uri, object)?;
        Self::save_manifest(&dir, &manifest)
    }

    async fn update(
        &self,
        subscription_id: i64,
        uri: &str,
        object: &DenormalizedObject,
    ) -> WebcalResult<()> {
        let dir = self.dir_for(subscription_id)?;
        let mut manifest = Self::load_manifest(&dir)?;
        manifest.replace(&dir, uri, object)?;
        Self::save_manifest(&dir, &manifest)
    }

    /// Resolves the directory and manifest once and saves the manifest once,
    /// so either every write of the batch is recorded or none is.
    async fn write_batch(
        &self,
        subscription_id: i64,
        writes: &[ObjectWrite<'_>],
    ) -> WebcalResult<()> {
        let dir = self.dir_for(subscription_id)?;
        let mut manifest = Self::load_manifest(&dir)?;

        for write in writes {
            match *write {
                ObjectWrite::Create { uri, object } => {
                    manifest.insert(&dir, subscription_id, uri, object)?
                }
                ObjectWrite::Update { uri, object } => manifest.replace(&dir, uri, object)?,
            }
        }

        Self::save_manifest(&dir, &manifest)
    }

    async fn purge_batch(&self, subscription_id: i64, stale: &[StaleObject]) -> WebcalResult<()> {
        let dir = self.dir_for(subscription_id)?;
        let mut manifest = Self::load_manifest(&dir)?;

        manifest
            .objects
            .retain(|o| !stale.iter().any(|s| s.id == o.id && s.uri == o.uri));
        Self::save_manifest(&dir, &manifest)?;

        for object in stale {
            match std::fs::remove_file(dir.join(&object.uri)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denormalized(uid: &str, data: &str) -> DenormalizedObject {
        DenormalizedObject {
            uid: uid.to_string(),
            component_type: ComponentType::Event,
            calendar_data: data.to_string(),
            etag: etag(data),
            size: data.len(),
            first_occurrence: None,
            last_occurrence: None,
            classification: Classification::Public,
        }
    }

    fn store() -> (tempfile::TempDir, DirectoryStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirectoryStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_create_subscription_assigns_unique_slugs_and_ids() {
        let (_dir, store) = store();

        let mut draft = Subscription::new(0, "principals/local", "", "webcal://example.com/h.ics");
        draft.display_name = Some("Public Holidays".into());

        let first = store.create_subscription(draft.clone()).expect("create");
        let second = store.create_subscription(draft).expect("create");

        assert_eq!(first.uri, "public-holidays");
        assert_eq!(second.uri, "public-holidays-2");
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(store.subscription("public-holidays").expect("found"), first);
    }

    #[test]
    fn test_slug_falls_back_to_source_host() {
        let (_dir, store) = store();
        let draft = Subscription::new(
            0,
            "p",
            "",
            "webcal://user:pw@Calendar.Example.com/feed.ics",
        );

        let created = store.create_subscription(draft).expect("create");
        assert_eq!(created.uri, "calendar-example-com");
    }

    #[tokio::test]
    async fn test_object_lifecycle() {
        let (_dir, store) = store();
        let subscription = store
            .create_subscription(Subscription::new(0, "p", "", "https://example.com/a.ics"))
            .expect("create");
        let id = subscription.id;

        store
            .create(id, "one.ics", &denormalized("a", "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"))
            .await
            .expect("create");
        store
            .create(id, "two.ics", &denormalized("b", "B"))
            .await
            .expect("create");
        assert!(
            store.create(id, "three.ics", &denormalized("a", "A")).await.is_err(),
            "duplicate uid must be rejected"
        );

        store
            .update(id, "two.ics", &denormalized("b", "B2"))
            .await
            .expect("update");

        let objects = store.list_for_subscription(id).await.expect("list");
        assert_eq!(objects.len(), 2);
        let b = objects.iter().find(|o| o.uid == "b").expect("b");
        assert_eq!(b.calendar_data, "B2");
        assert_eq!(b.etag, etag("B2"));

        let stale = StaleObject {
            id: b.id,
            uri: b.uri.clone(),
        };
        store.purge_batch(id, &[stale]).await.expect("purge");

        let objects = store.list_for_subscription(id).await.expect("list");
        let uids: Vec<_> = objects.iter().map(|o| o.uid.as_str()).collect();
        assert_eq!(uids, ["a"]);
        assert!(!store.root().join(&subscription.uri).join("two.ics").exists());
    }

    #[tokio::test]
    async fn test_unreadable_body_gets_a_fresh_etag() {
        let (_dir, store) = store();
        let subscription = store
            .create_subscription(Subscription::new(0, "p", "", "https://example.com/a.ics"))
            .expect("create");
        let object = denormalized("a", "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n");
        store
            .create(subscription.id, "one.ics", &object)
            .await
            .expect("create");

        std::fs::remove_file(store.root().join(&subscription.uri).join("one.ics"))
            .expect("remove body");

        let objects = store
            .list_for_subscription(subscription.id)
            .await
            .expect("list");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].calendar_data, "");
        assert_ne!(objects[0].etag, object.etag);
    }

    #[tokio::test]
    async fn test_write_batch_records_all_writes_or_none() {
        let (_dir, store) = store();
        let subscription = store
            .create_subscription(Subscription::new(0, "p", "", "https://example.com/a.ics"))
            .expect("create");
        let id = subscription.id;
        let a = denormalized("a", "A");
        store.create(id, "a.ics", &a).await.expect("create");

        let a2 = denormalized("a", "A2");
        let b = denormalized("b", "B");
        store
            .write_batch(
                id,
                &[
                    ObjectWrite::Update {
                        uri: "a.ics",
                        object: &a2,
                    },
                    ObjectWrite::Create {
                        uri: "b.ics",
                        object: &b,
                    },
                ],
            )
            .await
            .expect("batch");

        let objects = store.list_for_subscription(id).await.expect("list");
        let mut bodies: Vec<_> = objects
            .iter()
            .map(|o| (o.uid.as_str(), o.calendar_data.as_str(), o.id))
            .collect();
        bodies.sort();
        assert_eq!(bodies, [("a", "A2", 1), ("b", "B", 2)]);

        let c = denormalized("c", "C");
        let duplicate = denormalized("b", "B again");
        let failed = store
            .write_batch(
                id,
                &[
                    ObjectWrite::Create {
                        uri: "c.ics",
                        object: &c,
                    },
                    ObjectWrite::Create {
                        uri: "d.ics",
                        object: &duplicate,
                    },
                ],
            )
            .await;
        assert!(failed.is_err());

        let uids: Vec<_> = store
            .list_for_subscription(id)
            .await
            .expect("list")
            .into_iter()
            .map(|o| o.uid)
            .collect();
        assert_eq!(uids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_apply_mutation_persists() {
        let (_dir, store) = store();
        let subscription = store
            .create_subscription(Subscription::new(0, "p", "", "https://example.com/a.ics"))
            .expect("create");
        let now = Utc::now();

        store
            .apply_mutation(
                subscription.id,
                &SubscriptionMutation {
                    refresh_interval: Some("PT6H".parse().expect("PT6H")),
                    last_modified: now,
                },
            )
            .await
            .expect("mutate");

        let reloaded = store.subscription(&subscription.uri).expect("found");
        assert_eq!(
            reloaded.refresh_interval.map(|i| i.to_string()),
            Some("PT6H".into())
        );
        assert_eq!(reloaded.last_modified, Some(now));
    }

    #[test]
    fn test_delete_subscription_removes_directory() {
        let (_dir, store) = store();
        let subscription = store
            .create_subscription(Subscription::new(0, "p", "", "https://example.com/a.ics"))
            .expect("create");

        store.delete_subscription(&subscription.uri).expect("delete");

        assert!(store.subscriptions().expect("list").is_empty());
        assert!(matches!(
            store.subscription(&subscription.uri),
            Err(WebcalError::SubscriptionNotFound(_))
        ));
    }
}
