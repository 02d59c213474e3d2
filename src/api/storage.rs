//! `chrome.storage` requests and `storage.onChanged` delivery.

use std::sync::Arc;

use serde_json::Value;

use crate::contents::ContentsId;
use crate::error::BridgeResult;
use crate::events::EventBus;
use crate::extension::Extension;
use crate::ipc::types::StorageOperation;
use crate::storage::{changed_event_args, StorageAreaName, StorageChanges, StorageQuery};

pub struct StorageApi {
    bus: Arc<EventBus>,
}

impl StorageApi {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Run one operation against an extension's area. `get` resolves to the
    /// selected items; mutations resolve to `null` and notify listeners.
    pub async fn operate(
        &self,
        extension: &Extension,
        caller: ContentsId,
        area: StorageAreaName,
        operation: StorageOperation,
    ) -> BridgeResult<Value> {
        let storage = extension.storage.area(area);

        let changes = match operation {
            StorageOperation::Get { keys } => {
                return Ok(Value::Object(storage.get(StorageQuery::from(keys)).await));
            }
            StorageOperation::Set { items } => storage.set(items).await?,
            StorageOperation::Remove { keys } => storage.remove(&keys.into_vec()).await?,
            StorageOperation::Clear => storage.clear().await?,
        };

        self.notify(extension, caller, area, changes);
        Ok(Value::Null)
    }

    /// Deliver `storage.onChanged` to the extension's background page and
    /// to the calling context.
    fn notify(&self, extension: &Extension, caller: ContentsId, area: StorageAreaName, changes: StorageChanges) {
        if changes.is_empty() {
            return;
        }

        let args = changed_event_args(changes, area);
        let background = extension.background_contents().map(|contents| contents.id());

        if let Some(background) = background {
            self.bus.emit_to(background, "storage.onChanged", args.clone());
        }
        if background != Some(caller) {
            self.bus.emit_to(caller, "storage.onChanged", args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::ContentsKind;
    use crate::extension::fixtures::write_extension;
    use crate::ipc::types::StorageKeys;
    use crate::testing::FakeContents;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_operations_and_change_events() {
        let temp_dir = TempDir::new().unwrap();
        let dir = write_extension(temp_dir.path(), "ext", &json!({"name": "E"}));
        let extension = Extension::load(&dir, &temp_dir.path().join("storage"))
            .await
            .unwrap();

        let bus = Arc::new(EventBus::new());
        let background = FakeContents::new(1, ContentsKind::BackgroundPage, "bg");
        let popup = FakeContents::new(2, ContentsKind::Popup, "bg");
        bus.add_listener_context(1, background.clone());
        bus.attach(1, popup.clone());
        extension.set_background_contents(Some(background.clone()));

        let api = StorageApi::new(bus);
        let items = json!({"a": 1}).as_object().unwrap().clone();
        let result = api
            .operate(&extension, 2, StorageAreaName::Local, StorageOperation::Set { items })
            .await
            .unwrap();
        assert_eq!(result, Value::Null);

        let got = api
            .operate(
                &extension,
                2,
                StorageAreaName::Local,
                StorageOperation::Get { keys: json!("a") },
            )
            .await
            .unwrap();
        assert_eq!(got, json!({"a": 1}));

        let changed = background.sent_on("api-emit-event-storage-onChanged");
        assert_eq!(changed, vec![json!([{"a": {"newValue": 1}}, "local"])]);
        assert_eq!(popup.sent_on("api-emit-event-storage-onChanged").len(), 1);

        api.operate(
            &extension,
            1,
            StorageAreaName::Local,
            StorageOperation::Remove {
                keys: StorageKeys::One("missing".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(background.sent_on("api-emit-event-storage-onChanged").len(), 1);

        api.operate(&extension, 1, StorageAreaName::Local, StorageOperation::Clear)
            .await
            .unwrap();
        let changed = background.sent_on("api-emit-event-storage-onChanged");
        assert_eq!(changed[1], json!([{"a": {"oldValue": 1}}, "local"]));
        assert_eq!(popup.sent_on("api-emit-event-storage-onChanged").len(), 1);
    }
}
