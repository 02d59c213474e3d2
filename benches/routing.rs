//! Routing benchmarks.
//!
//! Run with: cargo bench
//!
//! Covers the two hot paths of a busy session: answering `tabs.query`
//! against many tabs, and fanning an event out to every handle.

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use crxbridge::config::BridgeConfig;
use crxbridge::contents::{
    Bounds, BrowserWindow, ContentsId, ContentsKind, CssOrigin, WebContents, WindowId,
};
use crxbridge::host::ExtensionsHost;
use crxbridge::identity::QueryInfo;
use crxbridge::session::{Session, SessionOptions};
use crxbridge::BridgeResult;

struct BenchContents {
    id: ContentsId,
    url: String,
}

#[async_trait]
impl WebContents for BenchContents {
    fn id(&self) -> ContentsId {
        self.id
    }

    fn kind(&self) -> ContentsKind {
        ContentsKind::BrowserView
    }

    fn partition(&self) -> String {
        "bench".to_string()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn title(&self) -> String {
        format!("Tab {}", self.id)
    }

    fn is_focused(&self) -> bool {
        false
    }

    fn is_audible(&self) -> bool {
        self.id % 7 == 0
    }

    fn is_audio_muted(&self) -> bool {
        false
    }

    fn set_audio_muted(&self, _muted: bool) {}

    fn is_loading(&self) -> bool {
        false
    }

    fn is_destroyed(&self) -> bool {
        false
    }

    async fn load_url(&self, _url: &str) -> BridgeResult<()> {
        Ok(())
    }

    fn reload(&self, _bypass_cache: bool) {}

    fn insert_css(&self, _code: &str, _origin: CssOrigin) {}

    async fn execute_javascript(&self, _code: &str) -> BridgeResult<Value> {
        Ok(Value::Null)
    }

    fn send(&self, _channel: &str, payload: Value) -> BridgeResult<()> {
        black_box(payload);
        Ok(())
    }
}

struct BenchWindow {
    id: WindowId,
}

impl BrowserWindow for BenchWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn contents_id(&self) -> ContentsId {
        -self.id
    }

    fn bounds(&self) -> Bounds {
        Bounds::default()
    }

    fn is_focused(&self) -> bool {
        self.id == 1
    }

    fn is_fullscreen(&self) -> bool {
        false
    }

    fn is_maximized(&self) -> bool {
        false
    }

    fn is_minimized(&self) -> bool {
        false
    }
}

/// A host with `tabs` tabs spread over four windows.
fn populated_host(tabs: i64) -> (tempfile::TempDir, ExtensionsHost, Arc<Session>) {
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let mut config = BridgeConfig::default();
    config.storage.directory = temp_dir.path().to_string_lossy().into_owned();

    let host = ExtensionsHost::new(config);
    let session = host.create_session(SessionOptions::new("bench"));
    for window_id in 1..=4 {
        host.add_window(&session, Arc::new(BenchWindow { id: window_id }));
    }
    for id in 1..=tabs {
        let contents = Arc::new(BenchContents {
            id,
            url: format!("https://site{}.example/page", id % 50),
        });
        host.observe_tab(&session, contents, id % 4 + 1);
    }

    (temp_dir, host, session)
}

fn bench_tab_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("tabs_query");

    for tabs in [10, 100, 500] {
        let (_temp_dir, _host, session) = populated_host(tabs);
        let audible_in_window = QueryInfo {
            audible: Some(true),
            window_id: Some(2),
            ..Default::default()
        };

        group.bench_with_input(BenchmarkId::new("all", tabs), &session, |b, session| {
            b.iter(|| black_box(session.registry.query_tabs(&QueryInfo::default())))
        });
        group.bench_with_input(BenchmarkId::new("filtered", tabs), &session, |b, session| {
            b.iter(|| black_box(session.registry.query_tabs(black_box(&audible_in_window))))
        });
    }

    group.finish();
}

fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_fanout");

    for tabs in [10, 100, 500] {
        let (_temp_dir, host, session) = populated_host(tabs);
        let payload = json!([1, {"status": "complete"}, {"id": 1}]);

        group.bench_with_input(BenchmarkId::from_parameter(tabs), &payload, |b, payload| {
            b.iter(|| {
                black_box(host.bus().send_to_session(
                    session.id(),
                    "api-emit-event-tabs-onUpdated",
                    payload.clone(),
                    None,
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tab_query, bench_event_fanout);
criterion_main!(benches);
