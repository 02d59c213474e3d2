//! Identity registry: logical tabs and windows over host handles.
//!
//! Every observed handle gets an explicit [`Subscription`]. When the host
//! reports the handle destroyed (or the window closed) the registry releases
//! that subscription, dropping the entry and its cached descriptor, so later
//! queries never touch dead handles.
//!
//! Descriptors are computed lazily and cached per handle. The cache is only
//! invalidated by update triggers (title, load state, audio, navigation),
//! never by a query. Handles and the embedder's decorator are consulted
//! with the state lock released, so either may call back into the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};

use crate::contents::{
    BrowserWindow, ContentsId, ContentsRef, TabId, WebContents, WindowId, WindowRef, WindowType,
};
use crate::sync::{read, write};
use crate::url_pattern::ALL_URLS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    #[default]
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutedInfo {
    pub muted: bool,
}

/// Extension-facing descriptor of a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabDetails {
    pub id: TabId,
    pub index: usize,
    pub window_id: WindowId,
    pub active: bool,
    pub highlighted: bool,
    pub pinned: bool,
    pub audible: bool,
    pub discarded: bool,
    pub auto_discardable: bool,
    pub muted_info: MutedInfo,
    pub incognito: bool,
    pub selected: bool,
    pub status: TabStatus,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    pub width: i32,
    pub height: i32,
}

/// Equality filters for `tabs.query`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryInfo {
    pub active: Option<bool>,
    pub pinned: Option<bool>,
    pub audible: Option<bool>,
    pub muted: Option<bool>,
    pub highlighted: Option<bool>,
    pub discarded: Option<bool>,
    pub auto_discardable: Option<bool>,
    pub status: Option<TabStatus>,
    pub window_id: Option<WindowId>,
    /// Exact title match.
    pub title: Option<String>,
    /// Exact URL match, or `<all_urls>`.
    pub url: Option<String>,
}

fn field_matches<T: PartialEq>(filter: &Option<T>, value: &T) -> bool {
    filter.as_ref().map_or(true, |expected| expected == value)
}

impl QueryInfo {
    pub fn matches(&self, tab: &TabDetails) -> bool {
        field_matches(&self.active, &tab.active)
            && field_matches(&self.pinned, &tab.pinned)
            && field_matches(&self.audible, &tab.audible)
            && field_matches(&self.muted, &tab.muted_info.muted)
            && field_matches(&self.highlighted, &tab.highlighted)
            && field_matches(&self.discarded, &tab.discarded)
            && field_matches(&self.auto_discardable, &tab.auto_discardable)
            && field_matches(&self.status, &tab.status)
            && field_matches(&self.window_id, &tab.window_id)
            && field_matches(&self.title, &tab.title)
            && self
                .url
                .as_ref()
                .map_or(true, |url| url == ALL_URLS || *url == tab.url)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
    Fullscreen,
}

/// Extension-facing descriptor of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDetails {
    pub id: WindowId,
    pub focused: bool,
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
    pub incognito: bool,
    #[serde(rename = "type")]
    pub window_type: WindowType,
    pub state: WindowState,
    pub always_on_top: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabs: Option<Vec<TabDetails>>,
}

/// Hook letting the embedder amend freshly computed tab details.
pub type TabDecorator = Arc<dyn Fn(&dyn WebContents, &mut TabDetails) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Tab(ContentsId),
    Window(WindowId),
}

/// Registration of one handle with the registry.
///
/// Released exactly once, by the registry when the handle goes away, or
/// by the embedder to stop tracking a handle early.
pub struct Subscription {
    target: Target,
    released: AtomicBool,
    state: Weak<RwLock<RegistryState>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Subscription {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Drop the entry this subscription tracks. Returns `false` if it was
    /// already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(state) = self.state.upgrade() {
            let mut state = write(&state);
            match self.target {
                Target::Tab(id) => state.tabs.retain(|entry| entry.contents.id() != id),
                Target::Window(id) => {
                    state.windows.retain(|entry| entry.window.id() != id);
                    if state.focused_window == Some(id) {
                        state.focused_window = None;
                    }
                }
            }
        }
        true
    }
}

struct TabEntry {
    contents: ContentsRef,
    /// Owning window, fixed when the tab is observed.
    window_id: WindowId,
    active: bool,
    pinned: bool,
    favicon: Option<String>,
    cache: Option<TabDetails>,
    subscription: Arc<Subscription>,
}

struct WindowEntry {
    window: WindowRef,
    cache: Option<WindowDetails>,
    subscription: Arc<Subscription>,
}

#[derive(Default)]
struct RegistryState {
    tabs: Vec<TabEntry>,
    windows: Vec<WindowEntry>,
    focused_window: Option<WindowId>,
}

impl RegistryState {
    fn tab_mut(&mut self, id: TabId) -> Option<&mut TabEntry> {
        self.tabs.iter_mut().find(|entry| entry.contents.id() == id)
    }

    fn lookup_tab(&self, entry: &TabEntry) -> TabLookup {
        if let Some(cache) = &entry.cache {
            return TabLookup::Cached(cache.clone());
        }

        TabLookup::Stale(TabSnapshot {
            contents: Arc::clone(&entry.contents),
            window: self
                .windows
                .iter()
                .find(|window| window.window.id() == entry.window_id)
                .map(|window| Arc::clone(&window.window)),
            window_id: entry.window_id,
            active: entry.active,
            pinned: entry.pinned,
            favicon: entry.favicon.clone(),
        })
    }
}

/// Registry-owned fields of a tab, copied out of the state lock.
struct TabSnapshot {
    contents: ContentsRef,
    window: Option<WindowRef>,
    window_id: WindowId,
    active: bool,
    pinned: bool,
    favicon: Option<String>,
}

enum TabLookup {
    Cached(TabDetails),
    Stale(TabSnapshot),
}

/// Per-session map from host handles to logical tabs and windows.
#[derive(Default)]
pub struct IdentityRegistry {
    state: Arc<RwLock<RegistryState>>,
    decorator: RwLock<Option<TabDecorator>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_decorator(&self, decorator: TabDecorator) {
        *write(&self.decorator) = Some(decorator);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tabs
    // ─────────────────────────────────────────────────────────────────────

    /// Start tracking a tab. Observing an already tracked handle returns the
    /// existing subscription.
    pub fn observe_tab(&self, contents: ContentsRef, window_id: WindowId) -> Arc<Subscription> {
        let mut state = write(&self.state);
        let id = contents.id();

        if let Some(entry) = state.tabs.iter().find(|entry| entry.contents.id() == id) {
            return Arc::clone(&entry.subscription);
        }

        let subscription = Arc::new(Subscription {
            target: Target::Tab(id),
            released: AtomicBool::new(false),
            state: Arc::downgrade(&self.state),
        });

        state.tabs.push(TabEntry {
            contents,
            window_id,
            active: false,
            pinned: false,
            favicon: None,
            cache: None,
            subscription: Arc::clone(&subscription),
        });

        subscription
    }

    /// Release a tab's subscription. Returns `false` if it was not tracked.
    pub fn release_tab(&self, id: TabId) -> bool {
        let subscription = read(&self.state)
            .tabs
            .iter()
            .find(|entry| entry.contents.id() == id)
            .map(|entry| Arc::clone(&entry.subscription));

        subscription.is_some_and(|subscription| subscription.release())
    }

    pub fn has_tab(&self, id: TabId) -> bool {
        read(&self.state).tabs.iter().any(|entry| entry.contents.id() == id)
    }

    pub fn tab(&self, id: TabId) -> Option<ContentsRef> {
        read(&self.state)
            .tabs
            .iter()
            .find(|entry| entry.contents.id() == id)
            .map(|entry| Arc::clone(&entry.contents))
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        read(&self.state)
            .tabs
            .iter()
            .map(|entry| entry.contents.id())
            .collect()
    }

    pub fn window_of_tab(&self, id: TabId) -> Option<WindowId> {
        read(&self.state)
            .tabs
            .iter()
            .find(|entry| entry.contents.id() == id)
            .map(|entry| entry.window_id)
    }

    /// Cached details for a tab, computing them on first use.
    pub fn tab_details(&self, id: TabId) -> Option<TabDetails> {
        let lookup = {
            let state = read(&self.state);
            let entry = state.tabs.iter().find(|entry| entry.contents.id() == id)?;
            state.lookup_tab(entry)
        };
        Some(self.resolve_tab(lookup))
    }

    /// Recompute a tab's details. Returns the previous cached value (if any)
    /// and the fresh one.
    pub fn refresh_tab(&self, id: TabId) -> Option<(Option<TabDetails>, TabDetails)> {
        let (previous, lookup) = {
            let mut state = write(&self.state);
            let previous = state.tab_mut(id)?.cache.take();
            let entry = state.tabs.iter().find(|entry| entry.contents.id() == id)?;
            (previous, state.lookup_tab(entry))
        };
        Some((previous, self.resolve_tab(lookup)))
    }

    fn resolve_tab(&self, lookup: TabLookup) -> TabDetails {
        let snapshot = match lookup {
            TabLookup::Cached(details) => return details,
            TabLookup::Stale(snapshot) => snapshot,
        };

        let decorator = read(&self.decorator).clone();
        let mut details = compute_tab_details(&snapshot, decorator.as_ref());

        // Activation and pinning may have moved while the lock was released.
        if let Some(entry) = write(&self.state).tab_mut(details.id) {
            details.active = entry.active;
            details.pinned = entry.pinned;
            entry.cache = Some(details.clone());
        }
        details
    }

    pub fn set_favicon(&self, id: TabId, url: Option<String>) {
        if let Some(entry) = write(&self.state).tab_mut(id) {
            entry.favicon = url;
        }
    }

    pub fn set_pinned(&self, id: TabId, pinned: bool) {
        if let Some(entry) = write(&self.state).tab_mut(id) {
            entry.pinned = pinned;
            if let Some(cache) = entry.cache.as_mut() {
                cache.pinned = pinned;
            }
        }
    }

    /// Make `id` the active tab of its window.
    ///
    /// Returns the window id when the active tab actually changed, `None`
    /// when the tab is unknown or already active.
    pub fn activate_tab(&self, id: TabId) -> Option<WindowId> {
        let mut state = write(&self.state);
        let target = state.tabs.iter().find(|entry| entry.contents.id() == id)?;
        if target.active {
            return None;
        }
        let window_id = target.window_id;

        for entry in state.tabs.iter_mut().filter(|entry| entry.window_id == window_id) {
            let active = entry.contents.id() == id;
            entry.active = active;
            if let Some(cache) = entry.cache.as_mut() {
                cache.active = active;
            }
        }

        Some(window_id)
    }

    /// Tabs matching `info`, in registration order, re-indexed from zero.
    pub fn query_tabs(&self, info: &QueryInfo) -> Vec<TabDetails> {
        let lookups: Vec<TabLookup> = {
            let state = read(&self.state);
            state.tabs.iter().map(|entry| state.lookup_tab(entry)).collect()
        };

        lookups
            .into_iter()
            .map(|lookup| self.resolve_tab(lookup))
            .filter(|tab| info.matches(tab))
            .enumerate()
            .map(|(index, mut tab)| {
                tab.index = index;
                tab
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Windows
    // ─────────────────────────────────────────────────────────────────────

    pub fn observe_window(&self, window: WindowRef) -> Arc<Subscription> {
        let mut state = write(&self.state);
        let id = window.id();

        if let Some(entry) = state.windows.iter().find(|entry| entry.window.id() == id) {
            return Arc::clone(&entry.subscription);
        }

        let subscription = Arc::new(Subscription {
            target: Target::Window(id),
            released: AtomicBool::new(false),
            state: Arc::downgrade(&self.state),
        });

        if window.is_focused() {
            state.focused_window = Some(id);
        }

        state.windows.push(WindowEntry {
            window,
            cache: None,
            subscription: Arc::clone(&subscription),
        });

        subscription
    }

    pub fn release_window(&self, id: WindowId) -> bool {
        let subscription = read(&self.state)
            .windows
            .iter()
            .find(|entry| entry.window.id() == id)
            .map(|entry| Arc::clone(&entry.subscription));

        subscription.is_some_and(|subscription| subscription.release())
    }

    pub fn window(&self, id: WindowId) -> Option<WindowRef> {
        read(&self.state)
            .windows
            .iter()
            .find(|entry| entry.window.id() == id)
            .map(|entry| Arc::clone(&entry.window))
    }

    pub fn windows(&self) -> Vec<WindowRef> {
        read(&self.state)
            .windows
            .iter()
            .map(|entry| Arc::clone(&entry.window))
            .collect()
    }

    /// Window whose top-level content handle is `contents_id`.
    pub fn window_for_contents(&self, contents_id: ContentsId) -> Option<WindowRef> {
        read(&self.state)
            .windows
            .iter()
            .find(|entry| entry.window.contents_id() == contents_id)
            .map(|entry| Arc::clone(&entry.window))
    }

    pub fn window_details(&self, id: WindowId) -> Option<WindowDetails> {
        let mut state = write(&self.state);
        let entry = state.windows.iter_mut().find(|entry| entry.window.id() == id)?;
        if entry.cache.is_none() {
            entry.cache = Some(compute_window_details(entry.window.as_ref()));
        }
        entry.cache.clone()
    }

    pub fn invalidate_window(&self, id: WindowId) {
        let mut state = write(&self.state);
        if let Some(entry) = state.windows.iter_mut().find(|entry| entry.window.id() == id) {
            entry.cache = None;
        }
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        read(&self.state).focused_window
    }

    pub fn set_focused_window(&self, id: WindowId) {
        let mut state = write(&self.state);
        if state.windows.iter().any(|entry| entry.window.id() == id) {
            state.focused_window = Some(id);
        }
    }
}

fn compute_tab_details(snapshot: &TabSnapshot, decorator: Option<&TabDecorator>) -> TabDetails {
    let (width, height) = snapshot
        .window
        .as_ref()
        .map(|window| {
            let bounds = window.bounds();
            (bounds.width, bounds.height)
        })
        .unwrap_or((0, 0));
    let contents = snapshot.contents.as_ref();

    let mut details = TabDetails {
        id: contents.id(),
        index: 0,
        window_id: snapshot.window_id,
        active: snapshot.active,
        highlighted: false,
        pinned: snapshot.pinned,
        audible: contents.is_audible(),
        discarded: false,
        auto_discardable: true,
        muted_info: MutedInfo {
            muted: contents.is_audio_muted(),
        },
        incognito: false,
        selected: false,
        status: if contents.is_loading() {
            TabStatus::Loading
        } else {
            TabStatus::Complete
        },
        url: contents.url(),
        title: contents.title(),
        fav_icon_url: snapshot.favicon.clone(),
        width,
        height,
    };

    if let Some(decorate) = decorator {
        decorate(contents, &mut details);
    }
    details
}

fn compute_window_details(window: &dyn BrowserWindow) -> WindowDetails {
    let bounds = window.bounds();

    let state = if window.is_fullscreen() {
        WindowState::Fullscreen
    } else if window.is_maximized() {
        WindowState::Maximized
    } else if window.is_minimized() {
        WindowState::Minimized
    } else {
        WindowState::Normal
    };

    WindowDetails {
        id: window.id(),
        focused: window.is_focused(),
        top: bounds.y,
        left: bounds.x,
        width: bounds.width,
        height: bounds.height,
        incognito: false,
        window_type: window.window_type(),
        state,
        always_on_top: window.is_always_on_top(),
        tabs: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::ContentsKind;
    use crate::testing::{FakeContents, FakeWindow};

    fn registry_with_tabs() -> (IdentityRegistry, Vec<Arc<FakeContents>>) {
        let registry = IdentityRegistry::new();
        let window = FakeWindow::new(1, 100);
        registry.observe_window(window);

        let tabs: Vec<_> = (10..14)
            .map(|id| {
                let tab = FakeContents::new(id, ContentsKind::BrowserView, "persist:a");
                tab.set_url(&format!("https://example.com/{id}"));
                registry.observe_tab(tab.clone(), 1);
                tab
            })
            .collect();

        (registry, tabs)
    }

    #[test]
    fn test_observe_is_idempotent() {
        let registry = IdentityRegistry::new();
        let tab = FakeContents::new(5, ContentsKind::BrowserView, "p");
        let first = registry.observe_tab(tab.clone(), 1);
        let second = registry.observe_tab(tab, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.tab_ids(), vec![5]);
    }

    #[test]
    fn test_release_removes_entry_once() {
        let (registry, _tabs) = registry_with_tabs();
        assert!(registry.release_tab(11));
        assert!(!registry.release_tab(11));
        assert!(registry.tab(11).is_none());
        assert_eq!(registry.tab_ids(), vec![10, 12, 13]);
    }

    #[test]
    fn test_subscription_release_from_embedder() {
        let registry = IdentityRegistry::new();
        let tab = FakeContents::new(5, ContentsKind::BrowserView, "p");
        let subscription = registry.observe_tab(tab, 1);
        assert!(subscription.release());
        assert!(subscription.is_released());
        assert!(!registry.has_tab(5));
    }

    #[test]
    fn test_query_filters_and_reindexes() {
        let (registry, _tabs) = registry_with_tabs();
        registry.activate_tab(12);
        registry.set_pinned(10, true);

        let active_unpinned = registry.query_tabs(&QueryInfo {
            active: Some(true),
            pinned: Some(false),
            ..Default::default()
        });
        assert_eq!(active_unpinned.len(), 1);
        assert_eq!(active_unpinned[0].id, 12);
        assert_eq!(active_unpinned[0].index, 0);

        let inactive = registry.query_tabs(&QueryInfo {
            active: Some(false),
            ..Default::default()
        });
        let ids: Vec<_> = inactive.iter().map(|t| t.id).collect();
        let indexes: Vec<_> = inactive.iter().map(|t| t.index).collect();
        assert_eq!(ids, vec![10, 11, 13]);
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_query_url_and_title() {
        let (registry, tabs) = registry_with_tabs();
        tabs[1].set_title("Docs");
        registry.refresh_tab(11);

        let by_url = registry.query_tabs(&QueryInfo {
            url: Some("https://example.com/13".to_string()),
            ..Default::default()
        });
        assert_eq!(by_url.len(), 1);
        assert_eq!(by_url[0].id, 13);

        let all = registry.query_tabs(&QueryInfo {
            url: Some(ALL_URLS.to_string()),
            ..Default::default()
        });
        assert_eq!(all.len(), 4);

        let by_title = registry.query_tabs(&QueryInfo {
            title: Some("Docs".to_string()),
            ..Default::default()
        });
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, 11);
    }

    #[test]
    fn test_details_are_cached_until_refresh() {
        let (registry, tabs) = registry_with_tabs();
        assert_eq!(registry.tab_details(10).unwrap().title, "");

        tabs[0].set_title("New title");
        assert_eq!(registry.tab_details(10).unwrap().title, "");

        let (previous, fresh) = registry.refresh_tab(10).unwrap();
        assert_eq!(previous.unwrap().title, "");
        assert_eq!(fresh.title, "New title");
        assert_eq!(registry.tab_details(10).unwrap().title, "New title");
    }

    #[test]
    fn test_activation_is_per_window_and_idempotent() {
        let (registry, _tabs) = registry_with_tabs();
        let other = FakeContents::new(50, ContentsKind::BrowserView, "persist:a");
        registry.observe_tab(other, 2);
        registry.activate_tab(50);

        assert_eq!(registry.activate_tab(10), Some(1));
        assert_eq!(registry.activate_tab(10), None);
        assert_eq!(registry.activate_tab(11), Some(1));

        assert!(!registry.tab_details(10).unwrap().active);
        assert!(registry.tab_details(11).unwrap().active);
        // The tab in the other window keeps its own active flag.
        assert!(registry.tab_details(50).unwrap().active);
    }

    #[test]
    fn test_window_details_and_focus() {
        let registry = IdentityRegistry::new();
        let window = FakeWindow::new(3, 300);
        window.set_focused(true);
        registry.observe_window(window.clone());
        assert_eq!(registry.focused_window(), Some(3));

        let details = registry.window_details(3).unwrap();
        assert_eq!(details.id, 3);
        assert!(details.focused);
        assert_eq!(details.state, WindowState::Normal);

        window.set_maximized(true);
        assert_eq!(registry.window_details(3).unwrap().state, WindowState::Normal);
        registry.invalidate_window(3);
        assert_eq!(registry.window_details(3).unwrap().state, WindowState::Maximized);

        assert!(registry.release_window(3));
        assert_eq!(registry.focused_window(), None);
        assert!(registry.window_for_contents(300).is_none());
    }

    #[test]
    fn test_tab_width_follows_window() {
        let registry = IdentityRegistry::new();
        let window = FakeWindow::new(1, 100);
        registry.observe_window(window);
        let tab = FakeContents::new(9, ContentsKind::BrowserView, "p");
        registry.observe_tab(tab, 1);

        let details = registry.tab_details(9).unwrap();
        assert_eq!(details.width, 800);
        assert_eq!(details.height, 600);
        assert_eq!(details.window_id, 1);
    }

    #[test]
    fn test_decorator_may_query_the_registry() {
        let registry = Arc::new(IdentityRegistry::new());
        registry.observe_window(FakeWindow::new(1, 100));
        let tab = FakeContents::new(9, ContentsKind::BrowserView, "p");
        registry.observe_tab(tab, 1);

        let weak = Arc::downgrade(&registry);
        registry.set_decorator(Arc::new(move |contents: &dyn WebContents, details: &mut TabDetails| {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            if registry.has_tab(contents.id()) && registry.window_of_tab(contents.id()) == Some(1) {
                details.title = format!("tab {} of {}", contents.id(), registry.tab_ids().len());
            }
        }));

        assert_eq!(registry.tab_details(9).unwrap().title, "tab 9 of 1");
        assert_eq!(registry.refresh_tab(9).unwrap().1.title, "tab 9 of 1");
        assert_eq!(registry.query_tabs(&QueryInfo::default())[0].title, "tab 9 of 1");
    }
}
