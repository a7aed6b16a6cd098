//! Browser layout state. The client is the source of desired layout, but the
//! server is the source of truth for which sessions exist, so every read and
//! write passes through [`validate`] against the live session set.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A visual grouping of sessions in the sidebar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiGroup {
    pub id: String,
    pub name: String,
    pub session_ids: Vec<String>,
    /// One of `single`, `horizontal`, `vertical`, `grid`.
    pub layout: String,
    /// For 3-pane layouts: `top`, `bottom`, `left`, or `right`.
    pub expanded_quadrant: String,
    pub split_ratio: Option<Vec<f64>>,
    /// Maps pane positions to session indices.
    pub cell_mapping: Option<Vec<usize>>,
}

/// The full UI layout state (groups, order, active group, flags).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiState {
    pub groups: Vec<UiGroup>,
    pub group_order: Vec<String>,
    pub active_group_id: String,
    pub group_counter: u64,
    pub sidebar_collapsed: bool,
    /// Session ids the user has custom-named.
    pub custom_names: Vec<String>,
}

/// Default layout for a given pane count.
pub fn default_layout(count: usize) -> &'static str {
    match count {
        1 => "single",
        2 => "horizontal",
        _ => "grid",
    }
}

/// Default split ratios for a given pane count.
pub fn default_split_ratio(count: usize) -> Option<Vec<f64>> {
    match count {
        1 => None,
        2 => Some(vec![0.5]),
        _ => Some(vec![0.5, 0.5]),
    }
}

/// Reconcile a UI state against the set of live session ids.
///
/// Dead session references are pruned; groups left with zero sessions are
/// dropped; group order lists exactly the surviving groups; a group whose
/// live-session count changed has its layout, ratios, and cell mapping reset
/// to defaults; the active group falls back to the first surviving group (or
/// empty); the id counter resets when no groups remain. Idempotent.
pub fn validate(state: &UiState, live_sessions: &HashSet<String>) -> UiState {
    let mut groups = Vec::new();
    let mut group_ids = HashSet::new();

    for group in &state.groups {
        let surviving: Vec<String> = group
            .session_ids
            .iter()
            .filter(|sid| live_sessions.contains(*sid))
            .cloned()
            .collect();
        if surviving.is_empty() {
            continue;
        }

        let mut kept = group.clone();
        if surviving.len() != group.session_ids.len() {
            kept.layout = default_layout(surviving.len()).to_string();
            kept.split_ratio = default_split_ratio(surviving.len());
            kept.cell_mapping = None;
        }
        kept.session_ids = surviving;
        group_ids.insert(kept.id.clone());
        groups.push(kept);
    }

    let mut order: Vec<String> = state
        .group_order
        .iter()
        .filter(|gid| group_ids.contains(*gid))
        .cloned()
        .collect();
    for group in &groups {
        if !order.contains(&group.id) {
            order.push(group.id.clone());
        }
    }

    let active_group_id = if group_ids.contains(&state.active_group_id) {
        state.active_group_id.clone()
    } else {
        order.first().cloned().unwrap_or_default()
    };

    let group_counter = if groups.is_empty() { 0 } else { state.group_counter };

    UiState {
        groups,
        group_order: order,
        active_group_id,
        group_counter,
        sidebar_collapsed: state.sidebar_collapsed,
        custom_names: state
            .custom_names
            .iter()
            .filter(|sid| live_sessions.contains(*sid))
            .cloned()
            .collect(),
    }
}

/// Holder for the last-validated state. POST persists the validated result;
/// GET re-validates the stored state against the current session set without
/// persisting it, so browsers never see dangling ids even if the registry
/// changed since the last write.
pub struct UiStateStore {
    inner: Mutex<UiState>,
}

impl UiStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(UiState::default()),
        }
    }

    pub fn get(&self, live_sessions: &HashSet<String>) -> UiState {
        validate(&self.inner.lock(), live_sessions)
    }

    pub fn set(&self, state: &UiState, live_sessions: &HashSet<String>) -> UiState {
        let valid = validate(state, live_sessions);
        *self.inner.lock() = valid.clone();
        valid
    }

    /// Drop one session id from the stored state; invoked when a session
    /// dies outside of any HTTP request.
    pub fn remove_session(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        let mut remaining: HashSet<String> = inner
            .groups
            .iter()
            .flat_map(|g| g.session_ids.iter().cloned())
            .collect();
        remaining.remove(session_id);
        let next = validate(&inner, &remaining);
        *inner = next;
    }
}

impl Default for UiStateStore {
    fn default() -> Self {
        Self::new()
    }
}
