//! Accessibility tree service.
//!
//! Fetches and caches the accessibility tree per tab (TTL 1 s) and answers
//! role/name queries with state filtering. The cache is only mutated here;
//! the conditional-click loop invalidates it explicitly between polls.

use crate::browser::types::{AxCheckedState, AxNode, TabHandle};
use crate::browser::BrowserControl;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// How long a fetched tree stays fresh.
const TREE_TTL_MS: i64 = 1_000;

/// State filters applied on top of role/name matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxStateFilter {
    pub expanded: Option<bool>,
    pub pressed: Option<bool>,
    pub checked: Option<AxCheckedState>,
    pub disabled: Option<bool>,
    pub selected: Option<bool>,
    /// Heading level, only meaningful when role is `heading`
    pub level: Option<u32>,
}

impl AxStateFilter {
    fn matches(&self, node: &AxNode) -> bool {
        if let Some(expanded) = self.expanded {
            if node.expanded != Some(expanded) {
                return false;
            }
        }
        if let Some(pressed) = self.pressed {
            if node.pressed != Some(pressed) {
                return false;
            }
        }
        if let Some(checked) = self.checked {
            if node.checked != Some(checked) {
                return false;
            }
        }
        if let Some(disabled) = self.disabled {
            // Nodes without the property are treated as enabled
            let node_disabled = node.disabled.unwrap_or(false);
            if node_disabled != disabled {
                return false;
            }
        }
        if let Some(selected) = self.selected {
            if node.selected != Some(selected) {
                return false;
            }
        }
        if let Some(level) = self.level {
            if node.level != Some(level) {
                return false;
            }
        }
        true
    }
}

/// A role + optional-name query against the accessibility tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxQuery {
    /// Role to match, case-insensitive
    pub role: String,
    /// Accessible-name pattern; `None` matches any name
    pub name: Option<String>,
    /// Require name equality instead of substring containment
    pub exact_name: bool,
    /// Include ignored/hidden nodes
    pub include_hidden: bool,
    pub state: AxStateFilter,
}

impl AxQuery {
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn exact(mut self) -> Self {
        self.exact_name = true;
        self
    }

    fn matches(&self, node: &AxNode) -> bool {
        if node.ignored && !self.include_hidden {
            return false;
        }
        if !node.role.eq_ignore_ascii_case(&self.role) {
            return false;
        }
        if let Some(pattern) = &self.name {
            let name = node.name.to_lowercase();
            let pattern = pattern.to_lowercase();
            let name_matches = if self.exact_name {
                name == pattern
            } else {
                name.contains(&pattern)
            };
            if !name_matches {
                return false;
            }
        }
        self.state.matches(node)
    }
}

struct CachedTree {
    root: AxNode,
    fetched_at: DateTime<Utc>,
}

impl CachedTree {
    fn is_fresh(&self) -> bool {
        Utc::now() - self.fetched_at < Duration::milliseconds(TREE_TTL_MS)
    }
}

/// Cached accessibility-tree access for locator strategies.
pub struct AccessibilityService {
    browser: Arc<dyn BrowserControl>,
    cache: RwLock<HashMap<TabHandle, CachedTree>>,
}

impl AccessibilityService {
    pub fn new(browser: Arc<dyn BrowserControl>) -> Self {
        Self {
            browser,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the tree for a tab, reading through the cache.
    pub async fn tree(&self, tab: &TabHandle) -> Result<AxNode> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(tab) {
                if entry.is_fresh() {
                    return Ok(entry.root.clone());
                }
            }
        }

        let root = self.browser.get_accessibility_tree(tab).await?;
        debug!(tab = %tab, nodes = root.size(), "fetched accessibility tree");

        let mut cache = self.cache.write().await;
        cache.insert(
            tab.clone(),
            CachedTree {
                root: root.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(root)
    }

    /// Drop the cached tree for a tab.
    pub async fn clear_cache(&self, tab: &TabHandle) {
        self.cache.write().await.remove(tab);
    }

    /// Drop every cached tree.
    pub async fn clear_all(&self) {
        self.cache.write().await.clear();
    }

    /// Find all nodes matching a query, in document order.
    pub async fn find_all(&self, tab: &TabHandle, query: &AxQuery) -> Result<Vec<AxNode>> {
        let root = self.tree(tab).await?;
        let mut matches = Vec::new();
        root.walk(&mut |node| {
            if query.matches(node) {
                matches.push(node.clone());
            }
        });
        Ok(matches)
    }

    /// Find the first node matching a query.
    pub async fn find_first(&self, tab: &TabHandle, query: &AxQuery) -> Result<Option<AxNode>> {
        Ok(self.find_all(tab, query).await?.into_iter().next())
    }
}
