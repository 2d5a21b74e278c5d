//! Cached tool, resource, and prompt catalogs
//!
//! [`ToolRegistry`] holds an immutable [`Catalog`] snapshot behind an
//! `RwLock<Arc<..>>`. Readers clone the `Arc` and never block a refresh for
//! longer than the pointer swap; a refresh builds the replacement off to the
//! side and installs it wholesale, so readers see either the old catalog or
//! the new one and never a mix.
//!
//! The same registry backs both sides of a connection: the client fills it
//! from `tools/list` with [`ToolRegistry::refresh_tools`], the server fills
//! it from its registered handlers with [`ToolRegistry::replace_tools`] and
//! answers `tools/list` from [`ToolRegistry::list_paginated`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, ToolwireError};
use crate::mcp::cursor::{Cursor, CursorCodec};
use crate::mcp::protocol::InitializedMcpProtocol;
use crate::mcp::types::{PromptDescriptor, ResourceDescriptor, ToolDescriptor, INVALID_REQUEST};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page the registry will hand out.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Scope of `tools/list` cursors.
pub const SCOPE_TOOLS: &str = "tools";
/// Scope of `resources/list` cursors.
pub const SCOPE_RESOURCES: &str = "resources";
/// Scope of `prompts/list` cursors.
pub const SCOPE_PROMPTS: &str = "prompts";
/// Scope of [`ToolRegistry::search`] cursors.
pub const SCOPE_TOOL_SEARCH: &str = "tools/search";

/// Paging limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    /// Used when no page size is requested.
    pub default_page_size: usize,
    /// Upper bound on any page.
    pub max_page_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl PageLimits {
    /// Resolve the page size actually used.
    ///
    /// The smallest of the requested size (or the default), the server
    /// maximum, and the size a followed cursor was issued with; never below 1.
    pub fn effective(&self, requested: Option<usize>, cursor: Option<&Cursor>) -> usize {
        let mut size = requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        if let Some(c) = cursor {
            size = size.min(c.page_size);
        }
        size.max(1)
    }
}

/// One immutable snapshot of everything a server exposes.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Tools in server order.
    pub tools: Vec<ToolDescriptor>,
    /// Resources in server order.
    pub resources: Vec<ResourceDescriptor>,
    /// Prompts in server order.
    pub prompts: Vec<PromptDescriptor>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Filters for [`ToolRegistry::search`]. All present filters must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Case-insensitive substring of the name or description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Case-insensitive match on `_meta.category`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Match on the resolved `readOnlyHint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Requested page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    /// Cursor from a previous page of the same search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl SearchQuery {
    fn matches(&self, tool: &ToolDescriptor) -> bool {
        if let Some(q) = &self.query {
            let q = q.to_lowercase();
            let in_name = tool.name.to_lowercase().contains(&q);
            let in_description = tool
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&q));
            if !in_name && !in_description {
                return false;
            }
        }
        if let Some(category) = &self.category {
            match tool.category() {
                Some(c) if c.eq_ignore_ascii_case(category) => {}
                _ => return false,
            }
        }
        if let Some(read_only) = self.read_only {
            if tool.hints().read_only != read_only {
                return false;
            }
        }
        true
    }
}

/// Result of [`ToolRegistry::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    /// Matching tools on this page.
    pub items: Vec<ToolDescriptor>,
    /// Token for the next page of matches.
    pub next_cursor: Option<String>,
    /// Number of matches across all pages.
    pub total_matching: usize,
}

/// Cached catalogs with cursor pagination and search.
#[derive(Debug)]
pub struct ToolRegistry {
    catalog: RwLock<Arc<Catalog>>,
    codec: CursorCodec,
    limits: PageLimits,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new(codec: CursorCodec, limits: PageLimits) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(Catalog::default())),
            codec,
            limits,
        }
    }

    /// Paging limits in effect.
    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Current catalog snapshot.
    pub async fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&*self.catalog.read().await)
    }

    /// Fetch every `tools/list` page and install the result.
    ///
    /// Returns the number of tools now cached.
    ///
    /// # Errors
    ///
    /// Any request failure, or [`ToolwireError::Protocol`] if the server
    /// lists the same tool name twice. On error the previous tools stay in
    /// place.
    pub async fn refresh_tools(&self, protocol: &InitializedMcpProtocol) -> Result<usize> {
        let tools = protocol.list_tools().await?;
        let count = tools.len();
        self.replace_tools(tools).await?;
        tracing::debug!(count, "tool catalog refreshed");
        Ok(count)
    }

    /// Fetch every `resources/list` page and install the result.
    pub async fn refresh_resources(&self, protocol: &InitializedMcpProtocol) -> Result<usize> {
        let resources = protocol.list_resources().await?;
        let count = resources.len();
        self.replace_resources(resources).await;
        tracing::debug!(count, "resource catalog refreshed");
        Ok(count)
    }

    /// Fetch every `prompts/list` page and install the result.
    pub async fn refresh_prompts(&self, protocol: &InitializedMcpProtocol) -> Result<usize> {
        let prompts = protocol.list_prompts().await?;
        let count = prompts.len();
        self.replace_prompts(prompts).await;
        tracing::debug!(count, "prompt catalog refreshed");
        Ok(count)
    }

    /// Install `tools` as the tool catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Protocol`] naming the first duplicate name;
    /// the catalog is left unchanged.
    pub async fn replace_tools(&self, tools: Vec<ToolDescriptor>) -> Result<()> {
        let mut seen = HashSet::with_capacity(tools.len());
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ToolwireError::Protocol {
                    code: INVALID_REQUEST,
                    message: format!("duplicate tool name in catalog: {}", tool.name),
                    data: None,
                });
            }
        }

        let mut guard = self.catalog.write().await;
        let mut next = Catalog::clone(&guard);
        next.tools = tools;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Install `resources` as the resource catalog.
    pub async fn replace_resources(&self, resources: Vec<ResourceDescriptor>) {
        let mut guard = self.catalog.write().await;
        let mut next = Catalog::clone(&guard);
        next.resources = resources;
        *guard = Arc::new(next);
    }

    /// Install `prompts` as the prompt catalog.
    pub async fn replace_prompts(&self, prompts: Vec<PromptDescriptor>) {
        let mut guard = self.catalog.write().await;
        let mut next = Catalog::clone(&guard);
        next.prompts = prompts;
        *guard = Arc::new(next);
    }

    /// The full tool list in server order.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.snapshot().await.tools.clone()
    }

    /// Look up one tool by exact name.
    pub async fn get_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.snapshot()
            .await
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// One page of tools.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Pagination`] if `cursor` is malformed,
    /// tampered with, expired, or was issued for another list.
    pub async fn list_paginated(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<ToolDescriptor>> {
        let snapshot = self.snapshot().await;
        self.paginate(SCOPE_TOOLS, &snapshot.tools, cursor, page_size)
    }

    /// One page of resources.
    pub async fn list_resources_paginated(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<ResourceDescriptor>> {
        let snapshot = self.snapshot().await;
        self.paginate(SCOPE_RESOURCES, &snapshot.resources, cursor, page_size)
    }

    /// One page of prompts.
    pub async fn list_prompts_paginated(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<PromptDescriptor>> {
        let snapshot = self.snapshot().await;
        self.paginate(SCOPE_PROMPTS, &snapshot.prompts, cursor, page_size)
    }

    /// Filter the tool catalog, then paginate the matches.
    ///
    /// A cursor from a search indexes into that search's matches; reusing it
    /// with different filters yields a page of the new matches at the same
    /// offset. Search cursors are not accepted by the plain listings.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use serde_json::json;
    /// use toolwire::mcp::cursor::CursorCodec;
    /// use toolwire::mcp::registry::{PageLimits, SearchQuery, ToolRegistry};
    /// use toolwire::mcp::types::ToolDescriptor;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let codec = CursorCodec::new(b"k".to_vec(), Duration::from_secs(60)).unwrap();
    /// let registry = ToolRegistry::new(codec, PageLimits::default());
    /// registry
    ///     .replace_tools(vec![
    ///         ToolDescriptor::new("read_file", json!({})).with_description("Read a file"),
    ///         ToolDescriptor::new("send_mail", json!({})),
    ///     ])
    ///     .await
    ///     .unwrap();
    /// let page = registry
    ///     .search(&SearchQuery { query: Some("FILE".into()), ..Default::default() })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(page.total_matching, 1);
    /// # }
    /// ```
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let snapshot = self.snapshot().await;
        let matching: Vec<ToolDescriptor> = snapshot
            .tools
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        let total_matching = matching.len();
        let page = self.paginate(
            SCOPE_TOOL_SEARCH,
            &matching,
            query.cursor.as_deref(),
            query.page_size,
        )?;
        Ok(SearchPage {
            items: page.items,
            next_cursor: page.next_cursor,
            total_matching,
        })
    }

    fn paginate<T: Clone>(
        &self,
        scope: &str,
        items: &[T],
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<T>> {
        let decoded = cursor
            .map(|c| self.codec.decode_for(c, scope))
            .transpose()?;
        let size = self.limits.effective(page_size, decoded.as_ref());
        let start = decoded.map_or(0, |c| c.offset).min(items.len());
        let end = start.saturating_add(size).min(items.len());

        let next_cursor =
            (end < items.len()).then(|| self.codec.encode(&Cursor::new(scope, end, size)));
        Ok(Page {
            items: items[start..end].to_vec(),
            next_cursor,
        })
    }
}
