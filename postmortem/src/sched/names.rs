//! Display names for traced processes.
//!
//! A process whose parent is known gets a `parent\pid-name` name, where
//! `parent` is itself only the last component of the parent's own name, so
//! names never nest deeper than one level.

use crate::metadata::ProcessMetadata;
use std::collections::HashMap;

/// Parent chains longer than this are cut, tolerating looping metadata.
const MAX_PARENT_DEPTH: usize = 16;

/// Caching name resolver over a [`ProcessMetadata`] source.
pub struct NameResolver<'m> {
    metadata: &'m dyn ProcessMetadata,
    cache: HashMap<u32, Option<String>>,
}

impl<'m> NameResolver<'m> {
    #[must_use]
    pub fn new(metadata: &'m dyn ProcessMetadata) -> Self {
        Self {
            metadata,
            cache: HashMap::new(),
        }
    }

    /// Name of `pid`, `None` if the metadata does not know its base name.
    pub fn resolve(&mut self, pid: u32) -> Option<String> {
        self.resolve_at(pid, 0)
    }

    fn resolve_at(&mut self, pid: u32, depth: usize) -> Option<String> {
        if let Some(cached) = self.cache.get(&pid) {
            return cached.clone();
        }
        let name = self.compose(pid, depth);
        self.cache.insert(pid, name.clone());
        name
    }

    fn compose(&mut self, pid: u32, depth: usize) -> Option<String> {
        let base = self.metadata.base_name_of(pid)?;
        let own = format!("{pid}-{base}");

        let ppid = match u32::try_from(self.metadata.parent_pid_of(pid)) {
            Ok(ppid) if ppid > 1 && ppid != pid && depth < MAX_PARENT_DEPTH => ppid,
            _ => return Some(own),
        };

        let parent = self
            .resolve_at(ppid, depth + 1)
            .unwrap_or_else(|| ppid.to_string());
        let parent = parent.rsplit('\\').next().unwrap_or_default();
        Some(format!("{parent}\\{own}"))
    }
}
