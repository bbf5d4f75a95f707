//! Ordered provider registry.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::CalendarProvider;

/// Providers known to the engine, keyed by type tag.
///
/// Registration order is the order in which an appointment is synced to
/// each provider. The registry is built once at startup and shared
/// read-only afterwards.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CalendarProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider. Returns `false` if its tag is already registered,
    /// in which case the existing provider is kept.
    pub fn register(&mut self, provider: Arc<dyn CalendarProvider>) -> bool {
        let tag = provider.provider_type();
        if self.get(tag).is_some() {
            warn!(provider = tag, "Provider already registered, ignoring");
            return false;
        }
        debug!(provider = tag, "Registered provider");
        self.providers.push(provider);
        true
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider_type: &str) -> Option<Arc<dyn CalendarProvider>> {
        self.providers
            .iter()
            .find(|p| p.provider_type() == provider_type)
            .cloned()
    }

    /// Iterates providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CalendarProvider>> {
        self.providers.iter()
    }

    pub fn provider_types(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider_type().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;

    #[test]
    fn registration_order_is_kept() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MemoryProvider::new("outlook")))
            .with(Arc::new(MemoryProvider::new("google_calendar")));

        assert_eq!(registry.provider_types(), vec!["outlook", "google_calendar"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn re_registering_is_a_no_op() {
        let first = Arc::new(MemoryProvider::new("google_calendar"));
        let mut registry = ProviderRegistry::new();
        assert!(registry.register(first.clone()));
        assert!(!registry.register(Arc::new(MemoryProvider::new("google_calendar"))));
        assert_eq!(registry.len(), 1);

        let kept = registry.get("google_calendar").unwrap();
        let kept_ptr = Arc::as_ptr(&kept) as *const ();
        let first_ptr = Arc::as_ptr(&first) as *const ();
        assert_eq!(kept_ptr, first_ptr);
    }

    #[test]
    fn lookup_unknown() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("google_calendar").is_none());
        assert_eq!(format!("{registry:?}"), "ProviderRegistry { providers: [] }");
    }
}
