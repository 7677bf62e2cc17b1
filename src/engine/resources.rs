//! World-level resources shared with systems.
//!
//! Two kinds of provider, keyed by Rust type:
//! * **singleton**: one value owned by the world, borrowed by every system.
//! * **transient**: a factory producing a fresh value on each request.
//!
//! Resources are configured on the [`crate::WorldBuilder`] and are read-only
//! once the world is built. Jobs that need them capture clones.

use std::any::{Any, TypeId};
use std::collections::HashMap;

type Factory = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

enum Provider {
    Singleton(Box<dyn Any + Send + Sync>),
    Transient(Factory),
}

/// Type-keyed provider registry.

#[derive(Default)]
pub struct Resources {
    providers: HashMap<TypeId, Provider>,
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources").field("providers", &self.providers.len()).finish()
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` as the singleton for `T`, replacing any provider.
    pub fn insert_singleton<T: Any + Send + Sync>(&mut self, value: T) {
        self.providers.insert(TypeId::of::<T>(), Provider::Singleton(Box::new(value)));
    }

    /// Registers a factory for `T`, replacing any provider.
    pub fn insert_transient<T, F>(&mut self, factory: F)
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: Factory = Box::new(move || Box::new(factory()) as Box<dyn Any + Send>);
        self.providers.insert(TypeId::of::<T>(), Provider::Transient(factory));
    }

    /// Borrows the singleton for `T`.
    ///
    /// Returns `None` if `T` has no provider or only a transient one.
    pub fn get<T: Any>(&self) -> Option<&T> {
        match self.providers.get(&TypeId::of::<T>())? {
            Provider::Singleton(value) => value.downcast_ref::<T>(),
            Provider::Transient(_) => None,
        }
    }

    /// Produces a fresh `T` from its transient factory.
    pub fn make<T: Any>(&self) -> Option<T> {
        match self.providers.get(&TypeId::of::<T>())? {
            Provider::Transient(factory) => factory().downcast::<T>().ok().map(|value| *value),
            Provider::Singleton(_) => None,
        }
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<T>())
    }

    #[inline] pub fn len(&self) -> usize { self.providers.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.providers.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_and_transient_are_distinct() {
        let mut resources = Resources::new();
        resources.insert_singleton(42u32);
        resources.insert_transient(|| vec![1u8, 2, 3]);

        assert_eq!(resources.get::<u32>(), Some(&42));
        assert_eq!(resources.make::<u32>(), None);
        assert_eq!(resources.make::<Vec<u8>>(), Some(vec![1, 2, 3]));
        assert!(resources.get::<Vec<u8>>().is_none());
        assert!(!resources.contains::<i64>());
    }
}
