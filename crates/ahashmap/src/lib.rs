//! A hashmap/hashset pair backed by `ahash`, used anywhere a map sits on a
//! resolution hot path (alias tables, package.json caches, dependency maps).

#[cfg(feature = "ahash")]
pub type AHashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
#[cfg(feature = "ahash")]
pub type AHashSet<T> = std::collections::HashSet<T, ahash::RandomState>;

#[cfg(not(feature = "ahash"))]
pub type AHashMap<K, V> = std::collections::HashMap<K, V>;
#[cfg(not(feature = "ahash"))]
pub type AHashSet<T> = std::collections::HashSet<T>;
