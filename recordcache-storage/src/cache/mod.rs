//! Cache tier abstraction with negative-result markers.
//!
//! Two layers:
//!
//! - [`CacheTier`] is the raw key/bytes capability with per-key TTL. It knows
//!   nothing about records. [`InMemoryCacheTier`] and [`RedisCacheTier`]
//!   implement it.
//! - [`EntityCache`] sits on top of any tier: it derives keys through a
//!   [`KeySpace`], encodes entities as JSON and maps the negative sentinel to
//!   [`CacheLookup::Negative`].
//!
//! # Example
//!
//! ```ignore
//! let tier = Arc::new(InMemoryCacheTier::new());
//! let cache: EntityCache<Record, _> = EntityCache::new(tier, KeySpace::default());
//!
//! cache.set_negative(42, Duration::from_secs(60)).await?;
//! assert!(cache.get(42).await?.is_negative());
//! ```

pub mod codec;
pub mod entity_cache;
pub mod key;
pub mod lookup;
pub mod memory;
pub mod redis_tier;
pub mod traits;

pub use codec::NEGATIVE_SENTINEL;
pub use entity_cache::EntityCache;
pub use key::KeySpace;
pub use lookup::CacheLookup;
pub use memory::InMemoryCacheTier;
pub use redis_tier::RedisCacheTier;
pub use traits::{CacheResult, CacheStats, CacheTier, CacheableEntity};
