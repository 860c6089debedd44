//! Descriptor caching

pub mod cache;

pub use cache::{
    CacheConfig, DescriptorCache, DescriptorKey, LruDescriptorCache, NoDescriptorCache, SharedDescriptorCache,
};
