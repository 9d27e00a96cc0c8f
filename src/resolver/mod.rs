pub mod element_resolver;
pub mod locator_cache;
pub mod scoring;

pub use element_resolver::{
    ElementResolver, Resolution, ResolveFailure, ResolveOutcome, ResolveRequest, ResolverState,
    TokenOutcome,
};
pub use locator_cache::LocatorCache;
