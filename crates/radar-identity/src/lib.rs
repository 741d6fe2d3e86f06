pub mod alias;
pub mod error;
pub mod kv_mirror;
pub mod reaper;
pub mod resolver;

pub use alias::build_alias_events;
pub use error::ResolveError;
pub use kv_mirror::IdentityKvMirror;
pub use reaper::{reap_expired_sightings, reap_stale_devices, spawn_reaper};
pub use resolver::{record_from, select_canonical, CanonicalResolver};
