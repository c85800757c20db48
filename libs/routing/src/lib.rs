//! # berth-routing
//!
//! Registration of per-container routes in the key/value store watched by
//! the reverse proxy (Traefik's Consul KV provider).
//!
//! ## Key layout
//!
//! ```text
//! <prefix>/frontends/<frontend>/routes/host/rule
//! <prefix>/frontends/<frontend>/passHostHeader
//! <prefix>/frontends/<frontend>/headers/sslredirect
//! <prefix>/frontends/<frontend>/backend
//! <prefix>/backends/<backend>/servers/<server>/url
//! ```
//!
//! All writes are single-key puts and all deletes are subtree deletes. There
//! is no multi-key atomicity: a registration interrupted halfway leaves the
//! keys written so far in place.

mod consul;
mod error;
mod kv;
mod memory;
mod registrar;

pub use consul::ConsulKv;
pub use error::{KvError, RoutingError};
pub use kv::KvStore;
pub use memory::MemoryKv;
pub use registrar::{
    backend_name, frontend_name, FrontendSpec, RoutingRegistrar, DEFAULT_SERVER_NAME,
};
