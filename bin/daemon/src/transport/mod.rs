//! The external invocation surface (§6): a thin bootstrap-layer skeleton
//! over [`Engine`]'s catalog CRUD, manual execution, and hook-trigger
//! operations. Request routing and response shaping go only as deep as the
//! config file's `transport`/`http` block implies; the core itself exposes
//! no transport.

pub mod http;
pub mod stdio;
