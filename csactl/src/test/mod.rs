//! HTTP-level tests against the in-memory store.

mod api;
