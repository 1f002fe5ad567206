//! Bounded-memory consistency checker for a paged graph record store.
//!
//! The store side ([`storage`]) exposes fixed-size node, relationship and
//! property records read through a traced page cache
//! ([`primitives::pager`]). The [`check`] module walks those records range by
//! range and reports every inconsistency it finds.

#![warn(missing_docs)]

pub mod check;
pub mod primitives;
pub mod storage;
pub mod types;
