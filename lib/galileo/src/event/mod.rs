//! Typed event plumbing: the wire container, the tag-to-decoder map and the
//! reactor that demultiplexes framed payloads onto handlers.

pub mod container;
pub mod map;
pub mod reactor;
pub mod types;
