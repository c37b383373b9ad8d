//! Core data model: the object-metadata record that binds a user-visible
//! object name to its ordered, content-addressed block digests.

pub mod object_md;
