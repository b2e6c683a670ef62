// Adapters layer: one module per concrete backend family. Every module
// implements the domain ports; nothing outside this layer speaks a wire
// protocol.

pub mod couch;
pub mod firebase;
pub mod local;
pub mod postgrest;
pub mod s3;
pub mod supabase;
