//! Inbound ingress for externally-posted event envelopes.
//!
//! Upstream emitters POST raw events here; the router takes over after
//! event-type detection. These routes are the public surface of the
//! gateway and carry no authentication; filtering is the point.

pub mod routes;
