//! Inbound adapters that translate external requests into domain service
//! calls while keeping framework details at the edge.
//!
//! [`controller`] holds the delivery-agnostic controller base. HTTP
//! controllers live under [`http`] and task controllers under [`tasks`].

pub mod controller;
pub mod http;
pub mod tasks;
