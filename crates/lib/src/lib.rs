//! Linehook core library: webhook verification, event decoding and concurrent
//! fan-out of events to registered handlers, plus the HTTP gateway serving it.

pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
