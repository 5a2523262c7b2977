// Event model: types, bodies and the wire envelope
pub mod event;

// SQLite system of record
pub mod db;

// Transactional outbox and relay
pub mod outbox;

// NATS client integration
pub mod nats;

// Key-value store and counter cache
pub mod cache;

// Write-path admission control
pub mod rate_limit;

// Feed fan-out, pages and retention
pub mod feed;

// Posts, comments, likes, follows and the write service
pub mod social;

pub mod notification;

// Event consumer and dispatch
pub mod consumer;

// Operator HTTP surface
pub mod ops;

pub mod config;
