//! # conveyor-std
//!
//! The message processing engine and stock implementations for Conveyor.
//!
//! This crate provides:
//! - **Chains**: [`chain::ChainBuilder`] and [`chain::Chain`]
//! - **Executors**: [`executor::BlockingExecutor`], [`executor::NonBlockingExecutor`]
//! - **Flows**: [`flow::Flow`], which owns a chain and its collaborators
//! - **Asynchronous hand-off**: [`async_delegate::AsyncDelegate`],
//!   [`async_delegate::AsyncInterceptingProcessor`]
//! - **Response processing**: [`response::ResponseProcessorAdapter`]
//! - **Redelivery**: [`redelivery::IdempotentRedeliveryPolicy`]
//! - **Collaborators**: [`scheduler::TokioScheduler`], object stores, the
//!   in-memory lock factory and [`exception::LoggingExceptionHandler`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core traits
pub use conveyor_core;

// Modules
pub mod async_delegate;
pub mod chain;
pub mod exception;
pub mod executor;
pub mod flow;
pub mod lock;
pub mod processors;
pub mod redelivery;
pub mod response;
pub mod scheduler;
pub mod store;
pub mod testing;
