//! Data models for pulse-link.
//!
//! Defines the push-connection frames, the isolated-worker protocol, and the
//! option structs for the hub and the task processor.

pub mod client_frame;
pub mod connection_state;
pub mod hub_options;
pub mod operation;
pub mod processor_options;
pub mod server_frame;
pub mod task_kind;
pub mod worker_message;


pub use client_frame::ClientFrame;
pub use connection_state::{ConnectionState, HubStatus, ReportedState, StateChange};
pub use hub_options::HubOptions;
pub use operation::{Operation, OperationStatus, ProcessorStats};
pub use processor_options::ProcessorOptions;
pub use server_frame::ServerFrame;
pub use task_kind::TaskKind;
pub use worker_message::{WorkerOutcome, WorkerRequest, WorkerResponse, UNSUPPORTED_TYPE_CODE};
