//! DAG validation, input binding, Node Executor and Graph Runner for the
//! Apps Script Studio workflow execution engine (spec §4.2; C4, C5).

pub mod binding;
pub mod dag;
pub mod executor;

pub use dag::{validate, ExecutionGraph};
pub use executor::{
    ConnectionLookup, CredentialManager, GraphRunner, GraphRunnerConfig, NoopCredentialManager, WorkflowLookup,
};
