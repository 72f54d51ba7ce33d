//! Core DAG model, validation, sandbox and executor for dagprobe.
//!
//! Everything here is deterministic and LLM-free: value types for questions
//! and generated DAGs, topology analysis, the structural validator suite, the
//! code safety scan, the locked-down sandbox and the layer-ordered executor.
//! The LLM-facing pipeline lives in the `orchestrator` crate.

pub mod builtins;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node_result;
pub mod reference;
pub mod safety;
pub mod sandbox;
pub mod topology;
pub mod validate;

pub use dataset::{ColumnMeta, Dataset, Metadata};
pub use error::{CoreError, Result};
pub use executor::DagExecutor;
pub use graph::{
    CriticFeedback, DagEdge, DagNode, DifficultyLevel, GeneratedDag, LayerValidation, NodeId,
    Question,
};
pub use node_result::{ExecutionResult, NodeExecutionResult};
pub use reference::InputRef;
pub use safety::{scan_node_code, ScanReport};
pub use sandbox::{Sandbox, SandboxConfig};
pub use validate::{validate_dag, StructuralReport};
