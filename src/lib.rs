//! runweave - a cross-platform declarative task runner
//!
//! Tasks are declared in YAML, resolved into a flat ordered sequence (with
//! dependencies and hooks injected), given a layered environment, and
//! dispatched to a shell, a language runtime, or a thin remote/container
//! handler.
//!
//! # Library usage
//!
//! ```rust,ignore
//! use runweave::{RunfileModel, Workflow, WorkflowOptions};
//!
//! #[tokio::main]
//! async fn main() -> runweave::Result<()> {
//!     let model = RunfileModel::load(std::path::Path::new("runweave.yaml"))?;
//!     let options = WorkflowOptions {
//!         context: "default".into(),
//!         dry_run: false,
//!         force: false,
//!         cache_dir: std::env::temp_dir().join("runweave-cache"),
//!     };
//!     let workflow = Workflow::new(&model, options);
//!     workflow.run(&["build".into()]).await?;
//!     Ok(())
//! }
//! ```

pub mod compose;
pub mod condition;
pub mod dispatch;
pub mod dotenv;
pub mod env_store;
pub mod error;
pub mod exec;
pub mod expander;
pub mod graph;
pub mod launchers;
pub mod model;
pub mod shell;
pub mod workflow;

pub use compose::EnvComposer;
pub use condition::ConditionEvaluator;
pub use dispatch::Dispatcher;
pub use dotenv::DotEnvDocument;
pub use env_store::EnvStore;
pub use error::{Result, RunError};
pub use exec::ExecutorFacade;
pub use expander::Expander;
pub use graph::{GraphResolver, ResolvedTask};
pub use model::RunfileModel;
pub use shell::ShellInterpreter;
pub use workflow::{TaskResult, TaskState, Workflow, WorkflowOptions};
