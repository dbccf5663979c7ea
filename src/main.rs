//! runweave - a cross-platform declarative task runner

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use console::style;

mod cli;
mod compose;
mod condition;
mod dispatch;
mod dotenv;
mod env_store;
mod error;
mod exec;
mod expander;
mod graph;
mod launchers;
mod model;
mod shell;
mod workflow;

use cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use error::{Result, RunError};
use graph::GraphResolver;
use model::RunfileModel;
use workflow::{TaskState, Workflow, WorkflowOptions};

const RUNFILE_NAMES: &[&str] = &["runweave.yaml", "runweave.yml", "Runweave.yaml"];

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .without_time()
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, false, &cli).await,
        EffectiveCommand::None => {
            let model = load_model(&cli)?;
            print_task_list(&model, ListFormat::Table, false);
            Ok(())
        }
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { tasks, dry_run, force } => run_tasks(tasks, *dry_run, *force, cli).await,

        Commands::List { format, deps } => {
            let model = load_model(cli)?;
            print_task_list(&model, format.clone(), *deps);
            Ok(())
        }

        Commands::Graph { task, format } => {
            let model = load_model(cli)?;
            print_graph(&model, task.as_deref(), format.clone(), &cli.context)
        }

        Commands::Check => {
            let model = load_model(cli)?;
            println!(
                "{} {} is valid ({} tasks)",
                style("✓").green(),
                model.source_path.display(),
                model.tasks.len()
            );
            Ok(())
        }

        Commands::Init { force } => init_runfile(*force),
    }
}

async fn run_tasks(tasks: &[String], dry_run: bool, force: bool, cli: &Cli) -> Result<()> {
    let model = load_model(cli)?;
    let cache_dir = cache_dir_for(&model);

    let options = WorkflowOptions {
        context: cli.context.clone(),
        dry_run,
        force,
        cache_dir,
    };
    let workflow = Workflow::new(&model, options);
    let results = workflow.run(tasks).await?;

    for result in &results {
        print_task_result(result);
    }

    if results.iter().any(|r| r.failed()) {
        return Err(RunError::TaskRun {
            task: tasks.join(", "),
            exit_code: 1,
            stderr_tail: None,
        });
    }

    Ok(())
}

fn load_model(cli: &Cli) -> Result<RunfileModel> {
    let path = match &cli.file {
        Some(path) => path.clone(),
        None => find_runfile()?,
    };
    RunfileModel::load(&path)
}

fn find_runfile() -> Result<PathBuf> {
    for name in RUNFILE_NAMES {
        let candidate = Path::new(name);
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
    }
    Err(RunError::ConfigNotFound {
        searched: RUNFILE_NAMES.iter().map(PathBuf::from).collect(),
    })
}

fn cache_dir_for(model: &RunfileModel) -> PathBuf {
    model
        .source_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".runweave")
        .join("cache")
}

fn print_task_list(model: &RunfileModel, format: ListFormat, show_deps: bool) {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let mut names: Vec<_> = model.task_names();
            names.sort();
            let max_name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);

            for name in &names {
                if let Some(task) = model.tasks.get(name) {
                    let desc = task.desc.as_deref().unwrap_or("");
                    print!(
                        "  {}{}  {}",
                        style(name).cyan().bold(),
                        " ".repeat(max_name_len - name.len()),
                        style(desc).dim()
                    );
                    if show_deps && !task.needs.is_empty() {
                        print!(
                            " {}",
                            style(format!("[needs: {}]", task.needs.join(", "))).yellow().dim()
                        );
                    }
                    println!();
                }
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for name in model.task_names() {
                if let Some(task) = model.tasks.get(&name) {
                    let mut obj = serde_json::Map::new();
                    if let Some(desc) = &task.desc {
                        obj.insert("description".to_string(), serde_json::json!(desc));
                    }
                    if show_deps {
                        obj.insert("needs".to_string(), serde_json::json!(task.needs));
                    }
                    tasks.insert(name, serde_json::Value::Object(obj));
                }
            }
            println!("{}", serde_json::to_string_pretty(&tasks).unwrap());
        }

        ListFormat::Plain => {
            let mut names: Vec<_> = model.task_names();
            names.sort();
            for name in names {
                println!("{name}");
            }
        }
    }
}

/// Renders the resolved sequence for `task` (or every declared task, run
/// independently, if `task` is absent). `Dot`/`Json` build a `petgraph`
/// graph from the `needs` edges purely for rendering — `GraphResolver`
/// itself never uses petgraph, see `src/graph.rs`.
fn print_graph(model: &RunfileModel, task: Option<&str>, format: GraphFormat, context: &str) -> Result<()> {
    let resolver = GraphResolver::new(model);
    let targets: Vec<String> = match task {
        Some(name) => vec![name.to_string()],
        None => model.task_names(),
    };
    let resolved = resolver.resolve(&targets, context)?;

    match format {
        GraphFormat::Text => {
            println!("{}", style("Resolved task sequence:").bold());
            println!();
            for (i, entry) in resolved.iter().enumerate() {
                println!("  {}. {}", i + 1, style(&entry.id).cyan().bold());
            }
        }

        GraphFormat::Dot => {
            let mut graph: petgraph::graph::DiGraph<&str, ()> = petgraph::graph::DiGraph::new();
            let mut indices = std::collections::HashMap::new();
            for entry in &resolved {
                let idx = graph.add_node(entry.id.as_str());
                indices.insert(entry.id.as_str(), idx);
            }
            for entry in &resolved {
                for dep in &entry.task.needs {
                    if let (Some(&from), Some(&to)) = (indices.get(dep.as_str()), indices.get(entry.id.as_str())) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
            println!("{:?}", petgraph::dot::Dot::with_config(&graph, &[]));
        }

        GraphFormat::Json => {
            let nodes: Vec<_> = resolved
                .iter()
                .map(|entry| serde_json::json!({ "id": entry.id, "needs": entry.task.needs }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "nodes": nodes })).unwrap());
        }
    }

    Ok(())
}

fn print_task_result(result: &workflow::TaskResult) {
    let status = match result.state {
        TaskState::Ok => style("✓").green(),
        TaskState::Skipped => style("- skipped").dim(),
        TaskState::Error => style("✗").red(),
        _ => style("?").dim(),
    };
    let elapsed = (result.finished_at - result.started_at)
        .to_std()
        .unwrap_or_default();
    println!(
        "{} {} {}",
        status,
        style(&result.id).bold(),
        style(format!("{:.2}s", elapsed.as_secs_f64())).dim()
    );
    if let Some(error) = &result.error {
        eprintln!("  {}", style(error).red());
    }
}

fn init_runfile(force: bool) -> Result<()> {
    let path = Path::new("runweave.yaml");
    if path.exists() && !force {
        return Err(RunError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "runweave.yaml already exists (use --force to overwrite)",
        )));
    }

    let template = r#"name: example

env:
  # GREETING: hello

tasks:
  fmt:
    desc: Format code
    run: cargo fmt

  lint:
    desc: Run clippy
    run: cargo clippy -- -D warnings

  test:
    desc: Run tests
    run: cargo test

  check:
    desc: Format, lint, and test
    needs: [fmt, lint, test]

  build:
    desc: Build release binary
    needs: [check]
    run: cargo build --release
"#;

    std::fs::write(path, template)?;
    println!("{} Created {}", style("✓").green(), style("runweave.yaml").bold());
    Ok(())
}
