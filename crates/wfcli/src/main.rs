use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wfcore::{
    ports, validate_network, ApprovalConfig, ApprovalService, ChannelType, DataMap,
    DecisionConfig, ExecutionEvent, NodeEvent, NodeKind, NodeSpec, NotificationConfig,
    TaskConfig, TaskMode, Value, WorkflowDefinition, WorkflowGraph,
};
use wfruntime::{
    ApprovalCoordinator, EngineConfig, ExecutionEngine, InMemoryRepository, TracingNotifier,
};

#[derive(Parser)]
#[command(name = "wf")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Approve every approval request automatically
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject every approval request automatically
        #[arg(long)]
        reject: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            approve,
            reject,
            wait_secs,
            verbose,
        } => {
            init_logging(verbose);
            let decision = match (approve, reject) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            run_workflow(file, input, config, decision, Duration::from_secs(wait_secs)).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    Ok(WorkflowDefinition::from_json(&json)?)
}

fn parse_input(input: Option<String>) -> Result<DataMap> {
    let Some(input) = input else {
        return Ok(DataMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    auto_decision: Option<bool>,
    wait: Duration,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_definition(&file)?;
    tracing::debug!(definition_id = %definition.id, "definition loaded");
    println!("📋 Workflow: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Connections: {}", definition.connections.len());
    println!();

    let data = parse_input(input)?;
    let config = match config {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let repository = Arc::new(InMemoryRepository::new());
    let event_bus = Arc::new(wfcore::EventBus::new(config.event_buffer_size));
    let approvals = Arc::new(ApprovalCoordinator::with_event_bus(event_bus.clone()));
    let engine = ExecutionEngine::with_event_bus(
        repository,
        approvals.clone(),
        Arc::new(TracingNotifier::new()),
        event_bus,
        config,
    );

    // Subscribe to events for real-time output
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::InstanceStarted { instance_id, .. } => {
                    println!("▶️  Instance {} started", instance_id);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    output_port,
                    duration_ms,
                    ..
                } => match output_port {
                    Some(port) => {
                        println!("  ✅ Node {} -> {} in {}ms", node_id, port, duration_ms)
                    }
                    None => println!("  ✅ Node {} completed in {}ms", node_id, duration_ms),
                },
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::ApprovalRequested { task } => {
                    println!("  📝 Approval requested from {} (task {})", task.approver_id, task.id);
                    if let Some(approved) = auto_decision {
                        let comment = Some("answered from the command line".to_string());
                        if let Err(e) = approvals
                            .approve_task(&task.id, &task.approver_id, approved, comment)
                            .await
                        {
                            println!("     ⚠️  could not answer {}: {}", task.id, e);
                        }
                    }
                }
                ExecutionEvent::ApprovalResolved { task } => {
                    println!("  📝 {} answered: {:?}", task.approver_id, task.status);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", node_id, percent);
                        }
                    }
                },
                ExecutionEvent::InstanceStatusChanged { status, error, .. } => match error {
                    Some(error) => println!("💥 Instance {}: {}", status, error),
                    None => println!("✨ Instance {}", status),
                },
            }
        }
    });

    let instance_id = engine.start(definition, data, "cli").await?;
    let instance = engine.wait_for_completion(instance_id, wait).await?;

    // Wait for events to finish printing
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    let history = engine.get_execution_history(instance_id).await?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Instance ID: {}", instance.id);
    println!("   Status: {}", instance.status);
    println!("   Current node: {}", instance.current_node_id);
    println!("   Steps: {}", history.len());
    if let Some(error) = &instance.error_message {
        println!("   Error: {}", error);
    }

    if !instance.data.is_empty() {
        println!();
        println!("📤 Data:");
        let mut keys: Vec<_> = instance.data.keys().collect();
        keys.sort();
        for key in keys {
            println!("   {}: {}", key, instance.data[key]);
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let graph = WorkflowGraph::from_definition(load_definition(&file)?);
    if let Err(errors) = validate_network(&graph) {
        println!("❌ Workflow is invalid:");
        for error in &errors {
            println!("   - {}", error);
        }
        bail!("{} validation error(s)", errors.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", graph.definition().name);
    println!("   Nodes: {}", graph.nodes().len());
    println!("   Connections: {}", graph.connections().len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    for metadata in wfnodes::catalog() {
        println!("  • {}", metadata.node_type);
        println!("    {}", metadata.description);
        if !metadata.outputs.is_empty() {
            println!("    outputs: {}", metadata.outputs.join(", "));
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Order Approval");
    workflow.description = Some("Reviews an order and asks a manager to sign off large ones".to_string());

    let start = workflow.add_node(
        NodeSpec::start("Start")
            .with_id("start")
            .with_position(50.0, 100.0),
    );
    let review = workflow.add_node(
        NodeSpec::new(
            "Review Order",
            NodeKind::Task(TaskConfig {
                mode: TaskMode::Auto,
                description: Some("Check stock and pricing".to_string()),
                required_keys: vec!["Amount".to_string()],
                ..Default::default()
            }),
        )
        .with_id("review")
        .with_position(200.0, 100.0),
    );
    let check = workflow.add_node(
        NodeSpec::new(
            "Large Order?",
            NodeKind::Decision(DecisionConfig {
                condition: "{Amount} > 1000".to_string(),
            }),
        )
        .with_id("check")
        .with_position(350.0, 100.0),
    );
    let approve = workflow.add_node(
        NodeSpec::new(
            "Manager Approval",
            NodeKind::Approval(ApprovalConfig {
                approvers: vec!["manager".to_string()],
                require_all: true,
                title: Some("Approve large order".to_string()),
                wait_timeout_ms: Some(60_000),
            }),
        )
        .with_id("approve")
        .with_position(500.0, 50.0),
    );
    let notify = workflow.add_node(
        NodeSpec::new(
            "Notify Sales",
            NodeKind::Notification(NotificationConfig {
                title: "Order approved".to_string(),
                content: "An order of {Amount} was approved".to_string(),
                recipients: vec!["sales@example.com".to_string()],
                channel: ChannelType::Email,
            }),
        )
        .with_id("notify")
        .with_position(650.0, 50.0),
    );
    let end = workflow.add_node(NodeSpec::end("End").with_id("end").with_position(800.0, 100.0));

    workflow.connect(&start, ports::OUT, &review, ports::IN);
    workflow.connect(&review, ports::COMPLETE, &check, ports::IN);
    workflow.connect(&check, ports::TRUE, &approve, ports::IN);
    workflow.connect(&check, ports::FALSE, &end, ports::IN);
    workflow.connect(&approve, ports::APPROVE, &notify, ports::IN);
    workflow.connect(&approve, ports::REJECT, &end, ports::IN);
    workflow.connect(&notify, ports::OUT, &end, ports::IN);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  wf run --file {} --input '{{\"Amount\": 1500}}' --approve",
        output.display()
    );

    Ok(())
}
