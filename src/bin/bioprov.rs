use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use bioprovision::config::{
    ClientArgs, SBG_ENDPOINTS, SYNAPSE_ENDPOINT, TOWER_ENDPOINTS, bundle_client_args,
};
use bioprovision::error::ProvisionError;
use bioprovision::sevenbridges::{SbgSession, VolumeRef};
use bioprovision::synapse::SynapseSession;
use bioprovision::tower::{LaunchSpec, TowerSession};

#[derive(Parser)]
#[command(name = "bioprov")]
#[command(about = "Idempotent provisioning of remote resources across bioinformatics platforms")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// SevenBridges/Cavatica operations
    #[command(subcommand)]
    Sevenbridges(SbgCommand),
    /// Nextflow Tower operations
    #[command(subcommand)]
    Nextflowtower(TowerCommand),
    /// Synapse operations
    #[command(subcommand)]
    Synapse(SynapseCommand),
}

#[derive(Args)]
struct SbgClientArgs {
    /// Platform short name (cavatica, cgc, sevenbridges)
    #[arg(long, default_value = "cavatica")]
    platform: String,
    /// Explicit API endpoint; wins over --platform
    #[arg(long)]
    endpoint: Option<String>,
    /// Auth token; falls back to SB_AUTH_TOKEN
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args)]
struct TowerClientArgs {
    /// Platform short name (tower.nf, sage, sage-dev)
    #[arg(long, default_value = "sage")]
    platform: String,
    /// Explicit API endpoint; wins over --platform
    #[arg(long)]
    endpoint: Option<String>,
    /// Auth token; falls back to NXF_TOWER_TOKEN or TOWER_ACCESS_TOKEN
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args)]
struct SynapseClientArgs {
    /// Auth token; falls back to SYNAPSE_AUTH_TOKEN
    #[arg(long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum SbgCommand {
    /// Get or create a project
    EnsureProject {
        #[command(flatten)]
        client: SbgClientArgs,
        #[arg(long)]
        name: String,
        #[arg(long)]
        billing_group: String,
    },
    /// Get or copy a public app into a project
    EnsureApp {
        #[command(flatten)]
        client: SbgClientArgs,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        app_id: String,
    },
    /// Get or import a volume file under a project-relative path
    ImportFile {
        #[command(flatten)]
        client: SbgClientArgs,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        volume_id: String,
        #[arg(long)]
        volume_path: String,
        #[arg(long)]
        project_path: String,
    },
    /// Resolve an existing cloud volume by name
    ResolveVolume {
        #[command(flatten)]
        client: SbgClientArgs,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum TowerCommand {
    /// Launch a workflow run in the given workspace
    LaunchWorkflow {
        #[command(flatten)]
        client: TowerClientArgs,
        #[arg(long)]
        workspace_id: String,
        #[arg(long)]
        compute_env_id: String,
        #[arg(long)]
        pipeline: String,
        #[arg(long)]
        revision: Option<String>,
        #[arg(long)]
        run_name: Option<String>,
        #[arg(long)]
        work_dir: Option<String>,
        /// Params file (YAML or JSON) passed through as paramsText
        #[arg(long)]
        params_file: Option<Utf8PathBuf>,
        #[arg(long)]
        nextflow_config: Option<String>,
        #[arg(long)]
        pre_run_script: Option<String>,
        #[arg(long = "profile")]
        profiles: Vec<String>,
        #[arg(long = "user-secret")]
        user_secrets: Vec<String>,
        #[arg(long = "workspace-secret")]
        workspace_secrets: Vec<String>,
        /// JSON file with a sparse overrides tree for the launch payload
        #[arg(long)]
        overrides_file: Option<Utf8PathBuf>,
    },
}

#[derive(Subcommand)]
enum SynapseCommand {
    /// Get or create a project
    EnsureProject {
        #[command(flatten)]
        client: SynapseClientArgs,
        #[arg(long)]
        name: String,
    },
    /// Get or create a nested folder path under a project
    EnsureFolder {
        #[command(flatten)]
        client: SynapseClientArgs,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        path: String,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ProvisionError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ProvisionError) -> u8 {
    match error {
        ProvisionError::Configuration(_) | ProvisionError::ScopeNotOpen { .. } => 2,
        ProvisionError::SbgHttp(_)
        | ProvisionError::SbgStatus { .. }
        | ProvisionError::TowerHttp(_)
        | ProvisionError::TowerStatus { .. }
        | ProvisionError::SynapseHttp(_)
        | ProvisionError::SynapseStatus { .. }
        | ProvisionError::PollTimeout { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sevenbridges(command) => run_sevenbridges(command),
        Commands::Nextflowtower(command) => run_nextflowtower(command),
        Commands::Synapse(command) => run_synapse(command),
    }
}

fn resolve_token(flag: Option<String>, env_vars: &[&str]) -> Result<String, ProvisionError> {
    if let Some(token) = flag {
        return Ok(token);
    }
    for var in env_vars {
        if let Ok(token) = std::env::var(var) {
            if !token.trim().is_empty() {
                return Ok(token);
            }
        }
    }
    Err(ProvisionError::Configuration(format!(
        "provide an auth token via --token or one of {env_vars:?}"
    )))
}

fn sbg_client_args(client: SbgClientArgs) -> Result<ClientArgs, ProvisionError> {
    let token = resolve_token(client.token, &["SB_AUTH_TOKEN"])?;
    bundle_client_args(
        &token,
        Some(&client.platform),
        client.endpoint.as_deref(),
        SBG_ENDPOINTS,
    )
}

fn tower_client_args(client: TowerClientArgs) -> Result<ClientArgs, ProvisionError> {
    let token = resolve_token(client.token, &["NXF_TOWER_TOKEN", "TOWER_ACCESS_TOKEN"])?;
    bundle_client_args(
        &token,
        Some(&client.platform),
        client.endpoint.as_deref(),
        TOWER_ENDPOINTS,
    )
}

fn synapse_client_args(client: SynapseClientArgs) -> Result<ClientArgs, ProvisionError> {
    let token = resolve_token(client.token, &["SYNAPSE_AUTH_TOKEN"])?;
    bundle_client_args(&token, None, Some(SYNAPSE_ENDPOINT), &[])
}

fn print_json(value: &Value) -> miette::Result<()> {
    let rendered = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{rendered}");
    Ok(())
}

fn run_sevenbridges(command: SbgCommand) -> miette::Result<()> {
    match command {
        SbgCommand::EnsureProject {
            client,
            name,
            billing_group,
        } => {
            let args = sbg_client_args(client)?;
            let session = SbgSession::new(&args)?;
            let project = session.ensure_project(&name, &billing_group)?;
            print_json(&json!({"id": project.id, "name": project.name}))
        }
        SbgCommand::EnsureApp {
            client,
            project_id,
            app_id,
        } => {
            let args = sbg_client_args(client)?;
            let mut session = SbgSession::new(&args)?;
            session.open_project(&project_id)?;
            let app = session.ensure_copied_app(&app_id)?;
            print_json(&json!({"id": app.id, "name": app.name}))
        }
        SbgCommand::ImportFile {
            client,
            project_id,
            volume_id,
            volume_path,
            project_path,
        } => {
            let args = sbg_client_args(client)?;
            let mut session = SbgSession::new(&args)?;
            session.open_project(&project_id)?;
            let file = session.ensure_imported_file(&volume_id, &volume_path, &project_path)?;
            print_json(&json!({"id": file.id, "name": file.name}))
        }
        SbgCommand::ResolveVolume { client, name } => {
            let args = sbg_client_args(client)?;
            let session = SbgSession::new(&args)?;
            let volume = session.resolve_volume(VolumeRef::Name(&name))?;
            print_json(&json!({"id": volume.id, "name": volume.name}))
        }
    }
}

fn run_nextflowtower(command: TowerCommand) -> miette::Result<()> {
    match command {
        TowerCommand::LaunchWorkflow {
            client,
            workspace_id,
            compute_env_id,
            pipeline,
            revision,
            run_name,
            work_dir,
            params_file,
            nextflow_config,
            pre_run_script,
            profiles,
            user_secrets,
            workspace_secrets,
            overrides_file,
        } => {
            let args = tower_client_args(client)?;
            let mut session = TowerSession::new(&args)?;
            session.open_workspace(workspace_id);

            let params_text = match params_file {
                Some(path) => Some(std::fs::read_to_string(&path).into_diagnostic()?),
                None => None,
            };
            let overrides = match overrides_file {
                Some(path) => {
                    let content = std::fs::read_to_string(&path).into_diagnostic()?;
                    Some(serde_json::from_str::<Value>(&content).into_diagnostic()?)
                }
                None => None,
            };
            let spec = LaunchSpec {
                compute_env_id,
                pipeline,
                revision,
                params_text,
                nextflow_config,
                run_name,
                work_dir,
                profiles,
                user_secrets,
                workspace_secrets,
                pre_run_script,
            };
            let workflow = session.launch_workflow(&spec, overrides.as_ref())?;
            print_json(&json!({
                "id": workflow.id,
                "runName": workflow.run_name,
                "status": workflow.status,
            }))
        }
    }
}

fn run_synapse(command: SynapseCommand) -> miette::Result<()> {
    match command {
        SynapseCommand::EnsureProject { client, name } => {
            let args = synapse_client_args(client)?;
            let session = SynapseSession::new(&args)?;
            let project = session.ensure_project(&name)?;
            print_json(&json!({"id": project.id, "name": project.name}))
        }
        SynapseCommand::EnsureFolder {
            client,
            project_id,
            path,
        } => {
            let args = synapse_client_args(client)?;
            let mut session = SynapseSession::new(&args)?;
            session.open_project(&project_id)?;
            let folder = session.resolve_folder_path(&path)?;
            print_json(&json!({"id": folder.id()}))
        }
    }
}
